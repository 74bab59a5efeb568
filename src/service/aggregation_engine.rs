// src/service/aggregation_engine.rs
//! Aggregation engine
//!
//! Responsibilities:
//! - Map each KPI and chart name to a fixed reduction over the CRM store.
//! - Apply the caller's scope as an implicit row filter on every query.
//! - Validate categorical filters against the active dimension values.
//! - Serve drilldowns anchored to a bucket of the current chart result.
//! - Produce monthly metric histories for the predictive models.
//!
//! Money is summed as `Decimal`; ratios are `converted / total`, rounded to
//! four places, and exactly zero when there is nothing to divide.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::error::{AnalyticsError, AnalyticsResult};
use crate::domain::model::analytics::{
    ChartName, ChartPoint, ChartSeries, DetailRow, Drilldown, FilterOptions, HistoryPoint, KpiName, KpiResult, PresetOption,
    UnitKind,
};
use crate::domain::model::crm::{Dimension, Sale};
use crate::domain::model::filter::{first_of_month, last_of_month, month_key, parse_month_key, DatePreset, FilterSpec};
use crate::domain::model::principal::PrincipalScope;
use crate::repository::crm_store::{CrmStore, RowQuery};
use crate::service::result_cache::{cache_key, ResultCache};
use crate::telemetry::metrics;

const RATIO_SCALE: u32 = 4;
const MONEY_SCALE: u32 = 2;

pub struct AggregationEngine {
    store: Arc<dyn CrmStore>,
    cache: Option<Arc<ResultCache<KpiResult>>>,
    currency: String,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn CrmStore>, currency: impl Into<String>) -> Self {
        Self {
            store,
            cache: None,
            currency: currency.into(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache<KpiResult>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Computes one KPI by name.
    pub async fn compute_kpi(&self, name: &str, filter: &FilterSpec, scope: PrincipalScope) -> AnalyticsResult<KpiResult> {
        let kpi = KpiName::parse(name).ok_or_else(|| AnalyticsError::UnknownMetric(name.to_string()))?;
        self.validate_dimensions(filter).await?;
        self.kpi_cached(kpi, filter, scope).await
    }

    /// Computes several KPIs over the same filter, validating it once.
    pub async fn compute_kpis(&self, kpis: &[KpiName], filter: &FilterSpec, scope: PrincipalScope) -> AnalyticsResult<Vec<KpiResult>> {
        self.validate_dimensions(filter).await?;
        let mut out = Vec::with_capacity(kpis.len());
        for kpi in kpis {
            out.push(self.kpi_cached(*kpi, filter, scope).await?);
        }
        Ok(out)
    }

    async fn kpi_cached(&self, kpi: KpiName, filter: &FilterSpec, scope: PrincipalScope) -> AnalyticsResult<KpiResult> {
        metrics::incr("analytics_kpi_requests", &[("kpi", kpi.as_str())]);
        let key = self.cache.as_ref().map(|_| cache_key(kpi.as_str(), filter, &scope));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key).await {
                return Ok(hit);
            }
        }

        let value = self.kpi_value(kpi, &RowQuery::new(filter, scope)).await?;
        let result = KpiResult {
            name: kpi,
            label: kpi.label(),
            value,
            unit: self.unit_for(kpi.unit_kind()),
            filter: filter.clone(),
        };
        debug!(kpi = kpi.as_str(), value = %result.value, "kpi computed");

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache.insert(key, result.clone()).await;
        }
        Ok(result)
    }

    async fn kpi_value(&self, kpi: KpiName, q: &RowQuery) -> AnalyticsResult<Decimal> {
        let value = match kpi {
            KpiName::TotalRevenue => sum_amounts(&self.store.sales(q).await?),
            KpiName::AverageDealSize => {
                let sales = self.store.sales(q).await?;
                average(sum_amounts(&sales), sales.len())
            }
            KpiName::DealsClosed => Decimal::from(self.store.sales(q).await?.len()),
            KpiName::NewLeads => Decimal::from(self.store.leads(q).await?.len()),
            KpiName::ConversionRate => {
                let leads = self.store.leads(q).await?;
                ratio(leads.iter().filter(|l| l.converted).count(), leads.len())
            }
            KpiName::TasksCompleted => Decimal::from(self.store.completed_tasks(q).await?.len()),
            KpiName::ActivitiesLogged => Decimal::from(self.store.activities(q).await?.len()),
        };
        Ok(value)
    }

    /// Computes a chart series by name.
    pub async fn compute_chart(&self, name: &str, filter: &FilterSpec, scope: PrincipalScope) -> AnalyticsResult<ChartSeries> {
        let chart = ChartName::parse(name).ok_or_else(|| AnalyticsError::UnknownMetric(name.to_string()))?;
        self.validate_dimensions(filter).await?;
        metrics::incr("analytics_chart_requests", &[("chart", chart.as_str())]);
        self.chart(chart, filter, scope).await
    }

    async fn chart(&self, chart: ChartName, filter: &FilterSpec, scope: PrincipalScope) -> AnalyticsResult<ChartSeries> {
        let q = RowQuery::new(filter, scope);
        let points = match chart {
            ChartName::SalesOverTime => {
                let sales = self.store.sales(&q).await?;
                let mut buckets: BTreeMap<NaiveDate, Decimal> = filter.months().into_iter().map(|m| (m, Decimal::ZERO)).collect();
                for sale in &sales {
                    *buckets.entry(first_of_month(sale.closed_on)).or_insert(Decimal::ZERO) += sale.amount;
                }
                buckets
                    .into_iter()
                    .map(|(month, value)| ChartPoint {
                        id: month_key(month),
                        label: month.format("%b %Y").to_string(),
                        value,
                    })
                    .collect()
            }
            ChartName::SalesByProduct => sum_by(&self.store.sales(&q).await?, |s| s.product_category.clone()),
            ChartName::SalesByRegion => sum_by(&self.store.sales(&q).await?, |s| s.region.clone()),
            ChartName::SalesByRep => sum_by(&self.store.sales(&q).await?, |s| s.sales_rep_id.to_string()),
            ChartName::LeadsBySource => {
                let leads = self.store.leads(&q).await?;
                let mut counts: HashMap<String, usize> = HashMap::new();
                for lead in &leads {
                    *counts.entry(lead.lead_source.clone()).or_default() += 1;
                }
                ranked(counts.into_iter().map(|(k, n)| (k, Decimal::from(n))))
            }
            ChartName::ConversionRates => {
                let leads = self.store.leads(&q).await?;
                let mut tallies: HashMap<String, (usize, usize)> = HashMap::new();
                for lead in &leads {
                    let t = tallies.entry(lead.lead_source.clone()).or_default();
                    t.1 += 1;
                    if lead.converted {
                        t.0 += 1;
                    }
                }
                ranked(tallies.into_iter().map(|(k, (converted, total))| (k, ratio(converted, total))))
            }
        };

        Ok(ChartSeries {
            chart,
            title: chart.title(),
            kind: chart.kind(),
            unit: self.unit_for(chart.unit_kind()),
            points,
            filter: filter.clone(),
        })
    }

    /// Detail rows behind one bucket of a chart. The bucket must exist in the
    /// chart computed for the same filter and scope.
    pub async fn compute_drilldown(
        &self,
        chart_name: &str,
        data_point_id: &str,
        filter: &FilterSpec,
        scope: PrincipalScope,
    ) -> AnalyticsResult<Drilldown> {
        let chart = ChartName::parse(chart_name).ok_or_else(|| AnalyticsError::UnknownMetric(chart_name.to_string()))?;
        self.validate_dimensions(filter).await?;

        let series = self.chart(chart, filter, scope).await?;
        let not_found = || AnalyticsError::DrilldownNotFound {
            chart: chart.as_str().to_string(),
            data_point_id: data_point_id.to_string(),
        };
        let label = series.point(data_point_id).ok_or_else(not_found)?.label.clone();

        let rows = match chart {
            ChartName::SalesOverTime => {
                let month = parse_month_key(data_point_id).ok_or_else(not_found)?;
                let narrowed = filter.narrowed_to(month, last_of_month(month)).ok_or_else(not_found)?;
                self.sale_rows(&narrowed, scope).await?
            }
            ChartName::SalesByProduct => self.sale_rows(&filter.clone().with_product_category(data_point_id), scope).await?,
            ChartName::SalesByRegion => self.sale_rows(&filter.clone().with_region(data_point_id), scope).await?,
            ChartName::SalesByRep => {
                let rep = Uuid::parse_str(data_point_id).map_err(|_| not_found())?;
                self.sale_rows(&filter.clone().with_sales_rep(rep), scope).await?
            }
            ChartName::LeadsBySource | ChartName::ConversionRates => {
                let narrowed = filter.clone().with_lead_source(data_point_id);
                let leads = self.store.leads(&RowQuery::new(&narrowed, scope)).await?;
                leads.into_iter().map(DetailRow::Lead).collect()
            }
        };
        metrics::incr("analytics_drilldown_requests", &[("chart", chart.as_str())]);

        Ok(Drilldown {
            chart,
            data_point_id: data_point_id.to_string(),
            label,
            rows,
        })
    }

    async fn sale_rows(&self, filter: &FilterSpec, scope: PrincipalScope) -> AnalyticsResult<Vec<DetailRow>> {
        let mut sales = self.store.sales(&RowQuery::new(filter, scope)).await?;
        sales.sort_by(|a, b| a.closed_on.cmp(&b.closed_on).then(a.id.cmp(&b.id)));
        Ok(sales.into_iter().map(DetailRow::Sale).collect())
    }

    /// Monthly series for a forecastable metric, one point per month touched
    /// by the filter (dated on the 1st), empty months included as zero.
    pub async fn metric_history(&self, metric: KpiName, filter: &FilterSpec, scope: PrincipalScope) -> AnalyticsResult<Vec<HistoryPoint>> {
        if !metric.is_forecastable() {
            return Err(AnalyticsError::UnknownMetric(metric.as_str().to_string()));
        }
        self.validate_dimensions(filter).await?;

        let q = RowQuery::new(filter, scope);
        let mut buckets: BTreeMap<NaiveDate, Decimal> = filter.months().into_iter().map(|m| (m, Decimal::ZERO)).collect();
        match metric {
            KpiName::TotalRevenue => {
                for sale in self.store.sales(&q).await? {
                    *buckets.entry(first_of_month(sale.closed_on)).or_insert(Decimal::ZERO) += sale.amount;
                }
            }
            KpiName::DealsClosed => {
                for sale in self.store.sales(&q).await? {
                    *buckets.entry(first_of_month(sale.closed_on)).or_insert(Decimal::ZERO) += Decimal::ONE;
                }
            }
            _ => {
                for lead in self.store.leads(&q).await? {
                    *buckets.entry(first_of_month(lead.created_on)).or_insert(Decimal::ZERO) += Decimal::ONE;
                }
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(date, value)| HistoryPoint {
                date,
                value: value.to_f64().unwrap_or(0.0),
            })
            .collect())
    }

    /// Active dimension values plus the preset and registry catalogues.
    pub async fn filter_options(&self) -> AnalyticsResult<FilterOptions> {
        Ok(FilterOptions {
            product_categories: self.active_values(Dimension::ProductCategory).await?,
            regions: self.active_values(Dimension::Region).await?,
            lead_sources: self.active_values(Dimension::LeadSource).await?,
            date_ranges: DatePreset::CATALOGUE
                .iter()
                .map(|p| PresetOption { value: p.as_str(), label: p.label() })
                .collect(),
            kpis: KpiName::ALL.iter().map(KpiName::as_str).collect(),
            charts: ChartName::ALL.iter().map(ChartName::as_str).collect(),
        })
    }

    async fn active_values(&self, dimension: Dimension) -> AnalyticsResult<Vec<String>> {
        let rows = self.store.dimension_values(dimension, true).await?;
        Ok(rows.into_iter().map(|v| v.value).collect())
    }

    /// Categorical filter values must be active dimension values.
    pub async fn validate_dimensions(&self, filter: &FilterSpec) -> AnalyticsResult<()> {
        let checks = [
            (Dimension::ProductCategory, filter.product_category()),
            (Dimension::Region, filter.region()),
            (Dimension::LeadSource, filter.lead_source()),
        ];
        for (dimension, value) in checks {
            let Some(value) = value else { continue };
            let active = self.store.dimension_values(dimension, true).await?;
            if !active.iter().any(|v| v.value == value) {
                return Err(AnalyticsError::invalid_filter(format!(
                    "{} '{}' is not an active value",
                    dimension.as_str(),
                    value
                )));
            }
        }
        Ok(())
    }

    fn unit_for(&self, kind: UnitKind) -> String {
        match kind {
            UnitKind::Currency => self.currency.clone(),
            UnitKind::Count => "count".to_string(),
            UnitKind::Ratio => "ratio".to_string(),
        }
    }
}

fn sum_amounts(sales: &[Sale]) -> Decimal {
    sales.iter().map(|s| s.amount).sum()
}

fn average(total: Decimal, n: usize) -> Decimal {
    if n == 0 {
        return Decimal::ZERO;
    }
    (total / Decimal::from(n)).round_dp(MONEY_SCALE)
}

/// `part / whole`, zero when `whole` is zero.
pub fn ratio(part: usize, whole: usize) -> Decimal {
    if whole == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(part) / Decimal::from(whole)).round_dp(RATIO_SCALE)
}

fn sum_by(sales: &[Sale], key: impl Fn(&Sale) -> String) -> Vec<ChartPoint> {
    let mut sums: HashMap<String, Decimal> = HashMap::new();
    for sale in sales {
        *sums.entry(key(sale)).or_insert(Decimal::ZERO) += sale.amount;
    }
    ranked(sums.into_iter())
}

/// Category buckets, largest first; ties broken by label.
fn ranked(buckets: impl Iterator<Item = (String, Decimal)>) -> Vec<ChartPoint> {
    let mut points: Vec<ChartPoint> = buckets
        .map(|(key, value)| ChartPoint {
            id: key.clone(),
            label: key,
            value,
        })
        .collect();
    points.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::crm::{Lead, LeadStatus};
    use crate::repository::crm_store::InMemoryCrmStore;
    use crate::service::clock::FixedClock;
    use crate::service::result_cache::CacheConfig;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn jan_to_mar() -> FilterSpec {
        FilterSpec::new(d(2024, 1, 1), d(2024, 3, 31), DatePreset::Custom).unwrap()
    }

    fn sale(amount: Decimal, closed_on: NaiveDate, category: &str, rep: Uuid) -> Sale {
        Sale {
            id: Uuid::new_v4(),
            amount,
            closed_on,
            product_category: category.into(),
            region: "EMEA".into(),
            sales_rep_id: rep,
            lead_id: None,
        }
    }

    fn lead(owner: Uuid, source: &str, converted: bool, created_on: NaiveDate) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            name: "Prospect".into(),
            company: None,
            owner_id: owner,
            lead_source: source.into(),
            region: "EMEA".into(),
            status: if converted { LeadStatus::Won } else { LeadStatus::Qualified },
            converted,
            converted_on: converted.then_some(created_on),
            budget: None,
            created_on,
        }
    }

    async fn seeded() -> (Arc<InMemoryCrmStore>, Uuid, Uuid) {
        let store = Arc::new(InMemoryCrmStore::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.insert_sale(sale(dec!(0.10), d(2024, 1, 10), "Software", alice)).await.unwrap();
        store.insert_sale(sale(dec!(0.20), d(2024, 1, 20), "Software", alice)).await.unwrap();
        store.insert_sale(sale(dec!(500), d(2024, 3, 5), "Hardware", bob)).await.unwrap();
        store.insert_lead(lead(alice, "web", true, d(2024, 1, 3))).await.unwrap();
        store.insert_lead(lead(alice, "web", false, d(2024, 2, 3))).await.unwrap();
        store.insert_lead(lead(bob, "referral", false, d(2024, 2, 8))).await.unwrap();
        (store, alice, bob)
    }

    #[tokio::test]
    async fn revenue_is_exact_decimal() {
        let (store, alice, _) = seeded().await;
        let engine = AggregationEngine::new(store, "USD");
        let kpi = engine.compute_kpi("total_revenue", &jan_to_mar(), PrincipalScope::OwnedBy(alice)).await.unwrap();
        assert_eq!(kpi.value, dec!(0.30));
        assert_eq!(kpi.unit, "USD");

        let avg = engine.compute_kpi("average_deal_size", &jan_to_mar(), PrincipalScope::All).await.unwrap();
        assert_eq!(avg.value, dec!(166.77));
    }

    #[tokio::test]
    async fn conversion_rate_is_zero_without_leads() {
        let engine = AggregationEngine::new(Arc::new(InMemoryCrmStore::new()), "USD");
        let kpi = engine.compute_kpi("conversion_rate", &jan_to_mar(), PrincipalScope::All).await.unwrap();
        assert_eq!(kpi.value, Decimal::ZERO);
        assert_eq!(kpi.unit, "ratio");
    }

    #[tokio::test]
    async fn conversion_rate_counts_converted_leads() {
        let (store, _, _) = seeded().await;
        let engine = AggregationEngine::new(store, "USD");
        let kpi = engine.compute_kpi("conversion_rate", &jan_to_mar(), PrincipalScope::All).await.unwrap();
        assert_eq!(kpi.value, dec!(0.3333));
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let engine = AggregationEngine::new(Arc::new(InMemoryCrmStore::new()), "USD");
        let filter = jan_to_mar();
        assert!(matches!(
            engine.compute_kpi("pipeline_velocity", &filter, PrincipalScope::All).await,
            Err(AnalyticsError::UnknownMetric(_))
        ));
        assert!(matches!(
            engine.compute_chart("funnel", &filter, PrincipalScope::All).await,
            Err(AnalyticsError::UnknownMetric(_))
        ));
    }

    #[tokio::test]
    async fn sales_over_time_fills_empty_months() {
        let (store, _, _) = seeded().await;
        let engine = AggregationEngine::new(store, "USD");
        let series = engine.compute_chart("sales_over_time", &jan_to_mar(), PrincipalScope::All).await.unwrap();
        let ids: Vec<&str> = series.points.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(series.points[1].value, Decimal::ZERO);
        assert_eq!(series.points[0].label, "Jan 2024");
    }

    #[tokio::test]
    async fn drilldown_requires_present_bucket() {
        let (store, _, _) = seeded().await;
        let engine = AggregationEngine::new(store, "USD");
        let filter = jan_to_mar();

        let detail = engine.compute_drilldown("sales_over_time", "2024-01", &filter, PrincipalScope::All).await.unwrap();
        assert_eq!(detail.rows.len(), 2);

        let by_product = engine.compute_drilldown("sales_by_product", "Hardware", &filter, PrincipalScope::All).await.unwrap();
        assert_eq!(by_product.rows.len(), 1);

        let missing = engine.compute_drilldown("sales_over_time", "2023-12", &filter, PrincipalScope::All).await;
        assert!(matches!(missing, Err(AnalyticsError::DrilldownNotFound { .. })));
        let missing = engine.compute_drilldown("sales_by_product", "Services", &filter, PrincipalScope::All).await;
        assert!(matches!(missing, Err(AnalyticsError::DrilldownNotFound { .. })));
    }

    #[tokio::test]
    async fn inactive_dimension_value_is_invalid_filter() {
        let (store, _, _) = seeded().await;
        store.set_dimension_active(Dimension::ProductCategory, "Hardware", false).await.unwrap();
        let engine = AggregationEngine::new(store, "USD");
        for value in ["Hardware", "Spaceships"] {
            let filter = jan_to_mar().with_product_category(value);
            let res = engine.compute_kpi("total_revenue", &filter, PrincipalScope::All).await;
            assert!(matches!(res, Err(AnalyticsError::InvalidFilter(_))), "{value}");
        }
    }

    #[tokio::test]
    async fn history_is_monthly() {
        let (store, _, _) = seeded().await;
        let engine = AggregationEngine::new(store, "USD");
        let history = engine.metric_history(KpiName::NewLeads, &jan_to_mar(), PrincipalScope::All).await.unwrap();
        let values: Vec<f64> = history.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 0.0]);
        assert!(engine.metric_history(KpiName::ConversionRate, &jan_to_mar(), PrincipalScope::All).await.is_err());
    }

    #[tokio::test]
    async fn cache_is_keyed_by_scope() {
        let (store, alice, bob) = seeded().await;
        let cache = Arc::new(ResultCache::new(CacheConfig::default(), Arc::new(FixedClock::on(2024, 4, 1))));
        let engine = AggregationEngine::new(store, "USD").with_cache(cache.clone());
        let filter = jan_to_mar();

        let a = engine.compute_kpi("deals_closed", &filter, PrincipalScope::OwnedBy(alice)).await.unwrap();
        let b = engine.compute_kpi("deals_closed", &filter, PrincipalScope::OwnedBy(bob)).await.unwrap();
        assert_eq!(a.value, dec!(2));
        assert_eq!(b.value, dec!(1));
        assert_eq!(cache.len().await, 2);
    }
}
