// src/usecase/manage_report_configurations.rs
//! Alta, listado, edición y baja lógica de plantillas de reporte.
//!
//! Los parámetros se validan al guardar (filtro incluido), de modo que un
//! reporte encolado desde una plantilla no falle por un filtro mal escrito.
//! La baja desde la API es lógica (`active = false`); el borrado físico con
//! cascada solo existe en el repositorio.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::error::{AnalyticsError, AnalyticsResult};
use crate::domain::model::analytics::KpiName;
use crate::domain::model::filter::DatePreset;
use crate::domain::model::principal::{Principal, PrincipalScope};
use crate::domain::model::report::{ReportConfiguration, ReportFrequency, ReportType};
use crate::repository::report_store::ReportStore;
use crate::service::access_gate::{authorize, AI_INSIGHTS};
use crate::service::clock::Clock;
use crate::service::filter_normalizer::{normalize_with_default, params_from_json};
use crate::service::predictive_model::MAX_HORIZON;

pub const MAX_NAME_LEN: usize = 200;
pub const DEFAULT_FORECAST_HORIZON: usize = 3;

/// Report parameters beyond the filter keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportParameters {
    pub filter_params: HashMap<String, String>,
    pub include_forecast: bool,
    pub forecast_metric: KpiName,
    pub forecast_horizon: usize,
    pub include_anomalies: bool,
}

impl ReportParameters {
    /// Parses and validates a parameter object for a report type.
    pub fn parse(report_type: ReportType, parameters: &Value) -> AnalyticsResult<Self> {
        let filter_params = params_from_json(parameters)?;
        let obj = parameters.as_object();
        let flag = |key: &str| -> AnalyticsResult<Option<bool>> {
            match obj.and_then(|o| o.get(key)) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Bool(b)) => Ok(Some(*b)),
                Some(_) => Err(AnalyticsError::invalid_request(format!("parameter '{key}' must be a boolean"))),
            }
        };

        let include_forecast = report_type.always_forecasts() || flag("include_forecast")?.unwrap_or(false);
        let include_anomalies = flag("include_anomalies")?.unwrap_or(report_type == ReportType::AiForecast);

        let forecast_metric = match obj.and_then(|o| o.get("forecast_metric")) {
            None | Some(Value::Null) => KpiName::TotalRevenue,
            Some(Value::String(name)) => KpiName::parse(name)
                .filter(KpiName::is_forecastable)
                .ok_or_else(|| AnalyticsError::invalid_request(format!("forecast_metric '{name}' cannot be forecast")))?,
            Some(_) => return Err(AnalyticsError::invalid_request("forecast_metric must be a string")),
        };

        let forecast_horizon = match obj.and_then(|o| o.get("forecast_horizon")) {
            None | Some(Value::Null) => DEFAULT_FORECAST_HORIZON,
            Some(v) => v
                .as_u64()
                .map(|h| h as usize)
                .filter(|h| (1..=MAX_HORIZON).contains(h))
                .ok_or_else(|| AnalyticsError::invalid_request(format!("forecast_horizon must be an integer between 1 and {MAX_HORIZON}")))?,
        };

        Ok(Self {
            filter_params,
            include_forecast,
            forecast_metric,
            forecast_horizon,
            include_anomalies,
        })
    }

    /// Preset used when the parameters carry no dates.
    pub fn default_preset(report_type: ReportType) -> DatePreset {
        match report_type {
            ReportType::AiForecast => DatePreset::Last12Months,
            _ => DatePreset::Last30Days,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReportConfiguration {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub report_type: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub frequency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfigurationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub report_type: Option<String>,
    pub parameters: Option<Value>,
    pub frequency: Option<String>,
    pub active: Option<bool>,
}

pub struct ReportConfigurationService {
    store: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
}

impl ReportConfigurationService {
    pub fn new(store: Arc<dyn ReportStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create(&self, principal: Option<&Principal>, input: NewReportConfiguration) -> AnalyticsResult<ReportConfiguration> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        let config = self.build(principal.id, input)?;
        self.store.insert_configuration(config.clone()).await?;
        info!(config_id = %config.id, owner = %principal.id, report_type = %config.report_type, "report configuration created");
        Ok(config)
    }

    /// Validated configuration owned by `owner`, not yet persisted.
    pub fn build(&self, owner: Uuid, input: NewReportConfiguration) -> AnalyticsResult<ReportConfiguration> {
        let name = validate_name(&input.name)?;
        let report_type = parse_report_type(&input.report_type)?;
        let frequency = parse_frequency(input.frequency.as_deref())?;
        let parameters = normalize_parameters(input.parameters);
        self.check_parameters(report_type, &parameters)?;

        let now = self.clock.now();
        Ok(ReportConfiguration {
            id: Uuid::new_v4(),
            name,
            description: input.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            report_type,
            parameters,
            owner_id: owner,
            frequency,
            active: true,
            last_generated_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Own configurations, or every owner's for roles that see all rows.
    pub async fn list(&self, principal: Option<&Principal>, include_inactive: bool) -> AnalyticsResult<Vec<ReportConfiguration>> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        let owner = match principal.scope() {
            PrincipalScope::All => None,
            PrincipalScope::OwnedBy(id) => Some(id),
        };
        Ok(self.store.list_configurations(owner, include_inactive).await?)
    }

    /// Visible configuration; inactive ones only when `include_inactive`.
    pub async fn get_visible(&self, principal: &Principal, id: Uuid, include_inactive: bool) -> AnalyticsResult<ReportConfiguration> {
        match self.store.get_configuration(id).await? {
            Some(c) if principal.scope().permits(c.owner_id) && (include_inactive || c.active) => Ok(c),
            _ => Err(AnalyticsError::not_found(format!("report configuration {id}"))),
        }
    }

    pub async fn update(&self, principal: Option<&Principal>, id: Uuid, patch: ReportConfigurationPatch) -> AnalyticsResult<ReportConfiguration> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        let mut config = self.get_visible(principal, id, true).await?;

        if let Some(name) = patch.name {
            config.name = validate_name(&name)?;
        }
        if let Some(description) = patch.description {
            config.description = Some(description.trim().to_string()).filter(|d| !d.is_empty());
        }
        if let Some(report_type) = patch.report_type {
            config.report_type = parse_report_type(&report_type)?;
        }
        if let Some(parameters) = patch.parameters {
            config.parameters = normalize_parameters(parameters);
        }
        if patch.frequency.is_some() {
            config.frequency = parse_frequency(patch.frequency.as_deref())?;
        }
        if let Some(active) = patch.active {
            config.active = active;
        }
        self.check_parameters(config.report_type, &config.parameters)?;
        config.updated_at = self.clock.now();

        if !self.store.update_configuration(config.clone()).await? {
            return Err(AnalyticsError::not_found(format!("report configuration {id}")));
        }
        info!(config_id = %id, "report configuration updated");
        Ok(config)
    }

    /// Soft delete.
    pub async fn deactivate(&self, principal: Option<&Principal>, id: Uuid) -> AnalyticsResult<()> {
        let principal = authorize(principal, &AI_INSIGHTS)?;
        let mut config = self.get_visible(principal, id, false).await?;
        config.active = false;
        config.updated_at = self.clock.now();
        self.store.update_configuration(config).await?;
        info!(config_id = %id, "report configuration deactivated");
        Ok(())
    }

    fn check_parameters(&self, report_type: ReportType, parameters: &Value) -> AnalyticsResult<()> {
        let parsed = ReportParameters::parse(report_type, parameters)?;
        normalize_with_default(&parsed.filter_params, self.clock.now(), ReportParameters::default_preset(report_type))?;
        Ok(())
    }
}

fn normalize_parameters(parameters: Value) -> Value {
    match parameters {
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

fn validate_name(raw: &str) -> AnalyticsResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AnalyticsError::invalid_request("name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AnalyticsError::invalid_request(format!("name must be at most {MAX_NAME_LEN} characters")));
    }
    Ok(name.to_string())
}

fn parse_report_type(raw: &str) -> AnalyticsResult<ReportType> {
    ReportType::parse(raw).ok_or_else(|| AnalyticsError::invalid_request(format!("unknown report_type '{raw}'")))
}

fn parse_frequency(raw: Option<&str>) -> AnalyticsResult<ReportFrequency> {
    match raw {
        None => Ok(ReportFrequency::default()),
        Some(f) => ReportFrequency::parse(f).ok_or_else(|| AnalyticsError::invalid_request(format!("unknown frequency '{f}'"))),
    }
}
