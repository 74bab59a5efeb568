// src/repository/crm_store.rs
//! CRM datastore abstractions and implementations.
//!
//! This module provides:
//! - `CrmStore` trait: filtered reads of sales, leads, tasks and activities,
//!   dimension lookups, and the writes used to seed and maintain the data.
//! - `InMemoryCrmStore` for fast tests and local dev.
//! - `PostgresCrmStore` (feature `postgres`) using `sqlx::PgPool`.
//!
//! Filtering rules shared by both implementations:
//! - sales are dated by `closed_on`, leads by `created_on`, tasks by
//!   completion date (due date when not completed), activities by `occurred_on`;
//! - `owner` (principal scope) maps to the sale's rep, the lead's owner, the
//!   task's assignee and the activity's user;
//! - `lead_source` and `region` reach tasks/activities through their lead;
//!   `lead_source` reaches sales through the sale's lead.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::model::crm::{Activity, Dimension, DimensionValue, Lead, Sale, Task, TaskStatus};
use crate::domain::model::filter::FilterSpec;
use crate::domain::model::principal::PrincipalScope;
use crate::telemetry::metrics;

/// Row-level query derived from a filter and the caller's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub product_category: Option<String>,
    pub region: Option<String>,
    pub sales_rep_id: Option<Uuid>,
    pub lead_source: Option<String>,
    pub owner: Option<Uuid>,
}

impl RowQuery {
    pub fn new(filter: &FilterSpec, scope: PrincipalScope) -> Self {
        Self {
            start: filter.start_date(),
            end: filter.end_date(),
            product_category: filter.product_category().map(str::to_string),
            region: filter.region().map(str::to_string),
            sales_rep_id: filter.sales_rep_id(),
            lead_source: filter.lead_source().map(str::to_string),
            owner: scope.owner(),
        }
    }

    fn in_range(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    fn person_matches(&self, person: Uuid) -> bool {
        self.owner.map_or(true, |o| o == person) && self.sales_rep_id.map_or(true, |r| r == person)
    }
}

#[async_trait]
pub trait CrmStore: Send + Sync + 'static {
    async fn sales(&self, q: &RowQuery) -> anyhow::Result<Vec<Sale>>;

    async fn leads(&self, q: &RowQuery) -> anyhow::Result<Vec<Lead>>;

    /// Completed tasks only.
    async fn completed_tasks(&self, q: &RowQuery) -> anyhow::Result<Vec<Task>>;

    async fn activities(&self, q: &RowQuery) -> anyhow::Result<Vec<Activity>>;

    async fn dimension_values(&self, dimension: Dimension, active_only: bool) -> anyhow::Result<Vec<DimensionValue>>;

    /// Returns false when the value is unknown.
    async fn set_dimension_active(&self, dimension: Dimension, value: &str, active: bool) -> anyhow::Result<bool>;

    /// Inserts register unseen dimension values as active.
    async fn insert_sale(&self, sale: Sale) -> anyhow::Result<()>;

    async fn insert_lead(&self, lead: Lead) -> anyhow::Result<()>;

    async fn insert_task(&self, task: Task) -> anyhow::Result<()>;

    async fn insert_activity(&self, activity: Activity) -> anyhow::Result<()>;

    /// Deletes a lead together with its tasks and activities; sales keep the
    /// deal but lose the lead reference.
    async fn delete_lead(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// --------------------
/// In-memory implementation (good for fast tests / dev)
/// --------------------
#[derive(Default)]
struct Tables {
    sales: Vec<Sale>,
    leads: HashMap<Uuid, Lead>,
    tasks: Vec<Task>,
    activities: Vec<Activity>,
    dimensions: BTreeMap<(Dimension, String), bool>,
}

impl Tables {
    fn register(&mut self, dimension: Dimension, value: &str) {
        self.dimensions.entry((dimension, value.to_string())).or_insert(true);
    }

    /// Region/lead-source constraints applied through an optional lead.
    fn lead_matches(&self, lead_id: Option<Uuid>, q: &RowQuery) -> bool {
        if q.region.is_none() && q.lead_source.is_none() {
            return true;
        }
        let Some(lead) = lead_id.and_then(|id| self.leads.get(&id)) else {
            return false;
        };
        q.region.as_deref().map_or(true, |r| lead.region == r) && q.lead_source.as_deref().map_or(true, |s| lead.lead_source == s)
    }
}

pub struct InMemoryCrmStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryCrmStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryCrmStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrmStore for InMemoryCrmStore {
    async fn sales(&self, q: &RowQuery) -> anyhow::Result<Vec<Sale>> {
        let t = self.tables.read().await;
        let out: Vec<Sale> = t
            .sales
            .iter()
            .filter(|s| q.in_range(s.closed_on))
            .filter(|s| q.person_matches(s.sales_rep_id))
            .filter(|s| q.product_category.as_deref().map_or(true, |c| s.product_category == c))
            .filter(|s| q.region.as_deref().map_or(true, |r| s.region == r))
            .filter(|s| {
                q.lead_source.as_deref().map_or(true, |src| {
                    s.lead_id.and_then(|id| t.leads.get(&id)).map_or(false, |l| l.lead_source == src)
                })
            })
            .cloned()
            .collect();
        metrics::incr("crm_store_queries", &[("table", "sales")]);
        Ok(out)
    }

    async fn leads(&self, q: &RowQuery) -> anyhow::Result<Vec<Lead>> {
        let t = self.tables.read().await;
        let mut out: Vec<Lead> = t
            .leads
            .values()
            .filter(|l| q.in_range(l.created_on))
            .filter(|l| q.person_matches(l.owner_id))
            .filter(|l| q.region.as_deref().map_or(true, |r| l.region == r))
            .filter(|l| q.lead_source.as_deref().map_or(true, |s| l.lead_source == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_on.cmp(&b.created_on).then(a.id.cmp(&b.id)));
        metrics::incr("crm_store_queries", &[("table", "leads")]);
        Ok(out)
    }

    async fn completed_tasks(&self, q: &RowQuery) -> anyhow::Result<Vec<Task>> {
        let t = self.tables.read().await;
        let out = t
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .filter(|task| q.in_range(task.reporting_date()))
            .filter(|task| q.person_matches(task.assigned_to))
            .filter(|task| t.lead_matches(task.lead_id, q))
            .cloned()
            .collect();
        metrics::incr("crm_store_queries", &[("table", "tasks")]);
        Ok(out)
    }

    async fn activities(&self, q: &RowQuery) -> anyhow::Result<Vec<Activity>> {
        let t = self.tables.read().await;
        let out = t
            .activities
            .iter()
            .filter(|a| q.in_range(a.occurred_on))
            .filter(|a| q.person_matches(a.user_id))
            .filter(|a| t.lead_matches(a.lead_id, q))
            .cloned()
            .collect();
        metrics::incr("crm_store_queries", &[("table", "activities")]);
        Ok(out)
    }

    async fn dimension_values(&self, dimension: Dimension, active_only: bool) -> anyhow::Result<Vec<DimensionValue>> {
        let t = self.tables.read().await;
        Ok(t.dimensions
            .iter()
            .filter(|((d, _), active)| *d == dimension && (!active_only || **active))
            .map(|((d, v), active)| DimensionValue { dimension: *d, value: v.clone(), active: *active })
            .collect())
    }

    async fn set_dimension_active(&self, dimension: Dimension, value: &str, active: bool) -> anyhow::Result<bool> {
        let mut t = self.tables.write().await;
        match t.dimensions.get_mut(&(dimension, value.to_string())) {
            Some(flag) => {
                *flag = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_sale(&self, sale: Sale) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        if let Some(lead_id) = sale.lead_id {
            if !t.leads.contains_key(&lead_id) {
                anyhow::bail!("sale {} references unknown lead {}", sale.id, lead_id);
            }
        }
        t.register(Dimension::ProductCategory, &sale.product_category);
        t.register(Dimension::Region, &sale.region);
        t.sales.push(sale);
        metrics::incr("crm_store_inserts", &[("table", "sales")]);
        Ok(())
    }

    async fn insert_lead(&self, lead: Lead) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        if t.leads.contains_key(&lead.id) {
            anyhow::bail!("lead {} already exists", lead.id);
        }
        t.register(Dimension::Region, &lead.region);
        t.register(Dimension::LeadSource, &lead.lead_source);
        t.leads.insert(lead.id, lead);
        metrics::incr("crm_store_inserts", &[("table", "leads")]);
        Ok(())
    }

    async fn insert_task(&self, task: Task) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        if let Some(lead_id) = task.lead_id {
            if !t.leads.contains_key(&lead_id) {
                anyhow::bail!("task {} references unknown lead {}", task.id, lead_id);
            }
        }
        t.tasks.push(task);
        metrics::incr("crm_store_inserts", &[("table", "tasks")]);
        Ok(())
    }

    async fn insert_activity(&self, activity: Activity) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        if let Some(lead_id) = activity.lead_id {
            if !t.leads.contains_key(&lead_id) {
                anyhow::bail!("activity {} references unknown lead {}", activity.id, lead_id);
            }
        }
        t.activities.push(activity);
        metrics::incr("crm_store_inserts", &[("table", "activities")]);
        Ok(())
    }

    async fn delete_lead(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut t = self.tables.write().await;
        if t.leads.remove(&id).is_none() {
            return Ok(false);
        }
        t.tasks.retain(|task| task.lead_id != Some(id));
        t.activities.retain(|a| a.lead_id != Some(id));
        for sale in t.sales.iter_mut().filter(|s| s.lead_id == Some(id)) {
            sale.lead_id = None;
        }
        metrics::incr("crm_store_deletes", &[("table", "leads")]);
        Ok(true)
    }
}

/// --------------------
/// Postgres implementation using sqlx
/// --------------------
///
/// Schema: `migrations/0001_init.sql`. Dimension values live in
/// `dimension_values (dimension, value, active)`.
#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use crate::domain::model::crm::{ActivityKind, LeadStatus};
    use anyhow::Context;
    use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};

    pub struct PostgresCrmStore {
        pool: PgPool,
    }

    impl PostgresCrmStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        fn push_lead_join_filters(qb: &mut QueryBuilder<'_, Postgres>, q: &RowQuery, alias: &str) {
            if let Some(region) = &q.region {
                qb.push(format!(" AND {alias}.region = ")).push_bind(region.clone());
            }
            if let Some(source) = &q.lead_source {
                qb.push(format!(" AND {alias}.lead_source = ")).push_bind(source.clone());
            }
        }

        fn push_person(qb: &mut QueryBuilder<'_, Postgres>, q: &RowQuery, column: &str) {
            if let Some(owner) = q.owner {
                qb.push(format!(" AND {column} = ")).push_bind(owner);
            }
            if let Some(rep) = q.sales_rep_id {
                qb.push(format!(" AND {column} = ")).push_bind(rep);
            }
        }

        fn row_to_sale(row: &PgRow) -> anyhow::Result<Sale> {
            Ok(Sale {
                id: row.try_get("id")?,
                amount: row.try_get("amount")?,
                closed_on: row.try_get("closed_on")?,
                product_category: row.try_get("product_category")?,
                region: row.try_get("region")?,
                sales_rep_id: row.try_get("sales_rep_id")?,
                lead_id: row.try_get("lead_id")?,
            })
        }

        fn row_to_lead(row: &PgRow) -> anyhow::Result<Lead> {
            let status: String = row.try_get("status")?;
            Ok(Lead {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                company: row.try_get("company")?,
                owner_id: row.try_get("owner_id")?,
                lead_source: row.try_get("lead_source")?,
                region: row.try_get("region")?,
                status: LeadStatus::parse(&status).with_context(|| format!("unknown lead status '{status}'"))?,
                converted: row.try_get("converted")?,
                converted_on: row.try_get("converted_on")?,
                budget: row.try_get("budget")?,
                created_on: row.try_get("created_on")?,
            })
        }

        fn row_to_task(row: &PgRow) -> anyhow::Result<Task> {
            let status: String = row.try_get("status")?;
            Ok(Task {
                id: row.try_get("id")?,
                lead_id: row.try_get("lead_id")?,
                assigned_to: row.try_get("assigned_to")?,
                title: row.try_get("title")?,
                due_on: row.try_get("due_on")?,
                status: TaskStatus::parse(&status).with_context(|| format!("unknown task status '{status}'"))?,
                completed_on: row.try_get("completed_on")?,
            })
        }

        fn row_to_activity(row: &PgRow) -> anyhow::Result<Activity> {
            let kind: String = row.try_get("kind")?;
            Ok(Activity {
                id: row.try_get("id")?,
                lead_id: row.try_get("lead_id")?,
                user_id: row.try_get("user_id")?,
                kind: ActivityKind::parse(&kind).with_context(|| format!("unknown activity kind '{kind}'"))?,
                description: row.try_get("description")?,
                occurred_on: row.try_get("occurred_on")?,
            })
        }

        async fn register(tx: &mut sqlx::Transaction<'_, Postgres>, dimension: Dimension, value: &str) -> anyhow::Result<()> {
            sqlx::query("INSERT INTO dimension_values (dimension, value, active) VALUES ($1, $2, TRUE) ON CONFLICT DO NOTHING")
                .bind(dimension.as_str())
                .bind(value)
                .execute(&mut **tx)
                .await
                .context("register dimension value failed")?;
            Ok(())
        }
    }

    #[async_trait]
    impl CrmStore for PostgresCrmStore {
        async fn sales(&self, q: &RowQuery) -> anyhow::Result<Vec<Sale>> {
            let mut qb = QueryBuilder::<Postgres>::new(
                "SELECT s.id, s.amount, s.closed_on, s.product_category, s.region, s.sales_rep_id, s.lead_id \
                 FROM sales s LEFT JOIN leads l ON l.id = s.lead_id WHERE s.closed_on BETWEEN ",
            );
            qb.push_bind(q.start).push(" AND ").push_bind(q.end);
            Self::push_person(&mut qb, q, "s.sales_rep_id");
            if let Some(category) = &q.product_category {
                qb.push(" AND s.product_category = ").push_bind(category.clone());
            }
            if let Some(region) = &q.region {
                qb.push(" AND s.region = ").push_bind(region.clone());
            }
            if let Some(source) = &q.lead_source {
                qb.push(" AND l.lead_source = ").push_bind(source.clone());
            }
            qb.push(" ORDER BY s.closed_on, s.id");
            let rows = qb.build().fetch_all(&self.pool).await.context("sales query failed")?;
            metrics::incr("crm_store_queries", &[("table", "sales")]);
            rows.iter().map(Self::row_to_sale).collect()
        }

        async fn leads(&self, q: &RowQuery) -> anyhow::Result<Vec<Lead>> {
            let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM leads l WHERE l.created_on BETWEEN ");
            qb.push_bind(q.start).push(" AND ").push_bind(q.end);
            Self::push_person(&mut qb, q, "l.owner_id");
            Self::push_lead_join_filters(&mut qb, q, "l");
            qb.push(" ORDER BY l.created_on, l.id");
            let rows = qb.build().fetch_all(&self.pool).await.context("leads query failed")?;
            metrics::incr("crm_store_queries", &[("table", "leads")]);
            rows.iter().map(Self::row_to_lead).collect()
        }

        async fn completed_tasks(&self, q: &RowQuery) -> anyhow::Result<Vec<Task>> {
            let join = if q.region.is_some() || q.lead_source.is_some() { "JOIN" } else { "LEFT JOIN" };
            let mut qb = QueryBuilder::<Postgres>::new(format!(
                "SELECT t.* FROM tasks t {join} leads l ON l.id = t.lead_id \
                 WHERE t.status = 'completed' AND COALESCE(t.completed_on, t.due_on) BETWEEN "
            ));
            qb.push_bind(q.start).push(" AND ").push_bind(q.end);
            Self::push_person(&mut qb, q, "t.assigned_to");
            Self::push_lead_join_filters(&mut qb, q, "l");
            let rows = qb.build().fetch_all(&self.pool).await.context("tasks query failed")?;
            metrics::incr("crm_store_queries", &[("table", "tasks")]);
            rows.iter().map(Self::row_to_task).collect()
        }

        async fn activities(&self, q: &RowQuery) -> anyhow::Result<Vec<Activity>> {
            let join = if q.region.is_some() || q.lead_source.is_some() { "JOIN" } else { "LEFT JOIN" };
            let mut qb = QueryBuilder::<Postgres>::new(format!(
                "SELECT a.* FROM activities a {join} leads l ON l.id = a.lead_id WHERE a.occurred_on BETWEEN "
            ));
            qb.push_bind(q.start).push(" AND ").push_bind(q.end);
            Self::push_person(&mut qb, q, "a.user_id");
            Self::push_lead_join_filters(&mut qb, q, "l");
            let rows = qb.build().fetch_all(&self.pool).await.context("activities query failed")?;
            metrics::incr("crm_store_queries", &[("table", "activities")]);
            rows.iter().map(Self::row_to_activity).collect()
        }

        async fn dimension_values(&self, dimension: Dimension, active_only: bool) -> anyhow::Result<Vec<DimensionValue>> {
            let rows = sqlx::query(
                "SELECT value, active FROM dimension_values WHERE dimension = $1 AND ($2 = FALSE OR active) ORDER BY value",
            )
            .bind(dimension.as_str())
            .bind(active_only)
            .fetch_all(&self.pool)
            .await
            .context("dimension_values query failed")?;
            rows.iter()
                .map(|r| {
                    Ok(DimensionValue {
                        dimension,
                        value: r.try_get("value")?,
                        active: r.try_get("active")?,
                    })
                })
                .collect()
        }

        async fn set_dimension_active(&self, dimension: Dimension, value: &str, active: bool) -> anyhow::Result<bool> {
            let res = sqlx::query("UPDATE dimension_values SET active = $3 WHERE dimension = $1 AND value = $2")
                .bind(dimension.as_str())
                .bind(value)
                .bind(active)
                .execute(&self.pool)
                .await
                .context("set_dimension_active failed")?;
            Ok(res.rows_affected() > 0)
        }

        async fn insert_sale(&self, sale: Sale) -> anyhow::Result<()> {
            let mut tx = self.pool.begin().await.context("begin tx failed")?;
            Self::register(&mut tx, Dimension::ProductCategory, &sale.product_category).await?;
            Self::register(&mut tx, Dimension::Region, &sale.region).await?;
            sqlx::query(
                "INSERT INTO sales (id, amount, closed_on, product_category, region, sales_rep_id, lead_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(sale.id)
            .bind(sale.amount)
            .bind(sale.closed_on)
            .bind(&sale.product_category)
            .bind(&sale.region)
            .bind(sale.sales_rep_id)
            .bind(sale.lead_id)
            .execute(&mut *tx)
            .await
            .context("insert sale failed")?;
            tx.commit().await.context("commit failed")?;
            metrics::incr("crm_store_inserts", &[("table", "sales")]);
            Ok(())
        }

        async fn insert_lead(&self, lead: Lead) -> anyhow::Result<()> {
            let mut tx = self.pool.begin().await.context("begin tx failed")?;
            Self::register(&mut tx, Dimension::Region, &lead.region).await?;
            Self::register(&mut tx, Dimension::LeadSource, &lead.lead_source).await?;
            sqlx::query(
                "INSERT INTO leads (id, name, company, owner_id, lead_source, region, status, converted, converted_on, budget, created_on) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(lead.id)
            .bind(&lead.name)
            .bind(&lead.company)
            .bind(lead.owner_id)
            .bind(&lead.lead_source)
            .bind(&lead.region)
            .bind(lead.status.as_str())
            .bind(lead.converted)
            .bind(lead.converted_on)
            .bind(lead.budget)
            .bind(lead.created_on)
            .execute(&mut *tx)
            .await
            .context("insert lead failed")?;
            tx.commit().await.context("commit failed")?;
            metrics::incr("crm_store_inserts", &[("table", "leads")]);
            Ok(())
        }

        async fn insert_task(&self, task: Task) -> anyhow::Result<()> {
            sqlx::query(
                "INSERT INTO tasks (id, lead_id, assigned_to, title, due_on, status, completed_on) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(task.id)
            .bind(task.lead_id)
            .bind(task.assigned_to)
            .bind(&task.title)
            .bind(task.due_on)
            .bind(task.status.as_str())
            .bind(task.completed_on)
            .execute(&self.pool)
            .await
            .context("insert task failed")?;
            metrics::incr("crm_store_inserts", &[("table", "tasks")]);
            Ok(())
        }

        async fn insert_activity(&self, activity: Activity) -> anyhow::Result<()> {
            sqlx::query(
                "INSERT INTO activities (id, lead_id, user_id, kind, description, occurred_on) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(activity.id)
            .bind(activity.lead_id)
            .bind(activity.user_id)
            .bind(activity.kind.as_str())
            .bind(&activity.description)
            .bind(activity.occurred_on)
            .execute(&self.pool)
            .await
            .context("insert activity failed")?;
            metrics::incr("crm_store_inserts", &[("table", "activities")]);
            Ok(())
        }

        async fn delete_lead(&self, id: Uuid) -> anyhow::Result<bool> {
            // tasks/activities cascade and sales.lead_id is SET NULL at the schema level
            let res = sqlx::query("DELETE FROM leads WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .context("delete lead failed")?;
            metrics::incr("crm_store_deletes", &[("table", "leads")]);
            Ok(res.rows_affected() > 0)
        }
    }
}
