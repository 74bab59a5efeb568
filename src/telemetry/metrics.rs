// src/telemetry/metrics.rs
//! Métricas del servicio sobre OpenTelemetry con exportación Prometheus.
//!
//! Los contadores e histogramas se registran donde ocurre el trabajo
//! (stores, motor de agregación, pipeline, worker). Los instrumentos se crean
//! una sola vez por meter provider y se guardan en [`ServiceMetrics`]; las
//! funciones libres (`incr`, `record_ms`, ...) solo los buscan por nombre.
//! Sin exportador instalado el meter global es no-op, así que los tests no
//! necesitan nada especial.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _, Unit, UpDownCounter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::MeterProvider as SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};

const METER_NAME: &str = "sales_analytics_service";

const COUNTERS: &[(&str, &str)] = &[
    ("analytics_kpi_requests", "KPI computations, labelled by kpi"),
    ("analytics_chart_requests", "Chart series computations, labelled by chart"),
    ("analytics_drilldown_requests", "Drilldown queries, labelled by chart"),
    ("analytics_exports", "Exports served, labelled by format"),
    ("kpi_cache_hits", "KPI results served from the cache"),
    ("kpi_cache_misses", "KPI cache lookups that missed"),
    ("access_denied", "Requests rejected by the access gate, labelled by policy"),
    ("http_errors", "Error responses, labelled by error code"),
    ("report_jobs_enqueued", "Report jobs pushed to the queue"),
    ("report_jobs_completed", "Reports that reached completed"),
    ("report_jobs_failed", "Reports that reached failed during generation"),
    ("report_jobs_cancelled", "Pending reports cancelled by a user"),
    ("predictive_model_runs", "Model executions, labelled by model"),
    ("predictive_insufficient_data", "Model runs rejected for short history"),
    ("predictive_results_inserted", "Predictive results stored"),
    ("predictive_results_superseded", "Active predictive results superseded"),
    ("crm_store_queries", "CRM reads, labelled by table"),
    ("crm_store_inserts", "CRM rows written, labelled by table"),
    ("crm_store_deletes", "CRM rows deleted, labelled by table"),
    ("report_store_inserts", "Report rows written, labelled by table"),
    ("report_store_updates", "Report rows updated, labelled by table"),
    ("report_store_deletes", "Report rows deleted, labelled by table"),
    ("report_transitions", "Report status transitions, labelled by target status"),
];

const HISTOGRAMS: &[(&str, &str)] = &[
    ("report_job_duration_ms", "Wall time of one report job"),
    ("llm_summary_latency_ms", "Summary generation latency"),
];

const QUEUE_DEPTH: &str = "report_job_queue_depth";

/// Registro Prometheus alimentado por el meter provider global.
#[derive(Clone)]
pub struct MetricsExporter {
    registry: Registry,
}

impl MetricsExporter {
    /// Texto de exposición para `GET /metrics`.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Contenedor de instrumentos, creados una vez sobre el mismo meter.
pub struct ServiceMetrics {
    meter: Meter,
    counters: RwLock<HashMap<&'static str, Counter<u64>>>,
    histograms: RwLock<HashMap<&'static str, Histogram<f64>>>,
    queue_depth: UpDownCounter<i64>,
}

static GLOBAL_METRICS: RwLock<Option<Arc<ServiceMetrics>>> = RwLock::new(None);

impl ServiceMetrics {
    fn init(meter: Meter) -> Self {
        let counters = COUNTERS
            .iter()
            .map(|(name, description)| (*name, meter.u64_counter(*name).with_description(*description).init()))
            .collect();
        let histograms = HISTOGRAMS
            .iter()
            .map(|(name, description)| (*name, latency_histogram(&meter, name, description)))
            .collect();
        let queue_depth = meter
            .i64_up_down_counter(QUEUE_DEPTH)
            .with_description("Jobs waiting in the report queue")
            .init();
        Self {
            meter,
            counters: RwLock::new(counters),
            histograms: RwLock::new(histograms),
            queue_depth,
        }
    }

    /// Instancia compartida; se crea sobre el meter global la primera vez.
    pub fn global() -> Arc<Self> {
        if let Some(metrics) = GLOBAL_METRICS.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return metrics.clone();
        }
        let mut slot = GLOBAL_METRICS.write().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert_with(|| Arc::new(Self::init(global::meter(METER_NAME))))
            .clone()
    }

    fn counter(&self, name: &'static str) -> Counter<u64> {
        if let Some(c) = self.counters.read().unwrap_or_else(PoisonError::into_inner).get(name) {
            return c.clone();
        }
        // series fuera de la tabla: se crean al primer uso y quedan cacheadas
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_insert_with(|| self.meter.u64_counter(name).init())
            .clone()
    }

    fn histogram(&self, name: &'static str) -> Histogram<f64> {
        if let Some(h) = self.histograms.read().unwrap_or_else(PoisonError::into_inner).get(name) {
            return h.clone();
        }
        self.histograms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_insert_with(|| latency_histogram(&self.meter, name, ""))
            .clone()
    }
}

fn latency_histogram(meter: &Meter, name: &'static str, description: &'static str) -> Histogram<f64> {
    meter
        .f64_histogram(name)
        .with_description(description)
        .with_unit(Unit::new("ms"))
        .init()
}

/// Instala el meter provider global con lector Prometheus y rehace los
/// instrumentos sobre él.
pub fn install_exporter() -> anyhow::Result<MetricsExporter> {
    let registry = Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("prometheus exporter not built: {e}"))?;
    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
    let meter = provider.meter(METER_NAME);
    global::set_meter_provider(provider);
    *GLOBAL_METRICS.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(ServiceMetrics::init(meter)));
    Ok(MetricsExporter { registry })
}

fn attributes(labels: &[(&'static str, &str)]) -> Vec<KeyValue> {
    labels.iter().map(|(k, v)| KeyValue::new(*k, v.to_string())).collect()
}

/// Suma `n` al contador `name`.
pub fn add(name: &'static str, n: u64, labels: &[(&'static str, &str)]) {
    ServiceMetrics::global().counter(name).add(n, &attributes(labels));
}

pub fn incr(name: &'static str, labels: &[(&'static str, &str)]) {
    add(name, 1, labels);
}

/// Latencia en milisegundos.
pub fn record_ms(name: &'static str, ms: f64, labels: &[(&'static str, &str)]) {
    ServiceMetrics::global().histogram(name).record(ms, &attributes(labels));
}

/// Variación de la profundidad de la cola de informes.
pub fn queue_depth(delta: i64) {
    ServiceMetrics::global().queue_depth.add(delta, &[]);
}
