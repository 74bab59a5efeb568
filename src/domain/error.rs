// src/domain/error.rs
//! Taxonomía de errores del servicio de analítica.
//!
//! Cada variante se clasifica con `ErrorImpact` para que el adaptador HTTP
//! decida el nivel de log y el código de estado. Los repositorios devuelven
//! `anyhow::Result`; la conversión a `AnalyticsError::Storage` ocurre en el
//! límite de los servicios.

use thiserror::Error;

/// Impacto operativo del error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorImpact {
    UserCorrectable, // el cliente puede corregir la petición
    Operational,     // fallo interno o de un colaborador externo
}

/// Errores del dominio de analítica y reportes.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("unknown metric or chart '{0}'")]
    UnknownMetric(String),

    #[error("data point '{data_point_id}' not found in chart '{chart}' for the current filter")]
    DrilldownNotFound { chart: String, data_point_id: String },

    #[error("authentication required")]
    Unauthenticated,

    #[error("forbidden: requires one of [{required}]")]
    Forbidden { required: String },

    #[error("insufficient data: at least {required} historical points required, {available} available")]
    InsufficientData { required: usize, available: usize },

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AnalyticsError {
    pub fn impact(&self) -> ErrorImpact {
        match self {
            AnalyticsError::ExternalService(_) | AnalyticsError::Storage(_) => ErrorImpact::Operational,
            _ => ErrorImpact::UserCorrectable,
        }
    }

    /// Código corto y estable, útil para métricas y para el cuerpo JSON.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyticsError::InvalidFilter(_) => "invalid_filter",
            AnalyticsError::UnknownMetric(_) => "unknown_metric",
            AnalyticsError::DrilldownNotFound { .. } => "drilldown_not_found",
            AnalyticsError::Unauthenticated => "unauthenticated",
            AnalyticsError::Forbidden { .. } => "forbidden",
            AnalyticsError::InsufficientData { .. } => "insufficient_data",
            AnalyticsError::ExternalService(_) => "external_service",
            AnalyticsError::InvalidRequest(_) => "invalid_request",
            AnalyticsError::Unsupported(_) => "unsupported",
            AnalyticsError::NotFound(_) => "not_found",
            AnalyticsError::Conflict(_) => "conflict",
            AnalyticsError::Storage(_) => "storage",
        }
    }

    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        AnalyticsError::InvalidFilter(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        AnalyticsError::InvalidRequest(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AnalyticsError::NotFound(what.into())
    }
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
