// src/adapter/http/controller.rs
//! Handlers HTTP de analítica e informes.
//!
//! Los handlers sólo traducen: extraen parámetros y el `AuthContext`,
//! llaman al caso de uso y convierten `AnalyticsError` en una respuesta
//! `{"error": ...}` con el código adecuado. Ninguna regla de negocio vive aquí.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, warn};
use uuid::Uuid;

use crate::adapter::http::middleware::AuthContext;
use crate::domain::error::{AnalyticsError, ErrorImpact};
use crate::state::AppState;
use crate::usecase::manage_report_configurations::{NewReportConfiguration, ReportConfigurationPatch};
use crate::usecase::report_pipeline::GenerateReportRequest;
use crate::telemetry::metrics;

/// `AnalyticsError` rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub AnalyticsError);

impl From<AnalyticsError> for ApiError {
    fn from(e: AnalyticsError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AnalyticsError::InvalidFilter(_) | AnalyticsError::InvalidRequest(_) | AnalyticsError::Unsupported(_) => {
                StatusCode::BAD_REQUEST
            }
            AnalyticsError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AnalyticsError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AnalyticsError::UnknownMetric(_)
            | AnalyticsError::DrilldownNotFound { .. }
            | AnalyticsError::NotFound(_)
            | AnalyticsError::InsufficientData { .. } => StatusCode::NOT_FOUND,
            AnalyticsError::Conflict(_) => StatusCode::CONFLICT,
            AnalyticsError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AnalyticsError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            AnalyticsError::Storage(e) => {
                error!(error = ?e, "storage failure");
                json!({ "error": "internal server error" })
            }
            AnalyticsError::InsufficientData { .. } => {
                let message = format!("no forecast available: {}", self.0);
                json!({ "error": message, "message": message, "available": false })
            }
            other => {
                match other.impact() {
                    ErrorImpact::UserCorrectable => warn!(code = other.code(), error = %other, "request rejected"),
                    ErrorImpact::Operational => error!(code = other.code(), error = %other, "request failed"),
                }
                json!({ "error": other.to_string() })
            }
        };
        metrics::incr("http_errors", &[("code", self.0.code())]);
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// ----------------
/// Analytics
/// ----------------
pub async fn kpis(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let kpis = state.queries.kpis(auth.principal(), &params).await?;
    Ok(Json(kpis))
}

pub async fn chart_data(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(chart): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let series = state.queries.chart(auth.principal(), &chart, &params).await?;
    Ok(Json(series.to_chartjs()))
}

pub async fn drilldown(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((chart, data_point_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let drilldown = state.queries.drilldown(auth.principal(), &chart, &data_point_id, &params).await?;
    Ok(Json(drilldown))
}

pub async fn filter_options(State(state): State<AppState>, Extension(auth): Extension<AuthContext>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.queries.filter_options(auth.principal()).await?))
}

pub async fn export(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(export_type): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let file = state.exporter.export(auth.principal(), &export_type, &params).await?;
    Ok(attachment(&file.filename, file.content_type, file.bytes))
}

fn attachment(filename: &str, content_type: &'static str, bytes: Vec<u8>) -> Response {
    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// ----------------
/// AI insights
/// ----------------
pub async fn generate_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<GenerateReportRequest>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.reports.enqueue(auth.principal(), request).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub download: bool,
}

pub async fn get_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Response> {
    if query.download {
        let (name, bytes) = state.reports.artifact(auth.principal(), id).await?;
        return Ok(attachment(&name, "text/csv; charset=utf-8", bytes));
    }
    let report = state.reports.get_report(auth.principal(), id).await?;
    Ok(Json(report).into_response())
}

pub async fn cancel_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.reports.cancel(auth.principal(), id).await?))
}

pub async fn regenerate_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.reports.regenerate(auth.principal(), id).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn recent_reports(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.reports.recent_reports(auth.principal(), query.limit).await?))
}

pub async fn forecast(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.forecasts.forecast(auth.principal(), &params).await?))
}

pub async fn list_configurations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.configurations.list(auth.principal(), query.include_inactive).await?))
}

pub async fn create_configuration(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(input): Json<NewReportConfiguration>,
) -> ApiResult<impl IntoResponse> {
    let config = state.configurations.create(auth.principal(), input).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn update_configuration(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ReportConfigurationPatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.configurations.update(auth.principal(), id, patch).await?))
}

pub async fn delete_configuration(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.configurations.deactivate(auth.principal(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// ----------------
/// Ops
/// ----------------
pub async fn health(State(state): State<AppState>) -> Response {
    match state.jobs.len().await {
        Ok(depth) => Json(json!({
            "status": "ok",
            "report_queue_depth": depth,
            "summarizer": state.reports.summarizer_name(),
        }))
        .into_response(),
        Err(e) => {
            error!(error = ?e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "degraded" }))).into_response()
        }
    }
}

pub async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(exporter) => match exporter.render() {
            Ok(body) => (
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))],
                body,
            )
                .into_response(),
            Err(e) => {
                error!(error = ?e, "metrics encoding failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError(AnalyticsError::invalid_filter("x")).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(AnalyticsError::Unsupported("pdf".into())).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(AnalyticsError::Unauthenticated).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError(AnalyticsError::InsufficientData { required: 3, available: 1 }).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError(AnalyticsError::Conflict("x".into())).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError(AnalyticsError::Storage(anyhow::anyhow!("db down"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
