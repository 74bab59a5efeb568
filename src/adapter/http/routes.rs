// src/adapter/http/routes.rs
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};

use crate::adapter::http::{controller, middleware::auth_middleware};
use crate::state::AppState;

/// Construye el router HTTP: analítica, informes IA y endpoints operativos.
pub fn build_http_router(state: AppState) -> Router {
    let analytics = Router::new()
        .route("/kpis", get(controller::kpis))
        .route("/chart-data/:chart_name", get(controller::chart_data))
        .route("/drilldown/:chart_name/:data_point_id", get(controller::drilldown))
        .route("/export/:export_type", get(controller::export))
        .route("/filter-options", get(controller::filter_options));

    let insights = Router::new()
        .route("/generate-report", post(controller::generate_report))
        .route("/report/:report_id", get(controller::get_report))
        .route("/report/:report_id/cancel", post(controller::cancel_report))
        .route("/report/:report_id/regenerate", post(controller::regenerate_report))
        .route("/reports", get(controller::recent_reports))
        .route("/forecast", get(controller::forecast))
        .route(
            "/report-configurations",
            get(controller::list_configurations).post(controller::create_configuration),
        )
        .route(
            "/report-configurations/:config_id",
            put(controller::update_configuration).delete(controller::delete_configuration),
        );

    // el middleware sólo adjunta el principal; la autorización es por caso de uso
    let authenticated = Router::new()
        .nest("/analytics", analytics)
        .nest("/ai-insights", insights)
        .layer(from_fn_with_state(state.jwt.clone(), auth_middleware));

    Router::new()
        .merge(authenticated)
        .route("/health", get(controller::health))
        .route("/metrics", get(controller::render_metrics))
        .with_state(state)
}
