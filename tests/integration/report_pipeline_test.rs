// tests/integration/report_pipeline_test.rs

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sales_analytics_service::adapter::http::middleware::{Claims, JwtVerifier};
use sales_analytics_service::adapter::http::routes::build_http_router;
use sales_analytics_service::config::app_config::AppConfig;
use sales_analytics_service::domain::model::crm::Sale;
use sales_analytics_service::domain::model::principal::{Principal, Role};
use sales_analytics_service::domain::model::report::ReportStatus;
use sales_analytics_service::repository::crm_store::{CrmStore, InMemoryCrmStore};
use sales_analytics_service::service::clock::FixedClock;
use sales_analytics_service::service::summary_generator::TemplateSummaryGenerator;
use sales_analytics_service::state::{AppState, Stores};
use sales_analytics_service::usecase::report_pipeline::GenerateReportRequest;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

async fn seeded_stores() -> Stores {
    let crm = Arc::new(InMemoryCrmStore::new());
    let rep = Uuid::new_v4();
    for (amount, day, region) in [(dec!(1200), 2, "EMEA"), (dec!(800), 9, "APAC"), (dec!(450.25), 15, "EMEA")] {
        crm.insert_sale(Sale {
            id: Uuid::new_v4(),
            amount,
            closed_on: d(2024, 5, day),
            product_category: "Software".into(),
            region: region.into(),
            sales_rep_id: rep,
            lead_id: None,
        })
        .await
        .unwrap();
    }
    let mut stores = Stores::in_memory();
    stores.crm = crm;
    stores
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.reports.output_dir = std::env::temp_dir().join(format!("report-pipeline-{}", Uuid::new_v4()));
    cfg.reports.poll_interval_ms = 50;
    cfg
}

fn manager() -> Principal {
    Principal::new(Uuid::new_v4(), "maria", "maria@example.com", [Role::SalesManager])
}

fn sales_summary() -> GenerateReportRequest {
    GenerateReportRequest {
        report_type: Some("Sales Summary".into()),
        parameters: json!({ "date_range": "last_30_days" }),
        ..Default::default()
    }
}

fn statuses(report: &Value) -> Vec<String> {
    report["status_history"]
        .as_array()
        .map(|h| h.iter().filter_map(|c| c["status"].as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

async fn send(router: &axum::Router, method: Method, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let res = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn worker_takes_a_summary_from_pending_to_completed() {
    let cfg = config();
    let token = JwtVerifier::new(&cfg.auth.jwt_secret)
        .issue(&Claims {
            sub: Uuid::new_v4(),
            username: "maria".into(),
            email: "maria@example.com".into(),
            roles: vec!["Sales Manager".into()],
            active: true,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        })
        .unwrap();
    let state = AppState::with_summarizer(
        Arc::new(cfg),
        seeded_stores().await,
        Arc::new(FixedClock::on(2024, 5, 20)),
        Arc::new(TemplateSummaryGenerator),
        None,
    )
    .unwrap();
    let router = build_http_router(state.clone());

    let (status, body) = send(
        &router,
        Method::POST,
        "/ai-insights/generate-report",
        &token,
        Some(json!({ "report_type": "Sales Summary", "parameters": { "date_range": "last_30_days" } })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let handle: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(handle["status"], "pending");
    let task_id = handle["task_id"].as_str().unwrap().to_string();

    let worker = state.report_worker().start();

    let mut report = Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&router, Method::GET, &format!("/ai-insights/report/{task_id}"), &token, None).await;
        assert_eq!(status, StatusCode::OK);
        report = serde_json::from_slice(&body).unwrap();
        if report["status"] == "completed" || report["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    worker.shutdown().await.unwrap();

    assert_eq!(report["status"], "completed", "{report}");
    assert_eq!(statuses(&report), vec!["pending", "generating", "completed"]);
    assert!(report["error_message"].is_null());
    let summary = report["summary_text"].as_str().unwrap_or_default();
    assert!(summary.starts_with("Sales Summary for 2024-04-20 to 2024-05-20."), "{summary}");

    let (status, csv) = send(
        &router,
        Method::GET,
        &format!("/ai-insights/report/{task_id}?download=true"),
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(csv).unwrap();
    assert!(csv.starts_with("section,id,label,value,unit"));
    assert!(csv.contains("total_revenue"));
}

#[tokio::test]
async fn llm_summary_is_stored_on_the_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header_eq("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Revenue is concentrated in EMEA.  " } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config();
    cfg.llm.api_key = Some("test-key".into());
    cfg.llm.base_url = format!("{}/", server.uri());
    let state = AppState::build(Arc::new(cfg), seeded_stores().await, Arc::new(FixedClock::on(2024, 5, 20)), None).unwrap();
    assert_eq!(state.reports.summarizer_name(), "openai");

    let user = manager();
    let handle = state.reports.enqueue(Some(&user), sales_summary()).await.unwrap();
    state.reports.run(handle.task_id).await.unwrap();

    let report = state.reports.get_report(Some(&user), handle.task_id).await.unwrap();
    assert_eq!(report.status, ReportStatus::Completed);
    assert_eq!(report.summary_text.as_deref(), Some("Revenue is concentrated in EMEA."));
}

#[tokio::test]
async fn slow_llm_fails_the_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "choices": [{ "message": { "content": "late" } }] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut cfg = config();
    cfg.llm.api_key = Some("test-key".into());
    cfg.llm.base_url = server.uri();
    cfg.llm.timeout_secs = 1;
    let state = AppState::build(Arc::new(cfg), seeded_stores().await, Arc::new(FixedClock::on(2024, 5, 20)), None).unwrap();

    let user = manager();
    let handle = state.reports.enqueue(Some(&user), sales_summary()).await.unwrap();
    state.reports.run(handle.task_id).await.unwrap();

    let report = state.reports.get_report(Some(&user), handle.task_id).await.unwrap();
    assert_eq!(report.status, ReportStatus::Failed);
    assert_eq!(report.visited(), vec![ReportStatus::Pending, ReportStatus::Generating, ReportStatus::Failed]);
    assert!(report.summary_text.is_none());
    let message = report.error_message.unwrap_or_default();
    assert!(message.contains("external service"), "{message}");
}

#[tokio::test]
async fn upstream_error_fails_the_report_and_regenerate_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let mut cfg = config();
    cfg.llm.api_key = Some("test-key".into());
    cfg.llm.base_url = server.uri();
    let state = AppState::build(Arc::new(cfg), seeded_stores().await, Arc::new(FixedClock::on(2024, 5, 20)), None).unwrap();

    let user = manager();
    let first = state.reports.enqueue(Some(&user), sales_summary()).await.unwrap();
    state.reports.run(first.task_id).await.unwrap();
    let failed = state.reports.get_report(Some(&user), first.task_id).await.unwrap();
    assert_eq!(failed.status, ReportStatus::Failed);
    assert!(failed.error_message.unwrap_or_default().contains("500"));

    // a failed report is never resumed; regeneration creates a new instance
    let retry = state.reports.regenerate(Some(&user), first.task_id).await.unwrap();
    assert_ne!(retry.task_id, first.task_id);
    assert_eq!(retry.status, ReportStatus::Pending);
    let recent = state.reports.recent_reports(Some(&user), None).await.unwrap();
    assert_eq!(recent.len(), 2);
}
