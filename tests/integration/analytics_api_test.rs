// tests/integration/analytics_api_test.rs

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use sales_analytics_service::adapter::http::middleware::{Claims, JwtVerifier};
use sales_analytics_service::adapter::http::routes::build_http_router;
use sales_analytics_service::config::app_config::AppConfig;
use sales_analytics_service::domain::model::crm::{Lead, LeadStatus, Sale};
use sales_analytics_service::repository::crm_store::{CrmStore, InMemoryCrmStore};
use sales_analytics_service::service::clock::FixedClock;
use sales_analytics_service::service::summary_generator::TemplateSummaryGenerator;
use sales_analytics_service::state::{AppState, Stores};

const Q1: &str = "start_date=2024-01-01&end_date=2024-03-31";

struct TestApp {
    router: Router,
    jwt: JwtVerifier,
    alice: Uuid,
    bob: Uuid,
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn sale(amount: Decimal, closed_on: NaiveDate, category: &str, region: &str, rep: Uuid) -> Sale {
    Sale {
        id: Uuid::new_v4(),
        amount,
        closed_on,
        product_category: category.into(),
        region: region.into(),
        sales_rep_id: rep,
        lead_id: None,
    }
}

fn lead(owner: Uuid, converted: bool, created_on: NaiveDate) -> Lead {
    Lead {
        id: Uuid::new_v4(),
        name: "Prospect".into(),
        company: Some("Acme".into()),
        owner_id: owner,
        lead_source: "web".into(),
        region: "EMEA".into(),
        status: if converted { LeadStatus::Won } else { LeadStatus::Contacted },
        converted,
        converted_on: converted.then_some(created_on),
        budget: None,
        created_on,
    }
}

async fn app() -> TestApp {
    let crm = Arc::new(InMemoryCrmStore::new());
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    crm.insert_sale(sale(dec!(1000), d(2024, 1, 15), "Software", "EMEA", alice)).await.unwrap();
    crm.insert_sale(sale(dec!(250.50), d(2024, 2, 2), "Services", "EMEA", alice)).await.unwrap();
    crm.insert_sale(sale(dec!(4000), d(2024, 3, 9), "Hardware", "APAC", bob)).await.unwrap();
    crm.insert_lead(lead(alice, true, d(2024, 1, 5))).await.unwrap();
    crm.insert_lead(lead(alice, false, d(2024, 2, 5))).await.unwrap();
    crm.insert_lead(lead(bob, false, d(2024, 3, 1))).await.unwrap();

    let mut stores = Stores::in_memory();
    stores.crm = crm;

    let mut cfg = AppConfig::default();
    cfg.reports.output_dir = std::env::temp_dir().join(format!("analytics-api-{}", Uuid::new_v4()));
    let jwt = JwtVerifier::new(&cfg.auth.jwt_secret);

    let state = AppState::with_summarizer(
        Arc::new(cfg),
        stores,
        Arc::new(FixedClock::on(2024, 3, 31)),
        Arc::new(TemplateSummaryGenerator),
        None,
    )
    .unwrap();

    TestApp {
        router: build_http_router(state),
        jwt,
        alice,
        bob,
    }
}

impl TestApp {
    fn token(&self, sub: Uuid, roles: &[&str]) -> String {
        self.jwt
            .issue(&Claims {
                sub,
                username: "tester".into(),
                email: "tester@example.com".into(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
                active: true,
                exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            })
            .unwrap()
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Vec<u8>, Option<String>) {
        let mut req = Request::builder().uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let res = self.router.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = res.status();
        let disposition = res
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        (status, bytes.to_vec(), disposition)
    }

    async fn get_json(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let (status, bytes, _) = self.get(uri, token).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

fn kpi(body: &Value, name: &str) -> Value {
    body.as_array()
        .and_then(|items| items.iter().find(|k| k["name"] == name))
        .map(|k| k["value"].clone())
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn missing_token_is_unauthenticated() {
    let app = app().await;
    let (status, body) = app.get_json(&format!("/analytics/kpis?{Q1}"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app.get_json(&format!("/analytics/kpis?{Q1}"), Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn manager_sees_every_rep() {
    let app = app().await;
    let token = app.token(Uuid::new_v4(), &["Sales Manager"]);
    let (status, body) = app
        .get_json(&format!("/analytics/kpis?{Q1}&metrics=total_revenue,deals_closed"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));
    assert_eq!(kpi(&body, "total_revenue").as_f64(), Some(5250.5));
    assert_eq!(kpi(&body, "deals_closed").as_f64(), Some(3.0));
}

#[tokio::test]
async fn rep_only_sees_own_rows() {
    let app = app().await;
    let token = app.token(app.alice, &["sales_rep"]);
    let (status, body) = app.get_json(&format!("/analytics/kpis?{Q1}"), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kpi(&body, "total_revenue").as_f64(), Some(1250.5));
    assert_eq!(kpi(&body, "conversion_rate").as_f64(), Some(0.5));

    let bob_token = app.token(app.bob, &["Sales Representative"]);
    let (_, body) = app.get_json(&format!("/analytics/kpis?{Q1}"), Some(&bob_token)).await;
    assert_eq!(kpi(&body, "total_revenue").as_f64(), Some(4000.0));
    assert_eq!(kpi(&body, "conversion_rate").as_f64(), Some(0.0));
}

#[tokio::test]
async fn viewer_without_rows_gets_zero_conversion() {
    let app = app().await;
    let token = app.token(Uuid::new_v4(), &["Viewer"]);
    let (status, body) = app.get_json(&format!("/analytics/kpis?{Q1}&metrics=conversion_rate"), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kpi(&body, "conversion_rate").as_f64(), Some(0.0));
}

#[tokio::test]
async fn reversed_range_is_a_bad_request() {
    let app = app().await;
    let token = app.token(Uuid::new_v4(), &["Admin"]);
    let (status, body) = app
        .get_json("/analytics/kpis?start_date=2024-03-01&end_date=2024-02-01", Some(&token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("invalid filter"));
}

#[tokio::test]
async fn unknown_chart_is_not_found() {
    let app = app().await;
    let token = app.token(Uuid::new_v4(), &["Admin"]);
    let (status, _) = app.get_json(&format!("/analytics/chart-data/pipeline_velocity?{Q1}"), Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chart_then_drilldown_on_a_region() {
    let app = app().await;
    let token = app.token(Uuid::new_v4(), &["Admin"]);
    let (status, chart) = app.get_json(&format!("/analytics/chart-data/sales_by_region?{Q1}"), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let ids = chart["data"]["datasets"][0]["ids"].as_array().cloned().unwrap_or_default();
    assert!(ids.contains(&Value::from("EMEA")));

    let (status, drill) = app.get_json(&format!("/analytics/drilldown/sales_by_region/EMEA?{Q1}"), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(drill["rows"].as_array().map(Vec::len), Some(2));

    let (status, _) = app.get_json(&format!("/analytics/drilldown/sales_by_region/LATAM?{Q1}"), Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_is_denied_to_viewers() {
    let app = app().await;
    let viewer = app.token(Uuid::new_v4(), &["Viewer"]);
    let (status, _, _) = app
        .get(&format!("/analytics/export/csv?data_context=sales_by_region&{Q1}"), Some(&viewer))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let manager = app.token(Uuid::new_v4(), &["Sales Manager"]);
    let (status, bytes, disposition) = app
        .get(&format!("/analytics/export/csv?data_context=sales_by_region&{Q1}"), Some(&manager))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        disposition.as_deref(),
        Some("attachment; filename=\"sales_by_region_20240101_20240331.csv\"")
    );
    let csv = String::from_utf8(bytes).unwrap();
    assert!(csv.contains("APAC"));
}

#[tokio::test]
async fn health_is_public() {
    let app = app().await;
    let (status, body) = app.get_json("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["summarizer"], "template");

    // no recorder installed in tests
    let (status, _) = app.get_json("/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
