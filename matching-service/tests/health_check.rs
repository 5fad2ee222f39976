mod common;

use reqwest::StatusCode;
use serde_json::Value;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn health_check_reports_service_and_version() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(StatusCode::OK, response.status());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "matching-service");
    assert!(body["version"].is_string());
}

#[tokio::test]
#[serial]
async fn readiness_check_returns_ok_with_database() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    let response = app
        .client
        .get(app.url("/ready"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(StatusCode::OK, response.status());
}

#[tokio::test]
#[serial]
async fn metrics_endpoint_exposes_prometheus_text() {
    let Some(app) = common::try_spawn_app().await else {
        return;
    };

    // Generate at least one recorded query.
    app.get("/receipts/unmatched").await;

    let response = app
        .client
        .get(app.url("/metrics"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(StatusCode::OK, response.status());

    let body = response.text().await.unwrap();
    assert!(body.contains("matching_db_query_duration_seconds"));
}
