//! Common test utilities for matching-service integration tests.

use chrono::NaiveDate;
use matching_service::config::{DatabaseConfig, MatchingConfig};
use matching_service::services::{Database, ScoringConfig};
use matching_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,matching_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub port: u16,
    pub client: reqwest::Client,
    pub user_id: Uuid,
    pub db: Database,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("X-User-ID", self.user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("X-User-ID", self.user_id.to_string())
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_empty(&self, path: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("X-User-ID", self.user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .header("X-User-ID", self.user_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn seed_receipt(
        &self,
        vendor: Option<&str>,
        date: Option<NaiveDate>,
        amount: Option<Decimal>,
    ) -> Uuid {
        let receipt_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO receipts (receipt_id, user_id, vendor_name, receipt_date, amount, currency) \
             VALUES ($1, $2, $3, $4, $5, 'USD')",
        )
        .bind(receipt_id)
        .bind(self.user_id)
        .bind(vendor)
        .bind(date)
        .bind(amount)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed receipt");
        receipt_id
    }

    pub async fn seed_transaction(
        &self,
        description: &str,
        date: NaiveDate,
        amount: Decimal,
    ) -> Uuid {
        let transaction_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO transactions \
               (transaction_id, user_id, transaction_date, description, original_description, amount) \
             VALUES ($1, $2, $3, $4, $4, $5)",
        )
        .bind(transaction_id)
        .bind(self.user_id)
        .bind(date)
        .bind(description)
        .bind(amount)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed transaction");
        transaction_id
    }
}

/// Spawn a test application, or None when TEST_DATABASE_URL is not set so
/// these tests degrade to a skip on machines without Postgres.
pub async fn try_spawn_app() -> Option<TestApp> {
    init_tracing();

    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set - skipping integration test");
        return None;
    };

    let config = MatchingConfig {
        common: CommonConfig { port: 0 },
        service_name: "matching-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 2,
            min_connections: 1,
        },
        scoring: ScoringConfig::default(),
    };

    let app = Application::build(config)
        .await
        .expect("Failed to build application");
    let port = app.port();
    let db = app.db().clone();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    Some(TestApp {
        port,
        client: reqwest::Client::new(),
        user_id: Uuid::new_v4(),
        db,
    })
}
