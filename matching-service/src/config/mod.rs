//! Configuration module for matching-service.

use crate::services::engine::ScoringConfig;
use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl MatchingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let defaults = ScoringConfig::default();
        let scoring = ScoringConfig {
            amount_weight: env_parse("MATCH_AMOUNT_WEIGHT", defaults.amount_weight),
            date_weight: env_parse("MATCH_DATE_WEIGHT", defaults.date_weight),
            vendor_weight: env_parse("MATCH_VENDOR_WEIGHT", defaults.vendor_weight),
            amount_full_credit: env_parse::<Decimal>(
                "MATCH_AMOUNT_FULL_CREDIT",
                defaults.amount_full_credit,
            ),
            amount_max_delta: env_parse::<Decimal>(
                "MATCH_AMOUNT_MAX_DELTA",
                defaults.amount_max_delta,
            ),
            date_window_days: env_parse("MATCH_DATE_WINDOW_DAYS", defaults.date_window_days),
            min_confidence: env_parse("MATCH_MIN_CONFIDENCE", defaults.min_confidence),
            ambiguity_epsilon: env_parse("MATCH_AMBIGUITY_EPSILON", defaults.ambiguity_epsilon),
        };
        scoring
            .validate()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid scoring config: {}", e)))?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "matching-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            scoring,
        })
    }
}
