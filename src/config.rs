// src/config.rs

use std::{env, time::Duration};

use dotenvy::dotenv;

use crate::error::AppError;

/// Marks awarded per correct answer when a test does not say otherwise.
pub const DEFAULT_MARKS_PER_QUESTION: i32 = 4;
/// Marks deducted per wrong answer when a test does not say otherwise.
pub const DEFAULT_NEGATIVE_MARKS: i32 = 1;
/// Fallback duration for tests without one.
pub const MINUTE_PER_QUESTION: u32 = 1;
/// Upper bound for `marks_per_question` and `negative_marks`.
pub const MAX_MARKS: i32 = 100;
/// Upper bound for a test's duration.
pub const MAX_DURATION_MINUTES: i32 = 1440;
/// Duration given to imported tests that carry none.
pub const DEFAULT_IMPORT_DURATION_MINUTES: i32 = 180;
/// Period of the exam countdown.
pub const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);
/// Schema version written into session snapshots.
pub const SNAPSHOT_VERSION: u32 = 1;
/// `custom_id` given to the bundled example tests.
pub const EXAMPLE_DATA_ID: &str = "example-data";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_address: String,
    pub cors_origins: Vec<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let jwt_expiration = match env::var("JWT_EXPIRATION") {
            Ok(raw) => raw.parse().map_err(|e| {
                AppError::Configuration(format!("Invalid value for JWT_EXPIRATION: {}", e))
            })?,
            Err(_) => 86_400,
        };

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_address =
            env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            });

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            bind_address,
            cors_origins,
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
        })
    }
}

fn required(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Configuration(format!("{} must be set", name)))
}
