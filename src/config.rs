// src/config.rs

use std::{env, str::FromStr};

use dotenvy::dotenv;

use crate::{
    engine::EngineConfig,
    services::{analytics::AnalyticsThresholds, cache::CacheConfig},
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means the in-memory store is used.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: String,
    pub cache_max_bytes: usize,
    pub cache_low_water_bytes: usize,
    pub cache_fetch_batch: usize,
    pub default_max_repetitions: u32,
    pub strength_threshold: f64,
    pub weakness_threshold: f64,
    pub session_sweep_secs: u64,
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value '{}' for {}, using default", raw, key);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            cache_max_bytes: parse_or("CACHE_MAX_BYTES", 64 * 1024 * 1024),
            cache_low_water_bytes: parse_or("CACHE_LOW_WATER_BYTES", 48 * 1024 * 1024),
            cache_fetch_batch: parse_or("CACHE_FETCH_BATCH", 50),
            default_max_repetitions: parse_or("DEFAULT_MAX_REPETITIONS", 2),
            strength_threshold: parse_or("STRENGTH_THRESHOLD", 80.0),
            weakness_threshold: parse_or("WEAKNESS_THRESHOLD", 50.0),
            session_sweep_secs: parse_or("SESSION_SWEEP_SECS", 30),
        }
    }

    /// Settings for a test or embedded engine, without touching the environment.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: None,
            jwt_secret: jwt_secret.to_string(),
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            cache_max_bytes: 64 * 1024 * 1024,
            cache_low_water_bytes: 48 * 1024 * 1024,
            cache_fetch_batch: 50,
            default_max_repetitions: 2,
            strength_threshold: 80.0,
            weakness_threshold: 50.0,
            session_sweep_secs: 30,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache: CacheConfig {
                max_memory_bytes: self.cache_max_bytes,
                low_water_bytes: self.cache_low_water_bytes.min(self.cache_max_bytes),
                fetch_batch: self.cache_fetch_batch,
            },
            thresholds: AnalyticsThresholds {
                strength: self.strength_threshold,
                weakness: self.weakness_threshold,
            },
            default_max_repetitions: self.default_max_repetitions,
        }
    }
}
