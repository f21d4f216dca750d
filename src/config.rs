use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub port: u16,
    pub database_url: String,
    pub cors_origins: Vec<String>,
    /// Origins admitted to the realtime gateway. Entries ending in `*` are
    /// prefix matches, everything else is exact.
    pub allowed_ws_origins: Vec<String>,
    /// Permissive mode admits any loopback or private-network origin.
    pub permissive_origins: bool,
    pub max_realtime_connections: usize,
    pub ingest_rate_limit: u32,
    pub ingest_rate_window_secs: u64,
    pub webhook_register_limit: u32,
    pub webhook_register_window_secs: u64,
    pub throttle_window_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "sqlite://data/growmon.db".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            allowed_ws_origins: vec!["http://localhost:3000".to_string()],
            permissive_origins: true,
            max_realtime_connections: 100,
            ingest_rate_limit: 120,
            ingest_rate_window_secs: 60,
            webhook_register_limit: 10,
            webhook_register_window_secs: 3600,
            throttle_window_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

impl WebConfig {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = env::var("GROWMON_PORT") {
            config.port = port.parse()?;
        }

        if let Ok(db_url) = env::var("GROWMON_DATABASE_URL") {
            config.database_url = db_url;
        } else if let Ok(db_url) = env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(origins) = env::var("GROWMON_CORS_ORIGINS") {
            config.cors_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(origins) = env::var("GROWMON_WS_ORIGINS") {
            config.allowed_ws_origins =
                origins.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(permissive) = env::var("GROWMON_PERMISSIVE_ORIGINS") {
            config.permissive_origins = permissive == "1" || permissive == "true";
        }

        if let Ok(max_conns) = env::var("GROWMON_MAX_WS_CONNECTIONS") {
            config.max_realtime_connections = max_conns.parse()?;
        }

        if let Ok(limit) = env::var("GROWMON_INGEST_RATE_LIMIT") {
            config.ingest_rate_limit = limit.parse()?;
        }

        if let Ok(window) = env::var("GROWMON_INGEST_RATE_WINDOW") {
            config.ingest_rate_window_secs = window.parse()?;
        }

        if let Ok(limit) = env::var("GROWMON_WEBHOOK_REGISTER_LIMIT") {
            config.webhook_register_limit = limit.parse()?;
        }

        if let Ok(grace) = env::var("GROWMON_SHUTDOWN_GRACE") {
            config.shutdown_grace_secs = grace.parse()?;
        }

        Ok(config)
    }
}
