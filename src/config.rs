//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_MATCHING__REQUEUE_DELAY_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names containing
//! a single underscore survive: `APP_WEBSOCKET__CLIENT_TIMEOUT_SECS` maps to
//! `websocket.client_timeout_secs`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Longest allowed delay before a skipped participant is put back in the pool.
const MAX_REQUEUE_DELAY_MS: u64 = 10_000;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub matching: MatchingConfig,
    pub websocket: WebSocketConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Pairing behavior.
///
/// ## Fields:
/// - `requeue_delay_ms`: how long to wait before putting a skipped participant back
///   in the pool. `0` re-queues it as soon as its `skipped-by-peer` notice has been
///   dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub requeue_delay_ms: u64,
}

/// WebSocket heartbeat settings.
///
/// A ping is sent every `heartbeat_interval_secs`; a connection that has not
/// answered anything for `client_timeout_secs` is closed (and its pairing torn down).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// WebSocket upgrades beyond this many open connections are refused with 503
    pub max_connections: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
            },
            matching: MatchingConfig {
                requeue_delay_ms: 0,
            },
            websocket: WebSocketConfig {
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            performance: PerformanceConfig {
                max_connections: 1000,
            },
        }
    }
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_MATCHING__REQUEUE_DELAY_MS=100`: Delay re-queuing skipped participants
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Heartbeat interval is positive and shorter than the client timeout
    /// - At least one connection is allowed
    /// - The re-queue delay stays short enough that a skipped participant is not
    ///   left stranded
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.websocket.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.websocket.client_timeout_secs <= self.websocket.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.websocket.client_timeout_secs,
                self.websocket.heartbeat_interval_secs
            ));
        }

        if self.performance.max_connections == 0 {
            return Err(anyhow::anyhow!("Max connections must be greater than 0"));
        }

        if self.matching.requeue_delay_ms > MAX_REQUEUE_DELAY_MS {
            return Err(anyhow::anyhow!(
                "Re-queue delay cannot exceed {}ms",
                MAX_REQUEUE_DELAY_MS
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed, so `{"matching":
    /// {"requeue_delay_ms": 100}}` leaves everything else alone. The result is
    /// validated before returning.
    ///
    /// ## When changes apply:
    /// - `matching`: the next skip
    /// - `websocket`, `performance`: connections opened after the update
    /// - `server`: only after a restart
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(matching) = partial_config.get("matching") {
            if let Some(delay) = matching.get("requeue_delay_ms").and_then(|v| v.as_u64()) {
                self.matching.requeue_delay_ms = delay;
            }
        }

        if let Some(websocket) = partial_config.get("websocket") {
            if let Some(interval) = websocket.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                self.websocket.heartbeat_interval_secs = interval;
            }
            if let Some(timeout) = websocket.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.websocket.client_timeout_secs = timeout;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(max) = performance.get("max_connections").and_then(|v| v.as_u64()) {
                self.performance.max_connections = max as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}
