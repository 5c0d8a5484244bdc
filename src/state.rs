//! # Application State Management
//!
//! Shared state accessed by HTTP handlers, middleware, WebSocket actors and the
//! matchmaking actor at the same time: the live configuration and service metrics.
//!
//! Pairing state is deliberately NOT here. It lives inside the matchmaking actor
//! and is only reachable through its messages.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every handler and actor holds a cheap clone of the same state
//! - **RwLock**: many readers or one writer at a time
//! - Locks are held only for the duration of a counter update or a clone, never
//!   across an `.await`

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Counters updated by middleware, sockets and the matchmaking actor
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Service metrics collected since startup.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed
    pub request_count: u64,

    /// Total number of HTTP requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Currently open WebSocket connections
    pub active_connections: usize,

    /// WebSocket connections accepted since startup
    pub total_connections: u64,

    /// Per-endpoint HTTP metrics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub signaling: SignalingMetrics,
}

/// Signaling traffic counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalingMetrics {
    /// Pairings formed since startup
    pub pairings_created: u64,

    /// Offers, answers and candidates forwarded to a partner
    pub messages_relayed: u64,

    /// Negotiation messages answered with `pairing-invalid`
    pub messages_rejected: u64,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so readers never block each other
    /// for longer than a copy.
    pub fn get_config(&self) -> AppConfig {
        self.read_config().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Reserve a connection slot if the configured limit allows it.
    ///
    /// Check and increment happen under one lock, so two simultaneous upgrades
    /// cannot both take the last slot.
    pub fn try_open_connection(&self) -> bool {
        let max_connections = self.read_config().performance.max_connections;
        let mut metrics = self.write_metrics();

        if metrics.active_connections >= max_connections {
            return false;
        }
        metrics.active_connections += 1;
        metrics.total_connections += 1;
        true
    }

    /// Release a connection slot. Saturates at zero.
    pub fn close_connection(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_connections = metrics.active_connections.saturating_sub(1);
    }

    pub fn record_pairing_created(&self) {
        self.write_metrics().signaling.pairings_created += 1;
    }

    pub fn record_message_relayed(&self) {
        self.write_metrics().signaling.messages_relayed += 1;
    }

    pub fn record_message_rejected(&self) {
        self.write_metrics().signaling.messages_rejected += 1;
    }

    /// Consistent copy of all metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    // A panic while holding one of these locks leaves plain counters behind, which
    // are still safe to read, so poisoning is ignored.
    fn read_config(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
