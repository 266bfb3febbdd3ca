//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP
//! request handlers and call actors simultaneously.
//!
//! ## Key Rust Concepts (IMPORTANT for beginners):
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: Multiple HTTP requests and active calls all need the same state
//! - **Thread safety**: Safe to share between threads
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Why needed**: Many handlers read the agent config simultaneously, but only
//!   the config endpoint updates it
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many handlers can hold a reference)
//! - **RwLock**: Thread-safe read/write access
//! - **T**: The actual data type being protected

use crate::config::AppConfig;
use crate::logstore::LogStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all handlers and call actors.
///
/// ## Thread Safety Pattern:
/// All mutable data sits behind Arc<RwLock<T>>; the log store does its own
/// internal locking and is shared as a plain Arc.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime via the config API)
    pub config: Arc<RwLock<AppConfig>>,

    /// In-memory event log shared by every call and served over HTTP
    pub logs: Arc<LogStore>,

    /// Performance metrics (constantly being updated by requests and calls)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and bridged calls.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of live bridged calls
    pub active_calls: u32,

    /// Total calls handled since server start
    pub total_calls: u64,

    /// Audio frames relayed caller -> AI
    pub frames_to_ai: u64,

    /// Audio frames relayed AI -> caller
    pub frames_to_caller: u64,

    /// Detailed metrics for each API endpoint (URL path)
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            logs: Arc::new(LogStore::new()),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    /// AppConfig is designed to be cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration after validating it.
    ///
    /// Configuration is validated before updating so the shared copy is
    /// always runnable; a bad update leaves the old config in place.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Record the start of a bridged call (telephony WebSocket accepted).
    pub fn call_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_calls += 1;
        metrics.total_calls += 1;
    }

    /// Record the end of a bridged call.
    ///
    /// Includes an underflow check so a duplicate end signal can never wrap
    /// the counter.
    pub fn call_ended(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_calls > 0 {
            metrics.active_calls -= 1;
        }
    }

    /// Count one caller audio frame forwarded to the AI leg.
    pub fn record_frame_to_ai(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_to_ai += 1;
    }

    /// Count one AI audio frame forwarded to the caller.
    pub fn record_frame_to_caller(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_to_caller += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Clones the data so the lock isn't held while the HTTP response is
    /// being serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_calls: metrics.active_calls,
            total_calls: metrics.total_calls,
            frames_to_ai: metrics.frames_to_ai,
            frames_to_caller: metrics.frames_to_caller,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
