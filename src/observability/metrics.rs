//! Thread-safe routing metrics
//!
//! Atomic counters for the hot path, mutex-protected maps for per-handler
//! and per-error breakdowns.

use crate::error::ErrorCode;
use crate::handler::HandlerId;
use crate::routing::Outcome;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Keep at most this many routing durations for the average
const MAX_DURATION_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector
#[derive(Debug, Default)]
pub struct MetricsCollector {
    requests_received: AtomicU64,
    requests_handled: AtomicU64,
    requests_direct: AtomicU64,
    clarifications: AtomicU64,
    requests_aborted: AtomicU64,
    handoffs_followed: AtomicU64,
    stage_transitions: AtomicU64,
    max_hops_observed: AtomicU64,

    routing_times_ms: Mutex<Vec<u64>>,
    handler_invocations: Mutex<BTreeMap<HandlerId, u64>>,
    errors: Mutex<BTreeMap<String, u64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_finished(&self, outcome: Outcome, hops: usize, duration: Duration) {
        let counter = match outcome {
            Outcome::Handled => &self.requests_handled,
            Outcome::Direct => &self.requests_direct,
            Outcome::Clarification => &self.clarifications,
            Outcome::Aborted => &self.requests_aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.max_hops_observed
            .fetch_max(hops as u64, Ordering::Relaxed);

        if let Ok(mut times) = self.routing_times_ms.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_DURATION_SAMPLES {
                let overflow = times.len() - MAX_DURATION_SAMPLES;
                times.drain(0..overflow);
            }
        }
    }

    pub fn handler_invoked(&self, handler: HandlerId) {
        if let Ok(mut map) = self.handler_invocations.lock() {
            *map.entry(handler).or_insert(0) += 1;
        }
    }

    pub fn handoff_followed(&self) {
        self.handoffs_followed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_transition(&self) {
        self.stage_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn routing_error(&self, code: ErrorCode) {
        if let Ok(mut map) = self.errors.lock() {
            *map.entry(format!("{code:?}")).or_insert(0) += 1;
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let average_routing_ms = self
            .routing_times_ms
            .lock()
            .ok()
            .filter(|times| !times.is_empty())
            .map(|times| times.iter().sum::<u64>() as f64 / times.len() as f64)
            .unwrap_or(0.0);

        MetricsSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_handled: self.requests_handled.load(Ordering::Relaxed),
            requests_direct: self.requests_direct.load(Ordering::Relaxed),
            clarifications: self.clarifications.load(Ordering::Relaxed),
            requests_aborted: self.requests_aborted.load(Ordering::Relaxed),
            handoffs_followed: self.handoffs_followed.load(Ordering::Relaxed),
            stage_transitions: self.stage_transitions.load(Ordering::Relaxed),
            max_hops_observed: self.max_hops_observed.load(Ordering::Relaxed),
            average_routing_ms,
            handler_invocations: self
                .handler_invocations
                .lock()
                .map(|map| map.clone())
                .unwrap_or_default(),
            errors: self.errors.lock().map(|map| map.clone()).unwrap_or_default(),
        }
    }
}

/// Serializable metrics view
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_received: u64,
    pub requests_handled: u64,
    pub requests_direct: u64,
    pub clarifications: u64,
    pub requests_aborted: u64,
    pub handoffs_followed: u64,
    pub stage_transitions: u64,
    pub max_hops_observed: u64,
    pub average_routing_ms: f64,
    pub handler_invocations: BTreeMap<HandlerId, u64>,
    pub errors: BTreeMap<String, u64>,
}
