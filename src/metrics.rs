// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the tenant controller.
//!
//! All metrics use the namespace prefix `tenant_controller_` and live in a
//! registry owned by a [`MetricsRecorder`]. One recorder is created at startup
//! and shared (behind an `Arc`) by the reconciler, the leader elector and the
//! `/metrics` endpoint.
//!
//! # Metrics
//!
//! - `tenant_controller_added_namespaces` - namespaces actually created
//! - `tenant_controller_removed_namespaces` - namespaces actually deleted
//! - `tenant_controller_reconciliations_total{result}` - finished passes
//! - `tenant_controller_leader` - 1 while this replica holds the lease
//!
//! # Example
//!
//! ```rust
//! use tenant_controller::metrics::MetricsRecorder;
//!
//! let metrics = MetricsRecorder::new().unwrap();
//! metrics.record_namespace_added();
//! assert_eq!(metrics.added_namespaces(), 1);
//! ```

use crate::constants::METRICS_NAMESPACE;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Process-wide counters, owned explicitly instead of living in globals.
///
/// Counters only ever go up and are reset by restarting the process.
#[derive(Clone)]
pub struct MetricsRecorder {
    registry: Registry,
    added_namespaces: IntCounter,
    removed_namespaces: IntCounter,
    reconciliations: IntCounterVec,
    leader: IntGauge,
}

impl MetricsRecorder {
    /// Create a recorder with its own registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be constructed or registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let added_namespaces = IntCounter::with_opts(
            Opts::new("added_namespaces", "Number of added namespaces").namespace(METRICS_NAMESPACE),
        )?;
        let removed_namespaces = IntCounter::with_opts(
            Opts::new("removed_namespaces", "Number of removed namespaces")
                .namespace(METRICS_NAMESPACE),
        )?;
        let reconciliations = IntCounterVec::new(
            Opts::new(
                "reconciliations_total",
                "Total number of reconciliation passes by result",
            )
            .namespace(METRICS_NAMESPACE),
            &["result"],
        )?;
        let leader = IntGauge::with_opts(
            Opts::new(
                "leader",
                "Whether this replica currently holds the leader lease (1 = leader, 0 = standby)",
            )
            .namespace(METRICS_NAMESPACE),
        )?;

        registry.register(Box::new(added_namespaces.clone()))?;
        registry.register(Box::new(removed_namespaces.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(leader.clone()))?;

        Ok(Self {
            registry,
            added_namespaces,
            removed_namespaces,
            reconciliations,
            leader,
        })
    }

    /// Record one namespace actually created by the reconciler.
    pub fn record_namespace_added(&self) {
        self.added_namespaces.inc();
    }

    /// Record one namespace actually deleted by the reconciler.
    pub fn record_namespace_removed(&self) {
        self.removed_namespaces.inc();
    }

    /// Record the result of a reconciliation pass (`success`, `error`, `standby`).
    pub fn record_reconciliation(&self, result: &str) {
        self.reconciliations.with_label_values(&[result]).inc();
    }

    /// Record a leadership transition.
    pub fn set_leader(&self, is_leader: bool) {
        self.leader.set(i64::from(is_leader));
    }

    /// Current value of the added-namespace counter.
    #[must_use]
    pub fn added_namespaces(&self) -> u64 {
        self.added_namespaces.get()
    }

    /// Current value of the removed-namespace counter.
    #[must_use]
    pub fn removed_namespaces(&self) -> u64 {
        self.removed_namespaces.get()
    }

    /// Current count of reconciliation passes with the given result.
    #[must_use]
    pub fn reconciliations(&self, result: &str) -> u64 {
        self.reconciliations.with_label_values(&[result]).get()
    }

    /// Gather and encode all metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
    }
}
