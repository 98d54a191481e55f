// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the reconciler, the sweep and the controller.
//!
//! Every component receives an `Arc<Context>` holding:
//! - the cluster API seam
//! - the metrics recorder
//! - the leadership gate
//! - the per-tenant requeue backoff
//! - the set of tenants with a pass in progress

use crate::cluster::ClusterApi;
use crate::controller::InFlight;
use crate::leader::LeaderGate;
use crate::metrics::MetricsRecorder;
use crate::retry::RequeueBackoff;
use std::sync::Arc;

/// Shared context passed to all controller components.
pub struct Context {
    /// Cluster API used for every read and mutation
    pub cluster: Arc<dyn ClusterApi>,

    /// Namespace counters and reconciliation results
    pub metrics: Arc<MetricsRecorder>,

    /// Leadership of this replica, checked before every mutation
    pub gate: LeaderGate,

    /// Delays before failed tenants are reconciled again
    pub requeue: RequeueBackoff,

    /// Tenants currently being reconciled
    pub in_flight: InFlight,
}

impl Context {
    /// Bundle the shared handles.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        metrics: Arc<MetricsRecorder>,
        gate: LeaderGate,
    ) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            metrics,
            gate,
            requeue: RequeueBackoff::default(),
            in_flight: InFlight::default(),
        })
    }
}
