// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lease-based leader election gating every mutation.
//!
//! Exactly one replica is active at a time. The [`LeaderElector`] drives a
//! [`LeaseBackend`] and publishes the current state on a `watch` channel; every
//! component holds a cheap [`LeaderGate`] clone and checks it:
//!
//! - before a reconciliation pass starts,
//! - before the sweep and the tombstone worker do any work,
//! - immediately before each attempt of a mutating API call.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │  Pod A (Leader) │     │  Pod B (Standby)│
//! │ reconciles      │     │ requeues keys   │
//! └────────┬────────┘     └────────┬────────┘
//!          │                       │
//!          ▼                       ▼
//!     ┌─────────────────────────────────┐
//!     │   Lease: 27475f02.example.com   │
//!     └─────────────────────────────────┘
//! ```
//!
//! Backend errors are never fatal: the replica drops to standby immediately,
//! backs off, and keeps trying to re-acquire the lease for as long as it runs.

use crate::constants::{LEASE_RETRY_INITIAL_MILLIS, LEASE_RETRY_MAX_SECS};
use crate::errors::{Error, Result};
use crate::metrics::MetricsRecorder;
use crate::retry::lease_backoff;
use crate::shutdown::{self, ShutdownSignal};
use async_trait::async_trait;
use kube::Client;
use kube_lease_manager::{LeaseManager, LeaseManagerBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Read-only view of this replica's leadership.
#[derive(Clone, Debug)]
pub struct LeaderGate {
    state: watch::Receiver<bool>,
}

impl LeaderGate {
    /// A gate that is permanently active, used when leader election is disabled.
    #[must_use]
    pub fn always_leader() -> Self {
        let (_tx, state) = watch::channel(true);
        Self { state }
    }

    /// A gate flipped by hand through the returned sender.
    #[cfg(test)]
    pub(crate) fn manual(active: bool) -> (watch::Sender<bool>, Self) {
        let (tx, state) = watch::channel(active);
        (tx, Self { state })
    }

    /// Whether this replica may mutate cluster state right now.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait for the next leadership transition and return the new state.
    ///
    /// Returns `None` once the elector has stopped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow_and_update())
    }

    /// Wait until this replica is active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeadershipLost`] if the elector stopped while inactive.
    pub async fn wait_for_leadership(&mut self) -> Result<()> {
        self.state
            .wait_for(|active| *active)
            .await
            .map(|_| ())
            .map_err(|_| Error::LeadershipLost)
    }

    /// Fail with [`Error::LeadershipLost`] unless currently active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeadershipLost`] when inactive.
    pub fn ensure_leader(&self) -> Result<()> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(Error::LeadershipLost)
        }
    }
}

/// A distributed lease as seen by one replica.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Keep acquiring or renewing the lease and return as soon as the held
    /// state differs from the previously returned one.
    async fn changed(&self) -> Result<bool>;

    /// Give the lease up so another replica can take over without waiting
    /// for expiry.
    async fn release(&self) -> Result<()>;
}

/// Lease coordinates and timings.
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    /// Name of the `coordination.k8s.io/v1` Lease object
    pub lease_name: String,
    /// Namespace holding the Lease
    pub namespace: String,
    /// Holder identity of this replica
    pub identity: String,
    /// Lease duration in seconds
    pub duration_secs: u64,
    /// Seconds before expiry at which renewal starts
    pub grace_secs: u64,
}

/// [`LeaseBackend`] backed by a Kubernetes Lease via `kube-lease-manager`.
///
/// The manager is built lazily and discarded after any error, so the next
/// call starts from a clean "not leader" state and re-reads the Lease.
pub struct KubeLeaseBackend {
    client: Client,
    settings: LeaseSettings,
    manager: Mutex<Option<Arc<LeaseManager>>>,
}

impl KubeLeaseBackend {
    /// Create a backend; no API call is made until the first `changed()`.
    #[must_use]
    pub fn new(client: Client, settings: LeaseSettings) -> Self {
        Self {
            client,
            settings,
            manager: Mutex::new(None),
        }
    }

    async fn manager(&self) -> Result<Arc<LeaseManager>> {
        let mut slot = self.manager.lock().await;
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }

        let manager = LeaseManagerBuilder::new(self.client.clone(), &self.settings.lease_name)
            .with_namespace(&self.settings.namespace)
            .with_identity(&self.settings.identity)
            .with_duration(self.settings.duration_secs)
            .with_grace(self.settings.grace_secs)
            .build()
            .await
            .map_err(|e| Error::Lease(e.to_string()))?;
        let manager = Arc::new(manager);
        *slot = Some(manager.clone());
        Ok(manager)
    }
}

#[async_trait]
impl LeaseBackend for KubeLeaseBackend {
    async fn changed(&self) -> Result<bool> {
        let manager = self.manager().await?;
        match manager.changed().await {
            Ok(state) => Ok(state),
            Err(e) => {
                self.manager.lock().await.take();
                Err(Error::Lease(e.to_string()))
            }
        }
    }

    async fn release(&self) -> Result<()> {
        let Some(manager) = self.manager.lock().await.take() else {
            return Ok(());
        };
        manager
            .release()
            .await
            .map_err(|e| Error::Lease(e.to_string()))
    }
}

/// Drives a [`LeaseBackend`] and publishes leadership to [`LeaderGate`]s.
pub struct LeaderElector<B> {
    backend: B,
    identity: String,
    state: watch::Sender<bool>,
    metrics: Arc<MetricsRecorder>,
    retry_initial: Duration,
    retry_max: Duration,
}

impl<B: LeaseBackend> LeaderElector<B> {
    /// Create an elector starting in standby, plus the gate it controls.
    pub fn new(
        backend: B,
        identity: impl Into<String>,
        metrics: Arc<MetricsRecorder>,
    ) -> (Self, LeaderGate) {
        let (state, rx) = watch::channel(false);
        metrics.set_leader(false);
        let elector = Self {
            backend,
            identity: identity.into(),
            state,
            metrics,
            retry_initial: Duration::from_millis(LEASE_RETRY_INITIAL_MILLIS),
            retry_max: Duration::from_secs(LEASE_RETRY_MAX_SECS),
        };
        (elector, LeaderGate { state: rx })
    }

    /// Override the backoff used after backend errors.
    #[must_use]
    pub fn with_retry(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial = initial;
        self.retry_max = max;
        self
    }

    /// Another gate for the same elector.
    #[must_use]
    pub fn gate(&self) -> LeaderGate {
        LeaderGate {
            state: self.state.subscribe(),
        }
    }

    /// Run until shutdown, then step down and release the lease.
    pub async fn run(self, mut shutdown_signal: ShutdownSignal) {
        info!(identity = %self.identity, "Starting leader election");
        let mut backoff = lease_backoff(self.retry_initial, self.retry_max);

        loop {
            tokio::select! {
                () = shutdown::wait(&mut shutdown_signal) => break,
                result = self.backend.changed() => match result {
                    Ok(active) => {
                        backoff.reset();
                        self.set_leader(active);
                    }
                    Err(e) => {
                        self.set_leader(false);
                        let delay = backoff.next_backoff().unwrap_or(self.retry_max);
                        warn!(
                            identity = %self.identity,
                            error = %e,
                            retry_after = ?delay,
                            "Lease acquisition failed, staying in standby"
                        );
                        tokio::select! {
                            () = shutdown::wait(&mut shutdown_signal) => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }
        }

        self.set_leader(false);
        match self.backend.release().await {
            Ok(()) => info!(identity = %self.identity, "Released leader lease"),
            Err(e) => warn!(identity = %self.identity, error = %e, "Failed to release leader lease"),
        }
    }

    fn set_leader(&self, active: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
        if !changed {
            debug!(identity = %self.identity, active, "Leadership unchanged");
            return;
        }

        self.metrics.set_leader(active);
        if active {
            info!(identity = %self.identity, "Leadership acquired, reconciliation enabled");
        } else {
            info!(identity = %self.identity, "Leadership lost, entering standby");
        }
    }
}

#[cfg(test)]
#[path = "leader_tests.rs"]
mod leader_tests;
