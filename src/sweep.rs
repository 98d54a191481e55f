// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Periodic full sweep over all tenants.
//!
//! Watches can miss events (a tenant deleted while no replica was leading, a
//! watch gap during re-list), so on a fixed interval the active replica:
//!
//! - asks the controller to reconcile every cached tenant, and
//! - hands the owner of every labeled namespace whose tenant no longer
//!   exists to the tombstone worker.
//!
//! A tick that fires while the previous sweep is still listing is dropped
//! rather than queued. Ticks on a standby replica do nothing; a sweep also
//! runs as soon as the replica becomes active.

use crate::context::Context;
use crate::shutdown::{self, ShutdownSignal};
use futures::channel::mpsc::UnboundedSender;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Result of one sweep tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The sweep ran over this many tenants and tombstones
    Enqueued(usize),
    /// A previous sweep was still running
    Skipped,
    /// This replica is not the leader
    Standby,
    /// Listing failed; nothing was enqueued
    Failed,
}

/// Where a sweep sends its work.
pub struct SweepTargets {
    /// Triggers a pass over every tenant in the controller's cache
    pub resync: UnboundedSender<()>,
    /// Receives owners of namespaces whose tenant is gone
    pub tombstones: tokio::sync::mpsc::UnboundedSender<String>,
}

/// Drives full sweeps on a fixed interval.
pub struct PeriodicRunner {
    ctx: Arc<Context>,
    targets: SweepTargets,
    interval: Duration,
    running: AtomicBool,
}

/// Clears the running flag when the sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PeriodicRunner {
    #[must_use]
    pub fn new(ctx: Arc<Context>, targets: SweepTargets, interval: Duration) -> Self {
        Self {
            ctx,
            targets,
            interval,
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep now.
    pub async fn tick(&self) -> SweepOutcome {
        if !self.ctx.gate.is_leader() {
            debug!("Standby replica, skipping sweep");
            return SweepOutcome::Standby;
        }
        let Some(_guard) = SweepGuard::acquire(&self.running) else {
            debug!("Previous sweep still running, skipping tick");
            return SweepOutcome::Skipped;
        };

        let tenants = match self.ctx.cluster.list_tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(error = %e, "Sweep failed to list tenants");
                return SweepOutcome::Failed;
            }
        };
        let owners = match self.ctx.cluster.list_namespace_owners().await {
            Ok(owners) => owners,
            Err(e) => {
                warn!(error = %e, "Sweep failed to list tenant namespaces");
                return SweepOutcome::Failed;
            }
        };

        let tenants: BTreeSet<String> = tenants.into_iter().collect();
        let orphans: Vec<String> = owners.difference(&tenants).cloned().collect();

        if self.targets.resync.unbounded_send(()).is_err() {
            debug!("Controller stopped, resync dropped");
        }
        for owner in &orphans {
            if self.targets.tombstones.send(owner.clone()).is_err() {
                debug!(tenant = %owner, "Tombstone worker stopped, orphan dropped");
            }
        }

        info!(tenants = tenants.len(), orphans = orphans.len(), "Sweep enqueued tenants");
        SweepOutcome::Enqueued(tenants.len() + orphans.len())
    }

    /// Tick every interval until shutdown.
    ///
    /// Each tick runs in its own task so that a slow sweep cannot delay the
    /// clock; overlapping ticks are skipped by [`PeriodicRunner::tick`].
    pub async fn run(self: Arc<Self>, mut shutdown_signal: ShutdownSignal) {
        info!(interval = ?self.interval, "Starting periodic sweep");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut gate = self.ctx.gate.clone();
        let mut elector_alive = true;

        loop {
            tokio::select! {
                () = shutdown::wait(&mut shutdown_signal) => break,
                _ = ticker.tick() => self.spawn_tick(),
                change = gate.changed(), if elector_alive => match change {
                    Some(true) => self.spawn_tick(),
                    Some(false) => {}
                    None => elector_alive = false,
                },
            }
        }

        info!("Periodic sweep stopped");
    }

    fn spawn_tick(self: &Arc<Self>) {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.tick().await;
        });
    }
}

#[cfg(test)]
#[path = "sweep_tests.rs"]
mod sweep_tests;
