// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller runtime built on `kube::runtime::Controller`.
//!
//! ```text
//!  Tenant watch ─────────────┐
//!  owned Namespace watch ────┼──► Controller (N concurrent) ──► reconcile()
//!  periodic sweep (resync) ──┘          │
//!                                       │ ObjectNotFound
//!  Tenant delete events ─────┐          ▼
//!  sweep orphans ────────────┴──► tombstone worker ──► reconcile()
//! ```
//!
//! The controller's scheduler deduplicates keys and never runs two passes
//! over the same tenant at once. Deleted tenants are gone from its cache, so
//! their leftover namespaces are handled by a separate tombstone worker. Both
//! claim a tenant in [`InFlight`] before a pass, so the two never overlap on
//! one tenant either.
//!
//! What happens to a tenant after a pass depends on how it ended:
//!
//! | result                 | next pass                              |
//! |------------------------|----------------------------------------|
//! | success                | on the next change, backoff forgotten  |
//! | standby                | requeued after a short delay           |
//! | retryable error        | requeued with per-tenant backoff       |
//! | non-retryable error    | on the next change or sweep            |
//! | leadership lost        | requeued after a short delay           |

use crate::constants::{REQUEUE_BASE_DELAY_MILLIS, STANDBY_REQUEUE_SECS};
use crate::context::Context;
use crate::crd::Tenant;
use crate::errors::{Error, Result};
use crate::event_source;
use crate::labels::any_owner_selector;
use crate::reconciler::{reconcile, ReconcileOutcome};
use crate::shutdown::{self, ShutdownSignal};
use crate::sweep::{PeriodicRunner, SweepTargets};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Metric label for a pass that converged
pub const RESULT_SUCCESS: &str = "success";

/// Metric label for a pass that failed
pub const RESULT_ERROR: &str = "error";

/// Metric label for a pass aborted because leadership was lost
pub const RESULT_STANDBY: &str = "standby";

/// Tunables of the controller runtime.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Maximum number of tenants reconciled concurrently
    pub workers: usize,
    /// Interval between full sweeps
    pub sweep_interval: Duration,
}

/// Tenants with a pass in progress.
#[derive(Debug, Default)]
pub struct InFlight(Mutex<HashSet<String>>);

/// Releases a claimed tenant when dropped.
pub struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    key: String,
}

impl InFlight {
    /// Claim `key`; `None` while another pass over it is running.
    pub fn claim(&self, key: &str) -> Option<InFlightGuard<'_>> {
        let mut keys = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        keys.insert(key.to_string()).then(|| InFlightGuard {
            in_flight: self,
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

fn busy_delay() -> Duration {
    Duration::from_millis(REQUEUE_BASE_DELAY_MILLIS)
}

/// Run the tenant controller, the tombstone worker and the periodic sweep
/// until shutdown.
pub async fn run(
    client: Client,
    ctx: Arc<Context>,
    settings: ControllerSettings,
    shutdown_signal: ShutdownSignal,
) {
    let (resync_tx, resync_rx) = futures::channel::mpsc::unbounded();
    let (tombstone_tx, tombstone_rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();

    tasks.spawn(event_source::pump(
        event_source::tenant_deletions(client.clone()),
        tombstone_tx.clone(),
        shutdown_signal.clone(),
    ));
    tasks.spawn(run_tombstones(
        ctx.clone(),
        tombstone_tx.clone(),
        tombstone_rx,
        shutdown_signal.clone(),
    ));

    let sweeper = Arc::new(PeriodicRunner::new(
        ctx.clone(),
        SweepTargets {
            resync: resync_tx,
            tombstones: tombstone_tx.clone(),
        },
        settings.sweep_interval,
    ));
    tasks.spawn(sweeper.run(shutdown_signal.clone()));

    // The controller needs a Sync shutdown future; bridge the watch channel.
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut stop = shutdown_signal;
    tasks.spawn(async move {
        shutdown::wait(&mut stop).await;
        let _ = stop_tx.send(());
    });

    let concurrency = u16::try_from(settings.workers.max(1)).unwrap_or(u16::MAX);
    info!(concurrency, "Controller started");

    Controller::new(Api::<Tenant>::all(client.clone()), watcher::Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .watches(
            Api::<Namespace>::all(client),
            watcher::Config::default().labels(&any_owner_selector()),
            event_source::tenant_for_namespace,
        )
        .reconcile_all_on(resync_rx)
        .graceful_shutdown_on(stop_rx.map(|_| ()))
        .run(reconcile_tenant, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok((tenant, _)) => debug!(tenant = %tenant.name, "Reconcile finished"),
                Err(controller::Error::ObjectNotFound(tenant)) => {
                    debug!(tenant = %tenant.name, "Owner of namespaces is gone, queueing tombstone");
                    let _ = tombstone_tx.send(tenant.name.clone());
                }
                Err(controller::Error::ReconcilerFailed(e, tenant)) => {
                    debug!(tenant = %tenant.name, error = %e, "Reconcile failed");
                }
                Err(e) => warn!(error = %e, "Controller stream error"),
            }
            futures::future::ready(())
        })
        .await;

    info!("Shutdown requested, stopping controller");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Controller task panicked");
        }
    }
    info!("Controller stopped");
}

/// Reconcile wrapper handed to the controller.
///
/// A standby replica changes nothing and looks at the tenant again shortly,
/// so that keys are not lost while another replica leads.
pub(crate) async fn reconcile_tenant(tenant: Arc<Tenant>, ctx: Arc<Context>) -> Result<Action> {
    let name = tenant.name_any();
    if !ctx.gate.is_leader() {
        debug!(tenant = %name, "Standby replica, deferring tenant");
        return Ok(Action::requeue(Duration::from_secs(STANDBY_REQUEUE_SECS)));
    }

    let Some(_claim) = ctx.in_flight.claim(&name) else {
        debug!(tenant = %name, "Tombstone pass in progress, deferring tenant");
        return Ok(Action::requeue(busy_delay()));
    };

    let result = reconcile(&ctx, &name).await;
    record_outcome(&ctx, &name, &result);
    result.map(|_| Action::await_change())
}

/// Requeue policy for failed passes.
pub(crate) fn error_policy(tenant: Arc<Tenant>, err: &Error, ctx: Arc<Context>) -> Action {
    let name = tenant.name_any();
    match err {
        Error::LeadershipLost => Action::requeue(Duration::from_secs(STANDBY_REQUEUE_SECS)),
        e if e.is_retryable() => {
            let retry_after = ctx.requeue.next_delay(&name);
            warn!(
                tenant = %name,
                error = %e,
                attempts = ctx.requeue.failures(&name),
                ?retry_after,
                "Reconciliation failed, requeueing"
            );
            Action::requeue(retry_after)
        }
        e => {
            ctx.requeue.forget(&name);
            error!(
                tenant = %name,
                error = %e,
                reason = e.reason(),
                "Reconciliation failed permanently, leaving tenant for the next sweep"
            );
            Action::await_change()
        }
    }
}

fn record_outcome(ctx: &Context, name: &str, result: &Result<ReconcileOutcome>) {
    match result {
        Ok(outcome) => {
            ctx.requeue.forget(name);
            ctx.metrics.record_reconciliation(RESULT_SUCCESS);
            debug!(tenant = name, ?outcome, "Reconciliation succeeded");
        }
        Err(Error::LeadershipLost) => {
            ctx.metrics.record_reconciliation(RESULT_STANDBY);
            info!(tenant = name, "Leadership lost, deferring tenant until re-elected");
        }
        Err(_) => ctx.metrics.record_reconciliation(RESULT_ERROR),
    }
}

/// Remove namespaces left behind by deleted tenants.
///
/// Names arrive from tenant delete events, from the controller when a
/// namespace points at a tenant it does not know, and from the sweep. Work is
/// only done while this replica leads; names received on standby wait.
pub(crate) async fn run_tombstones(
    ctx: Arc<Context>,
    requeue: mpsc::UnboundedSender<String>,
    mut names: mpsc::UnboundedReceiver<String>,
    mut stop: ShutdownSignal,
) {
    let mut gate = ctx.gate.clone();
    let mut pending = BTreeSet::new();
    debug!("Tombstone worker started");

    loop {
        if pending.is_empty() {
            tokio::select! {
                () = shutdown::wait(&mut stop) => break,
                name = names.recv() => match name {
                    Some(name) => {
                        pending.insert(name);
                    }
                    None => break,
                },
            }
        }
        while let Ok(name) = names.try_recv() {
            pending.insert(name);
        }

        tokio::select! {
            () = shutdown::wait(&mut stop) => break,
            active = gate.wait_for_leadership() => {
                if active.is_err() {
                    debug!("Leader elector stopped");
                    break;
                }
            }
        }

        let Some(name) = pending.pop_first() else {
            continue;
        };
        let Some(claim) = ctx.in_flight.claim(&name) else {
            debug!(tenant = %name, "Tenant pass in progress, deferring tombstone");
            requeue_after(&requeue, name, busy_delay());
            continue;
        };
        let result = tokio::select! {
            () = shutdown::wait(&mut stop) => break,
            result = reconcile(&ctx, &name) => result,
        };
        drop(claim);
        record_outcome(&ctx, &name, &result);

        match result {
            Ok(_) => {}
            Err(Error::LeadershipLost) => {
                pending.insert(name);
            }
            Err(e) if e.is_retryable() => {
                let delay = ctx.requeue.next_delay(&name);
                warn!(tenant = %name, error = %e, retry_after = ?delay, "Tombstone failed, requeueing");
                requeue_after(&requeue, name, delay);
            }
            Err(e) => {
                ctx.requeue.forget(&name);
                error!(tenant = %name, error = %e, "Tombstone failed, leaving it for the next sweep");
            }
        }
    }

    debug!("Tombstone worker stopped");
}

fn requeue_after(requeue: &mpsc::UnboundedSender<String>, name: String, delay: Duration) {
    let requeue = requeue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = requeue.send(name);
    });
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
