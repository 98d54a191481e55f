// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tenant reconciliation: converge owned namespaces to the desired set.
//!
//! Given a tenant key, one pass:
//!
//! 1. checks leadership and aborts with [`Error::LeadershipLost`] if inactive;
//! 2. reads the tenant. A missing tenant is a tombstone: every namespace still
//!    labeled as owned by it is deleted;
//! 3. rejects a tenant whose name cannot be a label value, with a failed
//!    `Ready` condition and a Warning event;
//! 4. otherwise compares the desired set `D` with the owned set `C`, creates
//!    `D \ C`, deletes `C \ D` and leaves `C ∩ D` alone;
//! 5. writes the tenant status when it changed.
//!
//! Leadership is checked again right before every attempt of a mutating call,
//! retries included, because the lease can be revoked while the pass is
//! running. Namespace failures do not
//! stop the remaining namespaces; the most urgent one is returned at the end.
//!
//! Running a pass twice in a row changes nothing the second time: every
//! namespace already matches and the status is unchanged.

use crate::cluster::{CreateOutcome, DeleteOutcome};
use crate::constants::REASON_RECONCILE_FAILED;
use crate::context::Context;
use crate::crd::Tenant;
use crate::errors::{Error, Result};
use crate::labels::{is_valid_tenant_name, MAX_LABEL_VALUE_LEN};
use crate::retry::retry_mutation;
use crate::status::{desired_status, status_changed};
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// What a successful pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The tenant exists and its owned set now equals the desired set
    Converged {
        /// Namespaces created by this pass
        created: usize,
        /// Namespaces deleted by this pass
        deleted: usize,
    },
    /// The tenant is gone and its leftover namespaces were deleted
    Removed {
        /// Namespaces deleted by this pass
        deleted: usize,
    },
}

/// Namespace changes needed to converge a tenant.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NamespacePlan {
    /// `D \ C`
    pub to_create: Vec<String>,
    /// `C \ D`
    pub to_delete: Vec<String>,
}

impl NamespacePlan {
    /// Whether the tenant has already converged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the namespaces to create and to delete.
#[must_use]
pub fn plan(desired: &BTreeSet<String>, owned: &BTreeSet<String>) -> NamespacePlan {
    NamespacePlan {
        to_create: desired.difference(owned).cloned().collect(),
        to_delete: owned.difference(desired).cloned().collect(),
    }
}

/// Reconcile the tenant named `key`.
///
/// # Errors
///
/// Returns [`Error::LeadershipLost`] if leadership is missing at the start or
/// lost before a mutation, otherwise the most urgent API error of the pass.
pub async fn reconcile(ctx: &Context, key: &str) -> Result<ReconcileOutcome> {
    ctx.gate.ensure_leader()?;

    match ctx.cluster.get_tenant(key).await? {
        Some(tenant) => converge(ctx, &tenant).await,
        None => remove_leftovers(ctx, key).await,
    }
}

async fn converge(ctx: &Context, tenant: &Tenant) -> Result<ReconcileOutcome> {
    let name = tenant.name_any();
    if !is_valid_tenant_name(&name) {
        return reject_tenant_name(ctx, tenant, &name).await;
    }

    let owned = ctx.cluster.list_owned_namespaces(&name).await?;
    let plan = plan(&tenant.desired_namespaces(), &owned);

    debug!(
        tenant = %name,
        generation = ?tenant.metadata.generation,
        to_create = ?plan.to_create,
        to_delete = ?plan.to_delete,
        "Computed namespace plan"
    );

    let mut now_owned = owned;
    let mut failure = None;
    let (mut created, mut deleted) = (0, 0);

    for namespace in &plan.to_create {
        match create_namespace(ctx, tenant, namespace).await {
            Ok(CreateOutcome::Created) => {
                created += 1;
                now_owned.insert(namespace.clone());
            }
            Ok(CreateOutcome::AlreadyExists) => {}
            Err(Error::LeadershipLost) => return Err(Error::LeadershipLost),
            Err(e) => failure = more_urgent(failure, e, &name),
        }
    }

    for namespace in &plan.to_delete {
        match delete_namespace(ctx, namespace).await {
            Ok(outcome) => {
                if outcome == DeleteOutcome::Deleted {
                    deleted += 1;
                }
                now_owned.remove(namespace);
            }
            Err(Error::LeadershipLost) => return Err(Error::LeadershipLost),
            Err(e) => failure = more_urgent(failure, e, &name),
        }
    }

    if let Err(e) = sync_status(ctx, tenant, &now_owned, failure.as_ref()).await {
        if matches!(e, Error::LeadershipLost) {
            return Err(e);
        }
        failure = more_urgent(failure, e, &name);
    }

    if let Some(err) = failure {
        if !err.is_retryable() {
            publish_failure(ctx, tenant, &err).await;
        }
        return Err(err);
    }

    if !plan.is_empty() {
        info!(tenant = %name, created, deleted, "Tenant namespaces converged");
    }
    Ok(ReconcileOutcome::Converged { created, deleted })
}

/// Fail a tenant whose name cannot label its namespaces. Nothing is created.
async fn reject_tenant_name(ctx: &Context, tenant: &Tenant, name: &str) -> Result<ReconcileOutcome> {
    let err = Error::Invalid {
        operation: format!("reconcile tenant {name}"),
        message: format!(
            "tenant name must be a valid label value of at most {MAX_LABEL_VALUE_LEN} characters"
        ),
    };
    warn!(tenant = name, "Tenant name cannot be used as an owner label");

    if let Err(e) = sync_status(ctx, tenant, &BTreeSet::new(), Some(&err)).await {
        if matches!(e, Error::LeadershipLost) {
            return Err(e);
        }
        warn!(tenant = name, error = %e, "Failed to record rejected tenant name");
    }
    publish_failure(ctx, tenant, &err).await;
    Err(err)
}

async fn remove_leftovers(ctx: &Context, name: &str) -> Result<ReconcileOutcome> {
    let leftovers = ctx.cluster.list_owned_namespaces(name).await?;
    if leftovers.is_empty() {
        debug!(tenant = name, "Tenant not found and owns no namespaces");
        return Ok(ReconcileOutcome::Removed { deleted: 0 });
    }

    info!(tenant = name, count = leftovers.len(), "Tenant gone, removing its namespaces");
    let mut failure = None;
    let mut deleted = 0;

    for namespace in &leftovers {
        match delete_namespace(ctx, namespace).await {
            Ok(DeleteOutcome::Deleted) => deleted += 1,
            Ok(DeleteOutcome::NotFound) => {}
            Err(Error::LeadershipLost) => return Err(Error::LeadershipLost),
            Err(e) => failure = more_urgent(failure, e, name),
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(ReconcileOutcome::Removed { deleted }),
    }
}

async fn create_namespace(ctx: &Context, tenant: &Tenant, namespace: &str) -> Result<CreateOutcome> {
    let outcome = retry_mutation(&ctx.gate, &format!("create namespace {namespace}"), || {
        ctx.cluster.create_namespace(namespace, tenant)
    })
    .await?;
    match outcome {
        CreateOutcome::Created => {
            ctx.metrics.record_namespace_added();
            info!(tenant = %tenant.name_any(), namespace, "Created namespace");
        }
        CreateOutcome::AlreadyExists => {
            debug!(tenant = %tenant.name_any(), namespace, "Namespace already exists");
        }
    }
    Ok(outcome)
}

async fn delete_namespace(ctx: &Context, namespace: &str) -> Result<DeleteOutcome> {
    let outcome = retry_mutation(&ctx.gate, &format!("delete namespace {namespace}"), || {
        ctx.cluster.delete_namespace(namespace)
    })
    .await?;
    match outcome {
        DeleteOutcome::Deleted => {
            ctx.metrics.record_namespace_removed();
            info!(namespace, "Deleted namespace");
        }
        DeleteOutcome::NotFound => debug!(namespace, "Namespace already gone"),
    }
    Ok(outcome)
}

async fn sync_status(
    ctx: &Context,
    tenant: &Tenant,
    owned: &BTreeSet<String>,
    failure: Option<&Error>,
) -> Result<()> {
    let status = desired_status(tenant, owned, failure);
    if !status_changed(tenant.status.as_ref(), &status) {
        return Ok(());
    }
    let name = tenant.name_any();
    retry_mutation(&ctx.gate, &format!("update status of tenant {name}"), || {
        ctx.cluster.update_tenant_status(&name, &status)
    })
    .await
}

async fn publish_failure(ctx: &Context, tenant: &Tenant, err: &Error) {
    if !ctx.gate.is_leader() {
        return;
    }
    ctx.cluster
        .publish_warning(tenant, REASON_RECONCILE_FAILED, format!("{}: {err}", err.reason()))
        .await;
}

/// Keep whichever error is more urgent; the first one wins ties.
fn more_urgent(current: Option<Error>, new: Error, tenant: &str) -> Option<Error> {
    warn!(tenant, error = %new, reason = new.reason(), "Namespace operation failed");
    match current {
        Some(current) if current.urgency() >= new.urgency() => Some(current),
        _ => Some(new),
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod reconciler_tests;
