// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for `Tenant` resources.
//!
//! Conditions follow the standard Kubernetes format:
//! - `type`: the aspect being reported (`Ready`)
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: a programmatic identifier (CamelCase)
//! - `message`: a human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last status flip
//!
//! The reconciler builds the status it wants with [`desired_status`] and only
//! patches when [`status_changed`] says so, so a converged tenant costs no
//! writes.

use crate::constants::{CONDITION_READY, REASON_CONVERGED, REASON_RECONCILE_FAILED};
use crate::crd::{Condition, Tenant, TenantStatus};
use crate::errors::Error;
use chrono::Utc;
use std::collections::BTreeSet;

/// Create a new condition with the current timestamp.
///
/// # Example
///
/// ```rust
/// use tenant_controller::status::create_condition;
///
/// let condition = create_condition("Ready", "True", "Converged", "2 namespaces exist");
/// assert_eq!(condition.r#type, "Ready");
/// assert!(condition.last_transition_time.is_some());
/// ```
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Check if a condition has changed compared to the existing one.
///
/// Type, status, reason and message are compared; `lastTransitionTime` is not.
#[must_use]
pub fn condition_changed(existing: Option<&Condition>, new_condition: &Condition) -> bool {
    match existing {
        Some(current) => {
            current.r#type != new_condition.r#type
                || current.status != new_condition.status
                || current.reason != new_condition.reason
                || current.message != new_condition.message
        }
        None => true,
    }
}

/// Last transition time of `condition_type` if its status is still `status`,
/// otherwise the current time.
#[must_use]
pub fn get_last_transition_time(
    existing_conditions: &[Condition],
    condition_type: &str,
    status: &str,
) -> String {
    existing_conditions
        .iter()
        .find(|c| c.r#type == condition_type && c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .unwrap_or_else(|| Utc::now().to_rfc3339())
}

/// Status describing the outcome of a pass over `tenant`.
///
/// `owned` is the owned set after the pass; `failure` the error the pass
/// reported, if any.
#[must_use]
pub fn desired_status(
    tenant: &Tenant,
    owned: &BTreeSet<String>,
    failure: Option<&Error>,
) -> TenantStatus {
    let (status, reason, message) = match failure {
        None => (
            "True",
            REASON_CONVERGED,
            format!("All {} desired namespaces exist", tenant.desired_namespaces().len()),
        ),
        Some(err) => ("False", REASON_RECONCILE_FAILED, err.to_string()),
    };

    let existing = tenant
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();

    let mut condition = create_condition(CONDITION_READY, status, reason, &message);
    condition.last_transition_time =
        Some(get_last_transition_time(existing, CONDITION_READY, status));

    TenantStatus {
        conditions: vec![condition],
        observed_generation: tenant.metadata.generation,
        namespaces: owned.iter().cloned().collect(),
    }
}

/// Whether `new` differs from the tenant's current status in anything but
/// timestamps.
#[must_use]
pub fn status_changed(current: Option<&TenantStatus>, new: &TenantStatus) -> bool {
    let Some(current) = current else {
        return true;
    };
    if current.observed_generation != new.observed_generation
        || current.namespaces != new.namespaces
        || current.conditions.len() != new.conditions.len()
    {
        return true;
    }
    new.conditions.iter().any(|condition| {
        let existing = current
            .conditions
            .iter()
            .find(|c| c.r#type == condition.r#type);
        condition_changed(existing, condition)
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
