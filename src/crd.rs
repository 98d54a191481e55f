// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for tenant management.
//!
//! # Resource Types
//!
//! - [`Tenant`] - A cluster-scoped declaration of the namespaces a tenant owns
//!
//! # Example: Declaring a Tenant
//!
//! ```rust
//! use tenant_controller::crd::{Tenant, TenantSpec};
//!
//! let tenant = Tenant::new(
//!     "acme",
//!     TenantSpec {
//!         namespaces: vec!["acme-dev".to_string(), "acme-prod".to_string()],
//!     },
//! );
//! assert_eq!(tenant.desired_namespaces().len(), 2);
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::CONDITION_READY;

/// Standard Kubernetes condition reported in a resource's status.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. The controller only reports `Ready`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// `Tenant` declares the set of namespaces that must exist for one tenant.
///
/// The controller creates every listed namespace, labels it with
/// `multitenancy.example.com/tenant=<name>`, and deletes labeled namespaces
/// that are no longer listed. Deleting the Tenant deletes all of them.
///
/// # Example
///
/// ```yaml
/// apiVersion: multitenancy.example.com/v1
/// kind: Tenant
/// metadata:
///   name: acme
/// spec:
///   namespaces:
///     - acme-dev
///     - acme-prod
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "multitenancy.example.com",
    version = "v1",
    kind = "Tenant",
    shortname = "tn",
    doc = "Tenant declares a set of namespaces that the tenant controller keeps in existence."
)]
#[kube(status = "TenantStatus")]
#[kube(
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Names of the namespaces that must exist for this tenant.
    ///
    /// Admission guarantees the list is non-empty and free of duplicates.
    #[schemars(
        length(min = 1),
        extend("uniqueItems" = true),
        inner(length(min = 1, max = 63), regex(pattern = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$"))
    )]
    pub namespaces: Vec<String>,
}

/// `Tenant` status, written only by the controller.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// Current conditions; the controller maintains a single `Ready` condition.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation of the spec that was last reconciled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Namespaces owned by the tenant after the last reconciliation pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl Tenant {
    /// The desired namespace set `D`.
    #[must_use]
    pub fn desired_namespaces(&self) -> BTreeSet<String> {
        self.spec.namespaces.iter().cloned().collect()
    }

    /// The `Ready` condition from status, if reported.
    #[must_use]
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.r#type == CONDITION_READY))
    }
}
