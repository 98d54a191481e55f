// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Label constants and helpers for namespaces owned by a `Tenant`.
//!
//! Ownership is expressed with a single label whose value is the tenant name.
//! The same label drives the namespace watch selector, the owned-set listing
//! and the namespace-to-tenant event mapping.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for `app.kubernetes.io/managed-by` on namespaces created by this controller
pub const MANAGED_BY_TENANT_CONTROLLER: &str = "tenant-controller";

// ============================================================================
// Tenant-Specific Labels
// ============================================================================

/// Label linking a namespace to the `Tenant` that owns it
pub const TENANT_OWNER_LABEL: &str = "multitenancy.example.com/tenant";

/// Longest value Kubernetes accepts for a label
pub const MAX_LABEL_VALUE_LEN: usize = 63;

/// Label selector matching every namespace owned by any tenant
#[must_use]
pub fn any_owner_selector() -> String {
    TENANT_OWNER_LABEL.to_string()
}

/// Label selector matching the namespaces owned by one tenant
#[must_use]
pub fn owner_selector(tenant: &str) -> String {
    format!("{TENANT_OWNER_LABEL}={tenant}")
}

/// Labels stamped on a namespace created for `tenant`
#[must_use]
pub fn owned_namespace_labels(tenant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TENANT_OWNER_LABEL.to_string(), tenant.to_string()),
        (
            K8S_MANAGED_BY.to_string(),
            MANAGED_BY_TENANT_CONTROLLER.to_string(),
        ),
    ])
}

/// Check whether a tenant name can be stored in the ownership label.
///
/// Tenant names are RFC 1123 subdomains (lowercase alphanumerics, `-` and
/// `.`, starting and ending alphanumeric). The API server accepts up to 253
/// characters, but a label value holds at most [`MAX_LABEL_VALUE_LEN`], so
/// longer names are rejected here: such a tenant cannot own namespaces.
#[must_use]
pub fn is_valid_tenant_name(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_LABEL_VALUE_LEN {
        return false;
    }
    let bytes = value.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|&b| edge_ok(b) || b == b'-' || b == b'.')
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod labels_tests;
