// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Tenant Controller - namespace multi-tenancy for Kubernetes
//!
//! A `Tenant` is a cluster-scoped custom resource listing the namespaces a
//! tenant needs. The controller creates every listed namespace, labels it as
//! owned by the tenant, and deletes owned namespaces that are no longer
//! listed or whose tenant is gone.
//!
//! ## Modules
//!
//! - [`crd`] - the `Tenant` custom resource
//! - [`cluster`] - the cluster API seam (`ClusterApi`) and its Kubernetes implementation
//! - [`leader`] - lease-based leader election gating every mutation
//! - [`event_source`] - watch events mapped to tenant keys
//! - [`reconciler`] - one convergence pass for one tenant
//! - [`sweep`] - periodic full resync
//! - [`controller`] - `kube` controller runtime, requeue policy and tombstones
//! - [`metrics`] - Prometheus counters
//! - [`server`] - metrics and probe HTTP endpoints
//!
//! ## Example
//!
//! ```rust
//! use tenant_controller::crd::{Tenant, TenantSpec};
//! use std::collections::BTreeSet;
//! use tenant_controller::reconciler::plan;
//!
//! let tenant = Tenant::new(
//!     "acme",
//!     TenantSpec {
//!         namespaces: vec!["acme-dev".to_string(), "acme-prod".to_string()],
//!     },
//! );
//!
//! let owned: BTreeSet<String> = ["acme-dev".to_string(), "acme-old".to_string()].into();
//! let changes = plan(&tenant.desired_namespaces(), &owned);
//! assert_eq!(changes.to_create, vec!["acme-prod"]);
//! assert_eq!(changes.to_delete, vec!["acme-old"]);
//! ```

pub mod cluster;
pub mod config;
pub mod constants;
pub mod context;
pub mod controller;
pub mod crd;
pub mod errors;
pub mod event_source;
pub mod labels;
pub mod leader;
pub mod metrics;
pub mod reconciler;
pub mod retry;
pub mod server;
pub mod shutdown;
pub mod status;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;
