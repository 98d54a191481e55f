// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster API seam used by the reconciler and the periodic sweep.
//!
//! [`ClusterApi`] is the only way the core touches the cluster: reading
//! tenants, listing and mutating owned namespaces, patching tenant status and
//! publishing events. [`KubeCluster`] implements it against the Kubernetes API;
//! tests use an in-memory fake. Reads retry transient errors here. Mutations
//! make a single attempt and are retried by the reconciler, which re-checks
//! leadership between attempts.
//!
//! Create and delete conflicts are reported as outcomes, not errors:
//!
//! - create → [`CreateOutcome::Created`] | [`CreateOutcome::AlreadyExists`]
//! - delete → [`DeleteOutcome::Deleted`] | [`DeleteOutcome::NotFound`]

use crate::constants::{CONTROLLER_NAME, KUBE_LIST_PAGE_SIZE};
use crate::crd::{Tenant, TenantStatus};
use crate::errors::{Error, Result};
use crate::labels::{any_owner_selector, owned_namespace_labels, owner_selector, TENANT_OWNER_LABEL};
use crate::retry::retry_api_call;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Result of a namespace create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The namespace was created by this call
    Created,
    /// A namespace with that name already existed (HTTP 409)
    AlreadyExists,
}

/// Result of a namespace delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The namespace was deleted (or put into `Terminating`) by this call
    Deleted,
    /// No namespace with that name existed (HTTP 404)
    NotFound,
}

/// Operations the controller core performs against the cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a tenant by name; `None` when it no longer exists (tombstone).
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>>;

    /// Names of every tenant in the cluster.
    async fn list_tenants(&self) -> Result<Vec<String>>;

    /// Names of live namespaces bearing `tenant`'s ownership label.
    ///
    /// Namespaces already in `Terminating` state are excluded.
    async fn list_owned_namespaces(&self, tenant: &str) -> Result<BTreeSet<String>>;

    /// Every distinct ownership label value found on namespaces.
    async fn list_namespace_owners(&self) -> Result<BTreeSet<String>>;

    /// Create namespace `name` owned by `tenant`.
    async fn create_namespace(&self, name: &str, tenant: &Tenant) -> Result<CreateOutcome>;

    /// Delete namespace `name`.
    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome>;

    /// Replace the status of tenant `name`. A tenant deleted meanwhile is ignored.
    async fn update_tenant_status(&self, name: &str, status: &TenantStatus) -> Result<()>;

    /// Attach a Warning event to `tenant`. Fire-and-forget: failures are logged.
    async fn publish_warning(&self, tenant: &Tenant, reason: &str, note: String);
}

/// [`ClusterApi`] backed by the Kubernetes API server.
pub struct KubeCluster {
    tenants: Api<Tenant>,
    namespaces: Api<Namespace>,
    recorder: Recorder,
}

impl KubeCluster {
    /// Create a cluster handle for the given client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            tenants: Api::all(client.clone()),
            namespaces: Api::all(client.clone()),
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>> {
        let api = &self.tenants;
        retry_api_call(
            || async move { api.get_opt(name).await },
            &format!("get tenant {name}"),
        )
        .await
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        let tenants = list_all_paginated(&self.tenants, ListParams::default(), "list tenants").await?;
        Ok(tenants.iter().map(ResourceExt::name_any).collect())
    }

    async fn list_owned_namespaces(&self, tenant: &str) -> Result<BTreeSet<String>> {
        let params = ListParams::default().labels(&owner_selector(tenant));
        let namespaces = list_all_paginated(
            &self.namespaces,
            params,
            &format!("list namespaces of tenant {tenant}"),
        )
        .await?;

        Ok(namespaces
            .iter()
            .filter(|ns| ns.metadata.deletion_timestamp.is_none())
            .map(ResourceExt::name_any)
            .collect())
    }

    async fn list_namespace_owners(&self) -> Result<BTreeSet<String>> {
        let params = ListParams::default().labels(&any_owner_selector());
        let namespaces =
            list_all_paginated(&self.namespaces, params, "list tenant namespaces").await?;

        Ok(namespaces
            .iter()
            .filter_map(|ns| ns.labels().get(TENANT_OWNER_LABEL).cloned())
            .collect())
    }

    async fn create_namespace(&self, name: &str, tenant: &Tenant) -> Result<CreateOutcome> {
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };

        match self
            .namespaces
            .create(&params, &owned_namespace(name, tenant))
            .await
        {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(Error::from_kube(&format!("create namespace {name}"), e)),
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome> {
        match self.namespaces.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(Error::from_kube(&format!("delete namespace {name}"), e)),
        }
    }

    async fn update_tenant_status(&self, name: &str, status: &TenantStatus) -> Result<()> {
        let patch = json!({ "status": status });
        match self
            .tenants
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(tenant = name, "Tenant deleted before status update");
                Ok(())
            }
            Err(e) => Err(Error::from_kube(&format!("update status of tenant {name}"), e)),
        }
    }

    async fn publish_warning(&self, tenant: &Tenant, reason: &str, note: String) {
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &tenant.object_ref(&())).await {
            warn!(
                tenant = %tenant.name_any(),
                reason,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// The namespace object created for `tenant`.
///
/// Ownership is carried by labels only. No owner reference is set: the
/// garbage collector would otherwise delete the namespaces itself when the
/// tenant goes away, and the controller could not observe or count those
/// deletions.
pub(crate) fn owned_namespace(name: &str, tenant: &Tenant) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owned_namespace_labels(&tenant.name_any())),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// List all resources with automatic pagination.
///
/// Fetches resources in pages to reduce memory usage and API server load.
/// Each page is retried independently on transient errors.
async fn list_all_paginated<K>(
    api: &Api<K>,
    mut list_params: ListParams,
    operation_name: &str,
) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    list_params.limit = Some(KUBE_LIST_PAGE_SIZE);

    let mut all_items = Vec::new();
    let mut page_count = 0;

    loop {
        page_count += 1;
        let params = &list_params;
        let page = retry_api_call(|| async move { api.list(params).await }, operation_name).await?;

        all_items.extend(page.items);

        match page.metadata.continue_.filter(|token| !token.is_empty()) {
            Some(token) => list_params.continue_token = Some(token),
            None => break,
        }
    }

    debug!(
        operation = operation_name,
        total_pages = page_count,
        total_items = all_items.len(),
        "Completed paginated list operation"
    );

    Ok(all_items)
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
