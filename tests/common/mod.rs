// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DeleteParams, PostParams},
    client::Client,
};
use std::time::Duration;
use tenant_controller::crd::{Tenant, TenantSpec};
use tokio::time::sleep;

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Create a Tenant, replacing any leftover from an earlier run
pub async fn create_tenant(
    client: &Client,
    name: &str,
    namespaces: &[&str],
) -> Result<Tenant, Box<dyn std::error::Error>> {
    let tenants: Api<Tenant> = Api::all(client.clone());
    let tenant = Tenant::new(
        name,
        TenantSpec {
            namespaces: namespaces.iter().map(ToString::to_string).collect(),
        },
    );

    match tenants.create(&PostParams::default(), &tenant).await {
        Ok(created) => {
            println!("Created test tenant: {name}");
            Ok(created)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            delete_tenant(client, name).await?;
            sleep(Duration::from_secs(1)).await;
            Ok(tenants.create(&PostParams::default(), &tenant).await?)
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Delete a Tenant, ignoring a missing one
pub async fn delete_tenant(client: &Client, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let tenants: Api<Tenant> = Api::all(client.clone());

    match tenants.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            println!("Deleted test tenant: {name}");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Box::new(e)),
    }
}

/// Whether a namespace exists and is not terminating
pub async fn namespace_is_active(client: &Client, name: &str) -> bool {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    match namespaces.get_opt(name).await {
        Ok(Some(ns)) => ns.metadata.deletion_timestamp.is_none(),
        _ => false,
    }
}

/// Poll until `check` holds or the timeout elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(500)).await;
    }
    false
}
