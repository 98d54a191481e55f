// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory test doubles shared by the unit tests.
//!
//! - [`FakeCluster`] implements [`ClusterApi`] over a map of namespaces and
//!   records every mutation.
//! - [`ReplicaView`] is one replica's handle on a shared [`FakeCluster`]; it
//!   counts mutations issued while that replica was not leader.
//! - [`SimLease`] is a lease shared by several simulated replicas.

use crate::cluster::{ClusterApi, CreateOutcome, DeleteOutcome};
use crate::crd::{Tenant, TenantSpec, TenantStatus};
use crate::errors::{Error, Result};
use crate::leader::{LeaderGate, LeaseBackend};
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Build a tenant with the given desired namespaces.
pub fn tenant(name: &str, namespaces: &[&str]) -> Tenant {
    let mut tenant = Tenant::new(
        name,
        TenantSpec {
            namespaces: namespaces.iter().map(ToString::to_string).collect(),
        },
    );
    tenant.metadata.uid = Some(format!("uid-{name}"));
    tenant.metadata.generation = Some(1);
    tenant
}

/// Kubernetes API error with the given status code.
pub fn api_error(code: u16) -> kube::Error {
    let status = serde_json::json!({
        "status": "Failure",
        "message": format!("injected HTTP {code}"),
        "reason": "Injected",
        "code": code,
    });
    kube::Error::Api(serde_json::from_value(status).expect("valid API status"))
}

/// A mutation observed by the fake cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create(String),
    Delete(String),
    Status(String),
}

type Hook = Box<dyn Fn(&Mutation) + Send + Sync>;

#[derive(Default)]
struct FakeState {
    tenants: BTreeMap<String, Tenant>,
    /// namespace name -> owning tenant (None for unowned namespaces)
    namespaces: BTreeMap<String, Option<String>>,
    mutations: Vec<Mutation>,
    events: Vec<(String, String)>,
    /// create calls for these names lose a race: the namespace appears first
    racing_creates: HashSet<String>,
    /// delete calls for these names find the namespace already gone
    racing_deletes: HashSet<String>,
    /// mutation calls for these names fail with the given HTTP code
    failing: BTreeMap<String, u16>,
    /// the next mutation call for these names fails once with the given code
    failing_once: BTreeMap<String, u16>,
    fail_listing: bool,
    fail_owned_listing: bool,
}

/// In-memory [`ClusterApi`].
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
    after_mutation: Mutex<Option<Hook>>,
    after_failure: Mutex<Option<Hook>>,
    list_delay: Mutex<Option<Duration>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn put_tenant(&self, tenant: Tenant) {
        self.with_state(|s| {
            s.tenants.insert(tenant.name_any(), tenant);
        });
    }

    pub fn remove_tenant(&self, name: &str) {
        self.with_state(|s| {
            s.tenants.remove(name);
        });
    }

    pub fn stored_tenant(&self, name: &str) -> Option<Tenant> {
        self.with_state(|s| s.tenants.get(name).cloned())
    }

    pub fn put_namespace(&self, name: &str, owner: Option<&str>) {
        self.with_state(|s| {
            s.namespaces.insert(name.to_string(), owner.map(ToString::to_string));
        });
    }

    pub fn owned_by(&self, tenant: &str) -> BTreeSet<String> {
        self.with_state(|s| {
            s.namespaces
                .iter()
                .filter(|(_, owner)| owner.as_deref() == Some(tenant))
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    pub fn namespace_exists(&self, name: &str) -> bool {
        self.with_state(|s| s.namespaces.contains_key(name))
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.with_state(|s| s.mutations.clone())
    }

    pub fn namespace_mutations(&self) -> usize {
        self.mutations()
            .iter()
            .filter(|m| !matches!(m, Mutation::Status(_)))
            .count()
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.with_state(|s| s.events.clone())
    }

    pub fn race_create(&self, name: &str) {
        self.with_state(|s| {
            s.racing_creates.insert(name.to_string());
        });
    }

    pub fn race_delete(&self, name: &str) {
        self.with_state(|s| {
            s.racing_deletes.insert(name.to_string());
        });
    }

    pub fn fail_mutation(&self, name: &str, code: u16) {
        self.with_state(|s| {
            s.failing.insert(name.to_string(), code);
        });
    }

    pub fn fail_mutation_once(&self, name: &str, code: u16) {
        self.with_state(|s| {
            s.failing_once.insert(name.to_string(), code);
        });
    }

    pub fn clear_failures(&self) {
        self.with_state(|s| s.failing.clear());
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.with_state(|s| s.fail_listing = fail);
    }

    pub fn set_fail_listing_owned(&self, fail: bool) {
        self.with_state(|s| s.fail_owned_listing = fail);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn on_mutation(&self, hook: impl Fn(&Mutation) + Send + Sync + 'static) {
        *self.after_mutation.lock().unwrap() = Some(Box::new(hook));
    }

    /// Run `hook` whenever an injected failure is returned.
    pub fn on_failure(&self, hook: impl Fn(&Mutation) + Send + Sync + 'static) {
        *self.after_failure.lock().unwrap() = Some(Box::new(hook));
    }

    fn record(&self, mutation: Mutation) {
        self.with_state(|s| s.mutations.push(mutation.clone()));
        if let Some(hook) = self.after_mutation.lock().unwrap().as_ref() {
            hook(&mutation);
        }
    }

    fn injected_failure(&self, attempted: Mutation, name: &str, operation: &str) -> Result<()> {
        let code = self.with_state(|s| {
            s.failing_once
                .remove(name)
                .or_else(|| s.failing.get(name).copied())
        });
        let Some(code) = code else {
            return Ok(());
        };
        if let Some(hook) = self.after_failure.lock().unwrap().as_ref() {
            hook(&attempted);
        }
        Err(Error::from_kube(operation, api_error(code)))
    }

    async fn listing(&self, operation: &str) -> Result<()> {
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.with_state(|s| s.fail_listing) {
            return Err(Error::from_kube(operation, api_error(503)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>> {
        Ok(self.stored_tenant(name))
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        self.listing("list tenants").await?;
        Ok(self.with_state(|s| s.tenants.keys().cloned().collect()))
    }

    async fn list_owned_namespaces(&self, tenant: &str) -> Result<BTreeSet<String>> {
        if self.with_state(|s| s.fail_owned_listing) {
            let operation = format!("list namespaces of tenant {tenant}");
            return Err(Error::from_kube(&operation, api_error(503)));
        }
        Ok(self.owned_by(tenant))
    }

    async fn list_namespace_owners(&self) -> Result<BTreeSet<String>> {
        self.listing("list tenant namespaces").await?;
        Ok(self.with_state(|s| s.namespaces.values().flatten().cloned().collect()))
    }

    async fn create_namespace(&self, name: &str, tenant: &Tenant) -> Result<CreateOutcome> {
        self.injected_failure(
            Mutation::Create(name.to_string()),
            name,
            &format!("create namespace {name}"),
        )?;
        let owner = tenant.name_any();
        let outcome = self.with_state(|s| {
            if s.racing_creates.remove(name) {
                s.namespaces.insert(name.to_string(), Some(owner.clone()));
            }
            if s.namespaces.contains_key(name) {
                CreateOutcome::AlreadyExists
            } else {
                s.namespaces.insert(name.to_string(), Some(owner.clone()));
                CreateOutcome::Created
            }
        });
        if outcome == CreateOutcome::Created {
            self.record(Mutation::Create(name.to_string()));
        }
        Ok(outcome)
    }

    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome> {
        self.injected_failure(
            Mutation::Delete(name.to_string()),
            name,
            &format!("delete namespace {name}"),
        )?;
        let outcome = self.with_state(|s| {
            if s.racing_deletes.remove(name) {
                s.namespaces.remove(name);
            }
            match s.namespaces.remove(name) {
                Some(_) => DeleteOutcome::Deleted,
                None => DeleteOutcome::NotFound,
            }
        });
        if outcome == DeleteOutcome::Deleted {
            self.record(Mutation::Delete(name.to_string()));
        }
        Ok(outcome)
    }

    async fn update_tenant_status(&self, name: &str, status: &TenantStatus) -> Result<()> {
        let updated = self.with_state(|s| match s.tenants.get_mut(name) {
            Some(tenant) => {
                tenant.status = Some(status.clone());
                true
            }
            None => false,
        });
        if updated {
            self.record(Mutation::Status(name.to_string()));
        }
        Ok(())
    }

    async fn publish_warning(&self, tenant: &Tenant, reason: &str, _note: String) {
        let name = tenant.name_any();
        self.with_state(|s| s.events.push((name, reason.to_string())));
    }
}

/// One replica's handle on a shared [`FakeCluster`].
///
/// Every mutation issued while `gate` is inactive is counted as a violation
/// before being forwarded.
pub struct ReplicaView {
    cluster: Arc<FakeCluster>,
    gate: LeaderGate,
    violations: AtomicUsize,
}

impl ReplicaView {
    pub fn new(cluster: Arc<FakeCluster>, gate: LeaderGate) -> Self {
        Self {
            cluster,
            gate,
            violations: AtomicUsize::new(0),
        }
    }

    /// Mutations this replica issued without holding leadership.
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    fn check(&self) {
        if !self.gate.is_leader() {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ClusterApi for ReplicaView {
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>> {
        self.cluster.get_tenant(name).await
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        self.cluster.list_tenants().await
    }

    async fn list_owned_namespaces(&self, tenant: &str) -> Result<BTreeSet<String>> {
        self.cluster.list_owned_namespaces(tenant).await
    }

    async fn list_namespace_owners(&self) -> Result<BTreeSet<String>> {
        self.cluster.list_namespace_owners().await
    }

    async fn create_namespace(&self, name: &str, tenant: &Tenant) -> Result<CreateOutcome> {
        self.check();
        self.cluster.create_namespace(name, tenant).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome> {
        self.check();
        self.cluster.delete_namespace(name).await
    }

    async fn update_tenant_status(&self, name: &str, status: &TenantStatus) -> Result<()> {
        self.check();
        self.cluster.update_tenant_status(name, status).await
    }

    async fn publish_warning(&self, tenant: &Tenant, reason: &str, note: String) {
        self.cluster.publish_warning(tenant, reason, note).await;
    }
}

struct Holder {
    identity: String,
    expires: Instant,
}

/// A lease shared by simulated replicas.
#[derive(Clone, Default)]
pub struct SimLease {
    holder: Arc<Mutex<Option<Holder>>>,
}

impl SimLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend for one replica.
    pub fn replica(&self, identity: &str, ttl: Duration, poll: Duration) -> SimReplica {
        SimReplica {
            lease: self.clone(),
            identity: identity.to_string(),
            ttl,
            poll,
            reported: Mutex::new(false),
            partitioned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn holder(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap()
            .as_ref()
            .filter(|h| h.expires > Instant::now())
            .map(|h| h.identity.clone())
    }

    fn try_acquire_or_renew(&self, identity: &str, ttl: Duration) -> bool {
        let mut holder = self.holder.lock().unwrap();
        let now = Instant::now();
        let free = match holder.as_ref() {
            None => true,
            Some(h) => h.identity == identity || h.expires <= now,
        };
        if free {
            *holder = Some(Holder {
                identity: identity.to_string(),
                expires: now + ttl,
            });
        }
        free
    }

    fn release(&self, identity: &str) {
        let mut holder = self.holder.lock().unwrap();
        if holder.as_ref().is_some_and(|h| h.identity == identity) {
            *holder = None;
        }
    }
}

/// One replica's view of a [`SimLease`].
pub struct SimReplica {
    lease: SimLease,
    identity: String,
    ttl: Duration,
    poll: Duration,
    reported: Mutex<bool>,
    partitioned: Arc<AtomicBool>,
}

impl SimReplica {
    /// Switch that cuts this replica off from the lease while set.
    pub fn partition_switch(&self) -> Arc<AtomicBool> {
        self.partitioned.clone()
    }
}

#[async_trait]
impl LeaseBackend for SimReplica {
    async fn changed(&self) -> Result<bool> {
        loop {
            tokio::time::sleep(self.poll).await;
            if self.partitioned.load(Ordering::SeqCst) {
                *self.reported.lock().unwrap() = false;
                return Err(Error::Lease("lease unreachable".to_string()));
            }
            let held = self.lease.try_acquire_or_renew(&self.identity, self.ttl);
            let mut reported = self.reported.lock().unwrap();
            if held != *reported {
                *reported = held;
                return Ok(held);
            }
        }
    }

    async fn release(&self) -> Result<()> {
        self.lease.release(&self.identity);
        Ok(())
    }
}
