// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch events turned into tenant keys.
//!
//! Tenant adds and updates reach the controller through its own watch. Two
//! more sources feed it:
//!
//! - every change to a namespace carrying the ownership label maps to the
//!   tenant named by the label, so a namespace deleted out from under its
//!   tenant gets recreated and one left behind by a deleted tenant is removed;
//! - every tenant delete yields the tenant's name for the tombstone worker,
//!   because the controller itself only reacts to objects that still exist.
//!
//! Watches restart with backoff on errors; they never end while the process
//! runs. Keys are delivered regardless of leadership, so a standby replica
//! already holds them when it takes over.

use crate::crd::Tenant;
use crate::labels::{is_valid_tenant_name, TENANT_OWNER_LABEL};
use crate::shutdown::{self, ShutdownSignal};
use futures::{future, pin_mut, Stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, metadata_watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Key of an owned-namespace event: the value of the ownership label.
///
/// Label values that cannot be a tenant name are dropped with a warning.
pub fn namespace_owner_key<K: Resource>(namespace: &K) -> Option<String> {
    let owner = namespace.labels().get(TENANT_OWNER_LABEL)?;
    if is_valid_tenant_name(owner) {
        Some(owner.clone())
    } else {
        warn!(
            namespace = %namespace.name_any(),
            label = TENANT_OWNER_LABEL,
            value = %owner,
            "Ignoring namespace with malformed ownership label"
        );
        None
    }
}

/// Controller mapper from an owned namespace to its tenant.
pub fn tenant_for_namespace(namespace: Namespace) -> Option<ObjectRef<Tenant>> {
    namespace_owner_key(&namespace).map(|owner| ObjectRef::new(&owner))
}

/// Names of deleted objects in a watch stream.
///
/// Applies and init markers yield nothing. Stream errors are logged; the
/// underlying watcher recovers on its own.
pub fn deleted_names<K, S>(events: S, kind: &'static str) -> impl Stream<Item = String>
where
    K: Resource,
    S: Stream<Item = Result<Event<K>, watcher::Error>>,
{
    events.filter_map(move |event| {
        let name = match event {
            Ok(Event::Delete(obj)) => Some(obj.name_any()),
            Ok(_) => None,
            Err(e) => {
                warn!(kind, error = %e, "Watch stream error, watcher will retry");
                None
            }
        };
        future::ready(name)
    })
}

/// Names of tenants as they are deleted.
pub fn tenant_deletions(client: Client) -> impl Stream<Item = String> {
    let events = metadata_watcher(Api::<Tenant>::all(client), watcher::Config::default())
        .default_backoff();
    deleted_names(events, "Tenant")
}

/// Forward keys to `sink` until shutdown or until the stream ends.
pub async fn pump<S>(keys: S, sink: UnboundedSender<String>, mut shutdown_signal: ShutdownSignal)
where
    S: Stream<Item = String>,
{
    pin_mut!(keys);
    info!("Starting tenant deletion watch");

    loop {
        tokio::select! {
            () = shutdown::wait(&mut shutdown_signal) => break,
            next = keys.next() => match next {
                Some(key) => {
                    debug!(tenant = %key, "Tenant deleted, queueing tombstone");
                    if sink.send(key).is_err() {
                        break;
                    }
                }
                None => {
                    warn!("Watch stream ended");
                    break;
                }
            },
        }
    }

    info!("Tenant deletion watch stopped");
}

#[cfg(test)]
#[path = "event_source_tests.rs"]
mod event_source_tests;
