// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line configuration.
//!
//! Every operational parameter is a flag with a default from
//! [`crate::constants`]; the lease namespace may also come from
//! `POD_NAMESPACE` (downward API).

use crate::constants::{
    CONTROLLER_NAME, DEFAULT_LEADER_ELECTION_ID, DEFAULT_LEASE_DURATION_SECS,
    DEFAULT_LEASE_GRACE_SECS, DEFAULT_LEASE_NAMESPACE, DEFAULT_METRICS_ADDR, DEFAULT_PROBE_ADDR,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_WORKERS,
};
use crate::controller::ControllerSettings;
use crate::errors::{Error, Result};
use crate::leader::LeaseSettings;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Kubernetes controller keeping namespaces in sync with Tenant resources
#[derive(Parser, Debug, Clone)]
#[command(name = "tenant-controller", version, about, long_about = None)]
pub struct Config {
    /// Address the Prometheus metrics endpoint binds to
    #[arg(long, default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: SocketAddr,

    /// Address the health and readiness probe endpoints bind to
    #[arg(long, default_value = DEFAULT_PROBE_ADDR)]
    pub probe_addr: SocketAddr,

    /// Enable leader election so that only one replica reconciles at a time
    #[arg(long)]
    pub enable_leader_election: bool,

    /// Name of the Lease used for leader election
    #[arg(long, default_value = DEFAULT_LEADER_ELECTION_ID)]
    pub leader_election_id: String,

    /// Namespace of the leader election Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_LEASE_NAMESPACE)]
    pub leader_election_namespace: String,

    /// Lease duration in seconds
    #[arg(long, default_value_t = DEFAULT_LEASE_DURATION_SECS)]
    pub lease_duration_secs: u64,

    /// Seconds before lease expiry at which renewal starts
    #[arg(long, default_value_t = DEFAULT_LEASE_GRACE_SECS)]
    pub lease_grace_secs: u64,

    /// Seconds between full sweeps over all tenants
    #[arg(
        long,
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval_secs: u64,

    /// Maximum number of tenants reconciled concurrently
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,
}

impl Config {
    /// Reject combinations clap cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("--workers must be at least 1".to_string()));
        }
        if self.lease_duration_secs == 0 {
            return Err(Error::Config(
                "--lease-duration-secs must be at least 1".to_string(),
            ));
        }
        if self.lease_grace_secs >= self.lease_duration_secs {
            return Err(Error::Config(format!(
                "--lease-grace-secs ({}) must be shorter than --lease-duration-secs ({})",
                self.lease_grace_secs, self.lease_duration_secs
            )));
        }
        Ok(())
    }

    /// Lease coordinates for this replica.
    #[must_use]
    pub fn lease_settings(&self, identity: String) -> LeaseSettings {
        LeaseSettings {
            lease_name: self.leader_election_id.clone(),
            namespace: self.leader_election_namespace.clone(),
            identity,
            duration_secs: self.lease_duration_secs,
            grace_secs: self.lease_grace_secs,
        }
    }

    /// Worker pool and sweep settings.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            workers: self.workers,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

/// Holder identity of this replica: `POD_NAME`, then `HOSTNAME`, then a
/// random name.
#[must_use]
pub fn identity() -> String {
    identity_from(
        std::env::var("POD_NAME").ok(),
        std::env::var("HOSTNAME").ok(),
    )
}

fn identity_from(pod_name: Option<String>, hostname: Option<String>) -> String {
    pod_name
        .filter(|name| !name.is_empty())
        .or_else(|| hostname.filter(|name| !name.is_empty()))
        .unwrap_or_else(|| format!("{CONTROLLER_NAME}-{:08x}", rand::random::<u32>()))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
