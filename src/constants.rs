// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the tenant controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Controller Identity
// ============================================================================

/// Name reported on Kubernetes events and used as field manager
pub const CONTROLLER_NAME: &str = "tenant-controller";

// ============================================================================
// Status Condition Constants
// ============================================================================

/// Condition type reporting whether the tenant's namespaces have converged
pub const CONDITION_READY: &str = "Ready";

/// Reason set when every desired namespace exists and nothing else is owned
pub const REASON_CONVERGED: &str = "Converged";

/// Reason set when the last reconciliation pass failed
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

// ============================================================================
// Controller Constants
// ============================================================================

/// Default maximum number of tenants reconciled concurrently
pub const DEFAULT_WORKERS: usize = 4;

/// Default interval between full sweeps over all tenants (1 minute)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Base delay for per-key requeue backoff after a retryable failure
pub const REQUEUE_BASE_DELAY_MILLIS: u64 = 500;

/// Upper bound for per-key requeue backoff (5 minutes)
pub const REQUEUE_MAX_DELAY_SECS: u64 = 300;

/// Delay before a tenant seen on a standby replica is looked at again
pub const STANDBY_REQUEUE_SECS: u64 = 5;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default name of the leader election Lease object
pub const DEFAULT_LEADER_ELECTION_ID: &str = "27475f02.example.com";

/// Namespace used for the lease when `POD_NAMESPACE` is not set
pub const DEFAULT_LEASE_NAMESPACE: &str = "default";

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default grace period before lease expiry at which renewal starts (5 seconds)
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 5;

/// Initial delay before retrying a failed lease operation
pub const LEASE_RETRY_INITIAL_MILLIS: u64 = 500;

/// Maximum delay between lease retries
pub const LEASE_RETRY_MAX_SECS: u64 = 30;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics and Probe Server Constants
// ============================================================================

/// Default bind address for the Prometheus metrics HTTP server
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Default bind address for the liveness and readiness probe server
pub const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:9090";

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path for the liveness probe
pub const HEALTHZ_PATH: &str = "/healthz";

/// Path for the readiness probe
pub const READYZ_PATH: &str = "/readyz";

/// Namespace prefix for all controller metrics
pub const METRICS_NAMESPACE: &str = "tenant_controller";

/// Page size for paginated list calls against the Kubernetes API
pub const KUBE_LIST_PAGE_SIZE: u32 = 500;
