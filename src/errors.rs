// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the tenant controller.
//!
//! Errors are classified by how the controller reacts to them:
//!
//! - [`Error::Transient`] - network failures, throttling and 5xx responses.
//!   Retried inside the API call, then the key is requeued with backoff.
//! - [`Error::Forbidden`] and [`Error::Invalid`] - the API refused the request.
//!   A Warning event is attached to the tenant and the next sweep retries.
//! - [`Error::LeadershipLost`] - the lease was revoked mid-pass. The pass is
//!   aborted and the tenant is requeued until leadership returns.
//!
//! Create/delete conflicts (already exists, not found) are not errors; they are
//! variants of [`crate::cluster::CreateOutcome`] and [`crate::cluster::DeleteOutcome`].

use crate::retry::is_retryable_error;
use thiserror::Error;

/// Errors returned by the reconciliation core.
#[derive(Error, Debug)]
pub enum Error {
    /// Transient Kubernetes API failure that outlived in-call retries
    #[error("transient Kubernetes API error during {operation}: {source}")]
    Transient {
        /// What the controller was doing (e.g. "create namespace acme-dev")
        operation: String,
        /// The last error returned by the API
        #[source]
        source: kube::Error,
    },

    /// The controller's service account may not perform the operation (HTTP 401/403)
    #[error("permission denied during {operation}: {message}")]
    Forbidden {
        /// What the controller was doing
        operation: String,
        /// Message returned by the API server
        message: String,
    },

    /// The API server rejected the request for a reason retries will not fix
    #[error("Kubernetes API rejected {operation}: {message}")]
    Invalid {
        /// What the controller was doing
        operation: String,
        /// Message returned by the API server
        message: String,
    },

    /// Leadership was lost before a mutating call; nothing was changed
    #[error("leadership lost, mutation aborted")]
    LeadershipLost,

    /// The lease backend failed to acquire or renew the lease
    #[error("lease backend error: {0}")]
    Lease(String),

    /// Metrics could not be registered or encoded
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Command-line settings are inconsistent
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Classify a Kubernetes client error.
    ///
    /// Only errors a retry can fix (429, 5xx, transport) stay transient;
    /// everything else the client raises, such as (de)serialization or
    /// credential failures, is reported as [`Error::Invalid`].
    #[must_use]
    pub fn from_kube(operation: &str, err: kube::Error) -> Self {
        if let kube::Error::Api(ae) = &err {
            if ae.code == 401 || ae.code == 403 {
                return Error::Forbidden {
                    operation: operation.to_string(),
                    message: ae.message.clone(),
                };
            }
        }
        if is_retryable_error(&err) {
            return Error::Transient {
                operation: operation.to_string(),
                source: err,
            };
        }

        let message = match &err {
            kube::Error::Api(ae) => ae.message.clone(),
            other => other.to_string(),
        };
        Error::Invalid {
            operation: operation.to_string(),
            message,
        }
    }

    /// Whether the key should be requeued with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::Lease(_))
    }

    /// Short CamelCase reason used on events and as a metrics label.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Transient { .. } => "TransientApiError",
            Error::Forbidden { .. } => "PermissionDenied",
            Error::Invalid { .. } => "RequestRejected",
            Error::LeadershipLost => "LeadershipLost",
            Error::Lease(_) => "LeaseError",
            Error::Metrics(_) => "MetricsError",
            Error::Config(_) => "InvalidConfiguration",
        }
    }

    /// Ranking used to pick the error reported for a pass with several
    /// failures. Higher ranks win.
    pub(crate) fn urgency(&self) -> u8 {
        match self {
            Error::LeadershipLost => 3,
            Error::Transient { .. } | Error::Lease(_) => 2,
            Error::Forbidden { .. } | Error::Invalid { .. } => 1,
            Error::Metrics(_) | Error::Config(_) => 0,
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
