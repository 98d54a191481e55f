// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with exponential backoff for Kubernetes API calls.
//!
//! Transient API errors (429, 5xx, transport failures) are retried with
//! exponential backoff; permanent errors (other 4xx) fail immediately and are
//! classified into [`crate::errors::Error`].
//!
//! Mutations go through [`retry_mutation`], which checks leadership before
//! every attempt, so a replica that lost its lease never re-issues a write.
//!
//! Cancellation is cooperative: a retry loop only waits in `tokio::time::sleep`,
//! so dropping the future (controller shutdown) stops it at the next await point.

use crate::constants::{REQUEUE_BASE_DELAY_MILLIS, REQUEUE_MAX_DELAY_SECS};
use crate::errors::{Error, Result};
use crate::leader::LeaderGate;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Maximum total time to spend retrying one API call (30 seconds)
const MAX_ELAPSED_TIME_SECS: u64 = 30;

/// Initial retry interval (100ms)
const INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum interval between retries (5 seconds)
const MAX_INTERVAL_SECS: u64 = 5;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration, restored by [`ExponentialBackoff::reset`]
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Maximum total elapsed time, `None` retries forever
    pub max_elapsed_time: Option<Duration>,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    /// Start time for tracking total elapsed time
    start_time: Instant,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None if max elapsed time exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Start over from the initial interval, e.g. after a success.
    pub fn reset(&mut self) {
        self.current_interval = self.initial_interval;
        self.start_time = Instant::now();
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let offset = (rand::random::<f64>() * 2.0 - 1.0) * delta;

        Duration::from_secs_f64((secs + offset).max(0.0))
    }
}

/// Create default exponential backoff configuration for Kubernetes API retries.
///
/// # Configuration
///
/// - **Initial interval**: 100ms
/// - **Max interval**: 5 seconds
/// - **Max elapsed time**: 30 seconds total
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
///
/// A call that is still failing after 30 seconds fails the reconciliation,
/// and the controller requeues the tenant with [`RequeueBackoff`].
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        Some(Duration::from_secs(MAX_ELAPSED_TIME_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Create the unbounded backoff used between lease acquisition attempts.
///
/// Never gives up: a replica that cannot reach the lease keeps trying forever
/// while staying inactive.
#[must_use]
pub fn lease_backoff(initial: Duration, max: Duration) -> ExponentialBackoff {
    ExponentialBackoff::new(initial, max, None, BACKOFF_MULTIPLIER, RANDOMIZATION_FACTOR)
}

/// Retry a Kubernetes API call with exponential backoff.
///
/// Automatically retries on transient errors (HTTP 429, 5xx, transport) and
/// fails immediately on permanent errors. Callers that treat some status codes
/// as benign (409 on create, 404 on delete) must map them inside `operation`
/// so they never reach this loop as errors.
///
/// # Errors
///
/// Returns a classified [`Error`] if a non-retryable error is encountered or
/// the retry budget is exhausted.
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if !is_retryable_error(&e) {
                    debug!(
                        operation = operation_name,
                        error = %e,
                        "Non-retryable Kubernetes API error, failing immediately"
                    );
                    return Err(Error::from_kube(operation_name, e));
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable Kubernetes API error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Backoff exhausted, giving up"
                    );
                    return Err(Error::from_kube(operation_name, e));
                }
            }
        }
    }
}

/// Retry a mutating cluster call while this replica is leader.
///
/// Leadership is checked before every attempt, including the first. A replica
/// that loses its lease while backing off stops with
/// [`Error::LeadershipLost`] instead of writing again. Only errors whose
/// [`Error::is_retryable`] is true are retried.
///
/// # Errors
///
/// Returns [`Error::LeadershipLost`] when the gate closes, the first
/// non-retryable error, or the last error once the budget is exhausted.
pub async fn retry_mutation<T, F, Fut>(
    gate: &LeaderGate,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = default_backoff();
    let mut attempt = 0;

    loop {
        gate.ensure_leader()?;
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        match backoff.next_backoff() {
            Some(duration) => {
                warn!(
                    operation = operation_name,
                    attempt,
                    retry_after = ?duration,
                    error = %err,
                    "Retryable mutation error, will retry"
                );
                tokio::time::sleep(duration).await;
            }
            None => {
                error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Backoff exhausted, giving up"
                );
                return Err(err);
            }
        }
    }
}

/// Per-tenant requeue delays after failed reconciliations.
///
/// The delay doubles with every consecutive failure of the same tenant, from
/// 500ms up to 5 minutes, and restarts once the tenant converges.
#[derive(Debug)]
pub struct RequeueBackoff {
    failures: Mutex<HashMap<String, u32>>,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(REQUEUE_BASE_DELAY_MILLIS),
            Duration::from_secs(REQUEUE_MAX_DELAY_SECS),
        )
    }
}

impl RequeueBackoff {
    /// Create a backoff with custom bounds.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base_delay,
            max_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one more failure of `key` and return how long to wait.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.lock();
        let count = failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        let exponent = count.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Consecutive failures recorded for `key`.
    #[must_use]
    pub fn failures(&self, key: &str) -> u32 {
        self.lock().get(key).copied().unwrap_or(0)
    }
}

/// Determine if a Kubernetes error is retryable.
///
/// # Retryable Errors
///
/// - **HTTP 429** (Too Many Requests) - Rate limiting
/// - **HTTP 5xx** (Server Errors) - Temporary API server issues
/// - **Service / transport errors** - Network/connection issues
///
/// Everything else (other 4xx, serialization failures) is permanent.
pub(crate) fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
