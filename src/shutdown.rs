// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Process-wide shutdown signal.
//!
//! A `watch` channel carrying `true` once shutdown was requested. Long-running
//! tasks race their work against [`wait`] inside `tokio::select!`, so in-flight
//! API calls and retry sleeps are dropped at their next await point.

use tokio::sync::watch;

/// Receiving side handed to every long-running task.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Sending side kept by `main`.
pub type ShutdownTrigger = watch::Sender<bool>;

/// Create a new, not yet triggered, shutdown channel.
#[must_use]
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    watch::channel(false)
}

/// Resolve once shutdown was requested or the trigger was dropped.
pub async fn wait(signal: &mut ShutdownSignal) {
    let _ = signal.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let (trigger, mut signal) = channel();
        let waiter = tokio::spawn(async move { wait(&mut signal).await });

        trigger.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait should resolve after trigger")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_resolves_when_trigger_dropped() {
        let (trigger, mut signal) = channel();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(1), wait(&mut signal))
            .await
            .expect("a dropped trigger counts as shutdown");
    }

    #[tokio::test]
    async fn test_wait_pending_without_trigger() {
        let (_trigger, mut signal) = channel();
        let result = tokio::time::timeout(Duration::from_millis(50), wait(&mut signal)).await;
        assert!(result.is_err(), "wait must not resolve before shutdown");
    }
}
