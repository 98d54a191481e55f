// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `main.rs` - signal handling and graceful shutdown

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    /// Test that SIGTERM signal handler can be created on Unix platforms
    #[tokio::test]
    #[cfg(unix)]
    async fn test_sigterm_signal_handler_creation() {
        use tokio::signal::unix::{signal, SignalKind};

        let result = signal(SignalKind::terminate());
        assert!(
            result.is_ok(),
            "Should be able to create SIGTERM signal handler"
        );
    }

    /// Without a signal the wait never completes
    #[tokio::test]
    async fn test_wait_for_signal_blocks_without_signal() {
        let result = timeout(StdDuration::from_millis(100), wait_for_signal()).await;
        assert!(
            result.is_err(),
            "wait_for_signal() should time out when no signal is sent"
        );
    }

    /// A task exiting first wins the select, as in `async_main`
    #[tokio::test]
    async fn test_task_exit_wins_over_signal() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        });

        let received = tokio::select! {
            result = wait_for_signal() => result.unwrap(),
            Some(joined) = tasks.join_next() => {
                assert!(joined.is_ok());
                "task exit"
            }
        };

        assert_eq!(received, "task exit");
    }

    /// Triggering shutdown stops every task spawned with the signal
    #[tokio::test]
    async fn test_graceful_shutdown_flow() {
        let (trigger, signal) = shutdown::channel();
        let mut tasks = JoinSet::new();
        for _ in 0..3 {
            let mut signal = signal.clone();
            tasks.spawn(async move { shutdown::wait(&mut signal).await });
        }

        trigger.send(true).unwrap();

        let drained = timeout(StdDuration::from_secs(1), async {
            let mut finished = 0;
            while let Some(joined) = tasks.join_next().await {
                joined.unwrap();
                finished += 1;
            }
            finished
        })
        .await
        .expect("all tasks stop after shutdown is triggered");
        assert_eq!(drained, 3);
    }
}

// Integration test documentation
// ================================
// The signal handling functionality should also be tested manually:
//
// 1. Deploy the controller to a Kubernetes cluster
// 2. Watch logs: kubectl logs -f <pod-name>
// 3. Delete the pod: kubectl delete pod <pod-name>
// 4. Verify logs show:
//    - "Received SIGTERM (pod termination), initiating graceful shutdown..."
//    - "Stopping controller and releasing leader election lease..."
//    - "Graceful shutdown completed successfully"
// 5. If using leader election, verify another pod acquires leadership quickly
