//! Background sweep of expired state.
//!
//! Lazy eviction only runs when a session is touched, so abandoned sessions and
//! never-used tokens would otherwise stay in memory. The sweeper periodically
//! removes invalid sessions (and tears down their VMs), expired anti-forgery
//! tokens and elapsed rate windows. Sessions evicted on access with a VM still
//! attached come back through the same sweep.

use crate::auth::middleware::AppState;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// What a single sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub remote_terminated: usize,
    pub tokens: usize,
    pub rate_windows: usize,
}

/// Handle to the running sweeper. Dropping it leaves the task running.
pub struct SweepHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop the sweeper and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Sweeper task failed");
        }
    }
}

/// Spawn the sweep loop. The first sweep runs one `interval` after start.
pub fn spawn_sweeper(state: AppState, interval: Duration) -> SweepHandle {
    let (tx, mut rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut rx => {
                    tracing::debug!("Sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    sweep_once(&state).await;
                }
            }
        }
    });

    SweepHandle { shutdown: tx, task }
}

/// Run one sweep pass over every store.
pub async fn sweep_once(state: &AppState) -> SweepReport {
    let expired = state.sessions.sweep();

    // Store locks are released; provider calls happen outside them
    let mut remote_terminated = 0;
    for session in &expired {
        state.tokens.revoke_session(&session.id);
        if let Some(remote) = &session.remote {
            if state
                .provisioner
                .terminate_session(&remote.remote_session_id)
                .await
            {
                remote_terminated += 1;
            } else {
                tracing::warn!(
                    session_id = %session.id,
                    remote_session_id = %remote.remote_session_id,
                    "Failed to terminate VM of expired session"
                );
            }
        }
    }

    let report = SweepReport {
        sessions: expired.len(),
        remote_terminated,
        tokens: state.tokens.sweep_expired(),
        rate_windows: state.rate_limiter.prune(),
    };

    if report != SweepReport::default() {
        tracing::info!(
            sessions = report.sessions,
            remote_terminated = report.remote_terminated,
            tokens = report.tokens,
            rate_windows = report.rate_windows,
            active_sessions = state.sessions.len(),
            "Sweep completed"
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteSession;
    use crate::routes::test_support::harness;

    fn remote(id: &str) -> RemoteSession {
        RemoteSession {
            remote_session_id: id.to_string(),
            embed_url: format!("https://vm.example/{}", id),
            admin_token: "admin".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sweep_once_removes_expired_state() {
        let h = harness();

        let stale = h.state.sessions.create("203.0.113.7", false);
        h.state.sessions.attach_remote(&stale.id, remote("vm-stale"));
        let bound = h.state.tokens.issue(Some(&stale.id)).value;
        h.state.rate_limiter.allow("203.0.113.7");

        h.clock.advance(Duration::from_secs(29));
        let fresh = h.state.sessions.create("198.51.100.1", true);
        h.clock.advance(Duration::from_secs(2));

        let report = sweep_once(&h.state).await;
        assert_eq!(report.sessions, 1);
        assert_eq!(report.remote_terminated, 1);
        assert_eq!(report.rate_windows, 0);

        assert!(h.state.sessions.get(&fresh.id).is_some());
        assert!(h.state.sessions.get(&stale.id).is_none());
        assert!(!h.state.tokens.verify(&bound, None));
        assert_eq!(*h.provisioner.terminated.lock().unwrap(), vec!["vm-stale"]);
    }

    #[tokio::test]
    async fn test_sweep_once_tokens_and_windows() {
        let h = harness();
        h.state.tokens.issue(None);
        h.state.rate_limiter.allow("203.0.113.7");

        h.clock.advance(Duration::from_secs(301));
        let report = sweep_once(&h.state).await;
        assert_eq!(report.tokens, 1);
        assert_eq!(report.rate_windows, 1);
        assert!(h.state.tokens.is_empty());

        assert_eq!(sweep_once(&h.state).await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweeper_runs_and_shuts_down() {
        let h = harness();
        h.state.sessions.create("203.0.113.7", false);
        h.clock.advance(Duration::from_secs(31));

        let handle = spawn_sweeper(h.state.clone(), Duration::from_millis(20));
        assert_eq!(h.state.sessions.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.state.sessions.len(), 0);

        handle.shutdown().await;
    }
}
