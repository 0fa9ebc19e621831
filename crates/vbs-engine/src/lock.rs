//! Per-file soft locks
//!
//! Orders two edit pipelines that touch the same path. This is a fence, not
//! mutual exclusion: a waiter that times out proceeds anyway, and a lock
//! older than the staleness threshold is assumed leaked and overridden
//! without waiting. Nothing here spans different paths.

use crate::locked;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use vbranch_sync_core::config::LockConfig;

#[derive(Debug, Clone)]
pub struct FileLock {
    pub owner_session: String,
    pub acquired_at: Instant,
    pub operation: String,
}

/// How an [`LockCoordinator::acquire`] call got the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The path was free.
    Acquired,
    /// The caller already held it.
    Reentrant,
    /// Another session held it and released within the timeout.
    AcquiredAfterWait { waited: Duration },
    /// The previous lock was older than the staleness threshold.
    OverrodeStale { previous_owner: String },
    /// Gave up waiting and took the lock anyway.
    TimedOut { holder: String },
}

impl AcquireOutcome {
    pub fn was_contended(&self) -> bool {
        matches!(
            self,
            AcquireOutcome::AcquiredAfterWait { .. } | AcquireOutcome::TimedOut { .. }
        )
    }
}

/// Counters for lock behavior over the engine's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    pub contended: u64,
    pub timeouts: u64,
    pub stale_overrides: u64,
    pub reaped: u64,
}

#[derive(Debug)]
pub struct LockCoordinator {
    locks: Mutex<HashMap<String, FileLock>>,
    stats: Mutex<LockStats>,
    stale_after: Duration,
    poll_interval: Duration,
    acquire_timeout: Duration,
}

impl LockCoordinator {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            stats: Mutex::new(LockStats::default()),
            stale_after: config.stale_after(),
            poll_interval: config.poll_interval(),
            acquire_timeout: config.acquire_timeout(),
        }
    }

    pub async fn acquire(&self, path: &str, session_id: &str, operation: &str) -> AcquireOutcome {
        let started = Instant::now();
        let mut waiting = false;

        loop {
            {
                let mut locks = locked(&self.locks);
                let outcome = match locks.get(path) {
                    None if waiting => Some(AcquireOutcome::AcquiredAfterWait {
                        waited: started.elapsed(),
                    }),
                    None => Some(AcquireOutcome::Acquired),
                    Some(held) if held.owner_session == session_id => {
                        Some(AcquireOutcome::Reentrant)
                    }
                    Some(held) if held.acquired_at.elapsed() >= self.stale_after => {
                        warn!(
                            path,
                            session_id,
                            "overriding stale lock held by '{}' for {:?} ({})",
                            held.owner_session,
                            held.acquired_at.elapsed(),
                            held.operation
                        );
                        locked(&self.stats).stale_overrides += 1;
                        Some(AcquireOutcome::OverrodeStale {
                            previous_owner: held.owner_session.clone(),
                        })
                    }
                    Some(held) => {
                        if !waiting {
                            waiting = true;
                            locked(&self.stats).contended += 1;
                            debug!(
                                path,
                                session_id,
                                "waiting for lock held by '{}' ({})",
                                held.owner_session,
                                held.operation
                            );
                        }
                        if started.elapsed() >= self.acquire_timeout {
                            warn!(
                                path,
                                session_id,
                                "lock wait timed out after {:?}, proceeding despite holder '{}'",
                                self.acquire_timeout,
                                held.owner_session
                            );
                            locked(&self.stats).timeouts += 1;
                            Some(AcquireOutcome::TimedOut {
                                holder: held.owner_session.clone(),
                            })
                        } else {
                            None
                        }
                    }
                };

                if let Some(outcome) = outcome {
                    locks.insert(
                        path.to_string(),
                        FileLock {
                            owner_session: session_id.to_string(),
                            acquired_at: Instant::now(),
                            operation: operation.to_string(),
                        },
                    );
                    return outcome;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Drop the lock on `path` if `session_id` still owns it.
    pub fn release(&self, path: &str, session_id: &str) -> bool {
        let mut locks = locked(&self.locks);
        match locks.get(path) {
            Some(held) if held.owner_session == session_id => {
                locks.remove(path);
                true
            }
            Some(held) => {
                debug!(
                    path,
                    session_id,
                    "not releasing lock now owned by '{}'", held.owner_session
                );
                false
            }
            None => false,
        }
    }

    /// Acquire, returning a guard that releases on drop.
    pub async fn lock(&self, path: &str, session_id: &str, operation: &str) -> FileLockGuard<'_> {
        self.acquire(path, session_id, operation).await;
        FileLockGuard {
            coordinator: self,
            path: path.to_string(),
            session_id: session_id.to_string(),
        }
    }

    /// Drop every lock older than the staleness threshold.
    pub fn reap(&self) -> usize {
        let mut locks = locked(&self.locks);
        let before = locks.len();
        locks.retain(|path, held| {
            let keep = held.acquired_at.elapsed() < self.stale_after;
            if !keep {
                warn!(
                    path = %path,
                    "reaping stale lock held by '{}' ({})", held.owner_session, held.operation
                );
            }
            keep
        });
        let reaped = before - locks.len();
        if reaped > 0 {
            locked(&self.stats).reaped += reaped as u64;
        }
        reaped
    }

    pub fn holder(&self, path: &str) -> Option<FileLock> {
        locked(&self.locks).get(path).cloned()
    }

    pub fn stats(&self) -> LockStats {
        *locked(&self.stats)
    }
}

/// Releases its lock when dropped, on every exit path.
#[derive(Debug)]
pub struct FileLockGuard<'a> {
    coordinator: &'a LockCoordinator,
    path: String,
    session_id: String,
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release(&self.path, &self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn coordinator() -> LockCoordinator {
        LockCoordinator::new(&LockConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn free_path_locks_immediately_and_reenters() {
        let c = coordinator();
        assert_eq!(c.acquire("a.rs", "s1", "edit").await, AcquireOutcome::Acquired);
        assert_eq!(c.acquire("a.rs", "s1", "edit").await, AcquireOutcome::Reentrant);
        assert!(c.release("a.rs", "s1"));
        assert!(c.holder("a.rs").is_none());
        assert_eq!(c.stats(), LockStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_lock_after_release() {
        let c = Arc::new(coordinator());
        c.acquire("a.rs", "s1", "edit").await;

        let waiter = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.acquire("a.rs", "s2", "write").await })
        };
        tokio::time::sleep(Duration::from_millis(350)).await;
        c.release("a.rs", "s1");

        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::AcquiredAfterWait { .. }));
        assert_eq!(c.holder("a.rs").unwrap().owner_session, "s2");
        assert_eq!(c.stats().contended, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_proceeds_and_late_release_is_ignored() {
        let c = coordinator();
        c.acquire("a.rs", "s1", "edit").await;
        let outcome = c.acquire("a.rs", "s2", "edit").await;
        assert_eq!(
            outcome,
            AcquireOutcome::TimedOut {
                holder: "s1".into()
            }
        );
        assert!(!c.release("a.rs", "s1"));
        assert_eq!(c.holder("a.rs").unwrap().owner_session, "s2");
        assert_eq!(c.stats().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lock_is_overridden_without_waiting() {
        let c = coordinator();
        c.acquire("a.rs", "s1", "edit").await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let before = Instant::now();
        let outcome = c.acquire("a.rs", "s2", "edit").await;
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(
            outcome,
            AcquireOutcome::OverrodeStale {
                previous_owner: "s1".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reap_drops_only_stale_locks() {
        let c = coordinator();
        c.acquire("old.rs", "s1", "edit").await;
        tokio::time::advance(Duration::from_secs(45)).await;
        c.acquire("new.rs", "s2", "edit").await;
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(c.reap(), 1);
        assert!(c.holder("old.rs").is_none());
        assert!(c.holder("new.rs").is_some());
        assert_eq!(c.stats().reaped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn guard_releases_on_drop() {
        let c = coordinator();
        {
            let _guard = c.lock("a.rs", "s1", "edit").await;
            assert!(c.holder("a.rs").is_some());
        }
        assert!(c.holder("a.rs").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn different_paths_do_not_contend() {
        let c = coordinator();
        c.acquire("a.rs", "s1", "edit").await;
        assert_eq!(c.acquire("b.rs", "s2", "edit").await, AcquireOutcome::Acquired);
        assert_eq!(c.stats().contended, 0);
    }
}
