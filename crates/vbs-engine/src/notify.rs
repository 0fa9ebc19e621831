//! Operator notifications
//!
//! Messages queue per root session and are delivered at most once: a drain
//! empties the queue whether or not the caller manages to show the block.
//! Entries older than the TTL are dropped at drain time.

use crate::locked;
use crate::session::SessionResolver;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const BLOCK_HEADER: &str = "[vbranch-sync]";

#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub message: String,
    pub timestamp: Instant,
}

#[derive(Debug)]
pub struct NotificationManager {
    sessions: Arc<SessionResolver>,
    queues: Mutex<HashMap<String, Vec<PendingNotification>>>,
    ttl: Duration,
}

impl NotificationManager {
    pub fn new(sessions: Arc<SessionResolver>, ttl: Duration) -> Self {
        Self {
            sessions,
            queues: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Queue `message` for `root_session_id`, reaping expired entries of
    /// every queue on the way.
    pub fn enqueue(&self, root_session_id: &str, message: impl Into<String>) {
        let message = message.into();
        let mut queues = locked(&self.queues);
        let reaped = Self::reap_locked(&mut queues, self.ttl);
        if reaped > 0 {
            debug!("dropped {} expired notification(s)", reaped);
        }
        debug!(session_id = root_session_id, "queued notification: {}", message);
        queues
            .entry(root_session_id.to_string())
            .or_default()
            .push(PendingNotification {
                message,
                timestamp: Instant::now(),
            });
    }

    /// Drain the root queue of `session_id` and render what is still fresh.
    ///
    /// Accepts sub-agent ids. Returns `None` when nothing survives.
    pub fn consume(&self, session_id: &str) -> Option<String> {
        let root = self.sessions.resolve_root(session_id);
        let drained = locked(&self.queues).remove(&root)?;

        let total = drained.len();
        let fresh: Vec<_> = drained
            .into_iter()
            .filter(|n| n.timestamp.elapsed() < self.ttl)
            .collect();
        if fresh.len() < total {
            debug!(
                session_id = %root,
                "dropped {} expired notification(s) at delivery",
                total - fresh.len()
            );
        }
        if fresh.is_empty() {
            return None;
        }

        let mut block = String::from(BLOCK_HEADER);
        for notification in &fresh {
            block.push_str("\n- ");
            block.push_str(&notification.message);
        }
        Some(block)
    }

    /// Forget the queue of a deleted root session.
    pub fn discard(&self, root_session_id: &str) -> usize {
        locked(&self.queues)
            .remove(root_session_id)
            .map_or(0, |q| q.len())
    }

    pub fn pending(&self, root_session_id: &str) -> usize {
        locked(&self.queues).get(root_session_id).map_or(0, Vec::len)
    }

    fn reap_locked(queues: &mut HashMap<String, Vec<PendingNotification>>, ttl: Duration) -> usize {
        let mut reaped = 0;
        queues.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|n| n.timestamp.elapsed() < ttl);
            reaped += before - queue.len();
            !queue.is_empty()
        });
        reaped
    }
}
