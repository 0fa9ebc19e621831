//! Short-lived memo of file -> branch per conversation

use super::inference::Confidence;
use crate::conversation::ConversationId;
use crate::locked;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub branch_id: String,
    pub branch_name: String,
    pub confidence: Confidence,
    pub conversation_id: ConversationId,
    pub cached_at: Instant,
}

/// Keys are scoped by conversation, so one session's entry is never visible
/// under another session's key.
#[derive(Debug)]
pub struct AssignmentCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl AssignmentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn key_for(conversation: &ConversationId, path: &str) -> String {
        format!("{conversation}:{}", path.trim_start_matches("./"))
    }

    /// Entry younger than the TTL; an expired entry is evicted.
    pub fn get(&self, conversation: &ConversationId, path: &str) -> Option<CacheEntry> {
        let key = Self::key_for(conversation, path);
        let mut entries = locked(&self.entries);
        match entries.get(&key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(
        &self,
        conversation: &ConversationId,
        path: &str,
        branch_id: &str,
        branch_name: &str,
        confidence: Confidence,
    ) {
        locked(&self.entries).insert(
            Self::key_for(conversation, path),
            CacheEntry {
                branch_id: branch_id.to_string(),
                branch_name: branch_name.to_string(),
                confidence,
                conversation_id: conversation.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, conversation: &ConversationId, path: &str) {
        locked(&self.entries).remove(&Self::key_for(conversation, path));
    }

    /// Drop every entry of `conversation`, e.g. after branches were renamed.
    pub fn invalidate_conversation(&self, conversation: &ConversationId) {
        locked(&self.entries).retain(|_, e| &e.conversation_id != conversation);
    }

    pub fn purge_expired(&self) -> usize {
        let mut entries = locked(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| e.cached_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        locked(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
