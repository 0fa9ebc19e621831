//! Conversation ids
//!
//! The branch tool keys its per-session bookkeeping by an opaque UUID. We
//! derive it from the *branch seed* (the root session id, or a configured
//! override) so every sub-agent of a root lands on the same id and the id is
//! stable across restarts.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::{Builder, Uuid};
use vbranch_sync_core::io::hash::digest;

const SEED_DOMAIN: &str = "vbranch-sync:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Deterministic id for `seed`: the first 16 bytes of the BLAKE3 digest
    /// of the domain-tagged seed, shaped as a version 4 UUID.
    pub fn derive(seed: &str) -> Self {
        let hash = digest(format!("{SEED_DOMAIN}{seed}").as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        let uuid = Builder::from_random_bytes(bytes).into_uuid();
        Self(uuid.hyphenated().to_string())
    }

    /// Id for a root session, honoring a branch-seed override.
    pub fn for_root(root_session_id: &str, seed_override: Option<&str>) -> Self {
        Self::derive(branch_seed(root_session_id, seed_override))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `value` has the shape the branch tool accepts as a session
    /// key: a lowercase hyphenated version 4 UUID.
    pub fn is_well_formed(value: &str) -> bool {
        value.len() == 36
            && value == value.to_ascii_lowercase()
            && Uuid::parse_str(value).is_ok_and(|u| u.get_version_num() == 4)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Seed for a root session. A non-blank override collapses every session
/// onto one seed.
pub fn branch_seed<'a>(root_session_id: &'a str, seed_override: Option<&'a str>) -> &'a str {
    seed_override
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(root_session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_id() {
        assert_eq!(
            ConversationId::derive("ses_123"),
            ConversationId::derive("ses_123")
        );
    }

    #[test]
    fn different_seeds_differ() {
        let ids: std::collections::HashSet<_> = (0..1000)
            .map(|i| ConversationId::derive(&format!("ses_{i}")))
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn id_has_uuid_v4_shape() {
        for seed in ["", "a", "ses_01J0000000000000000000000", "ünïcödé"] {
            let id = ConversationId::derive(seed);
            assert!(ConversationId::is_well_formed(id.as_str()), "{id}");
        }
        assert!(!ConversationId::is_well_formed("not-a-uuid"));
        assert!(!ConversationId::is_well_formed(
            "6BA7B810-9DAD-41D1-80B4-00C04FD430C8"
        ));
    }

    #[test]
    fn override_collapses_roots() {
        let a = ConversationId::for_root("ses_a", Some("shared"));
        let b = ConversationId::for_root("ses_b", Some("shared"));
        assert_eq!(a, b);
        assert_ne!(
            ConversationId::for_root("ses_a", None),
            ConversationId::for_root("ses_b", None)
        );
    }

    #[test]
    fn blank_override_is_ignored() {
        assert_eq!(branch_seed("ses_a", Some("  ")), "ses_a");
        assert_eq!(branch_seed("ses_a", Some(" main ")), "main");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ConversationId::derive("x");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
