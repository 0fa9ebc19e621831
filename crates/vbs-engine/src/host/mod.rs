//! Host platform collaborator
//!
//! The host fires lifecycle events (decoded in [`events`]) and exposes a
//! small SDK surface the reconciliation pass uses: reading a session's
//! messages, prompting a model in a throwaway session, and setting a
//! session's display title.

pub mod events;
pub mod mock;

pub use events::{HostEvent, ToolKind};
pub use mock::{MockHost, MockHostCall};

use serde::{Deserialize, Serialize};

/// Host SDK errors with structured variants
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host request '{operation}' failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("host session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("host operation '{operation}' is not supported")]
    Unsupported { operation: &'static str },
}

impl HostError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        HostError::Request {
            operation,
            message: message.into(),
            source: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    #[serde(other)]
    Other,
}

/// One message of a host session, reduced to its text parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMessage {
    pub role: MessageRole,
    pub text: String,
}

impl HostMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: text.into(),
        }
    }
}

/// Most recent user-authored message with any text, if any.
pub fn latest_user_text(messages: &[HostMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.text.trim())
        .find(|t| !t.is_empty())
}

/// Host SDK surface consumed by the engine
///
/// Implementations must be `Send + Sync`; the engine shares one instance
/// across concurrently running event handlers.
#[async_trait::async_trait]
pub trait HostPlatform: Send + Sync {
    /// Messages of `session_id`, oldest first.
    async fn session_messages(&self, session_id: &str) -> Result<Vec<HostMessage>, HostError>;

    /// Create an ephemeral session and return its id.
    async fn create_session(&self, title: &str) -> Result<String, HostError>;

    /// Send `text` to a model inside `session_id` and return the reply text.
    ///
    /// `model` of `None` means the host's default model.
    async fn prompt(
        &self,
        session_id: &str,
        text: &str,
        model: Option<&str>,
    ) -> Result<String, HostError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), HostError>;

    async fn set_session_title(&self, session_id: &str, title: &str) -> Result<(), HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_user_text_skips_assistant_and_blank() {
        let messages = vec![
            HostMessage::user("fix the login crash"),
            HostMessage::assistant("done"),
            HostMessage::user("   "),
        ];
        assert_eq!(latest_user_text(&messages), Some("fix the login crash"));
        assert_eq!(latest_user_text(&[]), None);
    }

    #[test]
    fn unknown_role_decodes_as_other() {
        let message: HostMessage =
            serde_json::from_str(r#"{"role":"system","text":"x"}"#).unwrap();
        assert_eq!(message.role, MessageRole::Other);
    }
}
