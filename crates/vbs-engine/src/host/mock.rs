//! Mock host platform for testing
//!
//! Scripted session messages and model replies; records every call so tests
//! can assert on titles and on ephemeral session cleanup.

use super::{HostError, HostMessage, HostPlatform};
use crate::locked;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Call record for mock host operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockHostCall {
    Messages { session_id: String },
    CreateSession { session_id: String },
    Prompt { session_id: String, model: Option<String> },
    DeleteSession { session_id: String },
    SetTitle { session_id: String, title: String },
}

#[derive(Debug, Default)]
struct MockHostState {
    calls: Vec<MockHostCall>,
    messages: HashMap<String, Vec<HostMessage>>,
    replies: VecDeque<Result<String, String>>,
    reply_delay: Option<Duration>,
    live_sessions: BTreeSet<String>,
    next_session: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockHostState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_message(&self, session_id: &str, message: HostMessage) {
        locked(&self.state)
            .messages
            .entry(session_id.to_string())
            .or_default()
            .push(message);
    }

    /// Queue the next model reply. Without a queued reply, prompts fail.
    pub fn push_reply(&self, reply: impl Into<String>) {
        locked(&self.state).replies.push_back(Ok(reply.into()));
    }

    pub fn push_reply_error(&self, message: impl Into<String>) {
        locked(&self.state).replies.push_back(Err(message.into()));
    }

    /// Every prompt sleeps this long before replying.
    pub fn set_reply_delay(&self, delay: Duration) {
        locked(&self.state).reply_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<MockHostCall> {
        locked(&self.state).calls.clone()
    }

    /// Titles set so far, in order.
    pub fn titles(&self) -> Vec<(String, String)> {
        locked(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                MockHostCall::SetTitle { session_id, title } => {
                    Some((session_id.clone(), title.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn prompt_count(&self) -> usize {
        locked(&self.state)
            .calls
            .iter()
            .filter(|c| matches!(c, MockHostCall::Prompt { .. }))
            .count()
    }

    /// Ephemeral sessions created and not yet deleted.
    pub fn live_sessions(&self) -> Vec<String> {
        locked(&self.state).live_sessions.iter().cloned().collect()
    }
}

#[async_trait::async_trait]
impl HostPlatform for MockHost {
    async fn session_messages(&self, session_id: &str) -> Result<Vec<HostMessage>, HostError> {
        let mut state = locked(&self.state);
        state.calls.push(MockHostCall::Messages {
            session_id: session_id.to_string(),
        });
        state
            .messages
            .get(session_id)
            .cloned()
            .ok_or_else(|| HostError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn create_session(&self, title: &str) -> Result<String, HostError> {
        let mut state = locked(&self.state);
        state.next_session += 1;
        let session_id = format!("ses_mock_{}", state.next_session);
        debug!("Mock: created ephemeral session {} ({})", session_id, title);
        state.live_sessions.insert(session_id.clone());
        state.calls.push(MockHostCall::CreateSession {
            session_id: session_id.clone(),
        });
        Ok(session_id)
    }

    async fn prompt(
        &self,
        session_id: &str,
        _text: &str,
        model: Option<&str>,
    ) -> Result<String, HostError> {
        let (delay, reply) = {
            let mut state = locked(&self.state);
            state.calls.push(MockHostCall::Prompt {
                session_id: session_id.to_string(),
                model: model.map(String::from),
            });
            (state.reply_delay, state.replies.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(HostError::request("prompt", message)),
            None => Err(HostError::request("prompt", "no scripted reply")),
        }
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), HostError> {
        let mut state = locked(&self.state);
        state.calls.push(MockHostCall::DeleteSession {
            session_id: session_id.to_string(),
        });
        if state.live_sessions.remove(session_id) {
            Ok(())
        } else {
            Err(HostError::SessionNotFound {
                session_id: session_id.to_string(),
            })
        }
    }

    async fn set_session_title(&self, session_id: &str, title: &str) -> Result<(), HostError> {
        locked(&self.state).calls.push(MockHostCall::SetTitle {
            session_id: session_id.to_string(),
            title: title.to_string(),
        });
        Ok(())
    }
}
