//! Host lifecycle event decoding
//!
//! Host events arrive as loosely shaped JSON property bags:
//!
//! ```json
//! {"type": "tool.execute.after",
//!  "properties": {"sessionID": "ses_1", "callID": "call_1", "tool": "edit",
//!                 "args": {"filePath": "src/a.rs"}, "metadata": {}}}
//! ```
//!
//! Decoding never fails loudly. Unknown event types and events missing a
//! required id decode to `None` and are skipped by the engine.

use serde_json::Value;
use tracing::debug;

const SESSION_ID_KEYS: &[&str] = &["sessionID", "sessionId", "session_id"];
const CALL_ID_KEYS: &[&str] = &["callID", "callId", "call_id"];
const PARENT_ID_KEYS: &[&str] = &["parentID", "parentId", "parent_id"];
const PATH_KEYS: &[&str] = &["filePath", "file_path", "path"];
const EXECUTION_ID_KEYS: &[&str] = &["sessionId", "session_id", "sessionID"];

const EDIT_TOOLS: &[&str] = &["edit", "write", "multiedit", "patch"];
const SPAWN_TOOL: &str = "task";

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ToolStarted {
        session_id: String,
        call_id: String,
        tool: String,
        args: Value,
    },
    ToolExecuted {
        session_id: String,
        call_id: String,
        tool: String,
        args: Value,
        metadata: Value,
    },
    SessionCreated {
        session_id: String,
        parent_id: Option<String>,
    },
    SessionIdle {
        session_id: String,
    },
    SessionDeleted {
        session_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Writes a file; the target comes from the tool args.
    Edit,
    /// Spawns a sub-agent session.
    Spawn,
    Other,
}

impl ToolKind {
    pub fn of(tool: &str) -> Self {
        let tool = tool.trim().to_ascii_lowercase();
        if EDIT_TOOLS.contains(&tool.as_str()) {
            ToolKind::Edit
        } else if tool == SPAWN_TOOL {
            ToolKind::Spawn
        } else {
            ToolKind::Other
        }
    }
}

impl HostEvent {
    pub fn decode(raw: &Value) -> Option<Self> {
        let event_type = raw.get("type").and_then(Value::as_str)?;
        let props = raw.get("properties").unwrap_or(raw);

        let event = match event_type {
            "tool.execute.before" => HostEvent::ToolStarted {
                session_id: string_field(props, SESSION_ID_KEYS)?,
                call_id: string_field(props, CALL_ID_KEYS)?,
                tool: string_field(props, &["tool"])?,
                args: props.get("args").cloned().unwrap_or(Value::Null),
            },
            "tool.execute.after" => HostEvent::ToolExecuted {
                session_id: string_field(props, SESSION_ID_KEYS)?,
                call_id: string_field(props, CALL_ID_KEYS)?,
                tool: string_field(props, &["tool"])?,
                args: props.get("args").cloned().unwrap_or(Value::Null),
                metadata: props.get("metadata").cloned().unwrap_or(Value::Null),
            },
            "session.created" => {
                // Newer hosts nest the session record under `info`.
                let info = props.get("info").unwrap_or(props);
                HostEvent::SessionCreated {
                    session_id: string_field(info, &["id"])
                        .or_else(|| string_field(info, SESSION_ID_KEYS))?,
                    parent_id: string_field(info, PARENT_ID_KEYS),
                }
            }
            "session.idle" => HostEvent::SessionIdle {
                session_id: string_field(props, SESSION_ID_KEYS)?,
            },
            "session.deleted" => {
                let info = props.get("info").unwrap_or(props);
                HostEvent::SessionDeleted {
                    session_id: string_field(info, &["id"])
                        .or_else(|| string_field(info, SESSION_ID_KEYS))?,
                }
            }
            other => {
                debug!("ignoring host event type '{}'", other);
                return None;
            }
        };
        Some(event)
    }
}

/// Target path of an edit tool call.
pub fn edit_target(args: &Value) -> Option<String> {
    string_field(args, PATH_KEYS)
}

/// Session id the host assigned to a spawned sub-agent, once known.
pub fn execution_id(metadata: &Value) -> Option<String> {
    string_field(metadata, EXECUTION_ID_KEYS)
}

/// First non-blank string under any of `keys`.
fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_tool_events() {
        let raw = json!({
            "type": "tool.execute.after",
            "properties": {
                "sessionID": "ses_1",
                "callID": "call_1",
                "tool": "Edit",
                "args": {"filePath": "src/a.rs"},
                "metadata": {"diff": "..."}
            }
        });
        let event = HostEvent::decode(&raw).unwrap();
        match &event {
            HostEvent::ToolExecuted {
                session_id,
                tool,
                args,
                ..
            } => {
                assert_eq!(session_id, "ses_1");
                assert_eq!(ToolKind::of(tool), ToolKind::Edit);
                assert_eq!(edit_target(args).as_deref(), Some("src/a.rs"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn flat_payloads_decode_too() {
        let raw = json!({
            "type": "tool.execute.before",
            "session_id": "ses_1",
            "call_id": "c",
            "tool": "task"
        });
        assert!(matches!(
            HostEvent::decode(&raw),
            Some(HostEvent::ToolStarted { ref tool, .. }) if ToolKind::of(tool) == ToolKind::Spawn
        ));
    }

    #[test]
    fn session_created_with_nested_info() {
        let raw = json!({
            "type": "session.created",
            "properties": {"info": {"id": "ses_child", "parentID": "ses_root"}}
        });
        assert_eq!(
            HostEvent::decode(&raw),
            Some(HostEvent::SessionCreated {
                session_id: "ses_child".into(),
                parent_id: Some("ses_root".into())
            })
        );
    }

    #[test]
    fn missing_ids_and_unknown_types_are_skipped() {
        assert!(HostEvent::decode(&json!({"type": "session.idle", "properties": {}})).is_none());
        assert!(HostEvent::decode(&json!({"type": "message.updated"})).is_none());
        assert!(HostEvent::decode(&json!({"properties": {"sessionID": "x"}})).is_none());
        assert!(HostEvent::decode(&json!("not an object")).is_none());
        assert!(
            HostEvent::decode(&json!({"type": "session.idle", "properties": {"sessionID": "  "}}))
                .is_none()
        );
    }

    #[test]
    fn execution_id_from_metadata() {
        assert_eq!(
            execution_id(&json!({"sessionId": "ses_sub"})).as_deref(),
            Some("ses_sub")
        );
        assert_eq!(
            execution_id(&json!({"session_id": "ses_sub"})).as_deref(),
            Some("ses_sub")
        );
        assert_eq!(execution_id(&Value::Null), None);
    }

    #[test]
    fn tool_kinds() {
        for tool in ["edit", "WRITE", "multiedit", "patch"] {
            assert_eq!(ToolKind::of(tool), ToolKind::Edit);
        }
        assert_eq!(ToolKind::of("bash"), ToolKind::Other);
    }
}
