//! Branch CLI command surface
//!
//! Every interaction with the external virtual-branch tool is one of the
//! [`BranchCommand`] variants. The command knows its argument vector, its
//! optional stdin payload and which [`Subcommand`] retry budget applies.

use serde_json::{Value, json};

/// Subcommand families, each with its own retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subcommand {
    /// Read the workspace status snapshot
    Status,
    /// Move a change onto a branch
    Stage,
    /// Attach a file edit to a conversation
    Attach,
    /// Commit the conversation's pending edits
    Finalize,
    /// Rewrite a commit message or branch name
    Reword,
    /// Remove a branch from the workspace
    Unapply,
}

impl Subcommand {
    pub const ALL: [Subcommand; 6] = [
        Subcommand::Status,
        Subcommand::Stage,
        Subcommand::Attach,
        Subcommand::Finalize,
        Subcommand::Reword,
        Subcommand::Unapply,
    ];

    /// Stable name used in logs and in `[commands.retries]`.
    pub fn name(self) -> &'static str {
        match self {
            Subcommand::Status => "status",
            Subcommand::Stage => "stage",
            Subcommand::Attach => "attach",
            Subcommand::Finalize => "finalize",
            Subcommand::Reword => "reword",
            Subcommand::Unapply => "unapply",
        }
    }

    /// Retries after the first attempt when the failure is transient.
    ///
    /// Finalizing commits the session's work, so losing it costs more than
    /// losing a single staged edit; it gets the largest budget.
    pub fn default_retries(self) -> u32 {
        match self {
            Subcommand::Status => 2,
            Subcommand::Stage => 2,
            Subcommand::Attach => 3,
            Subcommand::Finalize => 6,
            Subcommand::Reword => 3,
            Subcommand::Unapply => 2,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Recover the subcommand from a raw argument vector.
    pub fn from_args(args: &[String]) -> Option<Self> {
        match args.first().map(String::as_str)? {
            "status" => Some(Subcommand::Status),
            "rub" => Some(Subcommand::Stage),
            "reword" => Some(Subcommand::Reword),
            "unapply" => Some(Subcommand::Unapply),
            "claude" => match args.get(1).map(String::as_str)? {
                "post-tool" => Some(Subcommand::Attach),
                "stop" => Some(Subcommand::Finalize),
                _ => None,
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for Subcommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One invocation of the branch CLI.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchCommand {
    /// `status --json`
    Status,
    /// `rub <source> <destination>`
    Stage { source: String, destination: String },
    /// `claude post-tool` with a hook payload on stdin
    AttachEdit {
        conversation_id: String,
        file_path: String,
        tool_name: String,
        tool_input: Value,
    },
    /// `claude stop` with a hook payload on stdin
    Finalize { conversation_id: String },
    /// `reword <target> -m <message>`
    Reword { target: String, message: String },
    /// `unapply <branch>`
    Unapply { branch_id: String },
}

impl BranchCommand {
    pub fn subcommand(&self) -> Subcommand {
        match self {
            BranchCommand::Status => Subcommand::Status,
            BranchCommand::Stage { .. } => Subcommand::Stage,
            BranchCommand::AttachEdit { .. } => Subcommand::Attach,
            BranchCommand::Finalize { .. } => Subcommand::Finalize,
            BranchCommand::Reword { .. } => Subcommand::Reword,
            BranchCommand::Unapply { .. } => Subcommand::Unapply,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let args: Vec<&str> = match self {
            BranchCommand::Status => vec!["status", "--json"],
            BranchCommand::Stage {
                source,
                destination,
            } => vec!["rub", source.as_str(), destination.as_str()],
            BranchCommand::AttachEdit { .. } => vec!["claude", "post-tool"],
            BranchCommand::Finalize { .. } => vec!["claude", "stop"],
            BranchCommand::Reword { target, message } => {
                vec!["reword", target.as_str(), "-m", message.as_str()]
            }
            BranchCommand::Unapply { branch_id } => vec!["unapply", branch_id.as_str()],
        };
        args.into_iter().map(String::from).collect()
    }

    /// Hook payload written to the child's stdin, if any.
    pub fn stdin(&self) -> Option<String> {
        match self {
            BranchCommand::AttachEdit {
                conversation_id,
                file_path,
                tool_name,
                tool_input,
            } => {
                let mut input = match tool_input {
                    Value::Object(map) => map.clone(),
                    _ => serde_json::Map::new(),
                };
                input.insert("file_path".to_string(), Value::String(file_path.clone()));
                Some(
                    json!({
                        "session_id": conversation_id,
                        "transcript_path": "",
                        "hook_event_name": "PostToolUse",
                        "tool_name": tool_name,
                        "tool_input": Value::Object(input),
                        "tool_response": {},
                    })
                    .to_string(),
                )
            }
            BranchCommand::Finalize { conversation_id } => Some(
                json!({
                    "session_id": conversation_id,
                    "transcript_path": "",
                    "hook_event_name": "Stop",
                    "stop_hook_active": false,
                })
                .to_string(),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_round_trip_to_subcommand() {
        let commands = [
            BranchCommand::Status,
            BranchCommand::Stage {
                source: "g0".into(),
                destination: "b1".into(),
            },
            BranchCommand::AttachEdit {
                conversation_id: "c".into(),
                file_path: "src/a.rs".into(),
                tool_name: "edit".into(),
                tool_input: json!({}),
            },
            BranchCommand::Finalize {
                conversation_id: "c".into(),
            },
            BranchCommand::Reword {
                target: "c1".into(),
                message: "fix: x".into(),
            },
            BranchCommand::Unapply {
                branch_id: "b2".into(),
            },
        ];
        for command in commands {
            assert_eq!(
                Subcommand::from_args(&command.args()),
                Some(command.subcommand()),
                "{command:?}"
            );
        }
    }

    #[test]
    fn attach_payload_carries_conversation_and_path() {
        let command = BranchCommand::AttachEdit {
            conversation_id: "conv-1".into(),
            file_path: "src/lib.rs".into(),
            tool_name: "write".into(),
            tool_input: json!({"content": "fn main() {}", "file_path": "/abs/src/lib.rs"}),
        };
        let payload: Value = serde_json::from_str(&command.stdin().unwrap()).unwrap();
        assert_eq!(payload["session_id"], "conv-1");
        assert_eq!(payload["hook_event_name"], "PostToolUse");
        assert_eq!(payload["tool_input"]["file_path"], "src/lib.rs");
        assert_eq!(payload["tool_input"]["content"], "fn main() {}");
    }

    #[test]
    fn finalize_has_larger_budget_than_attach() {
        assert!(Subcommand::Finalize.default_retries() > Subcommand::Attach.default_retries());
        assert!(Subcommand::Attach.default_retries() >= Subcommand::Stage.default_retries());
    }

    #[test]
    fn subcommand_names_parse_back() {
        for sub in Subcommand::ALL {
            assert_eq!(Subcommand::from_name(sub.name()), Some(sub));
        }
        assert_eq!(Subcommand::from_name("push"), None);
    }
}
