//! Commit messages and branch slugs
//!
//! Messages come from a model when it answers in time with a well-formed
//! conventional subject, and from a keyword mapping otherwise.

use crate::host::HostPlatform;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};
use vbranch_sync_core::config::ReconcileConfig;
use vbranch_sync_core::text::{first_meaningful_line, truncate_chars};

const FALLBACK_SUBJECT: &str = "update files";
const MAX_PROMPT_FILES: usize = 20;

fn conventional_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(feat|fix|chore|docs|style|refactor|perf|test|build|ci|revert)(\([^)]+\))?!?: \S",
        )
        .ok()
    })
    .as_ref()
}

/// Whether the first line of `message` is a conventional commit subject.
pub fn is_conventional(message: &str) -> bool {
    let Some(re) = conventional_regex() else {
        return false;
    };
    first_meaningful_line(message).is_some_and(|line| re.is_match(line))
}

const PREFIX_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "fix",
        &[
            "fix", "fixes", "fixed", "fixing", "bug", "bugs", "bugfix", "broken", "crash",
            "crashes", "crashing", "error", "errors",
        ],
    ),
    (
        "feat",
        &[
            "add", "adds", "added", "adding", "implement", "implements", "implemented",
            "implementing", "create", "creates", "created", "creating", "introduce",
            "introduces", "introduced", "introducing", "support", "supports", "supported",
            "supporting",
        ],
    ),
    (
        "refactor",
        &[
            "refactor", "refactors", "refactored", "refactoring", "restructure", "restructured",
            "restructuring", "clean", "cleans", "cleaned", "cleaning", "cleanup",
        ],
    ),
    (
        "docs",
        &["doc", "docs", "document", "documented", "documentation", "readme"],
    ),
    ("test", &["test", "tests", "tested", "testing"]),
];

/// Conventional type for a free-form request, `chore` when nothing matches.
pub fn keyword_prefix(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    PREFIX_KEYWORDS
        .iter()
        .find(|(_, keywords)| words.iter().any(|w| keywords.contains(w)))
        .map_or("chore", |(prefix, _)| *prefix)
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    Model,
    Keywords,
}

#[derive(Debug, Clone)]
pub struct MessageGenerator {
    max_subject_chars: usize,
    slug_max_words: usize,
    slug_max_chars: usize,
    llm_timeout: Duration,
    llm_model: Option<String>,
}

impl MessageGenerator {
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            max_subject_chars: config.max_subject_chars,
            slug_max_words: config.slug_max_words,
            slug_max_chars: config.slug_max_chars,
            llm_timeout: config.llm_timeout(),
            llm_model: config.llm_model.clone(),
        }
    }

    /// `<type>: <first line of the request>`, capped at the subject limit.
    pub fn deterministic(&self, user_message: &str) -> String {
        let prefix = keyword_prefix(user_message);
        let body = first_meaningful_line(user_message).unwrap_or(FALLBACK_SUBJECT);
        let subject = format!("{prefix}: {}", lowercase_first(body));
        self.cap(&subject)
    }

    /// Branch name for `user_message`: lowercase alphanumeric words joined by
    /// `-`, capped by word count and length. `None` when nothing is left.
    pub fn slug(&self, user_message: &str) -> Option<String> {
        let line = first_meaningful_line(user_message)?.to_lowercase();
        let words: Vec<&str> = line
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .take(self.slug_max_words)
            .collect();
        let joined = words.join("-");
        let capped = truncate_chars(&joined, self.slug_max_chars, "");
        let slug = capped.trim_matches('-').to_string();
        (!slug.is_empty()).then_some(slug)
    }

    /// Model-written message when available, keyword fallback otherwise.
    pub async fn generate(
        &self,
        host: &dyn HostPlatform,
        user_message: &str,
        files: &[String],
    ) -> (String, MessageSource) {
        match self.ask_model(host, user_message, files).await {
            Some(message) => (message, MessageSource::Model),
            None => (self.deterministic(user_message), MessageSource::Keywords),
        }
    }

    /// The ephemeral session is deleted on every path once created.
    async fn ask_model(
        &self,
        host: &dyn HostPlatform,
        user_message: &str,
        files: &[String],
    ) -> Option<String> {
        let session = match tokio::time::timeout(
            self.llm_timeout,
            host.create_session("vbranch-sync commit message"),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!("could not create message session: {}", e);
                return None;
            }
            Err(_) => {
                warn!("creating message session timed out");
                return None;
            }
        };

        let prompt = self.prompt(user_message, files);
        let reply = tokio::time::timeout(
            self.llm_timeout,
            host.prompt(&session, &prompt, self.llm_model.as_deref()),
        )
        .await;

        match tokio::time::timeout(self.llm_timeout, host.delete_session(&session)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("could not delete message session {}: {}", session, e),
            Err(_) => debug!("deleting message session {} timed out", session),
        }

        let reply = match reply {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("message generation failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!(
                    "message generation timed out after {:?}, using keyword fallback",
                    self.llm_timeout
                );
                return None;
            }
        };

        let candidate = sanitize(&reply)?;
        if !is_conventional(&candidate) {
            debug!("model reply is not a conventional subject: {}", candidate);
            return None;
        }
        Some(self.cap(&candidate))
    }

    fn prompt(&self, user_message: &str, files: &[String]) -> String {
        let mut prompt = format!(
            "Write one conventional commit subject (type: description), at most {} characters, \
             for this request. Reply with the subject only.\n\nRequest:\n{}\n",
            self.max_subject_chars,
            user_message.trim()
        );
        if !files.is_empty() {
            prompt.push_str("\nChanged files:\n");
            for file in files.iter().take(MAX_PROMPT_FILES) {
                prompt.push_str("- ");
                prompt.push_str(file);
                prompt.push('\n');
            }
        }
        prompt
    }

    fn cap(&self, subject: &str) -> String {
        if subject.chars().count() <= self.max_subject_chars {
            return subject.to_string();
        }
        let keep = self.max_subject_chars.saturating_sub(3);
        format!("{}...", truncate_chars(subject, keep, "").trim_end())
    }
}

/// First non-empty line with surrounding quotes and backticks removed.
fn sanitize(reply: &str) -> Option<String> {
    let line = first_meaningful_line(reply)?;
    let cleaned = line
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim()
        .to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        // Keep acronyms such as "API" intact.
        Some(first) if !chars.next().is_some_and(char::is_uppercase) => {
            first.to_lowercase().chain(text.chars().skip(1)).collect()
        }
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockHost;

    fn generator() -> MessageGenerator {
        MessageGenerator::new(&ReconcileConfig::default())
    }

    #[test]
    fn conventional_detection() {
        assert!(is_conventional("fix: handle empty token"));
        assert!(is_conventional("feat(auth)!: drop v1 login\n\nbody"));
        assert!(!is_conventional("wip"));
        assert!(!is_conventional("Fix: capitalized type"));
        assert!(!is_conventional("feat:missing space"));
    }

    #[test]
    fn keyword_prefixes() {
        assert_eq!(keyword_prefix("Fix the login crash"), "fix");
        assert_eq!(keyword_prefix("please add dark mode"), "feat");
        assert_eq!(keyword_prefix("refactor the parser"), "refactor");
        assert_eq!(keyword_prefix("update the README"), "docs");
        assert_eq!(keyword_prefix("write tests for cache"), "test");
        assert_eq!(keyword_prefix("bump versions"), "chore");
        // First matching group wins.
        assert_eq!(keyword_prefix("add a test for the crash"), "fix");
    }

    #[test]
    fn deterministic_message_is_conventional_and_capped() {
        let g = generator();
        let message = g.deterministic("Fix the login crash when the token is empty");
        assert_eq!(message, "fix: fix the login crash when the token is empty");
        assert!(is_conventional(&message));

        let long = g.deterministic(&"implement ".repeat(40));
        assert!(long.chars().count() <= 72);
        assert!(long.ends_with("..."));
        assert!(is_conventional(&long));

        assert_eq!(g.deterministic("   "), "chore: update files");
        assert_eq!(g.deterministic("API keys leak"), "chore: API keys leak");
    }

    #[test]
    fn slug_rules() {
        let g = generator();
        assert_eq!(
            g.slug("Fix the login crash, when token is empty!").as_deref(),
            Some("fix-the-login-crash-when")
        );
        assert_eq!(g.slug("!!!"), None);
        let long = g.slug(&"abcdefghijklmnop ".repeat(5)).unwrap();
        assert!(long.chars().count() <= 50);
        assert!(!long.ends_with('-'));
    }

    #[tokio::test]
    async fn model_reply_is_sanitized_and_session_deleted() {
        let host = MockHost::new();
        host.push_reply("`feat(cache): add ttl eviction`\n\nextra");
        let (message, source) = generator()
            .generate(&host, "add ttl eviction", &["src/cache.rs".into()])
            .await;
        assert_eq!(message, "feat(cache): add ttl eviction");
        assert_eq!(source, MessageSource::Model);
        assert!(host.live_sessions().is_empty());
    }

    #[tokio::test]
    async fn non_conventional_reply_falls_back() {
        let host = MockHost::new();
        host.push_reply("Sure! Here is a message: added eviction");
        let (message, source) = generator().generate(&host, "add eviction", &[]).await;
        assert_eq!(source, MessageSource::Keywords);
        assert_eq!(message, "feat: add eviction");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out_and_session_is_still_deleted() {
        let host = MockHost::new();
        host.push_reply("fix: late");
        host.set_reply_delay(Duration::from_secs(60));
        let (_, source) = generator().generate(&host, "fix it", &[]).await;
        assert_eq!(source, MessageSource::Keywords);
        assert!(host.live_sessions().is_empty());
    }

    #[tokio::test]
    async fn model_error_falls_back() {
        let host = MockHost::new();
        host.push_reply_error("rate limited");
        let (_, source) = generator().generate(&host, "fix it", &[]).await;
        assert_eq!(source, MessageSource::Keywords);
    }
}
