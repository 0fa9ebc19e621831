//! Failure classification for branch CLI output
//!
//! Checked in order: success, expected-benign, recoverable-race,
//! retryable-transient, then unrecognized (fatal once surfaced).

use super::runner::RawOutput;

/// "Nothing to do" signatures. Treated as success without retry.
const BENIGN_SIGNATURES: &[&str] = &[
    "not initialized",
    "not in workspace mode",
    "nothing to commit",
    "no changes",
];

/// Transient-inconsistency signatures. Logged and skipped.
const RACE_SIGNATURES: &[&str] = &[
    "reference mismatch",
    "reference has changed",
    "stale reference",
];

/// Contention signatures. Retried with backoff.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "database is locked",
    "is locked",
    "resource temporarily unavailable",
    "index.lock",
];

const NOT_FOUND_SIGNATURES: &[&str] = &["not found", "no such branch", "does not exist"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Benign,
    Race,
    Transient,
    Unrecognized,
}

/// Why a branch removal failed, as far as the output tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Contention,
    NotFound,
    Unknown,
}

fn matches_any(haystack: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|sig| haystack.contains(sig))
}

/// Lowercased stderr followed by stdout; some tool versions report errors on
/// stdout only.
fn diagnostic_text(output: &RawOutput) -> String {
    format!("{}\n{}", output.stderr, output.stdout).to_ascii_lowercase()
}

pub fn classify(output: &RawOutput) -> Classification {
    if output.is_success() {
        return Classification::Success;
    }
    let text = diagnostic_text(output);
    if matches_any(&text, BENIGN_SIGNATURES) {
        Classification::Benign
    } else if matches_any(&text, RACE_SIGNATURES) {
        Classification::Race
    } else if matches_any(&text, TRANSIENT_SIGNATURES) {
        Classification::Transient
    } else {
        Classification::Unrecognized
    }
}

pub fn failure_reason(detail: &str) -> FailureReason {
    let text = detail.to_ascii_lowercase();
    if matches_any(&text, TRANSIENT_SIGNATURES) || text.contains("timed out") {
        FailureReason::Contention
    } else if matches_any(&text, NOT_FOUND_SIGNATURES) {
        FailureReason::NotFound
    } else {
        FailureReason::Unknown
    }
}

/// First non-empty diagnostic line, for log fields and error details.
pub fn summarize(output: &RawOutput) -> String {
    output
        .stderr
        .lines()
        .chain(output.stdout.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from)
        .unwrap_or_else(|| match output.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        })
}
