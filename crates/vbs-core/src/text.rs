//! Unicode-safe text utilities for commit messages, branch names and
//! operator notifications.

/// Truncate `text` to at most `max_chars` Unicode scalar values,
/// appending `suffix` if truncation occurred.
///
/// Uses `char_indices().nth(max_chars)`, which is compatible with MSRV 1.85.
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut result = text[..byte_idx].to_string();
            result.push_str(suffix);
            result
        }
        None => text.to_string(),
    }
}

/// First line of `text` that has non-whitespace content, trimmed.
pub fn first_meaningful_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_ascii_exact() {
        assert_eq!(truncate_chars("hello", 5, "..."), "hello");
    }

    #[test]
    fn truncate_chars_ascii_truncates() {
        assert_eq!(truncate_chars("hello world", 5, "..."), "hello...");
    }

    #[test]
    fn truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo wörld", 7, ""), "héllo w");
    }

    #[test]
    fn first_meaningful_line_skips_blank_lines() {
        assert_eq!(first_meaningful_line("\n  \n  fix the login\nmore"), Some("fix the login"));
        assert_eq!(first_meaningful_line("   \n\t"), None);
    }
}
