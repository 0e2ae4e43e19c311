//! Legacy discussion-body decoding.
//!
//! The discussion service stores bodies wrapped as `{"..."}` (a JSON string
//! inside braces) or as a bare quoted string. This is the only place that
//! knows about that encoding; everything past the collaborator boundary
//! sees plain text.

use regex::Regex;
use std::sync::OnceLock;

fn brace_wrapper() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\{\s*"([\s\S]*)"\s*\}$"#).ok())
        .as_ref()
}

/// Decode a stored discussion body into plain text.
///
/// - `{"hello \"world\""}` becomes `hello "world"`
/// - `"plain"` becomes `plain`
/// - anything else is returned trimmed
pub fn decode_content(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some(inner) = brace_wrapper()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|inner| !inner.is_empty())
    {
        return inner.replace("\\\"", "\"").trim().to_string();
    }

    trimmed.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brace_wrapper_is_unwrapped_and_unescaped() {
        assert_eq!(decode_content(r#"{"hello \"world\""}"#), r#"hello "world""#);
    }

    #[test]
    fn brace_wrapper_tolerates_inner_whitespace() {
        assert_eq!(decode_content("{ \"spaced out\" }"), "spaced out");
    }

    #[test]
    fn surrounding_quotes_are_stripped() {
        assert_eq!(decode_content(r#""plain""#), "plain");
    }

    #[test]
    fn unwrapped_text_is_unchanged() {
        assert_eq!(decode_content("no wrapper"), "no wrapper");
    }

    #[test]
    fn multiline_body_survives() {
        assert_eq!(decode_content("{\"line one\nline two\"}"), "line one\nline two");
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(decode_content("   "), "");
    }

    #[test]
    fn braces_without_quotes_are_left_alone() {
        assert_eq!(decode_content("{not json}"), "{not json}");
    }
}
