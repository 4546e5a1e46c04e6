//! Error text analysis
//!
//! Normalization collapses textually similar errors (same failure, different
//! timestamp / locator / hash) onto one signature. It feeds both the dedup
//! fingerprint and the stuck detector's recurring-pattern scan.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length (in chars) of a normalized signature
pub const MAX_PATTERN_LEN: usize = 200;

static RE_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .unwrap()
});
static RE_LINE_COL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d+:\d+").unwrap());
static RE_HASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{8,}\b").unwrap());

/// Replace volatile tokens and collapse whitespace, keeping the full text.
/// This is what the dedup fingerprint hashes.
pub fn normalize_error_text(error: &str) -> String {
    let normalized = RE_TIMESTAMP.replace_all(error, "<TIMESTAMP>");
    let normalized = RE_LINE_COL.replace_all(&normalized, ":<LINE>:<COL>");
    let normalized = RE_HASH.replace_all(&normalized, "<HASH>");

    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize an error message into a pattern key, capped at
/// [`MAX_PATTERN_LEN`] chars
pub fn normalize_error_pattern(error: &str) -> String {
    truncate_chars(&normalize_error_text(error), MAX_PATTERN_LEN)
}

/// Whether a line of text looks like it reports a failure
pub fn is_error_indicator(text: &str) -> bool {
    let lower = text.to_lowercase();
    [
        "error",
        "failed",
        "failure",
        "panicked",
        "exception",
        "cannot find",
        "not found",
        "assertion",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Label the recognizable error families present in tool or test output
pub fn detect_error_patterns(output: &str) -> Vec<String> {
    let lower = output.to_lowercase();
    let mut patterns = Vec::new();

    if output.contains("error TS") {
        patterns.push("TypeScript compilation error");
    }
    if output.contains("error[E") {
        patterns.push("Rust compiler error");
    }
    if lower.contains("cannot find module")
        || lower.contains("cannot find name")
        || output.contains("unresolved import")
    {
        patterns.push("Missing module or name");
    }
    if output.contains("does not exist on type") {
        patterns.push("Property access error");
    }
    if output.contains("is not assignable to type") || output.contains("mismatched types") {
        patterns.push("Type assignment error");
    }

    if output.contains("test") && output.contains("failed") {
        patterns.push("Test failures");
    }
    if (output.contains("expect(") && (output.contains("toBe") || output.contains("toEqual")))
        || output.contains("assertion `left == right` failed")
        || output.contains("assertion failed")
    {
        patterns.push("Assertion failure");
    }

    if output.contains("import") && lower.contains("not found") {
        patterns.push("Import resolution error");
    }

    if output.contains("TypeError:") {
        patterns.push("Runtime type error");
    }
    if output.contains("ReferenceError:") {
        patterns.push("Reference error");
    }
    if output.contains("SyntaxError:") {
        patterns.push("Syntax error");
    }
    if output.contains("panicked at") {
        patterns.push("Panic");
    }

    patterns.into_iter().map(str::to_string).collect()
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Truncate with a trailing ellipsis when anything was cut
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    let cut = truncate_chars(text, max);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_replaces_volatile_tokens() {
        let a = normalize_error_pattern(
            "2025-01-02T10:11:12Z error at src/lib.rs:10:5 in commit deadbeef01",
        );
        let b = normalize_error_pattern(
            "2025-03-04T01:02:03.456+02:00 error at src/lib.rs:99:1 in commit 0123abcdef",
        );
        assert_eq!(a, b);
        assert_eq!(
            a,
            "<TIMESTAMP> error at src/lib.rs:<LINE>:<COL> in commit <HASH>"
        );
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_truncates() {
        assert_eq!(normalize_error_pattern("  a \n\t b  "), "a b");
        let long = "x".repeat(500);
        assert_eq!(normalize_error_pattern(&long).len(), MAX_PATTERN_LEN);
    }

    #[test]
    fn test_normalize_text_keeps_full_length() {
        let long = format!("{} tail", "x ".repeat(300));
        let text = normalize_error_text(&long);
        assert!(text.len() > MAX_PATTERN_LEN);
        assert!(text.ends_with("x tail"));
    }

    #[test]
    fn test_normalize_keeps_short_hex_words() {
        assert_eq!(normalize_error_pattern("bad cafe"), "bad cafe");
    }

    #[test]
    fn test_detect_typescript_patterns() {
        let output = "error TS2304: Cannot find name 'foo'.\nProperty 'x' does not exist on type 'Y'";
        let patterns = detect_error_patterns(output);
        assert!(patterns.contains(&"TypeScript compilation error".to_string()));
        assert!(patterns.contains(&"Missing module or name".to_string()));
        assert!(patterns.contains(&"Property access error".to_string()));
    }

    #[test]
    fn test_detect_test_and_rust_patterns() {
        let output = "error[E0308]: mismatched types\ntest parser::works ... FAILED\n\
                      thread 'main' panicked at src/main.rs:3:5:\nassertion failed: ok\n\
                      test result: failed";
        let patterns = detect_error_patterns(output);
        assert!(patterns.contains(&"Rust compiler error".to_string()));
        assert!(patterns.contains(&"Type assignment error".to_string()));
        assert!(patterns.contains(&"Test failures".to_string()));
        assert!(patterns.contains(&"Assertion failure".to_string()));
        assert!(patterns.contains(&"Panic".to_string()));
    }

    #[test]
    fn test_detect_nothing_in_clean_output() {
        assert!(detect_error_patterns("all good").is_empty());
    }

    #[test]
    fn test_error_indicator() {
        assert!(is_error_indicator("Error: boom"));
        assert!(is_error_indicator("3 tests FAILED"));
        assert!(!is_error_indicator("wrote 3 files"));
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("hello", 10), "hello");
        assert_eq!(excerpt("hello world", 5), "hello...");
        assert_eq!(excerpt("héllo", 2), "hé...");
    }
}
