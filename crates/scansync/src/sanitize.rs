//! Filename sanitizing and helpers for keeping paths out of span attributes.

use std::path::Path;

/// Maximum length, in characters, of a sanitized filename.
pub const MAX_FILENAME_CHARS: usize = 50;

/// Returned when nothing usable survives sanitizing.
pub const FALLBACK_FILENAME: &str = "default_filename";

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

fn is_invalid(c: char) -> bool {
    INVALID_CHARS.contains(&c) || ('\u{0}'..='\u{1f}').contains(&c)
}

fn is_edge_junk(c: char) -> bool {
    c.is_whitespace() || c == '.'
}

/// Makes an arbitrary string safe to use as a file name on an SMB share.
///
/// Characters Windows rejects and ASCII control characters are removed,
/// leading and trailing whitespace and dots are stripped, and the result is
/// cut to [`MAX_FILENAME_CHARS`]. An empty result becomes
/// [`FALLBACK_FILENAME`]. Applying it twice yields the same string.
pub fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !is_invalid(*c)).collect();
    let trimmed = cleaned.trim_matches(is_edge_junk);

    let truncated: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
    let result = truncated.trim_end_matches(is_edge_junk);

    if result.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        result.to_string()
    }
}

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_safe(s: &str) {
        assert!(!s.chars().any(is_invalid), "invalid char in {:?}", s);
        assert!(!s.starts_with(is_edge_junk), "bad start in {:?}", s);
        assert!(!s.ends_with(is_edge_junk), "bad end in {:?}", s);
        assert!(s.chars().count() <= MAX_FILENAME_CHARS);
        assert!(!s.is_empty());
    }

    #[test]
    fn test_sanitize_removes_invalid_chars() {
        assert_eq!(
            sanitize_filename("Invoice: <ACME>/2024|Q1?*\"x\\y"),
            "Invoice ACME2024Q1xy"
        );
    }

    #[test]
    fn test_sanitize_removes_control_chars() {
        assert_eq!(sanitize_filename("a\u{0}b\u{1f}c\td"), "abcd");
    }

    #[test]
    fn test_sanitize_strips_dots_and_whitespace() {
        assert_eq!(sanitize_filename("  ..Rechnung_2024.. \n"), "Rechnung_2024");
    }

    #[test]
    fn test_sanitize_truncates_and_restrips() {
        let raw = format!("{}.  tail", "a".repeat(48));
        let result = sanitize_filename(&raw);
        assert_eq!(result, "a".repeat(48));
        assert_safe(&result);
    }

    #[test]
    fn test_sanitize_counts_chars_not_bytes() {
        let raw = "ü".repeat(60);
        let result = sanitize_filename(&raw);
        assert_eq!(result.chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn test_sanitize_fallback() {
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("<>:\"/\\|?*"), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename(" . . "), FALLBACK_FILENAME);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "",
            "simple",
            "   padded   ",
            "...dots...",
            "Kontoauszug Dezember 2024: Sparkasse <Privat>",
            "a.b.c.",
            "x\u{7}y\u{1b}z",
            "\u{a0}nbsp\u{a0}",
            "ends with dot after cut aaaaaaaaaaaaaaaaaaaaaaaaaaa. b",
            "日本語のファイル名です日本語のファイル名です日本語のファイル名です日本語のファイル名です",
        ];
        for input in inputs {
            let once = sanitize_filename(input);
            assert_safe(&once);
            assert_eq!(sanitize_filename(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/app/data/scans/Finance/invoice.pdf")),
            "invoice.pdf"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }
}
