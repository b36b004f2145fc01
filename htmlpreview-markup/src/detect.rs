//! Text heuristics used before anything is parsed.

use regex::Regex;
use std::sync::OnceLock;

/// Heuristic HTML-content detector: true when the trimmed, case-folded text
/// contains both a `<` and a `>`.
///
/// This is a cheap filter for deciding whether a code block deserves a
/// preview trigger. It is not a parser and accepts plenty of non-HTML text
/// (`a < b > c`).
pub fn looks_like_html(text: &str) -> bool {
    let folded = text.trim().to_lowercase();
    folded.contains('<') && folded.contains('>')
}

/// True when the text opens with a doctype or an `<html` tag, i.e. it is a
/// whole document rather than a fragment.
pub fn looks_like_document(text: &str) -> bool {
    static DOCUMENT_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = DOCUMENT_REGEX.get_or_init(|| Regex::new(r"^(?:<!doctype html>|<html)").unwrap());
    re.is_match(&text.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html("<div>Hello</div>"));
        assert!(looks_like_html("  <BR>  "));
        assert!(looks_like_html("a < b > c"));
        assert!(!looks_like_html("fn main() {}"));
        assert!(!looks_like_html("x < y"));
        assert!(!looks_like_html("x > y"));
        assert!(!looks_like_html(""));
    }

    #[test]
    fn test_looks_like_document() {
        assert!(looks_like_document("<!DOCTYPE html>\n<html><body></body></html>"));
        assert!(looks_like_document("   <html lang=\"en\">"));
        assert!(!looks_like_document("<div><html></html></div>"));
        assert!(!looks_like_document("<!doctype xml>"));
    }
}
