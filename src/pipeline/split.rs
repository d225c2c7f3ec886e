//! Page splitting for the direct-text path.
//!
//! Text extractors do not agree on how they mark page boundaries. The split
//! chain is: form-feed marker → "two or more blank lines" → no split. The
//! second level only runs when the first produced at most one non-blank
//! block. Blank blocks are discarded and survivors are numbered 1..K by
//! their position in the returned vector.

use once_cell::sync::Lazy;
use regex::Regex;

/// Explicit page-break marker emitted between pages by the text extractors.
pub const PAGE_BREAK: char = '\u{000C}';

/// Two or more blank lines (whitespace-only lines count as blank).
static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

/// Split raw document text into ordered, non-blank, trimmed page blocks.
pub fn split_pages(raw: &str) -> Vec<String> {
    let text = normalise_line_endings(raw);

    let by_marker = non_blank(text.split(PAGE_BREAK));
    if by_marker.len() > 1 {
        return by_marker;
    }

    let by_blank_lines = non_blank(RE_BLANK_RUN.split(&text));
    if by_blank_lines.len() > 1 {
        return by_blank_lines;
    }

    by_marker
}

/// Split on the page-break marker only, keeping blank pages so that
/// `result[i]` is page `i + 1` of the document.
pub fn split_aligned(raw: &str) -> Vec<String> {
    normalise_line_endings(raw)
        .split(PAGE_BREAK)
        .map(|block| block.trim().to_string())
        .collect()
}

/// `\r\n` and lone `\r` both become `\n`.
pub(crate) fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn non_blank<'a>(blocks: impl Iterator<Item = &'a str>) -> Vec<String> {
    blocks
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_form_feed() {
        let pages = split_pages("Intro\nAgenda\x0cMarket\x0cTeam");
        assert_eq!(pages, vec!["Intro\nAgenda", "Market", "Team"]);
    }

    #[test]
    fn form_feed_blank_pages_are_dropped() {
        let pages = split_pages("One\x0c  \n \x0cTwo\x0c");
        assert_eq!(pages, vec!["One", "Two"]);
    }

    #[test]
    fn falls_back_to_blank_line_heuristic() {
        let pages = split_pages("Title slide\n\n\nSecond slide\nmore\n \n\t\n\nThird");
        assert_eq!(pages, vec!["Title slide", "Second slide\nmore", "Third"]);
    }

    #[test]
    fn single_blank_line_does_not_split() {
        let pages = split_pages("Heading\n\nParagraph under it");
        assert_eq!(pages, vec!["Heading\n\nParagraph under it"]);
    }

    #[test]
    fn blank_line_heuristic_applies_when_marker_gives_one_block() {
        let pages = split_pages("A\n\n\nB\x0c   ");
        assert_eq!(pages, vec!["A", "B"]);
    }

    #[test]
    fn no_markers_no_separators_is_one_page() {
        assert_eq!(split_pages("just one slide of text").len(), 1);
    }

    #[test]
    fn crlf_is_normalised() {
        let pages = split_pages("A\r\n\r\n\r\nB");
        assert_eq!(pages, vec!["A", "B"]);
    }

    #[test]
    fn empty_text_has_no_pages() {
        assert!(split_pages("").is_empty());
        assert!(split_pages(" \n\x0c\n ").is_empty());
    }

    #[test]
    fn aligned_split_keeps_blank_pages() {
        assert_eq!(split_aligned("a\x0c\x0c c "), vec!["a", "", "c"]);
    }

    #[test]
    fn aligned_split_normalises_lone_carriage_returns() {
        assert_eq!(split_aligned("a\r\rb\x0cc"), vec!["a\n\nb", "c"]);
        assert_eq!(split_aligned("a\r\nb\x0c"), vec!["a\nb", ""]);
    }
}
