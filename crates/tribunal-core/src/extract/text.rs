//! Text primitives for extraction: term matching, segmentation, truncation.
//!
//! Matching runs over ASCII-lowercased text, which keeps byte offsets aligned
//! with the original so matches can be sliced back out of it.

use std::sync::OnceLock;

use regex::Regex;

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Locate `term` in `haystack` (both already ASCII-lowercased).
///
/// Returns the byte range of the whole matched word: for prefix terms
/// (trailing `*`) the range extends to the end of the word.
pub(crate) fn find_term(haystack: &str, term: &str) -> Option<(usize, usize)> {
    let (needle, prefix) = match term.strip_suffix('*') {
        Some(stem) => (stem, true),
        None => (term, false),
    };
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let starts_word = start == 0 || !is_word_byte(bytes[start - 1]);
        let ends_word = end == bytes.len() || !is_word_byte(bytes[end]);
        if starts_word && (prefix || ends_word) {
            let mut word_end = end;
            while word_end < bytes.len() && is_word_byte(bytes[word_end]) {
                word_end += 1;
            }
            return Some((start, word_end));
        }
        from = start + 1;
        while !haystack.is_char_boundary(from) {
            from += 1;
        }
    }
    None
}

pub(crate) fn contains_term(haystack: &str, term: &str) -> bool {
    find_term(haystack, term).is_some()
}

pub(crate) fn count_terms(haystack: &str, terms: &[String]) -> usize {
    terms.iter().filter(|t| contains_term(haystack, t)).count()
}

/// Cut `text` to at most `max` characters, on a word boundary when one is close.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > cut.len() / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}...", trimmed.trim_end_matches(|c: char| c.is_whitespace() || c == ','))
}

/// Strip markdown emphasis and stray punctuation from a heading-like line.
pub(crate) fn clean_inline(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !matches!(c, '*' | '`')).collect();
    let stripped = stripped.replace("__", "");
    stripped
        .trim()
        .trim_end_matches(':')
        .trim_matches(|c: char| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Compile a built-in pattern once. A pattern that fails to compile matches nothing.
pub(crate) fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn marker_regex() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &MARKER,
        r"^(\s*)(?:\d{1,2}[.)]|\(\d{1,2}\)|[-*+\u{2022}]|#{1,6})\s+(\S.*)$",
    )
}

/// Whether `line` opens a new top-level numbered, bulleted or heading block.
pub(crate) fn is_marker_line(line: &str) -> bool {
    top_level_marker(line).is_some()
}

fn top_level_marker(line: &str) -> Option<String> {
    let caps = marker_regex()?.captures(line)?;
    if caps.get(1).map_or(0, |m| m.as_str().len()) >= 2 {
        return None;
    }
    caps.get(2).map(|m| m.as_str().to_string())
}

/// One candidate finding: a marker-led block or a plain paragraph.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Segment {
    pub head: String,
    pub body: Vec<String>,
    pub marker_led: bool,
}

impl Segment {
    fn new(head: &str, marker_led: bool) -> Self {
        Self {
            head: head.trim().to_string(),
            body: Vec::new(),
            marker_led,
        }
    }

    pub fn text(&self) -> String {
        if self.body.is_empty() {
            return self.head.clone();
        }
        format!("{}\n{}", self.head, self.body.join("\n"))
    }

    pub fn char_len(&self) -> usize {
        self.head.chars().count() + self.body.iter().map(|l| l.chars().count()).sum::<usize>()
    }
}

/// Split a response into segments.
///
/// Top-level numbered, bulleted or heading lines start a new segment and the
/// lines below them (including indented sub-bullets) belong to it. When a
/// response has no markers at all, blank-line-separated paragraphs are the
/// segments. Text before the first marker is returned as a non-marker
/// segment so callers can use it as a preamble.
pub(crate) fn segment(text: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current: Option<Segment> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(head) = top_level_marker(line) {
            segments.extend(current.take());
            current = Some(Segment::new(&head, true));
        } else if trimmed.is_empty() {
            // Blank lines end paragraphs but not marker-led blocks.
            if current.as_ref().is_some_and(|s| !s.marker_led) {
                segments.extend(current.take());
            }
        } else {
            match current.as_mut() {
                Some(seg) => seg.body.push(trimmed.to_string()),
                None => current = Some(Segment::new(trimmed, false)),
            }
        }
    }
    segments.extend(current);
    segments
}

/// Split into sentences on terminal punctuation and line breaks.
pub(crate) fn sentences(text: &str) -> Vec<&str> {
    text.split(|c: char| matches!(c, '.' | '!' | '?' | ';' | '\n'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_word_matching() {
        assert!(contains_term("a high risk", "high"));
        assert!(!contains_term("highlights", "high"));
        assert!(!contains_term("arrears", "arr"));
        assert!(contains_term("the deal-breaker here", "deal-breaker"));
    }

    #[test]
    fn prefix_matching_spans_the_word() {
        let hay = "the regulatory exposure";
        assert_eq!(find_term(hay, "regulat*"), Some((4, 14)));
        assert!(!contains_term("deregulation", "regulat*"));
    }

    #[test]
    fn truncation_appends_ellipsis() {
        let long = "word ".repeat(50);
        let cut = truncate_chars(&long, 20);
        assert!(cut.chars().count() <= 20);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_chars("short", 20), "short");
    }

    #[test]
    fn truncation_is_char_safe() {
        let text = "é".repeat(40);
        let cut = truncate_chars(&text, 10);
        assert!(cut.chars().count() <= 10);
    }

    #[test]
    fn numbered_list_segments_with_sub_bullets() {
        let text = "Overview of risks.\n\n1. Revenue concentration\n   - top customer is 40%\n\n   Renewal due in Q3.\n2. Key person risk\nFounder holds all vendor relationships.";
        let segs = segment(text);
        assert_eq!(segs.len(), 3);
        assert!(!segs[0].marker_led);
        assert_eq!(segs[1].head, "Revenue concentration");
        assert_eq!(segs[1].body.len(), 2);
        assert_eq!(segs[2].head, "Key person risk");
    }

    #[test]
    fn paragraphs_when_no_markers() {
        let segs = segment("First paragraph here.\nStill first.\n\nSecond paragraph.");
        assert_eq!(segs.len(), 2);
        assert!(segs.iter().all(|s| !s.marker_led));
        assert_eq!(segs[0].body, vec!["Still first.".to_string()]);
    }

    #[test]
    fn markdown_is_stripped_from_titles() {
        assert_eq!(clean_inline("**Customer churn**:"), "Customer churn");
        assert_eq!(clean_inline("`Debt covenants`"), "Debt covenants");
    }
}
