// SPDX-License-Identifier: PMPL-1.0-or-later
//! Visible-text extraction and segmentation.

use regex::Regex;
use scraper::{Html, Node};
use std::sync::OnceLock;

/// Elements whose text never reaches the reader
const HIDDEN_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "template", "svg"];

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("valid regex"))
}

/// Extract the text a reader would see, one text block per line
pub fn extract_visible_text(markup: &str) -> String {
    let document = Html::parse_document(markup);
    let mut blocks = Vec::new();

    for node in document.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(el) => HIDDEN_ELEMENTS.contains(&el.name()),
            _ => false,
        });
        if hidden {
            continue;
        }
        let collapsed = whitespace().replace_all(text.trim(), " ");
        if !collapsed.is_empty() {
            blocks.push(collapsed.into_owned());
        }
    }

    blocks.join("\n")
}

/// Split text into sentence-level segments.
///
/// Lines are treated as hard boundaries, sentences end at `.`, `!` or `?`
/// followed by whitespace, and segments shorter than `min_chars` characters
/// (button labels, menu items) are dropped.
pub fn split_segments(text: &str, min_chars: usize) -> Vec<String> {
    let mut segments = Vec::new();

    for line in text.lines() {
        let mut start = 0;
        for boundary in sentence_end().find_iter(line) {
            let end = boundary.start() + boundary.as_str().trim_end().len();
            push_segment(&mut segments, &line[start..end], min_chars);
            start = boundary.end();
        }
        push_segment(&mut segments, &line[start..], min_chars);
    }

    segments
}

fn push_segment(segments: &mut Vec<String>, raw: &str, min_chars: usize) {
    let segment = raw.trim();
    if !segment.is_empty() && segment.chars().count() >= min_chars {
        segments.push(segment.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_skips_scripts_and_head() {
        let html = r#"<html><head><title>Shop</title><style>p { color: red; }</style></head>
            <body><h1>Welcome</h1><script>var x = "hidden";</script>
            <p>Free   shipping
               on all orders.</p></body></html>"#;
        let text = extract_visible_text(html);
        assert_eq!(text, "Welcome\nFree shipping on all orders.");
    }

    #[test]
    fn test_split_on_sentence_punctuation() {
        let text = "Only 2 left — buy now! Our jackets are made from recycled wool. Ok?";
        let segments = split_segments(text, 1);
        assert_eq!(
            segments,
            vec![
                "Only 2 left — buy now!",
                "Our jackets are made from recycled wool.",
                "Ok?",
            ]
        );
    }

    #[test]
    fn test_short_fragments_dropped() {
        let text = "Menu\nSign in\nThis sentence is comfortably long enough.";
        let segments = split_segments(text, 20);
        assert_eq!(segments, vec!["This sentence is comfortably long enough."]);
    }

    #[test]
    fn test_empty_text_has_no_segments() {
        assert!(split_segments("", 1).is_empty());
        assert!(split_segments("   \n  ", 1).is_empty());
    }
}
