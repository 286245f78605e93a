//! Text normalization and lexical term extraction.
//!
//! Both functions are pure and allocation-only, so they are safe to call from
//! any number of concurrent retrieval calls.

use std::collections::HashSet;

/// Minimum number of characters for a term to be kept.
pub const MIN_TERM_CHARS: usize = 3;

/// Normalize line endings and whitespace.
///
/// - `\r\n` and `\r` become `\n`
/// - runs of horizontal whitespace collapse to a single space
/// - every line is trimmed
/// - runs of blank lines collapse to one blank line
/// - leading and trailing blank lines are removed
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = true;
    for raw in unified.split('\n') {
        let line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
        } else {
            lines.push(line);
            previous_blank = false;
        }
    }

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    lines.join("\n")
}

/// Extract lexical terms: lowercase, punctuation stripped, terms shorter than
/// [`MIN_TERM_CHARS`] dropped. Order and duplicates are preserved.
pub fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.chars().count() >= MIN_TERM_CHARS)
        .map(String::from)
        .collect()
}

/// The distinct terms of `text`.
pub fn term_set(text: &str) -> HashSet<String> {
    terms(text).into_iter().collect()
}

/// Jaccard similarity of two term sets. Two empty sets are considered
/// dissimilar.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}
