//! Structural boundary detection for financial text.
//!
//! The detector classifies single lines (headers, table rows, list items,
//! formula lines) and extends a structural line to the end of the unit it
//! opens, so the chunker can keep tables, clause lists and calculations
//! together.

use regex_lite::Regex;

use crate::error::{ChunkError, Result};

/// Markdown header: `#` through `######` followed by a title.
const MARKDOWN_HEADER: &str = r"^(#{1,6})\s+(\S.*)$";

/// Multi-level numbered header such as `2.1 Contribution Limits`.
const NUMBERED_HEADER: &str = r"^(\d+(?:\.\d+)+)\.?\s+([A-Z].*)$";

/// Bulleted, numbered, lettered or roman-numeral list item.
const LIST_ITEM: &str = r"^(?:[-*+•]|\d{1,3}[.)]|\(\d{1,3}\)|\(?[a-zA-Z]\)|[ivxIVX]{1,4}[.)])\s+\S";

/// Inline arithmetic or currency amount.
const FORMULA: &str = r"[=+*/-]\s*\$?\d|\$\d";

/// Longest line still considered an all-caps header.
const MAX_CAPS_HEADER_CHARS: usize = 80;

/// Classification of a single normalized line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Empty line.
    Blank,
    /// A section header with its nesting level (1 = top level).
    Header { level: u8, title: String },
    /// A pipe-delimited table row.
    TableRow,
    /// A bulleted or numbered list item.
    ListItem,
    /// A line containing a formula or currency amount.
    Formula,
    /// Anything else.
    Text,
}

/// Kind of multi-line structural unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Table,
    List,
    Formula,
}

impl UnitKind {
    /// Whether a single blank line may appear inside the unit.
    fn tolerates_blank(self) -> bool {
        matches!(self, UnitKind::Table | UnitKind::List)
    }
}

/// Detects headers, tables, lists and formulas in normalized text.
#[derive(Debug, Clone)]
pub struct BoundaryDetector {
    markdown_header: Regex,
    numbered_header: Regex,
    list_item: Regex,
    formula: Regex,
}

impl BoundaryDetector {
    /// Compile the detector's patterns.
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ChunkError::Structure(format!("{pattern}: {e}")))
        };

        Ok(Self {
            markdown_header: compile(MARKDOWN_HEADER)?,
            numbered_header: compile(NUMBERED_HEADER)?,
            list_item: compile(LIST_ITEM)?,
            formula: compile(FORMULA)?,
        })
    }

    /// Classify a single line.
    pub fn classify(&self, line: &str) -> LineKind {
        let line = line.trim();
        if line.is_empty() {
            return LineKind::Blank;
        }
        if let Some((level, title)) = self.explicit_header(line) {
            return LineKind::Header { level, title };
        }
        if self.is_table_row(line) {
            return LineKind::TableRow;
        }
        if self.list_item.is_match(line) {
            return LineKind::ListItem;
        }
        if self.formula.is_match(line) {
            return LineKind::Formula;
        }
        if is_caps_header(line) {
            return LineKind::Header {
                level: 1,
                title: line.to_string(),
            };
        }
        LineKind::Text
    }

    /// Header level and title if `line` is a header.
    pub fn header(&self, line: &str) -> Option<(u8, String)> {
        match self.classify(line) {
            LineKind::Header { level, title } => Some((level, title)),
            _ => None,
        }
    }

    /// Whether `line` is a pipe-delimited table row.
    pub fn is_table_row(&self, line: &str) -> bool {
        let line = line.trim();
        line.starts_with('|') || line.matches('|').count() >= 2
    }

    /// Whether `text` contains a formula or currency pattern.
    pub fn has_formula(&self, text: &str) -> bool {
        self.formula.is_match(text)
    }

    /// Whether any line of `text` is a table row.
    pub fn has_table(&self, text: &str) -> bool {
        text.lines().any(|line| self.is_table_row(line))
    }

    /// If `lines[start]` opens a structural unit, return its kind and the
    /// exclusive index of the unit's last line.
    ///
    /// The unit extends over consecutive lines of the same kind. Tables and
    /// lists tolerate a single blank line between members. Any line with a
    /// currency amount counts as a formula line, so a prose paragraph whose
    /// every line quotes a dollar figure forms a single formula unit of
    /// unbounded length.
    pub fn unit_end(&self, lines: &[&str], start: usize) -> Option<(UnitKind, usize)> {
        let kind = self.unit_kind(lines.get(start)?)?;

        let mut end = start + 1;
        while end < lines.len() {
            if self.unit_kind(lines[end]) == Some(kind) {
                end += 1;
            } else if kind.tolerates_blank()
                && lines[end].trim().is_empty()
                && lines
                    .get(end + 1)
                    .is_some_and(|next| self.unit_kind(next) == Some(kind))
            {
                end += 2;
            } else {
                break;
            }
        }

        Some((kind, end))
    }

    fn unit_kind(&self, line: &str) -> Option<UnitKind> {
        match self.classify(line) {
            LineKind::TableRow => Some(UnitKind::Table),
            LineKind::ListItem => Some(UnitKind::List),
            LineKind::Formula => Some(UnitKind::Formula),
            _ => None,
        }
    }

    fn explicit_header(&self, line: &str) -> Option<(u8, String)> {
        if let Some(caps) = self.markdown_header.captures(line) {
            let level = caps.get(1).map_or(1, |m| m.as_str().len());
            let title = caps.get(2).map_or("", |m| m.as_str()).trim();
            return Some((level as u8, title.trim_end_matches('#').trim().to_string()));
        }
        if let Some(caps) = self.numbered_header.captures(line) {
            let level = caps.get(1).map_or(1, |m| m.as_str().split('.').count()).min(6);
            return Some((level as u8, line.to_string()));
        }
        None
    }
}

/// Short lines written entirely in capitals ("CONTRIBUTION LIMITS").
fn is_caps_header(line: &str) -> bool {
    if line.chars().count() > MAX_CAPS_HEADER_CHARS || line.ends_with('.') {
        return false;
    }
    if line.contains(['$', '%', '=', '|']) {
        return false;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 4 && letters.iter().all(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn detector() -> BoundaryDetector {
        BoundaryDetector::new().unwrap()
    }

    #[test]
    fn test_header_detection() {
        let detector = detector();
        assert_eq!(
            detector.header("# Retirement Accounts"),
            Some((1, "Retirement Accounts".to_string()))
        );
        assert_eq!(
            detector.header("### Roth IRA ###"),
            Some((3, "Roth IRA".to_string()))
        );
        assert_eq!(
            detector.header("2.1 Contribution Limits"),
            Some((2, "2.1 Contribution Limits".to_string()))
        );
        assert_eq!(
            detector.header("CATCH-UP CONTRIBUTIONS"),
            Some((1, "CATCH-UP CONTRIBUTIONS".to_string()))
        );
        assert_eq!(detector.header("#hashtag"), None);
        assert_eq!(detector.header("Plain sentence about taxes."), None);
        assert_eq!(detector.header("IRA"), None);
    }

    #[test]
    fn test_line_classification() {
        let detector = detector();
        assert_eq!(detector.classify("| Year | Limit |"), LineKind::TableRow);
        assert_eq!(detector.classify("Year | Limit | Catch-up"), LineKind::TableRow);
        assert_eq!(detector.classify("- Traditional IRA"), LineKind::ListItem);
        assert_eq!(detector.classify("3) File Form 8606"), LineKind::ListItem);
        assert_eq!(detector.classify("(a) Earned income"), LineKind::ListItem);
        assert_eq!(detector.classify("Limit = $7000 + $1000"), LineKind::Formula);
        assert_eq!(detector.classify("The fee is $25 per year"), LineKind::Formula);
        assert_eq!(detector.classify("catch-up contribution limit"), LineKind::Text);
        assert_eq!(detector.classify("   "), LineKind::Blank);
    }

    #[test]
    fn test_table_unit_tolerates_single_blank() {
        let detector = detector();
        let lines = vec![
            "Intro text",
            "| Year | Limit |",
            "|------|-------|",
            "| 2023 | 6500 |",
            "",
            "| 2024 | 7000 |",
            "",
            "After the table",
        ];
        assert_eq!(detector.unit_end(&lines, 0), None);
        assert_eq!(detector.unit_end(&lines, 1), Some((UnitKind::Table, 6)));
    }

    #[test]
    fn test_formula_unit_stops_at_blank() {
        let detector = detector();
        let lines = vec!["AGI = $80000 - $5000", "", "Tax = $75000 * 0.22"];
        assert_eq!(detector.unit_end(&lines, 0), Some((UnitKind::Formula, 1)));
    }

    #[test]
    fn test_currency_lines_form_one_formula_unit() {
        let detector = detector();
        let lines: Vec<String> = (0..40)
            .map(|n| format!("Savers in bracket {n} may set aside ${n},000 before the deadline"))
            .collect();
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        assert_eq!(detector.unit_end(&lines, 0), Some((UnitKind::Formula, 40)));
        assert_eq!(detector.unit_end(&lines, 39), Some((UnitKind::Formula, 40)));
    }

    #[test]
    fn test_list_unit() {
        let detector = detector();
        let lines = vec!["1. Open an account", "2. Fund it", "", "- Invest", "Done"];
        assert_eq!(detector.unit_end(&lines, 0), Some((UnitKind::List, 4)));
    }
}
