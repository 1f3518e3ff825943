//! Laid-out pages and the table-of-contents index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::content::{AssetRef, ParagraphStyle, Span};
use crate::types::NodeId;

/// A laid-out table: column widths in characters and wrapped cell lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    pub widths: Vec<usize>,
    pub header: Vec<Vec<String>>,
    pub rows: Vec<Vec<Vec<String>>>,
}

impl TableLayout {
    /// Height in lines of the header row.
    pub fn header_height(&self) -> usize {
        row_height(&self.header)
    }

    /// Height in lines of body row `index`.
    pub fn row_height(&self, index: usize) -> usize {
        self.rows.get(index).map_or(0, |r| row_height(r))
    }
}

fn row_height(cells: &[Vec<String>]) -> usize {
    cells.iter().map(Vec::len).max().unwrap_or(0).max(1)
}

/// A unit of content ready to be drawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum Block {
    /// `level` is already adjusted for tree depth (1..=6).
    Heading { level: u8, text: String },
    /// Wrapped lines; `continued` marks the remainder of a split paragraph.
    Text {
        style: ParagraphStyle,
        lines: Vec<Vec<Span>>,
        continued: bool,
    },
    Table(TableLayout),
    Asset(AssetRef),
    Hyperlink { label: String, url: String },
    Notice { text: String },
}

impl Block {
    pub fn is_heading(&self) -> bool {
        matches!(self, Self::Heading { .. })
    }
}

/// A block positioned on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedBlock {
    pub node_id: NodeId,
    pub depth: usize,
    /// Vertical extent in lines, including trailing spacing.
    pub lines: u32,
    pub block: Block,
}

/// One output page of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBlock {
    /// 1-based content page number.
    pub number: u32,
    pub blocks: Vec<PlacedBlock>,
    /// Capacity consumed, in the configured capacity measure.
    pub used: u32,
    /// Outgoing cross-references: target node → target page.
    #[serde(default)]
    pub references: BTreeMap<NodeId, u32>,
}

impl PageBlock {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            blocks: Vec::new(),
            used: 0,
            references: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total drawn height in lines.
    pub fn total_lines(&self) -> u32 {
        self.blocks.iter().map(|b| b.lines).sum()
    }
}

// ---------------------------------------------------------------------------
// Text measurement
// ---------------------------------------------------------------------------

/// Font size multiplier for a heading level.
pub fn heading_scale(level: u8) -> f32 {
    match level {
        0 | 1 => 1.6,
        2 => 1.35,
        3 => 1.15,
        _ => 1.0,
    }
}

/// Characters that fit on one heading line.
pub fn heading_chars(level: u8, chars_per_line: usize) -> usize {
    ((chars_per_line as f32 / heading_scale(level)).floor() as usize).max(1)
}

/// Greedy word wrap; words longer than `width` are hard-split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if len > 0 && len + 1 + word_len > width {
            lines.push(std::mem::take(&mut line));
            len = 0;
        }

        if word_len > width {
            let chars: Vec<char> = word.chars().collect();
            for chunk in chars.chunks(width) {
                if len > 0 {
                    lines.push(std::mem::take(&mut line));
                }
                line.extend(chunk);
                len = chunk.len();
            }
            continue;
        }

        if len > 0 {
            line.push(' ');
            len += 1;
        }
        line.push_str(word);
        len += word_len;
    }

    if len > 0 {
        lines.push(line);
    }
    lines
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Toc
// ---------------------------------------------------------------------------

/// A single table-of-contents entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub node_id: NodeId,
    pub title: String,
    pub depth: usize,
    /// First content page on which the node appears.
    pub page: u32,
}

/// Table of contents, in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toc {
    pub entries: Vec<TocEntry>,
}

impl Toc {
    pub fn page_of(&self, id: &NodeId) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| &e.node_id == id)
            .map(|e| e.page)
    }

    /// The TOC index: node id → first page.
    pub fn index(&self) -> BTreeMap<NodeId, u32> {
        self.entries
            .iter()
            .map(|e| (e.node_id.clone(), e.page))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toc_index_and_lookup() {
        let toc = Toc {
            entries: vec![
                TocEntry {
                    node_id: "P".into(),
                    title: "Study".into(),
                    depth: 0,
                    page: 1,
                },
                TocEntry {
                    node_id: "C1".into(),
                    title: "Intro".into(),
                    depth: 1,
                    page: 2,
                },
            ],
        };

        assert_eq!(toc.page_of(&"C1".into()), Some(2));
        assert_eq!(toc.page_of(&"missing".into()), None);
        let index = toc.index();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("P"), Some(&1));
    }

    #[test]
    fn wrap_text_breaks_on_words() {
        assert_eq!(
            wrap_text("the quick brown fox jumps", 10),
            vec!["the quick", "brown fox", "jumps"]
        );
        assert_eq!(wrap_text("abcdefghij xy", 4), vec!["abcd", "efgh", "ij", "xy"]);
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[test]
    fn truncate_marks_the_cut() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("a long heading", 8), "a lon...");
        assert_eq!(heading_chars(1, 81), 50);
    }

    #[test]
    fn table_layout_heights() {
        let table = TableLayout {
            widths: vec![5, 5],
            header: vec![vec!["Name".into()], vec!["Email".into()]],
            rows: vec![vec![
                vec!["Ada".into()],
                vec!["ada@".into(), "example".into(), ".com".into()],
            ]],
        };
        assert_eq!(table.header_height(), 1);
        assert_eq!(table.row_height(0), 3);
        assert_eq!(table.row_height(7), 0);
    }
}
