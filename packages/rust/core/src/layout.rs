//! Pagination and layout.
//!
//! Turns the assembled tree into measured blocks and packs them greedily
//! onto pages of fixed capacity. Headings are never left alone at the bottom
//! of a page, and text splits across pages only when capacity is measured in
//! lines.

use tracing::{debug, info, instrument};

use dossier_shared::{
    AssetRef, Block, ContentUnit, LayoutConfig, NodeId, PageBlock, PageCapacity, ParagraphStyle,
    PlacedBlock, Span, Table, TableLayout, TextStyle, Toc, Warning, heading_chars, spans_text,
    truncate_chars, wrap_text,
};

use crate::assembler::AssembledTree;
use crate::toc::{build_toc, resolve_references};

/// Space between table columns, in characters.
const COLUMN_GUTTER: usize = 2;

/// Narrowest column a squeezed table may get.
const MIN_COLUMN_WIDTH: usize = 3;

/// Laid-out document: numbered pages plus the table of contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    pub pages: Vec<PageBlock>,
    pub toc: Toc,
    /// References that could not be resolved to a page.
    pub warnings: Vec<Warning>,
}

impl Pagination {
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }
}

/// Lay out the assembled tree.
///
/// Deterministic: the same tree and config always yield the same pages.
#[instrument(skip_all, fields(entries = tree.entries.len(), capacity = ?config.capacity))]
pub fn paginate(tree: &AssembledTree, config: &LayoutConfig) -> Pagination {
    let items = measure(tree, config.chars_per_line);
    let mut pages = pack(&items, config.capacity);

    let toc = build_toc(tree, &pages);
    let warnings = resolve_references(&mut pages, &toc);

    info!(
        pages = pages.len(),
        blocks = items.len(),
        unresolved = warnings.len(),
        "layout complete"
    );

    Pagination {
        pages,
        toc,
        warnings,
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// A measured block waiting to be placed.
#[derive(Debug, Clone)]
struct Item {
    node_id: NodeId,
    depth: usize,
    block: Block,
    /// Height in lines including the trailing gap.
    lines: u32,
}

impl Item {
    fn is_splittable(&self) -> bool {
        matches!(self.block, Block::Text { .. })
    }
}

fn measure(tree: &AssembledTree, chars_per_line: usize) -> Vec<Item> {
    let mut items = Vec::new();
    for entry in &tree.entries {
        for unit in &entry.block.units {
            let Some((block, lines)) = measure_unit(unit, entry.depth, chars_per_line) else {
                continue;
            };
            items.push(Item {
                node_id: entry.block.node_id.clone(),
                depth: entry.depth,
                block,
                lines,
            });
        }
    }
    items
}

fn measure_unit(unit: &ContentUnit, depth: usize, chars_per_line: usize) -> Option<(Block, u32)> {
    match unit {
        ContentUnit::Heading { level, text } => {
            let level = (usize::from(*level) + depth).min(6) as u8;
            let text = truncate_chars(text, heading_chars(level, chars_per_line));
            Some((Block::Heading { level, text }, 2))
        }
        ContentUnit::Paragraph { style, spans } => {
            let width = chars_per_line.saturating_sub(style.indent()).max(1);
            let lines = match style {
                ParagraphStyle::Code => code_lines(spans, width),
                _ => wrap_spans(spans, width),
            };
            if lines.is_empty() {
                return None;
            }
            let height = lines.len() as u32 + 1;
            Some((
                Block::Text {
                    style: *style,
                    lines,
                    continued: false,
                },
                height,
            ))
        }
        ContentUnit::Table(table) => {
            let layout = layout_table(table, chars_per_line);
            let body: usize = (0..layout.rows.len()).map(|i| layout.row_height(i)).sum();
            let height = (layout.header_height() + body + 1) as u32;
            Some((Block::Table(layout), height))
        }
        ContentUnit::Asset(asset) => Some((
            Block::Asset(AssetRef {
                caption: truncate_chars(&asset.caption, chars_per_line),
                ..asset.clone()
            }),
            2,
        )),
        ContentUnit::Hyperlink { label, url } => Some((
            Block::Hyperlink {
                label: label.clone(),
                url: url.clone(),
            },
            2,
        )),
        ContentUnit::Notice { text } => {
            let height = wrap_text(text, chars_per_line).len().max(1) as u32 + 1;
            Some((Block::Notice { text: text.clone() }, height))
        }
    }
}

/// Word-wrap styled spans to `width` characters per line.
fn wrap_spans(spans: &[Span], width: usize) -> Vec<Vec<Span>> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line: Vec<Span> = Vec::new();
    let mut len = 0usize;
    let mut pending_space = false;

    for span in spans {
        let mut rest = span.text.as_str();
        loop {
            let trimmed = rest.trim_start();
            if trimmed.len() != rest.len() {
                pending_space = true;
            }
            if trimmed.is_empty() {
                break;
            }
            let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
            let word = &trimmed[..end];
            rest = &trimmed[end..];

            let word_len = word.chars().count();
            let space = usize::from(pending_space && len > 0);
            if len > 0 && len + space + word_len > width {
                lines.push(std::mem::take(&mut line));
                len = 0;
            } else if space == 1 {
                push_text(&mut line, span, " ");
                len += 1;
            }
            pending_space = false;

            if word_len <= width {
                push_text(&mut line, span, word);
                len += word_len;
                continue;
            }

            let chars: Vec<char> = word.chars().collect();
            for chunk in chars.chunks(width) {
                if len > 0 {
                    lines.push(std::mem::take(&mut line));
                }
                push_text(&mut line, span, &chunk.iter().collect::<String>());
                len = chunk.len();
            }
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn push_text(line: &mut Vec<Span>, span: &Span, text: &str) {
    match line.last_mut() {
        Some(last) if last.same_run(span) => last.text.push_str(text),
        _ => line.push(span.with_text(text)),
    }
}

/// Code keeps its line structure; long lines are hard-split.
fn code_lines(spans: &[Span], width: usize) -> Vec<Vec<Span>> {
    let template = spans
        .first()
        .cloned()
        .unwrap_or_else(|| Span::styled("", TextStyle::Code));
    let text = spans_text(spans);
    let text = text.trim_end_matches('\n');
    if text.is_empty() {
        return Vec::new();
    }

    let mut lines = Vec::new();
    for raw in text.split('\n') {
        let raw = raw.replace('\t', "    ");
        let chars: Vec<char> = raw.trim_end().chars().collect();
        if chars.is_empty() {
            lines.push(vec![template.with_text("")]);
            continue;
        }
        for chunk in chars.chunks(width.max(1)) {
            lines.push(vec![template.with_text(chunk.iter().collect::<String>())]);
        }
    }
    lines
}

/// Fit a table into `chars_per_line`, wrapping cells.
fn layout_table(table: &Table, chars_per_line: usize) -> TableLayout {
    let columns = table.columns();
    fn cell(row: &[String], col: usize) -> &str {
        row.get(col).map(String::as_str).unwrap_or("")
    }

    let natural: Vec<usize> = (0..columns)
        .map(|col| {
            std::iter::once(cell(&table.header, col))
                .chain(table.rows.iter().map(|r| cell(r, col)))
                .map(|c| c.chars().count())
                .max()
                .unwrap_or(0)
                .max(1)
        })
        .collect();

    let gutters = COLUMN_GUTTER * columns.saturating_sub(1);
    let budget = chars_per_line.saturating_sub(gutters).max(columns);
    let total: usize = natural.iter().sum();
    let widths: Vec<usize> = if total <= budget {
        natural
    } else {
        natural
            .iter()
            .map(|w| (w * budget / total.max(1)).max(MIN_COLUMN_WIDTH))
            .collect()
    };

    let wrap_row = |row: &[String]| -> Vec<Vec<String>> {
        widths
            .iter()
            .enumerate()
            .map(|(col, width)| wrap_text(cell(row, col), *width))
            .collect()
    };

    TableLayout {
        header: wrap_row(&table.header),
        rows: table.rows.iter().map(|r| wrap_row(r)).collect(),
        widths,
    }
}

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

struct Packer {
    capacity: PageCapacity,
    limit: u32,
    pages: Vec<PageBlock>,
    current: PageBlock,
}

impl Packer {
    fn new(capacity: PageCapacity) -> Self {
        Self {
            capacity,
            limit: capacity.limit().max(1),
            pages: Vec::new(),
            current: PageBlock::new(1),
        }
    }

    fn available(&self) -> u32 {
        self.limit.saturating_sub(self.current.used)
    }

    /// Capacity an item consumes when placed whole.
    fn cost(&self, item: &Item) -> u32 {
        match self.capacity {
            PageCapacity::Lines(_) => item.lines,
            PageCapacity::Units(_) => 1,
        }
    }

    /// Least capacity needed to start `item` on the current page.
    fn min_start(&self, item: &Item) -> u32 {
        match (self.capacity, item.is_splittable()) {
            (PageCapacity::Lines(_), true) => 1,
            _ => self.cost(item),
        }
    }

    fn close_page(&mut self) {
        let next = self.current.number + 1;
        let page = std::mem::replace(&mut self.current, PageBlock::new(next));
        debug!(page = page.number, used = page.used, blocks = page.blocks.len(), "page closed");
        self.pages.push(page);
    }

    fn place(&mut self, item: &Item, block: Block, lines: u32, cost: u32) {
        self.current.used += cost;
        self.current.blocks.push(PlacedBlock {
            node_id: item.node_id.clone(),
            depth: item.depth,
            lines,
            block,
        });
        if self.current.used >= self.limit {
            self.close_page();
        }
    }

    /// Space the heading at `index` needs so it is not stranded: the run of
    /// headings it starts plus the start of the following unit of the node.
    fn heading_need(&self, items: &[Item], index: usize) -> u32 {
        let node = &items[index].node_id;
        let mut need = 0;
        let mut next = index;
        while let Some(item) = items.get(next) {
            if &item.node_id != node {
                break;
            }
            if !item.block.is_heading() {
                need += self.min_start(item);
                break;
            }
            need += self.cost(item);
            next += 1;
        }
        need.min(self.limit)
    }

    fn push_text(&mut self, item: &Item) {
        let Block::Text { style, lines, .. } = &item.block else {
            return;
        };
        let mut remaining: &[Vec<Span>] = lines;
        let mut continued = false;

        loop {
            let available = self.available() as usize;
            let n = remaining.len();
            let text = |lines: &[Vec<Span>], continued: bool| Block::Text {
                style: *style,
                lines: lines.to_vec(),
                continued,
            };

            if n < available {
                let height = n as u32 + 1;
                self.place(item, text(remaining, continued), height, height);
                return;
            }
            if n == available {
                self.place(item, text(remaining, continued), n as u32, n as u32);
                return;
            }
            if available == 0 {
                self.close_page();
                continue;
            }

            let (head, tail) = remaining.split_at(available);
            self.place(item, text(head, continued), available as u32, available as u32);
            if !self.current.is_empty() {
                self.close_page();
            }
            remaining = tail;
            continued = true;
        }
    }

    fn push(&mut self, items: &[Item], index: usize) {
        let item = &items[index];

        if item.block.is_heading() {
            let need = self.heading_need(items, index);
            if need > self.available() && !self.current.is_empty() {
                self.close_page();
            }
            self.place(item, item.block.clone(), item.lines, self.cost(item));
            return;
        }

        if item.is_splittable() && matches!(self.capacity, PageCapacity::Lines(_)) {
            self.push_text(item);
            return;
        }

        let cost = self.cost(item);
        if cost > self.available()
            && !self.current.is_empty()
            && !self.follows_own_heading(item)
        {
            self.close_page();
        }
        self.place(item, item.block.clone(), item.lines, cost);
    }

    /// Whether the current page ends with a heading of `item`'s node. Such a
    /// heading was already placed for this item, so an oversized block stays
    /// under it instead of stranding it.
    fn follows_own_heading(&self, item: &Item) -> bool {
        self.current
            .blocks
            .last()
            .is_some_and(|last| last.block.is_heading() && last.node_id == item.node_id)
    }

    fn finish(mut self) -> Vec<PageBlock> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}

fn pack(items: &[Item], capacity: PageCapacity) -> Vec<PageBlock> {
    let mut packer = Packer::new(capacity);
    for index in 0..items.len() {
        packer.push(items, index);
    }
    packer.finish()
}

#[cfg(test)]
mod tests {
    use dossier_shared::{NodeKind, NormalizedBlock, RefKey, RefTarget, WarningCategory};

    use super::*;
    use crate::assembler::TreeEntry;

    fn block(id: &str, units: Vec<ContentUnit>) -> NormalizedBlock {
        NormalizedBlock {
            node_id: id.into(),
            title: format!("Title {id}"),
            kind: NodeKind::Component,
            units,
            degradations: Vec::new(),
            word_count: 0,
        }
    }

    fn tree(entries: Vec<(usize, NormalizedBlock)>) -> AssembledTree {
        AssembledTree {
            entries: entries
                .into_iter()
                .map(|(depth, block)| TreeEntry { depth, block })
                .collect(),
            warnings: Vec::new(),
        }
    }

    fn words(n: usize) -> ContentUnit {
        let text = (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        ContentUnit::paragraph(vec![Span::plain(text)])
    }

    fn lines_config(lines: u32, chars: usize) -> LayoutConfig {
        LayoutConfig {
            capacity: PageCapacity::Lines(lines),
            chars_per_line: chars,
        }
    }

    #[test]
    fn wrap_spans_keeps_styles_and_spaces() {
        let spans = vec![
            Span::plain("alpha beta "),
            Span::styled("gamma", TextStyle::Bold),
            Span::plain(", delta epsilon"),
        ];
        let lines = wrap_spans(&spans, 12);
        let texts: Vec<String> = lines.iter().map(|l| spans_text(l)).collect();
        assert_eq!(texts, vec!["alpha beta", "gamma, delta", "epsilon"]);
        assert_eq!(lines[1][0], Span::styled("gamma", TextStyle::Bold));
        assert_eq!(lines[1][1], Span::plain(", delta"));
    }

    #[test]
    fn wrap_spans_hard_splits_long_words() {
        let lines = wrap_spans(&[Span::plain("ab abcdefghijkl")], 5);
        let texts: Vec<String> = lines.iter().map(|l| spans_text(l)).collect();
        assert_eq!(texts, vec!["ab", "abcde", "fghij", "kl"]);
    }

    #[test]
    fn code_keeps_line_structure() {
        let spans = vec![Span::styled("fn main() {\n\n    run();\n}\n", TextStyle::Code)];
        let lines = code_lines(&spans, 6);
        let texts: Vec<String> = lines.iter().map(|l| spans_text(l)).collect();
        assert_eq!(texts, vec!["fn mai", "n() {", "", "    ru", "n();", "}"]);
    }

    #[test]
    fn tables_squeeze_to_width() {
        let table = Table::new(
            vec!["Name".into(), "Description".into()],
            vec![vec!["x".into(), "a fairly long description of the row".into()]],
        );
        let layout = layout_table(&table, 20);
        assert!(layout.widths.iter().sum::<usize>() + COLUMN_GUTTER <= 20 + MIN_COLUMN_WIDTH);
        assert!(layout.row_height(0) > 1);

        let natural = layout_table(&table, 80);
        assert_eq!(natural.widths, vec![4, 36]);
    }

    #[test]
    fn heading_levels_follow_depth() {
        let t = tree(vec![
            (0, block("P", vec![ContentUnit::heading(1, "Root")])),
            (2, block("C", vec![ContentUnit::heading(1, "Deep"), ContentUnit::heading(5, "Capped")])),
        ]);
        let result = paginate(&t, &lines_config(40, 60));
        let levels: Vec<u8> = result.pages[0]
            .blocks
            .iter()
            .filter_map(|b| match &b.block {
                Block::Heading { level, .. } => Some(*level),
                _ => None,
            })
            .collect();
        assert_eq!(levels, vec![1, 3, 6]);
    }

    #[test]
    fn pages_never_exceed_capacity() {
        let t = tree(vec![
            (0, block("P", vec![ContentUnit::heading(1, "Root"), words(400)])),
            (1, block("A", vec![ContentUnit::heading(1, "A"), words(120), words(3)])),
        ]);
        let result = paginate(&t, &lines_config(10, 40));
        assert!(result.pages.len() > 3);
        for (i, page) in result.pages.iter().enumerate() {
            assert_eq!(page.number, i as u32 + 1);
            assert!(page.used <= 10, "page {} used {}", page.number, page.used);
            assert_eq!(page.used, page.total_lines());
        }

        let continued = result
            .pages
            .iter()
            .flat_map(|p| &p.blocks)
            .filter(|b| matches!(b.block, Block::Text { continued: true, .. }))
            .count();
        assert!(continued > 0);
    }

    #[test]
    fn orphan_heading_moves_to_next_page() {
        // P uses 6 of 8 lines. The heading alone would fit in the last two,
        // but not together with the first line of its paragraph.
        let t = tree(vec![
            (0, block("P", vec![words(3), words(3), words(1)])),
            (1, block("C", vec![ContentUnit::heading(1, "Child"), words(2)])),
        ]);
        let result = paginate(&t, &lines_config(8, 40));
        assert_eq!(result.pages.len(), 2);
        assert!(result.pages[0].blocks.iter().all(|b| b.node_id.as_str() == "P"));
        assert!(result.pages[1].blocks[0].block.is_heading());
        assert_eq!(result.toc.page_of(&"C".into()), Some(2));
    }

    #[test]
    fn heading_chain_stays_with_content() {
        let t = tree(vec![
            (0, block("P", vec![words(3), words(3)])),
            (
                1,
                block(
                    "C",
                    vec![
                        ContentUnit::heading(1, "Child"),
                        ContentUnit::heading(2, "Section"),
                        words(2),
                    ],
                ),
            ),
        ]);
        // 4 used, 4 free: both headings fit (4) but the text would not start.
        let result = paginate(&t, &lines_config(8, 40));
        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.pages[0].blocks.len(), 2);
        assert!(result.pages[1].blocks[0].block.is_heading());
        assert!(result.pages[1].blocks[1].block.is_heading());
    }

    #[test]
    fn heading_on_empty_page_is_always_placed() {
        let t = tree(vec![(0, block("P", vec![ContentUnit::heading(1, "Root"), words(2)]))]);
        let result = paginate(&t, &lines_config(1, 40));
        assert!(result.pages[0].blocks[0].block.is_heading());
        assert!(result.pages.len() >= 2);
    }

    #[test]
    fn oversized_atomic_block_gets_its_own_page() {
        let rows: Vec<Vec<String>> = (0..30).map(|i| vec![format!("row {i}")]).collect();
        let t = tree(vec![(
            0,
            block(
                "P",
                vec![
                    words(2),
                    ContentUnit::Table(Table::new(vec!["Col".into()], rows)),
                    words(2),
                ],
            ),
        )]);
        let result = paginate(&t, &lines_config(10, 40));
        assert_eq!(result.pages.len(), 3);
        assert_eq!(result.pages[1].blocks.len(), 1);
        assert!(matches!(result.pages[1].blocks[0].block, Block::Table(_)));
    }

    #[test]
    fn heading_stays_with_oversized_table() {
        let rows: Vec<Vec<String>> = (0..30).map(|i| vec![format!("row {i}")]).collect();
        let t = tree(vec![
            (0, block("P", vec![words(3)])),
            (
                1,
                block(
                    "C",
                    vec![
                        ContentUnit::heading(1, "Child"),
                        ContentUnit::Table(Table::new(vec!["Col".into()], rows)),
                    ],
                ),
            ),
        ]);
        let result = paginate(&t, &lines_config(10, 40));

        assert_eq!(result.pages.len(), 2);
        let second = &result.pages[1];
        assert_eq!(second.blocks.len(), 2);
        assert!(second.blocks[0].block.is_heading());
        assert!(matches!(second.blocks[1].block, Block::Table(_)));
        for page in &result.pages {
            let last = page.blocks.last().expect("page has blocks");
            assert!(!last.block.is_heading(), "page {} ends with a heading", page.number);
        }
        assert_eq!(result.toc.page_of(&"C".into()), Some(2));
    }

    #[test]
    fn units_mode_counts_blocks() {
        let t = tree(vec![(
            0,
            block("P", vec![ContentUnit::heading(1, "Root"), words(500), words(1), words(1)]),
        )]);
        let config = LayoutConfig {
            capacity: PageCapacity::Units(2),
            chars_per_line: 40,
        };
        let result = paginate(&t, &config);
        assert_eq!(result.pages.len(), 2);
        assert!(result.pages.iter().all(|p| p.blocks.len() == 2 && p.used == 2));
    }

    #[test]
    fn layout_is_deterministic() {
        let t = tree(vec![
            (0, block("P", vec![ContentUnit::heading(1, "Root"), words(300)])),
            (1, block("A", vec![ContentUnit::heading(1, "A"), words(80)])),
            (1, block("B", vec![ContentUnit::notice("No content.")])),
        ]);
        let config = lines_config(20, 50);
        assert_eq!(paginate(&t, &config), paginate(&t, &config));
    }

    #[test]
    fn references_resolve_to_pages() {
        let reference = |id: &str| {
            Span::reference(format!("see node {id}"), RefTarget::Node(id.into()))
        };
        let pending = Span::reference(
            "see page Nowhere",
            RefTarget::Pending {
                key: RefKey::Title("Nowhere".into()),
                fallback_url: None,
            },
        );
        let t = tree(vec![
            (
                0,
                block(
                    "P",
                    vec![
                        ContentUnit::paragraph(vec![reference("B"), Span::plain(" and "), pending.clone()]),
                        ContentUnit::paragraph(vec![pending]),
                        ContentUnit::paragraph(vec![reference("gone")]),
                    ],
                ),
            ),
            (1, block("B", vec![ContentUnit::heading(1, "B"), words(2)])),
        ]);
        let result = paginate(&t, &lines_config(4, 60));

        let first = &result.pages[0];
        assert_eq!(first.references.get("B"), result.toc.page_of(&"B".into()).as_ref());
        let Block::Text { lines, .. } = &first.blocks[0].block else {
            panic!("expected text");
        };
        assert_eq!(
            lines[0][0].kind,
            dossier_shared::SpanKind::Reference(RefTarget::Page {
                node: "B".into(),
                page: 3,
            })
        );

        // One warning per distinct unresolved target per node.
        assert_eq!(result.warnings.len(), 2);
        assert!(
            result
                .warnings
                .iter()
                .all(|w| w.category == WarningCategory::UnresolvedReference)
        );
    }
}
