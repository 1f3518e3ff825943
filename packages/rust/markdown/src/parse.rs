//! pulldown-cmark event walker producing content units.

use pulldown_cmark::{Event, Options, Parser, Tag};

use dossier_shared::{ContentUnit, ParagraphStyle, Span, SpanKind, Table, TextStyle};

use crate::refs::{classify_link, split_text_references};

/// Deepest allowed nesting of block quotes and lists.
pub const MAX_NESTING: usize = 32;

/// Parse cleaned Markdown into content units.
///
/// Headings are shifted one level down so they sit below the node title.
pub(crate) fn markdown_to_units(md: &str) -> Result<Vec<ContentUnit>, String> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut state = UnitBuilder::default();
    for event in Parser::new_ext(md, options) {
        match event {
            Event::Start(tag) => state.handle_start(tag),
            Event::End(_) => state.handle_end(),
            Event::Text(text) => state.handle_text(&text, false),
            Event::Code(code) => state.handle_text(&code, true),
            Event::SoftBreak | Event::HardBreak => state.handle_text(" ", false),
            Event::TaskListMarker(done) => {
                state.handle_text(if done { "[x] " } else { "[ ] " }, false);
            }
            Event::FootnoteReference(label) => state.handle_text(&format!("[{label}]"), false),
            _ => {}
        }

        if state.nesting > MAX_NESTING {
            return Err(format!("nesting deeper than {MAX_NESTING} levels"));
        }
    }

    state.flush_spans();
    Ok(state.units)
}

// ---------------------------------------------------------------------------
// Walker state
// ---------------------------------------------------------------------------

/// What an open `Start` tag needs done at its matching `End`.
enum Frame {
    Paragraph,
    Heading,
    BlockQuote,
    List,
    Item,
    CodeBlock,
    Table,
    TableHead,
    TableRow,
    TableCell,
    Emphasis,
    Strong,
    Link,
    Image,
    Other,
}

struct ItemState {
    style: ParagraphStyle,
    marker_used: bool,
}

#[derive(Default)]
struct TableBuilder {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: Option<String>,
}

#[derive(Default)]
struct UnitBuilder {
    units: Vec<ContentUnit>,
    frames: Vec<Frame>,
    spans: Vec<Span>,
    emphasis: usize,
    strong: usize,
    links: Vec<SpanKind>,
    /// Next number of each open list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
    items: Vec<ItemState>,
    quote_depth: usize,
    nesting: usize,
    code: Option<String>,
    heading: Option<(u8, String)>,
    table: Option<TableBuilder>,
    image: Option<(String, String)>,
}

impl UnitBuilder {
    fn handle_start(&mut self, tag: Tag<'_>) {
        let frame = match tag {
            Tag::Paragraph => {
                self.flush_spans();
                Frame::Paragraph
            }
            Tag::Heading { level, .. } => {
                self.flush_spans();
                let shifted = (level as u8).saturating_add(1).min(6);
                self.heading = Some((shifted, String::new()));
                Frame::Heading
            }
            Tag::BlockQuote(_) => {
                self.flush_spans();
                self.quote_depth += 1;
                self.nesting += 1;
                Frame::BlockQuote
            }
            Tag::CodeBlock(_) => {
                self.flush_spans();
                self.code = Some(String::new());
                Frame::CodeBlock
            }
            Tag::List(first) => {
                self.flush_spans();
                self.lists.push(first);
                self.nesting += 1;
                Frame::List
            }
            Tag::Item => {
                self.flush_spans();
                let level = u8::try_from(self.lists.len()).unwrap_or(u8::MAX);
                let style = match self.lists.last_mut() {
                    Some(Some(next)) => {
                        let number = *next;
                        *next += 1;
                        ParagraphStyle::Numbered { level, number }
                    }
                    _ => ParagraphStyle::Bullet { level },
                };
                self.items.push(ItemState {
                    style,
                    marker_used: false,
                });
                Frame::Item
            }
            Tag::Table(_) => {
                self.flush_spans();
                self.table = Some(TableBuilder::default());
                Frame::Table
            }
            Tag::TableHead => Frame::TableHead,
            Tag::TableRow => Frame::TableRow,
            Tag::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    table.cell = Some(String::new());
                }
                Frame::TableCell
            }
            Tag::Emphasis => {
                self.emphasis += 1;
                Frame::Emphasis
            }
            Tag::Strong => {
                self.strong += 1;
                Frame::Strong
            }
            Tag::Link { dest_url, .. } => {
                self.links.push(classify_link(&dest_url));
                Frame::Link
            }
            Tag::Image { dest_url, .. } => {
                self.image = Some((dest_url.to_string(), String::new()));
                Frame::Image
            }
            _ => Frame::Other,
        };
        self.frames.push(frame);
    }

    fn handle_end(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };

        match frame {
            Frame::Paragraph => self.flush_spans(),
            Frame::Heading => {
                if let Some((level, text)) = self.heading.take() {
                    let text = collapse_whitespace(&text);
                    if !text.is_empty() {
                        self.units.push(ContentUnit::heading(level, text));
                    }
                }
            }
            Frame::BlockQuote => {
                self.flush_spans();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.nesting = self.nesting.saturating_sub(1);
            }
            Frame::CodeBlock => {
                if let Some(code) = self.code.take() {
                    let code = code.trim_end_matches('\n');
                    if !code.trim().is_empty() {
                        self.units.push(ContentUnit::Paragraph {
                            style: ParagraphStyle::Code,
                            spans: vec![Span::styled(code, TextStyle::Code)],
                        });
                    }
                }
            }
            Frame::List => {
                self.flush_spans();
                self.lists.pop();
                self.nesting = self.nesting.saturating_sub(1);
            }
            Frame::Item => {
                self.flush_spans();
                self.items.pop();
            }
            Frame::Table => {
                if let Some(table) = self.table.take() {
                    self.units
                        .push(ContentUnit::Table(Table::new(table.header, table.rows)));
                }
            }
            Frame::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.header = std::mem::take(&mut table.row);
                }
            }
            Frame::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.row);
                    table.rows.push(row);
                }
            }
            Frame::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    let cell = table.cell.take().unwrap_or_default();
                    table.row.push(collapse_whitespace(&cell));
                }
            }
            Frame::Emphasis => self.emphasis = self.emphasis.saturating_sub(1),
            Frame::Strong => self.strong = self.strong.saturating_sub(1),
            Frame::Link => {
                self.links.pop();
            }
            Frame::Image => {
                if let Some((url, alt)) = self.image.take() {
                    let alt = collapse_whitespace(&alt);
                    let label = if alt.is_empty() { "image".to_string() } else { alt };
                    if !self.append_to_sink(&label) {
                        self.spans.push(Span::link(format!("[{label}]"), url));
                    }
                }
            }
            Frame::Other => {}
        }
    }

    fn handle_text(&mut self, text: &str, inline_code: bool) {
        if let Some(code) = self.code.as_mut() {
            code.push_str(text);
            return;
        }
        if let Some((_, alt)) = self.image.as_mut() {
            alt.push_str(text);
            return;
        }
        if self.append_to_sink(text) {
            return;
        }

        let style = if inline_code {
            TextStyle::Code
        } else {
            self.current_style()
        };

        if let Some(kind) = self.links.last() {
            self.spans.push(Span {
                text: text.to_string(),
                style,
                kind: kind.clone(),
            });
            return;
        }

        if inline_code {
            self.spans.push(Span::styled(text, style));
            return;
        }

        for piece in split_text_references(text) {
            let kind = match piece.target {
                Some(target) => SpanKind::Reference(target),
                None => SpanKind::Plain,
            };
            self.spans.push(Span {
                text: piece.text,
                style,
                kind,
            });
        }
    }

    /// Route text into a table cell or heading if one is open.
    fn append_to_sink(&mut self, text: &str) -> bool {
        if let Some(cell) = self.table.as_mut().and_then(|t| t.cell.as_mut()) {
            cell.push_str(text);
            return true;
        }
        if let Some((_, heading)) = self.heading.as_mut() {
            heading.push_str(text);
            return true;
        }
        false
    }

    fn current_style(&self) -> TextStyle {
        if self.strong > 0 {
            TextStyle::Bold
        } else if self.emphasis > 0 {
            TextStyle::Italic
        } else {
            TextStyle::Regular
        }
    }

    fn paragraph_style(&mut self) -> ParagraphStyle {
        if let Some(item) = self.items.last_mut() {
            if !item.marker_used {
                item.marker_used = true;
                return item.style;
            }
            return ParagraphStyle::Body;
        }
        if self.quote_depth > 0 {
            ParagraphStyle::Quote
        } else {
            ParagraphStyle::Body
        }
    }

    fn flush_spans(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        let spans = merge_spans(std::mem::take(&mut self.spans));
        if spans.is_empty() {
            return;
        }
        let style = self.paragraph_style();
        self.units.push(ContentUnit::Paragraph { style, spans });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Merge adjacent spans of the same run and trim the paragraph edges.
fn merge_spans(spans: Vec<Span>) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if last.same_run(&span) => last.text.push_str(&span.text),
            _ => merged.push(span),
        }
    }

    if let Some(first) = merged.first_mut() {
        first.text = first.text.trim_start().to_string();
    }
    if let Some(last) = merged.last_mut() {
        last.text = last.text.trim_end().to_string();
    }
    merged.retain(|s| !s.text.is_empty());
    merged
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use dossier_shared::{RefKey, RefTarget, spans_text};

    use super::*;

    fn paragraphs(units: &[ContentUnit]) -> Vec<(ParagraphStyle, String)> {
        units
            .iter()
            .filter_map(|u| match u {
                ContentUnit::Paragraph { style, spans } => Some((*style, spans_text(spans))),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn headings_shift_below_title() {
        let units = markdown_to_units("# Aims\n\n###### Tiny\n").expect("parse");
        assert_eq!(units[0], ContentUnit::heading(2, "Aims"));
        assert_eq!(units[1], ContentUnit::heading(6, "Tiny"));
    }

    #[test]
    fn inline_styles_become_spans() {
        let units = markdown_to_units("Plain **bold** and *it* and `code`.").expect("parse");
        let ContentUnit::Paragraph { spans, .. } = &units[0] else {
            panic!("expected paragraph");
        };
        let styles: Vec<TextStyle> = spans.iter().map(|s| s.style).collect();
        assert_eq!(
            styles,
            vec![
                TextStyle::Regular,
                TextStyle::Bold,
                TextStyle::Regular,
                TextStyle::Italic,
                TextStyle::Regular,
                TextStyle::Code,
                TextStyle::Regular,
            ]
        );
        assert_eq!(spans_text(spans), "Plain bold and it and code.");
    }

    #[test]
    fn lists_carry_markers() {
        let units = markdown_to_units("- one\n- two\n  1. nested\n  2. again\n").expect("parse");
        let paras = paragraphs(&units);
        assert_eq!(
            paras,
            vec![
                (ParagraphStyle::Bullet { level: 1 }, "one".to_string()),
                (ParagraphStyle::Bullet { level: 1 }, "two".to_string()),
                (ParagraphStyle::Numbered { level: 2, number: 1 }, "nested".to_string()),
                (ParagraphStyle::Numbered { level: 2, number: 2 }, "again".to_string()),
            ]
        );
    }

    #[test]
    fn block_quote_and_code_block() {
        let units = markdown_to_units("> quoted text\n\n```rust\nfn main() {}\n\nlet x = 1;\n```\n")
            .expect("parse");
        let paras = paragraphs(&units);
        assert_eq!(paras[0], (ParagraphStyle::Quote, "quoted text".to_string()));
        assert_eq!(
            paras[1],
            (ParagraphStyle::Code, "fn main() {}\n\nlet x = 1;".to_string())
        );
    }

    #[test]
    fn gfm_table() {
        let md = "| Name | Value |\n| --- | --- |\n| foo | **bar** |\n| baz | |\n";
        let units = markdown_to_units(md).expect("parse");
        assert_eq!(
            units,
            vec![ContentUnit::Table(Table::new(
                vec!["Name".into(), "Value".into()],
                vec![
                    vec!["foo".into(), "bar".into()],
                    vec!["baz".into(), "".into()],
                ],
            ))]
        );
    }

    #[test]
    fn links_and_references() {
        let units = markdown_to_units(
            "Read [the docs](https://example.com) and [methods](node:m1). See page Results.",
        )
        .expect("parse");
        let ContentUnit::Paragraph { spans, .. } = &units[0] else {
            panic!("expected paragraph");
        };
        assert!(spans.iter().any(|s| s.text == "the docs"
            && s.kind
                == SpanKind::Link {
                    url: "https://example.com".into()
                }));
        assert!(spans.iter().any(|s| s.text == "methods"
            && s.kind
                == SpanKind::Reference(RefTarget::Pending {
                    key: RefKey::Id("m1".into()),
                    fallback_url: None,
                })));
        assert!(spans.iter().any(|s| s.text == "See page Results"
            && matches!(
                &s.kind,
                SpanKind::Reference(RefTarget::Pending { key: RefKey::Title(t), .. }) if t == "Results"
            )));
    }

    #[test]
    fn images_become_links() {
        let units = markdown_to_units("![Figure 1](https://example.com/f1.png)").expect("parse");
        let ContentUnit::Paragraph { spans, .. } = &units[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(spans[0], Span::link("[Figure 1]", "https://example.com/f1.png"));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let md = format!("{} deep\n", ">".repeat(MAX_NESTING + 2));
        let err = markdown_to_units(&md).unwrap_err();
        assert!(err.contains("nesting"));
    }
}
