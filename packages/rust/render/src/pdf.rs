//! PDF writer.
//!
//! Builds the document object by object with `lopdf`: cover, contents,
//! content pages, link and file-attachment annotations, embedded files, page
//! labels and the outline. Nothing time- or randomness-dependent is written
//! unless an export time is supplied, so equal input gives equal bytes.

use std::collections::HashMap;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use qrcode::{Color, QrCode};
use tracing::debug;

use dossier_shared::{
    AVG_CHAR_WIDTH, Block, PageBlock, ParagraphStyle, RefTarget, RenderError, Span, SpanKind,
    TableLayout, TextStyle, Theme, Toc, heading_scale, truncate_chars, wrap_text,
};

use crate::RenderInput;
use crate::assets::AssetOutcome;
use crate::text::{encode_win_ansi, roman, text_width};

const PRODUCER: &str = "Dossier";

/// Gap between table columns, in characters.
const COLUMN_GUTTER: usize = 2;

/// Lines the "Contents" title takes on each TOC page.
const TOC_TITLE_LINES: u32 = 2;

const LINK_COLOR: (f32, f32, f32) = (0.0, 0.2, 0.6);
const MUTED: f32 = 0.4;

/// Side of the cover QR code, in points.
const QR_SIZE: f32 = 108.0;

// ---------------------------------------------------------------------------
// Fonts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
    Italic,
    Mono,
}

impl Font {
    const ALL: [Font; 4] = [Font::Regular, Font::Bold, Font::Italic, Font::Mono];

    fn key(self) -> &'static str {
        match self {
            Self::Regular => "F1",
            Self::Bold => "F2",
            Self::Italic => "F3",
            Self::Mono => "F4",
        }
    }

    fn base_font(self) -> &'static str {
        match self {
            Self::Regular => "Helvetica",
            Self::Bold => "Helvetica-Bold",
            Self::Italic => "Helvetica-Oblique",
            Self::Mono => "Courier",
        }
    }

    fn for_style(style: TextStyle) -> Self {
        match style {
            TextStyle::Regular => Self::Regular,
            TextStyle::Bold => Self::Bold,
            TextStyle::Italic => Self::Italic,
            TextStyle::Code => Self::Mono,
        }
    }
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

/// Where an annotation points.
enum Target {
    Uri(String),
    Page(usize),
    File { name: String, bytes: Vec<u8> },
}

struct Annotation {
    rect: [f32; 4],
    target: Target,
}

/// Content-stream operations and annotations for one page.
#[derive(Default)]
struct Canvas {
    ops: Vec<Operation>,
    annotations: Vec<Annotation>,
}

impl Canvas {
    fn text(&mut self, font: Font, size: f32, x: f32, y: f32, text: &str) {
        if text.is_empty() {
            return;
        }
        self.ops.push(Operation::new("BT", vec![]));
        self.ops
            .push(Operation::new("Tf", vec![font.key().into(), size.into()]));
        self.ops.push(Operation::new("Td", vec![x.into(), y.into()]));
        self.ops.push(Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
        ));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn fill_gray(&mut self, gray: f32) {
        self.ops.push(Operation::new("g", vec![gray.into()]));
    }

    fn fill_rgb(&mut self, (r, g, b): (f32, f32, f32)) {
        self.ops
            .push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
    }

    fn rule(&mut self, from: (f32, f32), to: (f32, f32), width: f32, gray: f32) {
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new("G", vec![gray.into()]));
        self.ops.push(Operation::new("w", vec![width.into()]));
        self.ops.push(Operation::new("m", vec![from.0.into(), from.1.into()]));
        self.ops.push(Operation::new("l", vec![to.0.into(), to.1.into()]));
        self.ops.push(Operation::new("S", vec![]));
        self.ops.push(Operation::new("Q", vec![]));
    }

    /// Underlined, colored text with a clickable area.
    fn link(&mut self, font: Font, size: f32, x: f32, y: f32, text: &str, target: Target) -> f32 {
        let width = text_width(text, size, font == Font::Mono);
        self.fill_rgb(LINK_COLOR);
        self.text(font, size, x, y, text);
        self.fill_gray(0.0);
        self.rule((x, y - 1.5), (x + width, y - 1.5), 0.5, 0.3);
        self.annotations.push(Annotation {
            rect: [x, y - 2.5, x + width, y + size],
            target,
        });
        width
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Type metrics for one page, scaled down when the page holds more lines
/// (or wider lines) than the theme provides room for.
#[derive(Debug, Clone, Copy)]
struct Metrics {
    height: f32,
    left: f32,
    right: f32,
    top: f32,
    size: f32,
    leading: f32,
    char_width: f32,
}

impl Metrics {
    fn new(theme: &Theme, chars_per_line: usize, lines: u32) -> Self {
        let (width, height) = theme.page_size.dimensions();
        let usable_width = width - 2.0 * theme.margin;
        let slots = theme.lines_per_page() as f32;

        let vertical = if lines as f32 > slots {
            slots / lines as f32
        } else {
            1.0
        };
        let natural = chars_per_line as f32 * theme.font_size * AVG_CHAR_WIDTH;
        let horizontal = if natural > usable_width {
            usable_width / natural
        } else {
            1.0
        };
        let scale = vertical.min(horizontal);

        let size = theme.font_size * scale;
        Self {
            height,
            left: theme.margin,
            right: width - theme.margin,
            top: height - theme.margin,
            size,
            leading: theme.leading() * scale,
            char_width: size * AVG_CHAR_WIDTH,
        }
    }

    /// Baseline of line `slot` counted from `top`.
    fn baseline(&self, top: f32, slot: usize) -> f32 {
        top - slot as f32 * self.leading - self.size
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Rendered document and its page count.
pub(crate) struct WrittenPdf {
    pub bytes: Vec<u8>,
    pub front_pages: u32,
}

/// Write the whole document.
///
/// `outcomes` holds one entry per asset block, in page then block order.
pub(crate) fn write_pdf(
    input: &RenderInput,
    theme: &Theme,
    chars_per_line: usize,
    outcomes: &[AssetOutcome],
) -> Result<WrittenPdf, RenderError> {
    let toc_pages = toc_page_count(&input.toc, theme);
    let front_pages = 1 + toc_pages;
    let content_pages = input.pages.len().max(1);
    let total = front_pages + content_pages;

    let mut canvases = Vec::with_capacity(total);
    canvases.push(cover_page(input, theme, chars_per_line, content_pages));
    canvases.extend(toc_canvases(&input.toc, theme, chars_per_line, front_pages));

    let title = input.title.as_str();
    let mut outcomes = outcomes.iter();
    for page in &input.pages {
        canvases.push(content_page(
            page,
            theme,
            chars_per_line,
            title,
            content_pages as u32,
            front_pages,
            &mut outcomes,
        ));
    }
    if input.pages.is_empty() {
        canvases.push(content_page(
            &PageBlock::new(1),
            theme,
            chars_per_line,
            title,
            1,
            front_pages,
            &mut outcomes,
        ));
    }

    let bytes = assemble_document(input, theme, canvases, front_pages)?;
    Ok(WrittenPdf {
        bytes,
        front_pages: front_pages as u32,
    })
}

fn toc_page_count(toc: &Toc, theme: &Theme) -> usize {
    let per_page = toc_entries_per_page(theme);
    toc.len().div_ceil(per_page).max(1)
}

fn toc_entries_per_page(theme: &Theme) -> usize {
    theme.lines_per_page().saturating_sub(TOC_TITLE_LINES).max(1) as usize
}

/// Content page `number` as a document page index.
fn content_index(front_pages: usize, number: u32) -> usize {
    front_pages + number.saturating_sub(1) as usize
}

fn cover_page(input: &RenderInput, theme: &Theme, chars_per_line: usize, content_pages: usize) -> Canvas {
    let metrics = Metrics::new(theme, chars_per_line, 0);
    let mut canvas = Canvas::default();

    let title_size = metrics.size * 2.0;
    let title_chars = ((chars_per_line as f32) / 2.0).floor().max(1.0) as usize;
    let mut y = metrics.height * 0.65;
    for line in wrap_text(&input.title, title_chars) {
        canvas.text(Font::Bold, title_size, metrics.left, y, &line);
        y -= title_size * 1.3;
    }

    y -= metrics.leading;
    canvas.rule((metrics.left, y + metrics.leading * 0.5), (metrics.right, y + metrics.leading * 0.5), 1.0, 0.5);

    if let Some(url) = &input.source_url {
        canvas.text(Font::Regular, metrics.size, metrics.left, y, "Source: ");
        let x = metrics.left + text_width("Source: ", metrics.size, false);
        let shown = truncate_chars(url, chars_per_line.saturating_sub(8));
        canvas.link(Font::Regular, metrics.size, x, y, &shown, Target::Uri(url.clone()));
        y -= metrics.leading;
    }
    if let Some(at) = &input.exported_at {
        let stamp = at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        canvas.text(Font::Regular, metrics.size, metrics.left, y, &format!("Exported: {stamp}"));
        y -= metrics.leading;
    }
    canvas.text(
        Font::Regular,
        metrics.size,
        metrics.left,
        y,
        &format!("Content pages: {content_pages}"),
    );
    if let Some(url) = &input.source_url {
        draw_qr(&mut canvas, url, metrics.left, y - metrics.leading);
    }

    canvas.fill_gray(MUTED);
    canvas.text(
        Font::Italic,
        metrics.size * 0.8,
        metrics.left,
        theme.margin,
        &format!("Generated by {PRODUCER}"),
    );
    canvas.fill_gray(0.0);
    canvas
}

/// Draw `url` as a QR code hanging from (`x`, `top`). Dark modules of a row
/// are merged into one rectangle per run and filled in one pass.
fn draw_qr(canvas: &mut Canvas, url: &str, x: f32, top: f32) {
    let code = match QrCode::new(url.as_bytes()) {
        Ok(code) => code,
        Err(e) => {
            debug!(%url, error = %e, "source URL does not fit a QR code");
            return;
        }
    };
    let width = code.width();
    let module = QR_SIZE / width as f32;

    canvas.ops.push(Operation::new("q", vec![]));
    canvas.fill_gray(0.0);
    for (row, modules) in code.to_colors().chunks(width).enumerate() {
        let y = top - (row + 1) as f32 * module;
        for (start, len) in dark_runs(modules) {
            canvas.ops.push(Operation::new(
                "re",
                vec![
                    (x + start as f32 * module).into(),
                    y.into(),
                    (len as f32 * module).into(),
                    module.into(),
                ],
            ));
        }
    }
    canvas.ops.push(Operation::new("f", vec![]));
    canvas.ops.push(Operation::new("Q", vec![]));
}

/// `(start, length)` of each run of dark modules.
fn dark_runs(modules: &[Color]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (index, color) in modules.iter().enumerate() {
        match (color, start) {
            (Color::Dark, None) => start = Some(index),
            (Color::Light, Some(from)) => {
                runs.push((from, index - from));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(from) = start {
        runs.push((from, modules.len() - from));
    }
    runs
}

fn toc_canvases(toc: &Toc, theme: &Theme, chars_per_line: usize, front_pages: usize) -> Vec<Canvas> {
    let per_page = toc_entries_per_page(theme);
    let count = toc_page_count(toc, theme);
    let metrics = Metrics::new(theme, chars_per_line, 0);

    (0..count)
        .map(|index| {
            let mut canvas = Canvas::default();
            let heading = if index == 0 { "Contents" } else { "Contents (continued)" };
            canvas.text(
                Font::Bold,
                metrics.size * heading_scale(1),
                metrics.left,
                metrics.baseline(metrics.top, 1),
                heading,
            );

            let start = index * per_page;
            let entries = toc.entries.iter().skip(start).take(per_page);
            for (slot, entry) in entries.enumerate() {
                let y = metrics.baseline(metrics.top, slot + TOC_TITLE_LINES as usize);
                let indent = (2 * entry.depth).min(chars_per_line / 2);
                let number = entry.page.to_string();
                let room = chars_per_line.saturating_sub(indent + number.len() + 4).max(4);
                let title = truncate_chars(&entry.title, room);
                let dots = chars_per_line.saturating_sub(indent + title.chars().count() + number.len() + 2);

                let x = metrics.left + indent as f32 * metrics.char_width;
                let font = if entry.depth == 0 { Font::Bold } else { Font::Regular };
                canvas.text(font, metrics.size, x, y, &title);

                let title_end = x + text_width(&title, metrics.size, false);
                let number_x = metrics.right - text_width(&number, metrics.size, false);
                if dots > 0 {
                    canvas.fill_gray(MUTED);
                    let leader = ".".repeat(dots);
                    let leader_x = (number_x - metrics.char_width - text_width(&leader, metrics.size, false))
                        .max(title_end + metrics.char_width);
                    canvas.text(Font::Regular, metrics.size, leader_x, y, &leader);
                    canvas.fill_gray(0.0);
                }
                canvas.text(Font::Regular, metrics.size, number_x, y, &number);

                canvas.annotations.push(Annotation {
                    rect: [x, y - 2.5, metrics.right, y + metrics.size],
                    target: Target::Page(content_index(front_pages, entry.page)),
                });
            }

            footer(&mut canvas, theme, &roman(index as u32 + 2));
            canvas
        })
        .collect()
}

fn footer(canvas: &mut Canvas, theme: &Theme, label: &str) {
    let (width, _) = theme.page_size.dimensions();
    let size = theme.font_size * 0.8;
    let x = (width - text_width(label, size, false)) / 2.0;
    canvas.fill_gray(MUTED);
    canvas.text(Font::Regular, size, x, theme.margin / 2.0, label);
    canvas.fill_gray(0.0);
}

fn header(canvas: &mut Canvas, theme: &Theme, chars_per_line: usize, title: &str) {
    let (width, height) = theme.page_size.dimensions();
    let size = theme.font_size * 0.8;
    let y = height - theme.margin / 2.0;
    let shown = truncate_chars(title, chars_per_line);
    canvas.fill_gray(MUTED);
    canvas.text(Font::Regular, size, theme.margin, y, &shown);
    canvas.fill_gray(0.0);
    canvas.rule(
        (theme.margin, y - size * 0.6),
        (width - theme.margin, y - size * 0.6),
        0.5,
        0.6,
    );
}

fn content_page<'a>(
    page: &PageBlock,
    theme: &Theme,
    chars_per_line: usize,
    title: &str,
    content_pages: u32,
    front_pages: usize,
    outcomes: &mut impl Iterator<Item = &'a AssetOutcome>,
) -> Canvas {
    let metrics = Metrics::new(theme, chars_per_line, page.total_lines());
    let mut canvas = Canvas::default();
    header(&mut canvas, theme, chars_per_line, title);

    let mut top = metrics.top;
    for placed in &page.blocks {
        match &placed.block {
            Block::Heading { level, text } => {
                let size = metrics.size * heading_scale(*level);
                let y = top - 1.55 * metrics.leading;
                canvas.text(Font::Bold, size, metrics.left, y, text);
            }
            Block::Text {
                style,
                lines,
                continued,
            } => draw_text(&mut canvas, &metrics, top, *style, lines, *continued, front_pages),
            Block::Table(table) => draw_table(&mut canvas, &metrics, top, table),
            Block::Asset(asset) => {
                let outcome = outcomes.next();
                let y = metrics.baseline(top, 0);
                canvas.text(Font::Bold, metrics.size, metrics.left, y, &asset.caption);
                let y = metrics.baseline(top, 1);
                draw_asset_status(&mut canvas, &metrics, y, &asset.name, outcome, chars_per_line);
            }
            Block::Hyperlink { label, url } => {
                let y = metrics.baseline(top, 0);
                let prefix = format!("{label}: ");
                canvas.text(Font::Regular, metrics.size, metrics.left, y, &prefix);
                let x = metrics.left + text_width(&prefix, metrics.size, false);
                let shown = truncate_chars(url, chars_per_line.saturating_sub(prefix.chars().count()));
                canvas.link(Font::Regular, metrics.size, x, y, &shown, Target::Uri(url.clone()));
            }
            Block::Notice { text } => {
                canvas.fill_gray(MUTED);
                for (slot, line) in wrap_text(text, chars_per_line).iter().enumerate() {
                    let y = metrics.baseline(top, slot);
                    canvas.text(Font::Italic, metrics.size, metrics.left, y, line);
                }
                canvas.fill_gray(0.0);
            }
        }
        top -= placed.lines as f32 * metrics.leading;
    }

    footer(
        &mut canvas,
        theme,
        &format!("Page {} of {}", page.number, content_pages),
    );
    canvas
}

fn draw_text(
    canvas: &mut Canvas,
    metrics: &Metrics,
    top: f32,
    style: ParagraphStyle,
    lines: &[Vec<Span>],
    continued: bool,
    front_pages: usize,
) {
    let x0 = metrics.left + style.indent() as f32 * metrics.char_width;

    match style {
        ParagraphStyle::Bullet { .. } if !continued => {
            let x = x0 - 2.0 * metrics.char_width;
            canvas.text(Font::Regular, metrics.size, x, metrics.baseline(top, 0), "\u{2022}");
        }
        ParagraphStyle::Numbered { number, .. } if !continued => {
            let marker = format!("{number}.");
            let x = x0 - (marker.len() + 1) as f32 * metrics.char_width;
            canvas.text(Font::Regular, metrics.size, x, metrics.baseline(top, 0), &marker);
        }
        ParagraphStyle::Quote => {
            let x = metrics.left + 1.5 * metrics.char_width;
            let bottom = top - lines.len() as f32 * metrics.leading;
            canvas.rule((x, top - 2.0), (x, bottom + 2.0), 1.5, 0.6);
        }
        _ => {}
    }

    for (slot, line) in lines.iter().enumerate() {
        let y = metrics.baseline(top, slot);
        let mut x = x0;
        for span in line {
            let font = Font::for_style(span.style);
            let font = if style == ParagraphStyle::Code { Font::Mono } else { font };
            let advance = match &span.kind {
                SpanKind::Link { url } => {
                    canvas.link(font, metrics.size, x, y, &span.text, Target::Uri(url.clone()))
                }
                SpanKind::Reference(RefTarget::Page { page, .. }) => canvas.link(
                    font,
                    metrics.size,
                    x,
                    y,
                    &span.text,
                    Target::Page(content_index(front_pages, *page)),
                ),
                _ => {
                    canvas.text(font, metrics.size, x, y, &span.text);
                    text_width(&span.text, metrics.size, font == Font::Mono)
                }
            };
            x += advance;
        }
    }
}

fn draw_table(canvas: &mut Canvas, metrics: &Metrics, top: f32, table: &TableLayout) {
    let mut offsets = Vec::with_capacity(table.widths.len());
    let mut chars = 0;
    for width in &table.widths {
        offsets.push(metrics.left + chars as f32 * metrics.char_width);
        chars += width + COLUMN_GUTTER;
    }

    let draw_row = |canvas: &mut Canvas, cells: &[Vec<String>], first_slot: usize, font: Font| {
        for (col, lines) in cells.iter().enumerate() {
            let Some(x) = offsets.get(col) else { continue };
            for (i, line) in lines.iter().enumerate() {
                canvas.text(font, metrics.size, *x, metrics.baseline(top, first_slot + i), line);
            }
        }
    };

    draw_row(canvas, &table.header, 0, Font::Bold);
    let mut slot = table.header_height();
    let rule_y = top - slot as f32 * metrics.leading + metrics.leading * 0.15;
    let rule_end = metrics.left + chars.saturating_sub(COLUMN_GUTTER) as f32 * metrics.char_width;
    canvas.rule((metrics.left, rule_y), (rule_end.min(metrics.right), rule_y), 0.5, 0.3);

    for (index, row) in table.rows.iter().enumerate() {
        draw_row(canvas, row, slot, Font::Regular);
        slot += table.row_height(index);
    }
}

fn draw_asset_status(
    canvas: &mut Canvas,
    metrics: &Metrics,
    y: f32,
    name: &str,
    outcome: Option<&AssetOutcome>,
    chars_per_line: usize,
) {
    let x = metrics.left + 2.0 * metrics.char_width;
    let room = chars_per_line.saturating_sub(2);
    match outcome {
        Some(AssetOutcome::Embedded(bytes)) => {
            let label = "Embedded as a file attachment";
            canvas.text(Font::Regular, metrics.size, x, y, label);
            let icon_x = x + text_width(label, metrics.size, false) + metrics.char_width;
            canvas.annotations.push(Annotation {
                rect: [icon_x, y - 2.0, icon_x + metrics.size, y + metrics.size],
                target: Target::File {
                    name: name.to_string(),
                    bytes: bytes.clone(),
                },
            });
        }
        Some(AssetOutcome::Linked(url)) => {
            canvas.text(Font::Regular, metrics.size, x, y, "Download: ");
            let link_x = x + text_width("Download: ", metrics.size, false);
            let shown = truncate_chars(url, room.saturating_sub(10));
            canvas.link(Font::Regular, metrics.size, link_x, y, &shown, Target::Uri(url.clone()));
        }
        Some(AssetOutcome::Listed) => {
            canvas.fill_gray(MUTED);
            canvas.text(Font::Italic, metrics.size, x, y, "Not embedded");
            canvas.fill_gray(0.0);
        }
        Some(AssetOutcome::Unavailable(reason)) => {
            let text = truncate_chars(&format!("[content unavailable] {reason}"), room);
            canvas.fill_gray(MUTED);
            canvas.text(Font::Italic, metrics.size, x, y, &text);
            canvas.fill_gray(0.0);
        }
        None => {
            canvas.fill_gray(MUTED);
            canvas.text(Font::Italic, metrics.size, x, y, "[content unavailable]");
            canvas.fill_gray(0.0);
        }
    }
}

// ---------------------------------------------------------------------------
// Object assembly
// ---------------------------------------------------------------------------

/// PDF text string: literal when ASCII, UTF-16BE with a byte order mark otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn rect(r: [f32; 4]) -> Object {
    Object::Array(r.iter().map(|v| Object::from(*v)).collect())
}

fn fit(page: ObjectId) -> Object {
    Object::Array(vec![Object::Reference(page), "Fit".into()])
}

fn assemble_document(
    input: &RenderInput,
    theme: &Theme,
    canvases: Vec<Canvas>,
    front_pages: usize,
) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut font_dict = Dictionary::new();
    for font in Font::ALL {
        let id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        font_dict.set(font.key(), id);
    }
    let resources_id = doc.add_object(dictionary! { "Font" => font_dict });

    let page_ids: Vec<ObjectId> = canvases.iter().map(|_| doc.new_object_id()).collect();
    let (width, height) = theme.page_size.dimensions();
    let mut embedded: Vec<(String, ObjectId)> = Vec::new();

    for (index, canvas) in canvases.into_iter().enumerate() {
        let content = Content {
            operations: canvas.ops,
        };
        let encoded = content.encode().map_err(RenderError::encoding)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let mut annots = Vec::with_capacity(canvas.annotations.len());
        for annotation in canvas.annotations {
            let mut dict = dictionary! {
                "Type" => "Annot",
                "Rect" => rect(annotation.rect),
                "Border" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
            };
            match annotation.target {
                Target::Uri(uri) => {
                    dict.set("Subtype", "Link");
                    dict.set(
                        "A",
                        dictionary! { "S" => "URI", "URI" => Object::string_literal(uri) },
                    );
                }
                Target::Page(target) => {
                    let Some(page) = page_ids.get(target) else { continue };
                    dict.set("Subtype", "Link");
                    dict.set("Dest", fit(*page));
                }
                Target::File { name, bytes } => {
                    let size = bytes.len() as i64;
                    let file_id = doc.add_object(Stream::new(
                        dictionary! {
                            "Type" => "EmbeddedFile",
                            "Params" => dictionary! { "Size" => size },
                        },
                        bytes,
                    ));
                    let spec_id = doc.add_object(dictionary! {
                        "Type" => "Filespec",
                        "F" => Object::string_literal(encode_win_ansi(&name)),
                        "UF" => text_string(&name),
                        "EF" => dictionary! { "F" => file_id },
                    });
                    embedded.push((format!("{:04} {name}", embedded.len() + 1), spec_id));
                    dict.set("Subtype", "FileAttachment");
                    dict.set("FS", spec_id);
                    dict.set("Name", "Paperclip");
                    dict.set("Contents", text_string(&name));
                }
            }
            annots.push(Object::Reference(doc.add_object(dict)));
        }

        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), width.into(), height.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        };
        if !annots.is_empty() {
            page.set("Annots", annots);
        }
        doc.objects.insert(page_ids[index], Object::Dictionary(page));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => page_ids.len() as i64,
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "PageLabels" => dictionary! {
            "Nums" => vec![
                Object::Integer(0),
                Object::Dictionary(dictionary! { "S" => "r" }),
                Object::Integer(front_pages as i64),
                Object::Dictionary(dictionary! { "S" => "D" }),
            ],
        },
    };
    if let Some(outline_id) = build_outline(&mut doc, &input.toc, &page_ids, front_pages) {
        catalog.set("Outlines", outline_id);
        catalog.set("PageMode", "UseOutlines");
    }
    if !embedded.is_empty() {
        let names: Vec<Object> = embedded
            .into_iter()
            .flat_map(|(key, id)| [Object::string_literal(encode_win_ansi(&key)), Object::Reference(id)])
            .collect();
        catalog.set(
            "Names",
            dictionary! { "EmbeddedFiles" => dictionary! { "Names" => names } },
        );
    }
    let catalog_id = doc.add_object(catalog);

    let mut info = dictionary! {
        "Title" => text_string(&input.title),
        "Producer" => Object::string_literal(PRODUCER),
    };
    if let Some(at) = &input.exported_at {
        let stamp = at.format("D:%Y%m%d%H%M%SZ").to_string();
        info.set("CreationDate", Object::string_literal(stamp.clone()));
        info.set("ModDate", Object::string_literal(stamp));
    }
    let info_id = doc.add_object(info);

    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(RenderError::encoding)?;
    Ok(bytes)
}

/// Outline items mirroring the TOC hierarchy.
fn build_outline(
    doc: &mut Document,
    toc: &Toc,
    page_ids: &[ObjectId],
    front_pages: usize,
) -> Option<ObjectId> {
    if toc.is_empty() {
        return None;
    }

    let root_id = doc.new_object_id();
    let ids: Vec<ObjectId> = toc.entries.iter().map(|_| doc.new_object_id()).collect();

    // Parent of each entry: nearest preceding entry with smaller depth.
    let mut parents: Vec<Option<usize>> = Vec::with_capacity(ids.len());
    let mut stack: Vec<usize> = Vec::new();
    for (index, entry) in toc.entries.iter().enumerate() {
        while stack
            .last()
            .is_some_and(|&top| toc.entries[top].depth >= entry.depth)
        {
            stack.pop();
        }
        parents.push(stack.last().copied());
        stack.push(index);
    }

    // Sibling links, first and last child per parent (None is the root).
    let mut prev: Vec<Option<usize>> = vec![None; ids.len()];
    let mut next: Vec<Option<usize>> = vec![None; ids.len()];
    let mut first_child: HashMap<Option<usize>, usize> = HashMap::new();
    let mut last_child: HashMap<Option<usize>, usize> = HashMap::new();
    for (index, parent) in parents.iter().enumerate() {
        if let Some(previous) = last_child.insert(*parent, index) {
            prev[index] = Some(previous);
            next[previous] = Some(index);
        }
        first_child.entry(*parent).or_insert(index);
    }

    // Count of all descendants, for the open-outline /Count.
    let mut descendants = vec![0i64; ids.len()];
    for index in (0..ids.len()).rev() {
        if let Some(parent) = parents[index] {
            descendants[parent] += 1 + descendants[index];
        }
    }

    for (index, entry) in toc.entries.iter().enumerate() {
        let parent_id = parents[index].map_or(root_id, |p| ids[p]);

        let mut item = dictionary! {
            "Title" => text_string(&entry.title),
            "Parent" => parent_id,
        };
        if let Some(page) = page_ids.get(content_index(front_pages, entry.page)) {
            item.set("Dest", fit(*page));
        }
        if let Some(previous) = prev[index] {
            item.set("Prev", ids[previous]);
        }
        if let Some(following) = next[index] {
            item.set("Next", ids[following]);
        }
        if let (Some(first), Some(last)) = (
            first_child.get(&Some(index)),
            last_child.get(&Some(index)),
        ) {
            item.set("First", ids[*first]);
            item.set("Last", ids[*last]);
            item.set("Count", descendants[index]);
        }
        doc.objects.insert(ids[index], Object::Dictionary(item));
    }

    let mut root = dictionary! {
        "Type" => "Outlines",
        "Count" => ids.len() as i64,
    };
    if let (Some(first), Some(last)) = (first_child.get(&None), last_child.get(&None)) {
        root.set("First", ids[*first]);
        root.set("Last", ids[*last]);
    }
    doc.objects.insert(root_id, Object::Dictionary(root));
    Some(root_id)
}
