//! Wiki markup to content units.
//!
//! Markdown (CommonMark with GFM tables) is parsed with `pulldown-cmark`.
//! HTML is reduced to its main content with `scraper` and converted to
//! Markdown with `htmd` first. Both paths run the cleanup passes before
//! parsing, and both degrade to plain paragraphs when the input is
//! malformed.

mod cleanup;
mod html;
mod parse;
mod refs;

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};
use url::Url;

use dossier_shared::{ContentUnit, MarkupDialect, ParagraphStyle, Span, spans_text};

pub use parse::MAX_NESTING;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of parsing one markup payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupResult {
    pub units: Vec<ContentUnit>,
    /// Words of prose, excluding code blocks.
    pub word_count: usize,
    /// Why the input was degraded to plain paragraphs, if it was.
    pub malformed: Option<String>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a markup payload into content units.
///
/// `base_url` is the node's own location, used to resolve relative links.
/// Never fails: malformed input comes back as plain paragraphs split on
/// blank lines, with the reason in [`MarkupResult::malformed`].
#[instrument(skip_all, fields(dialect = ?dialect, len = text.len()))]
pub fn parse_markup(text: &str, dialect: MarkupDialect, base_url: Option<&str>) -> MarkupResult {
    let base = base_url.and_then(|u| Url::parse(u).ok());

    let markdown = match dialect {
        MarkupDialect::Markdown => Ok(text.to_string()),
        MarkupDialect::Html => html::html_to_markdown(text),
    };

    let parsed = markdown.and_then(|md| {
        let cleaned = cleanup::run_pipeline(&md, base.as_ref());
        if let Some(reason) = detect_malformed(&cleaned) {
            return Err(reason);
        }
        parse::markdown_to_units(&cleaned)
    });

    match parsed {
        Ok(units) => {
            let word_count = count_words(&units);
            debug!(units = units.len(), word_count, "markup parsed");
            MarkupResult {
                units,
                word_count,
                malformed: None,
            }
        }
        Err(reason) => {
            warn!(%reason, "markup degraded to plain paragraphs");
            let plain = match dialect {
                MarkupDialect::Markdown => text.to_string(),
                MarkupDialect::Html => strip_tags(text),
            };
            let units = plain_paragraphs(&plain);
            MarkupResult {
                word_count: count_words(&units),
                units,
                malformed: Some(reason),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Malformed input
// ---------------------------------------------------------------------------

/// Find the first reason the text cannot be parsed faithfully.
fn detect_malformed(md: &str) -> Option<String> {
    if let Some(c) = md
        .chars()
        .find(|c| c.is_control() && !matches!(*c, '\n' | '\t'))
    {
        return Some(format!("control character U+{:04X}", c as u32));
    }

    if let Some(line) = unterminated_fence(md) {
        return Some(format!("unterminated code fence opened on line {line}"));
    }

    None
}

/// Line number of a code fence that is never closed.
fn unterminated_fence(md: &str) -> Option<usize> {
    let mut open: Option<(char, usize, usize)> = None;

    for (index, line) in md.lines().enumerate() {
        let indent = line.len() - line.trim_start_matches(' ').len();
        if indent > 3 {
            continue;
        }
        let trimmed = line.trim_start_matches(' ');
        let Some(marker) = trimmed.chars().next().filter(|c| *c == '`' || *c == '~') else {
            continue;
        };
        let run = trimmed.chars().take_while(|c| *c == marker).count();
        if run < 3 {
            continue;
        }

        match open {
            None => open = Some((marker, run, index + 1)),
            Some((open_marker, open_run, _))
                if marker == open_marker
                    && run >= open_run
                    && trimmed[run * marker.len_utf8()..].trim().is_empty() =>
            {
                open = None;
            }
            Some(_) => {}
        }
    }

    open.map(|(_, _, line)| line)
}

/// Plain paragraphs split on blank lines, control characters dropped.
fn plain_paragraphs(text: &str) -> Vec<ContentUnit> {
    static BLANK_LINE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid regex"));

    let cleaned: String = text
        .replace("\r\n", "\n")
        .chars()
        .map(|c| if c.is_control() && c != '\n' { ' ' } else { c })
        .collect();

    BLANK_LINE_RE
        .split(&cleaned)
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .map(|p| ContentUnit::paragraph(vec![Span::plain(p)]))
        .collect()
}

/// Crude tag stripping for degraded HTML, keeping block boundaries.
fn strip_tags(html: &str) -> String {
    static BLOCK_END_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<br\s*/?>|</(?:p|div|h[1-6]|li|tr|table|pre|blockquote)>")
            .expect("valid regex")
    });
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

    let with_breaks = BLOCK_END_RE.replace_all(html, "\n\n");
    TAG_RE
        .replace_all(&with_breaks, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Count prose words across headings, paragraphs and table cells.
pub fn count_words(units: &[ContentUnit]) -> usize {
    units
        .iter()
        .map(|unit| match unit {
            ContentUnit::Heading { text, .. } | ContentUnit::Notice { text } => {
                text.split_whitespace().count()
            }
            ContentUnit::Paragraph { style, spans } if *style != ParagraphStyle::Code => {
                spans_text(spans).split_whitespace().count()
            }
            ContentUnit::Table(table) => table
                .header
                .iter()
                .chain(table.rows.iter().flatten())
                .map(|cell| cell.split_whitespace().count())
                .sum(),
            _ => 0,
        })
        .sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
