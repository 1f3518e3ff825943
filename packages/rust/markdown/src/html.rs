//! HTML wiki content to Markdown.
//!
//! The main content is extracted with `scraper`, tables are rewritten as
//! Markdown tables up front, and the rest is converted with `htmd`.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static TR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static TH_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th").expect("valid selector"));
static TD_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("valid selector"));

/// Convert an HTML document or fragment to Markdown.
pub(crate) fn html_to_markdown(html: &str) -> Result<String, String> {
    let content_html = extract_content_html(html);
    let (content_html, tables) = extract_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    let mut markdown = converter
        .convert(&content_html)
        .map_err(|e| format!("HTML conversion failed: {e}"))?;

    for (index, table) in tables.iter().enumerate() {
        markdown = markdown.replacen(&placeholder(index), table, 1);
    }

    debug!(
        html_len = html.len(),
        md_len = markdown.len(),
        tables = tables.len(),
        "htmd conversion complete"
    );
    Ok(markdown)
}

/// Extract the main content HTML, stripping page chrome.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    let selectors = [
        "#wikiViewRender",
        ".wiki-content",
        "[role=\"main\"]",
        "article",
        "main",
        "body",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    html.to_string()
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Swap `<table>` elements for placeholders and return their Markdown form.
///
/// htmd does not convert tables, so they are rendered here and spliced back
/// in after conversion.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let doc = Html::parse_fragment(html);

    if doc.select(&TABLE_SEL).next().is_none() {
        return (html.to_string(), Vec::new());
    }

    // Re-serialize so element HTML matches byte for byte.
    let mut result = doc.root_element().inner_html();
    let mut tables = Vec::new();
    for table_el in doc.select(&TABLE_SEL) {
        let outer = table_el.html();
        if !result.contains(&outer) {
            continue;
        }
        let slot = format!("<p>{}</p>", placeholder(tables.len()));
        result = result.replacen(&outer, &slot, 1);
        tables.push(html_table_to_markdown(&table_el));
    }

    (result, tables)
}

fn placeholder(index: usize) -> String {
    format!("DOSSIERTABLE{index}X")
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

/// Convert a single HTML table element to a Markdown table string.
fn html_table_to_markdown(table: &ElementRef<'_>) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();

    for tr in table.select(&TR_SEL) {
        let ths: Vec<String> = tr.select(&TH_SEL).map(cell_text).collect();
        if !ths.is_empty() {
            rows.push(ths);
            continue;
        }

        let tds: Vec<String> = tr.select(&TD_SEL).map(cell_text).collect();
        if !tds.is_empty() {
            rows.push(tds);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    // Without a <th> row the first row doubles as the header.
    let (header, body) = match rows.split_first() {
        Some((first, rest)) => (first, rest),
        None => return String::new(),
    };

    let mut md = String::new();
    md.push_str(&format!("| {} |\n", header.join(" | ")));
    md.push_str(&format!("| {} |\n", vec!["---"; col_count].join(" | ")));
    for row in body {
        md.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_simple_fragment() {
        let md = html_to_markdown("<h1>Aims</h1><p>Some <strong>bold</strong> text.</p>")
            .expect("convert");
        assert!(md.contains("# Aims"));
        assert!(md.contains("**bold**"));
    }

    #[test]
    fn strips_page_chrome() {
        let html = r#"<html><body>
            <nav><a href="/">Home</a></nav>
            <main><h2>Content</h2><p>Important text.</p></main>
            <footer><p>Copyright 2024</p></footer>
        </body></html>"#;
        let md = html_to_markdown(html).expect("convert");
        assert!(md.contains("Important text."));
        assert!(!md.contains("Copyright 2024"));
    }

    #[test]
    fn tables_survive_conversion() {
        let html = "<p>Before</p><table><tr><th>Name</th><th>Value</th></tr><tr><td>foo</td><td>bar</td></tr></table><p>After</p>";
        let md = html_to_markdown(html).expect("convert");
        assert!(md.contains("| Name | Value |\n| --- | --- |\n| foo | bar |"));
        assert!(md.contains("Before"));
        assert!(md.contains("After"));
        assert!(!md.contains("DOSSIERTABLE"));
    }

    #[test]
    fn table_without_header_uses_first_row() {
        let html = "<table><tr><td>a</td><td>b|c</td></tr><tr><td>1</td></tr></table>";
        let (stripped, tables) = extract_tables(html);
        assert!(stripped.contains("DOSSIERTABLE0X"));
        assert_eq!(tables.len(), 1);
        assert!(tables[0].starts_with("| a | b\\|c |\n"));
        assert!(tables[0].contains("| 1 |  |"));
    }
}
