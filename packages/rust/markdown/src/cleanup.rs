//! Pre-parse cleanup pipeline for wiki Markdown.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Passes that rewrite text leave fenced code blocks untouched.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = normalize_line_endings(md);

    result = clean_blank_lines(&result);
    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = normalize_whitespace(&result);
    result = ensure_trailing_newline(&result);

    result
}

/// Apply `f` to every line outside fenced code blocks.
fn map_prose_lines(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_code_block = !in_code_block;
            out.push(line.to_string());
        } else if in_code_block {
            out.push(line.to_string());
        } else {
            out.push(f(line));
        }
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 1: Line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(md: &str) -> String {
    md.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into exactly 2.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Fix code block language hints
// ---------------------------------------------------------------------------

/// Strip class-like prefixes (`language-js`, `lang-python`) from fence info strings.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Strip leftover wrapper tags
// ---------------------------------------------------------------------------

/// Remove layout-only HTML tags, keeping their inner text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|font|center)(?:\s[^>]*)?/?>",
        )
        .expect("valid regex")
    });

    map_prose_lines(md, |line| HTML_TAG_RE.replace_all(line, "").to_string())
}

// ---------------------------------------------------------------------------
// Pass 5: Resolve relative links
// ---------------------------------------------------------------------------

/// Resolve relative link and image targets against the node URL.
///
/// Absolute targets (any scheme, including `node:`), anchors and
/// protocol-relative targets are left as they are.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\]\(([^)\s]+)([^)]*)\)").expect("valid regex"));

    map_prose_lines(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &regex::Captures| {
                let href = &caps[1];
                let rest = &caps[2];

                if href.starts_with('#') || href.starts_with("//") || Url::parse(href).is_ok() {
                    return caps[0].to_string();
                }

                match base.join(href) {
                    Ok(resolved) => format!("]({resolved}{rest})"),
                    Err(_) => caps[0].to_string(),
                }
            })
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Pass 6: Normalize whitespace
// ---------------------------------------------------------------------------

/// Clean up trailing whitespace on prose lines.
///
/// Two trailing spaces (a Markdown hard break) are kept.
fn normalize_whitespace(md: &str) -> String {
    map_prose_lines(md, |line| {
        let trimmed = line.trim_end();
        if line.ends_with("  ") && !trimmed.is_empty() {
            format!("{trimmed}  ")
        } else {
            trimmed.to_string()
        }
    })
}

// ---------------------------------------------------------------------------
// Pass 7: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_blank_lines_collapses_excess() {
        let input = "Line 1\n\n\n\n\nLine 2";
        assert_eq!(clean_blank_lines(input), "Line 1\n\n\nLine 2");
    }

    #[test]
    fn clean_blank_lines_keeps_double() {
        let input = "Line 1\n\nLine 2";
        assert_eq!(clean_blank_lines(input), input);
    }

    #[test]
    fn line_endings_normalized() {
        assert_eq!(normalize_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn fix_code_block_languages_strips_prefix() {
        let input = "```language-rust\nfn main() {}\n```";
        assert_eq!(fix_code_block_languages(input), "```rust\nfn main() {}\n```");
    }

    #[test]
    fn strip_leftover_html_keeps_text_and_code() {
        let input = "<div class=\"x\">Hello <span>world</span></div>\n```\n<div>kept</div>\n```";
        let result = strip_leftover_html(input);
        assert_eq!(result, "Hello world\n```\n<div>kept</div>\n```");
    }

    #[test]
    fn resolve_links_relative() {
        let base = Url::parse("https://osf.io/kzc68/wiki/").expect("url");
        let input = "See [methods](methods/) and ![plot](img/plot.png \"Plot\").";
        let result = resolve_links(input, Some(&base));
        assert!(result.contains("[methods](https://osf.io/kzc68/wiki/methods/)"));
        assert!(result.contains("(https://osf.io/kzc68/wiki/img/plot.png \"Plot\")"));
    }

    #[test]
    fn resolve_links_leaves_absolute_and_node_targets() {
        let base = Url::parse("https://osf.io/kzc68/").expect("url");
        let input = "[a](https://example.com) [b](node:abc12) [c](#top) [d](mailto:x@y.z)";
        assert_eq!(resolve_links(input, Some(&base)), input);
    }

    #[test]
    fn resolve_links_without_base_is_noop() {
        let input = "[a](relative/path)";
        assert_eq!(resolve_links(input, None), input);
    }

    #[test]
    fn normalize_whitespace_keeps_hard_breaks() {
        let input = "line one  \nline two   \t\n   ";
        assert_eq!(normalize_whitespace(input), "line one  \nline two\n");
    }

    #[test]
    fn full_pipeline() {
        let input = "# Title\r\n\r\n\r\n\r\n\r\nText   \r\n";
        let result = run_pipeline(input, None);
        assert_eq!(result, "# Title\n\n\nText  \n");
    }
}
