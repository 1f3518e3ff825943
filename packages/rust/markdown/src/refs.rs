//! Cross-reference detection in links and running text.

use std::sync::LazyLock;

use regex::Regex;

use dossier_shared::{NodeId, RefKey, RefTarget, SpanKind};

/// Link scheme that addresses a node of the same project directly.
const NODE_SCHEME: &str = "node:";

/// OSF GUID URLs: `https://osf.io/<guid>/` with an optional trailing slash.
static GUID_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:www\.|test\.)?osf\.io/([a-z0-9]{5})/?(?:[?#].*)?$")
        .expect("valid regex")
});

/// `see component "Data Collection"`, `see page Methods`, `see node abc12`.
static SEE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\bsee\s+(?:the\s+)?(component|project|page|wiki|section|node)\s+(?:"([^"\n]+)"|“([^”\n]+)”|([\w\-]+))"#,
    )
    .expect("valid regex")
});

/// Classify a link destination as a cross-reference or an external link.
pub(crate) fn classify_link(url: &str) -> SpanKind {
    if let Some(id) = url.strip_prefix(NODE_SCHEME) {
        let id = id.trim_matches('/');
        if !id.is_empty() {
            return SpanKind::Reference(RefTarget::Pending {
                key: RefKey::Id(NodeId::from(id)),
                fallback_url: None,
            });
        }
    }

    if let Some(caps) = GUID_URL_RE.captures(url) {
        return SpanKind::Reference(RefTarget::Pending {
            key: RefKey::Id(NodeId::from(caps[1].to_ascii_lowercase())),
            fallback_url: Some(url.to_string()),
        });
    }

    SpanKind::Link {
        url: url.to_string(),
    }
}

/// A slice of running text, with the reference it names if any.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TextPiece {
    pub text: String,
    pub target: Option<RefTarget>,
}

/// Split running text around `see <kind> <name>` phrases.
pub(crate) fn split_text_references(text: &str) -> Vec<TextPiece> {
    let mut pieces = Vec::new();
    let mut last = 0;

    for caps in SEE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(name) = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4)) else {
            continue;
        };

        if whole.start() > last {
            pieces.push(TextPiece {
                text: text[last..whole.start()].to_string(),
                target: None,
            });
        }

        let name = name.as_str().trim();
        let key = if caps[1].eq_ignore_ascii_case("node") {
            RefKey::Id(NodeId::from(name))
        } else {
            RefKey::Title(name.to_string())
        };
        pieces.push(TextPiece {
            text: whole.as_str().to_string(),
            target: Some(RefTarget::Pending {
                key,
                fallback_url: None,
            }),
        });
        last = whole.end();
    }

    if last < text.len() {
        pieces.push(TextPiece {
            text: text[last..].to_string(),
            target: None,
        });
    }

    pieces
}
