//! Format-agnostic content units produced by normalization.

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, NodeKind, Warning};

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

/// Inline text style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    #[default]
    Regular,
    Bold,
    Italic,
    Code,
}

/// How a pending cross-reference names its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKey {
    Id(NodeId),
    Title(String),
}

/// Target of a cross-reference, refined by each pipeline stage.
///
/// The normalizer emits `Pending`, the assembler turns it into `Node`, and the
/// layout engine into `Page` once page numbers exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefTarget {
    Pending {
        key: RefKey,
        /// Where to link if the target is not part of the export.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback_url: Option<String>,
    },
    Node(NodeId),
    Page {
        node: NodeId,
        page: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Plain,
    Link { url: String },
    Reference(RefTarget),
}

/// A run of inline text sharing one style and one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    pub style: TextStyle,
    pub kind: SpanKind,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::styled(text, TextStyle::Regular)
    }

    pub fn styled(text: impl Into<String>, style: TextStyle) -> Self {
        Self {
            text: text.into(),
            style,
            kind: SpanKind::Plain,
        }
    }

    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: TextStyle::Regular,
            kind: SpanKind::Link { url: url.into() },
        }
    }

    pub fn reference(text: impl Into<String>, target: RefTarget) -> Self {
        Self {
            text: text.into(),
            style: TextStyle::Regular,
            kind: SpanKind::Reference(target),
        }
    }

    /// Same style and kind, different text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: self.style,
            kind: self.kind.clone(),
        }
    }

    /// Whether two spans can be merged into one run.
    pub fn same_run(&self, other: &Span) -> bool {
        self.style == other.style && self.kind == other.kind
    }
}

/// Concatenate span texts.
pub fn spans_text(spans: &[Span]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Content units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParagraphStyle {
    Body,
    Bullet { level: u8 },
    Numbered { level: u8, number: u64 },
    Quote,
    Code,
}

impl ParagraphStyle {
    /// Left indent in body-font characters, marker included.
    pub fn indent(&self) -> usize {
        match self {
            Self::Bullet { level } | Self::Numbered { level, .. } => 3 * usize::from(*level),
            Self::Quote => 4,
            Self::Body | Self::Code => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    /// Number of columns (widest of header and rows).
    pub fn columns(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0)
    }
}

/// How the renderer obtains an asset's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetHandle {
    /// Bytes already in hand.
    Inline(Vec<u8>),
    /// Token passed to the asset fetcher (for remote files, the download URL).
    Token(String),
    /// Explicitly unavailable; rendered as a placeholder.
    Unavailable { reason: String },
}

/// Reference to a binary asset, fetched lazily by the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub name: String,
    /// Human-readable caption (name and size).
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub handle: AssetHandle,
}

/// One typed unit of normalized content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum ContentUnit {
    Heading { level: u8, text: String },
    Paragraph { style: ParagraphStyle, spans: Vec<Span> },
    Table(Table),
    Asset(AssetRef),
    Hyperlink { label: String, url: String },
    /// Clearly labelled placeholder standing in for missing content.
    Notice { text: String },
}

impl ContentUnit {
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self::Heading {
            level,
            text: text.into(),
        }
    }

    pub fn paragraph(spans: Vec<Span>) -> Self {
        Self::Paragraph {
            style: ParagraphStyle::Body,
            spans,
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice { text: text.into() }
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, Self::Heading { .. })
    }
}

/// The normalizer's output for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedBlock {
    pub node_id: NodeId,
    pub title: String,
    pub kind: NodeKind,
    pub units: Vec<ContentUnit>,
    /// Degradations raised while normalizing this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Warning>,
    pub word_count: usize,
}
