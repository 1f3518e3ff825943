//! Core domain types: project nodes, snapshots, and export warnings.

use std::borrow::Borrow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for the JSON snapshot format.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Opaque node identifier, unique within one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// NodeKind & Payload
// ---------------------------------------------------------------------------

/// What a node represents in the project hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The top-level project.
    Project,
    /// A sub-component of a project or of another component.
    Component,
    WikiPage,
    FileListing,
    ContributorList,
    Log,
    /// Any kind the exporter does not know how to present, under the name
    /// the source gave it.
    #[serde(untagged)]
    Unsupported(String),
}

impl NodeKind {
    /// Human-readable label used in captions and placeholders.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Component => "component",
            Self::WikiPage => "wiki page",
            Self::FileListing => "file listing",
            Self::ContributorList => "contributor list",
            Self::Log => "log",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Markup dialect of free-text content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupDialect {
    #[default]
    Markdown,
    Html,
}

/// A single key/value pair of structured metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub key: String,
    pub value: String,
}

impl MetadataField {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A file stored in the project, referenced by handle rather than by bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Root-style path inside the storage provider (e.g. `/data/run1.csv`).
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// A project contributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    #[serde(default)]
    pub bibliographic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One entry of a project activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Raw content carried by a node, as delivered by the fetch collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Metadata {
        fields: Vec<MetadataField>,
    },
    Markup {
        #[serde(default)]
        dialect: MarkupDialect,
        text: String,
    },
    Files {
        files: Vec<FileDescriptor>,
    },
    Contributors {
        contributors: Vec<Contributor>,
    },
    Log {
        entries: Vec<LogEntry>,
    },
    #[default]
    Empty,
}

impl Payload {
    /// Markdown text payload.
    pub fn markdown(text: impl Into<String>) -> Self {
        Self::Markup {
            dialect: MarkupDialect::Markdown,
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectNode
// ---------------------------------------------------------------------------

/// One item of the project hierarchy.
///
/// Children are referenced by id and the parent link is a weak, lookup-only
/// reference; nodes are never mutated after the fetch step creates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: NodeId,
    pub title: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeId>,
    /// Position among siblings, when the source provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    /// Browsable location of the node at the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl ProjectNode {
    /// Create a node with no links and an empty payload.
    pub fn new(id: impl Into<NodeId>, title: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            parent: None,
            children: Vec::new(),
            sequence: None,
            url: None,
            payload: Payload::Empty,
            created_at: None,
            modified_at: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<NodeId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

// ---------------------------------------------------------------------------
// ProjectSnapshot
// ---------------------------------------------------------------------------

/// The complete input of one export run: a root id plus an arena of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotFile", into = "SnapshotFile")]
pub struct ProjectSnapshot {
    pub root: NodeId,
    pub nodes: BTreeMap<NodeId, ProjectNode>,
}

impl ProjectSnapshot {
    /// Build a snapshot from a root id and a set of nodes (later duplicates win).
    pub fn new(root: impl Into<NodeId>, nodes: impl IntoIterator<Item = ProjectNode>) -> Self {
        Self {
            root: root.into(),
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    pub fn get<Q>(&self, id: &Q) -> Option<&ProjectNode>
    where
        NodeId: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.nodes.get(id)
    }

    pub fn root_node(&self) -> Option<&ProjectNode> {
        self.nodes.get(&self.root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// On-disk shape of a snapshot: nodes as a list so ids are not repeated as keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    root: NodeId,
    nodes: Vec<ProjectNode>,
}

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

impl TryFrom<SnapshotFile> for ProjectSnapshot {
    type Error = String;

    fn try_from(file: SnapshotFile) -> std::result::Result<Self, Self::Error> {
        if file.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema_version: {} (expected {SNAPSHOT_SCHEMA_VERSION})",
                file.schema_version
            ));
        }

        let mut nodes = BTreeMap::new();
        for node in file.nodes {
            let id = node.id.clone();
            if nodes.insert(id.clone(), node).is_some() {
                return Err(format!("duplicate node id '{id}'"));
            }
        }

        Ok(Self {
            root: file.root,
            nodes,
        })
    }
}

impl From<ProjectSnapshot> for SnapshotFile {
    fn from(snapshot: ProjectSnapshot) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            root: snapshot.root,
            nodes: snapshot.nodes.into_values().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Warning
// ---------------------------------------------------------------------------

/// Kind of non-fatal content loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCategory {
    UnsupportedKind,
    MalformedMarkup,
    UnresolvedReference,
    AssetUnavailable,
    OrphanNode,
}

impl WarningCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedKind => "unsupported_kind",
            Self::MalformedMarkup => "malformed_markup",
            Self::UnresolvedReference => "unresolved_reference",
            Self::AssetUnavailable => "asset_unavailable",
            Self::OrphanNode => "orphan_node",
        }
    }
}

/// A degradation recorded during an export; never interrupts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub category: WarningCategory,
    pub message: String,
}

impl Warning {
    pub fn new(node_id: &NodeId, category: WarningCategory, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.clone()),
            category,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "[{}] {id}: {}", self.category.as_str(), self.message),
            None => write!(f, "[{}] {}", self.category.as_str(), self.message),
        }
    }
}
