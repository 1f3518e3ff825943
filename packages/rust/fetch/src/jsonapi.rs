//! Wire types for the subset of the OSF JSON:API responses we read.
//!
//! Every field the exporter can live without is optional, so partial or
//! permission-trimmed resources still deserialize.

use serde::Deserialize;

/// Top-level response document.
#[derive(Debug, Deserialize)]
pub(crate) struct Document<T> {
    pub data: T,
    #[serde(default)]
    pub links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

/// An embedded relationship: either `data` or an `errors` list we ignore.
#[derive(Debug, Deserialize)]
pub(crate) struct Embedded<T> {
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> Default for Embedded<T> {
    fn default() -> Self {
        Self { data: None }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResourceLinks {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub download: Option<String>,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct NodeResource {
    pub id: String,
    pub attributes: NodeAttributes,
    #[serde(default)]
    pub links: ResourceLinks,
    #[serde(default)]
    pub embeds: NodeEmbeds,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NodeAttributes {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub date_modified: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub registration: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub doi: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NodeEmbeds {
    #[serde(default)]
    pub affiliated_institutions: Embedded<Vec<InstitutionResource>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InstitutionResource {
    pub attributes: NameAttributes,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NameAttributes {
    pub name: String,
}

/// Only the id of a child component is needed; it is fetched on its own.
#[derive(Debug, Deserialize)]
pub(crate) struct ChildResource {
    pub id: String,
}

// ---------------------------------------------------------------------------
// Contributors
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ContributorResource {
    #[serde(default)]
    pub attributes: ContributorAttributes,
    #[serde(default)]
    pub embeds: ContributorEmbeds,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ContributorAttributes {
    #[serde(default)]
    pub bibliographic: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ContributorEmbeds {
    #[serde(default)]
    pub users: Embedded<UserResource>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UserResource {
    pub attributes: UserAttributes,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UserAttributes {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct FileResource {
    pub attributes: FileAttributes,
    #[serde(default)]
    pub links: ResourceLinks,
    #[serde(default)]
    pub relationships: FileRelationships,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileAttributes {
    /// `file` or `folder`.
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FileRelationships {
    #[serde(default)]
    pub files: Option<Relationship>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Relationship {
    pub links: RelationshipLinks,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RelationshipLinks {
    pub related: RelatedLink,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RelatedLink {
    pub href: String,
}

impl FileResource {
    /// Listing URL of a folder's contents.
    pub fn folder_href(&self) -> Option<&str> {
        self.relationships
            .files
            .as_ref()
            .map(|r| r.links.related.href.as_str())
    }
}

// ---------------------------------------------------------------------------
// Wikis & logs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct WikiResource {
    pub id: String,
    pub attributes: NameAttributes,
    #[serde(default)]
    pub links: ResourceLinks,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogResource {
    pub attributes: LogAttributes,
    #[serde(default)]
    pub embeds: LogEmbeds,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogAttributes {
    pub action: String,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LogEmbeds {
    #[serde(default)]
    pub user: Embedded<UserResource>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_errors_deserialize_as_missing() {
        let raw = r#"{
            "attributes": { "bibliographic": true },
            "embeds": { "users": { "errors": [ { "detail": "not found" } ] } }
        }"#;
        let contributor: ContributorResource = serde_json::from_str(raw).expect("parse");
        assert!(contributor.attributes.bibliographic);
        assert!(contributor.embeds.users.data.is_none());
    }

    #[test]
    fn contributor_without_embeds_defaults() {
        let contributor: ContributorResource = serde_json::from_str("{}").expect("parse");
        assert!(!contributor.attributes.bibliographic);
        assert!(contributor.embeds.users.data.is_none());

        let user = UserResource::default();
        assert!(user.attributes.full_name.is_empty());
        assert!(user.attributes.email.is_none());
    }

    #[test]
    fn folder_exposes_listing_href() {
        let raw = r#"{
            "attributes": { "kind": "folder", "name": "raw" },
            "relationships": { "files": { "links": { "related": {
                "href": "https://api.osf.io/v2/nodes/kzc68/files/osfstorage/abc/"
            } } } }
        }"#;
        let folder: FileResource = serde_json::from_str(raw).expect("parse");
        assert_eq!(
            folder.folder_href(),
            Some("https://api.osf.io/v2/nodes/kzc68/files/osfstorage/abc/")
        );
    }
}
