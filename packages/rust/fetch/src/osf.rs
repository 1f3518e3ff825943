//! OSF API v2 client that builds a [`ProjectSnapshot`] from a live project.
//!
//! Each project or component becomes one node whose children are, in order:
//! its contributor list, its file listing, its log, one node per wiki page,
//! and then its child components.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use url::Url;

use dossier_shared::{
    Contributor, DossierError, FetchError, FileDescriptor, LogEntry, MarkupDialect,
    MetadataField, NodeId, NodeKind, OsfConfig, Payload, ProjectNode, ProjectSnapshot,
    SectionsConfig,
};

use crate::jsonapi::{
    ChildResource, ContributorResource, Document, FileResource, LogResource, NodeResource,
    WikiResource,
};

/// User-Agent string for API requests.
pub(crate) const USER_AGENT: &str = concat!("Dossier/", env!("CARGO_PKG_VERSION"));

/// Upper bound on followed `links.next` pages per listing.
const MAX_PAGES: usize = 500;

/// Connection settings for [`OsfClient`].
#[derive(Debug, Clone)]
pub struct OsfClientOptions {
    /// API root ending in `/`, e.g. `https://api.osf.io/v2/`.
    pub api_base: Url,
    /// Personal access token for private projects.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl OsfClientOptions {
    /// Options from the `[osf]` config section.
    pub fn from_config(
        config: &OsfConfig,
        test_env: bool,
        token: Option<String>,
    ) -> dossier_shared::Result<Self> {
        let base = if test_env {
            &config.test_api_base
        } else {
            &config.api_base
        };
        Ok(Self {
            api_base: parse_api_base(base)?,
            token,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

/// Parse an API root, forcing a trailing slash so relative joins nest under it.
pub fn parse_api_base(base: &str) -> dossier_shared::Result<Url> {
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    Url::parse(&normalized)
        .map_err(|e| DossierError::config(format!("invalid OSF API base '{base}': {e}")))
}

/// Client for the OSF JSON:API.
#[derive(Debug, Clone)]
pub struct OsfClient {
    client: Client,
    api_base: Url,
    token: Option<String>,
}

/// Nodes produced for one project or component.
struct FetchedNode {
    nodes: Vec<ProjectNode>,
    components: Vec<String>,
}

impl OsfClient {
    pub fn new(options: OsfClientOptions) -> dossier_shared::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.timeout)
            .build()
            .map_err(|e| DossierError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: options.api_base,
            token: options.token,
        })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Fetch a project and all of its components.
    ///
    /// Sections switched off in `sections` are not requested at all.
    #[instrument(skip_all, fields(project = %project_id, api = %self.api_base))]
    pub async fn fetch_project(
        &self,
        project_id: &str,
        sections: &SectionsConfig,
    ) -> Result<ProjectSnapshot, FetchError> {
        let mut nodes = Vec::new();
        let mut fetched: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, Option<String>)> =
            VecDeque::from([(project_id.to_string(), None)]);

        while let Some((id, parent)) = queue.pop_front() {
            // A component listed twice stays listed twice; tree assembly reports it.
            if !fetched.insert(id.clone()) {
                continue;
            }
            let node = self.fetch_node(&id, parent.as_deref(), sections).await?;
            queue.extend(
                node.components
                    .into_iter()
                    .map(|child| (child, Some(id.clone()))),
            );
            nodes.extend(node.nodes);
        }

        info!(nodes = nodes.len(), components = fetched.len(), "project fetched");
        Ok(ProjectSnapshot::new(project_id, nodes))
    }

    async fn fetch_node(
        &self,
        id: &str,
        parent: Option<&str>,
        sections: &SectionsConfig,
    ) -> Result<FetchedNode, FetchError> {
        let url = self.endpoint(&format!("nodes/{id}/?embed=affiliated_institutions"))?;
        let resource: NodeResource = self.get_json::<Document<NodeResource>>(url).await?.data;
        debug!(node = %resource.id, title = %resource.attributes.title, "node fetched");

        let mut sections_out: Vec<ProjectNode> = Vec::new();

        if sections.include_contributors {
            let contributors = self.fetch_contributors(id).await?;
            sections_out.push(
                ProjectNode::new(format!("{id}:contributors"), "Contributors", NodeKind::ContributorList)
                    .with_payload(Payload::Contributors { contributors }),
            );
        }

        if sections.include_files {
            let files = self.fetch_files(id).await?;
            sections_out.push(
                ProjectNode::new(format!("{id}:files"), "Files", NodeKind::FileListing)
                    .with_payload(Payload::Files { files }),
            );
        }

        if sections.include_logs {
            let entries = self.fetch_logs(id).await?;
            sections_out.push(
                ProjectNode::new(format!("{id}:logs"), "Activity Log", NodeKind::Log)
                    .with_payload(Payload::Log { entries }),
            );
        }

        sections_out.extend(self.fetch_wikis(id).await?);

        let children_url = self.endpoint(&format!("nodes/{id}/children/"))?;
        let components: Vec<String> = self
            .get_all::<ChildResource>(children_url)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut children: Vec<NodeId> = Vec::new();
        let mut nodes = Vec::with_capacity(sections_out.len() + 1);
        for (seq, section) in sections_out.into_iter().enumerate() {
            children.push(section.id.clone());
            nodes.push(section.with_parent(id).with_sequence(seq as u32));
        }
        children.extend(components.iter().map(|c| NodeId::new(c.as_str())));

        let kind = if parent.is_none() {
            NodeKind::Project
        } else {
            NodeKind::Component
        };
        let mut node = ProjectNode::new(id, resource.attributes.title.trim(), kind)
            .with_payload(Payload::Metadata {
                fields: metadata_fields(&resource),
            })
            .with_children(children);
        node.parent = parent.map(NodeId::from);
        node.url = resource.links.html.clone();
        node.created_at = resource.attributes.date_created.as_deref().and_then(parse_date);
        node.modified_at = resource.attributes.date_modified.as_deref().and_then(parse_date);
        nodes.insert(0, node);

        Ok(FetchedNode { nodes, components })
    }

    async fn fetch_contributors(&self, id: &str) -> Result<Vec<Contributor>, FetchError> {
        let url = self.endpoint(&format!("nodes/{id}/contributors/?embed=users"))?;
        let contributors = self
            .get_all::<ContributorResource>(url)
            .await?
            .into_iter()
            .map(|c| {
                let user = c.embeds.users.data.map(|u| u.attributes);
                Contributor {
                    name: user
                        .as_ref()
                        .map(|u| u.full_name.trim().to_string())
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| "Unknown contributor".to_string()),
                    bibliographic: c.attributes.bibliographic,
                    email: user.and_then(|u| u.email),
                }
            })
            .collect();
        Ok(contributors)
    }

    /// Walk `osfstorage` folders depth-first, keeping listing order.
    async fn fetch_files(&self, id: &str) -> Result<Vec<FileDescriptor>, FetchError> {
        let root = self.endpoint(&format!("nodes/{id}/files/osfstorage/"))?;
        let mut files = Vec::new();
        let mut stack: Vec<(Url, String)> = vec![(root, String::new())];

        while let Some((url, prefix)) = stack.pop() {
            let mut folders = Vec::new();
            for entry in self.get_all::<FileResource>(url).await? {
                let path = format!("{prefix}/{}", entry.attributes.name);
                match entry.attributes.kind.as_str() {
                    "folder" => match entry.folder_href().map(Url::parse) {
                        Some(Ok(href)) => folders.push((href, path)),
                        Some(Err(e)) => {
                            warn!(folder = %path, error = %e, "skipping folder with invalid listing URL");
                        }
                        None => debug!(folder = %path, "folder without listing link"),
                    },
                    _ => files.push(FileDescriptor {
                        path,
                        size_bytes: entry.attributes.size,
                        download_url: entry.links.download,
                        content_type: entry.attributes.content_type,
                    }),
                }
            }
            // Reverse so the first listed folder is walked first.
            stack.extend(folders.into_iter().rev());
        }

        debug!(node = %id, files = files.len(), "files listed");
        Ok(files)
    }

    async fn fetch_logs(&self, id: &str) -> Result<Vec<LogEntry>, FetchError> {
        let url = self.endpoint(&format!("nodes/{id}/logs/?embed=user"))?;
        let entries = self
            .get_all::<LogResource>(url)
            .await?
            .into_iter()
            .map(|log| LogEntry {
                date: log.attributes.date.as_deref().and_then(parse_date),
                action: log.attributes.action.replace('_', " "),
                actor: log.embeds.user.data.map(|u| u.attributes.full_name),
            })
            .collect();
        Ok(entries)
    }

    /// One node per wiki page. Content that cannot be read leaves the page empty.
    async fn fetch_wikis(&self, id: &str) -> Result<Vec<ProjectNode>, FetchError> {
        let url = self.endpoint(&format!("nodes/{id}/wikis/"))?;
        let pages = self.get_all::<WikiResource>(url).await?;

        let mut nodes = Vec::with_capacity(pages.len());
        for page in pages {
            let content_url = self.endpoint(&format!("wikis/{}/content/", page.id))?;
            let payload = match self.get_text(content_url).await {
                Ok(text) => Payload::Markup {
                    dialect: MarkupDialect::Markdown,
                    text,
                },
                Err(err) => {
                    warn!(wiki = %page.id, error = %err, "wiki content unavailable");
                    Payload::Empty
                }
            };
            let mut node = ProjectNode::new(page.id.as_str(), page.attributes.name.trim(), NodeKind::WikiPage)
                .with_payload(payload);
            node.url = page.links.html;
            nodes.push(node);
        }
        Ok(nodes)
    }

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.api_base
            .join(path)
            .map_err(|e| FetchError::Invalid(format!("bad endpoint '{path}': {e}")))
    }

    async fn get(&self, url: Url) -> Result<Response, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("{url}: {e}")))?;
        check_status(&url, response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let response = self.get(url.clone()).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("{url}: failed to read body: {e}")))?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Invalid(format!("{url}: {e}")))
    }

    async fn get_text(&self, url: Url) -> Result<String, FetchError> {
        let response = self.get(url.clone()).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::Network(format!("{url}: failed to read body: {e}")))
    }

    /// Collect every item of a paginated listing.
    async fn get_all<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>, FetchError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(FetchError::Invalid(format!(
                    "{url}: more than {MAX_PAGES} pages"
                )));
            }
            let page: Document<Vec<T>> = self.get_json(url).await?;
            items.extend(page.data);
            next = match page.links.next {
                Some(href) => Some(
                    Url::parse(&href)
                        .map_err(|e| FetchError::Invalid(format!("bad next link '{href}': {e}")))?,
                ),
                None => None,
            };
        }

        Ok(items)
    }
}

/// Map an HTTP status to the fetch error taxonomy.
pub(crate) fn check_status(url: &Url, response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Unauthorized(format!("{url}: HTTP {status}"))
        }
        StatusCode::NOT_FOUND => FetchError::NotFound(url.to_string()),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after_secs: response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
        },
        _ => FetchError::Network(format!("{url}: HTTP {status}")),
    })
}

fn metadata_fields(resource: &NodeResource) -> Vec<MetadataField> {
    let attrs = &resource.attributes;
    let yes_no = |b: bool| if b { "Yes" } else { "No" };

    let mut fields = vec![MetadataField::new("Title", attrs.title.trim())];
    if let Some(description) = attrs.description.as_deref().map(str::trim) {
        if !description.is_empty() {
            fields.push(MetadataField::new("Description", description));
        }
    }
    if let Some(created) = &attrs.date_created {
        fields.push(MetadataField::new("Date Created", date_only(created)));
    }
    if let Some(modified) = &attrs.date_modified {
        fields.push(MetadataField::new("Last Modified", date_only(modified)));
    }
    if let Some(category) = &attrs.category {
        fields.push(MetadataField::new("Category", category.as_str()));
    }
    fields.push(MetadataField::new("Public", yes_no(attrs.public)));
    fields.push(MetadataField::new("Registration", yes_no(attrs.registration)));
    if !attrs.tags.is_empty() {
        fields.push(MetadataField::new("Tags", attrs.tags.join(", ")));
    }
    if let Some(doi) = &attrs.doi {
        fields.push(MetadataField::new("DOI", doi.as_str()));
    }

    let institutions: Vec<&str> = resource
        .embeds
        .affiliated_institutions
        .data
        .iter()
        .flatten()
        .map(|i| i.attributes.name.as_str())
        .collect();
    let institutions = if institutions.is_empty() {
        "None listed".to_string()
    } else {
        institutions.join(", ")
    };
    fields.push(MetadataField::new("Affiliated Institutions", institutions));

    fields
}

fn date_only(raw: &str) -> &str {
    raw.get(..10).unwrap_or(raw)
}

/// OSF timestamps come with or without an offset.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|d| d.and_utc())
        })
}
