//! Content normalizer: one raw node in, one `NormalizedBlock` out.
//!
//! `normalize` is pure. `normalize_all` fans the work out over a bounded
//! task pool and joins the results by node id.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use dossier_markdown::{count_words, parse_markup};
use dossier_shared::{
    AssetHandle, AssetRef, Contributor, ContentUnit, ExportFailure, FileDescriptor, LogEntry,
    MetadataField, NodeId, NodeKind, NormalizedBlock, Payload, ProjectNode, ProjectSnapshot,
    Table, Warning, WarningCategory,
};

/// Normalize a single node.
pub fn normalize(node: &ProjectNode) -> NormalizedBlock {
    let title = if node.title.trim().is_empty() {
        format!("Untitled {}", node.kind.label())
    } else {
        node.title.trim().to_string()
    };

    let mut units = vec![ContentUnit::heading(1, title.clone())];
    let mut degradations = Vec::new();

    if let Some(url) = &node.url {
        units.push(ContentUnit::Hyperlink {
            label: url_label(&node.kind).to_string(),
            url: url.clone(),
        });
    }

    if let NodeKind::Unsupported(name) = &node.kind {
        units.push(ContentUnit::notice(format!(
            "Unsupported content kind '{name}' omitted"
        )));
        degradations.push(Warning::new(
            &node.id,
            WarningCategory::UnsupportedKind,
            format!("content of '{title}' has unsupported kind '{name}' and was omitted"),
        ));
        return finish(node, title, units, degradations);
    }

    match &node.payload {
        Payload::Metadata { fields } => units.extend(metadata_table(fields)),
        Payload::Markup { dialect, text } => {
            if text.trim().is_empty() {
                units.push(ContentUnit::notice("No content."));
            } else {
                let parsed = parse_markup(text, *dialect, node.url.as_deref());
                if let Some(reason) = parsed.malformed {
                    degradations.push(Warning::new(
                        &node.id,
                        WarningCategory::MalformedMarkup,
                        format!("{reason}; rendered as plain text"),
                    ));
                }
                units.extend(parsed.units);
            }
        }
        Payload::Files { files } => units.extend(file_units(files)),
        Payload::Contributors { contributors } => units.push(contributor_table(contributors)),
        Payload::Log { entries } => units.push(log_table(entries)),
        Payload::Empty => {
            if node.kind == NodeKind::WikiPage {
                units.push(ContentUnit::notice("No content."));
            }
        }
    }

    finish(node, title, units, degradations)
}

fn finish(
    node: &ProjectNode,
    title: String,
    units: Vec<ContentUnit>,
    degradations: Vec<Warning>,
) -> NormalizedBlock {
    let word_count = count_words(&units);
    NormalizedBlock {
        node_id: node.id.clone(),
        title,
        kind: node.kind.clone(),
        units,
        degradations,
        word_count,
    }
}

fn url_label(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Project => "Project URL",
        NodeKind::Component => "Component URL",
        NodeKind::WikiPage => "Page URL",
        _ => "Source URL",
    }
}

// ---------------------------------------------------------------------------
// Payload converters
// ---------------------------------------------------------------------------

fn metadata_table(fields: &[MetadataField]) -> Option<ContentUnit> {
    if fields.is_empty() {
        return None;
    }
    let rows = fields
        .iter()
        .map(|f| vec![f.key.clone(), f.value.clone()])
        .collect();
    Some(ContentUnit::Table(Table::new(
        vec!["Field".into(), "Value".into()],
        rows,
    )))
}

fn file_units(files: &[FileDescriptor]) -> Vec<ContentUnit> {
    if files.is_empty() {
        return vec![ContentUnit::notice("No files available.")];
    }

    files
        .iter()
        .map(|file| {
            let name = file
                .path
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or(file.path.as_str())
                .to_string();
            let caption = match file.size_bytes {
                Some(size) => format!("{} ({})", file.path, human_size(size)),
                None => file.path.clone(),
            };
            let handle = match &file.download_url {
                Some(url) => AssetHandle::Token(url.clone()),
                None => AssetHandle::Unavailable {
                    reason: "no download link".into(),
                },
            };
            ContentUnit::Asset(AssetRef {
                name,
                caption,
                size_bytes: file.size_bytes,
                download_url: file.download_url.clone(),
                content_type: file.content_type.clone(),
                handle,
            })
        })
        .collect()
}

fn contributor_table(contributors: &[Contributor]) -> ContentUnit {
    if contributors.is_empty() {
        return ContentUnit::notice("No contributors found.");
    }
    let rows = contributors
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                if c.bibliographic { "Yes" } else { "No" }.to_string(),
                c.email.clone().unwrap_or_default(),
            ]
        })
        .collect();
    ContentUnit::Table(Table::new(
        vec!["Name".into(), "Bibliographic".into(), "Email".into()],
        rows,
    ))
}

fn log_table(entries: &[LogEntry]) -> ContentUnit {
    if entries.is_empty() {
        return ContentUnit::notice("No log entries.");
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.date
                    .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_default(),
                e.action.clone(),
                e.actor.clone().unwrap_or_default(),
            ]
        })
        .collect();
    ContentUnit::Table(Table::new(
        vec!["Date".into(), "Action".into(), "Actor".into()],
        rows,
    ))
}

/// Human-readable byte count (`512 B`, `1.5 KB`, `2.0 MB`).
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Normalize every node of the snapshot on at most `workers` concurrent tasks.
///
/// Returns `ExportFailure::Cancelled` if the token fires before all nodes are done.
#[instrument(skip_all, fields(nodes = snapshot.len(), workers = workers))]
pub async fn normalize_all(
    snapshot: &ProjectSnapshot,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<BTreeMap<NodeId, NormalizedBlock>, ExportFailure> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for node in snapshot.nodes.values() {
        if cancel.is_cancelled() {
            tasks.abort_all();
            return Err(ExportFailure::Cancelled);
        }

        let node = node.clone();
        let sem = semaphore.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return None;
            };
            if cancel.is_cancelled() {
                return None;
            }
            let block = normalize(&node);
            debug!(node = %node.id, units = block.units.len(), "node normalized");
            Some(block)
        });
    }

    let mut blocks = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(block)) => {
                blocks.insert(block.node_id.clone(), block);
            }
            Ok(None) => {}
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => warn!(error = %e, "normalization task aborted"),
        }

        if cancel.is_cancelled() {
            tasks.abort_all();
            return Err(ExportFailure::Cancelled);
        }
    }

    if blocks.len() < snapshot.len() {
        return Err(ExportFailure::Cancelled);
    }

    info!(blocks = blocks.len(), "normalization complete");
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use dossier_shared::{MarkupDialect, ParagraphStyle};

    use super::*;

    #[test]
    fn every_block_starts_with_title() {
        let node = ProjectNode::new("P", "Study", NodeKind::Project)
            .with_url("https://osf.io/p1234/")
            .with_payload(Payload::Metadata {
                fields: vec![
                    MetadataField::new("Category", "project"),
                    MetadataField::new("Public?", "Yes"),
                ],
            });
        let block = normalize(&node);

        assert_eq!(block.units[0], ContentUnit::heading(1, "Study"));
        assert_eq!(
            block.units[1],
            ContentUnit::Hyperlink {
                label: "Project URL".into(),
                url: "https://osf.io/p1234/".into()
            }
        );
        let ContentUnit::Table(table) = &block.units[2] else {
            panic!("expected metadata table");
        };
        assert_eq!(table.header, vec!["Field", "Value"]);
        assert_eq!(table.rows[1], vec!["Public?", "Yes"]);
        assert!(block.degradations.is_empty());
    }

    #[test]
    fn unsupported_kind_degrades_once() {
        let node = ProjectNode::new("x", "Preprint", NodeKind::Unsupported("preprint".into()))
            .with_payload(Payload::markdown("ignored"));
        let block = normalize(&node);

        assert_eq!(block.units.len(), 2);
        assert!(matches!(
            &block.units[1],
            ContentUnit::Notice { text } if text == "Unsupported content kind 'preprint' omitted"
        ));
        assert!(block.degradations[0].message.contains("Preprint"));
        assert_eq!(block.degradations.len(), 1);
        assert_eq!(
            block.degradations[0].category,
            WarningCategory::UnsupportedKind
        );
    }

    #[test]
    fn malformed_markup_adds_one_warning() {
        let node = ProjectNode::new("w", "Notes", NodeKind::WikiPage)
            .with_payload(Payload::markdown("Start\n\n```\nnever closed"));
        let block = normalize(&node);

        assert_eq!(block.degradations.len(), 1);
        assert_eq!(
            block.degradations[0].category,
            WarningCategory::MalformedMarkup
        );
        assert!(block.units.iter().skip(1).all(|u| matches!(
            u,
            ContentUnit::Paragraph {
                style: ParagraphStyle::Body,
                ..
            }
        )));
    }

    #[test]
    fn html_markup_is_parsed() {
        let node = ProjectNode::new("w", "Home", NodeKind::WikiPage).with_payload(Payload::Markup {
            dialect: MarkupDialect::Html,
            text: "<p>Hello <strong>there</strong></p>".into(),
        });
        let block = normalize(&node);
        assert_eq!(block.units.len(), 2);
        assert_eq!(block.word_count, 3);
    }

    #[test]
    fn files_become_assets() {
        let node = ProjectNode::new("f", "Files", NodeKind::FileListing).with_payload(
            Payload::Files {
                files: vec![
                    FileDescriptor {
                        path: "/data/run1.csv".into(),
                        size_bytes: Some(1536),
                        download_url: Some("https://files.osf.io/run1".into()),
                        content_type: None,
                    },
                    FileDescriptor {
                        path: "/notes.txt".into(),
                        size_bytes: None,
                        download_url: None,
                        content_type: None,
                    },
                ],
            },
        );
        let block = normalize(&node);
        let assets: Vec<&AssetRef> = block
            .units
            .iter()
            .filter_map(|u| match u {
                ContentUnit::Asset(a) => Some(a),
                _ => None,
            })
            .collect();

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].name, "run1.csv");
        assert_eq!(assets[0].caption, "/data/run1.csv (1.5 KB)");
        assert_eq!(
            assets[0].handle,
            AssetHandle::Token("https://files.osf.io/run1".into())
        );
        assert!(matches!(assets[1].handle, AssetHandle::Unavailable { .. }));
    }

    #[test]
    fn empty_payloads_get_notices() {
        let files = normalize(
            &ProjectNode::new("f", "Files", NodeKind::FileListing)
                .with_payload(Payload::Files { files: vec![] }),
        );
        assert_eq!(files.units[1], ContentUnit::notice("No files available."));

        let people = normalize(
            &ProjectNode::new("c", "Contributors", NodeKind::ContributorList)
                .with_payload(Payload::Contributors {
                    contributors: vec![],
                }),
        );
        assert_eq!(people.units[1], ContentUnit::notice("No contributors found."));

        let wiki = normalize(&ProjectNode::new("w", "Empty", NodeKind::WikiPage));
        assert_eq!(wiki.units[1], ContentUnit::notice("No content."));

        let component = normalize(&ProjectNode::new("c2", "Bare", NodeKind::Component));
        assert_eq!(component.units.len(), 1);
    }

    #[test]
    fn contributors_table_columns() {
        let block = normalize(
            &ProjectNode::new("c", "Contributors", NodeKind::ContributorList).with_payload(
                Payload::Contributors {
                    contributors: vec![Contributor {
                        name: "Ada Lovelace".into(),
                        bibliographic: true,
                        email: None,
                    }],
                },
            ),
        );
        let ContentUnit::Table(table) = &block.units[1] else {
            panic!("expected table");
        };
        assert_eq!(table.header, vec!["Name", "Bibliographic", "Email"]);
        assert_eq!(table.rows[0], vec!["Ada Lovelace", "Yes", ""]);
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn normalize_all_covers_every_node() {
        let snapshot = ProjectSnapshot::new(
            "P",
            (0..20).map(|i| ProjectNode::new(format!("n{i:02}"), format!("Node {i}"), NodeKind::Component)),
        );
        let cancel = CancellationToken::new();
        let blocks = normalize_all(&snapshot, 3, &cancel).await.expect("normalize");
        assert_eq!(blocks.len(), 20);
        assert_eq!(blocks["n07"].title, "Node 7");
    }

    #[tokio::test]
    async fn normalize_all_honours_cancellation() {
        let snapshot = ProjectSnapshot::new(
            "P",
            [ProjectNode::new("P", "Study", NodeKind::Project)],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = normalize_all(&snapshot, 2, &cancel).await.unwrap_err();
        assert_eq!(err, ExportFailure::Cancelled);
    }
}
