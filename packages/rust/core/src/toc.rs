//! Table of contents and page-level reference resolution.
//!
//! Runs after all pages are numbered: each node maps to the page holding its
//! first block, and every cross-reference is rewritten to point at a page.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, instrument, warn};

use dossier_shared::{
    Block, NodeId, PageBlock, RefKey, RefTarget, SpanKind, Toc, TocEntry, Warning,
    WarningCategory,
};

use crate::assembler::AssembledTree;

/// Build the TOC in traversal order from laid-out pages.
#[instrument(skip_all, fields(entries = tree.entries.len(), pages = pages.len()))]
pub fn build_toc(tree: &AssembledTree, pages: &[PageBlock]) -> Toc {
    let mut first_page: BTreeMap<&NodeId, u32> = BTreeMap::new();
    for page in pages {
        for placed in &page.blocks {
            first_page.entry(&placed.node_id).or_insert(page.number);
        }
    }

    let fallback = pages.last().map_or(1, |p| p.number);
    let entries: Vec<TocEntry> = tree
        .entries
        .iter()
        .map(|entry| TocEntry {
            node_id: entry.block.node_id.clone(),
            title: entry.block.title.clone(),
            depth: entry.depth,
            page: first_page
                .get(&entry.block.node_id)
                .copied()
                .unwrap_or(fallback),
        })
        .collect();

    debug!(entries = entries.len(), "TOC built");
    Toc { entries }
}

/// Rewrite references to `Page` targets and record them on each page.
///
/// References that cannot be resolved become plain text. Each distinct
/// unresolved target yields one warning per referring node.
pub fn resolve_references(pages: &mut [PageBlock], toc: &Toc) -> Vec<Warning> {
    let index = toc.index();
    let mut warnings = Vec::new();
    let mut reported: HashSet<(NodeId, String)> = HashSet::new();

    for page in pages.iter_mut() {
        let mut outgoing = BTreeMap::new();

        for placed in &mut page.blocks {
            let Block::Text { lines, .. } = &mut placed.block else {
                continue;
            };
            for span in lines.iter_mut().flatten() {
                let SpanKind::Reference(target) = &span.kind else {
                    continue;
                };

                let node = match target {
                    RefTarget::Node(id) | RefTarget::Page { node: id, .. } => Some(id),
                    RefTarget::Pending { .. } => None,
                };
                if let Some((id, number)) = node.and_then(|id| index.get_key_value(id)) {
                    outgoing.insert(id.clone(), *number);
                    span.kind = SpanKind::Reference(RefTarget::Page {
                        node: id.clone(),
                        page: *number,
                    });
                    continue;
                }

                let (key, message) = describe_unresolved(target);
                if reported.insert((placed.node_id.clone(), key)) {
                    warn!(node = %placed.node_id, %message, "unresolved reference");
                    warnings.push(Warning::new(
                        &placed.node_id,
                        WarningCategory::UnresolvedReference,
                        message,
                    ));
                }
                span.kind = SpanKind::Plain;
            }
        }

        page.references = outgoing;
    }

    warnings
}

/// Dedup key and message for a reference with no page.
fn describe_unresolved(target: &RefTarget) -> (String, String) {
    match target {
        RefTarget::Pending {
            key: RefKey::Id(id),
            ..
        } => (
            format!("id:{id}"),
            format!("reference to node '{id}' does not match any node"),
        ),
        RefTarget::Pending {
            key: RefKey::Title(title),
            ..
        } => (
            format!("title:{}", title.to_lowercase()),
            format!("reference to '{title}' does not match any node title"),
        ),
        RefTarget::Node(id) | RefTarget::Page { node: id, .. } => (
            format!("id:{id}"),
            format!("reference to node '{id}' points outside the exported tree"),
        ),
    }
}
