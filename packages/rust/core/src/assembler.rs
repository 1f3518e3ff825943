//! Tree assembler.
//!
//! Walks the snapshot from its root in a deterministic pre-order, validates
//! the tree contract, prunes disabled sections, and resolves pending
//! cross-references to node ids.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use dossier_shared::{
    ContentUnit, ExportConfig, ExportFailure, NodeId, NodeKind, NormalizedBlock, ProjectNode,
    ProjectSnapshot, RefKey, RefTarget, SectionsConfig, SpanKind, StructuralError, Warning,
    WarningCategory,
};

use crate::normalize::normalize;

/// Traversal limits and section toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Deepest allowed depth; the root is depth 0.
    pub max_depth: usize,
    pub sections: SectionsConfig,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            sections: SectionsConfig::default(),
        }
    }
}

impl From<&ExportConfig> for AssembleOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            sections: config.sections,
        }
    }
}

impl AssembleOptions {
    fn includes(&self, kind: &NodeKind) -> bool {
        match kind {
            NodeKind::ContributorList => self.sections.include_contributors,
            NodeKind::Log => self.sections.include_logs,
            NodeKind::FileListing => self.sections.include_files,
            _ => true,
        }
    }
}

/// One node of the assembled tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Path length from the root.
    pub depth: usize,
    pub block: NormalizedBlock,
}

/// Normalized blocks in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledTree {
    pub entries: Vec<TreeEntry>,
    /// Degradations found while assembling (orphaned nodes).
    pub warnings: Vec<Warning>,
}

impl AssembledTree {
    /// Title of the root block.
    pub fn root_title(&self) -> Option<&str> {
        self.entries.first().map(|e| e.block.title.as_str())
    }

    /// Degradations carried by the included blocks, in traversal order.
    pub fn degradations(&self) -> impl Iterator<Item = &Warning> {
        self.entries.iter().flat_map(|e| e.block.degradations.iter())
    }
}

/// Check that the snapshot's root exists and really is a root.
pub fn check_root(snapshot: &ProjectSnapshot) -> Result<&ProjectNode, StructuralError> {
    let root = snapshot
        .root_node()
        .ok_or_else(|| StructuralError::MissingRoot {
            id: snapshot.root.clone(),
        })?;

    if let Some(parent) = &root.parent {
        if snapshot.get(parent).is_some() {
            return Err(StructuralError::NotRoot {
                id: root.id.clone(),
                parent: parent.clone(),
            });
        }
    }

    Ok(root)
}

/// Traversal step on the explicit stack.
enum Step<'a> {
    Enter {
        node: &'a ProjectNode,
        depth: usize,
        parent: Option<&'a NodeId>,
    },
    Exit,
}

/// Assemble the project tree.
///
/// Blocks are taken from `normalized`; any node missing from it is
/// normalized on the spot.
#[instrument(skip_all, fields(root = %snapshot.root, nodes = snapshot.len(), max_depth = options.max_depth))]
pub fn assemble(
    snapshot: &ProjectSnapshot,
    mut normalized: BTreeMap<NodeId, NormalizedBlock>,
    options: &AssembleOptions,
    cancel: &CancellationToken,
) -> Result<AssembledTree, ExportFailure> {
    let root = check_root(snapshot)?;

    let order = traverse(snapshot, root, options, cancel)?;
    let warnings = orphan_warnings(snapshot, &order.visited, &order.pruned);

    let mut entries: Vec<TreeEntry> = order
        .nodes
        .iter()
        .map(|(node, depth)| TreeEntry {
            depth: *depth,
            block: normalized
                .remove(&node.id)
                .unwrap_or_else(|| normalize(node)),
        })
        .collect();

    let titles = TitleIndex::new(snapshot, &entries);
    let mut resolved = 0usize;
    for entry in &mut entries {
        resolved += resolve_pending(&mut entry.block.units, snapshot, &titles);
    }

    info!(
        entries = entries.len(),
        orphans = warnings.len(),
        references = resolved,
        "tree assembled"
    );

    Ok(AssembledTree { entries, warnings })
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

struct Traversal<'a> {
    nodes: Vec<(&'a ProjectNode, usize)>,
    visited: HashSet<&'a NodeId>,
    pruned: Vec<&'a ProjectNode>,
}

/// Iterative pre-order DFS with cycle and shared-node detection.
fn traverse<'a>(
    snapshot: &'a ProjectSnapshot,
    root: &'a ProjectNode,
    options: &AssembleOptions,
    cancel: &CancellationToken,
) -> Result<Traversal<'a>, ExportFailure> {
    let mut out = Traversal {
        nodes: Vec::new(),
        visited: HashSet::new(),
        pruned: Vec::new(),
    };
    let mut path: Vec<&'a NodeId> = Vec::new();
    let mut on_path: HashSet<&'a NodeId> = HashSet::new();
    let mut stack = vec![Step::Enter {
        node: root,
        depth: 0,
        parent: None,
    }];

    while let Some(step) = stack.pop() {
        if cancel.is_cancelled() {
            return Err(ExportFailure::Cancelled);
        }

        let (node, depth, parent) = match step {
            Step::Exit => {
                if let Some(id) = path.pop() {
                    on_path.remove(id);
                }
                continue;
            }
            Step::Enter {
                node,
                depth,
                parent,
            } => (node, depth, parent),
        };

        if on_path.contains(&node.id) {
            let pos = path.iter().position(|id| **id == node.id).unwrap_or(0);
            let mut cycle: Vec<NodeId> = path[pos..].iter().map(|id| (*id).clone()).collect();
            cycle.push(node.id.clone());
            return Err(StructuralError::Cycle { path: cycle }.into());
        }
        if out.visited.contains(&node.id) {
            return Err(StructuralError::SharedNode {
                id: node.id.clone(),
                parent: parent.cloned().unwrap_or_else(|| node.id.clone()),
            }
            .into());
        }
        if depth > options.max_depth {
            return Err(StructuralError::DepthExceeded {
                id: node.id.clone(),
                depth,
                max: options.max_depth,
            }
            .into());
        }

        out.visited.insert(&node.id);
        out.nodes.push((node, depth));
        path.push(&node.id);
        on_path.insert(&node.id);
        stack.push(Step::Exit);

        let children = ordered_children(snapshot, node)?;
        for child in children.into_iter().rev() {
            if !options.includes(&child.kind) {
                debug!(node = %child.id, kind = child.kind.label(), "section disabled, pruning");
                out.pruned.push(child);
                continue;
            }
            stack.push(Step::Enter {
                node: child,
                depth: depth + 1,
                parent: Some(&node.id),
            });
        }
    }

    Ok(out)
}

/// Resolve and order a node's children: by sequence, unsequenced last, ties by id.
fn ordered_children<'a>(
    snapshot: &'a ProjectSnapshot,
    node: &'a ProjectNode,
) -> Result<Vec<&'a ProjectNode>, StructuralError> {
    let mut children = Vec::with_capacity(node.children.len());
    for child_id in &node.children {
        let child = snapshot
            .get(child_id)
            .ok_or_else(|| StructuralError::DanglingChild {
                parent: node.id.clone(),
                child: child_id.clone(),
            })?;

        if let Some(declared) = &child.parent {
            if *declared != node.id {
                return Err(StructuralError::InconsistentParent {
                    id: child.id.clone(),
                    listed_by: node.id.clone(),
                    declared: declared.clone(),
                });
            }
        }
        children.push(child);
    }

    children.sort_by(|a, b| {
        (a.sequence.is_none(), a.sequence, &a.id).cmp(&(b.sequence.is_none(), b.sequence, &b.id))
    });
    Ok(children)
}

/// Warn about nodes neither reached nor pruned.
fn orphan_warnings(
    snapshot: &ProjectSnapshot,
    visited: &HashSet<&NodeId>,
    pruned: &[&ProjectNode],
) -> Vec<Warning> {
    // Everything under a pruned section is excluded on purpose.
    let mut excluded: BTreeSet<&NodeId> = BTreeSet::new();
    let mut stack: Vec<&ProjectNode> = pruned.to_vec();
    while let Some(node) = stack.pop() {
        if !excluded.insert(&node.id) {
            continue;
        }
        stack.extend(node.children.iter().filter_map(|id| snapshot.get(id)));
    }

    snapshot
        .nodes
        .values()
        .filter(|n| !visited.contains(&n.id) && !excluded.contains(&n.id))
        .map(|n| {
            warn!(node = %n.id, "node not reachable from the root");
            Warning::new(
                &n.id,
                WarningCategory::OrphanNode,
                format!("'{}' is not reachable from the root and was omitted", n.title),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Reference resolution
// ---------------------------------------------------------------------------

/// Lower-cased title lookup: traversal order first, then snapshot id order.
struct TitleIndex {
    by_title: BTreeMap<String, NodeId>,
}

impl TitleIndex {
    fn new(snapshot: &ProjectSnapshot, entries: &[TreeEntry]) -> Self {
        let mut by_title = BTreeMap::new();
        let in_tree = entries.iter().map(|e| (&e.block.title, &e.block.node_id));
        let rest = snapshot.nodes.values().map(|n| (&n.title, &n.id));
        for (title, id) in in_tree.chain(rest) {
            by_title
                .entry(title.trim().to_lowercase())
                .or_insert_with(|| id.clone());
        }
        Self { by_title }
    }

    fn find(&self, title: &str) -> Option<&NodeId> {
        self.by_title.get(&title.trim().to_lowercase())
    }
}

/// Turn pending references into node references where possible.
///
/// Unmatched references with a fallback URL become plain links; the rest
/// stay pending and are reported during layout.
fn resolve_pending(units: &mut [ContentUnit], snapshot: &ProjectSnapshot, titles: &TitleIndex) -> usize {
    let mut resolved = 0;
    for unit in units {
        let ContentUnit::Paragraph { spans, .. } = unit else {
            continue;
        };
        for span in spans.iter_mut() {
            let SpanKind::Reference(RefTarget::Pending { key, fallback_url }) = &span.kind else {
                continue;
            };
            let target = match key {
                RefKey::Id(id) => snapshot.get(id).map(|n| n.id.clone()),
                RefKey::Title(title) => titles.find(title).cloned(),
            };
            span.kind = match (target, fallback_url) {
                (Some(id), _) => {
                    resolved += 1;
                    SpanKind::Reference(RefTarget::Node(id))
                }
                (None, Some(url)) => SpanKind::Link { url: url.clone() },
                (None, None) => continue,
            };
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use dossier_shared::{Payload, Span};

    use super::*;

    fn node(id: &str, kind: NodeKind) -> ProjectNode {
        ProjectNode::new(id, format!("Title {id}"), kind)
    }

    fn run(snapshot: &ProjectSnapshot, options: &AssembleOptions) -> Result<AssembledTree, ExportFailure> {
        assemble(snapshot, BTreeMap::new(), options, &CancellationToken::new())
    }

    fn order(tree: &AssembledTree) -> Vec<(&str, usize)> {
        tree.entries
            .iter()
            .map(|e| (e.block.node_id.as_str(), e.depth))
            .collect()
    }

    #[test]
    fn preorder_with_sequence_then_id() {
        let snapshot = ProjectSnapshot::new(
            "P",
            [
                node("P", NodeKind::Project).with_children(["z", "b", "a", "s2", "s1"]),
                node("a", NodeKind::Component).with_parent("P").with_children(["a1"]),
                node("a1", NodeKind::WikiPage).with_parent("a"),
                node("b", NodeKind::Component).with_parent("P"),
                node("z", NodeKind::Component).with_parent("P"),
                node("s1", NodeKind::Component).with_parent("P").with_sequence(2),
                node("s2", NodeKind::Component).with_parent("P").with_sequence(1),
            ],
        );
        let tree = run(&snapshot, &AssembleOptions::default()).expect("assemble");
        assert_eq!(
            order(&tree),
            vec![
                ("P", 0),
                ("s2", 1),
                ("s1", 1),
                ("a", 1),
                ("a1", 2),
                ("b", 1),
                ("z", 1),
            ]
        );
        assert!(tree.warnings.is_empty());
        assert_eq!(tree.root_title(), Some("Title P"));
    }

    #[test]
    fn cycle_is_structural_failure() {
        let snapshot = ProjectSnapshot::new(
            "A",
            [
                node("A", NodeKind::Project).with_children(["B"]),
                node("B", NodeKind::Component).with_children(["C"]),
                node("C", NodeKind::Component).with_children(["A"]),
            ],
        );
        let err = run(&snapshot, &AssembleOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ExportFailure::Structural(StructuralError::Cycle {
                path: vec!["A".into(), "B".into(), "C".into(), "A".into()],
            })
        );
    }

    #[test]
    fn self_loop_is_cycle() {
        let snapshot =
            ProjectSnapshot::new("A", [node("A", NodeKind::Project).with_children(["A"])]);
        let err = run(&snapshot, &AssembleOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ExportFailure::Structural(StructuralError::Cycle { .. })
        ));
    }

    #[test]
    fn long_cycle_does_not_recurse() {
        let n = 20_000;
        let mut nodes: Vec<ProjectNode> = (0..n)
            .map(|i| node(&format!("n{i}"), NodeKind::Component).with_children([format!("n{}", i + 1)]))
            .collect();
        nodes.push(node(&format!("n{n}"), NodeKind::Component).with_children(["n0"]));
        let snapshot = ProjectSnapshot::new("n0", nodes);

        let options = AssembleOptions {
            max_depth: usize::MAX,
            ..AssembleOptions::default()
        };
        let err = run(&snapshot, &options).unwrap_err();
        let ExportFailure::Structural(StructuralError::Cycle { path }) = err else {
            panic!("expected cycle");
        };
        assert_eq!(path.len(), n + 2);
    }

    #[test]
    fn shared_node_is_rejected() {
        let snapshot = ProjectSnapshot::new(
            "P",
            [
                node("P", NodeKind::Project).with_children(["A", "B"]),
                node("A", NodeKind::Component).with_children(["S"]),
                node("B", NodeKind::Component).with_children(["S"]),
                node("S", NodeKind::WikiPage),
            ],
        );
        let err = run(&snapshot, &AssembleOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ExportFailure::Structural(StructuralError::SharedNode {
                id: "S".into(),
                parent: "B".into(),
            })
        );
    }

    #[test]
    fn depth_limit_is_inclusive() {
        // Chain of depth 3: P(0) -> a(1) -> b(2) -> c(3)
        let snapshot = ProjectSnapshot::new(
            "P",
            [
                node("P", NodeKind::Project).with_children(["a"]),
                node("a", NodeKind::Component).with_children(["b"]),
                node("b", NodeKind::Component).with_children(["c"]),
                node("c", NodeKind::Component),
            ],
        );
        let ok = AssembleOptions {
            max_depth: 3,
            ..AssembleOptions::default()
        };
        assert!(run(&snapshot, &ok).is_ok());

        let too_shallow = AssembleOptions {
            max_depth: 2,
            ..AssembleOptions::default()
        };
        assert_eq!(
            run(&snapshot, &too_shallow).unwrap_err(),
            ExportFailure::Structural(StructuralError::DepthExceeded {
                id: "c".into(),
                depth: 3,
                max: 2,
            })
        );
    }

    #[test]
    fn root_checks() {
        let missing = ProjectSnapshot::new("nope", [node("P", NodeKind::Project)]);
        assert!(matches!(
            run(&missing, &AssembleOptions::default()).unwrap_err(),
            ExportFailure::Structural(StructuralError::MissingRoot { .. })
        ));

        let not_root = ProjectSnapshot::new(
            "C",
            [
                node("P", NodeKind::Project).with_children(["C"]),
                node("C", NodeKind::Component).with_parent("P"),
            ],
        );
        assert!(matches!(
            run(&not_root, &AssembleOptions::default()).unwrap_err(),
            ExportFailure::Structural(StructuralError::NotRoot { .. })
        ));

        // A parent outside the snapshot is fine: the export starts mid-tree.
        let partial = ProjectSnapshot::new("C", [node("C", NodeKind::Component).with_parent("P")]);
        assert!(run(&partial, &AssembleOptions::default()).is_ok());
    }

    #[test]
    fn dangling_and_inconsistent_children() {
        let dangling = ProjectSnapshot::new(
            "P",
            [node("P", NodeKind::Project).with_children(["ghost"])],
        );
        assert_eq!(
            run(&dangling, &AssembleOptions::default()).unwrap_err(),
            ExportFailure::Structural(StructuralError::DanglingChild {
                parent: "P".into(),
                child: "ghost".into(),
            })
        );

        let inconsistent = ProjectSnapshot::new(
            "P",
            [
                node("P", NodeKind::Project).with_children(["C"]),
                node("Q", NodeKind::Component),
                node("C", NodeKind::Component).with_parent("Q"),
            ],
        );
        assert!(matches!(
            run(&inconsistent, &AssembleOptions::default()).unwrap_err(),
            ExportFailure::Structural(StructuralError::InconsistentParent { .. })
        ));
    }

    #[test]
    fn sections_prune_and_orphans_warn() {
        let snapshot = ProjectSnapshot::new(
            "P",
            [
                node("P", NodeKind::Project).with_children(["P:logs", "P:files"]),
                node("P:logs", NodeKind::Log).with_parent("P"),
                node("P:files", NodeKind::FileListing).with_parent("P"),
                node("lost", NodeKind::WikiPage),
            ],
        );
        let tree = run(&snapshot, &AssembleOptions::default()).expect("assemble");
        assert_eq!(order(&tree), vec![("P", 0), ("P:files", 1)]);
        assert_eq!(tree.warnings.len(), 1);
        assert_eq!(tree.warnings[0].category, WarningCategory::OrphanNode);
        assert_eq!(tree.warnings[0].node_id, Some("lost".into()));
    }

    #[test]
    fn references_resolve_by_id_title_or_fallback() {
        let wiki = "See [intro](node:W1), see page \"title w2\", [ext](https://osf.io/zzzzz/) and see page Missing.";
        let snapshot = ProjectSnapshot::new(
            "P",
            [
                node("P", NodeKind::Project).with_children(["W1", "W2"]),
                node("W1", NodeKind::WikiPage).with_parent("P"),
                node("W2", NodeKind::WikiPage)
                    .with_parent("P")
                    .with_payload(Payload::markdown(wiki)),
            ],
        );
        let tree = run(&snapshot, &AssembleOptions::default()).expect("assemble");
        let spans: Vec<&Span> = tree.entries[2]
            .block
            .units
            .iter()
            .filter_map(|u| match u {
                ContentUnit::Paragraph { spans, .. } => Some(spans.iter()),
                _ => None,
            })
            .flatten()
            .collect();

        let kind_of = |text: &str| {
            spans
                .iter()
                .find(|s| s.text == text)
                .map(|s| s.kind.clone())
                .unwrap_or_else(|| panic!("no span {text:?} in {spans:?}"))
        };
        assert_eq!(kind_of("intro"), SpanKind::Reference(RefTarget::Node("W1".into())));
        assert_eq!(
            kind_of("see page \"title w2\""),
            SpanKind::Reference(RefTarget::Node("W2".into()))
        );
        assert_eq!(
            kind_of("ext"),
            SpanKind::Link {
                url: "https://osf.io/zzzzz/".into()
            }
        );
        assert!(matches!(
            kind_of("see page Missing"),
            SpanKind::Reference(RefTarget::Pending { .. })
        ));
    }

    #[test]
    fn cancellation_stops_traversal() {
        let snapshot = ProjectSnapshot::new("P", [node("P", NodeKind::Project)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = assemble(&snapshot, BTreeMap::new(), &AssembleOptions::default(), &cancel)
            .unwrap_err();
        assert_eq!(err, ExportFailure::Cancelled);
    }
}
