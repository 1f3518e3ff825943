//! Core export pipeline for Dossier.
//!
//! This crate turns a [`ProjectSnapshot`](dossier_shared::ProjectSnapshot)
//! into a paginated document: content normalization, tree assembly,
//! pagination, the table of contents, and the end-to-end [`Exporter`].

pub mod assembler;
pub mod layout;
pub mod normalize;
pub mod pipeline;
pub mod toc;

pub use assembler::{AssembleOptions, AssembledTree, TreeEntry, assemble, check_root};
pub use layout::{Pagination, paginate};
pub use normalize::{human_size, normalize, normalize_all};
pub use pipeline::{
    ExportResult, ExportedDocument, Exporter, ProgressReporter, SilentProgress,
};
pub use toc::{build_toc, resolve_references};
