//! Shared types, error model, and configuration for Dossier.
//!
//! This crate is the foundation depended on by all other Dossier crates.
//! It provides:
//! - [`DossierError`] and the export failure taxonomy
//! - Domain types ([`ProjectSnapshot`], [`ProjectNode`], [`Warning`])
//! - The intermediate representation ([`ContentUnit`], [`PageBlock`], [`Toc`])
//! - Configuration ([`AppConfig`], [`ExportConfig`], config loading)

pub mod config;
pub mod content;
pub mod error;
pub mod pages;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AVG_CHAR_WIDTH, AppConfig, AssetsConfig, DefaultsConfig, ExportConfig, LayoutConfig,
    LayoutSection, OsfConfig, PageCapacity, PageSize, SectionsConfig, Theme, TreeConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, osf_token,
    render_config,
};
pub use content::{
    AssetHandle, AssetRef, ContentUnit, NormalizedBlock, ParagraphStyle, RefKey, RefTarget, Span,
    SpanKind, Table, TextStyle, spans_text,
};
pub use error::{
    AssetError, DossierError, ErrorCategory, ExportError, ExportFailure, FetchError, RenderError,
    Result, StructuralError,
};
pub use pages::{
    Block, PageBlock, PlacedBlock, TableLayout, Toc, TocEntry, heading_chars, heading_scale,
    truncate_chars, wrap_text,
};
pub use types::{
    Contributor, FileDescriptor, LogEntry, MarkupDialect, MetadataField, NodeId, NodeKind,
    Payload, ProjectNode, ProjectSnapshot, SNAPSHOT_SCHEMA_VERSION, Warning, WarningCategory,
};
