//! End-to-end export pipeline: snapshot → normalize → assemble → paginate → render.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use dossier_render::{AssetFetcher, OfflineFetcher, RenderConfig, RenderInput, render};
use dossier_shared::{
    ExportConfig, ExportError, ExportFailure, FetchError, ProjectSnapshot, Toc, Warning,
};

use crate::assembler::{AssembleOptions, assemble, check_root};
use crate::layout::paginate;
use crate::normalize::normalize_all;

/// A successfully exported document.
#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub bytes: Vec<u8>,
    pub toc: Toc,
    /// Degradations in pipeline order.
    pub warnings: Vec<Warning>,
    pub content_pages: u32,
    /// Content pages plus cover and contents pages.
    pub total_pages: u32,
    /// Hex SHA-256 of `bytes`.
    pub sha256: String,
    pub run_id: Uuid,
}

/// Outcome of one export run.
pub type ExportResult = std::result::Result<ExportedDocument, ExportError>;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once normalization has joined.
    fn nodes_normalized(&self, count: usize);
    /// Called once pages are numbered.
    fn pages_laid_out(&self, count: u32);
    /// Called when the pipeline completes successfully.
    fn done(&self, document: &ExportedDocument);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn nodes_normalized(&self, _count: usize) {}
    fn pages_laid_out(&self, _count: u32) {}
    fn done(&self, _document: &ExportedDocument) {}
}

/// Runs exports with one configuration and one asset source.
#[derive(Clone)]
pub struct Exporter {
    config: ExportConfig,
    fetcher: Arc<dyn AssetFetcher>,
    exported_at: Option<DateTime<Utc>>,
}

impl Exporter {
    pub fn new(config: ExportConfig, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            config,
            fetcher,
            exported_at: None,
        }
    }

    /// Exporter that never fetches assets.
    pub fn offline(config: ExportConfig) -> Self {
        Self::new(config, Arc::new(OfflineFetcher))
    }

    /// Stamp the cover and document info with an export time.
    pub fn with_exported_at(mut self, at: DateTime<Utc>) -> Self {
        self.exported_at = Some(at);
        self
    }

    /// Export the outcome of a fetch; fetch failures are fatal.
    pub async fn export_fetched(
        &self,
        fetched: std::result::Result<ProjectSnapshot, FetchError>,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> ExportResult {
        match fetched {
            Ok(snapshot) => self.export(&snapshot, cancel, progress).await,
            Err(err) => {
                warn!(error = %err, "project fetch failed");
                Err(ExportError::new(err, Vec::new()))
            }
        }
    }

    /// Export a project snapshot to PDF.
    ///
    /// 1. Root check
    /// 2. Normalize every node (bounded pool)
    /// 3. Assemble the tree
    /// 4. Paginate and build the TOC
    /// 5. Render
    pub async fn export(
        &self,
        snapshot: &ProjectSnapshot,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> ExportResult {
        let run_id = Uuid::now_v7();
        let span = info_span!("export", %run_id, root = %snapshot.root, nodes = snapshot.len());
        self.run(snapshot, run_id, cancel, progress)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        snapshot: &ProjectSnapshot,
        run_id: Uuid,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> ExportResult {
        let start = Instant::now();
        let mut warnings: Vec<Warning> = Vec::new();
        info!("starting export");

        // --- Phase 1: Root ---
        progress.phase("Checking project tree");
        let root = check_root(snapshot).map_err(|e| ExportError::new(e, Vec::new()))?;
        let source_url = root.url.clone();
        bail_if_cancelled(cancel, &warnings)?;

        // --- Phase 2: Normalize ---
        progress.phase("Normalizing content");
        let normalized = normalize_all(snapshot, self.config.normalize_workers, cancel)
            .await
            .map_err(|e| ExportError::new(e, Vec::new()))?;
        progress.nodes_normalized(normalized.len());

        // Reported if assembly fails; on success the tree supplies them in traversal order.
        let partial: Vec<Warning> = normalized
            .values()
            .flat_map(|b| b.degradations.iter().cloned())
            .collect();

        // --- Phase 3: Assemble ---
        progress.phase("Assembling project tree");
        let tree = assemble(
            snapshot,
            normalized,
            &AssembleOptions::from(&self.config),
            cancel,
        )
        .map_err(|e| ExportError::new(e, partial))?;
        warnings.extend(tree.degradations().cloned());
        warnings.extend(tree.warnings.iter().cloned());
        bail_if_cancelled(cancel, &warnings)?;

        // --- Phase 4: Layout ---
        progress.phase("Laying out pages");
        let pagination = paginate(&tree, &self.config.layout);
        warnings.extend(pagination.warnings.iter().cloned());
        progress.pages_laid_out(pagination.page_count());
        bail_if_cancelled(cancel, &warnings)?;

        // --- Phase 5: Render ---
        progress.phase("Rendering PDF");
        let toc = pagination.toc.clone();
        let input = RenderInput {
            title: tree.root_title().unwrap_or(root.title.as_str()).to_string(),
            source_url,
            pages: pagination.pages,
            toc: pagination.toc,
            exported_at: self.exported_at,
        };
        let render_config = RenderConfig::from(&self.config).with_layout(&self.config.layout);
        let output = render(&input, &render_config, Arc::clone(&self.fetcher), cancel)
            .await
            .map_err(|e| ExportError::new(e, warnings.clone()))?;
        warnings.extend(output.warnings);

        let document = ExportedDocument {
            bytes: output.bytes,
            toc,
            warnings,
            content_pages: output.content_pages,
            total_pages: output.total_pages,
            sha256: output.sha256,
            run_id,
        };

        info!(
            content_pages = document.content_pages,
            total_pages = document.total_pages,
            warnings = document.warnings.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "export complete"
        );
        progress.done(&document);
        Ok(document)
    }
}

fn bail_if_cancelled(cancel: &CancellationToken, warnings: &[Warning]) -> Result<(), ExportError> {
    if cancel.is_cancelled() {
        return Err(ExportError::new(ExportFailure::Cancelled, warnings.to_vec()));
    }
    Ok(())
}
