//! PDF rendering for laid-out exports.
//!
//! Takes numbered pages and the table of contents, resolves assets lazily
//! through an [`AssetFetcher`], and writes a paginated PDF with a cover,
//! contents pages, cross-reference links, embedded attachments and an
//! outline.

mod assets;
mod pdf;
mod text;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use dossier_shared::{
    Block, ExportConfig, LayoutConfig, PageBlock, RenderError, Theme, Toc, Warning,
};

pub use assets::{AssetFetcher, AssetOutcome, AssetPolicy, OfflineFetcher};

use assets::{AssetJob, resolve_assets};

/// Everything the renderer draws.
#[derive(Debug, Clone)]
pub struct RenderInput {
    /// Root project title, shown on the cover and in page headers.
    pub title: String,
    pub source_url: Option<String>,
    pub pages: Vec<PageBlock>,
    pub toc: Toc,
    /// Written to the cover and document info when set.
    pub exported_at: Option<DateTime<Utc>>,
}

/// Renderer settings.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub theme: Theme,
    /// Must match the value the pages were laid out with.
    pub chars_per_line: usize,
    pub assets: AssetPolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for RenderConfig {
    fn from(config: &ExportConfig) -> Self {
        Self {
            theme: config.theme,
            chars_per_line: config.layout.chars_per_line,
            assets: AssetPolicy {
                embed: config.embed_assets,
                max_embed_bytes: config.max_embed_bytes,
                concurrency: config.fetch_concurrency,
                timeout: config.fetch_timeout,
            },
        }
    }
}

impl RenderConfig {
    /// Settings for pages laid out with `layout`.
    pub fn with_layout(mut self, layout: &LayoutConfig) -> Self {
        self.chars_per_line = layout.chars_per_line;
        self
    }
}

/// A finished document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub bytes: Vec<u8>,
    /// Lower-case hex SHA-256 of `bytes`.
    pub sha256: String,
    pub content_pages: u32,
    /// Cover and contents pages included.
    pub total_pages: u32,
    /// One per unavailable asset, in document order.
    pub warnings: Vec<Warning>,
}

/// Render the document.
#[instrument(skip_all, fields(pages = input.pages.len(), toc = input.toc.len()))]
pub async fn render(
    input: &RenderInput,
    config: &RenderConfig,
    fetcher: Arc<dyn AssetFetcher>,
    cancel: &CancellationToken,
) -> Result<RenderOutput, RenderError> {
    if cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }

    let jobs = asset_jobs(&input.pages);
    let (outcomes, warnings) = resolve_assets(&jobs, fetcher, &config.assets, cancel).await?;

    if cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }

    let written = pdf::write_pdf(input, &config.theme, config.chars_per_line, &outcomes)?;
    let content_pages = input.pages.len().max(1) as u32;
    let total_pages = written.front_pages + content_pages;
    let sha256 = digest(&written.bytes);

    info!(
        bytes = written.bytes.len(),
        content_pages,
        total_pages,
        assets = jobs.len(),
        unavailable = warnings.len(),
        "document rendered"
    );

    Ok(RenderOutput {
        bytes: written.bytes,
        sha256,
        content_pages,
        total_pages,
        warnings,
    })
}

/// Asset blocks in page then block order.
fn asset_jobs(pages: &[PageBlock]) -> Vec<AssetJob> {
    pages
        .iter()
        .flat_map(|page| &page.blocks)
        .filter_map(|placed| match &placed.block {
            Block::Asset(asset) => Some(AssetJob {
                node_id: placed.node_id.clone(),
                asset: asset.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Hex-encoded SHA-256 of the document bytes.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
