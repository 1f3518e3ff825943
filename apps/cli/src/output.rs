//! Terminal output: progress spinner, summaries and warning tables.

use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::{Report, eyre};
use indicatif::{ProgressBar, ProgressStyle};

use dossier_core::{AssembledTree, ExportedDocument, Pagination, ProgressReporter};
use dossier_shared::{ExportError, Warning};

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    pub(crate) fn phase_message(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    pub(crate) fn fail(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn nodes_normalized(&self, count: usize) {
        self.spinner.set_message(format!("Normalized {count} nodes"));
    }

    fn pages_laid_out(&self, count: u32) {
        self.spinner.set_message(format!("Laid out {count} pages"));
    }

    fn done(&self, _document: &ExportedDocument) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub(crate) fn print_summary(document: &ExportedDocument, path: &Path, elapsed: Duration) {
    println!();
    if document.warnings.is_empty() {
        println!("  Export complete.");
    } else {
        println!(
            "  Export complete with {} warning(s).",
            document.warnings.len()
        );
    }
    println!("  File:     {}", path.display());
    println!(
        "  Pages:    {} content, {} total",
        document.content_pages, document.total_pages
    );
    println!("  Sections: {}", document.toc.len());
    println!("  SHA-256:  {}", document.sha256);
    println!("  Run:      {}", document.run_id);
    println!("  Time:     {:.1}s", elapsed.as_secs_f64());
    println!();

    if !document.warnings.is_empty() {
        println!("{}", warning_table(&document.warnings));
    }
}

/// Print the failure with any warnings gathered before it, and build the
/// report that makes the process exit non-zero.
pub(crate) fn report_failure(err: ExportError) -> Report {
    eprintln!();
    eprintln!("  Export failed ({}).", err.category());
    if !err.warnings.is_empty() {
        eprintln!("  Warnings before the failure:");
        eprintln!("{}", warning_table(&err.warnings));
    }
    eyre!(err.failure)
}

/// Aligned `category  node  message` table.
pub(crate) fn warning_table(warnings: &[Warning]) -> String {
    let rows: Vec<(&str, &str, &str)> = warnings
        .iter()
        .map(|w| {
            (
                w.category.as_str(),
                w.node_id.as_ref().map_or("-", |id| id.as_str()),
                w.message.as_str(),
            )
        })
        .collect();

    let cat_width = rows
        .iter()
        .map(|r| r.0.len())
        .chain(["CATEGORY".len()])
        .max()
        .unwrap_or_default();
    let node_width = rows
        .iter()
        .map(|r| r.1.chars().count())
        .chain(["NODE".len()])
        .max()
        .unwrap_or_default();

    let mut out = format!("  {:<cat_width$}  {:<node_width$}  MESSAGE", "CATEGORY", "NODE");
    for (category, node, message) in rows {
        out.push_str(&format!("\n  {category:<cat_width$}  {node:<node_width$}  {message}"));
    }
    out
}

/// Outline of the assembled tree with each node's first page.
pub(crate) fn print_outline(tree: &AssembledTree, pagination: &Pagination) {
    let index = pagination.toc.index();
    for entry in &tree.entries {
        let block = &entry.block;
        let page = index
            .get(&block.node_id)
            .map_or_else(|| "-".to_string(), u32::to_string);
        println!(
            "{:>4}  {}{} [{}] ({} words)",
            page,
            "  ".repeat(entry.depth),
            block.title,
            block.kind.label(),
            block.word_count
        );
    }
    println!();
    println!(
        "  {} nodes, {} content pages",
        tree.entries.len(),
        pagination.page_count()
    );

    let warnings: Vec<Warning> = tree
        .degradations()
        .chain(&tree.warnings)
        .chain(&pagination.warnings)
        .cloned()
        .collect();
    if !warnings.is_empty() {
        println!();
        println!("{}", warning_table(&warnings));
    }
}
