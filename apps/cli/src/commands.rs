//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dossier_core::{AssembleOptions, Exporter, assemble, normalize_all, paginate};
use dossier_fetch::{
    HttpAssetFetcher, OsfClient, OsfClientOptions, load_snapshot, parse_project_id,
    save_snapshot,
};
use dossier_render::{AssetFetcher, OfflineFetcher};
use dossier_shared::{
    AppConfig, ExportConfig, ExportError, ExportFailure, FetchError, PageCapacity,
    ProjectSnapshot, init_config, load_config, load_config_from, osf_token, render_config,
};

use crate::output::{self, CliProgress};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Dossier: export a research project as a paginated document.
#[derive(Parser)]
#[command(
    name = "dossier",
    version,
    about = "Export an OSF research project to a paginated PDF with a table of contents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.dossier/dossier.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Export a project to PDF.
    Export(ExportArgs),

    /// Print the assembled outline of a snapshot with page numbers.
    Inspect {
        /// Project snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,

        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Where the project comes from and where the document goes.
#[derive(Args)]
pub(crate) struct ExportArgs {
    /// Project snapshot (JSON) to export.
    #[arg(long, conflicts_with = "osf", required_unless_present = "osf")]
    pub snapshot: Option<PathBuf>,

    /// OSF project id or URL (e.g. https://osf.io/kzc68/).
    #[arg(long)]
    pub osf: Option<String>,

    /// Use the OSF test environment API.
    #[arg(long, requires = "osf")]
    pub test_env: bool,

    /// The project is private: require an OSF token.
    #[arg(long, requires = "osf")]
    pub private: bool,

    /// Output PDF path (defaults to OSF_Project_<id>_exported_<timestamp>.pdf).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Also write the table of contents as JSON.
    #[arg(long)]
    pub toc_json: Option<PathBuf>,

    /// Save the fetched project snapshot as JSON.
    #[arg(long)]
    pub save_snapshot: Option<PathBuf>,

    /// Never download assets; list them instead.
    #[arg(long)]
    pub offline: bool,

    /// Do not embed file attachments; link to them.
    #[arg(long)]
    pub no_embed: bool,

    /// Leave the export time off the document so reruns are byte-identical.
    #[arg(long)]
    pub no_timestamp: bool,

    #[command(flatten)]
    pub tree: TreeArgs,
}

/// Overrides for tree assembly and pagination.
#[derive(Args, Default)]
pub(crate) struct TreeArgs {
    /// Maximum tree depth (root is depth 0).
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Include each node's activity log.
    #[arg(long)]
    pub include_logs: bool,

    /// Leave out contributor lists.
    #[arg(long)]
    pub no_contributors: bool,

    /// Leave out file listings.
    #[arg(long)]
    pub no_files: bool,

    /// Page capacity in measured lines.
    #[arg(long, conflicts_with = "units")]
    pub lines: Option<u32>,

    /// Page capacity in content units.
    #[arg(long)]
    pub units: Option<u32>,
}

impl TreeArgs {
    /// Apply flags on top of the file config.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(depth) = self.max_depth {
            config.tree.max_depth = depth;
        }
        if self.include_logs {
            config.sections.include_logs = true;
        }
        if self.no_contributors {
            config.sections.include_contributors = false;
        }
        if self.no_files {
            config.sections.include_files = false;
        }
        if let Some(lines) = self.lines {
            config.layout.capacity = Some(PageCapacity::Lines(lines.max(1)));
        }
        if let Some(units) = self.units {
            config.layout.capacity = Some(PageCapacity::Units(units.max(1)));
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "dossier=info",
        1 => "dossier=debug",
        _ => "dossier=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Export(args) => cmd_export(config, args).await,
        Command::Inspect { snapshot, tree } => cmd_inspect(config, &snapshot, &tree).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

async fn cmd_export(mut config: AppConfig, args: ExportArgs) -> Result<()> {
    args.tree.apply(&mut config);
    if args.no_embed {
        config.assets.embed = false;
    }
    let export_config = ExportConfig::from(&config);
    let start = Instant::now();

    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    let progress = CliProgress::new();
    progress.phase_message("Fetching project");

    let token = match &args.osf {
        Some(_) => osf_token(&config, args.private)?,
        None => None,
    };

    let fetched = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            progress.fail();
            let err = ExportError::new(ExportFailure::Cancelled, Vec::new());
            return Err(output::report_failure(err));
        }
        fetched = fetch_snapshot(&config, &args, token.clone()) => fetched?,
    };

    if let (Some(path), Ok(snapshot)) = (&args.save_snapshot, &fetched) {
        save_snapshot(path, snapshot)?;
        info!(path = %path.display(), "snapshot saved");
    }

    let project_id = fetched
        .as_ref()
        .map(|s| s.root.to_string())
        .unwrap_or_default();

    let fetcher: Arc<dyn AssetFetcher> = if args.offline {
        Arc::new(OfflineFetcher)
    } else {
        Arc::new(HttpAssetFetcher::new(
            token,
            export_config.fetch_timeout,
            export_config.max_embed_bytes,
        )?)
    };

    let mut exporter = Exporter::new(export_config, fetcher);
    let now = Utc::now();
    if !args.no_timestamp {
        exporter = exporter.with_exported_at(now);
    }

    let document = match exporter.export_fetched(fetched, &cancel, &progress).await {
        Ok(document) => document,
        Err(err) => {
            progress.fail();
            return Err(output::report_failure(err));
        }
    };

    let out_path = match &args.out {
        Some(path) => path.clone(),
        None => PathBuf::from(&config.defaults.output_dir).join(format!(
            "OSF_Project_{project_id}_exported_{}.pdf",
            now.format("%Y-%m-%d_%H-%M-%S")
        )),
    };
    write_file(&out_path, &document.bytes)?;

    if let Some(toc_path) = &args.toc_json {
        let json = serde_json::to_string_pretty(&document.toc)?;
        write_file(toc_path, json.as_bytes())?;
    }

    output::print_summary(&document, &out_path, start.elapsed());
    Ok(())
}

/// Load or fetch the snapshot. Only client setup errors escape as `Err`.
async fn fetch_snapshot(
    config: &AppConfig,
    args: &ExportArgs,
    token: Option<String>,
) -> Result<std::result::Result<ProjectSnapshot, FetchError>> {
    if let Some(path) = &args.snapshot {
        return Ok(load_snapshot(path));
    }

    let input = args
        .osf
        .as_deref()
        .ok_or_else(|| eyre!("either --snapshot or --osf is required"))?;
    let project_id = parse_project_id(input)?;

    let options = OsfClientOptions::from_config(&config.osf, args.test_env, token)?;
    let client = OsfClient::new(options)?;
    info!(project = %project_id, api = %client.api_base(), "fetching project from OSF");

    Ok(client.fetch_project(&project_id, &config.sections).await)
}

fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling export");
            cancel.cancel();
        }
    });
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).wrap_err_with(|| format!("failed to write {}", path.display()))
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

async fn cmd_inspect(mut config: AppConfig, snapshot: &Path, tree: &TreeArgs) -> Result<()> {
    tree.apply(&mut config);
    let export_config = ExportConfig::from(&config);
    let snapshot = load_snapshot(snapshot)?;
    let cancel = CancellationToken::new();

    let normalized = normalize_all(&snapshot, export_config.normalize_workers, &cancel)
        .await
        .map_err(|e| ExportError::new(e, Vec::new()))?;
    let assembled = assemble(
        &snapshot,
        normalized,
        &AssembleOptions::from(&export_config),
        &cancel,
    )
    .map_err(|e| ExportError::new(e, Vec::new()))?;
    let pagination = paginate(&assembled, &export_config.layout);

    output::print_outline(&assembled, &pagination);
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    println!("{}", render_config(config)?);
    Ok(())
}
