//! Application configuration for Dossier.
//!
//! User config lives at `~/.dossier/dossier.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DossierError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "dossier.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".dossier";

/// Average glyph width of the body font as a fraction of the font size.
pub const AVG_CHAR_WIDTH: f32 = 0.52;

// ---------------------------------------------------------------------------
// Config structs (matching dossier.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Page capacity overrides.
    #[serde(default)]
    pub layout: LayoutSection,

    /// Traversal limits.
    #[serde(default)]
    pub tree: TreeConfig,

    /// Asset fetching and embedding.
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Which optional sections to include.
    #[serde(default)]
    pub sections: SectionsConfig,

    #[serde(default)]
    pub theme: Theme,

    /// OSF API settings.
    #[serde(default)]
    pub osf: OsfConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory exported documents are written to when `-o` is not given.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    ".".into()
}

/// Page capacity measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageCapacity {
    /// Measured height in text lines.
    Lines(u32),
    /// Block count; every block costs one unit.
    Units(u32),
}

impl PageCapacity {
    pub fn limit(&self) -> u32 {
        match self {
            Self::Lines(n) | Self::Units(n) => *n,
        }
    }
}

/// `[layout]` section. Unset values are derived from the theme.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<PageCapacity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chars_per_line: Option<usize>,
}

/// `[tree]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Deepest allowed node depth; the root is depth 0.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Concurrent normalization tasks.
    #[serde(default = "default_normalize_workers")]
    pub normalize_workers: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            normalize_workers: default_normalize_workers(),
        }
    }
}

fn default_max_depth() -> usize {
    64
}
fn default_normalize_workers() -> usize {
    4
}

/// `[assets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Maximum asset fetches in flight.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Per-asset fetch timeout.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Embed fetched files as PDF attachments.
    #[serde(default = "default_true")]
    pub embed: bool,

    /// Files larger than this are rendered as download links only.
    #[serde(default = "default_max_embed_bytes")]
    pub max_embed_bytes: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            embed: true,
            max_embed_bytes: default_max_embed_bytes(),
        }
    }
}

fn default_fetch_concurrency() -> usize {
    4
}
fn default_fetch_timeout_ms() -> u64 {
    10_000
}
fn default_max_embed_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_true() -> bool {
    true
}

/// `[sections]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionsConfig {
    #[serde(default = "default_true")]
    pub include_contributors: bool,

    #[serde(default)]
    pub include_logs: bool,

    #[serde(default = "default_true")]
    pub include_files: bool,
}

impl Default for SectionsConfig {
    fn default() -> Self {
        Self {
            include_contributors: true,
            include_logs: false,
            include_files: true,
        }
    }
}

/// Output page size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    Letter,
    A4,
}

impl PageSize {
    /// Width and height in points.
    pub fn dimensions(&self) -> (f32, f32) {
        match self {
            Self::Letter => (612.0, 792.0),
            Self::A4 => (595.0, 842.0),
        }
    }
}

/// `[theme]` section: fonts and page geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    #[serde(default)]
    pub page_size: PageSize,

    /// Body font size in points.
    #[serde(default = "default_font_size")]
    pub font_size: f32,

    /// Page margin in points, all four sides.
    #[serde(default = "default_margin")]
    pub margin: f32,

    /// Leading as a multiple of the font size.
    #[serde(default = "default_line_spacing")]
    pub line_spacing: f32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            font_size: default_font_size(),
            margin: default_margin(),
            line_spacing: default_line_spacing(),
        }
    }
}

fn default_font_size() -> f32 {
    11.0
}
fn default_margin() -> f32 {
    72.0
}
fn default_line_spacing() -> f32 {
    1.3
}

impl Theme {
    /// Distance between baselines in points.
    pub fn leading(&self) -> f32 {
        self.font_size * self.line_spacing
    }

    /// Text lines that fit between the top and bottom margins.
    pub fn lines_per_page(&self) -> u32 {
        let (_, height) = self.page_size.dimensions();
        let usable = (height - 2.0 * self.margin).max(self.leading());
        (usable / self.leading()).floor().max(1.0) as u32
    }

    /// Body-font characters that fit between the side margins.
    pub fn chars_per_line(&self) -> usize {
        let (width, _) = self.page_size.dimensions();
        let usable = (width - 2.0 * self.margin).max(self.font_size);
        (usable / (self.font_size * AVG_CHAR_WIDTH)).floor().max(8.0) as usize
    }
}

/// `[osf]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsfConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API base used with `--test-env`.
    #[serde(default = "default_test_api_base")]
    pub test_api_base: String,

    /// Name of the env var holding the personal access token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OsfConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            test_api_base: default_test_api_base(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.osf.io/v2/".into()
}
fn default_test_api_base() -> String {
    "https://api.test.osf.io/v2/".into()
}
fn default_token_env() -> String {
    "OSF_TOKEN".into()
}
fn default_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Export config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Resolved page-packing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    pub capacity: PageCapacity,
    pub chars_per_line: usize,
}

impl LayoutConfig {
    /// Fill unset values from the theme geometry.
    pub fn for_theme(
        theme: &Theme,
        capacity: Option<PageCapacity>,
        chars_per_line: Option<usize>,
    ) -> Self {
        Self {
            capacity: capacity.unwrap_or(PageCapacity::Lines(theme.lines_per_page())),
            chars_per_line: chars_per_line.unwrap_or_else(|| theme.chars_per_line()).max(1),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self::for_theme(&Theme::default(), None, None)
    }
}

/// Runtime export configuration.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub layout: LayoutConfig,
    pub theme: Theme,
    pub max_depth: usize,
    pub normalize_workers: usize,
    pub sections: SectionsConfig,
    pub fetch_concurrency: usize,
    pub fetch_timeout: Duration,
    pub embed_assets: bool,
    pub max_embed_bytes: u64,
}

impl From<&AppConfig> for ExportConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            layout: LayoutConfig::for_theme(
                &config.theme,
                config.layout.capacity,
                config.layout.chars_per_line,
            ),
            theme: config.theme,
            max_depth: config.tree.max_depth,
            normalize_workers: config.tree.normalize_workers.max(1),
            sections: config.sections,
            fetch_concurrency: config.assets.fetch_concurrency.max(1),
            fetch_timeout: Duration::from_millis(config.assets.fetch_timeout_ms),
            embed_assets: config.assets.embed,
            max_embed_bytes: config.assets.max_embed_bytes,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.dossier/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DossierError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.dossier/dossier.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DossierError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DossierError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DossierError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = render_config(&AppConfig::default())?;

    std::fs::write(&path, content).map_err(|e| DossierError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Serialize a config to TOML.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| DossierError::config(e.to_string()))
}

/// Read the OSF token from the configured env var.
///
/// Returns `Ok(None)` when `required` is false and the variable is unset.
pub fn osf_token(config: &AppConfig, required: bool) -> Result<Option<String>> {
    let var_name = &config.osf.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(Some(val.trim().to_string())),
        _ if !required => Ok(None),
        _ => Err(DossierError::config(format!(
            "OSF token not found. Set the {var_name} environment variable.\n\
             Create a personal access token at https://osf.io/settings/tokens"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = render_config(&config).expect("serialize default config");
        assert!(toml_str.contains("max_depth"));
        assert!(toml_str.contains("OSF_TOKEN"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = render_config(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.tree.max_depth, 64);
        assert_eq!(parsed.osf.api_base, "https://api.osf.io/v2/");
        assert_eq!(parsed.theme, Theme::default());
        assert!(!parsed.sections.include_logs);
    }

    #[test]
    fn config_with_capacity_override() {
        let toml_str = r#"
[layout]
capacity = { units = 12 }
chars_per_line = 60

[sections]
include_logs = true

[theme]
page_size = "a4"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.layout.capacity, Some(PageCapacity::Units(12)));
        assert!(config.sections.include_logs);
        assert!(config.sections.include_files);
        assert_eq!(config.theme.page_size, PageSize::A4);

        let export = ExportConfig::from(&config);
        assert_eq!(export.layout.capacity, PageCapacity::Units(12));
        assert_eq!(export.layout.chars_per_line, 60);
    }

    #[test]
    fn layout_derived_from_theme() {
        let theme = Theme::default();
        // (792 - 144) / 14.3 = 45.3
        assert_eq!(theme.lines_per_page(), 45);
        // (612 - 144) / 5.72 = 81.8
        assert_eq!(theme.chars_per_line(), 81);

        let layout = LayoutConfig::default();
        assert_eq!(layout.capacity, PageCapacity::Lines(45));
    }

    #[test]
    fn export_config_from_app_config() {
        let export = ExportConfig::from(&AppConfig::default());
        assert_eq!(export.max_depth, 64);
        assert_eq!(export.fetch_concurrency, 4);
        assert_eq!(export.fetch_timeout, Duration::from_secs(10));
        assert!(export.embed_assets);
    }

    #[test]
    fn missing_token_is_reported() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.osf.token_env = "DOSSIER_TEST_NONEXISTENT_TOKEN_12345".into();
        assert_eq!(osf_token(&config, false).expect("optional"), None);
        let err = osf_token(&config, true).unwrap_err();
        assert!(err.to_string().contains("OSF token not found"));
    }
}
