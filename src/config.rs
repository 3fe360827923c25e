//! Sync configuration.
//!
//! Static settings live in an optional `sync.toml`; anything not set there
//! falls back to stock defaults. Secrets and execution-mode switches come from
//! the environment instead (see [`RuntimeEnv`]).
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [source]
//! owner = "akofink"
//! repo = "recipes-md"
//! branch = "main"
//! documents_dir = "recipes"   # Subtree holding one markdown file per recipe
//! images_dir = "images"       # Subtree holding images/<recipe>/<file>
//! extension = "md"
//! api_base = "https://api.github.com"
//! raw_base = "https://raw.githubusercontent.com"
//!
//! [output]
//! dir = "src/generated"
//! dataset_file = "recipes.json"
//! meta_file = "meta.json"
//! static_dir = "static"
//! site_base = "/static/"      # URL prefix of the rendered pages
//!
//! [transport]
//! max_wait_ms = 120000        # Longest rate-limit backoff we are willing to sleep
//! server_error_retries = 2
//! max_rate_limit_retries = 5
//! request_timeout_ms = 30000  # Per-request limit, connect to last byte
//! user_agent = "recipe-sync"
//! ```
//!
//! ## Environment
//!
//! | Variable | Effect |
//! |---|---|
//! | `GITHUB_TOKEN`, `GH_TOKEN`, `RECIPES_GITHUB_TOKEN` | Bearer token, first one set wins |
//! | `GENERATE_MAX_WAIT_MS` | Overrides `transport.max_wait_ms` |
//! | `CI` | Strict mode: every warn-and-continue path aborts instead |
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings loaded from `sync.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Upstream repository and its layout.
    pub source: SourceConfig,
    /// Where the dataset, meta file and pages are written.
    pub output: OutputConfig,
    /// Retry and backoff limits for upstream requests.
    pub transport: TransportConfig,
}

impl SyncConfig {
    /// Validate that required values are present and well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("source.owner", &self.source.owner),
            ("source.repo", &self.source.repo),
            ("source.branch", &self.source.branch),
            ("source.documents_dir", &self.source.documents_dir),
            ("source.images_dir", &self.source.images_dir),
            ("source.extension", &self.source.extension),
            ("output.dataset_file", &self.output.dataset_file),
            ("output.meta_file", &self.output.meta_file),
            ("output.static_dir", &self.output.static_dir),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{key} must not be empty")));
            }
        }
        if self.source.extension.starts_with('.') {
            return Err(ConfigError::Validation(
                "source.extension must not start with a dot".into(),
            ));
        }
        if self.source.documents_dir.contains('/') || self.source.images_dir.contains('/') {
            return Err(ConfigError::Validation(
                "source.documents_dir and source.images_dir must be top-level directories".into(),
            ));
        }
        if self.source.documents_dir == self.source.images_dir {
            return Err(ConfigError::Validation(
                "source.documents_dir and source.images_dir must differ".into(),
            ));
        }
        // Stale page directories under the static root get deleted.
        let static_dir_nested = Path::new(&self.output.static_dir)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !static_dir_nested {
            return Err(ConfigError::Validation(
                "output.static_dir must be a relative path below output.dir".into(),
            ));
        }
        if self.transport.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "transport.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.output.dataset_file == self.output.meta_file {
            return Err(ConfigError::Validation(
                "output.dataset_file and output.meta_file must differ".into(),
            ));
        }
        Ok(())
    }

    /// Raw URL of the images subtree: `<raw>/<owner>/<repo>/<branch>/<images_dir>`.
    pub fn image_base_url(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.source.raw_base.trim_end_matches('/'),
            self.source.owner,
            self.source.repo,
            self.source.branch,
            self.source.images_dir
        )
    }

    /// Layout of the upstream repository as the diff engine needs it.
    pub fn layout(&self) -> RepoLayout {
        RepoLayout {
            documents_dir: self.source.documents_dir.clone(),
            images_dir: self.source.images_dir.clone(),
            extension: self.source.extension.clone(),
        }
    }
}

/// Upstream repository identity and layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub owner: String,
    pub repo: String,
    /// The single tracked branch.
    pub branch: String,
    pub documents_dir: String,
    pub images_dir: String,
    /// Extension of document files, without the dot.
    pub extension: String,
    pub api_base: String,
    pub raw_base: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            owner: "akofink".to_string(),
            repo: "recipes-md".to_string(),
            branch: "main".to_string(),
            documents_dir: "recipes".to_string(),
            images_dir: "images".to_string(),
            extension: "md".to_string(),
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
        }
    }
}

/// Local artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub dataset_file: String,
    pub meta_file: String,
    /// Directory (relative to `dir`) receiving the rendered pages.
    pub static_dir: String,
    /// URL prefix the rendered pages are served under.
    pub site_base: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("src/generated"),
            dataset_file: "recipes.json".to_string(),
            meta_file: "meta.json".to_string(),
            static_dir: "static".to_string(),
            site_base: "/static/".to_string(),
        }
    }
}

/// Retry and backoff limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Longest rate-limit wait that is slept through; longer waits fail.
    pub max_wait_ms: u64,
    /// Extra attempts after a 5xx response.
    pub server_error_retries: u32,
    /// Consecutive rate-limit retries before giving up.
    pub max_rate_limit_retries: u32,
    /// A request that takes longer fails with a network error.
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: 120_000,
            server_error_retries: 2,
            max_rate_limit_retries: 5,
            request_timeout_ms: 30_000,
            user_agent: "recipe-sync".to_string(),
        }
    }
}

impl TransportConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Repository layout: which top-level directories hold documents and images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    pub documents_dir: String,
    pub images_dir: String,
    pub extension: String,
}

impl RepoLayout {
    /// `true` if `filename` carries the document extension.
    pub fn is_document(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && ext == self.extension)
    }

    /// `pasta` → `pasta.md`
    pub fn filename_for(&self, name: &str) -> String {
        format!("{}.{}", name, self.extension)
    }
}

impl Default for RepoLayout {
    fn default() -> Self {
        SyncConfig::default().layout()
    }
}

/// Execution context read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub token: Option<String>,
    pub max_wait_ms: Option<u64>,
    /// Unattended run: tolerated failures become fatal.
    pub strict: bool,
}

const TOKEN_VARS: [&str; 3] = ["GITHUB_TOKEN", "GH_TOKEN", "RECIPES_GITHUB_TOKEN"];

impl RuntimeEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let token = TOKEN_VARS.iter().find_map(|key| get(*key));
        let max_wait_ms = get("GENERATE_MAX_WAIT_MS").and_then(|v| v.trim().parse().ok());
        let strict = get("CI").is_some_and(|v| {
            let v = v.trim().to_ascii_lowercase();
            v != "0" && v != "false"
        });
        Self {
            token,
            max_wait_ms,
            strict,
        }
    }

    /// Apply environment overrides on top of file config.
    pub fn apply(&self, config: &mut SyncConfig) {
        if let Some(ms) = self.max_wait_ms {
            config.transport.max_wait_ms = ms;
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SyncConfig::default()).unwrap_or(toml::Value::Table(Default::default()))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SyncConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SyncConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given file, or stock defaults if it does not exist.
pub fn load_config(path: &Path) -> Result<SyncConfig, ConfigError> {
    let overlay = if path.exists() {
        let content = fs::read_to_string(path)?;
        Some(toml::from_str::<toml::Value>(&content)?)
    } else {
        None
    };
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock `sync.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# recipe-sync configuration
# =========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys cause an error.
#
# Secrets are never read from this file. Set GITHUB_TOKEN (or GH_TOKEN,
# RECIPES_GITHUB_TOKEN) for authenticated requests and higher rate limits.

# ---------------------------------------------------------------------------
# Upstream repository
# ---------------------------------------------------------------------------
[source]
owner = "akofink"
repo = "recipes-md"
# The only branch that is tracked.
branch = "main"
# One markdown file per recipe lives here.
documents_dir = "recipes"
# Images live under <images_dir>/<recipe name>/.
images_dir = "images"
extension = "md"
api_base = "https://api.github.com"
raw_base = "https://raw.githubusercontent.com"

# ---------------------------------------------------------------------------
# Local artifacts
# ---------------------------------------------------------------------------
[output]
dir = "src/generated"
dataset_file = "recipes.json"
meta_file = "meta.json"
# Rendered pages, relative to dir.
static_dir = "static"
# URL prefix the rendered pages are served under.
site_base = "/static/"

# ---------------------------------------------------------------------------
# Upstream requests
# ---------------------------------------------------------------------------
[transport]
# Rate-limit waits longer than this fail instead of sleeping.
# GENERATE_MAX_WAIT_MS overrides it.
max_wait_ms = 120000
# Extra attempts after a 5xx response (backoff 1s, 2s, ...).
server_error_retries = 2
# Consecutive rate-limit retries before giving up.
max_rate_limit_retries = 5
# Longest a single request may take, connect to last byte.
request_timeout_ms = 30000
user_agent = "recipe-sync"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_values() {
        let config = SyncConfig::default();
        assert_eq!(config.source.branch, "main");
        assert_eq!(config.source.documents_dir, "recipes");
        assert_eq!(config.output.dataset_file, "recipes.json");
        assert_eq!(config.transport.max_wait(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_config() {
        let config: SyncConfig = toml::from_str(
            r#"
[source]
branch = "drafts"
"#,
        )
        .unwrap();
        assert_eq!(config.source.branch, "drafts");
        assert_eq!(config.source.owner, "akofink");
        assert_eq!(config.transport.server_error_retries, 2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<SyncConfig, _> = toml::from_str("[source]\nbranhc = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn stock_config_matches_defaults() {
        let parsed: SyncConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = SyncConfig::default();
        assert_eq!(parsed.source.owner, defaults.source.owner);
        assert_eq!(parsed.output.dir, defaults.output.dir);
        assert_eq!(parsed.transport.max_wait_ms, defaults.transport.max_wait_ms);
        assert_eq!(
            parsed.transport.request_timeout_ms,
            defaults.transport.request_timeout_ms
        );
    }

    #[test]
    fn validation_rejects_empty_branch() {
        let mut config = SyncConfig::default();
        config.source.branch = " ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validation_rejects_dotted_extension() {
        let mut config = SyncConfig::default();
        config.source.extension = ".md".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validation_rejects_same_subtree() {
        let mut config = SyncConfig::default();
        config.source.images_dir = "recipes".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn request_timeout_defaults_and_rejects_zero() {
        let mut config = SyncConfig::default();
        assert_eq!(config.transport.request_timeout(), Duration::from_secs(30));
        config.transport.request_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validation_rejects_static_dir_outside_output() {
        for static_dir in ["", " ", ".", "..", "../site", "pages/../..", "/srv/www"] {
            let mut config = SyncConfig::default();
            config.output.static_dir = static_dir.into();
            assert!(
                matches!(config.validate(), Err(ConfigError::Validation(_))),
                "accepted static_dir {static_dir:?}"
            );
        }
        let mut config = SyncConfig::default();
        config.output.static_dir = "public/pages".into();
        assert!(config.validate().is_ok());
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("sync.toml")).unwrap();
        assert_eq!(config.source.repo, "recipes-md");
    }

    #[test]
    fn load_config_merges_file_over_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.toml");
        fs::write(
            &path,
            r#"
[source]
owner = "someone"

[transport]
max_wait_ms = 5000
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.source.owner, "someone");
        assert_eq!(config.source.repo, "recipes-md");
        assert_eq!(config.transport.max_wait_ms, 5000);
        assert_eq!(config.transport.max_rate_limit_retries, 5);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn merge_toml_overlay_wins_and_base_survives() {
        let base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"]["x"].as_integer(), Some(1));
        assert_eq!(merged["a"]["y"].as_integer(), Some(3));
    }

    // =========================================================================
    // Layout
    // =========================================================================

    #[test]
    fn layout_recognizes_documents() {
        let layout = RepoLayout::default();
        assert!(layout.is_document("pasta.md"));
        assert!(!layout.is_document("pasta.txt"));
        assert!(!layout.is_document(".md"));
        assert!(!layout.is_document("README"));
        assert_eq!(layout.filename_for("pasta"), "pasta.md");
    }

    #[test]
    fn image_base_url_points_at_raw_images() {
        assert_eq!(
            SyncConfig::default().image_base_url(),
            "https://raw.githubusercontent.com/akofink/recipes-md/main/images"
        );
    }

    // =========================================================================
    // RuntimeEnv
    // =========================================================================

    #[test]
    fn token_resolution_order() {
        let env = RuntimeEnv::from_lookup(lookup(&[
            ("GH_TOKEN", "second"),
            ("RECIPES_GITHUB_TOKEN", "third"),
        ]));
        assert_eq!(env.token.as_deref(), Some("second"));

        let env = RuntimeEnv::from_lookup(lookup(&[("GITHUB_TOKEN", "first"), ("GH_TOKEN", "x")]));
        assert_eq!(env.token.as_deref(), Some("first"));
    }

    #[test]
    fn empty_token_counts_as_unset() {
        let env = RuntimeEnv::from_lookup(lookup(&[("GITHUB_TOKEN", ""), ("GH_TOKEN", "t")]));
        assert_eq!(env.token.as_deref(), Some("t"));
        let env = RuntimeEnv::from_lookup(lookup(&[]));
        assert_eq!(env.token, None);
    }

    #[test]
    fn ci_flag_enables_strict_mode() {
        assert!(RuntimeEnv::from_lookup(lookup(&[("CI", "true")])).strict);
        assert!(RuntimeEnv::from_lookup(lookup(&[("CI", "1")])).strict);
        assert!(!RuntimeEnv::from_lookup(lookup(&[("CI", "false")])).strict);
        assert!(!RuntimeEnv::from_lookup(lookup(&[("CI", "0")])).strict);
        assert!(!RuntimeEnv::from_lookup(lookup(&[])).strict);
    }

    #[test]
    fn max_wait_override_applies() {
        let env = RuntimeEnv::from_lookup(lookup(&[("GENERATE_MAX_WAIT_MS", "3000")]));
        let mut config = SyncConfig::default();
        env.apply(&mut config);
        assert_eq!(config.transport.max_wait_ms, 3000);
    }

    #[test]
    fn unparsable_max_wait_is_ignored() {
        let env = RuntimeEnv::from_lookup(lookup(&[("GENERATE_MAX_WAIT_MS", "soon")]));
        let mut config = SyncConfig::default();
        env.apply(&mut config);
        assert_eq!(config.transport.max_wait_ms, 120_000);
    }
}
