//! TOML-based configuration for dotmirror.
//!
//! Secrets are never stored in the file. The `[remote]` section names the
//! environment variables holding the token (and, when absent from the file,
//! the URL and username); they are read at runtime by
//! [`MirrorConfig::resolve_env_vars`].

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conflict::ResolutionStrategy;
use crate::errors::ConfigError;
use crate::filter::ScopeRules;
use crate::git::{CommitAuthor, Credentials};
use crate::report::DEFAULT_REPORT_LIMIT;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Source / mirror directories and scope rules.
    #[serde(default)]
    pub mirror: MirrorSection,

    /// Remote repository settings.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Commit identity.
    #[serde(default)]
    pub commit: CommitConfig,

    /// Conflict handling.
    #[serde(default)]
    pub conflicts: ConflictConfig,

    /// Notification settings.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

// ---------------------------------------------------------------------------
// [mirror]
// ---------------------------------------------------------------------------

/// What to mirror and how often.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSection {
    /// Directory being mirrored (default `~/.config`).
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Git working tree receiving the mirror (default `~/.config_sync_repo`).
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,

    /// Glob patterns a path must match to be mirrored (empty = everything).
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns that are never mirrored. Always wins over `include`.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Seconds between flushes of settled changes (default 5).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Extra logging and a startup banner.
    #[serde(default)]
    pub verbose: bool,

    /// Remove mirror entries with no in-scope source counterpart on start.
    #[serde(default)]
    pub prune_stale: bool,

    /// Entries per kind shown in change reports (default 5).
    #[serde(default = "default_report_limit")]
    pub report_limit: usize,
}

fn default_source_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".config"))
        .unwrap_or_else(|| PathBuf::from("~/.config"))
}
fn default_repo_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".config_sync_repo"))
        .unwrap_or_else(|| PathBuf::from("~/.config_sync_repo"))
}
fn default_sync_interval() -> u64 {
    5
}
fn default_report_limit() -> usize {
    DEFAULT_REPORT_LIMIT
}

impl Default for MirrorSection {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            repo_dir: default_repo_dir(),
            include: Vec::new(),
            exclude: Vec::new(),
            sync_interval_secs: default_sync_interval(),
            verbose: false,
            prune_stale: false,
            report_limit: default_report_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// [remote]
// ---------------------------------------------------------------------------

/// Remote repository configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote URL. Falls back to the `url_env` variable.
    #[serde(default)]
    pub url: Option<String>,

    /// Username for HTTPS remotes. Falls back to the `username_env` variable.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the remote URL.
    #[serde(default = "default_url_env")]
    pub url_env: String,

    /// Environment variable holding the username.
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Environment variable holding the access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Branch to pull and push.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Resolved token (not serialized).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_url_env() -> String {
    "GITHUB_REPO_URL".into()
}
fn default_username_env() -> String {
    "GITHUB_USERNAME".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_branch() -> String {
    "main".into()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            url_env: default_url_env(),
            username_env: default_username_env(),
            token_env: default_token_env(),
            branch: default_branch(),
            token: None,
        }
    }
}

impl RemoteConfig {
    /// Username/token pair, when both are known.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.token) {
            (Some(username), Some(token)) => Some(Credentials {
                username: username.clone(),
                token: token.clone(),
            }),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// [commit]
// ---------------------------------------------------------------------------

/// Identity recorded on sync commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_author_name() -> String {
    CommitAuthor::default().name
}
fn default_author_email() -> String {
    CommitAuthor::default().email
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

impl CommitConfig {
    pub fn author(&self) -> CommitAuthor {
        CommitAuthor {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// [conflicts]
// ---------------------------------------------------------------------------

/// How conflict strategies are chosen.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategySetting {
    /// Ask interactively (falls back to merge without a terminal).
    #[default]
    Prompt,
    Local,
    Remote,
    Merge,
}

impl StrategySetting {
    /// The fixed strategy, or `None` when the user should be asked.
    pub fn fixed(self) -> Option<ResolutionStrategy> {
        match self {
            Self::Prompt => None,
            Self::Local => Some(ResolutionStrategy::KeepLocal),
            Self::Remote => Some(ResolutionStrategy::KeepRemote),
            Self::Merge => Some(ResolutionStrategy::MergeBoth),
        }
    }
}

/// Conflict handling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictConfig {
    #[serde(default)]
    pub strategy: StrategySetting,
}

// ---------------------------------------------------------------------------
// [notifications]
// ---------------------------------------------------------------------------

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Show desktop notifications.
    #[serde(default = "default_true")]
    pub desktop: bool,

    /// Application name shown in notification titles.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Directory for the daily-rolling log file.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_app_name() -> String {
    "Config Handler".into()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            desktop: true,
            app_name: default_app_name(),
            log_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl MirrorConfig {
    /// Load a [`MirrorConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let mut config: MirrorConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.expand_paths();

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Fill the token, and the URL / username when the file leaves them
    /// out, from the configured environment variables.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if self.remote.url.is_none() {
            self.remote.url = resolve_optional_env(&self.remote.url_env, "remote.url_env");
        }
        if self.remote.username.is_none() {
            self.remote.username =
                resolve_optional_env(&self.remote.username_env, "remote.username_env");
        }
        self.remote.token = resolve_optional_env(&self.remote.token_env, "remote.token_env");

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let source = &self.mirror.source_dir;
        let repo = &self.mirror.repo_dir;

        if source.as_os_str().is_empty() {
            return Err(invalid("mirror.source_dir", "source directory must not be empty"));
        }
        if repo.as_os_str().is_empty() {
            return Err(invalid("mirror.repo_dir", "repository directory must not be empty"));
        }
        let source_norm = normalize(source);
        let repo_norm = normalize(repo);
        if source_norm == repo_norm {
            return Err(invalid(
                "mirror.repo_dir",
                "repository directory must differ from the source directory",
            ));
        }
        if repo_norm.starts_with(&source_norm) {
            return Err(invalid(
                "mirror.repo_dir",
                "repository directory must not be inside the source directory",
            ));
        }
        if self.mirror.sync_interval_secs == 0 {
            return Err(invalid("mirror.sync_interval_secs", "sync interval must be > 0"));
        }
        match &self.remote.url {
            Some(url) if !url.trim().is_empty() => {}
            _ => {
                return Err(invalid(
                    "remote.url",
                    &format!("remote URL must be set in the file or via ${}", self.remote.url_env),
                ))
            }
        }
        if self.remote.branch.trim().is_empty() {
            return Err(invalid("remote.branch", "branch must not be empty"));
        }

        Ok(())
    }

    /// Fail if the source directory cannot be listed.
    pub fn ensure_source_readable(&self) -> Result<(), ConfigError> {
        std::fs::read_dir(&self.mirror.source_dir)
            .map(|_| ())
            .map_err(|source| ConfigError::SourceUnreadable {
                path: self.mirror.source_dir.clone(),
                source,
            })
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Replace a leading `~` in the directory settings with the home
    /// directory.
    pub fn expand_paths(&mut self) {
        self.mirror.source_dir = expand_tilde(&self.mirror.source_dir);
        self.mirror.repo_dir = expand_tilde(&self.mirror.repo_dir);
        if let Some(dir) = &self.notifications.log_dir {
            self.notifications.log_dir = Some(expand_tilde(dir));
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.mirror.sync_interval_secs)
    }

    /// Build the scope rules, dropping unparsable patterns with a warning.
    pub fn scope_rules(&self) -> ScopeRules {
        ScopeRules::new(&self.mirror.include, &self.mirror.exclude)
    }

    /// Sample configuration printed by `dotmirror init-config`.
    pub fn default_template() -> &'static str {
        r#"# dotmirror configuration

[mirror]
# Directory to mirror.
source_dir = "~/.config"
# Git working tree that receives the mirror.
repo_dir = "~/.config_sync_repo"
# Only mirror paths matching one of these globs (empty = everything).
include = []
# Never mirror paths matching these globs. Wins over include.
exclude = ["**/*.log", "**/Cache/**", "**/*.tmp"]
sync_interval_secs = 5
verbose = false
# Remove mirror entries that no longer exist at the source on startup.
prune_stale = false
report_limit = 5

[remote]
# url = "https://github.com/you/dotfiles.git"
# username = "you"
url_env = "GITHUB_REPO_URL"
username_env = "GITHUB_USERNAME"
token_env = "GITHUB_TOKEN"
branch = "main"

[commit]
author_name = "Config Handler"
author_email = "config-handler@automatic.com"

[conflicts]
# prompt | local | remote | merge
strategy = "prompt"

[notifications]
desktop = true
app_name = "Config Handler"
# log_dir = "~/.config_handler/logs"
"#
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Lexically resolve `.` and `..` so paths can be compared.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[mirror]
source_dir = "/home/u/.config"
repo_dir = "/home/u/.config_sync_repo"
include = ["i3/**", "polybar/**"]
exclude = ["**/*.log"]
sync_interval_secs = 10
verbose = true

[remote]
url = "https://github.com/u/dotfiles.git"
username = "u"
token_env = "DOTMIRROR_TEST_TOKEN_PARSE"

[conflicts]
strategy = "remote"

[notifications]
desktop = false
"#
    }

    fn valid_config() -> MirrorConfig {
        let mut config: MirrorConfig = toml::from_str(sample_toml()).unwrap();
        config.expand_paths();
        config
    }

    #[test]
    fn test_parse_full_config() {
        let config = valid_config();
        assert_eq!(config.mirror.source_dir, PathBuf::from("/home/u/.config"));
        assert_eq!(config.mirror.include, vec!["i3/**", "polybar/**"]);
        assert_eq!(config.mirror.sync_interval_secs, 10);
        assert!(config.mirror.verbose);
        assert_eq!(config.mirror.report_limit, 5);
        assert_eq!(config.remote.branch, "main");
        assert_eq!(config.conflicts.strategy, StrategySetting::Remote);
        assert_eq!(config.conflicts.strategy.fixed(), Some(ResolutionStrategy::KeepRemote));
        assert!(!config.notifications.desktop);
        assert_eq!(config.commit.author_name, "Config Handler");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(sample_toml().as_bytes()).unwrap();
        let config = MirrorConfig::load_from_file(tmp.path()).unwrap();
        assert_eq!(config.remote.username.as_deref(), Some("u"));
    }

    #[test]
    fn test_load_and_resolve() {
        std::env::set_var("DOTMIRROR_TEST_TOKEN_PARSE", "ghp_loaded");
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(sample_toml().as_bytes()).unwrap();

        let config = MirrorConfig::load_and_resolve(tmp.path()).unwrap();
        assert_eq!(config.remote.token.as_deref(), Some("ghp_loaded"));
        assert_eq!(config.remote.url.as_deref(), Some("https://github.com/u/dotfiles.git"));
        std::env::remove_var("DOTMIRROR_TEST_TOKEN_PARSE");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(sample_toml().replace("sync_interval_secs = 10", "sync_interval_secs = 0").as_bytes())
            .unwrap();
        assert!(matches!(
            MirrorConfig::load_and_resolve(bad.path()),
            Err(ConfigError::InvalidValue { field, .. }) if field == "mirror.sync_interval_secs"
        ));
    }

    #[test]
    fn test_file_not_found() {
        let result = MirrorConfig::load_from_file("/nonexistent/dotmirror.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"[mirror\nsource_dir = 1").unwrap();
        let result = MirrorConfig::load_from_file(tmp.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_same_dirs() {
        let mut config = valid_config();
        config.mirror.repo_dir = PathBuf::from("/home/u/.config/");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "mirror.repo_dir"
        ));
    }

    #[test]
    fn test_validate_rejects_repo_inside_source() {
        let mut config = valid_config();
        config.mirror.repo_dir = PathBuf::from("/home/u/.config/./mirror");
        assert!(config.validate().is_err());

        // A sibling sharing a name prefix is fine.
        config.mirror.repo_dir = PathBuf::from("/home/u/.config_mirror");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_missing_url() {
        let mut config = valid_config();
        config.mirror.sync_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.remote.url = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "remote.url"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        let mut config = valid_config();
        config.remote.url = None;
        config.remote.url_env = "DOTMIRROR_TEST_URL_RESOLVE".into();
        config.remote.token_env = "DOTMIRROR_TEST_TOKEN_RESOLVE".into();
        std::env::set_var("DOTMIRROR_TEST_URL_RESOLVE", "https://example.com/d.git");
        std::env::set_var("DOTMIRROR_TEST_TOKEN_RESOLVE", "s3cret");

        config.resolve_env_vars().unwrap();
        assert_eq!(config.remote.url.as_deref(), Some("https://example.com/d.git"));
        assert_eq!(config.remote.token.as_deref(), Some("s3cret"));
        // The file value wins over the environment.
        assert_eq!(config.remote.username.as_deref(), Some("u"));

        let creds = config.remote.credentials().unwrap();
        assert_eq!(creds.username, "u");
        assert!(!format!("{creds:?}").contains("s3cret"));

        std::env::remove_var("DOTMIRROR_TEST_URL_RESOLVE");
        std::env::remove_var("DOTMIRROR_TEST_TOKEN_RESOLVE");
    }

    #[test]
    fn test_defaults() {
        let config: MirrorConfig = toml::from_str("").unwrap();
        assert_eq!(config.mirror.sync_interval_secs, 5);
        assert!(config.mirror.source_dir.ends_with(".config"));
        assert!(config.mirror.repo_dir.ends_with(".config_sync_repo"));
        assert_eq!(config.remote.token_env, "GITHUB_TOKEN");
        assert_eq!(config.conflicts.strategy, StrategySetting::Prompt);
        assert!(config.notifications.desktop);
        assert_eq!(config.notifications.app_name, "Config Handler");
    }

    #[test]
    fn test_default_template_parses() {
        let config: MirrorConfig = toml::from_str(MirrorConfig::default_template()).unwrap();
        assert_eq!(config.mirror.exclude.len(), 3);
        assert_eq!(config.conflicts.strategy, StrategySetting::Prompt);
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.config")), home.join(".config"));
        }
        assert_eq!(expand_tilde(Path::new("/etc/xdg")), PathBuf::from("/etc/xdg"));
    }

    #[test]
    fn test_source_unreadable() {
        let mut config = valid_config();
        config.mirror.source_dir = PathBuf::from("/nonexistent/dotmirror/source");
        assert!(matches!(
            config.ensure_source_readable(),
            Err(ConfigError::SourceUnreadable { .. })
        ));
    }
}
