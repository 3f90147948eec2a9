//! TOML configuration: global settings, sources, cleanup jobs and
//! User-Agent overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::cleanup::{CleanupRule, CleanupTask};
use crate::fetch::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_FETCH_ATTEMPTS, DEFAULT_MAX_REDIRECTS, DEFAULT_READ_TIMEOUT,
    Fetch, FetchSettings, RetryPolicy, UserAgentOverrides,
};
use crate::identifier::{Comparator, Identifier, IdentifierError};
use crate::registry::DEFAULT_REFRESH_INTERVAL;
use crate::scheduler::{DEFAULT_POLL_INTERVAL, ScheduledTask};
use crate::source::{FeedSource, HtmlSource, LinkSelector, PathRewrite, Source, SourceError};

const APP_DIR: &str = "automate";
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_LINK_ATTRIBUTE: &str = "href";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("invalid TOML: {0}")]
    Syntax(#[from] toml::de::Error),

    #[error("Invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        field: String,
        value: String,
        expected: String,
    },

    #[error("duplicate task name `{name}`")]
    DuplicateName { name: String },

    #[error("invalid URL for `{name}`: {source}")]
    Url {
        name: String,
        #[source]
        source: IdentifierError,
    },

    #[error("source `{name}`: {source}")]
    Source {
        name: String,
        #[source]
        source: SourceError,
    },

    #[error("cleanup `{name}`: invalid pattern `{pattern}`: {source}")]
    Pattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, value: impl ToString, expected: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    fn for_source(name: &str, source: SourceError) -> Self {
        Self::Source {
            name: name.to_string(),
            source,
        }
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
    #[serde(default, rename = "cleanup")]
    pub cleanups: Vec<CleanupConfig>,
    #[serde(default, rename = "user_agent")]
    pub user_agents: Vec<UserAgentConfig>,
}

/// `[settings]`. Unset values fall back to built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Pause between poll cycles for tasks without their own interval.
    pub poll_interval_secs: Option<u64>,
    /// Lifetime of the download registry cache.
    pub cache_refresh_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    /// Total timeout for feed/page fetches and redirect resolution.
    pub read_timeout_secs: Option<u64>,
    /// Total timeout for one file transfer.
    pub download_timeout_secs: Option<u64>,
    pub max_redirects: Option<usize>,
    /// Attempts per feed/page fetch, including the first.
    pub fetch_attempts: Option<u32>,
    /// How long tasks get to finish after a stop request.
    pub shutdown_grace_secs: Option<u64>,
    /// Where downloaded files are stored.
    pub output_dir: Option<PathBuf>,
    /// Where the download history database lives.
    pub state_dir: Option<PathBuf>,
    pub verbosity: Option<VerbositySetting>,
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// RSS or Atom feed with enclosures.
    Feed,
    /// HTML page scraped with CSS selectors.
    Html,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Html => "html",
        }
    }
}

/// One `[[source]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub compare: Comparator,
    pub title_pattern: Option<String>,
    pub title_prefix: Option<String>,
    #[serde(default)]
    pub skip_categories: Vec<String>,
    pub link_selector: Option<String>,
    pub link_attribute: Option<String>,
    pub follow_selector: Option<String>,
    pub follow_attribute: Option<String>,
    pub rewrite_pattern: Option<String>,
    pub rewrite_replacement: Option<String>,
    #[serde(default)]
    pub save_as_from_title: bool,
    /// Program and arguments run on each finished download; the file path is appended.
    pub finish_command: Option<Vec<String>>,
}

/// One `[[cleanup]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupConfig {
    pub name: String,
    pub root: PathBuf,
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub remove_dirs: Vec<String>,
    #[serde(default)]
    pub remove_files: Vec<RemoveFilesConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveFilesConfig {
    pub pattern: String,
    pub first_line: Option<String>,
}

/// One `[[user_agent]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserAgentConfig {
    pub host: String,
    pub value: String,
}

impl FileConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Syntax`] for malformed TOML or unknown keys, and
    /// the validation errors of [`FileConfig::validate`].
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values that TOML typing alone cannot.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value, empty or duplicate name,
    /// malformed URL, invalid regex or invalid selector.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;

        let mut names = HashSet::new();
        for name in self.task_names() {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("name", "\"\"", "a non-empty task name"));
            }
            if !names.insert(name) {
                return Err(ConfigError::DuplicateName {
                    name: name.to_string(),
                });
            }
        }

        for source in &self.sources {
            source.validate()?;
        }
        for cleanup in &self.cleanups {
            cleanup.validate()?;
        }
        for agent in &self.user_agents {
            if agent.host.trim().is_empty() {
                return Err(ConfigError::invalid("user_agent.host", "\"\"", "a host name"));
            }
        }
        Ok(())
    }

    /// Task names in file order, sources first.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.sources
            .iter()
            .map(|s| s.name.as_str())
            .chain(self.cleanups.iter().map(|c| c.name.as_str()))
            .collect()
    }

    /// Built-in overrides plus the configured ones.
    #[must_use]
    pub fn user_agent_overrides(&self) -> UserAgentOverrides {
        let mut overrides = UserAgentOverrides::with_builtin();
        for agent in &self.user_agents {
            overrides.insert(&agent.host, &agent.value);
        }
        overrides
    }

    /// Builds every configured source.
    ///
    /// # Errors
    ///
    /// Returns the first source that cannot be built.
    pub fn build_sources(&self, fetch: &Arc<dyn Fetch>) -> Result<Vec<Arc<dyn Source>>, ConfigError> {
        self.sources
            .iter()
            .map(|source| source.build(fetch.clone()))
            .collect()
    }

    /// Cleanup jobs as schedulable tasks, in file order.
    ///
    /// # Errors
    ///
    /// Returns the first cleanup job that cannot be built.
    pub fn cleanup_tasks(&self) -> Result<Vec<ScheduledTask>, ConfigError> {
        let default_interval = self.settings.poll_interval();
        self.cleanups
            .iter()
            .map(|cleanup| {
                Ok(ScheduledTask::new(
                    Arc::new(cleanup.build()?),
                    interval_or(cleanup.interval_secs, default_interval),
                ))
            })
            .collect()
    }
}

impl Settings {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_range("poll_interval_secs", self.poll_interval_secs, 1..=86_400)?;
        validate_range("cache_refresh_secs", self.cache_refresh_secs, 1..=604_800)?;
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1..=3600)?;
        validate_range("read_timeout_secs", self.read_timeout_secs, 1..=3600)?;
        validate_range("download_timeout_secs", self.download_timeout_secs, 1..=86_400)?;
        validate_range("max_redirects", self.max_redirects, 0..=50)?;
        validate_range("fetch_attempts", self.fetch_attempts, 1..=10)?;
        validate_range("shutdown_grace_secs", self.shutdown_grace_secs, 0..=300)?;
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_secs
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs)
    }

    #[must_use]
    pub fn cache_refresh(&self) -> Duration {
        self.cache_refresh_secs
            .map_or(DEFAULT_REFRESH_INTERVAL, Duration::from_secs)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(
            self.shutdown_grace_secs
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        )
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Configured state directory, else the platform data directory.
    #[must_use]
    pub fn state_dir(&self) -> Option<PathBuf> {
        self.state_dir.clone().or_else(resolve_default_state_dir)
    }

    /// Settings for feed/page fetches and redirect resolution.
    #[must_use]
    pub fn poll_fetch_settings(&self, user_agents: UserAgentOverrides) -> FetchSettings {
        let timeout = self
            .read_timeout_secs
            .map_or(DEFAULT_READ_TIMEOUT, Duration::from_secs);
        self.fetch_settings(timeout, user_agents)
    }

    /// Settings for file transfers.
    #[must_use]
    pub fn download_fetch_settings(&self, user_agents: UserAgentOverrides) -> FetchSettings {
        let timeout = self
            .download_timeout_secs
            .map_or(DEFAULT_DOWNLOAD_TIMEOUT, Duration::from_secs);
        self.fetch_settings(timeout, user_agents)
    }

    fn fetch_settings(&self, timeout: Duration, user_agents: UserAgentOverrides) -> FetchSettings {
        FetchSettings {
            connect_timeout: self
                .connect_timeout_secs
                .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs),
            timeout,
            max_redirects: self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
            retry: RetryPolicy::with_max_attempts(
                self.fetch_attempts.unwrap_or(DEFAULT_FETCH_ATTEMPTS),
            ),
            user_agents,
        }
    }
}

impl SourceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let field = |key: &str| format!("source.{}.{key}", self.name);

        validate_range(&field("interval_secs"), self.interval_secs, 1..=86_400)?;
        Identifier::parse(&self.url).map_err(|source| ConfigError::Url {
            name: self.name.clone(),
            source,
        })?;

        match self.kind {
            SourceKind::Html => {
                if self.link_selector.is_none() {
                    return Err(ConfigError::invalid(
                        field("link_selector"),
                        "<missing>",
                        "a CSS selector for html sources",
                    ));
                }
            }
            SourceKind::Feed => {
                if self.link_selector.is_some() || self.follow_selector.is_some() {
                    return Err(ConfigError::invalid(
                        field("link_selector"),
                        "<set>",
                        "no selectors on feed sources",
                    ));
                }
            }
        }
        if self.rewrite_pattern.is_some() != self.rewrite_replacement.is_some() {
            return Err(ConfigError::invalid(
                field("rewrite_pattern"),
                self.rewrite_pattern.as_deref().unwrap_or("<missing>"),
                "`rewrite_pattern` and `rewrite_replacement` together",
            ));
        }
        if let Some(argv) = &self.finish_command
            && argv.first().is_none_or(|program| program.trim().is_empty())
        {
            return Err(ConfigError::invalid(
                field("finish_command"),
                "[]",
                "a program followed by its arguments",
            ));
        }

        self.build_parts().map(|_| ())
    }

    /// Poll interval for this source.
    #[must_use]
    pub fn interval(&self, default: Duration) -> Duration {
        interval_or(self.interval_secs, default)
    }

    /// Builds the configured source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed URL, pattern or selector.
    pub fn build(&self, fetch: Arc<dyn Fetch>) -> Result<Arc<dyn Source>, ConfigError> {
        let url = Identifier::parse(&self.url).map_err(|source| ConfigError::Url {
            name: self.name.clone(),
            source,
        })?;
        let parts = self.build_parts()?;

        let source: Arc<dyn Source> = match self.kind {
            SourceKind::Feed => {
                let mut feed = FeedSource::new(&self.name, url, fetch)
                    .with_comparator(self.compare)
                    .with_skip_categories(&self.skip_categories)
                    .with_save_as_from_title(self.save_as_from_title)
                    .with_finish_command(self.finish_command.clone());
                if let Some(pattern) = &self.title_pattern {
                    feed = feed
                        .with_title_pattern(pattern)
                        .map_err(|e| ConfigError::for_source(&self.name, e))?;
                }
                if let Some(prefix) = &self.title_prefix {
                    feed = feed.with_title_prefix(prefix);
                }
                if let Some(rewrite) = parts.rewrite {
                    feed = feed.with_rewrite(rewrite);
                }
                Arc::new(feed)
            }
            SourceKind::Html => {
                let Some(links) = parts.links else {
                    return Err(ConfigError::invalid(
                        format!("source.{}.link_selector", self.name),
                        "<missing>",
                        "a CSS selector for html sources",
                    ));
                };
                let mut html = HtmlSource::new(&self.name, url, links, fetch)
                    .with_comparator(self.compare)
                    .with_finish_command(self.finish_command.clone());
                if let Some(follow) = parts.follow {
                    html = html.with_follow(follow);
                }
                if let Some(rewrite) = parts.rewrite {
                    html = html.with_rewrite(rewrite);
                }
                Arc::new(html)
            }
        };
        Ok(source)
    }

    fn build_parts(&self) -> Result<SourceParts, ConfigError> {
        let selector = |css: Option<&String>, attribute: Option<&String>| {
            css.map(|css| {
                LinkSelector::new(
                    css,
                    attribute.map_or(DEFAULT_LINK_ATTRIBUTE, String::as_str),
                )
                .map_err(|e| ConfigError::for_source(&self.name, e))
            })
            .transpose()
        };

        let rewrite = match (&self.rewrite_pattern, &self.rewrite_replacement) {
            (Some(pattern), Some(replacement)) => Some(
                PathRewrite::new(pattern, replacement.as_str())
                    .map_err(|e| ConfigError::for_source(&self.name, e))?,
            ),
            _ => None,
        };
        if let Some(pattern) = &self.title_pattern {
            regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| {
                    ConfigError::for_source(&self.name, SourceError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
                })?;
        }

        Ok(SourceParts {
            links: selector(self.link_selector.as_ref(), self.link_attribute.as_ref())?,
            follow: selector(self.follow_selector.as_ref(), self.follow_attribute.as_ref())?,
            rewrite,
        })
    }
}

struct SourceParts {
    links: Option<LinkSelector>,
    follow: Option<LinkSelector>,
    rewrite: Option<PathRewrite>,
}

impl CleanupConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_range(
            &format!("cleanup.{}.interval_secs", self.name),
            self.interval_secs,
            1..=86_400,
        )?;
        if self.remove_dirs.is_empty() && self.remove_files.is_empty() {
            return Err(ConfigError::invalid(
                format!("cleanup.{}", self.name),
                "<empty>",
                "at least one of `remove_dirs` or `remove_files`",
            ));
        }
        self.build().map(|_| ())
    }

    /// Builds the cleanup task.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pattern`] for a file pattern that does not compile.
    pub fn build(&self) -> Result<CleanupTask, ConfigError> {
        let mut rules: Vec<CleanupRule> = self
            .remove_dirs
            .iter()
            .map(|name| CleanupRule::RemoveDir { name: name.clone() })
            .collect();
        for files in &self.remove_files {
            let pattern = Regex::new(&files.pattern).map_err(|source| ConfigError::Pattern {
                name: self.name.clone(),
                pattern: files.pattern.clone(),
                source,
            })?;
            rules.push(CleanupRule::RemoveFiles {
                pattern,
                first_line: files.first_line.clone(),
            });
        }
        Ok(CleanupTask::new(&self.name, &self.root, rules))
    }
}

fn interval_or(secs: Option<u64>, default: Duration) -> Duration {
    secs.map_or(default, Duration::from_secs)
}

fn validate_range<T>(
    field: &str,
    value: Option<T>,
    range: std::ops::RangeInclusive<T>,
) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    let Some(value) = value else {
        return Ok(());
    };
    if !range.contains(&value) {
        return Err(ConfigError::invalid(
            field,
            &value,
            format!("range: {}..={}", range.start(), range.end()),
        ));
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed config; defaults when no file was loaded.
    pub config: FileConfig,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/automate/config.toml`
/// 2. `$HOME/.config/automate/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

/// Resolves the default state directory.
///
/// Priority:
/// 1. `$XDG_DATA_HOME/automate`
/// 2. `$HOME/.local/share/automate`
#[must_use]
pub fn resolve_default_state_dir() -> Option<PathBuf> {
    if let Some(xdg_data_home) = env_var_non_empty_os("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg_data_home).join(APP_DIR));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".local").join("share").join(APP_DIR))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads `explicit` if given (it must exist), else the default path if it
/// exists, else built-in defaults.
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] for a missing explicit file, and
/// [`ConfigError::Read`] or [`ConfigError::File`] when a file cannot be
/// read or parsed.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: load_file_config(path)?,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: FileConfig::default(),
            loaded_from_file: false,
        }),
    }
}

/// Reads and parses one config file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] or [`ConfigError::File`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::from_toml_str(&raw).map_err(|e| ConfigError::File {
        path: path.to_path_buf(),
        source: Box::new(e),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::StubFetch;

    const FULL: &str = r#"
[settings]
poll_interval_secs = 600
cache_refresh_secs = 1800
fetch_attempts = 5
output_dir = "/srv/downloads"
verbosity = "verbose"

[[source]]
name = "trailers"
kind = "feed"
url = "https://trailers.example.com/rss.xml"
compare = "basename"
title_pattern = "\\b(official|teaser)\\b"
skip_categories = ["Documentary"]
save_as_from_title = true

[[source]]
name = "walls"
kind = "html"
url = "https://walls.example.com/latest"
interval_secs = 300
link_selector = "a.wallpaper"
follow_selector = "a#download"
rewrite_pattern = "/thumbs/"
rewrite_replacement = "/full/"
finish_command = ["jpegoptim", "--strip-all"]

[[cleanup]]
name = "opera"
root = "/home/me/Documents"
remove_dirs = ["webkit"]

[[cleanup.remove_files]]
pattern = '^opr[\dA-F]{3,4}\.tmp$'
first_line = "Opera Hotlist version 2.0"

[[user_agent]]
host = "video.example.com"
value = "VLC/3.0"
"#;

    fn invalid_field(error: &ConfigError) -> String {
        match error {
            ConfigError::Invalid { field, .. } => field.clone(),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    // ==================== Parsing ====================

    #[test]
    fn test_parse_full_config() {
        let config = FileConfig::from_toml_str(FULL).unwrap();

        assert_eq!(config.settings.poll_interval(), Duration::from_secs(600));
        assert_eq!(config.settings.cache_refresh(), Duration::from_secs(1800));
        assert_eq!(config.settings.output_dir(), PathBuf::from("/srv/downloads"));
        assert_eq!(config.settings.verbosity, Some(VerbositySetting::Verbose));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].compare, Comparator::Basename);
        assert_eq!(config.sources[1].kind, SourceKind::Html);
        assert_eq!(
            config.sources[1].interval(DEFAULT_POLL_INTERVAL),
            Duration::from_secs(300)
        );
        assert_eq!(config.cleanups[0].remove_files.len(), 1);
        assert_eq!(config.user_agents[0].value, "VLC/3.0");
        assert_eq!(config.task_names(), vec!["trailers", "walls", "opera"]);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = FileConfig::from_toml_str("").unwrap();
        assert!(config.sources.is_empty());
        assert_eq!(config.settings.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(config.settings.cache_refresh(), DEFAULT_REFRESH_INTERVAL);
        assert_eq!(config.settings.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.settings.output_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let error = FileConfig::from_toml_str("[settings]\nconcurrency = 4\n").unwrap_err();
        assert!(matches!(error, ConfigError::Syntax(_)));
        assert!(error.to_string().contains("concurrency"));
    }

    #[test]
    fn test_rejects_unknown_comparator() {
        let raw = r#"
[[source]]
name = "a"
kind = "feed"
url = "https://example.com/rss"
compare = "fuzzy"
"#;
        assert!(matches!(
            FileConfig::from_toml_str(raw).unwrap_err(),
            ConfigError::Syntax(_)
        ));
    }

    // ==================== Validation ====================

    #[test]
    fn test_rejects_out_of_range_poll_interval() {
        let error = FileConfig::from_toml_str("[settings]\npoll_interval_secs = 0\n").unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid config value for `poll_interval_secs`: 0. Expected range: 1..=86400"
        );
    }

    #[test]
    fn test_rejects_out_of_range_fetch_attempts() {
        let error = FileConfig::from_toml_str("[settings]\nfetch_attempts = 11\n").unwrap_err();
        assert_eq!(invalid_field(&error), "fetch_attempts");
    }

    #[test]
    fn test_rejects_duplicate_task_names_across_kinds() {
        let raw = r#"
[[source]]
name = "shared"
kind = "feed"
url = "https://example.com/rss"

[[cleanup]]
name = "shared"
root = "/tmp"
remove_dirs = ["cache"]
"#;
        let error = FileConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(error, ConfigError::DuplicateName { name } if name == "shared"));
    }

    #[test]
    fn test_rejects_empty_name() {
        let raw = "[[source]]\nname = \" \"\nkind = \"feed\"\nurl = \"https://example.com/rss\"\n";
        assert_eq!(invalid_field(&FileConfig::from_toml_str(raw).unwrap_err()), "name");
    }

    #[test]
    fn test_rejects_malformed_source_url() {
        let raw = "[[source]]\nname = \"a\"\nkind = \"feed\"\nurl = \"not a url\"\n";
        assert!(matches!(
            FileConfig::from_toml_str(raw).unwrap_err(),
            ConfigError::Url { .. }
        ));
    }

    #[test]
    fn test_rejects_invalid_title_pattern() {
        let raw = r#"
[[source]]
name = "a"
kind = "feed"
url = "https://example.com/rss"
title_pattern = "(unclosed"
"#;
        assert!(matches!(
            FileConfig::from_toml_str(raw).unwrap_err(),
            ConfigError::Source { .. }
        ));
    }

    #[test]
    fn test_rejects_html_source_without_selector() {
        let raw = "[[source]]\nname = \"a\"\nkind = \"html\"\nurl = \"https://example.com/\"\n";
        assert_eq!(
            invalid_field(&FileConfig::from_toml_str(raw).unwrap_err()),
            "source.a.link_selector"
        );
    }

    #[test]
    fn test_rejects_rewrite_without_replacement() {
        let raw = r#"
[[source]]
name = "a"
kind = "html"
url = "https://example.com/"
link_selector = "a"
rewrite_pattern = "/thumbs/"
"#;
        assert_eq!(
            invalid_field(&FileConfig::from_toml_str(raw).unwrap_err()),
            "source.a.rewrite_pattern"
        );
    }

    #[test]
    fn test_rejects_invalid_cleanup_pattern() {
        let raw = r#"
[[cleanup]]
name = "logs"
root = "/tmp"

[[cleanup.remove_files]]
pattern = "[unclosed"
"#;
        assert!(matches!(
            FileConfig::from_toml_str(raw).unwrap_err(),
            ConfigError::Pattern { .. }
        ));
    }

    #[test]
    fn test_rejects_cleanup_without_rules() {
        let raw = "[[cleanup]]\nname = \"noop\"\nroot = \"/tmp\"\n";
        assert_eq!(
            invalid_field(&FileConfig::from_toml_str(raw).unwrap_err()),
            "cleanup.noop"
        );
    }

    // ==================== Building ====================

    #[test]
    fn test_builds_sources_and_cleanup_tasks() {
        let config = FileConfig::from_toml_str(FULL).unwrap();
        let fetch: Arc<dyn Fetch> = Arc::new(StubFetch::new());

        let sources = config.build_sources(&fetch).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["trailers", "walls"]);
        assert_eq!(sources[0].comparator(), Comparator::Basename);

        let cleanups = config.cleanup_tasks().unwrap();
        assert_eq!(cleanups.len(), 1);
        assert_eq!(cleanups[0].name(), "opera");
        assert_eq!(cleanups[0].interval, Duration::from_secs(600));
    }

    #[test]
    fn test_user_agent_overrides_include_builtin() {
        let config = FileConfig::from_toml_str(FULL).unwrap();
        let overrides = config.user_agent_overrides();
        assert_eq!(overrides.for_host("trailers.apple.com"), Some("QuickTime"));
        assert_eq!(overrides.for_host("video.example.com"), Some("VLC/3.0"));
    }

    #[test]
    fn test_fetch_settings_use_separate_timeouts() {
        let config = FileConfig::from_toml_str(
            "[settings]\nread_timeout_secs = 20\ndownload_timeout_secs = 7200\nfetch_attempts = 4\n",
        )
        .unwrap();
        let poll = config
            .settings
            .poll_fetch_settings(UserAgentOverrides::default());
        let download = config
            .settings
            .download_fetch_settings(UserAgentOverrides::default());
        assert_eq!(poll.timeout, Duration::from_secs(20));
        assert_eq!(download.timeout, Duration::from_secs(7200));
        assert_eq!(poll.retry.max_attempts(), 4);
        assert_eq!(poll.max_redirects, DEFAULT_MAX_REDIRECTS);
    }

    #[test]
    fn test_fetch_settings_default_to_fetcher_defaults() {
        let settings = Settings::default();
        let poll = settings.poll_fetch_settings(UserAgentOverrides::default());
        let download = settings.download_fetch_settings(UserAgentOverrides::default());
        assert_eq!(poll.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(poll.timeout, DEFAULT_READ_TIMEOUT);
        assert_eq!(download.timeout, DEFAULT_DOWNLOAD_TIMEOUT);
        assert_eq!(download.max_redirects, DEFAULT_MAX_REDIRECTS);
    }

    // ==================== Loading ====================

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let error = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(error, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, FULL).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert!(loaded.loaded_from_file);
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.sources.len(), 2);
    }

    #[test]
    fn test_file_errors_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[settings]\npoll_interval_secs = 0\n").unwrap();

        let error = load_file_config(&path).unwrap_err();
        assert!(error.to_string().contains("config.toml"));
        assert!(matches!(error, ConfigError::File { .. }));
    }

    #[test]
    fn test_verbosity_as_str() {
        assert_eq!(VerbositySetting::Default.as_str(), "default");
        assert_eq!(VerbositySetting::Verbose.as_str(), "verbose");
        assert_eq!(VerbositySetting::Quiet.as_str(), "quiet");
        assert_eq!(VerbositySetting::Debug.as_str(), "debug");
    }
}
