use crate::profile;
use crate::types::{ConfiguredFeed, FeedGroup, FetchConfig, Result, ScreenerError};
use config::{Config, Environment, File, FileFormat};
use email_delivery::SmtpConfig;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_DATABASE_PATH: &str = "~/.paper-screener/papers.db";
const ENV_PREFIX: &str = "PAPER_SCREENER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(alias = "claude")]
    Anthropic,
    OpenAi,
    #[serde(alias = "google")]
    Gemini,
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-sonnet-4-20250514",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Gemini => "gemini-2.0-flash",
        }
    }

    /// Name of the `api_keys` entry holding this provider's key.
    pub fn key_name(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Gemini => "google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Screening calls in flight at once.
    pub concurrency: usize,
    pub timeout_seconds: u64,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            model: None,
            max_tokens: crate::prompt::DEFAULT_MAX_TOKENS,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            concurrency: 4,
            timeout_seconds: 60,
            base_url: None,
        }
    }
}

impl LlmConfig {
    pub fn model_or_default(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub google: Option<String>,
}

impl ApiKeys {
    /// The usable key for `provider`. Empty values and unexpanded `${VAR}`
    /// placeholders count as missing.
    pub fn key_for(&self, provider: Provider) -> Option<String> {
        let key = match provider {
            Provider::Anthropic => &self.anthropic,
            Provider::OpenAi => &self.openai,
            Provider::Gemini => &self.google,
        };
        key.as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && !k.contains("${"))
            .map(|k| k.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DATABASE_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub feed_list: String,
    pub interests: String,
    pub examples: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            feed_list: "rss_list.md".to_string(),
            interests: "interests.md".to_string(),
            examples: "examples.md".to_string(),
        }
    }
}

/// Feeds listed directly in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InlineFeeds {
    pub high_quality: Vec<String>,
    pub other: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenerConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub api_keys: ApiKeys,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub feeds: InlineFeeds,
    #[serde(default)]
    pub email: Option<SmtpConfig>,
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Directory relative profile paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn env_var_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(\w+)\}").ok()).as_ref()
}

/// Replace `${VAR}` with the environment value. Unset variables are left
/// as written so the preflight check can report them.
pub fn expand_env_vars(text: &str) -> String {
    match env_var_pattern() {
        Some(pattern) => pattern
            .replace_all(text, |caps: &regex::Captures| {
                std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
            })
            .into_owned(),
        None => text.to_string(),
    }
}

impl ScreenerConfig {
    /// Load `path`, expanding `${VAR}` references and applying
    /// `PAPER_SCREENER__SECTION__KEY` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScreenerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let config = Self::from_yaml_str(&raw, base_dir)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let expanded = expand_env_vars(raw);

        let settings = Config::builder()
            .add_source(File::from_str(&expanded, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: ScreenerConfig = settings.try_deserialize()?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    /// `explicit`, else `./config.yaml`, else `~/.paper-screener/config.yaml`.
    pub fn discover(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }

        let home = PathBuf::from(shellexpand::tilde("~/.paper-screener/config.yaml").into_owned());
        if home.exists() {
            return Ok(home);
        }

        Err(ScreenerError::InvalidConfig(format!(
            "no {} found in the current directory or ~/.paper-screener",
            DEFAULT_CONFIG_FILE
        )))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(path).into_owned());
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.database.path)
    }

    pub fn feed_list_path(&self) -> PathBuf {
        self.resolve(&self.profile.feed_list)
    }

    pub fn interests_path(&self) -> PathBuf {
        self.resolve(&self.profile.interests)
    }

    pub fn examples_path(&self) -> PathBuf {
        self.resolve(&self.profile.examples)
    }

    /// Feeds from the feed list file followed by inline feeds. The first
    /// occurrence of a URL wins.
    pub fn configured_feeds(&self) -> Result<Vec<ConfiguredFeed>> {
        let mut feeds = Vec::new();

        let list_path = self.feed_list_path();
        if list_path.exists() {
            feeds.extend(profile::load_feed_list(&list_path)?);
        } else {
            debug!("No feed list at {}", list_path.display());
        }

        let inline = self
            .feeds
            .high_quality
            .iter()
            .map(|url| ConfiguredFeed::new(url.trim(), FeedGroup::HighQuality))
            .chain(
                self.feeds
                    .other
                    .iter()
                    .map(|url| ConfiguredFeed::new(url.trim(), FeedGroup::Other)),
            );
        for feed in inline {
            if !feeds.iter().any(|f: &ConfiguredFeed| f.url == feed.url) {
                feeds.push(feed);
            }
        }

        Ok(feeds)
    }

    /// Checks that must pass before any entry is screened.
    pub fn preflight(&self) -> Result<()> {
        if self.api_keys.key_for(self.llm.provider).is_none() {
            return Err(ScreenerError::InvalidConfig(format!(
                "API key for {} is missing or unexpanded; set api_keys.{}",
                self.llm.provider,
                self.llm.provider.key_name()
            )));
        }
        if self.llm.concurrency == 0 {
            return Err(ScreenerError::InvalidConfig("llm.concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}
