//! Configuration management

use anyhow::Result;
use serde::Deserialize;

/// openFDA refuses pages larger than this.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Longest monthly event window
pub const MAX_EVENT_MONTHS: u32 = 240;

/// Longest yearly event window
pub const MAX_EVENT_YEARS: u32 = 50;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `X-Api-Key` when present. Only lifts the unauthenticated rate limit.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Record cap for establishment and clearance searches
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Rows requested from the classification endpoint per device-name lookup
    #[serde(default = "default_classification_limit")]
    pub classification_limit: usize,
    #[serde(default = "default_event_months")]
    pub event_months: u32,
    #[serde(default = "default_event_years")]
    pub event_years: u32,
    #[serde(default = "default_event_max_records")]
    pub event_max_records: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_records: default_max_records(),
            classification_limit: default_classification_limit(),
            event_months: default_event_months(),
            event_years: default_event_years(),
            event_max_records: default_event_max_records(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.fda.gov".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

fn default_max_records() -> usize {
    2000
}

fn default_classification_limit() -> usize {
    50
}

fn default_event_months() -> u32 {
    18
}

fn default_event_years() -> u32 {
    5
}

fn default_event_max_records() -> usize {
    5000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";

        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("FDA_FINDER").separator("__"));

        let settings = builder.build()?;
        let mut config: Config = settings.try_deserialize()?;

        // The conventional openFDA variable wins over an unset key
        if config.api.api_key.is_none() {
            config.api.api_key = std::env::var("OPENFDA_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("API base_url cannot be empty");
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            anyhow::bail!("Invalid API base_url '{}': must start with http:// or https://", self.api.base_url);
        }
        if self.api.timeout_secs == 0 {
            anyhow::bail!("Invalid timeout_secs: 0 is not allowed");
        }

        if self.fetch.page_size == 0 || self.fetch.page_size > MAX_PAGE_SIZE {
            anyhow::bail!("Invalid page_size {}: must be between 1 and {}", self.fetch.page_size, MAX_PAGE_SIZE);
        }
        if self.fetch.classification_limit == 0 || self.fetch.classification_limit > MAX_PAGE_SIZE {
            anyhow::bail!(
                "Invalid classification_limit {}: must be between 1 and {}",
                self.fetch.classification_limit,
                MAX_PAGE_SIZE
            );
        }
        if self.fetch.event_months == 0 || self.fetch.event_months > MAX_EVENT_MONTHS {
            anyhow::bail!(
                "Invalid event_months {}: must be between 1 and {}",
                self.fetch.event_months,
                MAX_EVENT_MONTHS
            );
        }
        if self.fetch.event_years == 0 || self.fetch.event_years > MAX_EVENT_YEARS {
            anyhow::bail!(
                "Invalid event_years {}: must be between 1 and {}",
                self.fetch.event_years,
                MAX_EVENT_YEARS
            );
        }

        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }

    /// API key with surrounding whitespace removed, if any is set
    pub fn api_key(&self) -> Option<&str> {
        self.api.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}
