// src/config.rs
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{FlowError, Result};

/// Upper bound on one HTTP call, so a stalled status check counts as a failed one.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Connection details for the remote EduTalks API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_base: String,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl ApiConfig {
    pub fn new(api_base: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_token,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Retry budget with a constant interval.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FixedPollSettings {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

/// A `[assessment]` or `[activation]` table; missing keys keep the flow's default.
#[derive(Deserialize, Debug, Default)]
struct FixedPollTable {
    max_attempts: Option<u32>,
    interval_ms: Option<u64>,
}

/// Retry budget with a constant interval for pending responses and
/// exponential backoff for failed status checks.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BackoffPollSettings {
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub backoff_factor: u32,
    pub backoff_max_ms: u64,
}

/// Poll budgets of every flow. Each table in the TOML file is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub assessment: FixedPollSettings,
    pub payment: BackoffPollSettings,
    pub activation: FixedPollSettings,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct PollFile {
    assessment: FixedPollTable,
    payment: BackoffPollSettings,
    activation: FixedPollTable,
}

/// High-level application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub database_url: String,
    pub status_page_url: String,
    pub bind_addr: String,
    pub poll: PollSettings,
}

impl FixedPollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn merged(self, table: FixedPollTable) -> Self {
        Self {
            max_attempts: table.max_attempts.unwrap_or(self.max_attempts),
            interval_ms: table.interval_ms.unwrap_or(self.interval_ms),
        }
    }
}

impl BackoffPollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for BackoffPollSettings {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval_ms: 3_000,
            backoff_factor: 2,
            backoff_max_ms: 24_000,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            assessment: FixedPollSettings { max_attempts: 10, interval_ms: 2_000 },
            payment: BackoffPollSettings::default(),
            activation: FixedPollSettings { max_attempts: 10, interval_ms: 1_000 },
        }
    }
}

impl PollSettings {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: PollFile = toml::from_str(raw)?;
        let defaults = PollSettings::default();
        let settings = PollSettings {
            assessment: defaults.assessment.merged(file.assessment),
            payment: file.payment,
            activation: defaults.activation.merged(file.activation),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let budgets = [
            ("assessment", self.assessment.max_attempts),
            ("payment", self.payment.max_attempts),
            ("activation", self.activation.max_attempts),
        ];
        if let Some((name, _)) = budgets.iter().find(|(_, attempts)| *attempts == 0) {
            return Err(FlowError::Config(format!("{name}.max_attempts must be positive")));
        }
        if self.payment.backoff_factor == 0 {
            return Err(FlowError::Config("payment.backoff_factor must be positive".to_string()));
        }
        if self.payment.backoff_max_ms < self.payment.interval_ms {
            return Err(FlowError::Config(
                "payment.backoff_max_ms must not be below payment.interval_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var("EDUTALKS_API_BASE").map_err(|_| {
            FlowError::Config("EDUTALKS_API_BASE must be set to the EduTalks API URL".to_string())
        })?;
        let api_token = std::env::var("EDUTALKS_API_TOKEN").ok().filter(|t| !t.trim().is_empty());
        let request_timeout_ms = match std::env::var("EDUTALKS_REQUEST_TIMEOUT_MS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| FlowError::Config(format!("EDUTALKS_REQUEST_TIMEOUT_MS is not a positive number: {raw}")))?,
            Err(_) => DEFAULT_REQUEST_TIMEOUT_MS,
        };

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => format!("sqlite:{}", default_db_path()?.display()),
        };

        let status_page_url = std::env::var("EDUTALKS_STATUS_PAGE_URL")
            .unwrap_or_else(|_| format!("{}/payments/status", api_base.trim_end_matches('/')));
        let bind_addr = std::env::var("EDUTALKS_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let poll = match std::env::var("EDUTALKS_POLL_CONFIG") {
            Ok(path) => PollSettings::from_file(Path::new(&path))?,
            Err(_) => PollSettings::default(),
        };

        Ok(AppConfig {
            api: ApiConfig { api_base, api_token, request_timeout_ms },
            database_url,
            status_page_url,
            bind_addr,
            poll,
        })
    }
}

fn default_db_path() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("edutalks").join("flows.db"))
        .ok_or_else(|| FlowError::Config("No data directory found; set DATABASE_URL".to_string()))
}
