//! Feed locations and pipeline settings.
//!
//! Settings come from, in increasing priority: built-in defaults, a JSON
//! file or the environment (`.env` is honoured), then CLI flags.
//!
//! ```json
//! {
//!   "national": "https://example.org/nazionale.csv",
//!   "regional": "data/regioni.csv",
//!   "timeout_secs": 10,
//!   "options": { "cases_per_swab": true, "keep_coordinates": false }
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::pipeline::PipelineOptions;

pub const NATIONAL_URL: &str = "https://raw.githubusercontent.com/pcm-dpc/COVID-19/master/dati-andamento-nazionale/dpc-covid19-ita-andamento-nazionale.csv";
pub const REGIONAL_URL: &str = "https://raw.githubusercontent.com/pcm-dpc/COVID-19/master/dati-regioni/dpc-covid19-ita-regioni.csv";

pub const ENV_NATIONAL: &str = "COVID_NATIONAL_SOURCE";
pub const ENV_REGIONAL: &str = "COVID_REGIONAL_SOURCE";
pub const ENV_TIMEOUT: &str = "COVID_FETCH_TIMEOUT_SECS";

/// Where a feed is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum FeedSource {
    Url(String),
    Path(PathBuf),
}

impl From<String> for FeedSource {
    fn from(s: String) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            FeedSource::Url(s)
        } else {
            FeedSource::Path(PathBuf::from(s))
        }
    }
}

impl From<&str> for FeedSource {
    fn from(s: &str) -> Self {
        FeedSource::from(s.to_string())
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::Url(url) => f.write_str(url),
            FeedSource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_national")]
    pub national: FeedSource,
    #[serde(default = "default_regional")]
    pub regional: FeedSource,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub options: PipelineOptions,
}

fn default_national() -> FeedSource {
    FeedSource::from(NATIONAL_URL)
}

fn default_regional() -> FeedSource {
    FeedSource::from(REGIONAL_URL)
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            national: default_national(),
            regional: default_regional(),
            timeout_secs: default_timeout_secs(),
            options: PipelineOptions::default(),
        }
    }
}

impl FeedConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config '{path}'"))?;
        serde_json::from_str(&content).with_context(|| format!("parsing config '{path}'"))
    }

    /// Defaults overridden by `COVID_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(source) = lookup(ENV_NATIONAL) {
            self.national = FeedSource::from(source);
        }
        if let Some(source) = lookup(ENV_REGIONAL) {
            self.regional = FeedSource::from(source);
        }
        if let Some(secs) = lookup(ENV_TIMEOUT) {
            self.timeout_secs = secs.trim().parse().with_context(|| {
                format!("{ENV_TIMEOUT} must be a number of seconds, got '{secs}'")
            })?;
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
