use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("Invalid missing-city policy '{0}'. Accepted values: 'skip', 'abort'")]
pub struct PolicyParseError(String);

/// What to do with spreadsheet targets whose city is absent from the portal
/// catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCityPolicy {
    /// Report each affected target as a failed unit and carry on.
    #[default]
    Skip,
    /// Fail the run before any unit starts.
    Abort,
}

impl FromStr for MissingCityPolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(MissingCityPolicy::Skip),
            "abort" => Ok(MissingCityPolicy::Abort),
            _ => Err(PolicyParseError(s.to_string())),
        }
    }
}

impl Display for MissingCityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingCityPolicy::Skip => write!(f, "skip"),
            MissingCityPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Spreadsheet header names holding the city and school of each target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputColumns {
    pub city: String,
    pub school: String,
}

impl Default for InputColumns {
    fn default() -> Self {
        Self {
            city: "mun2".to_string(),
            school: "Estabelecimento_scrapping".to_string(),
        }
    }
}

/// Settings for the per-unit HTTP sessions.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub request_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: crate::BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            request_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub client: ClientSettings,
    pub unit_timeout: Duration,
    pub max_pages: Option<u32>,
    pub max_hops: usize,
    pub jobs: usize,
    pub columns: InputColumns,
    pub network_code: String,
    pub missing_city: MissingCityPolicy,
}

impl ScrapeConfig {
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: PathBuf::from("escolas_parana.csv"),
            client: ClientSettings::default(),
            unit_timeout: Duration::from_secs(300),
            max_pages: None,
            max_hops: 6,
            jobs: 1,
            columns: InputColumns::default(),
            network_code: "3".to_string(),
            missing_city: MissingCityPolicy::default(),
        }
    }

    pub fn validate(self) -> Result<Self, String> {
        if self.jobs == 0 {
            return Err("Jobs must be greater than 0".to_string());
        }
        if self.max_hops == 0 {
            return Err("Max hops must be greater than 0".to_string());
        }
        if self.max_pages.is_some_and(|p| p == 0) {
            return Err("Max pages must be greater than 0".to_string());
        }
        if self.unit_timeout.is_zero() {
            return Err("Unit timeout must be greater than 0".to_string());
        }
        if self.columns.city.trim().is_empty() || self.columns.school.trim().is_empty() {
            return Err("Column names cannot be empty".to_string());
        }
        Ok(self)
    }
}
