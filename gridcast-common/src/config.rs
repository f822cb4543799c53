//! Configuration loading and root folder resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (applied by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default
//!
//! A missing TOML file is not an error: defaults are used and a warning is
//! logged. A TOML file that exists but does not parse is an error.

use crate::db::models::SourceId;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Root folder override
pub const ROOT_ENV_VAR: &str = "GRIDCAST_ROOT";
/// Results API base URL override
pub const RESULTS_API_ENV_VAR: &str = "GRIDCAST_RESULTS_API_URL";
/// Telemetry API base URL override
pub const TELEMETRY_API_ENV_VAR: &str = "GRIDCAST_TELEMETRY_API_URL";
/// Session-timing API base URL override
pub const SESSION_TIMING_ENV_VAR: &str = "GRIDCAST_SESSION_TIMING_URL";

/// Canonical store file inside the root folder
pub const DATABASE_FILE_NAME: &str = "gridcast.db";

/// Permanent car numbers mapped to results-API driver ids
static DEFAULT_DRIVER_NUMBERS: Lazy<HashMap<i32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (1, "max_verstappen"),
        (11, "perez"),
        (44, "hamilton"),
        (63, "russell"),
        (16, "leclerc"),
        (55, "sainz"),
        (4, "norris"),
        (81, "piastri"),
        (14, "alonso"),
        (18, "stroll"),
        (10, "gasly"),
        (31, "ocon"),
        (23, "albon"),
        (2, "sargeant"),
        (22, "tsunoda"),
        (3, "ricciardo"),
        (24, "zhou"),
        (77, "bottas"),
        (27, "hulkenberg"),
        (20, "kevin_magnussen"),
        (40, "lawson"),
        (38, "bearman"),
        (43, "colapinto"),
        (30, "doohan"),
    ])
});

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding the canonical store
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub seasons: SeasonRange,
    pub sources: SourcesConfig,
    pub retry: RetryConfig,
    pub backfill: BackfillConfig,
    pub fallback: FallbackConfig,
    /// Extra or corrected car-number mappings, e.g. `"12" = "antonelli"`
    pub driver_numbers: BTreeMap<String, String>,
    /// Coefficient file for the linear scorer
    pub model_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Inclusive season range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonRange {
    pub first: i32,
    pub last: i32,
}

impl Default for SeasonRange {
    fn default() -> Self {
        Self {
            first: 2010,
            last: 2025,
        }
    }
}

impl SeasonRange {
    pub fn new(first: i32, last: i32) -> Result<Self> {
        let range = Self { first, last };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if self.first > self.last {
            return Err(Error::Config(format!(
                "Season range is empty: {} > {}",
                self.first, self.last
            )));
        }
        Ok(())
    }

    pub fn contains(&self, season: i32) -> bool {
        (self.first..=self.last).contains(&season)
    }

    pub fn seasons(&self) -> impl Iterator<Item = i32> {
        self.first..=self.last
    }
}

/// Upstream endpoints and client behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub results_api_url: String,
    pub telemetry_api_url: String,
    /// Local session-timing service exposing whole-session loads
    pub session_timing_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Courtesy limit per upstream client
    pub requests_per_second: u32,
    /// First season the telemetry API covers
    pub telemetry_first_season: i32,
    /// First season the session-timing API covers
    pub session_timing_first_season: i32,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            results_api_url: "https://api.jolpi.ca/ergast/f1".to_string(),
            telemetry_api_url: "https://api.openf1.org/v1".to_string(),
            session_timing_url: "http://127.0.0.1:5730".to_string(),
            user_agent: format!("gridcast/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 15,
            requests_per_second: 4,
            telemetry_first_season: 2023,
            session_timing_first_season: 2018,
        }
    }
}

/// Upper bound on attempts per request, first try included
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Smallest accepted exponential backoff factor
pub const MIN_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Transient-failure retry policy for upstream requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryConfig {
    /// Reject policies outside 1..=5 attempts or with sub-doubling backoff
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.max_attempts) {
            return Err(Error::Config(format!(
                "retry.max_attempts must be between 1 and {}, got {}",
                MAX_RETRY_ATTEMPTS, self.max_attempts
            )));
        }
        let multiplier = self.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < MIN_BACKOFF_MULTIPLIER {
            return Err(Error::Config(format!(
                "retry.backoff_multiplier must be at least {}, got {}",
                MIN_BACKOFF_MULTIPLIER, multiplier
            )));
        }
        Ok(())
    }
}

/// Backfill pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Courtesy pause between race keys
    pub race_delay_ms: u64,
    /// Courtesy pause between categories of one race
    pub category_delay_ms: u64,
    /// Upper bound on waiting out a locked database per write
    pub lock_wait_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            race_delay_ms: 500,
            category_delay_ms: 250,
            lock_wait_ms: 5_000,
        }
    }
}

/// Source priority order per data category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub qualifying: Vec<SourceId>,
    pub pit_stops: Vec<SourceId>,
    pub lap_times: Vec<SourceId>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            qualifying: vec![
                SourceId::ResultsApi,
                SourceId::TelemetryApi,
                SourceId::SessionTiming,
            ],
            pit_stops: vec![
                SourceId::ResultsApi,
                SourceId::SessionTiming,
                SourceId::TelemetryApi,
            ],
            lap_times: vec![
                SourceId::ResultsApi,
                SourceId::TelemetryApi,
                SourceId::SessionTiming,
            ],
        }
    }
}

impl TomlConfig {
    /// Load configuration
    ///
    /// An explicit `path` must exist. Without one, the platform config file
    /// is used when present, otherwise compiled defaults. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&content)?
            }
            None => match config_file_path() {
                Some(path) => {
                    debug!("Loading config file: {}", path.display());
                    let content = std::fs::read_to_string(&path)?;
                    Self::from_toml_str(&content)?
                }
                None => {
                    warn!("No config file found, using compiled defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `GRIDCAST_*` URL and root folder overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ROOT_ENV_VAR) {
            self.root_folder = Some(PathBuf::from(root));
        }
        if let Ok(url) = std::env::var(RESULTS_API_ENV_VAR) {
            self.sources.results_api_url = url;
        }
        if let Ok(url) = std::env::var(TELEMETRY_API_ENV_VAR) {
            self.sources.telemetry_api_url = url;
        }
        if let Ok(url) = std::env::var(SESSION_TIMING_ENV_VAR) {
            self.sources.session_timing_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.seasons.validate()?;
        self.retry.validate()?;
        if self.sources.requests_per_second == 0 {
            return Err(Error::Config(
                "sources.requests_per_second must be at least 1".to_string(),
            ));
        }
        self.driver_number_map()?;
        Ok(())
    }

    /// Built-in car-number map merged with the configured overrides
    pub fn driver_number_map(&self) -> Result<HashMap<i32, String>> {
        let mut map: HashMap<i32, String> = DEFAULT_DRIVER_NUMBERS
            .iter()
            .map(|(number, id)| (*number, id.to_string()))
            .collect();

        for (number, driver_id) in &self.driver_numbers {
            let number: i32 = number.trim().parse().map_err(|_| {
                Error::Config(format!("driver_numbers key is not a number: {:?}", number))
            })?;
            map.insert(number, driver_id.clone());
        }

        Ok(map)
    }
}

/// Resolve the root folder: CLI, then environment/TOML (already merged
/// into `config`), then the OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Some(path) = &config.root_folder {
        return path.clone();
    }
    default_root_folder()
}

/// Create the root folder if missing
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        debug!("Created root folder: {}", root.display());
    }
    Ok(())
}

/// Canonical store path inside a root folder
pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE_NAME)
}

/// Platform config file, if one exists
fn config_file_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("gridcast").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/gridcast/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("gridcast"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/gridcast"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("gridcast"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/gridcast"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("gridcast"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\gridcast"))
    } else {
        PathBuf::from("./gridcast_data")
    }
}
