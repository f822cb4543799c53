//! Unit tests for configuration loading and root folder resolution
//!
//! Tests touching GRIDCAST_* environment variables are marked #[serial]
//! so they never interleave.

use gridcast_common::config::{
    database_path, default_root_folder, resolve_root_folder, FallbackConfig, SeasonRange,
    TomlConfig, RESULTS_API_ENV_VAR, ROOT_ENV_VAR,
};
use gridcast_common::db::SourceId;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

#[test]
fn test_defaults_match_documented_values() {
    let config = TomlConfig::default();

    assert_eq!(config.seasons, SeasonRange { first: 2010, last: 2025 });
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.backoff_multiplier, 2.0);
    assert_eq!(config.sources.request_timeout_secs, 15);
    assert_eq!(config.sources.telemetry_first_season, 2023);
    assert_eq!(config.sources.session_timing_first_season, 2018);
    assert_eq!(config.backfill.race_delay_ms, 500);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_default_fallback_chains() {
    let chains = FallbackConfig::default();

    assert_eq!(
        chains.qualifying,
        vec![SourceId::ResultsApi, SourceId::TelemetryApi, SourceId::SessionTiming]
    );
    assert_eq!(
        chains.pit_stops,
        vec![SourceId::ResultsApi, SourceId::SessionTiming, SourceId::TelemetryApi]
    );
    assert_eq!(
        chains.lap_times,
        vec![SourceId::ResultsApi, SourceId::TelemetryApi, SourceId::SessionTiming]
    );
}

#[test]
fn test_partial_toml_keeps_defaults_for_missing_sections() {
    let config = TomlConfig::from_toml_str(
        r#"
        root_folder = "/data/gridcast"

        [seasons]
        first = 2021

        [fallback]
        lap_times = ["telemetry_api", "results_api"]
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder, Some(PathBuf::from("/data/gridcast")));
    assert_eq!(config.seasons, SeasonRange { first: 2021, last: 2025 });
    assert_eq!(config.fallback.lap_times, vec![SourceId::TelemetryApi, SourceId::ResultsApi]);
    assert_eq!(config.fallback.qualifying, FallbackConfig::default().qualifying);
    assert_eq!(config.retry.max_attempts, 5);
}

#[test]
fn test_malformed_toml_is_config_error() {
    let result = TomlConfig::from_toml_str("seasons = [");
    assert!(matches!(result, Err(gridcast_common::Error::Config(_))));
}

#[test]
fn test_unknown_source_in_chain_is_rejected() {
    let result = TomlConfig::from_toml_str(
        r#"
        [fallback]
        qualifying = ["ergast"]
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_inverted_season_range_fails_validation() {
    assert!(SeasonRange::new(2024, 2020).is_err());

    let mut config = TomlConfig::default();
    config.seasons = SeasonRange { first: 2024, last: 2020 };
    assert!(config.validate().is_err());
}

#[test]
fn test_retry_policy_bounds_are_enforced() {
    let with_retry = |retry: &str| {
        TomlConfig::from_toml_str(&format!("[retry]\n{}", retry))
            .unwrap()
            .validate()
    };

    assert!(with_retry("max_attempts = 5\nbackoff_multiplier = 2.0").is_ok());
    assert!(with_retry("max_attempts = 1\nbackoff_multiplier = 3.0").is_ok());
    assert!(with_retry("max_attempts = 0").is_err());
    assert!(with_retry("max_attempts = 6").is_err());
    assert!(with_retry("backoff_multiplier = 1.5").is_err());
    assert!(with_retry("backoff_multiplier = 1.0").is_err());
}

#[test]
fn test_driver_number_overrides_merge_with_builtin_map() {
    let config = TomlConfig::from_toml_str(
        r#"
        [driver_numbers]
        "12" = "antonelli"
        "1" = "max_verstappen"
        "#,
    )
    .unwrap();

    let map = config.driver_number_map().unwrap();
    assert_eq!(map.get(&12).map(String::as_str), Some("antonelli"));
    assert_eq!(map.get(&44).map(String::as_str), Some("hamilton"));
    assert_eq!(map.get(&20).map(String::as_str), Some("kevin_magnussen"));
}

#[test]
fn test_non_numeric_driver_number_key_is_rejected() {
    let config = TomlConfig::from_toml_str(
        r#"
        [driver_numbers]
        "VER" = "max_verstappen"
        "#,
    )
    .unwrap();

    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_explicit_config_file_is_loaded() {
    env::remove_var(ROOT_ENV_VAR);
    env::remove_var(RESULTS_API_ENV_VAR);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[sources]\nresults_api_url = \"http://localhost:9000/f1\"").unwrap();

    let config = TomlConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.sources.results_api_url, "http://localhost:9000/f1");
}

#[test]
#[serial]
fn test_missing_explicit_config_file_is_error() {
    let result = TomlConfig::load(Some(Path::new("/nonexistent/gridcast/config.toml")));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_env_overrides_toml_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "root_folder = \"/from/toml\"\n[sources]\nresults_api_url = \"http://toml\""
    )
    .unwrap();

    env::set_var(ROOT_ENV_VAR, "/from/env");
    env::set_var(RESULTS_API_ENV_VAR, "http://env");

    let config = TomlConfig::load(Some(file.path())).unwrap();

    env::remove_var(ROOT_ENV_VAR);
    env::remove_var(RESULTS_API_ENV_VAR);

    assert_eq!(config.root_folder, Some(PathBuf::from("/from/env")));
    assert_eq!(config.sources.results_api_url, "http://env");
}

#[test]
fn test_cli_root_folder_wins() {
    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/from/toml"));

    let root = resolve_root_folder(Some(Path::new("/from/cli")), &config);
    assert_eq!(root, PathBuf::from("/from/cli"));

    let root = resolve_root_folder(None, &config);
    assert_eq!(root, PathBuf::from("/from/toml"));
}

#[test]
fn test_default_root_folder_used_last() {
    let root = resolve_root_folder(None, &TomlConfig::default());
    assert_eq!(root, default_root_folder());
    assert!(!root.as_os_str().is_empty());
}

#[test]
fn test_database_path_inside_root() {
    let path = database_path(Path::new("/srv/gridcast"));
    assert_eq!(path, PathBuf::from("/srv/gridcast/gridcast.db"));
}
