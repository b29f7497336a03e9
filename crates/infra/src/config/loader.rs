//! Configuration loader
//!
//! Loads application configuration from files and environment variables.
//!
//! ## Loading Strategy
//! 1. Probe the standard paths for a config file; defaults apply when none
//!    exists
//! 2. Apply `LEDGERLINK_*` environment overrides on top
//! 3. Validate the merged result
//!
//! ## Environment Variables
//! - `LEDGERLINK_DB_PATH`: Database file path
//! - `LEDGERLINK_DB_POOL_SIZE`: Connection pool size
//! - `LEDGERLINK_DB_BUSY_TIMEOUT_MS`: SQLite busy timeout
//! - `LEDGERLINK_BIND_ADDRESS`: HTTP listen address
//! - `LEDGERLINK_PUBLIC_BASE_URL`: Externally visible base URL
//! - `LEDGERLINK_MATCH_WINDOW_SECS`: Matching tolerance window
//! - `LEDGERLINK_STALENESS_THRESHOLD_SECS`: Age before a pending record retries
//! - `LEDGERLINK_AMOUNT_TOLERANCE_MINOR`: Amount tolerance in minor units
//! - `LEDGERLINK_PROVIDER_TIMEOUT_MS`: Timeout of one provider call
//! - `LEDGERLINK_SCHEDULER_ENABLED`: Whether the scheduler runs (true/false)
//! - `LEDGERLINK_SCHEDULER_TICK_SECS`: Scheduler tick interval
//! - `LEDGERLINK_LOG_LEVEL`: Default log filter
//! - `LEDGERLINK_LOG_JSON`: JSON log output (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./ledgerlink.toml`, `./ledgerlink.json`, `./config.toml`,
//!    `./config.json` (current working directory)
//! 2. The same names in the parent and grandparent directories
//! 3. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ledgerlink_domain::constants::ENV_PREFIX;
use ledgerlink_domain::{Config, LedgerLinkError, Result};

const CONFIG_FILE_NAMES: [&str; 4] =
    ["ledgerlink.toml", "ledgerlink.json", "config.toml", "config.json"];

/// Load configuration: probed file (or defaults), then environment overrides
///
/// # Errors
/// Returns `LedgerLinkError::Config` if the file is unreadable or invalid,
/// an override does not parse, or the merged configuration fails validation.
pub fn load() -> Result<Config> {
    let config = match probe_config_paths() {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::info!("No config file found, using defaults");
            Config::default()
        }
    };
    finish(config)
}

/// Defaults plus environment overrides, without touching the filesystem
///
/// # Errors
/// Returns `LedgerLinkError::Config` if an override has an invalid value.
pub fn load_from_env() -> Result<Config> {
    finish(Config::default())
}

fn finish(mut config: Config) -> Result<Config> {
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `LedgerLinkError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(LedgerLinkError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            LedgerLinkError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| LedgerLinkError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| LedgerLinkError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| LedgerLinkError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(LedgerLinkError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.extend([exe_dir.to_path_buf(), exe_dir.join(".."), exe_dir.join("../..")]);
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

/// Overlay `LEDGERLINK_*` variables onto `config`
///
/// # Errors
/// Returns `LedgerLinkError::Config` naming the first variable that does not
/// parse.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(path) = env_string("DB_PATH") {
        config.database.path = path;
    }
    if let Some(size) = env_parse("DB_POOL_SIZE")? {
        config.database.pool_size = size;
    }
    if let Some(timeout) = env_parse("DB_BUSY_TIMEOUT_MS")? {
        config.database.busy_timeout_ms = timeout;
    }
    if let Some(address) = env_string("BIND_ADDRESS") {
        config.server.bind_address = address;
    }
    if let Some(url) = env_string("PUBLIC_BASE_URL") {
        config.server.public_base_url = url;
    }
    if let Some(window) = env_parse("MATCH_WINDOW_SECS")? {
        config.reconciliation.match_window_secs = window;
    }
    if let Some(threshold) = env_parse("STALENESS_THRESHOLD_SECS")? {
        config.reconciliation.staleness_threshold_secs = threshold;
    }
    if let Some(tolerance) = env_parse("AMOUNT_TOLERANCE_MINOR")? {
        config.reconciliation.amount_tolerance_minor = tolerance;
    }
    if let Some(timeout) = env_parse("PROVIDER_TIMEOUT_MS")? {
        config.reconciliation.provider_timeout_ms = timeout;
    }
    config.scheduler.enabled = env_bool("SCHEDULER_ENABLED", config.scheduler.enabled);
    if let Some(tick) = env_parse("SCHEDULER_TICK_SECS")? {
        config.scheduler.tick_interval_secs = tick;
    }
    if let Some(level) = env_string("LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("LOG_JSON", config.logging.json);
    Ok(())
}

fn env_key(suffix: &str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

/// Non-empty environment variable
fn env_string(suffix: &str) -> Option<String> {
    std::env::var(env_key(suffix)).ok().filter(|value| !value.trim().is_empty())
}

/// Parse an optional environment variable
///
/// # Errors
/// Returns `LedgerLinkError::Config` if the variable is set but invalid.
fn env_parse<T>(suffix: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(suffix)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                LedgerLinkError::Config(format!("Invalid value for {}: {e}", env_key(suffix)))
            })
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(suffix: &str, default: bool) -> bool {
    env_string(suffix)
        .map_or(default, |s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use ledgerlink_domain::Provider;
    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const MANAGED_VARS: [&str; 6] = [
        "LEDGERLINK_DB_PATH",
        "LEDGERLINK_DB_POOL_SIZE",
        "LEDGERLINK_MATCH_WINDOW_SECS",
        "LEDGERLINK_SCHEDULER_ENABLED",
        "LEDGERLINK_LOG_JSON",
        "LEDGERLINK_PROVIDER_TIMEOUT_MS",
    ];

    fn clear_env() {
        for key in MANAGED_VARS {
            std::env::remove_var(key);
        }
    }

    fn write_temp(contents: &str, extension: &str) -> (NamedTempFile, PathBuf) {
        let mut temp_file = NamedTempFile::new().expect("temp file");
        temp_file.write_all(contents.as_bytes()).expect("write config");
        let path = temp_file.path().with_extension(extension);
        std::fs::copy(temp_file.path(), &path).expect("copy config");
        (temp_file, path)
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for (value, expected) in [("1", true), ("TRUE", true), ("on", true), ("no", false), ("0", false)] {
            std::env::set_var("LEDGERLINK_TEST_BOOL", value);
            assert_eq!(env_bool("TEST_BOOL", !expected), expected, "value {value}");
        }

        std::env::remove_var("LEDGERLINK_TEST_BOOL");
        assert!(env_bool("TEST_BOOL", true));
        assert!(!env_bool("TEST_BOOL", false));
    }

    #[test]
    fn test_load_from_env_applies_overrides() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("LEDGERLINK_DB_PATH", "/tmp/ledger.db");
        std::env::set_var("LEDGERLINK_DB_POOL_SIZE", "3");
        std::env::set_var("LEDGERLINK_MATCH_WINDOW_SECS", "900");
        std::env::set_var("LEDGERLINK_SCHEDULER_ENABLED", "false");
        std::env::set_var("LEDGERLINK_LOG_JSON", "yes");

        let config = load_from_env().expect("config from env");
        clear_env();

        assert_eq!(config.database.path, "/tmp/ledger.db");
        assert_eq!(config.database.pool_size, 3);
        assert_eq!(config.reconciliation.match_window_secs, 900);
        assert!(!config.scheduler.enabled);
        assert!(config.logging.json);
        // Untouched sections keep their defaults
        assert_eq!(config.breaker.window_size, 20);
    }

    #[test]
    fn test_load_from_env_invalid_number() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("LEDGERLINK_DB_POOL_SIZE", "not-a-number");
        let result = load_from_env();
        clear_env();

        let err = result.expect_err("invalid pool size");
        assert!(matches!(&err, LedgerLinkError::Config(msg) if msg.contains("LEDGERLINK_DB_POOL_SIZE")));
    }

    #[test]
    fn test_override_failing_validation_is_rejected() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("LEDGERLINK_PROVIDER_TIMEOUT_MS", "0");
        let result = load_from_env();
        clear_env();

        assert!(matches!(result, Err(LedgerLinkError::Config(_))));
    }

    #[test]
    fn test_load_from_file_toml_with_seeds() {
        let toml_content = r#"
[database]
path = "test.db"
pool_size = 6

[reconciliation]
match_window_secs = 120

[[integrations]]
business_id = "biz-1"
provider = "square"
credential_ref = "env:SQUARE_CREDENTIALS"
sync_interval_secs = 60
"#;
        let (_temp, path) = write_temp(toml_content, "toml");

        let config = load_from_file(Some(path.clone())).expect("toml config");
        std::fs::remove_file(path).ok();

        assert_eq!(config.database.path, "test.db");
        assert_eq!(config.database.pool_size, 6);
        assert_eq!(config.reconciliation.match_window_secs, 120);
        assert_eq!(config.reconciliation.staleness_threshold_secs, 1_800);
        assert_eq!(config.integrations.len(), 1);
        assert_eq!(config.integrations[0].provider, Provider::Square);
        assert!(config.integrations[0].enabled);
    }

    #[test]
    fn test_load_from_file_json() {
        let json_content = r#"{
            "database": { "path": "test.db", "pool_size": 4 },
            "logging": { "level": "debug", "json": true }
        }"#;
        let (_temp, path) = write_temp(json_content, "json");

        let config = load_from_file(Some(path.clone())).expect("json config");
        std::fs::remove_file(path).ok();

        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_from_file_not_found() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/ledgerlink.toml")));
        assert!(matches!(result, Err(LedgerLinkError::Config(_))));
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let (_temp, path) = write_temp(r#"{ "this is": "not valid json" "#, "json");

        let result = load_from_file(Some(path.clone()));
        std::fs::remove_file(path).ok();

        assert!(result.is_err(), "Should fail with invalid JSON");
    }

    #[test]
    fn test_parse_config_unsupported_format() {
        let result = parse_config("some content", &PathBuf::from("test.yaml"));
        assert!(result.is_err(), "Should fail with unsupported format");
    }
}
