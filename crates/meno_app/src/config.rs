//! Loads `EngineConfig` from a RON file plus environment overrides.
//!
//! Every field of the file is optional; missing fields keep the engine
//! defaults. A missing file is the same as an empty one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use meno_core::UserPreferences;
use meno_engine::{BackendSettings, EngineConfig, HydrationSettings, OutboxSettings};
use meno_logging::meno_info;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "./meno.ron";
pub const DEFAULT_DATA_DIR: &str = "./meno-data";
pub const BASE_URL_ENV: &str = "MENO_API_BASE_URL";
pub const USER_ID_ENV: &str = "MENO_USER_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Everything the binary needs besides the engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub preferences: UserPreferences,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    hydration: HydrationSection,
    outbox: OutboxSection,
    backend: Option<BackendSection>,
    preferences: Option<UserPreferences>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HydrationSection {
    concurrency: Option<usize>,
    summary_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutboxSection {
    base_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    flush_on_mutation: Option<bool>,
    dead_letter_after: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackendSection {
    base_url: Option<String>,
    user_id: Option<String>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let file = match fs::read_to_string(path) {
        Ok(text) => parse(path, &text)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            meno_info!("No config at {:?}; using defaults", path);
            ConfigFile::default()
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(resolve(file))
}

fn parse(path: &Path, text: &str) -> Result<ConfigFile, ConfigError> {
    ron::from_str(text).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn resolve(file: ConfigFile) -> AppConfig {
    let data_dir = file
        .data_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let mut engine = EngineConfig::default_with_data_dir(data_dir);

    let hydration = HydrationSettings::default();
    engine.hydration = HydrationSettings {
        concurrency: file.hydration.concurrency.unwrap_or(hydration.concurrency),
        summary_count: file
            .hydration
            .summary_count
            .unwrap_or(hydration.summary_count),
    };

    let outbox = OutboxSettings::default();
    engine.outbox = OutboxSettings {
        base_backoff: file
            .outbox
            .base_backoff_ms
            .map_or(outbox.base_backoff, Duration::from_millis),
        max_backoff: file
            .outbox
            .max_backoff_ms
            .map_or(outbox.max_backoff, Duration::from_millis),
        flush_on_mutation: file
            .outbox
            .flush_on_mutation
            .unwrap_or(outbox.flush_on_mutation),
        dead_letter_after: file.outbox.dead_letter_after.or(outbox.dead_letter_after),
    };

    engine.backend = file.backend.map(|section| {
        let backend = BackendSettings::default();
        BackendSettings {
            base_url: section.base_url.unwrap_or(backend.base_url),
            user_id: section.user_id.unwrap_or(backend.user_id),
            connect_timeout: section
                .connect_timeout_ms
                .map_or(backend.connect_timeout, Duration::from_millis),
            request_timeout: section
                .request_timeout_ms
                .map_or(backend.request_timeout, Duration::from_millis),
        }
    });

    AppConfig {
        engine,
        preferences: file.preferences.unwrap_or_default(),
    }
}

/// Apply `MENO_API_BASE_URL` and `MENO_USER_ID`. Either one enables the
/// backend when the file left it out.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let base_url = lookup(BASE_URL_ENV).filter(|value| !value.trim().is_empty());
    let user_id = lookup(USER_ID_ENV).filter(|value| !value.trim().is_empty());
    if base_url.is_none() && user_id.is_none() {
        return;
    }
    let backend = config
        .engine
        .backend
        .get_or_insert_with(BackendSettings::default);
    if let Some(base_url) = base_url {
        backend.base_url = base_url;
    }
    if let Some(user_id) = user_id {
        backend.user_id = user_id;
    }
}
