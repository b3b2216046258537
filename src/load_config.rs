/// `load_config` module: reads the static YAML config file, injects the API keys from the
/// environment, and produces the validated [`AutomationConfig`] the core runs on.
///
/// # Responsibilities
/// - Parse the user-supplied YAML into the file-side structs below
/// - Fill in defaults for optional keys (cadence, approval retries, local file locations)
/// - Read `AM_API_KEY` and `SS_API_KEY`; secrets never live in the YAML file
/// - Run [`AutomationConfig::validate`] so bad settings fail at startup, not mid-run
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use am_automate_core::config::{
    AutomationConfig, Credentials, RetryPolicy, ServiceConfig, SourceConfig,
};
use am_automate_core::contract::{SourcePath, TransferType};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

pub const PROCESSING_KEY_VAR: &str = "AM_API_KEY";
pub const STORAGE_KEY_VAR: &str = "SS_API_KEY";

#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    pub url: String,
    pub user: String,
}

#[derive(Debug, Deserialize)]
pub struct SourceSection {
    pub location_uuid: Uuid,
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default)]
    pub list_files: bool,
    #[serde(default)]
    pub transfer_type: TransferType,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_approval_delay")]
    pub delay_secs: u64,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_approval_delay(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub processing: ServiceSection,
    pub storage: ServiceSection,
    pub source: SourceSection,
    #[serde(default)]
    pub approval: ApprovalSection,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default)]
    pub hide_on_complete: bool,
    #[serde(default)]
    pub accession_script: Option<PathBuf>,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

fn default_depth() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_approval_delay() -> u64 {
    RetryPolicy::default().delay.as_secs()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_scan_interval() -> u64 {
    300
}

fn default_database() -> PathBuf {
    PathBuf::from("am-automate.sqlite3")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("am-automate.pid")
}

/// Loads the YAML config at `path` and merges in the API keys from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AutomationConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: FileConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let processing_key = required_env(PROCESSING_KEY_VAR)?;
    let storage_key = required_env(STORAGE_KEY_VAR)?;

    let config = AutomationConfig {
        processing: ServiceConfig {
            url: raw.processing.url,
            credentials: Credentials::new(raw.processing.user, processing_key),
        },
        storage: ServiceConfig {
            url: raw.storage.url,
            credentials: Credentials::new(raw.storage.user, storage_key),
        },
        source: SourceConfig {
            location_uuid: raw.source.location_uuid,
            path_prefix: SourcePath::from(raw.source.path_prefix.as_str()),
            depth: raw.source.depth,
            list_files: raw.source.list_files,
            transfer_type: raw.source.transfer_type,
        },
        approval: RetryPolicy::new(
            raw.approval.max_attempts,
            Duration::from_secs(raw.approval.delay_secs),
        ),
        poll_interval: Duration::from_secs(raw.poll_interval_secs),
        scan_interval: Duration::from_secs(raw.scan_interval_secs),
        hide_on_complete: raw.hide_on_complete,
        accession_script: raw.accession_script,
        database: raw.database,
        pid_file: raw.pid_file,
    };

    if let Err(e) = config.validate() {
        error!(error = %e, config_path = ?path_ref, "Invalid configuration");
        return Err(anyhow!("Invalid configuration in {:?}: {e}", path_ref));
    }
    Ok(config)
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => {
            error!(var = name, "Required environment variable is missing");
            Err(anyhow!("{name} env var must be set"))
        }
    }
}
