use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::contract::{Location, SourcePath, TransferType};

/// A user + API key pair, sent as `Authorization: ApiKey user:key`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            api_key: api_key.into(),
        }
    }

    pub fn header_value(&self) -> String {
        format!("ApiKey {}:{}", self.user, self.api_key)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Base URL and credentials of one remote service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub url: String,
    pub credentials: Credentials,
}

impl ServiceConfig {
    /// Joins `path` onto the base URL without doubling the separator.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Where and how to look for new transfer sources.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub location_uuid: Uuid,
    pub path_prefix: SourcePath,
    /// Levels below the prefix at which candidates live.
    pub depth: u32,
    /// Treat files rather than directories as candidates.
    pub list_files: bool,
    pub transfer_type: TransferType,
}

impl SourceConfig {
    pub fn location(&self) -> Location {
        Location {
            uuid: self.location_uuid,
            path_prefix: self.path_prefix.clone(),
        }
    }
}

/// Bounded fixed-interval retry, used while waiting for a new transfer to show
/// up in the approval queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(6, Duration::from_secs(6))
    }
}

/// Everything the workflow needs, already merged from file and environment.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub processing: ServiceConfig,
    pub storage: ServiceConfig,
    pub source: SourceConfig,
    pub approval: RetryPolicy,
    pub poll_interval: Duration,
    pub scan_interval: Duration,
    pub hide_on_complete: bool,
    pub accession_script: Option<PathBuf>,
    pub database: PathBuf,
    pub pid_file: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("source.depth must be at least 1")]
    ZeroDepth,

    #[error("approval.max_attempts must be at least 1")]
    NoApprovalAttempts,

    #[error("{0} must be at least one second")]
    ZeroInterval(&'static str),
}

impl AutomationConfig {
    /// Rejects settings the workflow cannot run with. These are the only
    /// failures treated as fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.url.trim().is_empty() {
            return Err(ConfigError::Empty("processing.url"));
        }
        if self.processing.credentials.user.trim().is_empty() {
            return Err(ConfigError::Empty("processing.user"));
        }
        if self.storage.url.trim().is_empty() {
            return Err(ConfigError::Empty("storage.url"));
        }
        if self.storage.credentials.user.trim().is_empty() {
            return Err(ConfigError::Empty("storage.user"));
        }
        if self.source.depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        if self.approval.max_attempts == 0 {
            return Err(ConfigError::NoApprovalAttempts);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("poll_interval_secs"));
        }
        if self.scan_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("scan_interval_secs"));
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            processing_url = %self.processing.url,
            storage_url = %self.storage.url,
            location = %self.source.location_uuid,
            path_prefix = %self.source.path_prefix,
            depth = self.source.depth,
            list_files = self.source.list_files,
            transfer_type = self.source.transfer_type.as_str(),
            database = %self.database.display(),
            "Loaded automation config"
        );
        debug!(?self, "Automation config loaded (full debug)");
    }
}
