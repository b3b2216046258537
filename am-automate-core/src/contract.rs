//! # contract: shared types and trait seams for the automation core
//!
//! This module defines the plain data that flows between the scanner, the
//! transfer lifecycle and the unit store, plus the two traits that sit in front
//! of the remote services:
//!
//! - [`StorageBrowser`]: one browse call against the storage service.
//! - [`ProcessingApi`]: the raw REST operations of the processing system.
//!
//! Both traits are annotated for `mockall`, so the driver and the lifecycle
//! logic can be exercised without a network. Concrete reqwest clients live in
//! [`crate::listing`] and [`crate::transfer`].
//!
//! ## Error Handling
//! Remote calls never panic. Every failure comes back as an [`ApiError`];
//! [`ApiError::is_invalid_response`] identifies the "non-2xx or non-JSON"
//! marker that callers treat as "no progress this tick".

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A location relative to a storage-service root, kept as raw bytes.
///
/// Names arrive base64-encoded from the storage service and are not required
/// to be UTF-8, so nothing here assumes they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourcePath(Vec<u8>);

impl SourcePath {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends one segment with a `/` separator. Joining onto an empty path
    /// yields the bare segment, so scans from the root never gain a leading `/`.
    pub fn join(&self, segment: &[u8]) -> SourcePath {
        if self.0.is_empty() {
            return SourcePath(segment.to_vec());
        }
        let mut joined = self.0.clone();
        if !joined.ends_with(b"/") {
            joined.push(b'/');
        }
        joined.extend_from_slice(segment);
        SourcePath(joined)
    }

    /// Last non-empty component, ignoring trailing slashes.
    pub fn file_name(&self) -> &[u8] {
        let trimmed = trim_trailing_slashes(&self.0);
        match trimmed.iter().rposition(|b| *b == b'/') {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }
}

fn trim_trailing_slashes(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b'/' {
        end -= 1;
    }
    &bytes[..end]
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for SourcePath {
    fn from(value: &str) -> Self {
        SourcePath(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for SourcePath {
    fn from(value: &[u8]) -> Self {
        SourcePath(value.to_vec())
    }
}

impl From<Vec<u8>> for SourcePath {
    fn from(value: Vec<u8>) -> Self {
        SourcePath(value)
    }
}

/// Source paths that have already been turned into transfers.
pub type CompletedSet = BTreeSet<SourcePath>;

/// Where to look for new work on the storage service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub uuid: Uuid,
    pub path_prefix: SourcePath,
}

/// The two kinds of unit the processing system reports on.
///
/// Each variant knows the URL segment of its endpoints and how the status
/// payload spells its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Transfer,
    /// A downstream package (SIP) a transfer is promoted into.
    Ingest,
}

impl UnitType {
    /// URL segment under `/api/`, also the value persisted by the store.
    pub fn as_str(self) -> &'static str {
        match self {
            UnitType::Transfer => "transfer",
            UnitType::Ingest => "ingest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "transfer" => Some(UnitType::Transfer),
            "ingest" => Some(UnitType::Ingest),
            _ => None,
        }
    }

    /// Maps the `type` field of a status payload (`transfer` or `SIP`).
    pub fn from_status_type(value: &str) -> Option<Self> {
        match value {
            "transfer" => Some(UnitType::Transfer),
            "SIP" | "ingest" => Some(UnitType::Ingest),
            _ => None,
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status as reported by the processing system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    Processing,
    UserInput,
    Complete,
    Failed,
    Rejected,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Processing => "PROCESSING",
            UnitStatus::UserInput => "USER_INPUT",
            UnitStatus::Complete => "COMPLETE",
            UnitStatus::Failed => "FAILED",
            UnitStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PROCESSING" => Some(UnitStatus::Processing),
            "USER_INPUT" => Some(UnitStatus::UserInput),
            "COMPLETE" => Some(UnitStatus::Complete),
            "FAILED" => Some(UnitStatus::Failed),
            "REJECTED" => Some(UnitStatus::Rejected),
            _ => None,
        }
    }

    /// COMPLETE, FAILED and REJECTED retire a unit.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitStatus::Complete | UnitStatus::Failed | UnitStatus::Rejected
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer types accepted by the start endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferType {
    #[default]
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "unzipped bag")]
    UnzippedBag,
    #[serde(rename = "zipped bag")]
    ZippedBag,
    #[serde(rename = "dspace")]
    Dspace,
    #[serde(rename = "maildir")]
    Maildir,
    #[serde(rename = "TRIM")]
    Trim,
    #[serde(rename = "dataverse")]
    Dataverse,
    #[serde(rename = "zipfile")]
    Zipfile,
}

impl TransferType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferType::Standard => "standard",
            TransferType::UnzippedBag => "unzipped bag",
            TransferType::ZippedBag => "zipped bag",
            TransferType::Dspace => "dspace",
            TransferType::Maildir => "maildir",
            TransferType::Trim => "TRIM",
            TransferType::Dataverse => "dataverse",
            TransferType::Zipfile => "zipfile",
        }
    }
}

/// Form payload for the start-transfer endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTransferRequest {
    /// Requested name; the processing system may rename it.
    pub name: String,
    pub transfer_type: TransferType,
    pub accession: Option<String>,
    /// Base64 of `<location uuid>:<path>` for each source.
    pub paths: Vec<String>,
}

/// What the processing system reports after copying a transfer in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedTransfer {
    /// Final directory name, taken from the returned path.
    pub name: String,
    /// Absolute path inside the processing area, as returned.
    pub path: String,
}

/// An entry of the pending-approval queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUnit {
    pub directory: String,
    /// Transfer type as spelled by the processing system (e.g. `unzipped bag`).
    #[serde(rename = "type")]
    pub transfer_type: String,
    pub uuid: Uuid,
}

/// A decoded status payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub uuid: Uuid,
    pub unit_type: UnitType,
    pub status: UnitStatus,
    pub name: String,
    pub directory: Option<String>,
    pub path: Option<String>,
    pub microservice: Option<String>,
    pub message: Option<String>,
    /// Downstream package a completed transfer was promoted into, or `BACKLOG`.
    pub sip_uuid: Option<String>,
}

/// A unit of work as recorded locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Local row id.
    pub id: i64,
    /// Assigned by the processing system; unknown until approval succeeds.
    pub uuid: Option<Uuid>,
    pub path: SourcePath,
    pub unit_type: UnitType,
    pub status: Option<UnitStatus>,
    pub microservice: Option<String>,
    pub directory_name: Option<String>,
    pub current: bool,
    /// The transfer this unit was promoted from.
    pub parent_uuid: Option<Uuid>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx status, non-JSON body or a payload missing required fields.
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("entry {entry:?} from {url} is not valid base64")]
    MalformedEntry { url: String, entry: String },
}

impl ApiError {
    pub fn invalid_response(url: impl Into<String>, reason: impl Into<String>) -> Self {
        ApiError::InvalidResponse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn is_invalid_response(&self) -> bool {
        matches!(self, ApiError::InvalidResponse { .. })
    }
}

/// One browse call against the storage service.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait StorageBrowser: Send + Sync {
    /// Lists the decoded entry names under `path` in the given location, in
    /// the order the service returned them. `list_files` selects file entries
    /// instead of directories.
    async fn browse(
        &self,
        location_uuid: Uuid,
        path: &[u8],
        list_files: bool,
    ) -> Result<Vec<Vec<u8>>, ApiError>;
}

/// Raw REST operations of the processing system.
///
/// Implementations perform exactly one request per call; retrying, renaming
/// and status chaining are layered on top by [`crate::transfer::TransferClient`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ProcessingApi: Send + Sync {
    async fn start_transfer(&self, req: &StartTransferRequest)
        -> Result<StartedTransfer, ApiError>;

    async fn list_unapproved(&self) -> Result<Vec<PendingUnit>, ApiError>;

    /// Approves a pending unit and returns the uuid the service assigned.
    async fn approve_unit(&self, unit: &PendingUnit) -> Result<Uuid, ApiError>;

    /// Status of a single unit, without following promotions.
    async fn unit_status(&self, uuid: Uuid, unit_type: UnitType) -> Result<UnitInfo, ApiError>;

    /// Removes a finished unit from the processing system's dashboard.
    async fn hide_unit(&self, uuid: Uuid, unit_type: UnitType) -> Result<(), ApiError>;
}
