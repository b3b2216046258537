//! # transfer: processing-system client and transfer lifecycle operations
//!
//! Two layers live here:
//!
//! - [`ProcessingClient`] speaks the processing system's REST API, one request
//!   per call, and implements [`ProcessingApi`].
//! - [`TransferClient`] wraps any [`ProcessingApi`] and adds the lifecycle
//!   rules the workflow relies on:
//!   - `start` reports the name the processing system actually assigned, which
//!     differs from the requested one when a transfer of that name is active.
//!   - `approve` waits for the new transfer to appear in the approval queue,
//!     retrying per its [`RetryPolicy`].
//!   - `status` follows a completed transfer into the downstream package it
//!     was promoted into, so callers always see the live unit.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{RetryPolicy, ServiceConfig};
use crate::contract::{
    ApiError, Location, PendingUnit, ProcessingApi, SourcePath, StartTransferRequest,
    StartedTransfer, TransferType, UnitInfo, UnitStatus, UnitType,
};
use crate::http::{authorized, call_json, send};

/// `sip_uuid` value of a completed transfer that was sent to backlog instead
/// of being promoted.
pub const BACKLOG: &str = "BACKLOG";

/// Last non-empty component of a slash-separated path.
pub fn final_component(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    path: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnapprovedResponse {
    #[serde(default)]
    results: Vec<PendingUnit>,
}

#[derive(Debug, Deserialize)]
struct ApproveResponse {
    uuid: Uuid,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    name: String,
    uuid: Uuid,
    #[serde(rename = "type")]
    unit_type: String,
    directory: Option<String>,
    path: Option<String>,
    microservice: Option<String>,
    message: Option<String>,
    sip_uuid: Option<String>,
}

impl StatusResponse {
    fn into_info(self, url: &str) -> Result<UnitInfo, ApiError> {
        let unit_type = UnitType::from_status_type(&self.unit_type).ok_or_else(|| {
            ApiError::invalid_response(url, format!("unknown unit type {:?}", self.unit_type))
        })?;
        let status = UnitStatus::parse(&self.status).unwrap_or_else(|| {
            warn!(url = %url, status = %self.status, "Unrecognised unit status, treating as processing");
            UnitStatus::Processing
        });
        Ok(UnitInfo {
            uuid: self.uuid,
            unit_type,
            status,
            name: self.name,
            directory: self.directory,
            path: self.path,
            microservice: self.microservice,
            message: self.message,
            sip_uuid: self.sip_uuid,
        })
    }
}

pub struct ProcessingClient {
    client: Client,
    service: ServiceConfig,
}

impl ProcessingClient {
    pub fn new(service: ServiceConfig) -> Self {
        Self {
            client: Client::new(),
            service,
        }
    }
}

#[async_trait]
impl ProcessingApi for ProcessingClient {
    async fn start_transfer(
        &self,
        req: &StartTransferRequest,
    ) -> Result<StartedTransfer, ApiError> {
        let url = self.service.endpoint("api/transfer/start_transfer/");
        info!(
            name = %req.name,
            transfer_type = req.transfer_type.as_str(),
            accession = req.accession.as_deref().unwrap_or(""),
            "Starting transfer"
        );

        let mut form: Vec<(&str, &str)> = vec![
            ("name", req.name.as_str()),
            ("type", req.transfer_type.as_str()),
            ("accession", req.accession.as_deref().unwrap_or("")),
        ];
        for path in &req.paths {
            form.push(("paths[]", path.as_str()));
        }
        form.push(("row_ids[]", ""));

        let request = authorized(self.client.post(&url).form(&form), &self.service.credentials);
        let response: StartResponse = call_json(&url, request).await?;
        let path = response
            .path
            .ok_or_else(|| ApiError::invalid_response(&url, "start response has no path"))?;
        let name = final_component(&path).to_string();
        debug!(
            name = %name,
            path = %path,
            message = response.message.as_deref().unwrap_or(""),
            "Transfer copied into processing area"
        );
        Ok(StartedTransfer { name, path })
    }

    async fn list_unapproved(&self) -> Result<Vec<PendingUnit>, ApiError> {
        let url = self.service.endpoint("api/transfer/unapproved");
        let request = authorized(self.client.get(&url), &self.service.credentials);
        let response: UnapprovedResponse = call_json(&url, request).await?;
        debug!(pending = response.results.len(), "Fetched unapproved transfers");
        Ok(response.results)
    }

    async fn approve_unit(&self, unit: &PendingUnit) -> Result<Uuid, ApiError> {
        let url = self.service.endpoint("api/transfer/approve/");
        let form = [
            ("type", unit.transfer_type.as_str()),
            ("directory", unit.directory.as_str()),
        ];
        let request = authorized(self.client.post(&url).form(&form), &self.service.credentials);
        let response: ApproveResponse = call_json(&url, request).await?;
        Ok(response.uuid)
    }

    async fn unit_status(&self, uuid: Uuid, unit_type: UnitType) -> Result<UnitInfo, ApiError> {
        let url = self
            .service
            .endpoint(&format!("api/{}/status/{uuid}/", unit_type.as_str()));
        let request = authorized(self.client.get(&url), &self.service.credentials);
        let response: StatusResponse = call_json(&url, request).await?;
        response.into_info(&url)
    }

    async fn hide_unit(&self, uuid: Uuid, unit_type: UnitType) -> Result<(), ApiError> {
        let url = self
            .service
            .endpoint(&format!("api/{}/{uuid}/delete/", unit_type.as_str()));
        let request = authorized(self.client.delete(&url), &self.service.credentials);
        send(&url, request).await?;
        info!(uuid = %uuid, unit_type = %unit_type, "Hid unit from dashboard");
        Ok(())
    }
}

/// Lifecycle operations over a [`ProcessingApi`].
pub struct TransferClient<A> {
    api: A,
    approval: RetryPolicy,
}

impl<A: ProcessingApi> TransferClient<A> {
    pub fn new(api: A, approval: RetryPolicy) -> Self {
        Self { api, approval }
    }

    /// Copies `target` from the storage location into the processing area.
    ///
    /// The returned name is the one the processing system assigned, which is
    /// what must be used to find the transfer in the approval queue.
    pub async fn start(
        &self,
        target: &SourcePath,
        transfer_type: TransferType,
        accession: Option<&str>,
        location: &Location,
    ) -> Result<StartedTransfer, ApiError> {
        let mut source = location.uuid.to_string().into_bytes();
        source.push(b':');
        source.extend_from_slice(target.as_bytes());

        let request = StartTransferRequest {
            name: String::from_utf8_lossy(target.file_name()).into_owned(),
            transfer_type,
            accession: accession.map(str::to_owned),
            paths: vec![STANDARD.encode(&source)],
        };
        let started = self.api.start_transfer(&request).await?;
        if started.name != request.name {
            info!(
                requested = %request.name,
                assigned = %started.name,
                "Processing system renamed the transfer"
            );
        }
        Ok(started)
    }

    /// Approves the pending transfer whose directory is exactly
    /// `directory_name` and returns its uuid.
    ///
    /// New transfers reach the approval queue asynchronously, so a missing
    /// entry (or a failed listing) is retried up to the policy's attempt
    /// budget. `None` means the transfer never showed up or the approve call
    /// itself failed.
    pub async fn approve(&self, directory_name: &str) -> Option<Uuid> {
        let attempts = self.approval.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.api.list_unapproved().await {
                Ok(pending) => {
                    if let Some(unit) = pending.into_iter().find(|u| u.directory == directory_name)
                    {
                        return match self.api.approve_unit(&unit).await {
                            Ok(uuid) => {
                                info!(directory = %directory_name, uuid = %uuid, attempt, "Approved transfer");
                                Some(uuid)
                            }
                            Err(e) => {
                                error!(directory = %directory_name, error = %e, "Approve call failed");
                                None
                            }
                        };
                    }
                    debug!(directory = %directory_name, attempt, "Transfer not yet awaiting approval");
                }
                Err(e) => {
                    warn!(directory = %directory_name, attempt, error = %e, "Could not list unapproved transfers");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.approval.delay).await;
            }
        }
        warn!(directory = %directory_name, attempts, "Transfer never appeared in the approval queue");
        None
    }

    /// Live status of the unit that currently represents the work.
    ///
    /// A transfer reported COMPLETE has been promoted into a downstream
    /// package; its status is fetched and returned instead. Transfers sent to
    /// backlog come back as-is, and a COMPLETE transfer whose package is not
    /// registered yet is reported as still processing.
    pub async fn status(&self, uuid: Uuid, unit_type: UnitType) -> Result<UnitInfo, ApiError> {
        let info = self.api.unit_status(uuid, unit_type).await?;
        if unit_type != UnitType::Transfer || info.status != UnitStatus::Complete {
            return Ok(info);
        }

        match info.sip_uuid.as_deref() {
            Some(BACKLOG) => {
                info!(uuid = %uuid, "Transfer was sent to backlog");
                Ok(info)
            }
            Some(raw) => {
                let sip_uuid = Uuid::parse_str(raw).map_err(|_| {
                    ApiError::invalid_response(
                        format!("status of transfer {uuid}"),
                        format!("sip_uuid {raw:?} is not a uuid"),
                    )
                })?;
                debug!(transfer = %uuid, ingest = %sip_uuid, "Following promoted transfer");
                self.api.unit_status(sip_uuid, UnitType::Ingest).await
            }
            None => {
                debug!(uuid = %uuid, "Completed transfer has no package yet");
                Ok(UnitInfo {
                    status: UnitStatus::Processing,
                    ..info
                })
            }
        }
    }

    pub async fn hide(&self, uuid: Uuid, unit_type: UnitType) -> Result<(), ApiError> {
        self.api.hide_unit(uuid, unit_type).await
    }
}
