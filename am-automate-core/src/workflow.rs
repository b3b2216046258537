//! # workflow: the control loop that moves one source at a time through processing
//!
//! [`WorkflowDriver`] ties the scanner, the transfer lifecycle and the unit
//! store together. Each [`WorkflowDriver::tick`] advances the single in-flight
//! unit by one step, or picks new work when nothing is in flight:
//!
//! ```text
//! IDLE -> SOURCE_SELECTED -> STARTED -> APPROVAL_PENDING -> APPROVED -> POLLING
//!      -> { USER_INPUT | COMPLETE | FAILED | REJECTED }
//! ```
//!
//! # Major Types
//! - [`WorkflowDriver`]: owns the collaborators and runs ticks.
//! - [`DriverSettings`]: source selection and loop cadence.
//! - [`TickOutcome`]: what one tick did, and which [`WorkflowState`] it left the work in.
//!
//! # Resumption
//! A current unit in the store always wins over scanning. A unit without a
//! uuid was started but never approved and goes back to approval; a unit with
//! a uuid is polled. Restarting the process therefore never starts the same
//! source twice.
//!
//! # Error Handling
//! Remote failures are outcomes, not errors: a failed start, an approval that
//! never lands, or an unreadable status reply each map to a [`TickOutcome`]
//! and the loop carries on. Only [`StoreError`]s escape, wrapped in
//! [`WorkflowError`], because losing track of local state is not recoverable
//! by waiting.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::accession::AccessionLookup;
use crate::config::{AutomationConfig, SourceConfig};
use crate::contract::{ProcessingApi, SourcePath, StorageBrowser, Unit, UnitStatus, UnitType};
use crate::listing::StorageClient;
use crate::scanner::SourceScanner;
use crate::store::{NewUnit, StoreError, UnitStore, UnitUpdate};
use crate::transfer::{ProcessingClient, TransferClient};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unit store failure: {0}")]
    Store(#[from] StoreError),
}

/// Where a unit of work stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    SourceSelected,
    Started,
    ApprovalPending,
    Approved,
    Polling,
    UserInput,
    Complete,
    Failed,
    Rejected,
}

impl WorkflowState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Idle => "IDLE",
            WorkflowState::SourceSelected => "SOURCE_SELECTED",
            WorkflowState::Started => "STARTED",
            WorkflowState::ApprovalPending => "APPROVAL_PENDING",
            WorkflowState::Approved => "APPROVED",
            WorkflowState::Polling => "POLLING",
            WorkflowState::UserInput => "USER_INPUT",
            WorkflowState::Complete => "COMPLETE",
            WorkflowState::Failed => "FAILED",
            WorkflowState::Rejected => "REJECTED",
        }
    }

    fn from_status(status: UnitStatus) -> Self {
        match status {
            UnitStatus::Complete => WorkflowState::Complete,
            UnitStatus::Rejected => WorkflowState::Rejected,
            UnitStatus::UserInput => WorkflowState::UserInput,
            UnitStatus::Processing => WorkflowState::Polling,
            UnitStatus::Failed => WorkflowState::Failed,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single [`WorkflowDriver::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing in flight and nothing left to start.
    Idle,
    /// A source was selected but the processing system refused to start it.
    /// Nothing was persisted, so it is selected again next time.
    StartFailed { path: SourcePath },
    /// The transfer never showed up for approval; the unit stays current.
    ApprovalFailed { unit: Unit },
    /// The status call failed; try again later.
    NoProgress { unit: Unit },
    InProgress { unit: Unit },
    /// Processing waits for a human decision.
    AwaitingUserInput { unit: Unit },
    /// The unit reached COMPLETE, FAILED or REJECTED and was retired.
    Finished { unit: Unit },
}

impl TickOutcome {
    pub fn state(&self) -> WorkflowState {
        match self {
            TickOutcome::Idle => WorkflowState::Idle,
            TickOutcome::StartFailed { .. } => WorkflowState::SourceSelected,
            TickOutcome::ApprovalFailed { .. } => WorkflowState::ApprovalPending,
            TickOutcome::NoProgress { .. } | TickOutcome::InProgress { .. } => {
                WorkflowState::Polling
            }
            TickOutcome::AwaitingUserInput { .. } => WorkflowState::UserInput,
            TickOutcome::Finished { unit } => unit
                .status
                .map(WorkflowState::from_status)
                .unwrap_or(WorkflowState::Complete),
        }
    }

    pub fn unit(&self) -> Option<&Unit> {
        match self {
            TickOutcome::Idle | TickOutcome::StartFailed { .. } => None,
            TickOutcome::ApprovalFailed { unit }
            | TickOutcome::NoProgress { unit }
            | TickOutcome::InProgress { unit }
            | TickOutcome::AwaitingUserInput { unit }
            | TickOutcome::Finished { unit } => Some(unit),
        }
    }

    /// How long the loop waits before the next tick.
    ///
    /// Work in flight is polled at `poll_interval`; idle or failed ticks wait
    /// `scan_interval`. A finished unit moves straight on to the next source.
    pub fn next_delay(&self, settings: &DriverSettings) -> Duration {
        match self {
            TickOutcome::Finished { .. } => Duration::ZERO,
            TickOutcome::NoProgress { .. }
            | TickOutcome::InProgress { .. }
            | TickOutcome::AwaitingUserInput { .. } => settings.poll_interval,
            TickOutcome::Idle
            | TickOutcome::StartFailed { .. }
            | TickOutcome::ApprovalFailed { .. } => settings.scan_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub source: SourceConfig,
    pub hide_on_complete: bool,
    pub poll_interval: Duration,
    pub scan_interval: Duration,
}

impl From<&AutomationConfig> for DriverSettings {
    fn from(config: &AutomationConfig) -> Self {
        Self {
            source: config.source.clone(),
            hide_on_complete: config.hide_on_complete,
            poll_interval: config.poll_interval,
            scan_interval: config.scan_interval,
        }
    }
}

pub struct WorkflowDriver<B, A> {
    scanner: SourceScanner<B>,
    transfers: TransferClient<A>,
    store: UnitStore,
    accession: AccessionLookup,
    settings: DriverSettings,
}

impl WorkflowDriver<StorageClient, ProcessingClient> {
    /// Driver wired to the real storage and processing services.
    pub fn connect(config: &AutomationConfig, store: UnitStore) -> Self {
        let scanner = SourceScanner::new(
            StorageClient::new(config.storage.clone()),
            config.source.location_uuid,
        );
        let transfers = TransferClient::new(
            ProcessingClient::new(config.processing.clone()),
            config.approval,
        );
        Self::new(
            scanner,
            transfers,
            store,
            AccessionLookup::new(config.accession_script.clone()),
            DriverSettings::from(config),
        )
    }
}

impl<B: StorageBrowser, A: ProcessingApi> WorkflowDriver<B, A> {
    pub fn new(
        scanner: SourceScanner<B>,
        transfers: TransferClient<A>,
        store: UnitStore,
        accession: AccessionLookup,
        settings: DriverSettings,
    ) -> Self {
        Self {
            scanner,
            transfers,
            store,
            accession,
            settings,
        }
    }

    pub fn store(&self) -> &UnitStore {
        &self.store
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn into_store(self) -> UnitStore {
        self.store
    }

    /// Runs ticks until a store error occurs.
    pub async fn run(&self) -> Result<(), WorkflowError> {
        loop {
            let outcome = self.tick().await?;
            let delay = outcome.next_delay(&self.settings);
            debug!(
                state = %outcome.state(),
                delay_secs = delay.as_secs(),
                "Tick finished"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Advances the workflow by one step.
    pub async fn tick(&self) -> Result<TickOutcome, WorkflowError> {
        if let Some(unit) = self.store.current_unit().await? {
            info!(
                id = unit.id,
                uuid = ?unit.uuid,
                path = %unit.path,
                unit_type = %unit.unit_type,
                "Resuming current unit"
            );
            return match unit.uuid {
                None => self.approve(unit).await,
                Some(uuid) => self.poll(unit, uuid).await,
            };
        }

        let completed = self.store.completed_paths().await?;
        let source = &self.settings.source;
        let Some(path) = self
            .scanner
            .next_candidate(&source.path_prefix, source.depth, &completed, source.list_files)
            .await
        else {
            info!(state = %WorkflowState::Idle, "No new source to process");
            return Ok(TickOutcome::Idle);
        };

        self.start(path).await
    }

    async fn start(&self, path: SourcePath) -> Result<TickOutcome, WorkflowError> {
        info!(state = %WorkflowState::SourceSelected, path = %path, "Starting new transfer");
        let source = &self.settings.source;
        let accession = self.accession.lookup(&path).await;

        let started = match self
            .transfers
            .start(
                &path,
                source.transfer_type,
                accession.as_deref(),
                &source.location(),
            )
            .await
        {
            Ok(started) => started,
            Err(e) => {
                error!(path = %path, error = %e, "Transfer could not be started");
                return Ok(TickOutcome::StartFailed { path });
            }
        };

        let unit = self
            .store
            .add_unit(NewUnit::started_transfer(path, started.name))
            .await?;
        info!(
            state = %WorkflowState::Started,
            id = unit.id,
            directory = unit.directory_name.as_deref().unwrap_or(""),
            "Transfer started"
        );
        self.approve(unit).await
    }

    async fn approve(&self, unit: Unit) -> Result<TickOutcome, WorkflowError> {
        let directory = unit
            .directory_name
            .clone()
            .unwrap_or_else(|| String::from_utf8_lossy(unit.path.file_name()).into_owned());
        info!(state = %WorkflowState::ApprovalPending, directory = %directory, "Waiting for approval");

        let Some(uuid) = self.transfers.approve(&directory).await else {
            let unit = self
                .store
                .update_unit(
                    unit.id,
                    UnitUpdate {
                        status: Some(UnitStatus::Failed),
                        ..UnitUpdate::default()
                    },
                )
                .await?;
            error!(
                id = unit.id,
                directory = %directory,
                "Transfer could not be approved; left current for manual intervention"
            );
            return Ok(TickOutcome::ApprovalFailed { unit });
        };

        let unit = self
            .store
            .update_unit(
                unit.id,
                UnitUpdate {
                    uuid: Some(uuid),
                    status: Some(UnitStatus::Processing),
                    ..UnitUpdate::default()
                },
            )
            .await?;
        info!(state = %WorkflowState::Approved, id = unit.id, uuid = %uuid, "Transfer approved");
        self.poll(unit, uuid).await
    }

    async fn poll(&self, unit: Unit, uuid: Uuid) -> Result<TickOutcome, WorkflowError> {
        let info = match self.transfers.status(uuid, unit.unit_type).await {
            Ok(info) => info,
            Err(e) => {
                warn!(uuid = %uuid, unit_type = %unit.unit_type, error = %e, "Status unavailable, no progress this tick");
                return Ok(TickOutcome::NoProgress { unit });
            }
        };

        let unit = if info.uuid != uuid || info.unit_type != unit.unit_type {
            self.store.promote(&unit, &info).await?
        } else {
            self.store
                .update_unit(unit.id, UnitUpdate::from_info(&info))
                .await?
        };
        info!(
            state = %WorkflowState::Polling,
            uuid = %info.uuid,
            unit_type = %info.unit_type,
            status = %info.status,
            microservice = info.microservice.as_deref().unwrap_or(""),
            "Polled unit status"
        );

        if info.status.is_terminal() {
            let unit = self.store.retire(unit.id, info.status).await?;
            if info.status == UnitStatus::Complete && self.settings.hide_on_complete {
                self.hide_finished(&unit).await;
            }
            return Ok(TickOutcome::Finished { unit });
        }

        if info.status == UnitStatus::UserInput {
            warn!(
                uuid = %info.uuid,
                microservice = info.microservice.as_deref().unwrap_or(""),
                "Unit awaits user input"
            );
            return Ok(TickOutcome::AwaitingUserInput { unit });
        }
        Ok(TickOutcome::InProgress { unit })
    }

    async fn hide_finished(&self, unit: &Unit) {
        let mut targets = Vec::with_capacity(2);
        if let Some(uuid) = unit.uuid {
            targets.push((uuid, unit.unit_type));
        }
        if let Some(parent) = unit.parent_uuid {
            targets.push((parent, UnitType::Transfer));
        }

        for (uuid, unit_type) in targets {
            if let Err(e) = self.transfers.hide(uuid, unit_type).await {
                warn!(uuid = %uuid, unit_type = %unit_type, error = %e, "Failed to hide unit");
            }
        }
    }
}
