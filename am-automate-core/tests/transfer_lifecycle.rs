use std::time::Duration;

use am_automate_core::config::RetryPolicy;
use am_automate_core::contract::{
    ApiError, Location, MockProcessingApi, PendingUnit, SourcePath, StartedTransfer, TransferType,
    UnitInfo, UnitStatus, UnitType,
};
use am_automate_core::transfer::{TransferClient, BACKLOG};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use mockall::Sequence;
use uuid::Uuid;

const LOCATION: &str = "2a3d8d39-9cee-495e-b7ee-5e629254934d";

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(1))
}

fn pending(directory: &str, uuid: Uuid) -> PendingUnit {
    PendingUnit {
        directory: directory.to_string(),
        transfer_type: "standard".to_string(),
        uuid,
    }
}

fn info(uuid: Uuid, unit_type: UnitType, status: UnitStatus, sip_uuid: Option<&str>) -> UnitInfo {
    UnitInfo {
        uuid,
        unit_type,
        status,
        name: "test1".to_string(),
        directory: Some("test1".to_string()),
        path: None,
        microservice: Some("Approve standard transfer".to_string()),
        message: None,
        sip_uuid: sip_uuid.map(str::to_owned),
    }
}

#[tokio::test]
async fn start_encodes_location_and_reports_assigned_name() {
    let expected_path = STANDARD.encode(format!("{LOCATION}:SampleTransfers/BagTransfer"));
    let mut api = MockProcessingApi::new();
    api.expect_start_transfer()
        .withf(move |req| {
            req.name == "BagTransfer"
                && req.transfer_type == TransferType::UnzippedBag
                && req.accession.as_deref() == Some("acc-1")
                && req.paths == vec![expected_path.clone()]
        })
        .times(1)
        .returning(|_| {
            Ok(StartedTransfer {
                name: "BagTransfer_1".to_string(),
                path: "/var/activeTransfers/baggitDirectory/BagTransfer_1/".to_string(),
            })
        });
    let client = TransferClient::new(api, fast_retry(1));
    let location = Location {
        uuid: Uuid::parse_str(LOCATION).unwrap(),
        path_prefix: SourcePath::from("SampleTransfers"),
    };

    let started = client
        .start(
            &SourcePath::from("SampleTransfers/BagTransfer"),
            TransferType::UnzippedBag,
            Some("acc-1"),
            &location,
        )
        .await
        .expect("start should succeed");

    assert_eq!(started.name, "BagTransfer_1");
    assert_ne!(started.name, "BagTransfer");
}

#[tokio::test]
async fn start_failure_is_returned() {
    let mut api = MockProcessingApi::new();
    api.expect_start_transfer()
        .returning(|_| Err(ApiError::invalid_response("start", "HTTP 500")));
    let client = TransferClient::new(api, fast_retry(1));
    let location = Location {
        uuid: Uuid::parse_str(LOCATION).unwrap(),
        path_prefix: SourcePath::default(),
    };

    let err = client
        .start(&SourcePath::from("a"), TransferType::Standard, None, &location)
        .await
        .expect_err("start should fail");
    assert!(err.is_invalid_response());
}

#[tokio::test]
async fn approve_picks_exact_directory_match() {
    let wanted = Uuid::new_v4();
    let mut api = MockProcessingApi::new();
    api.expect_list_unapproved().times(1).returning(move || {
        Ok(vec![
            pending("test1_1", Uuid::new_v4()),
            pending("test1", wanted),
            pending("test", Uuid::new_v4()),
        ])
    });
    api.expect_approve_unit()
        .withf(|unit| unit.directory == "test1")
        .times(1)
        .returning(|unit| Ok(unit.uuid));
    let client = TransferClient::new(api, fast_retry(3));

    assert_eq!(client.approve("test1").await, Some(wanted));
}

#[tokio::test]
async fn approve_retries_until_transfer_is_listed() {
    let wanted = Uuid::new_v4();
    let mut seq = Sequence::new();
    let mut api = MockProcessingApi::new();
    api.expect_list_unapproved()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(Vec::new()));
    api.expect_list_unapproved()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Err(ApiError::invalid_response("unapproved", "HTTP 502")));
    api.expect_list_unapproved()
        .times(1)
        .in_sequence(&mut seq)
        .returning(move || Ok(vec![pending("standard_1", wanted)]));
    api.expect_approve_unit()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|unit| Ok(unit.uuid));
    let client = TransferClient::new(api, fast_retry(5));

    assert_eq!(client.approve("standard_1").await, Some(wanted));
}

#[tokio::test]
async fn approve_gives_up_after_attempt_budget() {
    let mut api = MockProcessingApi::new();
    api.expect_list_unapproved()
        .times(3)
        .returning(|| Ok(vec![pending("someone_else", Uuid::new_v4())]));
    api.expect_approve_unit().never();
    let client = TransferClient::new(api, fast_retry(3));

    assert_eq!(client.approve("standard_1").await, None);
}

#[tokio::test]
async fn approve_call_failure_yields_none() {
    let mut api = MockProcessingApi::new();
    api.expect_list_unapproved()
        .times(1)
        .returning(|| Ok(vec![pending("standard_1", Uuid::new_v4())]));
    api.expect_approve_unit()
        .times(1)
        .returning(|_| Err(ApiError::invalid_response("approve", "HTTP 500")));
    let client = TransferClient::new(api, fast_retry(3));

    assert_eq!(client.approve("standard_1").await, None);
}

#[tokio::test]
async fn completed_transfer_status_follows_into_package() {
    let transfer = Uuid::new_v4();
    let package = Uuid::new_v4();
    let package_str = package.to_string();
    let mut api = MockProcessingApi::new();
    api.expect_unit_status()
        .withf(move |uuid, unit_type| *uuid == transfer && *unit_type == UnitType::Transfer)
        .times(1)
        .returning(move |uuid, _| {
            Ok(info(
                uuid,
                UnitType::Transfer,
                UnitStatus::Complete,
                Some(&package_str),
            ))
        });
    api.expect_unit_status()
        .withf(move |uuid, unit_type| *uuid == package && *unit_type == UnitType::Ingest)
        .times(1)
        .returning(|uuid, _| Ok(info(uuid, UnitType::Ingest, UnitStatus::UserInput, None)));
    let client = TransferClient::new(api, fast_retry(1));

    let status = client
        .status(transfer, UnitType::Transfer)
        .await
        .expect("status should succeed");

    assert_eq!(status.uuid, package);
    assert_eq!(status.unit_type, UnitType::Ingest);
    assert_eq!(status.status, UnitStatus::UserInput);
}

#[tokio::test]
async fn backlogged_transfer_is_returned_unchanged() {
    let transfer = Uuid::new_v4();
    let mut api = MockProcessingApi::new();
    api.expect_unit_status()
        .times(1)
        .returning(|uuid, _| {
            Ok(info(
                uuid,
                UnitType::Transfer,
                UnitStatus::Complete,
                Some(BACKLOG),
            ))
        });
    let client = TransferClient::new(api, fast_retry(1));

    let status = client.status(transfer, UnitType::Transfer).await.unwrap();

    assert_eq!(status.uuid, transfer);
    assert_eq!(status.status, UnitStatus::Complete);
    assert_eq!(status.sip_uuid.as_deref(), Some(BACKLOG));
}

#[tokio::test]
async fn completed_transfer_without_package_is_still_processing() {
    let transfer = Uuid::new_v4();
    let mut api = MockProcessingApi::new();
    api.expect_unit_status()
        .times(1)
        .returning(|uuid, _| Ok(info(uuid, UnitType::Transfer, UnitStatus::Complete, None)));
    let client = TransferClient::new(api, fast_retry(1));

    let status = client.status(transfer, UnitType::Transfer).await.unwrap();

    assert_eq!(status.uuid, transfer);
    assert_eq!(status.status, UnitStatus::Processing);
}

#[tokio::test]
async fn completed_package_is_not_chained_further() {
    let package = Uuid::new_v4();
    let mut api = MockProcessingApi::new();
    api.expect_unit_status()
        .times(1)
        .returning(|uuid, _| Ok(info(uuid, UnitType::Ingest, UnitStatus::Complete, None)));
    let client = TransferClient::new(api, fast_retry(1));

    let status = client.status(package, UnitType::Ingest).await.unwrap();

    assert_eq!(status.status, UnitStatus::Complete);
    assert_eq!(status.unit_type, UnitType::Ingest);
}

#[tokio::test]
async fn malformed_package_uuid_is_invalid_response() {
    let mut api = MockProcessingApi::new();
    api.expect_unit_status().times(1).returning(|uuid, _| {
        Ok(info(
            uuid,
            UnitType::Transfer,
            UnitStatus::Complete,
            Some("not-a-uuid"),
        ))
    });
    let client = TransferClient::new(api, fast_retry(1));

    let err = client
        .status(Uuid::new_v4(), UnitType::Transfer)
        .await
        .expect_err("bad sip_uuid must fail");
    assert!(err.is_invalid_response());
}
