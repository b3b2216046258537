use am_automate_core::config::{Credentials, ServiceConfig};
use am_automate_core::contract::{CompletedSet, MockStorageBrowser, SourcePath};
use am_automate_core::listing::StorageClient;
use am_automate_core::scanner::SourceScanner;
use httpmock::prelude::*;
use serde_json::json;
use uuid::Uuid;

const LOCATION: &str = "2a3d8d39-9cee-495e-b7ee-5e629254934d";
const BROWSE_PATH: &str = "/api/v2/location/2a3d8d39-9cee-495e-b7ee-5e629254934d/browse/";

fn location() -> Uuid {
    Uuid::parse_str(LOCATION).unwrap()
}

fn scanner_for(server: &MockServer) -> SourceScanner<StorageClient> {
    let client = StorageClient::new(ServiceConfig {
        url: server.base_url(),
        credentials: Credentials::new("test", "7016762e"),
    });
    SourceScanner::new(client, location())
}

fn completed(paths: &[&str]) -> CompletedSet {
    paths.iter().map(|p| SourcePath::from(*p)).collect()
}

#[tokio::test]
async fn first_run_selects_first_directory() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path(BROWSE_PATH)
            .query_param("path", "U2FtcGxlVHJhbnNmZXJz");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "directories": ["QmFnVHJhbnNmZXI=", "Q1NWbWV0YWRhdGE="],
                "entries": ["QmFnVHJhbnNmZXI=", "Q1NWbWV0YWRhdGE="]
            }));
    });

    let candidate = scanner_for(&server)
        .next_candidate(&SourcePath::from("SampleTransfers"), 1, &CompletedSet::new(), false)
        .await;

    mock.assert();
    assert_eq!(candidate, Some(SourcePath::from("SampleTransfers/BagTransfer")));
}

#[tokio::test]
async fn completed_paths_are_skipped() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET)
            .path(BROWSE_PATH)
            .query_param("path", "U2FtcGxlVHJhbnNmZXJz");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "directories": ["QmFnVHJhbnNmZXI=", "Q1NWbWV0YWRhdGE="]
            }));
    });

    let candidate = scanner_for(&server)
        .next_candidate(
            &SourcePath::from("SampleTransfers"),
            1,
            &completed(&["SampleTransfers/BagTransfer"]),
            false,
        )
        .await;

    assert_eq!(candidate, Some(SourcePath::from("SampleTransfers/CSVmetadata")));
}

#[tokio::test]
async fn depth_two_descends_into_first_directory() {
    let server = MockServer::start_async().await;
    let top = server.mock(|when, then| {
        when.method(GET)
            .path(BROWSE_PATH)
            .query_param("path", "U2FtcGxlVHJhbnNmZXJz");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "directories": ["QmFnVHJhbnNmZXI="] }));
    });
    let nested = server.mock(|when, then| {
        when.method(GET)
            .path(BROWSE_PATH)
            .query_param("path", "U2FtcGxlVHJhbnNmZXJzL0JhZ1RyYW5zZmVy");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "directories": ["ZGF0YQ=="] }));
    });

    let candidate = scanner_for(&server)
        .next_candidate(&SourcePath::from("SampleTransfers"), 2, &CompletedSet::new(), false)
        .await;

    top.assert();
    nested.assert();
    assert_eq!(
        candidate,
        Some(SourcePath::from("SampleTransfers/BagTransfer/data"))
    );
}

#[tokio::test]
async fn empty_prefix_scans_from_location_root() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET).path(BROWSE_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "directories": ["T1BGIGZvcm1hdC1jb3JwdXM="] }));
    });

    let candidate = scanner_for(&server)
        .next_candidate(&SourcePath::default(), 1, &CompletedSet::new(), false)
        .await;

    mock.assert();
    assert_eq!(candidate, Some(SourcePath::from("OPF format-corpus")));
}

#[tokio::test]
async fn everything_completed_yields_none() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path(BROWSE_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "directories": ["QmFnVHJhbnNmZXI=", "Q1NWbWV0YWRhdGE="]
            }));
    });

    let candidate = scanner_for(&server)
        .next_candidate(
            &SourcePath::from("SampleTransfers"),
            1,
            &completed(&["SampleTransfers/BagTransfer", "SampleTransfers/CSVmetadata"]),
            false,
        )
        .await;

    assert_eq!(candidate, None);
}

#[tokio::test]
async fn unknown_location_yields_none() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path(BROWSE_PATH);
        then.status(404)
            .header("content-type", "text/html")
            .body("<h1>Not Found</h1>");
    });

    let candidate = scanner_for(&server)
        .next_candidate(&SourcePath::from("SampleTransfers"), 1, &CompletedSet::new(), false)
        .await;

    assert_eq!(candidate, None);
}

#[tokio::test]
async fn rejected_credentials_yield_none() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path(BROWSE_PATH);
        then.status(401)
            .header("content-type", "application/json")
            .json_body(json!({ "detail": "Invalid API key" }));
    });

    let candidate = scanner_for(&server)
        .next_candidate(&SourcePath::from("SampleTransfers"), 1, &CompletedSet::new(), false)
        .await;

    assert_eq!(candidate, None);
}

#[tokio::test]
async fn file_listing_selects_entries() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path(BROWSE_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "directories": ["Q1NWbWV0YWRhdGE="],
                "entries": ["Q1NWbWV0YWRhdGE=", "QmFnVHJhbnNmZXIuemlw"]
            }));
    });

    let candidate = scanner_for(&server)
        .next_candidate(
            &SourcePath::from("SampleTransfers"),
            1,
            &completed(&["SampleTransfers/CSVmetadata"]),
            true,
        )
        .await;

    assert_eq!(
        candidate,
        Some(SourcePath::from("SampleTransfers/BagTransfer.zip"))
    );
}

fn browser_with_tree() -> MockStorageBrowser {
    let mut browser = MockStorageBrowser::new();
    browser.expect_browse().returning(|_, path, _| {
        let children: &[&str] = match path {
            b"root" => &["a", "b"],
            b"root/a" => &["a1", "a2"],
            b"root/a/a1" => &["x", "y"],
            _ => &[],
        };
        Ok(children.iter().map(|c| c.as_bytes().to_vec()).collect())
    });
    browser
}

#[tokio::test]
async fn repeated_scans_are_deterministic() {
    let scanner = SourceScanner::new(browser_with_tree(), location());
    let done = completed(&["root/a/a1/x"]);

    let first = scanner
        .next_candidate(&SourcePath::from("root"), 3, &done, false)
        .await;
    let second = scanner
        .next_candidate(&SourcePath::from("root"), 3, &done, false)
        .await;

    assert_eq!(first, Some(SourcePath::from("root/a/a1/y")));
    assert_eq!(first, second);
}

#[tokio::test]
async fn candidates_live_exactly_at_the_requested_depth() {
    let scanner = SourceScanner::new(browser_with_tree(), location());
    let root = SourcePath::from("root");

    for (depth, expected) in [(1, "root/a"), (2, "root/a/a1"), (3, "root/a/a1/x")] {
        let candidate = scanner
            .next_candidate(&root, depth, &CompletedSet::new(), false)
            .await
            .expect("tree has a candidate at this depth");
        assert_eq!(candidate, SourcePath::from(expected));
        let levels = candidate.as_bytes().iter().filter(|b| **b == b'/').count();
        assert_eq!(levels, depth as usize);
    }
}

#[tokio::test]
async fn depth_zero_behaves_like_depth_one() {
    let scanner = SourceScanner::new(browser_with_tree(), location());

    let candidate = scanner
        .next_candidate(&SourcePath::from("root"), 0, &CompletedSet::new(), false)
        .await;

    assert_eq!(candidate, Some(SourcePath::from("root/a")));
}

#[tokio::test]
async fn empty_intermediate_directory_does_not_backtrack_to_siblings() {
    let mut browser = MockStorageBrowser::new();
    browser
        .expect_browse()
        .withf(|_, path, files| path.to_vec() == b"root".to_vec() && !*files)
        .times(1)
        .returning(|_, _, _| Ok(vec![b"empty".to_vec(), b"full".to_vec()]));
    browser
        .expect_browse()
        .withf(|_, path, _| path.to_vec() == b"root/empty".to_vec())
        .times(1)
        .returning(|_, _, _| Ok(Vec::new()));
    let scanner = SourceScanner::new(browser, location());

    let candidate = scanner
        .next_candidate(&SourcePath::from("root"), 3, &CompletedSet::new(), false)
        .await;

    // "root/full" is never listed.
    assert_eq!(candidate, None);
}

#[tokio::test]
async fn completed_set_is_never_returned() {
    let scanner = SourceScanner::new(browser_with_tree(), location());

    let candidate = scanner
        .next_candidate(
            &SourcePath::from("root"),
            3,
            &completed(&["root/a/a1/x", "root/a/a1/y"]),
            false,
        )
        .await;

    assert_eq!(candidate, None);
}
