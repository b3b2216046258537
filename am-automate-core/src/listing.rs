//! Storage-service browse client.
//!
//! A browse call returns the directory and file names below a path of a
//! location, each base64-encoded. [`StorageClient`] decodes them to raw bytes
//! and keeps the service's ordering.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::contract::{ApiError, StorageBrowser};
use crate::http::{authorized, call_json};

#[derive(Debug, Deserialize)]
struct BrowseResponse {
    #[serde(default)]
    directories: Vec<String>,
    #[serde(default)]
    entries: Vec<String>,
}

pub struct StorageClient {
    client: Client,
    service: ServiceConfig,
}

impl StorageClient {
    pub fn new(service: ServiceConfig) -> Self {
        Self {
            client: Client::new(),
            service,
        }
    }
}

#[async_trait]
impl StorageBrowser for StorageClient {
    async fn browse(
        &self,
        location_uuid: Uuid,
        path: &[u8],
        list_files: bool,
    ) -> Result<Vec<Vec<u8>>, ApiError> {
        let url = self
            .service
            .endpoint(&format!("api/v2/location/{location_uuid}/browse/"));
        let encoded_path = STANDARD.encode(path);
        debug!(
            url = %url,
            path = %String::from_utf8_lossy(path),
            list_files,
            "Browsing storage location"
        );

        let request = authorized(
            self.client.get(&url).query(&[("path", encoded_path.as_str())]),
            &self.service.credentials,
        );
        let listing: BrowseResponse = call_json(&url, request).await?;

        let names = if list_files {
            listing.entries
        } else {
            listing.directories
        };
        names
            .into_iter()
            .map(|entry| match STANDARD.decode(&entry) {
                Ok(bytes) => Ok(bytes),
                Err(_) => Err(ApiError::MalformedEntry {
                    url: url.clone(),
                    entry,
                }),
            })
            .collect()
    }
}
