//! Depth-bounded selection of the next unprocessed source path.
//!
//! The scanner walks down from a prefix through the storage service's browse
//! API. Intermediate levels always follow the first directory the service
//! lists; siblings are not revisited when that branch turns out empty. At the
//! target depth the first entry not yet in the completed set wins.
//!
//! Listing failures (bad credentials, unknown location, non-JSON replies) are
//! folded into "no candidate": the caller polls on a cadence and will retry.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contract::{CompletedSet, SourcePath, StorageBrowser};

pub struct SourceScanner<B> {
    browser: B,
    location_uuid: Uuid,
}

impl<B: StorageBrowser> SourceScanner<B> {
    pub fn new(browser: B, location_uuid: Uuid) -> Self {
        Self {
            browser,
            location_uuid,
        }
    }

    /// Returns the first source path `depth` levels below `prefix` that is not
    /// in `completed`, or `None` when there is nothing to do right now.
    ///
    /// A depth of 0 is treated as 1. An empty prefix scans from the root of the
    /// location.
    pub async fn next_candidate(
        &self,
        prefix: &SourcePath,
        depth: u32,
        completed: &CompletedSet,
        list_files: bool,
    ) -> Option<SourcePath> {
        let depth = depth.max(1);
        let mut node = prefix.clone();

        for level in 1..depth {
            let directories = self.list(&node, false).await?;
            let Some(first) = directories.into_iter().next() else {
                debug!(node = %node, level, "Directory has no children, nothing to descend into");
                return None;
            };
            node = node.join(&first);
        }

        let entries = self.list(&node, list_files).await?;
        let candidate = entries
            .iter()
            .map(|entry| node.join(entry))
            .find(|path| !completed.contains(path));

        match &candidate {
            Some(path) => info!(path = %path, depth, "Selected next transfer source"),
            None => info!(
                node = %node,
                entries = entries.len(),
                "No unprocessed entries at target depth"
            ),
        }
        candidate
    }

    async fn list(&self, node: &SourcePath, list_files: bool) -> Option<Vec<Vec<u8>>> {
        match self
            .browser
            .browse(self.location_uuid, node.as_bytes(), list_files)
            .await
        {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(
                    location = %self.location_uuid,
                    node = %node,
                    error = %e,
                    "Listing failed, treating as no work available"
                );
                None
            }
        }
    }
}
