//! Helper Inventory Source
//!
//! Runs the external inventory helper and decodes its JSON output. The child
//! process is killed when the fetch is superseded.

use super::snapshot::{group_names_from_json, InventorySnapshot};
use crate::domain::ports::InventorySource;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Configuration for the inventory helper
#[derive(Debug, Clone)]
pub struct HelperConfig {
    /// Helper executable
    pub program: PathBuf,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("udisks-lvm-helper"),
        }
    }
}

/// Inventory source backed by the helper executable
pub struct HelperInventorySource {
    config: HelperConfig,
}

impl HelperInventorySource {
    pub fn new(config: HelperConfig) -> Self {
        Self { config }
    }

    async fn run(&self, scope: &str, args: &[&str], cancel: CancellationToken) -> Result<Vec<u8>> {
        debug!("Running {:?} {:?}", self.config.program, args);

        let child = Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::FetchFailed {
                group: scope.to_string(),
                reason: format!("failed to spawn {:?}: {}", self.config.program, e),
            })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => {
                return Err(Error::FetchCancelled { group: scope.to_string() });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::FetchFailed {
                group: scope.to_string(),
                reason: format!(
                    "{:?} exited with {}: {}",
                    self.config.program,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl InventorySource for HelperInventorySource {
    async fn list_groups(&self) -> Result<Vec<String>> {
        let stdout = self.run("*", &["-b", "list"], CancellationToken::new()).await?;
        group_names_from_json(&stdout)
    }

    async fn fetch_inventory(
        &self,
        group: &str,
        cancel: CancellationToken,
    ) -> Result<InventorySnapshot> {
        let stdout = self.run(group, &["-b", "show", group], cancel).await?;
        InventorySnapshot::from_json(&stdout).map_err(|e| Error::FetchFailed {
            group: group.to_string(),
            reason: e.to_string(),
        })
    }
}
