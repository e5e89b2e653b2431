//! Installed application inventory, read from the install roots Discord
//! keeps in its install manager state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ScrapeError;

/// Per-application metadata file inside each install directory.
pub const METADATA_FILE: &str = "application_info.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub application_id: String,
    pub display_name: String,
}

impl InventoryEntry {
    /// URI the client understands as "launch this application". Opening it is
    /// left to the host.
    pub fn launch_uri(&self) -> String {
        format!("discord:///library/{}/launch", self.application_id)
    }
}

#[derive(Debug, Deserialize)]
struct InstallManagerState {
    #[serde(rename = "_state")]
    state: InstallState,
}

#[derive(Debug, Deserialize)]
struct InstallState {
    #[serde(rename = "installationPaths")]
    installation_paths: Vec<InstallRoot>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InstallRoot {
    Path(String),
    Entry { path: String },
}

impl InstallRoot {
    fn path(&self) -> &str {
        match self {
            InstallRoot::Path(path) | InstallRoot::Entry { path } => path,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApplicationInfo {
    #[serde(alias = "applicationId")]
    application_id: ApplicationId,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApplicationId {
    Text(String),
    Number(u64),
}

impl ApplicationId {
    fn into_string(self) -> String {
        match self {
            ApplicationId::Text(id) => id,
            ApplicationId::Number(id) => id.to_string(),
        }
    }
}

/// Install roots listed in the install manager state.
pub fn install_roots(install_manager_json: &str) -> Result<Vec<PathBuf>, ScrapeError> {
    let parsed: InstallManagerState = serde_json::from_str(install_manager_json)
        .map_err(|e| ScrapeError::MalformedResponse(format!("install manager state: {e}")))?;
    Ok(parsed
        .state
        .installation_paths
        .iter()
        .map(|root| PathBuf::from(root.path()))
        .collect())
}

/// Build the inventory from the raw install manager state. Blocking; run it
/// off the async executor.
pub fn build(install_manager_json: &str) -> Result<Vec<InventoryEntry>, ScrapeError> {
    let roots = install_roots(install_manager_json)?;
    if roots.is_empty() {
        debug!("No install roots configured");
        return Ok(Vec::new());
    }

    let mut inventory = Vec::new();
    for root in &roots {
        scan_root(root, &mut inventory);
    }
    debug!(roots = roots.len(), applications = inventory.len(), "Inventory built");
    Ok(inventory)
}

fn scan_root(root: &Path, inventory: &mut Vec<InventoryEntry>) {
    if !root.is_dir() {
        debug!(root = %root.display(), "Skipping install root that does not exist");
        return;
    }

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Cannot list install root");
            return;
        }
    };

    let mut app_dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    app_dirs.sort();

    for dir in app_dirs {
        let metadata = dir.join(METADATA_FILE);
        if !metadata.is_file() {
            continue;
        }
        match read_application_info(&metadata) {
            Ok(info) => inventory.push(InventoryEntry {
                application_id: info.application_id.into_string(),
                display_name: info.name,
            }),
            Err(e) => warn!(file = %metadata.display(), error = %e, "Skipping unreadable application info"),
        }
    }
}

#[derive(Error, Debug)]
enum MetadataError {
    #[error("cannot read metadata: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid metadata: {0}")]
    Json(#[from] serde_json::Error),
}

fn read_application_info(path: &Path) -> Result<ApplicationInfo, MetadataError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
