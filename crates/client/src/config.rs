//! Account configuration.
//!
//! Field names match the JSON layout the storage tooling already uses, so
//! an existing `up_hosts`/`io_hosts`/`uc_hosts` file deserializes as-is.

use std::path::PathBuf;

use partsync_upload::{RetryPolicy, UploadConfig};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Smallest part size the service accepts, in MiB.
pub const MIN_PART_SIZE_MIB: u64 = 4;

/// One storage account and bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upload hosts, used when discovery is off or returns nothing.
    pub up_hosts: Vec<String>,
    /// Download hosts, same fallback rule as `up_hosts`.
    pub io_hosts: Vec<String>,
    /// Directory hosts. Non-empty enables host discovery.
    pub uc_hosts: Vec<String>,
    pub bucket: String,
    pub ak: String,
    #[serde(alias = "part")]
    pub part_size_mib: u64,
    pub up_concurrency: usize,
    /// Where discovered hosts are persisted. Defaults to the platform cache dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Build `https://` URLs for discovered domains.
    pub https: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            up_hosts: Vec::new(),
            io_hosts: Vec::new(),
            uc_hosts: Vec::new(),
            bucket: String::new(),
            ak: String::new(),
            part_size_mib: MIN_PART_SIZE_MIB,
            up_concurrency: 4,
            cache_dir: None,
            https: false,
        }
    }
}

impl Config {
    /// Part size in bytes, never below [`MIN_PART_SIZE_MIB`].
    pub fn part_size(&self) -> u64 {
        self.part_size_mib.max(MIN_PART_SIZE_MIB) * MIB
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            part_size: self.part_size(),
            concurrency: self.up_concurrency.max(1),
            retry: RetryPolicy::default(),
        }
    }
}
