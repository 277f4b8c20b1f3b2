//! Local volume discovery

use async_trait::async_trait;
use casevault_types::Result;
use std::path::PathBuf;

/// Volumes smaller than this are ignored: 100 MiB
pub const MIN_VOLUME_SIZE: u64 = 100 * 1024 * 1024;

/// A mounted local volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Device node
    pub device: String,
    /// Serial number, `UNKNOWN_<device>` when the hardware does not report one
    pub serial_number: String,
    /// Mount point
    pub mount_point: PathBuf,
    /// Filesystem type
    pub fs_type: String,
    /// Capacity in bytes
    pub total_capacity: u64,
    /// Free bytes
    pub available_capacity: u64,
}

/// Source of local volume listings
#[async_trait]
pub trait VolumeSource: Send + Sync {
    /// Enumerate the volumes currently mounted
    async fn volumes(&self) -> Result<Vec<VolumeInfo>>;
}

/// Volumes of the running host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemVolumes;

#[async_trait]
impl VolumeSource for SystemVolumes {
    async fn volumes(&self) -> Result<Vec<VolumeInfo>> {
        #[cfg(unix)]
        {
            crate::unix::scan_volumes().await
        }
        #[cfg(not(unix))]
        {
            Err(casevault_types::Error::other(
                "local volume scanning is not supported on this platform",
            ))
        }
    }
}

/// Fixed volume list, for hosts where discovery is done elsewhere
#[derive(Debug, Default, Clone)]
pub struct StaticVolumes {
    volumes: Vec<VolumeInfo>,
}

impl StaticVolumes {
    /// Serve the given volumes on every scan
    pub fn new(volumes: Vec<VolumeInfo>) -> Self {
        Self { volumes }
    }
}

#[async_trait]
impl VolumeSource for StaticVolumes {
    async fn volumes(&self) -> Result<Vec<VolumeInfo>> {
        Ok(self.volumes.clone())
    }
}
