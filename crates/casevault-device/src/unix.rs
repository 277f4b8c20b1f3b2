//! Unix volume discovery
//!
//! Mounted block devices come from `/proc/mounts`, sizes from `statvfs` and
//! serial numbers from sysfs.

use casevault_types::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::scanner::{VolumeInfo, MIN_VOLUME_SIZE};

/// One line of `/proc/mounts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Device node, e.g. `/dev/sdb1`
    pub device: String,
    /// Mount point
    pub mount_point: PathBuf,
    /// Filesystem type
    pub fs_type: String,
}

/// Parse `/proc/mounts`, keeping the first mount of each real block device
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let device = parts[0];
        if !device.starts_with("/dev/") || device.starts_with("/dev/loop") {
            continue;
        }
        if !seen.insert(device.to_string()) {
            continue;
        }

        entries.push(MountEntry {
            device: device.to_string(),
            mount_point: PathBuf::from(unescape_mount_field(parts[1])),
            fs_type: parts[2].to_string(),
        });
    }

    entries
}

/// `/proc/mounts` encodes space, tab, newline and backslash as octal escapes
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a device node into its whole-disk name and partition name
///
/// `sda1` → (`sda`, Some(`sda1`)), `nvme0n1p2` → (`nvme0n1`, Some(`nvme0n1p2`)),
/// `sdb` → (`sdb`, None).
pub fn split_partition(device: &str) -> (String, Option<String>) {
    let name = device.trim_start_matches("/dev/").replace('/', "_");
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return (name, None);
    }

    let stem = name[..name.len() - digits].to_string();
    let is_nvme_like = name.starts_with("nvme") || name.starts_with("mmcblk");
    if is_nvme_like {
        match stem.strip_suffix('p') {
            Some(disk) if !disk.is_empty() => (disk.to_string(), Some(name)),
            _ => (name, None),
        }
    } else if stem.is_empty() || stem.ends_with('-') {
        (name, None)
    } else {
        (stem, Some(name))
    }
}

async fn read_serial(disk: &str) -> Option<String> {
    for candidate in [
        format!("/sys/block/{}/device/serial", disk),
        format!("/sys/block/{}/serial", disk),
    ] {
        if let Ok(content) = tokio::fs::read_to_string(&candidate).await {
            let serial = content.trim();
            if !serial.is_empty() {
                return Some(serial.to_string());
            }
        }
    }
    None
}

/// Stable serial number for a mounted device
pub async fn volume_serial(device: &str) -> String {
    let (disk, partition) = split_partition(device);
    let base = read_serial(&disk)
        .await
        .unwrap_or_else(|| format!("UNKNOWN_{}", disk));
    match partition {
        Some(part) => format!("{}-{}", base, part),
        None => base,
    }
}

/// Total and available bytes of the filesystem holding `path`
pub fn filesystem_space(path: &Path) -> Result<(u64, u64)> {
    let path_cstring = std::ffi::CString::new(path.to_string_lossy().as_bytes())
        .map_err(|e| Error::other(format!("Invalid path: {}", e)))?;

    let mut statvfs_buf: libc::statvfs = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::statvfs(path_cstring.as_ptr(), &mut statvfs_buf) };
    if result != 0 {
        return Err(Error::Io {
            message: format!(
                "statvfs failed for {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            ),
        });
    }

    let block_size = statvfs_buf.f_frsize as u64;
    let total = statvfs_buf.f_blocks as u64 * block_size;
    let available = statvfs_buf.f_bavail as u64 * block_size;
    Ok((total, available))
}

/// Enumerate mounted local volumes of at least [`MIN_VOLUME_SIZE`] bytes
pub async fn scan_volumes() -> Result<Vec<VolumeInfo>> {
    let content = tokio::fs::read_to_string("/proc/mounts")
        .await
        .map_err(|e| Error::other(format!("Failed to read /proc/mounts: {}", e)))?;

    let mut volumes = Vec::new();
    for entry in parse_mounts(&content) {
        let (total, available) = match filesystem_space(&entry.mount_point) {
            Ok(space) => space,
            Err(e) => {
                warn!("Skipping {}: {}", entry.mount_point.display(), e);
                continue;
            }
        };
        if total < MIN_VOLUME_SIZE {
            debug!(
                "Skipping small volume {} ({} bytes)",
                entry.mount_point.display(),
                total
            );
            continue;
        }

        let serial_number = volume_serial(&entry.device).await;
        volumes.push(VolumeInfo {
            device: entry.device,
            serial_number,
            mount_point: entry.mount_point,
            fs_type: entry.fs_type,
            total_capacity: total,
            available_capacity: available,
        });
    }

    Ok(volumes)
}
