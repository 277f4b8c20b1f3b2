//! Disk inventory and capacity accounting
//!
//! [`DiskCapacityManager`] is the only writer of a disk's available capacity.
//! Backups go through a reserve/commit protocol under a per-disk lock: the
//! planned bytes are reserved before any data is written, and the available
//! figure only drops by the bytes actually written once the task finishes.

use casevault_store::SharedStore;
use casevault_types::{DiskProtocol, DiskStatus, Error, HardDisk, MigrationStatus, Result};
use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialCipher;
use crate::disk_id::{next_disk_id, DiskGroup};
use crate::scanner::{SystemVolumes, VolumeInfo, VolumeSource};
use crate::smb::{share_from_url, RemoteShareProbe, SmbClientProbe};

/// Default root under which initialized local disks are mounted
pub const DEFAULT_LOCAL_MOUNT_ROOT: &str = "/backup";

/// Tracks storage targets and guards their capacity
pub struct DiskCapacityManager {
    pub(crate) store: SharedStore,
    cipher: CredentialCipher,
    probe: Arc<dyn RemoteShareProbe>,
    volumes: Arc<dyn VolumeSource>,
    local_mount_root: PathBuf,
    inventory_lock: Mutex<()>,
    disk_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    reserved: Mutex<HashMap<String, u64>>,
}

impl std::fmt::Debug for DiskCapacityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCapacityManager")
            .field("cipher", &self.cipher)
            .field("local_mount_root", &self.local_mount_root)
            .finish_non_exhaustive()
    }
}

impl DiskCapacityManager {
    /// Manager over `store` using the host's volumes and `smbclient`
    pub fn new(store: SharedStore, cipher: CredentialCipher) -> Self {
        Self {
            store,
            cipher,
            probe: Arc::new(SmbClientProbe::default()),
            volumes: Arc::new(SystemVolumes),
            local_mount_root: PathBuf::from(DEFAULT_LOCAL_MOUNT_ROOT),
            inventory_lock: Mutex::new(()),
            disk_locks: Mutex::new(HashMap::new()),
            reserved: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the remote share probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn RemoteShareProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace the local volume source
    #[must_use]
    pub fn with_volume_source(mut self, volumes: Arc<dyn VolumeSource>) -> Self {
        self.volumes = volumes;
        self
    }

    /// Directory under which initialized local disks get their mount point
    #[must_use]
    pub fn with_local_mount_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.local_mount_root = root.into();
        self
    }

    /// Cipher used for share passwords
    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }

    pub(crate) async fn lock_disk(&self, disk_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .disk_locks
            .lock()
            .await
            .entry(disk_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Look up a disk by its human-readable id
    pub async fn get_disk(&self, disk_id: &str) -> Result<HardDisk> {
        self.store
            .find_disk_by_disk_id(disk_id)
            .await?
            .ok_or_else(|| Error::not_found("disk", disk_id))
    }

    /// All known disks ordered by id
    pub async fn list_disks(&self) -> Result<Vec<HardDisk>> {
        self.store.list_disks().await
    }

    async fn next_id(&self, group: DiskGroup) -> Result<String> {
        let disks = self.store.list_disks().await?;
        Ok(next_disk_id(
            disks.iter().map(|d| d.disk_id.as_str()),
            group,
            &Local::now(),
        ))
    }

    /// Register an operator-provisioned local disk
    ///
    /// A disk whose serial number is already known is returned unchanged.
    pub async fn initialize_local_disk(
        &self,
        serial_number: &str,
        total_capacity: u64,
    ) -> Result<HardDisk> {
        let serial_number = serial_number.trim();
        if serial_number.is_empty() {
            return Err(Error::validation("serial number must not be empty"));
        }
        if total_capacity == 0 {
            return Err(Error::validation("total capacity must be greater than zero"));
        }

        let _inventory = self.inventory_lock.lock().await;
        if let Some(existing) = self.store.find_disk_by_serial(serial_number).await? {
            info!(
                "Disk {} already registered as {}",
                serial_number, existing.disk_id
            );
            return Ok(existing);
        }

        let disk_id = self.next_id(DiskGroup::Initialized).await?;
        let mount_point = self.local_mount_root.join(&disk_id);
        tokio::fs::create_dir_all(&mount_point)
            .await
            .map_err(|e| Error::from_io_at(&e, &mount_point))?;

        let disk = HardDisk::local(
            &disk_id,
            serial_number,
            mount_point,
            total_capacity,
            total_capacity,
        );
        self.store.insert_disk(&disk).await?;
        info!("Initialized local disk {} ({})", disk_id, serial_number);
        Ok(disk)
    }

    /// Register an SMB share
    ///
    /// The share is queried before anything is stored so bad credentials never
    /// produce a record. The password is sealed at rest.
    pub async fn initialize_remote_disk(
        &self,
        url: &str,
        username: &str,
        password: &str,
        serial_number: &str,
    ) -> Result<HardDisk> {
        let serial_number = serial_number.trim();
        if serial_number.is_empty() {
            return Err(Error::validation("serial number must not be empty"));
        }
        if username.trim().is_empty() {
            return Err(Error::validation("username must not be empty"));
        }
        share_from_url(url)?;

        info!("Initializing SMB disk {} as {}", url, username);
        let space = self.probe.query_space(url, username, password).await?;
        debug!(
            "SMB capacity for {}: total {} bytes, available {} bytes",
            url, space.total, space.available
        );

        let _inventory = self.inventory_lock.lock().await;
        if let Some(existing) = self.store.find_disk_by_serial(serial_number).await? {
            info!("SMB disk already exists: {}", serial_number);
            return Ok(existing);
        }

        let sealed = self.cipher.seal(password)?;
        let disk_id = self.next_id(DiskGroup::Remote).await?;
        let mut disk = HardDisk::smb(&disk_id, serial_number, url, username, sealed);
        disk.set_capacity(space.total, space.available);
        self.store.insert_disk(&disk).await?;
        info!("SMB disk initialized: {}", disk_id);
        Ok(disk)
    }

    /// Reconcile local volumes by serial number and refresh SMB capacities
    ///
    /// Returns every disk the scan touched. A share that cannot be queried is
    /// marked ERROR and still returned.
    pub async fn scan_disks(&self) -> Result<Vec<HardDisk>> {
        let volumes = self.volumes.volumes().await?;
        let mut touched = Vec::with_capacity(volumes.len());

        {
            let _inventory = self.inventory_lock.lock().await;
            for volume in volumes {
                touched.push(self.reconcile_volume(volume).await?);
            }
        }

        for disk in self.store.list_disks().await? {
            if disk.protocol == DiskProtocol::Smb {
                touched.push(self.refresh_remote(disk).await?);
            }
        }

        Ok(touched)
    }

    async fn reconcile_volume(&self, volume: VolumeInfo) -> Result<HardDisk> {
        match self.store.find_disk_by_serial(&volume.serial_number).await? {
            Some(mut existing) => {
                let _guard = self.lock_disk(&existing.disk_id).await;
                existing.mount_point = Some(volume.mount_point);
                existing.set_capacity(volume.total_capacity, volume.available_capacity);
                if existing.status != DiskStatus::Archived {
                    existing.status = DiskStatus::Active;
                }
                self.store.update_disk(&existing).await?;
                info!("Updated disk {}", existing.serial_number);
                Ok(existing)
            }
            None => {
                let disk_id = self.next_id(DiskGroup::Scanned).await?;
                let disk = HardDisk::local(
                    disk_id,
                    volume.serial_number,
                    volume.mount_point,
                    volume.total_capacity,
                    volume.available_capacity,
                );
                self.store.insert_disk(&disk).await?;
                info!("Added disk {} ({})", disk.disk_id, disk.serial_number);
                Ok(disk)
            }
        }
    }

    async fn refresh_remote(&self, mut disk: HardDisk) -> Result<HardDisk> {
        let _guard = self.lock_disk(&disk.disk_id).await;
        match self.query_remote(&disk).await {
            Ok((total, available)) => {
                disk.set_capacity(total, available);
                if disk.status != DiskStatus::Archived {
                    disk.status = DiskStatus::Active;
                }
            }
            Err(e) => {
                error!("SMB disk refresh failed for {}: {}", disk.disk_id, e);
                disk.status = DiskStatus::Error;
                disk.touch();
            }
        }
        self.store.update_disk(&disk).await?;
        Ok(disk)
    }

    async fn query_remote(&self, disk: &HardDisk) -> Result<(u64, u64)> {
        let url = disk
            .remote_url
            .as_deref()
            .ok_or_else(|| Error::remote("share url missing"))?;
        let username = disk.remote_username.as_deref().unwrap_or_default();
        let sealed = disk
            .remote_password_encrypted
            .as_deref()
            .ok_or_else(|| Error::credential("share password missing"))?;

        let password = self.cipher.open(sealed)?;
        let space = self.probe.query_space(url, username, &password).await?;
        Ok((space.total, space.available))
    }

    /// Bytes currently reserved on a disk
    pub async fn reserved_bytes(&self, disk_id: &str) -> u64 {
        self.reserved
            .lock()
            .await
            .get(disk_id)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) async fn free_after_reservations(&self, disk: &HardDisk) -> u64 {
        disk.available_capacity
            .saturating_sub(self.reserved_bytes(&disk.disk_id).await)
    }

    /// Reserve `bytes` on an ACTIVE disk, keeping `threshold` bytes free afterwards
    pub async fn reserve(&self, disk_id: &str, bytes: u64, threshold: u64) -> Result<()> {
        let _guard = self.lock_disk(disk_id).await;
        let disk = self.get_disk(disk_id).await?;
        if disk.status != DiskStatus::Active {
            return Err(Error::validation(format!(
                "disk {} is {:?}, not ACTIVE",
                disk_id, disk.status
            )));
        }

        let free = self.free_after_reservations(&disk).await;
        let needed = bytes.saturating_add(threshold);
        if free < needed {
            return Err(Error::capacity(format!(
                "disk {} has {} bytes free, needs {} plus a {} byte safety margin",
                disk_id, free, bytes, threshold
            )));
        }

        *self
            .reserved
            .lock()
            .await
            .entry(disk_id.to_string())
            .or_insert(0) += bytes;
        debug!("Reserved {} bytes on {}", bytes, disk_id);
        Ok(())
    }

    /// Drop a reservation without touching the disk record
    pub async fn release(&self, disk_id: &str, bytes: u64) {
        let _guard = self.lock_disk(disk_id).await;
        self.release_locked(disk_id, bytes).await;
    }

    async fn release_locked(&self, disk_id: &str, bytes: u64) {
        let mut reserved = self.reserved.lock().await;
        if let Some(current) = reserved.get_mut(disk_id) {
            *current = current.saturating_sub(bytes);
            if *current == 0 {
                reserved.remove(disk_id);
            }
        }
        debug!("Released {} bytes on {}", bytes, disk_id);
    }

    /// Turn a reservation into a capacity decrement of the bytes actually written
    pub async fn commit(&self, disk_id: &str, reserved: u64, written: u64) -> Result<HardDisk> {
        let _guard = self.lock_disk(disk_id).await;
        self.release_locked(disk_id, reserved).await;

        let mut disk = self.get_disk(disk_id).await?;
        if written > disk.available_capacity {
            warn!(
                "Disk {} recorded {} bytes available but {} were written",
                disk_id, disk.available_capacity, written
            );
        }
        disk.available_capacity = disk.available_capacity.saturating_sub(written);
        disk.touch();
        self.store.update_disk(&disk).await?;
        info!(
            "Committed {} bytes on {}, {} bytes available",
            written, disk_id, disk.available_capacity
        );
        Ok(disk)
    }

    /// Give back capacity for committed bytes that were later deleted
    pub async fn refund(&self, disk_id: &str, bytes: u64) -> Result<HardDisk> {
        let _guard = self.lock_disk(disk_id).await;
        let mut disk = self.get_disk(disk_id).await?;
        disk.available_capacity = disk
            .available_capacity
            .saturating_add(bytes)
            .min(disk.total_capacity);
        disk.touch();
        self.store.update_disk(&disk).await?;
        info!(
            "Refunded {} bytes on {}, {} bytes available",
            bytes, disk_id, disk.available_capacity
        );
        Ok(disk)
    }

    /// Flag disks whose available capacity fell below `threshold`
    ///
    /// Flagged disks get `migration_status = PENDING`; no destination is chosen.
    pub async fn check_thresholds(&self, threshold: u64) -> Result<Vec<HardDisk>> {
        let mut flagged = Vec::new();
        for mut disk in self.store.list_disks().await? {
            if disk.status == DiskStatus::Archived {
                continue;
            }
            let pending = disk.migration_status == Some(MigrationStatus::Pending);
            if disk.available_capacity < threshold || pending {
                if !pending {
                    disk.migration_status = Some(MigrationStatus::Pending);
                    disk.touch();
                    self.store.update_disk(&disk).await?;
                }
                warn!(
                    "Disk {} is low on space ({} bytes available), migration pending",
                    disk.disk_id, disk.available_capacity
                );
                flagged.push(disk);
            }
        }
        Ok(flagged)
    }

    /// First ACTIVE local disk that can take `required` bytes and keep `threshold` free
    pub async fn select_backup_disk(
        &self,
        required: u64,
        threshold: u64,
    ) -> Result<Option<HardDisk>> {
        let needed = required.saturating_add(threshold);
        for disk in self.store.list_disks().await? {
            if disk.status == DiskStatus::Active
                && disk.protocol == DiskProtocol::Local
                && self.free_after_reservations(&disk).await >= needed
            {
                return Ok(Some(disk));
            }
        }
        Ok(None)
    }
}

/// Root directory of a local disk
pub fn local_mount(disk: &HardDisk) -> Result<&Path> {
    match (disk.protocol, disk.mount_point.as_deref()) {
        (DiskProtocol::Local, Some(mount)) => Ok(mount),
        (DiskProtocol::Local, None) => Err(Error::validation(format!(
            "disk {} has no mount point",
            disk.disk_id
        ))),
        (DiskProtocol::Smb, _) => Err(Error::validation(format!(
            "disk {} is an SMB share; only local disks hold files directly",
            disk.disk_id
        ))),
    }
}
