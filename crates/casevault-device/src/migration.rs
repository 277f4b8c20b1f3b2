//! Moving every file of one local disk onto another

use casevault_io::sha256_file;
use casevault_types::{
    DiskStatus, Error, HardDisk, MigrationReport, MigrationStatus, Result, SkippedFile,
};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::capacity::{local_mount, DiskCapacityManager};

/// Required target headroom relative to the source's total capacity: 120%
const MARGIN_NUMERATOR: u128 = 6;
const MARGIN_DENOMINATOR: u128 = 5;

/// Whether `target_free` bytes satisfy the migration margin for a source of `source_total` bytes
pub fn has_migration_margin(source_total: u64, target_free: u64) -> bool {
    u128::from(target_free) * MARGIN_DENOMINATOR >= u128::from(source_total) * MARGIN_NUMERATOR
}

#[derive(Debug, Default)]
struct CopyTally {
    files_copied: u64,
    bytes_copied: u64,
    skipped: Vec<SkippedFile>,
}

impl DiskCapacityManager {
    /// Copy every file from `source_disk_id` to `target_disk_id` and retire the source
    ///
    /// Each copied file is verified by checksum; a mismatch or I/O failure skips
    /// that file and the migration continues. On success the source is ARCHIVED,
    /// the target ACTIVE and backup logs on the source point at the target.
    /// Logs of skipped files keep pointing at the source disk.
    pub async fn migrate(
        &self,
        source_disk_id: &str,
        target_disk_id: &str,
    ) -> Result<MigrationReport> {
        if source_disk_id == target_disk_id {
            return Err(Error::validation("source and target disk must differ"));
        }

        // Fixed lock order so two opposite migrations cannot deadlock
        let (first, second) = if source_disk_id < target_disk_id {
            (source_disk_id, target_disk_id)
        } else {
            (target_disk_id, source_disk_id)
        };
        let _first_guard = self.lock_disk(first).await;
        let _second_guard = self.lock_disk(second).await;

        let mut source = self.get_disk(source_disk_id).await?;
        let mut target = self.get_disk(target_disk_id).await?;
        let source_root = local_mount(&source)?.to_path_buf();
        let target_root = local_mount(&target)?.to_path_buf();

        if source.status == DiskStatus::Archived {
            return Err(Error::invalid_state(format!(
                "disk {} is already archived",
                source.disk_id
            )));
        }
        if target.status == DiskStatus::Archived {
            return Err(Error::invalid_state(format!(
                "disk {} is archived and cannot receive data",
                target.disk_id
            )));
        }

        let target_free = self.free_after_reservations(&target).await;
        if !has_migration_margin(source.total_capacity, target_free) {
            return Err(Error::capacity(format!(
                "disk {} has {} bytes free, migration of {} needs 120% of {} bytes",
                target.disk_id, target_free, source.disk_id, source.total_capacity
            )));
        }

        source.migration_status = Some(MigrationStatus::Running);
        source.migration_target = Some(target.disk_id.clone());
        source.touch();
        self.store.update_disk(&source).await?;
        info!("Migrating disk {} to {}", source.disk_id, target.disk_id);

        let tally = match copy_tree(&source_root, &target_root).await {
            Ok(tally) => tally,
            Err(e) => {
                source.migration_status = None;
                source.migration_target = None;
                source.touch();
                if let Err(store_err) = self.store.update_disk(&source).await {
                    warn!("Failed to reset migration state of {}: {}", source.disk_id, store_err);
                }
                return Err(e);
            }
        };

        let logs_relocated = self
            .relocate_logs(&source, &target, &source_root, &target_root, &tally.skipped)
            .await?;

        target.available_capacity = target.available_capacity.saturating_sub(tally.bytes_copied);
        target.status = DiskStatus::Active;
        target.touch();
        source.status = DiskStatus::Archived;
        source.migration_status = None;
        source.migration_target = None;
        source.touch();
        self.store.update_disk(&source).await?;
        self.store.update_disk(&target).await?;

        info!(
            "Migration {} -> {} finished: {} files, {} bytes, {} skipped",
            source.disk_id,
            target.disk_id,
            tally.files_copied,
            tally.bytes_copied,
            tally.skipped.len()
        );

        Ok(MigrationReport {
            source_disk_id: source.disk_id,
            target_disk_id: target.disk_id,
            files_copied: tally.files_copied,
            bytes_copied: tally.bytes_copied,
            skipped: tally.skipped,
            logs_relocated,
            finished_at: Utc::now(),
        })
    }

    async fn relocate_logs(
        &self,
        source: &HardDisk,
        target: &HardDisk,
        source_root: &Path,
        target_root: &Path,
        skipped: &[SkippedFile],
    ) -> Result<u64> {
        let left_behind: HashSet<&Path> = skipped.iter().map(|file| file.path.as_path()).collect();
        let mut relocated = 0;
        for mut log in self.store.find_logs_by_disk(&source.disk_id).await? {
            if left_behind.contains(log.target_path.as_path()) {
                warn!(
                    "Log {} stays on {}: {} was not migrated",
                    log.id,
                    source.disk_id,
                    log.target_path.display()
                );
                continue;
            }
            log.disk_id = target.disk_id.clone();
            if let Ok(relative) = log.target_path.strip_prefix(source_root) {
                log.target_path = target_root.join(relative);
            }
            self.store.update_log(&log).await?;
            relocated += 1;
        }
        Ok(relocated)
    }
}

async fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|e| Error::Io {
                message: format!("cannot walk {}: {}", root.display(), e),
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    })
    .await
    .map_err(|e| Error::other(format!("directory walk panicked: {}", e)))?
}

async fn copy_tree(source_root: &Path, target_root: &Path) -> Result<CopyTally> {
    let mut tally = CopyTally::default();

    for path in list_files(source_root).await? {
        let relative = path
            .strip_prefix(source_root)
            .map_err(|e| {
                Error::other(format!(
                    "{} escapes {}: {}",
                    path.display(),
                    source_root.display(),
                    e
                ))
            })?;
        let destination = target_root.join(relative);

        match copy_verified(&path, &destination).await {
            Ok(bytes) => {
                tally.files_copied += 1;
                tally.bytes_copied += bytes;
            }
            Err(e) => {
                warn!("Skipping {} during migration: {}", path.display(), e);
                tally.skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(tally)
}

async fn copy_verified(source: &Path, destination: &Path) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::from_io_at(&e, parent))?;
    }
    let bytes = tokio::fs::copy(source, destination)
        .await
        .map_err(|e| Error::from_io_at(&e, source))?;

    let expected = sha256_file(source).await?;
    let actual = sha256_file(destination).await?;
    if expected != actual {
        if let Err(e) = tokio::fs::remove_file(destination).await {
            warn!("Failed to remove unverified copy {}: {}", destination.display(), e);
        }
        return Err(Error::integrity(destination, expected, actual));
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialCipher;
    use crate::scanner::StaticVolumes;
    use casevault_store::{LogStore, MemoryStore};
    use casevault_types::{BackupLog, TaskId};
    use std::sync::Arc;
    use tempfile::TempDir;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_margin() {
        assert!(has_migration_margin(100 * GIB, 120 * GIB));
        assert!(!has_migration_margin(100 * GIB, 120 * GIB - 1));
        assert!(has_migration_margin(0, 0));
        assert!(!has_migration_margin(u64::MAX, u64::MAX));
    }

    struct Fixture {
        _temp_dir: TempDir,
        manager: DiskCapacityManager,
        store: Arc<MemoryStore>,
        source: HardDisk,
        target: HardDisk,
    }

    async fn fixture(source_total: u64, target_available: u64) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let manager = DiskCapacityManager::new(store.clone(), CredentialCipher::ephemeral())
            .with_local_mount_root(temp_dir.path())
            .with_volume_source(Arc::new(StaticVolumes::default()));

        let source = manager.initialize_local_disk("SRC", source_total).await.unwrap();
        let target = manager
            .initialize_local_disk("DST", target_available)
            .await
            .unwrap();

        Fixture {
            _temp_dir: temp_dir,
            manager,
            store,
            source,
            target,
        }
    }

    #[tokio::test]
    async fn test_migrate_copies_and_archives() {
        let fx = fixture(100 * GIB, 120 * GIB).await;
        let source_root = fx.source.mount_point.clone().unwrap();
        let target_root = fx.target.mount_point.clone().unwrap();

        tokio::fs::create_dir_all(source_root.join("case-1/photos")).await.unwrap();
        tokio::fs::write(source_root.join("case-1/notes.txt"), b"statement").await.unwrap();
        tokio::fs::write(source_root.join("case-1/photos/a.jpg"), vec![7u8; 20_000])
            .await
            .unwrap();

        let log = BackupLog::new(
            TaskId::new(),
            Path::new("/evidence/notes.txt"),
            &fx.source.disk_id,
            source_root.join("case-1/notes.txt"),
            1,
            9,
            "abc",
        );
        fx.store.insert_log(&log).await.unwrap();

        let report = fx
            .manager
            .migrate(&fx.source.disk_id, &fx.target.disk_id)
            .await
            .unwrap();
        assert_eq!(report.files_copied, 2);
        assert_eq!(report.bytes_copied, 20_009);
        assert!(report.skipped.is_empty());
        assert_eq!(report.logs_relocated, 1);

        for relative in ["case-1/notes.txt", "case-1/photos/a.jpg"] {
            assert_eq!(
                sha256_file(source_root.join(relative)).await.unwrap(),
                sha256_file(target_root.join(relative)).await.unwrap()
            );
        }

        let source = fx.manager.get_disk(&fx.source.disk_id).await.unwrap();
        let target = fx.manager.get_disk(&fx.target.disk_id).await.unwrap();
        assert_eq!(source.status, DiskStatus::Archived);
        assert_eq!(source.migration_status, None);
        assert_eq!(target.status, DiskStatus::Active);
        assert_eq!(target.available_capacity, 120 * GIB - 20_009);

        let relocated = fx.store.get_log(log.id).await.unwrap().unwrap();
        assert_eq!(relocated.disk_id, fx.target.disk_id);
        assert_eq!(relocated.target_path, target_root.join("case-1/notes.txt"));
    }

    #[tokio::test]
    async fn test_migrate_skips_unwritable_file() {
        let fx = fixture(GIB, 2 * GIB).await;
        let source_root = fx.source.mount_point.clone().unwrap();
        let target_root = fx.target.mount_point.clone().unwrap();

        tokio::fs::create_dir_all(source_root.join("case-2")).await.unwrap();
        tokio::fs::write(source_root.join("case-2/good.bin"), vec![1u8; 300])
            .await
            .unwrap();
        tokio::fs::write(source_root.join("case-2/bad.bin"), vec![2u8; 500])
            .await
            .unwrap();
        // a directory already occupies the destination of bad.bin
        tokio::fs::create_dir_all(target_root.join("case-2/bad.bin"))
            .await
            .unwrap();

        let mut logs = Vec::new();
        for (name, size) in [("good.bin", 300), ("bad.bin", 500)] {
            let log = BackupLog::new(
                TaskId::new(),
                &Path::new("/evidence").join(name),
                &fx.source.disk_id,
                source_root.join("case-2").join(name),
                1,
                size,
                "abc",
            );
            fx.store.insert_log(&log).await.unwrap();
            logs.push(log);
        }

        let report = fx
            .manager
            .migrate(&fx.source.disk_id, &fx.target.disk_id)
            .await
            .unwrap();
        assert_eq!(report.files_copied, 1);
        assert_eq!(report.bytes_copied, 300);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, source_root.join("case-2/bad.bin"));
        assert_eq!(report.logs_relocated, 1);
        assert_eq!(
            tokio::fs::read(target_root.join("case-2/good.bin")).await.unwrap(),
            vec![1u8; 300]
        );

        let source = fx.manager.get_disk(&fx.source.disk_id).await.unwrap();
        assert_eq!(source.status, DiskStatus::Archived);

        let good = fx.store.get_log(logs[0].id).await.unwrap().unwrap();
        assert_eq!(good.disk_id, fx.target.disk_id);
        assert_eq!(good.target_path, target_root.join("case-2/good.bin"));
        let bad = fx.store.get_log(logs[1].id).await.unwrap().unwrap();
        assert_eq!(bad.disk_id, fx.source.disk_id);
        assert_eq!(bad.target_path, source_root.join("case-2/bad.bin"));
    }

    #[tokio::test]
    async fn test_migrate_requires_margin() {
        let fx = fixture(100 * GIB, 119 * GIB).await;
        let err = fx
            .manager
            .migrate(&fx.source.disk_id, &fx.target.disk_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), casevault_types::ErrorKind::Capacity);

        let source = fx.manager.get_disk(&fx.source.disk_id).await.unwrap();
        assert_eq!(source.status, DiskStatus::Active);
        assert_eq!(source.migration_status, None);
    }

    #[tokio::test]
    async fn test_migrate_rejects_same_or_archived_disk() {
        let fx = fixture(GIB, 2 * GIB).await;
        assert!(fx
            .manager
            .migrate(&fx.source.disk_id, &fx.source.disk_id)
            .await
            .is_err());

        fx.manager
            .migrate(&fx.source.disk_id, &fx.target.disk_id)
            .await
            .unwrap();
        let err = fx
            .manager
            .migrate(&fx.source.disk_id, &fx.target.disk_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), casevault_types::ErrorKind::InvalidState);
    }
}
