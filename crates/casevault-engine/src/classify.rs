//! Per-file copy planning
//!
//! A sensitive file name gets two copies, a cold file one, anything else none.
//! Classification looks at the file name and modification time only.

use casevault_types::{Error, FileSize, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

use crate::policy::Policy;

/// Copies for a file whose name matches the sensitive pattern
pub const SENSITIVE_COPIES: u32 = 2;
/// Copies for a cold file
pub const COLD_COPIES: u32 = 1;

/// Outcome of classifying one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileClass {
    /// Name matched the keyword pattern
    pub sensitive: bool,
    /// Modified before the cold cutoff
    pub cold: bool,
    /// Planned copies
    pub copy_count: u32,
}

/// Classify a file from its name and local modification time
pub fn classify_file(file_name: &str, modified: NaiveDateTime, policy: &Policy) -> FileClass {
    let sensitive = policy.is_sensitive(file_name);
    let cold = policy.is_cold(modified);
    let copy_count = if sensitive {
        SENSITIVE_COPIES
    } else if cold {
        COLD_COPIES
    } else {
        0
    };
    FileClass {
        sensitive,
        cold,
        copy_count,
    }
}

fn local_time(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

/// A file that needs at least one copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    /// Absolute source path
    pub path: PathBuf,
    /// Path below the planned root, including the root's own name for directories
    pub relative: PathBuf,
    /// Size in bytes
    pub size: FileSize,
    /// Classification
    pub class: FileClass,
}

impl PlannedFile {
    /// `size × copy_count`
    pub fn planned_bytes(&self) -> FileSize {
        self.size.saturating_mul(u64::from(self.class.copy_count))
    }
}

/// Files of one source that need backing up
#[derive(Debug, Clone, Default)]
pub struct CopyPlan {
    /// Source path as given
    pub root: PathBuf,
    /// Files with at least one planned copy, in walk order
    pub files: Vec<PlannedFile>,
    /// Regular files looked at, including those needing no copy
    pub scanned_files: usize,
    /// Any scanned file was sensitive
    pub sensitive: bool,
    /// Any scanned file was cold
    pub cold: bool,
}

impl CopyPlan {
    /// Σ size × copies
    pub fn total_size(&self) -> FileSize {
        self.files
            .iter()
            .fold(0, |acc: FileSize, f| acc.saturating_add(f.planned_bytes()))
    }

    /// Σ copies
    pub fn backup_count(&self) -> u32 {
        self.files.iter().map(|f| f.class.copy_count).sum()
    }

    /// Largest copy count of any file
    pub fn max_copy_count(&self) -> u32 {
        self.files
            .iter()
            .map(|f| f.class.copy_count)
            .max()
            .unwrap_or(0)
    }

    /// Nothing to copy
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Check that `source` exists and can be read or listed
pub async fn precheck_source(source: &Path) -> Result<std::fs::Metadata> {
    let metadata = tokio::fs::metadata(source).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::validation(format!("source path does not exist: {}", source.display()))
        }
        _ => Error::from_io_at(&e, source),
    })?;

    if metadata.is_dir() {
        tokio::fs::read_dir(source)
            .await
            .map_err(|e| Error::from_io_at(&e, source))?;
    } else if metadata.is_file() {
        tokio::fs::File::open(source)
            .await
            .map_err(|e| Error::from_io_at(&e, source))?;
    } else {
        return Err(Error::validation(format!(
            "source is neither a file nor a directory: {}",
            source.display()
        )));
    }

    Ok(metadata)
}

/// Classify a file or every regular file below a directory
pub async fn plan_source(source: &Path, policy: &Policy) -> Result<CopyPlan> {
    let metadata = precheck_source(source).await?;
    let root = source.to_path_buf();
    let policy = policy.clone();

    tokio::task::spawn_blocking(move || {
        if metadata.is_file() {
            plan_single(root, &metadata, &policy)
        } else {
            plan_tree(root, &policy)
        }
    })
    .await
    .map_err(|e| Error::other(format!("source walk panicked: {}", e)))?
}

fn plan_single(root: PathBuf, metadata: &std::fs::Metadata, policy: &Policy) -> Result<CopyPlan> {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let modified = local_time(metadata.modified()?);
    let class = classify_file(&name, modified, policy);

    let mut plan = CopyPlan {
        root: root.clone(),
        scanned_files: 1,
        sensitive: class.sensitive,
        cold: class.cold,
        ..CopyPlan::default()
    };
    if class.copy_count > 0 {
        plan.files.push(PlannedFile {
            path: root,
            relative: PathBuf::from(name),
            size: metadata.len(),
            class,
        });
    }
    Ok(plan)
}

fn plan_tree(root: PathBuf, policy: &Policy) -> Result<CopyPlan> {
    let base = root.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut plan = CopyPlan {
        root: root.clone(),
        ..CopyPlan::default()
    };

    for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io {
            message: format!("cannot walk {}: {}", root.display(), e),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| Error::Io {
                message: format!("cannot stat {}: {}", entry.path().display(), e),
            })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let class = classify_file(&name, local_time(metadata.modified()?), policy);

        plan.scanned_files += 1;
        plan.sensitive |= class.sensitive;
        plan.cold |= class.cold;
        if class.copy_count == 0 {
            debug!("No backup needed for {}", entry.path().display());
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(&base)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(&name));
        plan.files.push(PlannedFile {
            path: entry.path().to_path_buf(),
            relative,
            size: metadata.len(),
            class,
        });
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::TIMESTAMP_FORMAT;
    use chrono::Duration;
    use filetime::FileTime;
    use rstest::rstest;
    use tempfile::TempDir;

    fn policy() -> Policy {
        let cutoff = Local::now().naive_local() - Duration::days(365);
        Policy::new("强奸|杀人|抢劫", 0, cutoff).unwrap()
    }

    fn age_file(path: &Path, days: i64) {
        let when = SystemTime::now() - std::time::Duration::from_secs(days as u64 * 86_400);
        filetime::set_file_mtime(path, FileTime::from_system_time(when)).unwrap();
    }

    #[rstest]
    #[case("report_强奸案.docx", 0, true, false, 2)]
    #[case("report_强奸案.docx", 400, true, true, 2)]
    #[case("ledger.xlsx", 400, false, true, 1)]
    #[case("ledger.xlsx", 10, false, false, 0)]
    fn test_classify_file(
        #[case] name: &str,
        #[case] age_days: i64,
        #[case] sensitive: bool,
        #[case] cold: bool,
        #[case] copies: u32,
    ) {
        let modified = Local::now().naive_local() - Duration::days(age_days);
        let class = classify_file(name, modified, &policy());
        assert_eq!(class.sensitive, sensitive);
        assert_eq!(class.cold, cold);
        assert_eq!(class.copy_count, copies);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let policy = policy();
        let modified =
            NaiveDateTime::parse_from_str("2020-05-01 08:00:00", TIMESTAMP_FORMAT).unwrap();
        let first = classify_file("a.txt", modified, &policy);
        for _ in 0..10 {
            assert_eq!(classify_file("a.txt", modified, &policy), first);
        }
    }

    #[tokio::test]
    async fn test_plan_tree_sums_copies() {
        let temp_dir = TempDir::new().unwrap();
        let case = temp_dir.path().join("case-7");
        std::fs::create_dir_all(case.join("sub")).unwrap();

        let sensitive = case.join("杀人_notes.txt");
        let cold = case.join("sub/old.log");
        let hot = case.join("fresh.txt");
        std::fs::write(&sensitive, vec![1u8; 100]).unwrap();
        std::fs::write(&cold, vec![2u8; 40]).unwrap();
        std::fs::write(&hot, vec![3u8; 7]).unwrap();
        age_file(&cold, 400);

        let plan = plan_source(&case, &policy()).await.unwrap();
        assert_eq!(plan.scanned_files, 3);
        assert_eq!(plan.files.len(), 2);
        assert_eq!(plan.total_size(), 100 * 2 + 40);
        assert_eq!(plan.backup_count(), 3);
        assert_eq!(plan.max_copy_count(), 2);
        assert!(plan.sensitive && plan.cold);

        let cold_entry = plan.files.iter().find(|f| f.path == cold).unwrap();
        assert_eq!(cold_entry.relative, PathBuf::from("case-7/sub/old.log"));
    }

    #[tokio::test]
    async fn test_plan_single_file_without_copies() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fresh.txt");
        std::fs::write(&path, b"new").unwrap();

        let plan = plan_source(&path, &policy()).await.unwrap();
        assert_eq!(plan.scanned_files, 1);
        assert!(plan.is_empty());
        assert_eq!(plan.total_size(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_validation_error() {
        let err = plan_source(Path::new("/no/such/case"), &policy())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), casevault_types::ErrorKind::Validation);
    }
}
