//! Content fingerprints for verification and deduplication
//!
//! Fingerprints are lowercase hex SHA-256 digests. Source fingerprints are
//! cached by path, size and modification time so a resumed task does not hash
//! every file again. Target fingerprints are always computed fresh.

use casevault_types::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

const HASH_BUFFER_SIZE: usize = 64 * 1024;
const CLAIM_PRUNE_THRESHOLD: usize = 1024;

/// Hash a file's full content
pub async fn sha256_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .await
        .map_err(|e| Error::from_io_at(&e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| Error::from_io_at(&e, path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash an in-memory buffer
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
struct CacheEntry {
    size: u64,
    modified: Option<SystemTime>,
    hash: String,
}

impl CacheEntry {
    fn is_valid(&self, size: u64, modified: Option<SystemTime>) -> bool {
        self.size == size && self.modified == modified
    }
}

/// Held while a task checks for and writes one piece of content
///
/// Two workers holding the same content cannot both miss the dedup lookup.
#[derive(Debug)]
pub struct ChecksumClaim {
    checksum: String,
    _guard: OwnedMutexGuard<()>,
}

impl ChecksumClaim {
    /// Claimed fingerprint
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// Computes, caches and serializes work on content fingerprints
#[derive(Debug, Default)]
pub struct ChecksumRegistry {
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
    claims: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChecksumRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint of a source file, reusing a cached value when size and mtime match
    pub async fn checksum<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::from_io_at(&e, path))?;
        if metadata.is_dir() {
            return Err(Error::validation(format!(
                "cannot fingerprint directory {}",
                path.display()
            )));
        }
        let size = metadata.len();
        let modified = metadata.modified().ok();

        if let Some(entry) = self.cache.lock().await.get(path) {
            if entry.is_valid(size, modified) {
                debug!("Checksum cache hit for: {}", path.display());
                return Ok(entry.hash.clone());
            }
        }

        let hash = sha256_file(path).await?;
        self.cache.lock().await.insert(
            path.to_path_buf(),
            CacheEntry {
                size,
                modified,
                hash: hash.clone(),
            },
        );
        Ok(hash)
    }

    /// Fingerprint of a file, bypassing the cache
    pub async fn compute<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        sha256_file(path).await
    }

    /// Drop a cached fingerprint
    pub async fn invalidate<P: AsRef<Path>>(&self, path: P) {
        self.cache.lock().await.remove(path.as_ref());
    }

    /// Number of cached fingerprints
    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Wait for exclusive use of a fingerprint
    pub async fn claim(&self, checksum: &str) -> ChecksumClaim {
        let lock = {
            let mut claims = self.claims.lock().await;
            if claims.len() >= CLAIM_PRUNE_THRESHOLD {
                claims.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            claims
                .entry(checksum.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        ChecksumClaim {
            checksum: checksum.to_string(),
            _guard: lock.lock_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[tokio::test]
    async fn test_known_digests() {
        let temp_dir = TempDir::new().unwrap();
        let empty = temp_dir.path().join("empty");
        tokio::fs::write(&empty, b"").await.unwrap();

        assert_eq!(sha256_file(&empty).await.unwrap(), EMPTY_SHA256);
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_file_matches_bytes_across_buffer_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.bin");
        let data: Vec<u8> = (0..HASH_BUFFER_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        assert_eq!(sha256_file(&path).await.unwrap(), sha256_bytes(&data));
    }

    #[tokio::test]
    async fn test_cache_refreshes_on_change() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.txt");
        tokio::fs::write(&path, b"first").await.unwrap();

        let registry = ChecksumRegistry::new();
        let first = registry.checksum(&path).await.unwrap();
        assert_eq!(registry.cached_len().await, 1);
        assert_eq!(registry.checksum(&path).await.unwrap(), first);

        tokio::fs::write(&path, b"second, longer").await.unwrap();
        let second = registry.checksum(&path).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(second, sha256_bytes(b"second, longer"));
    }

    #[tokio::test]
    async fn test_directory_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let registry = ChecksumRegistry::new();
        let err = registry.checksum(temp_dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), casevault_types::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let registry = ChecksumRegistry::new();
        let err = registry.checksum("/definitely/not/here").await.unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_claim_serializes_same_checksum() {
        let registry = Arc::new(ChecksumRegistry::new());
        let first = registry.claim("abc").await;
        assert_eq!(first.checksum(), "abc");

        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _claim = registry.claim("abc").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        // Different content is not blocked
        let _other = registry.claim("def").await;

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .unwrap()
            .unwrap();
    }
}
