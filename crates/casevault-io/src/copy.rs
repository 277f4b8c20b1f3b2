//! Resumable positional file copy
//!
//! A copy starts at a persisted offset, writes fixed-size chunks at their
//! absolute positions and hands every finished chunk to a [`ChunkObserver`].
//! The observer persists the new offset and decides whether to keep going, so
//! a pause lands on a chunk boundary and a later call continues from there.

use async_trait::async_trait;
use casevault_types::{Error, Result};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Default chunk size: 8 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// State after one chunk reached the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Bytes of the target now written, from the start of the file
    pub offset: u64,
    /// Source length
    pub total: u64,
    /// Bytes in this chunk
    pub chunk_len: usize,
}

/// Observer verdict after a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkControl {
    /// Copy the next chunk
    Continue,
    /// Stop at this boundary
    Stop,
}

/// Receives every written chunk
#[async_trait]
pub trait ChunkObserver: Send {
    /// Called after a chunk is flushed to the target
    async fn on_chunk(&mut self, progress: ChunkProgress) -> Result<ChunkControl>;
}

/// Observer that never stops and records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct RunToEnd;

#[async_trait]
impl ChunkObserver for RunToEnd {
    async fn on_chunk(&mut self, _progress: ChunkProgress) -> Result<ChunkControl> {
        Ok(ChunkControl::Continue)
    }
}

/// Result of a copy call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Whole source is in the target
    Completed {
        /// Bytes written by this call
        bytes_written: u64,
        /// Final target length
        offset: u64,
    },
    /// Observer asked to stop
    Stopped {
        /// Bytes written by this call
        bytes_written: u64,
        /// Target bytes valid so far
        offset: u64,
    },
}

impl CopyOutcome {
    /// Bytes written by this call
    pub fn bytes_written(&self) -> u64 {
        match self {
            Self::Completed { bytes_written, .. } | Self::Stopped { bytes_written, .. } => {
                *bytes_written
            }
        }
    }

    /// Target bytes valid after this call
    pub fn offset(&self) -> u64 {
        match self {
            Self::Completed { offset, .. } | Self::Stopped { offset, .. } => *offset,
        }
    }

    /// Check if the whole source was copied
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Chunked copier that resumes from an offset
#[derive(Debug, Clone, Copy)]
pub struct ResumableCopier {
    chunk_size: usize,
}

impl Default for ResumableCopier {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ResumableCopier {
    /// Create a copier with the given chunk size
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Configured chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copy `source` to `target` starting at `resume_offset`
    ///
    /// The effective start is clamped to the target's current length and the
    /// source length, so a target shorter than the persisted offset is
    /// refilled rather than left with a hole.
    pub async fn copy<O: ChunkObserver + ?Sized>(
        &self,
        source: &Path,
        target: &Path,
        resume_offset: u64,
        observer: &mut O,
    ) -> Result<CopyOutcome> {
        let source_meta = fs::metadata(source)
            .await
            .map_err(|e| Error::from_io_at(&e, source))?;
        if source_meta.is_dir() {
            return Err(Error::validation(format!(
                "{} is a directory; copies are per file",
                source.display()
            )));
        }
        let total = source_meta.len();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io_at(&e, parent))?;
        }

        let mut writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(target)
            .await
            .map_err(|e| Error::from_io_at(&e, target))?;
        let target_len = writer
            .metadata()
            .await
            .map_err(|e| Error::from_io_at(&e, target))?
            .len();

        let start = resume_offset.min(target_len).min(total);
        if start != resume_offset {
            debug!(
                "Adjusted resume offset for {} from {} to {}",
                target.display(),
                resume_offset,
                start
            );
        }
        if start > 0 {
            info!(
                "Resuming {} -> {} at byte {}",
                source.display(),
                target.display(),
                start
            );
        }

        let mut reader = File::open(source)
            .await
            .map_err(|e| Error::from_io_at(&e, source))?;
        reader
            .seek(SeekFrom::Start(start))
            .await
            .map_err(|e| Error::from_io_at(&e, source))?;
        writer
            .seek(SeekFrom::Start(start))
            .await
            .map_err(|e| Error::from_io_at(&e, target))?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut offset = start;

        while offset < total {
            let want = self.chunk_size.min((total - offset) as usize);
            let n = read_chunk(&mut reader, &mut buffer[..want])
                .await
                .map_err(|e| Error::from_io_at(&e, source))?;
            if n == 0 {
                // Source shrank underneath us
                break;
            }

            writer
                .write_all(&buffer[..n])
                .await
                .map_err(|e| Error::from_io_at(&e, target))?;
            writer
                .flush()
                .await
                .map_err(|e| Error::from_io_at(&e, target))?;
            offset += n as u64;

            let control = observer
                .on_chunk(ChunkProgress {
                    offset,
                    total,
                    chunk_len: n,
                })
                .await?;
            if control == ChunkControl::Stop && offset < total {
                writer
                    .sync_data()
                    .await
                    .map_err(|e| Error::from_io_at(&e, target))?;
                debug!("Stopped {} at byte {}", target.display(), offset);
                return Ok(CopyOutcome::Stopped {
                    bytes_written: offset - start,
                    offset,
                });
            }
        }

        // Drop anything past the end left by an earlier, longer source
        writer
            .set_len(offset)
            .await
            .map_err(|e| Error::from_io_at(&e, target))?;
        writer
            .sync_all()
            .await
            .map_err(|e| Error::from_io_at(&e, target))?;

        Ok(CopyOutcome::Completed {
            bytes_written: offset - start,
            offset,
        })
    }
}

async fn read_chunk(reader: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::sha256_file;
    use proptest::prelude::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    /// Stops once the target reaches `stop_at` bytes
    struct StopAt {
        stop_at: u64,
        seen: Vec<u64>,
    }

    #[async_trait]
    impl ChunkObserver for StopAt {
        async fn on_chunk(&mut self, progress: ChunkProgress) -> Result<ChunkControl> {
            self.seen.push(progress.offset);
            if progress.offset >= self.stop_at {
                Ok(ChunkControl::Stop)
            } else {
                Ok(ChunkControl::Continue)
            }
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 253) as u8).collect()
    }

    #[rstest]
    #[case(20_000, DEFAULT_CHUNK_SIZE)]
    #[case(4096, 4096)]
    #[case(4097, 4096)]
    #[case(1, 1024)]
    #[tokio::test]
    async fn test_full_copy(#[case] len: usize, #[case] chunk_size: usize) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src.bin");
        let target = temp_dir.path().join("nested").join("dst.bin");
        tokio::fs::write(&source, pattern(len)).await.unwrap();

        let outcome = ResumableCopier::new(chunk_size)
            .copy(&source, &target, 0, &mut RunToEnd)
            .await
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(outcome.bytes_written(), len as u64);
        assert_eq!(
            sha256_file(&source).await.unwrap(),
            sha256_file(&target).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_pause_and_resume_writes_only_the_rest() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("evidence.bin");
        let target = temp_dir.path().join("copy.bin");
        tokio::fs::write(&source, pattern((10 * MIB) as usize))
            .await
            .unwrap();

        let copier = ResumableCopier::default();
        let mut observer = StopAt {
            stop_at: 4 * MIB,
            seen: Vec::new(),
        };
        let first = copier
            .copy(&source, &target, 0, &mut observer)
            .await
            .unwrap();
        assert_eq!(
            first,
            CopyOutcome::Stopped {
                bytes_written: 4 * MIB,
                offset: 4 * MIB
            }
        );
        assert!(observer.seen.windows(2).all(|w| w[0] < w[1]));

        let second = copier
            .copy(&source, &target, first.offset(), &mut RunToEnd)
            .await
            .unwrap();
        assert!(second.is_completed());
        assert_eq!(second.bytes_written(), 6 * MIB);
        assert_eq!(
            tokio::fs::read(&source).await.unwrap(),
            tokio::fs::read(&target).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_offset_clamped_to_target_length() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src.bin");
        let target = temp_dir.path().join("dst.bin");
        let data = pattern(30_000);
        tokio::fs::write(&source, &data).await.unwrap();
        tokio::fs::write(&target, &data[..1000]).await.unwrap();

        let outcome = ResumableCopier::default()
            .copy(&source, &target, 16_384, &mut RunToEnd)
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written(), 29_000);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_trailing_bytes_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src.bin");
        let target = temp_dir.path().join("dst.bin");
        tokio::fs::write(&source, b"short").await.unwrap();
        tokio::fs::write(&target, b"a much longer stale file")
            .await
            .unwrap();

        ResumableCopier::default()
            .copy(&source, &target, 0, &mut RunToEnd)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_zero_length_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("empty");
        let target = temp_dir.path().join("out").join("empty");
        tokio::fs::write(&source, b"").await.unwrap();

        let outcome = ResumableCopier::default()
            .copy(&source, &target, 0, &mut RunToEnd)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CopyOutcome::Completed {
                bytes_written: 0,
                offset: 0
            }
        );
        assert!(target.exists());
    }

    #[tokio::test]
    async fn test_directory_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let err = ResumableCopier::default()
            .copy(
                temp_dir.path(),
                &temp_dir.path().join("x"),
                0,
                &mut RunToEnd,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), casevault_types::ErrorKind::Validation);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_resume_from_any_offset(len in 0usize..40_000, cut in 0usize..40_000) {
            tokio_test::block_on(async {
                let temp_dir = TempDir::new().unwrap();
                let source = temp_dir.path().join("src.bin");
                let target = temp_dir.path().join("dst.bin");
                let data = pattern(len);
                let cut = cut.min(len);
                tokio::fs::write(&source, &data).await.unwrap();
                tokio::fs::write(&target, &data[..cut]).await.unwrap();

                let outcome = ResumableCopier::new(4096)
                    .copy(&source, &target, cut as u64, &mut RunToEnd)
                    .await
                    .unwrap();

                assert_eq!(outcome.bytes_written(), (len - cut) as u64);
                assert_eq!(tokio::fs::read(&target).await.unwrap(), data);
            });
        }
    }
}
