//! Persistent-write sinks for the received image.
//!
//! A sink sees one `begin` per session, then one `write` per accepted chunk,
//! in order, and exactly one of `finalize` (image complete and verified) or
//! `abort` (session failed).

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{OtaError, OtaResult};

/// Destination of the received image.
pub trait FirmwareSink {
    /// Prepare for a new image of `total_size` bytes, dropping anything left
    /// from a previous session.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::SinkWriteFailed`]; the session is then not started.
    fn begin(&mut self, _total_size: u64) -> OtaResult<()> {
        Ok(())
    }

    /// Write `bytes` at byte `offset` of the image.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::SinkWriteFailed`]; the chunk is then rejected and
    /// requested again.
    fn write(&mut self, offset: u64, bytes: &[u8]) -> OtaResult<()>;

    /// Commit the complete image.
    ///
    /// # Errors
    ///
    /// Any error fails verification of the session.
    fn finalize(&mut self) -> OtaResult<()>;

    /// Discard a partially written image.
    fn abort(&mut self) {}
}

impl<S: FirmwareSink + ?Sized> FirmwareSink for &mut S {
    fn begin(&mut self, total_size: u64) -> OtaResult<()> {
        (**self).begin(total_size)
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> OtaResult<()> {
        (**self).write(offset, bytes)
    }

    fn finalize(&mut self) -> OtaResult<()> {
        (**self).finalize()
    }

    fn abort(&mut self) {
        (**self).abort();
    }
}

impl<S: FirmwareSink + ?Sized> FirmwareSink for Box<S> {
    fn begin(&mut self, total_size: u64) -> OtaResult<()> {
        (**self).begin(total_size)
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> OtaResult<()> {
        (**self).write(offset, bytes)
    }

    fn finalize(&mut self) -> OtaResult<()> {
        (**self).finalize()
    }

    fn abort(&mut self) {
        (**self).abort();
    }
}

/// Sink that assembles the image in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySink {
    image: Vec<u8>,
    finalized: bool,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Whether `finalize` succeeded for the current image
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Take the assembled image, leaving the sink empty.
    pub fn take_image(&mut self) -> Vec<u8> {
        self.finalized = false;
        std::mem::take(&mut self.image)
    }
}

impl FirmwareSink for MemorySink {
    fn begin(&mut self, total_size: u64) -> OtaResult<()> {
        let capacity = usize::try_from(total_size)
            .map_err(|e| OtaError::sink_write_failed(format!("image of {total_size} bytes: {e}")))?;
        self.image.clear();
        self.image
            .try_reserve(capacity)
            .map_err(|e| OtaError::sink_write_failed(format!("image of {total_size} bytes: {e}")))?;
        self.finalized = false;
        Ok(())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> OtaResult<()> {
        let start = usize::try_from(offset)
            .map_err(|e| OtaError::sink_write_failed(format!("offset {offset}: {e}")))?;
        if start > self.image.len() {
            return Err(OtaError::sink_write_failed(format!(
                "offset {offset} leaves a gap after {} bytes",
                self.image.len()
            )));
        }
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| OtaError::sink_write_failed("image length overflow"))?;

        if self.image.len() < end {
            self.image.resize(end, 0);
        }
        let slot = self
            .image
            .get_mut(start..end)
            .ok_or_else(|| OtaError::sink_write_failed("write out of range"))?;
        slot.copy_from_slice(bytes);
        self.finalized = false;
        Ok(())
    }

    fn finalize(&mut self) -> OtaResult<()> {
        self.finalized = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.image.clear();
        self.finalized = false;
    }
}

/// Sink that streams the image into a staging file and renames it into place.
#[derive(Debug)]
pub struct FileSink {
    target: PathBuf,
    staging: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// Sink that will produce `target`, staging in `<target>.partial`.
    pub fn new(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        let mut staging = target.clone().into_os_string();
        staging.push(".partial");
        Self {
            target,
            staging: PathBuf::from(staging),
            file: None,
        }
    }

    /// Final image path
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Staging path used while the image is incomplete
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    fn staging_file(&mut self) -> OtaResult<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.staging)
                .map_err(|e| {
                    OtaError::sink_write_failed(format!(
                        "failed to open {}: {e}",
                        self.staging.display()
                    ))
                })?;
            debug!(path = %self.staging.display(), "Opened firmware staging file");
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| OtaError::sink_write_failed("staging file unavailable"))
    }
}

impl FirmwareSink for FileSink {
    fn begin(&mut self, _total_size: u64) -> OtaResult<()> {
        // Reopening truncates the staging file.
        self.file = None;
        self.staging_file().map(|_| ())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> OtaResult<()> {
        let file = self.staging_file()?;
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(bytes))
            .map_err(|e| OtaError::sink_write_failed(format!("write at {offset}: {e}")))
    }

    fn finalize(&mut self) -> OtaResult<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| OtaError::verification_failed("nothing was written"))?;
        file.sync_all()
            .map_err(|e| OtaError::verification_failed(format!("sync failed: {e}")))?;
        drop(file);

        fs::rename(&self.staging, &self.target).map_err(|e| {
            OtaError::verification_failed(format!(
                "failed to move image to {}: {e}",
                self.target.display()
            ))
        })
    }

    fn abort(&mut self) {
        self.file = None;
        if let Err(e) = fs::remove_file(&self.staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.staging.display(), error = %e, "Failed to remove staging file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_sequential_writes() -> OtaResult<()> {
        let mut sink = MemorySink::new();
        sink.write(0, b"abcd")?;
        sink.write(4, b"ef")?;
        assert_eq!(sink.image(), b"abcdef");
        assert!(!sink.is_finalized());
        sink.finalize()?;
        assert!(sink.is_finalized());
        Ok(())
    }

    #[test]
    fn test_memory_sink_begin_drops_previous_image() -> OtaResult<()> {
        let mut sink = MemorySink::new();
        sink.begin(8)?;
        sink.write(0, b"abcdefgh")?;
        sink.finalize()?;

        sink.begin(4)?;
        assert!(sink.image().is_empty());
        assert!(!sink.is_finalized());
        sink.write(0, b"wxyz")?;
        assert_eq!(sink.image(), b"wxyz");
        Ok(())
    }

    #[test]
    fn test_memory_sink_rejects_gap() {
        let mut sink = MemorySink::new();
        let result = sink.write(8, b"x");
        assert!(matches!(result, Err(OtaError::SinkWriteFailed(_))));
    }

    #[test]
    fn test_memory_sink_abort_clears() -> OtaResult<()> {
        let mut sink = MemorySink::new();
        sink.write(0, b"abcd")?;
        sink.abort();
        assert!(sink.image().is_empty());
        Ok(())
    }

    #[test]
    fn test_file_sink_finalize_renames() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("firmware.bin");
        let mut sink = FileSink::new(&target);

        sink.write(0, b"hello ")?;
        sink.write(6, b"world")?;
        assert!(sink.staging().exists());
        assert!(!target.exists());

        sink.finalize()?;
        assert!(!sink.staging().exists());
        assert_eq!(std::fs::read(&target)?, b"hello world");
        Ok(())
    }

    #[test]
    fn test_file_sink_begin_truncates_staging() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = FileSink::new(dir.path().join("firmware.bin"));
        sink.begin(11)?;
        sink.write(0, b"hello world")?;

        sink.begin(3)?;
        sink.write(0, b"new")?;
        sink.finalize()?;
        assert_eq!(std::fs::read(sink.target())?, b"new");
        Ok(())
    }

    #[test]
    fn test_file_sink_abort_removes_staging() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = FileSink::new(dir.path().join("firmware.bin"));
        sink.write(0, b"partial")?;
        sink.abort();
        assert!(!sink.staging().exists());
        assert!(!sink.target().exists());
        Ok(())
    }
}
