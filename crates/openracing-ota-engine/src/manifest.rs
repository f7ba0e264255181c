//! Update manifest: what is offered and how it is cut into chunks.

use serde::{Deserialize, Serialize};

use crate::error::{OtaError, OtaResult};
use crate::identity::FirmwareIdentity;
use crate::verify::ImageChecksum;

/// Metadata describing an offered firmware image.
///
/// Fields are private; a manifest cannot change once a session has accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    target: FirmwareIdentity,
    total_size: u64,
    chunk_size: u32,
    chunk_count: u32,
    checksum: Option<ImageChecksum>,
}

impl UpdateManifest {
    /// Build a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::ManifestInvalid`] for a zero size, a zero chunk size,
    /// or an image that would need more than `u32::MAX` chunks.
    pub fn new(target: FirmwareIdentity, total_size: u64, chunk_size: u32) -> OtaResult<Self> {
        if target.title.is_empty() || target.version.is_empty() {
            return Err(OtaError::manifest_invalid(
                "target title and version must not be empty",
            ));
        }
        if total_size == 0 {
            return Err(OtaError::manifest_invalid("total size must be greater than 0"));
        }
        if chunk_size == 0 {
            return Err(OtaError::manifest_invalid("chunk size must be greater than 0"));
        }

        let chunk_count = u32::try_from(total_size.div_ceil(u64::from(chunk_size)))
            .map_err(|e| OtaError::manifest_invalid(format!("too many chunks: {e}")))?;

        Ok(Self {
            target,
            total_size,
            chunk_size,
            chunk_count,
            checksum: None,
        })
    }

    /// Attach the expected image checksum.
    #[must_use]
    pub fn with_checksum(mut self, checksum: ImageChecksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Identity of the offered image
    pub fn target(&self) -> &FirmwareIdentity {
        &self.target
    }

    /// Image size in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes per chunk request
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// `ceil(total_size / chunk_size)`
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Expected image checksum, if the offer carried one
    pub fn checksum(&self) -> Option<&ImageChecksum> {
        self.checksum.as_ref()
    }

    /// Byte offset of chunk `index` within the image.
    pub fn chunk_offset(&self, index: u32) -> u64 {
        u64::from(index).saturating_mul(u64::from(self.chunk_size))
    }

    /// Payload length chunk `index` must have, `None` past the last chunk.
    ///
    /// Every chunk is `chunk_size` bytes except the last, which carries the
    /// remainder.
    pub fn expected_chunk_len(&self, index: u32) -> Option<u64> {
        if index >= self.chunk_count {
            return None;
        }
        let remaining = self.total_size.saturating_sub(self.chunk_offset(index));
        Some(remaining.min(u64::from(self.chunk_size)))
    }

    /// Whether `index` is the final chunk.
    pub fn is_last_chunk(&self, index: u32) -> bool {
        index.saturating_add(1) == self.chunk_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> FirmwareIdentity {
        FirmwareIdentity::new("ESPino32", "1.1.0")
    }

    #[test]
    fn test_chunk_layout() -> OtaResult<()> {
        let manifest = UpdateManifest::new(target(), 10_000, 4096)?;
        assert_eq!(manifest.chunk_count(), 3);
        assert_eq!(manifest.expected_chunk_len(0), Some(4096));
        assert_eq!(manifest.expected_chunk_len(1), Some(4096));
        assert_eq!(manifest.expected_chunk_len(2), Some(1808));
        assert_eq!(manifest.expected_chunk_len(3), None);
        assert_eq!(manifest.chunk_offset(2), 8192);
        assert!(manifest.is_last_chunk(2));
        assert!(!manifest.is_last_chunk(1));
        Ok(())
    }

    #[test]
    fn test_exact_multiple() -> OtaResult<()> {
        let manifest = UpdateManifest::new(target(), 8192, 4096)?;
        assert_eq!(manifest.chunk_count(), 2);
        assert_eq!(manifest.expected_chunk_len(1), Some(4096));
        Ok(())
    }

    #[test]
    fn test_rejects_degenerate_sizes() {
        assert!(matches!(
            UpdateManifest::new(target(), 0, 4096),
            Err(OtaError::ManifestInvalid(_))
        ));
        assert!(matches!(
            UpdateManifest::new(target(), 100, 0),
            Err(OtaError::ManifestInvalid(_))
        ));
        assert!(matches!(
            UpdateManifest::new(FirmwareIdentity::new("", "1"), 100, 10),
            Err(OtaError::ManifestInvalid(_))
        ));
        assert!(matches!(
            UpdateManifest::new(target(), u64::MAX, 1),
            Err(OtaError::ManifestInvalid(_))
        ));
    }
}
