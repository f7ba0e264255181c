//! Image integrity checking.
//!
//! The digest is fed chunk by chunk as payloads are accepted, so verification
//! never has to read the image back from the sink.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::OtaError;

/// Checksum algorithms an update offer may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    /// SHA-256
    #[serde(rename = "SHA256")]
    Sha256,
    /// SHA-384
    #[serde(rename = "SHA384")]
    Sha384,
    /// SHA-512
    #[serde(rename = "SHA512")]
    Sha512,
    /// CRC-32 (IEEE)
    #[serde(rename = "CRC32")]
    Crc32,
}

impl ChecksumAlgorithm {
    /// Wire name of the algorithm.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
            Self::Crc32 => "CRC32",
        }
    }

    /// Length of the hex-encoded digest.
    #[must_use]
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
            Self::Crc32 => 8,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            "CRC32" => Ok(Self::Crc32),
            other => Err(OtaError::manifest_invalid(format!(
                "unsupported checksum algorithm '{other}'"
            ))),
        }
    }
}

/// Expected digest of a complete image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageChecksum {
    /// Digest algorithm
    pub algorithm: ChecksumAlgorithm,
    /// Lowercase hex encoding of the expected digest
    pub expected_hex: String,
}

impl ImageChecksum {
    /// Build a checksum, normalising and validating the hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::ManifestInvalid`] if `expected_hex` is not a hex
    /// digest of the algorithm's length.
    pub fn new(algorithm: ChecksumAlgorithm, expected_hex: &str) -> Result<Self, OtaError> {
        let normalized = expected_hex.trim().to_ascii_lowercase();
        if normalized.len() != algorithm.hex_len() || hex::decode(&normalized).is_err() {
            return Err(OtaError::manifest_invalid(format!(
                "checksum '{expected_hex}' is not a valid {algorithm} digest"
            )));
        }
        Ok(Self {
            algorithm,
            expected_hex: normalized,
        })
    }

    /// Compute the checksum of `data` in one pass.
    #[must_use]
    pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut digest = ImageDigest::new(Some(algorithm));
        digest.update(data);
        Self {
            algorithm,
            expected_hex: digest.finalize_hex().unwrap_or_default(),
        }
    }
}

/// Running digest over the accepted payloads of one session.
#[derive(Clone)]
pub(crate) enum ImageDigest {
    Disabled,
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Crc32(crc32fast::Hasher),
}

impl ImageDigest {
    pub(crate) fn new(algorithm: Option<ChecksumAlgorithm>) -> Self {
        match algorithm {
            None => Self::Disabled,
            Some(ChecksumAlgorithm::Sha256) => Self::Sha256(Sha256::new()),
            Some(ChecksumAlgorithm::Sha384) => Self::Sha384(Sha384::new()),
            Some(ChecksumAlgorithm::Sha512) => Self::Sha512(Sha512::new()),
            Some(ChecksumAlgorithm::Crc32) => Self::Crc32(crc32fast::Hasher::new()),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Self::Disabled => {}
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Crc32(h) => h.update(data),
        }
    }

    /// Hex digest of everything fed so far, `None` when disabled.
    pub(crate) fn finalize_hex(&self) -> Option<String> {
        match self.clone() {
            Self::Disabled => None,
            Self::Sha256(h) => Some(hex::encode(h.finalize())),
            Self::Sha384(h) => Some(hex::encode(h.finalize())),
            Self::Sha512(h) => Some(hex::encode(h.finalize())),
            Self::Crc32(h) => Some(hex::encode(h.finalize().to_be_bytes())),
        }
    }
}

impl fmt::Debug for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "Disabled",
            Self::Sha256(_) => "Sha256",
            Self::Sha384(_) => "Sha384",
            Self::Sha512(_) => "Sha512",
            Self::Crc32(_) => "Crc32",
        };
        f.debug_tuple("ImageDigest").field(&name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_digest_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut digest = ImageDigest::new(Some(ChecksumAlgorithm::Sha256));
        for chunk in data.chunks(4096) {
            digest.update(chunk);
        }
        let expected = ImageChecksum::compute(ChecksumAlgorithm::Sha256, &data);
        assert_eq!(digest.finalize_hex(), Some(expected.expected_hex));
    }

    #[test]
    fn test_crc32_known_value() {
        let checksum = ImageChecksum::compute(ChecksumAlgorithm::Crc32, b"123456789");
        assert_eq!(checksum.expected_hex, "cbf43926");
    }

    #[test]
    fn test_algorithm_parsing() {
        assert!(matches!(
            "sha-256".parse::<ChecksumAlgorithm>(),
            Ok(ChecksumAlgorithm::Sha256)
        ));
        assert!(matches!(
            "CRC32".parse::<ChecksumAlgorithm>(),
            Ok(ChecksumAlgorithm::Crc32)
        ));
        assert!(matches!(
            "MD5".parse::<ChecksumAlgorithm>(),
            Err(OtaError::ManifestInvalid(_))
        ));
    }

    #[test]
    fn test_checksum_rejects_bad_hex() {
        assert!(matches!(
            ImageChecksum::new(ChecksumAlgorithm::Crc32, "cbf4392"),
            Err(OtaError::ManifestInvalid(_))
        ));
        assert!(matches!(
            ImageChecksum::new(ChecksumAlgorithm::Crc32, "zzzzzzzz"),
            Err(OtaError::ManifestInvalid(_))
        ));
        let ok = ImageChecksum::new(ChecksumAlgorithm::Crc32, "CBF43926");
        assert!(matches!(ok, Ok(c) if c.expected_hex == "cbf43926"));
    }

    #[test]
    fn test_disabled_digest() {
        let mut digest = ImageDigest::new(None);
        digest.update(b"ignored");
        assert!(digest.finalize_hex().is_none());
    }
}
