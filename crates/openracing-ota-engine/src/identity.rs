//! Firmware identity and the lifecycle state a device reports about itself.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Title and version of a firmware image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareIdentity {
    /// Firmware title; images are only interchangeable within one title.
    pub title: String,

    /// Firmware version, compared for equality only.
    pub version: String,
}

impl FirmwareIdentity {
    /// Create a new identity.
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            version: version.into(),
        }
    }

    /// Whether `target` may replace this firmware.
    ///
    /// Titles must match and versions must differ. Downgrades are allowed.
    #[must_use]
    pub fn is_update_eligible(&self, target: &FirmwareIdentity) -> bool {
        self.title == target.title && self.version != target.version
    }

    /// Classify moving from this identity to `target`.
    ///
    /// Falls back to [`UpdateDirection::Unordered`] when either version is not
    /// semver.
    #[must_use]
    pub fn direction_to(&self, target: &FirmwareIdentity) -> UpdateDirection {
        let (Ok(current), Ok(next)) = (
            semver::Version::parse(&self.version),
            semver::Version::parse(&target.version),
        ) else {
            return UpdateDirection::Unordered;
        };

        match next.cmp(&current) {
            Ordering::Greater => UpdateDirection::Upgrade,
            Ordering::Less => UpdateDirection::Downgrade,
            Ordering::Equal => UpdateDirection::Unordered,
        }
    }
}

impl fmt::Display for FirmwareIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.title, self.version)
    }
}

/// Relative ordering of an offered version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateDirection {
    /// Target is a newer semver version.
    Upgrade,
    /// Target is an older semver version.
    Downgrade,
    /// Versions are not comparable as semver.
    Unordered,
}

/// Lifecycle state published alongside the firmware identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportedState {
    /// A new image is being retrieved.
    Updating,
    /// The running image booted correctly.
    Updated,
    /// The last update attempt failed; the current image stays.
    Failed,
}

impl ReportedState {
    /// Wire name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updating => "UPDATING",
            Self::Updated => "UPDATED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ReportedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
