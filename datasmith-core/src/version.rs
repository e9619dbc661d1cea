// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Dataset versions and the counter-based version numbering scheme.
//!
//! A version string is `vMAJOR.MINOR.PATCH[-dirty]`. Numbers are derived from a
//! per-dataset monotonic counter `n`:
//!
//! ```text
//! PATCH = n % 10
//! MINOR = (n / 10) % 10
//! MAJOR = 1 + n / 100
//! ```
//!
//! PATCH and MINOR wrap at 10. The sequence is dense and collision-free for a
//! given counter without inspecting existing version strings.

use crate::status::VersionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const DIRTY: &str = "dirty";

/// Parsed version string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionNumber {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Branch marker: not promotable as-is
    pub dirty: bool,
}

impl VersionNumber {
    pub fn from_counter(n: u64, dirty: bool) -> Self {
        Self {
            major: 1 + n / 100,
            minor: (n / 10) % 10,
            patch: n % 10,
            dirty,
        }
    }

    pub fn branch(n: u64) -> Self {
        Self::from_counter(n, true)
    }

    pub fn tag(n: u64) -> Self {
        Self::from_counter(n, false)
    }

    /// Same number without the `-dirty` marker
    pub fn stripped(self) -> Self {
        Self {
            dirty: false,
            ..self
        }
    }

    fn to_semver(self) -> semver::Version {
        let mut v = semver::Version::new(self.major, self.minor, self.patch);
        if self.dirty {
            // "dirty" is always a valid prerelease identifier
            v.pre = semver::Prerelease::new(DIRTY).unwrap_or(semver::Prerelease::EMPTY);
        }
        v
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.dirty {
            write!(f, "-{}", DIRTY)?;
        }
        Ok(())
    }
}

impl FromStr for VersionNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix('v')
            .ok_or_else(|| format!("version must start with 'v': {}", s))?;
        let parsed = semver::Version::parse(raw).map_err(|e| format!("{}: {}", s, e))?;
        if !parsed.build.is_empty() {
            return Err(format!("build metadata not allowed: {}", s));
        }
        let dirty = match parsed.pre.as_str() {
            "" => false,
            DIRTY => true,
            other => return Err(format!("unknown version suffix '{}': {}", other, s)),
        };
        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            dirty,
        })
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_semver().cmp(&other.to_semver())
    }
}

impl Serialize for VersionNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    /// Mutable, appendable
    Branch,
    /// Immutable snapshot
    Tag,
}

impl VersionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionType::Branch => "branch",
            VersionType::Tag => "tag",
        }
    }
}

/// One version of a dataset. Owns its files exclusively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetVersion {
    pub id: Uuid,
    pub dataset_id: Uuid,
    /// Human label (e.g. "v1.0.0" given at publish time)
    pub name: String,
    pub version: VersionNumber,
    pub version_type: VersionType,
    pub is_original: bool,
    /// Ordered item identifiers
    pub file_ids: Vec<Uuid>,
    pub previous_version_id: Option<Uuid>,
    pub status: VersionStatus,
    /// Storage root, `{tenant}/{dataset_id}/{version_id}`
    pub storage_root: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSetVersion {
    pub fn new(
        dataset_id: Uuid,
        name: impl Into<String>,
        version: VersionNumber,
        version_type: VersionType,
        previous_version_id: Option<Uuid>,
        storage_root: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            dataset_id,
            name: name.into(),
            version,
            version_type,
            is_original: false,
            file_ids: Vec::new(),
            previous_version_id,
            status: VersionStatus::Done,
            storage_root: storage_root.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_branch(&self) -> bool {
        self.version_type == VersionType::Branch
    }

    pub fn is_tag(&self) -> bool {
        self.version_type == VersionType::Tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_counter_rollover() {
        assert_eq!(VersionNumber::branch(0).to_string(), "v1.0.0-dirty");
        assert_eq!(VersionNumber::branch(9).to_string(), "v1.0.9-dirty");
        assert_eq!(VersionNumber::branch(10).to_string(), "v1.1.0-dirty");
        assert_eq!(VersionNumber::tag(99).to_string(), "v1.9.9");
        assert_eq!(VersionNumber::tag(100).to_string(), "v2.0.0");
        assert_eq!(VersionNumber::tag(1234).to_string(), "v13.3.4");
    }

    #[test]
    fn test_parse() {
        let v: VersionNumber = "v1.2.3-dirty".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch, v.dirty), (1, 2, 3, true));
        assert_eq!(v.stripped().to_string(), "v1.2.3");

        assert!("1.2.3".parse::<VersionNumber>().is_err());
        assert!("v1.2.3-rc1".parse::<VersionNumber>().is_err());
        assert!("v1.2".parse::<VersionNumber>().is_err());
    }

    #[test]
    fn test_dirty_sorts_before_release() {
        let branch = VersionNumber::branch(5);
        assert!(branch < branch.stripped());
        assert!(branch.stripped() < VersionNumber::branch(6));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&VersionNumber::branch(12)).unwrap();
        assert_eq!(json, "\"v1.1.2-dirty\"");
        let back: VersionNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, VersionNumber::branch(12));
    }

    proptest! {
        #[test]
        fn prop_counter_sequence_strictly_increasing(n in 0u64..100_000) {
            let a = VersionNumber::branch(n);
            let b = VersionNumber::branch(n + 1);
            prop_assert!(a < b);
            prop_assert_ne!(a.to_string(), b.to_string());
        }

        #[test]
        fn prop_display_parse_agree(n in 0u64..100_000, dirty in any::<bool>()) {
            let v = VersionNumber::from_counter(n, dirty);
            prop_assert_eq!(v.to_string().parse::<VersionNumber>().unwrap(), v);
        }
    }
}
