// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Byte ceiling for all live registry buffers.

use crate::RegistryError;
use std::fmt;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Suffixes accepted by [`MemoryBudget::parse`], longest first.
const SUFFIXES: &[(&str, usize)] = &[
    ("GB", GB),
    ("MB", MB),
    ("KB", KB),
    ("G", GB),
    ("M", MB),
    ("K", KB),
    ("B", 1),
];

/// The total number of bytes the registry may hand out at once.
///
/// # Examples
/// ```
/// use buffer_registry::MemoryBudget;
///
/// let b = MemoryBudget::parse("64M").unwrap();
/// assert_eq!(b.as_bytes(), 64 * 1024 * 1024);
/// assert_eq!(b.to_string(), "64 MB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MB }
    }

    /// No practical ceiling.
    pub fn unlimited() -> Self {
        Self { bytes: usize::MAX }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Parses `"64M"`, `"64MB"`, `"1G"`, `"512K"`, a raw byte count or
    /// `"unlimited"`. Case-insensitive; zero is rejected.
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "UNLIMITED" {
            return Ok(Self::unlimited());
        }

        let (digits, multiplier) = SUFFIXES
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map(|&(suffix, m)| (&trimmed[..trimmed.len() - suffix.len()], m))
            .unwrap_or((trimmed, 1));

        let value: usize = digits
            .trim()
            .parse()
            .map_err(|_| RegistryError::InvalidBudget(format!("'{s}' is not a byte count")))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| RegistryError::InvalidBudget(format!("'{s}' overflows")))?;
        if bytes == 0 {
            return Err(RegistryError::InvalidBudget("budget must be non-zero".into()));
        }
        Ok(Self { bytes })
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::from_mb(64)
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes == usize::MAX {
            return f.write_str("unlimited");
        }
        for (unit, size) in [("GB", GB), ("MB", MB), ("KB", KB)] {
            if self.bytes >= size && self.bytes % size == 0 {
                return write!(f, "{} {unit}", self.bytes / size);
            }
        }
        write!(f, "{} B", self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(MemoryBudget::parse("64M").unwrap().as_bytes(), 64 * MB);
        assert_eq!(MemoryBudget::parse("64mb").unwrap().as_bytes(), 64 * MB);
        assert_eq!(MemoryBudget::parse("2G").unwrap().as_bytes(), 2 * GB);
        assert_eq!(MemoryBudget::parse("512K").unwrap().as_bytes(), 512 * KB);
        assert_eq!(MemoryBudget::parse("100B").unwrap().as_bytes(), 100);
        assert_eq!(MemoryBudget::parse(" 4096 ").unwrap().as_bytes(), 4096);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(MemoryBudget::parse("").is_err());
        assert!(MemoryBudget::parse("lots").is_err());
        assert!(MemoryBudget::parse("0M").is_err());
        assert!(MemoryBudget::parse("99999999999999999999G").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryBudget::from_mb(64).to_string(), "64 MB");
        assert_eq!(MemoryBudget::from_bytes(2048).to_string(), "2 KB");
        assert_eq!(MemoryBudget::from_bytes(100).to_string(), "100 B");
    }

    #[test]
    fn test_unlimited() {
        let b = MemoryBudget::parse(" Unlimited ").unwrap();
        assert_eq!(b, MemoryBudget::unlimited());
        assert_eq!(b.as_bytes(), usize::MAX);
        assert_eq!(b.to_string(), "unlimited");
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = MemoryBudget::from_mb(8);
        let json = serde_json::to_string(&b).unwrap();
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }
}
