// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Caller-owned shared memory regions.
//!
//! A [`SharedMemory`] is the raw-region flavour of a request pool: a
//! fixed-length byte region that both the caller and the service can reach.
//! Clones share the same bytes. Each region carries a process-unique id so
//! that caches (such as a burst channel's memory-to-slot map) can key on
//! identity rather than content.

use crate::CoreError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// A fixed-length, shareable byte region.
///
/// # Example
/// ```
/// use nn_core::SharedMemory;
///
/// let region = SharedMemory::new(8);
/// region.write(4, &[1, 2, 3, 4]).unwrap();
/// assert_eq!(region.read(4, 4).unwrap(), vec![1, 2, 3, 4]);
///
/// let alias = region.clone();
/// assert_eq!(alias.id(), region.id());
/// ```
#[derive(Clone)]
pub struct SharedMemory {
    id: u64,
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl SharedMemory {
    /// Creates a zero-filled region of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_bytes(vec![0u8; len])
    }

    /// Wraps existing bytes in a new region.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            id: NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed),
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Builds a region holding little-endian `f32` values.
    pub fn from_f32s(values: &[f32]) -> Self {
        Self::from_bytes(values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    /// Process-unique identity of this region (shared by clones).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.bytes.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Returns `true` if the region holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `length` bytes starting at `offset` out of the region.
    pub fn read(&self, offset: usize, length: usize) -> Result<Vec<u8>, CoreError> {
        let bytes = self.bytes.read().map_err(|_| CoreError::Poisoned)?;
        let range = checked_range(offset, length, bytes.len())?;
        Ok(bytes[range].to_vec())
    }

    /// Copies `data` into the region starting at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), CoreError> {
        let mut bytes = self.bytes.write().map_err(|_| CoreError::Poisoned)?;
        let range = checked_range(offset, data.len(), bytes.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Returns a copy of the whole region.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.read().map(|b| b.clone()).unwrap_or_default()
    }

    /// Decodes the whole region as little-endian `f32` values.
    pub fn to_f32s(&self) -> Vec<f32> {
        self.to_vec()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

fn checked_range(
    offset: usize,
    length: usize,
    size: usize,
) -> Result<std::ops::Range<usize>, CoreError> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(CoreError::OutOfBounds {
            offset,
            length,
            size,
        }),
    }
}

impl PartialEq for SharedMemory {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SharedMemory {}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}
