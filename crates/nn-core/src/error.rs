// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for core primitives.

/// Errors raised by shared memory regions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// An access fell outside the region.
    #[error("region access out of bounds: offset {offset} + length {length} exceeds size {size}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
    },

    /// The region's lock was poisoned by a panicking writer.
    #[error("memory region lock poisoned")]
    Poisoned,
}
