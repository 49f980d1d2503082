// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the buffer registry.

use crate::IoType;
use nn_core::ErrorStatus;

/// Errors raised by token lookup, allocation and buffer access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// No live buffer carries this token.
    #[error("unknown token {0}")]
    UnknownToken(u32),

    /// The allocation would exceed the registry budget.
    #[error("out of memory: requested {requested} bytes, {available} of {budget} available")]
    OutOfMemory {
        requested: usize,
        available: usize,
        budget: usize,
    },

    /// The buffer descriptor cannot be honoured.
    #[error("unsupported buffer: {0}")]
    Unsupported(String),

    /// The request binds the buffer in a role it was not allocated for.
    #[error("buffer has no {io} role at argument {index} for this model")]
    InvalidRole { io: IoType, index: usize },

    /// The buffer is bound as an output alongside another binding.
    #[error("buffer bound as both input and output, or as more than one output")]
    AliasedOutput,

    /// Dimensions do not merge with the buffer's shape.
    #[error("dimensions {requested:?} are incompatible with buffer shape {buffer:?}")]
    IncompatibleDimensions {
        buffer: Vec<u32>,
        requested: Vec<u32>,
    },

    /// A copy must cover the buffer exactly.
    #[error("size mismatch: buffer holds {capacity} bytes, got {actual}")]
    SizeMismatch { capacity: u32, actual: usize },

    /// The buffer has never been written, or its last write failed.
    #[error("buffer is not initialized")]
    Uninitialized,

    /// A byte range falls outside the buffer.
    #[error("access at {offset}+{length} exceeds buffer capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        capacity: u32,
    },

    /// A budget string could not be parsed.
    #[error("invalid memory budget: {0}")]
    InvalidBudget(String),
}

impl RegistryError {
    /// Status reported to the caller.
    pub fn status(&self) -> ErrorStatus {
        match self {
            RegistryError::Uninitialized
            | RegistryError::OutOfMemory { .. }
            | RegistryError::OutOfBounds { .. } => ErrorStatus::GeneralFailure,
            _ => ErrorStatus::InvalidArgument,
        }
    }
}
