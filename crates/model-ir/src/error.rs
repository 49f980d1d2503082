// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for model loading and IR construction.

use crate::validate::ValidationError;
use std::path::PathBuf;

/// Errors that can occur when working with model representations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A model file could not be read or written.
    #[error("model I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The model JSON is malformed.
    #[error("failed to parse model: {0}")]
    Json(#[from] serde_json::Error),

    /// A constant pool file could not be memory-mapped.
    #[error("failed to map constant pool '{}': {source}", path.display())]
    PoolMap {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The model was rejected by graph validation.
    #[error("invalid model: {0}")]
    Validation(#[from] ValidationError),
}
