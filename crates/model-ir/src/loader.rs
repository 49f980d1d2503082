// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model loading from a manifest directory.
//!
//! A model directory contains:
//! - `model.json`: the serde form of [`Model`] (subgraphs plus the
//!   embedded-constant blob).
//! - `pool_0.bin`, `pool_1.bin`, …: one file per constant pool, numbered
//!   consecutively from zero.
//!
//! Pool files are memory-mapped, not read, so large constant tables cost
//! no heap.

use crate::{ConstantPool, Loaded, Model, ModelError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default manifest filename.
const MANIFEST_FILE: &str = "model.json";

fn pool_file(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("pool_{index}.bin"))
}

/// Loads and stores model directories.
pub struct ModelLoader;

impl ModelLoader {
    /// Loads `model.json` and maps every `pool_<n>.bin` that follows it.
    ///
    /// The result is unvalidated; call [`Model::validate`] next.
    pub fn load(model_dir: &Path) -> Result<Model<Loaded>, ModelError> {
        let json = std::fs::read_to_string(model_dir.join(MANIFEST_FILE))?;
        let model = Model::from_json(&json)?;

        let mut pools = Vec::new();
        loop {
            let path = pool_file(model_dir, pools.len());
            if !path.exists() {
                break;
            }
            pools.push(Self::map_pool(&path)?);
        }

        tracing::debug!(
            dir = %model_dir.display(),
            pools = pools.len(),
            operations = model.num_operations(),
            "model loaded"
        );
        Ok(model.with_pools(pools))
    }

    /// Writes `model` (and its pools) into `model_dir`, creating it if needed.
    pub fn save(model: &Model<Loaded>, model_dir: &Path) -> Result<(), ModelError> {
        std::fs::create_dir_all(model_dir)?;
        std::fs::write(model_dir.join(MANIFEST_FILE), model.to_json()?)?;
        for (i, pool) in model.pools.iter().enumerate() {
            std::fs::write(pool_file(model_dir, i), pool.as_slice())?;
        }
        Ok(())
    }

    fn map_pool(path: &Path) -> Result<ConstantPool, ModelError> {
        let map_err = |source| ModelError::PoolMap {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::open(path).map_err(map_err)?;
        let len = file.metadata().map_err(map_err)?.len();
        // Zero-length files cannot be mapped on every platform.
        if len == 0 {
            return Ok(ConstantPool::from(Vec::new()));
        }
        // SAFETY: pool files are treated as read-only for the model's
        // lifetime; the loader never writes through the mapping.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(map_err)?;
        Ok(ConstantPool::Mapped(Arc::new(mmap)))
    }
}
