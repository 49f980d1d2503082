// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution requests: argument bindings plus the memory pools they index.

use crate::DataLocation;
use nn_core::SharedMemory;

/// A memory pool bound into a request.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryPool {
    /// A caller-owned region.
    Region(SharedMemory),
    /// A driver-managed buffer named by its registry token.
    Token(u32),
}

impl MemoryPool {
    pub fn token(&self) -> Option<u32> {
        match self {
            MemoryPool::Token(t) => Some(*t),
            MemoryPool::Region(_) => None,
        }
    }
}

/// Binds one main-subgraph input or output to pool bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestArgument {
    /// An omitted optional input or output.
    pub has_no_value: bool,
    /// `pool_index` indexes [`Request::pools`]. Offset and length of zero
    /// mean "the whole pool".
    pub location: DataLocation,
    /// Overrides unspecified axes of the declared operand shape.
    pub dimensions: Vec<u32>,
}

impl RequestArgument {
    pub fn no_value() -> Self {
        Self {
            has_no_value: true,
            ..Self::default()
        }
    }

    /// Bytes `[offset, offset + length)` of pool `pool_index`.
    pub fn pool(pool_index: u32, offset: u32, length: u32) -> Self {
        Self {
            location: DataLocation::new(pool_index, offset, length),
            ..Self::default()
        }
    }

    /// The whole of pool `pool_index`.
    pub fn whole_pool(pool_index: u32) -> Self {
        Self::pool(pool_index, 0, 0)
    }

    pub fn with_dimensions(mut self, dimensions: Vec<u32>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Whether the location denotes the entire pool.
    pub fn covers_whole_pool(&self) -> bool {
        self.location.offset == 0 && self.location.length == 0
    }
}

/// One execution's inputs, outputs and pools.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub inputs: Vec<RequestArgument>,
    pub outputs: Vec<RequestArgument>,
    pub pools: Vec<MemoryPool>,
}

impl Request {
    pub fn new(
        inputs: Vec<RequestArgument>,
        outputs: Vec<RequestArgument>,
        pools: Vec<MemoryPool>,
    ) -> Self {
        Self {
            inputs,
            outputs,
            pools,
        }
    }

    /// Registry tokens referenced by the pool list, in pool order.
    pub fn tokens(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.token().map(|t| (i, t)))
    }
}
