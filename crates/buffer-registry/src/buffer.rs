// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Registry-owned buffers and the roles they may play.
//!
//! A [`ManagedBuffer`] has a fixed capacity, element type and allocation
//! shape, plus a closed set of [`BufferRole`]s naming every (model,
//! direction, argument index) it may be bound to. Its mutable state (bytes,
//! committed dimensions, initialized flag) sits behind a per-buffer lock.
//!
//! ```text
//!                 copy_from / execution output ok
//! Uninitialized ───────────────────────────────────► Initialized
//!       ▲                                                 │
//!       └──────────── failed copy_from / execution ───────┘
//! ```

use crate::RegistryError;
use model_ir::Request;
use nn_core::{combine_dimensions, is_fully_specified, OperandType};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Identity of one prepared model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelId(u64);

impl ModelId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Direction of a request argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IoType {
    Input,
    Output,
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoType::Input => "input",
            IoType::Output => "output",
        })
    }
}

/// One binding a buffer is permitted to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferRole {
    pub model: ModelId,
    pub io: IoType,
    pub index: usize,
}

impl BufferRole {
    pub fn input(model: ModelId, index: usize) -> Self {
        Self {
            model,
            io: IoType::Input,
            index,
        }
    }

    pub fn output(model: ModelId, index: usize) -> Self {
        Self {
            model,
            io: IoType::Output,
            index,
        }
    }
}

/// What to allocate.
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub capacity: u32,
    pub operand_type: OperandType,
    /// Allocation-time shape; may contain unspecified axes.
    pub dimensions: Vec<u32>,
    pub roles: BTreeSet<BufferRole>,
}

#[derive(Debug)]
struct BufferState {
    data: Vec<u8>,
    dimensions: Vec<u32>,
    initialized: bool,
}

/// A long-lived buffer addressed by a registry token.
pub struct ManagedBuffer {
    capacity: u32,
    operand_type: OperandType,
    initial_dimensions: Vec<u32>,
    roles: BTreeSet<BufferRole>,
    state: Mutex<BufferState>,
}

impl ManagedBuffer {
    pub(crate) fn new(desc: BufferDescriptor) -> Self {
        Self {
            capacity: desc.capacity,
            operand_type: desc.operand_type,
            state: Mutex::new(BufferState {
                data: vec![0; desc.capacity as usize],
                dimensions: desc.dimensions.clone(),
                initialized: false,
            }),
            initial_dimensions: desc.dimensions,
            roles: desc.roles,
        }
    }

    // Poisoning only means another thread panicked mid-update; the state
    // itself is still a valid value.
    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn operand_type(&self) -> OperandType {
        self.operand_type
    }

    pub fn initial_dimensions(&self) -> &[u32] {
        &self.initial_dimensions
    }

    pub fn roles(&self) -> &BTreeSet<BufferRole> {
        &self.roles
    }

    /// Currently committed dimensions.
    pub fn dimensions(&self) -> Vec<u32> {
        self.state().dimensions.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.state().initialized = initialized;
    }

    /// Checks every argument of `request` that points at pool `pool_index`.
    ///
    /// Inputs need an input role, an initialized buffer and dimensions
    /// that merge with the committed shape. Outputs need an output role,
    /// dimensions that merge with the allocation shape, and must be the
    /// buffer's only binding in the request.
    pub fn validate_as_request_argument(
        &self,
        pool_index: u32,
        request: &Request,
        model: ModelId,
    ) -> Result<(), RegistryError> {
        let state = self.state();
        let bound_here = |arg: &&model_ir::RequestArgument| {
            !arg.has_no_value && arg.location.pool_index == pool_index
        };

        let mut used = false;
        for (index, arg) in request.inputs.iter().enumerate().filter(|(_, a)| bound_here(a)) {
            if !self.roles.contains(&BufferRole::input(model, index)) {
                return Err(RegistryError::InvalidRole {
                    io: IoType::Input,
                    index,
                });
            }
            if !state.initialized {
                return Err(RegistryError::Uninitialized);
            }
            if combine_dimensions(&state.dimensions, &arg.dimensions).is_none() {
                return Err(RegistryError::IncompatibleDimensions {
                    buffer: state.dimensions.clone(),
                    requested: arg.dimensions.clone(),
                });
            }
            used = true;
        }
        for (index, arg) in request.outputs.iter().enumerate().filter(|(_, a)| bound_here(a)) {
            if used {
                return Err(RegistryError::AliasedOutput);
            }
            if !self.roles.contains(&BufferRole::output(model, index)) {
                return Err(RegistryError::InvalidRole {
                    io: IoType::Output,
                    index,
                });
            }
            if combine_dimensions(&self.initial_dimensions, &arg.dimensions).is_none() {
                return Err(RegistryError::IncompatibleDimensions {
                    buffer: self.initial_dimensions.clone(),
                    requested: arg.dimensions.clone(),
                });
            }
            used = true;
        }
        Ok(())
    }

    /// Checks a client copy of `src_size` bytes with shape `dimensions`.
    pub fn validate_copy_in(&self, dimensions: &[u32], src_size: usize) -> Result<(), RegistryError> {
        if src_size != self.capacity as usize {
            return Err(RegistryError::SizeMismatch {
                capacity: self.capacity,
                actual: src_size,
            });
        }
        let incompatible = || RegistryError::IncompatibleDimensions {
            buffer: self.initial_dimensions.clone(),
            requested: dimensions.to_vec(),
        };
        if self.operand_type.is_scalar() {
            return if dimensions.is_empty() {
                Ok(())
            } else {
                Err(incompatible())
            };
        }
        if dimensions.is_empty() {
            if !is_fully_specified(true, &self.initial_dimensions) {
                return Err(incompatible());
            }
            return Ok(());
        }
        if combine_dimensions(&self.initial_dimensions, dimensions).is_none()
            || !is_fully_specified(true, dimensions)
        {
            return Err(incompatible());
        }
        Ok(())
    }

    /// Checks a client read into `dst_size` bytes.
    pub fn validate_copy_out(&self, dst_size: usize) -> Result<(), RegistryError> {
        if dst_size != self.capacity as usize {
            return Err(RegistryError::SizeMismatch {
                capacity: self.capacity,
                actual: dst_size,
            });
        }
        if !self.is_initialized() {
            return Err(RegistryError::Uninitialized);
        }
        Ok(())
    }

    /// Merges `dimensions` with the allocation shape and commits the result.
    /// The committed shape is unchanged on failure.
    pub fn update_dimensions(&self, dimensions: &[u32]) -> Result<(), RegistryError> {
        let merged = combine_dimensions(&self.initial_dimensions, dimensions).ok_or_else(|| {
            RegistryError::IncompatibleDimensions {
                buffer: self.initial_dimensions.clone(),
                requested: dimensions.to_vec(),
            }
        })?;
        self.state().dimensions = merged;
        Ok(())
    }

    /// Client copy-in. On success the buffer holds `src`, commits the
    /// shape and becomes initialized; any failure leaves it uninitialized.
    pub fn copy_from(&self, src: &[u8], dimensions: &[u32]) -> Result<(), RegistryError> {
        let result = self.validate_copy_in(dimensions, src.len()).and_then(|()| {
            let merged = combine_dimensions(&self.initial_dimensions, dimensions).ok_or_else(|| {
                RegistryError::IncompatibleDimensions {
                    buffer: self.initial_dimensions.clone(),
                    requested: dimensions.to_vec(),
                }
            })?;
            let mut state = self.state();
            state.data.copy_from_slice(src);
            state.dimensions = merged;
            state.initialized = true;
            Ok(())
        });
        if result.is_err() {
            self.set_initialized(false);
        }
        result
    }

    /// Client copy-out of the whole buffer.
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<(), RegistryError> {
        self.validate_copy_out(dst.len())?;
        dst.copy_from_slice(&self.state().data);
        Ok(())
    }

    /// Reads `length` bytes at `offset`.
    pub fn read_bytes(&self, offset: usize, length: usize) -> Result<Vec<u8>, RegistryError> {
        let state = self.state();
        let end = self.checked_end(offset, length)?;
        Ok(state.data[offset..end].to_vec())
    }

    /// Writes `data` at `offset`. Does not touch the initialized flag.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<(), RegistryError> {
        let end = self.checked_end(offset, data.len())?;
        self.state().data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn checked_end(&self, offset: usize, length: usize) -> Result<usize, RegistryError> {
        offset
            .checked_add(length)
            .filter(|&end| end <= self.capacity as usize)
            .ok_or(RegistryError::OutOfBounds {
                offset,
                length,
                capacity: self.capacity,
            })
    }
}

impl fmt::Debug for ManagedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedBuffer")
            .field("capacity", &self.capacity)
            .field("operand_type", &self.operand_type)
            .field("dimensions", &self.dimensions())
            .field("initialized", &self.is_initialized())
            .field("roles", &self.roles.len())
            .finish()
    }
}
