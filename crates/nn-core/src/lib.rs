// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # nn-core
//!
//! Shared vocabulary for the graph execution service.
//!
//! This crate provides:
//! - [`OperandType`] and [`Revision`]: operand element types and the
//!   interface revisions that gate them.
//! - Dimension algebra: [`combine_dimensions`], [`byte_size`] and friends.
//!   A `0` axis means "unspecified"; an empty list is an unknown rank.
//! - [`ErrorStatus`], [`OutputShape`], [`Timing`]: what every call
//!   ultimately reports to its caller.
//! - [`SharedMemory`]: caller-owned byte regions bound into requests.
//! - [`ExtensionTypeRegistry`]: the lookup hook for vendor operand types.
//!
//! Nothing here depends on the rest of the workspace.

mod dims;
mod error;
mod extension;
mod memory;
mod operand_type;
mod status;

pub use dims::{
    byte_size, combine_dimensions, element_count, format_dimensions, is_fully_specified,
    specified_size_overflows,
};
pub use error::CoreError;
pub use extension::{ExtensionTypeInfo, ExtensionTypeRegistry, NoExtensions, StaticExtensionRegistry};
pub use memory::SharedMemory;
pub use operand_type::{OperandType, Revision, EXTENSION_TYPE_LOW_BITS};
pub use status::{ErrorStatus, OutputShape, Timing};
