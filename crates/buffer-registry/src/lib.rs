// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # buffer-registry
//!
//! Long-lived, driver-owned buffers that requests reference by token
//! instead of by memory region.
//!
//! # Key Components
//!
//! - [`BufferRegistry`]: the token table: dense token allocation with a
//!   free list, budget enforcement and statistics.
//! - [`TokenHandle`]: RAII ownership of a token. When the last clone is
//!   dropped, the buffer is freed and the token returns to the free list.
//! - [`ManagedBuffer`]: the buffer: fixed capacity, type and role set,
//!   plus lock-protected bytes, committed shape and initialized flag.
//! - [`MemoryBudget`]: the byte ceiling (`"64M"`, `"1G"`, …).
//! - [`RegistryStats`]: allocation, release, reuse and OOM counters.
//!
//! # Ownership Model
//!
//! ```text
//! BufferRegistry::allocate(desc)
//!       │
//!       ▼
//!   TokenHandle ◄── clone ──► TokenHandle
//!       │   (shared Arc<TokenLease>)
//!       │  last drop
//!       ▼
//!   RegistryInner::release(token) ──► free list
//! ```

mod budget;
mod buffer;
mod error;
mod registry;
mod stats;

pub use budget::MemoryBudget;
pub use buffer::{BufferDescriptor, BufferRole, IoType, ManagedBuffer, ModelId};
pub use error::RegistryError;
pub use registry::{BufferRegistry, TokenHandle};
pub use stats::RegistryStats;
