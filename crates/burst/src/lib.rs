// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # burst
//!
//! Repeated executions against one prepared model without resending pool
//! descriptors.
//!
//! A burst channel is a pair of bounded packet queues plus a server thread.
//! The client names memory by slot number; the server caches the pool
//! behind each slot and asks the client only for slots it has not seen.
//!
//! ```text
//!  BurstController ──request packet──► [request queue] ──► BurstServer thread
//!        ▲   slot table ◄──── fetch(slots) ────────────────────┘   │
//!        └──────────────── [result queue] ◄── result packet ───────┘
//! ```
//!
//! # Example
//! ```no_run
//! use burst::BurstExt;
//! use runtime::{BurstConfig, PreparedModel};
//! use std::sync::Arc;
//!
//! # fn example(prepared: Arc<PreparedModel>, request: model_ir::Request) -> Result<(), burst::BurstError> {
//! let burst = prepared.configure_burst(&BurstConfig::default())?;
//! for _ in 0..10 {
//!     let outcome = burst.compute(&request, false)?;
//!     println!("{:?}", outcome.output_shapes);
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
mod client;
mod error;
mod server;
pub mod wire;

pub use channel::{packet_channel, PacketReceiver, PacketSender};
pub use client::{BurstController, BurstExt, MemoryKey};
pub use error::{BurstError, DecodeError};
pub use server::{BurstServer, SlotFetcher};
