// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The execution side of a burst channel.
//!
//! A server thread owns the request receiver and the result sender. For
//! each packet it resolves the listed slots against its cache, fetching
//! misses through a [`SlotFetcher`], rebuilds a [`Request`] whose pool `i`
//! is slot `slots[i]`, and executes it against one prepared model.
//!
//! ```text
//!   request queue ─► decode ─► resolve slots ─► PreparedModel::execute ─► encode ─► result queue
//!                                  │ miss
//!                                  ▼
//!                             SlotFetcher
//! ```
//!
//! A malformed request is answered with `InvalidArgument`. A packet whose
//! length prefix disagrees with its frame invalidates both queues and stops
//! the server.

use crate::channel::{PacketReceiver, PacketSender};
use crate::wire::{self, RequestPacket, ResultPacket};
use crate::BurstError;
use model_ir::{MemoryPool, Request, RequestArgument};
use nn_core::ErrorStatus;
use runtime::PreparedModel;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Resolves slots the server has not seen yet.
pub trait SlotFetcher: Send + Sync {
    /// Returns one pool per slot, in the order given.
    fn fetch(&self, slots: &[u32]) -> Result<Vec<MemoryPool>, BurstError>;
}

type SlotCache = Arc<Mutex<HashMap<u32, MemoryPool>>>;

fn lock(cache: &SlotCache) -> MutexGuard<'_, HashMap<u32, MemoryPool>> {
    cache.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to a running server thread.
pub struct BurstServer {
    cache: SlotCache,
    thread: Option<JoinHandle<()>>,
}

impl BurstServer {
    /// Starts serving `prepared` on a dedicated thread.
    ///
    /// The thread runs until either queue is closed.
    pub fn spawn(
        prepared: Arc<PreparedModel>,
        requests: PacketReceiver,
        results: PacketSender,
        fetcher: Arc<dyn SlotFetcher>,
    ) -> Result<Self, BurstError> {
        let cache = SlotCache::default();
        let worker = ServerLoop {
            prepared,
            requests,
            results,
            fetcher,
            cache: Arc::clone(&cache),
        };
        let thread = thread::Builder::new()
            .name("burst-server".to_string())
            .spawn(move || worker.run())?;
        Ok(Self {
            cache,
            thread: Some(thread),
        })
    }

    /// Drops the cached mapping for `slot`. Returns whether it was cached.
    pub fn evict(&self, slot: u32) -> bool {
        lock(&self.cache).remove(&slot).is_some()
    }

    /// Number of slots currently cached.
    pub fn cached_slots(&self) -> usize {
        lock(&self.cache).len()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Waits for the server thread to exit. Close a queue first.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("burst server thread panicked");
            }
        }
    }
}

struct ServerLoop {
    prepared: Arc<PreparedModel>,
    requests: PacketReceiver,
    results: PacketSender,
    fetcher: Arc<dyn SlotFetcher>,
    cache: SlotCache,
}

impl ServerLoop {
    fn run(self) {
        let model = self.prepared.id();
        tracing::info!(%model, "burst server started");
        let mut served = 0u64;

        while let Ok(frame) = self.requests.recv() {
            let result = match wire::decode_request(&frame) {
                Ok(packet) => self.serve(packet),
                Err(e) if e.is_corrupt() => {
                    tracing::warn!(%model, error = %e, "corrupt burst packet, invalidating channel");
                    self.requests.invalidate();
                    self.results.invalidate();
                    break;
                }
                Err(e) => {
                    tracing::warn!(%model, error = %e, "rejecting malformed burst request");
                    ResultPacket::failure(ErrorStatus::InvalidArgument)
                }
            };
            served += 1;
            if !self.reply(&result) {
                break;
            }
        }

        tracing::info!(%model, served, "burst server stopped");
    }

    /// Sends `result`, falling back to a bare status if it does not fit.
    /// Returns `false` once the result queue is gone.
    fn reply(&self, result: &ResultPacket) -> bool {
        match self.results.send(wire::encode_result(result)) {
            Ok(()) => true,
            Err(BurstError::QueueFull { len, capacity, .. }) => {
                tracing::warn!(len, capacity, "burst result does not fit the result queue");
                self.results
                    .send(wire::encode_result(&ResultPacket::failure(
                        ErrorStatus::GeneralFailure,
                    )))
                    .is_ok()
            }
            Err(_) => false,
        }
    }

    fn serve(&self, packet: RequestPacket) -> ResultPacket {
        match self.execute(packet) {
            Ok(outcome) => ResultPacket {
                status: outcome.status,
                output_shapes: outcome.output_shapes,
                timing: outcome.timing,
            },
            Err(e) => {
                tracing::debug!(error = %e, "burst request failed");
                ResultPacket::failure(e.status())
            }
        }
    }

    fn execute(&self, packet: RequestPacket) -> Result<runtime::ExecutionOutcome, BurstError> {
        let pools = self.resolve(&packet.slots)?;
        let measure = packet.measure_timing;
        let request = rebuild_request(packet, pools);
        Ok(self.prepared.execute(&request, measure, None, None)?)
    }

    /// Maps every slot to a pool, fetching the ones not cached.
    fn resolve(&self, slots: &[u32]) -> Result<Vec<MemoryPool>, BurstError> {
        let missing: Vec<u32> = {
            let cache = lock(&self.cache);
            slots
                .iter()
                .copied()
                .filter(|slot| !cache.contains_key(slot))
                .collect()
        };

        if !missing.is_empty() {
            tracing::debug!(?missing, "fetching burst slots");
            let fetched = self.fetcher.fetch(&missing)?;
            if fetched.len() != missing.len() {
                return Err(BurstError::InvalidRequest(format!(
                    "fetched {} pools for {} slots",
                    fetched.len(),
                    missing.len()
                )));
            }
            lock(&self.cache).extend(missing.into_iter().zip(fetched));
        }

        let cache = lock(&self.cache);
        slots
            .iter()
            .map(|slot| cache.get(slot).cloned().ok_or(BurstError::UnknownSlot(*slot)))
            .collect()
    }
}

/// Rebuilds a request whose pool `i` is the pool of `packet.slots[i]`.
fn rebuild_request(packet: RequestPacket, pools: Vec<MemoryPool>) -> Request {
    let slots = packet.slots;
    let argument = |arg: Option<wire::SlotArgument>| match arg {
        None => RequestArgument::no_value(),
        Some(arg) => {
            // Decoding guarantees every argument slot is listed.
            let pool_index = slots.iter().position(|&s| s == arg.slot).unwrap_or(0) as u32;
            RequestArgument::pool(pool_index, arg.offset, arg.length)
                .with_dimensions(arg.dimensions)
        }
    };
    let inputs = packet.inputs.into_iter().map(&argument).collect();
    let outputs = packet.outputs.into_iter().map(&argument).collect();
    Request::new(inputs, outputs, pools)
}
