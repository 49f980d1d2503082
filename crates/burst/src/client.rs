// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The calling side of a burst channel.
//!
//! [`BurstController`] assigns each distinct memory pool a small integer
//! slot the first time it is used and sends only slot numbers afterwards.
//! The server asks for the pool behind an unfamiliar slot through the
//! controller's slot table.

use crate::channel::{packet_channel, PacketReceiver, PacketSender};
use crate::server::{BurstServer, SlotFetcher};
use crate::wire::{self, RequestPacket, SlotArgument};
use crate::BurstError;
use model_ir::{MemoryPool, Request, RequestArgument};
use runtime::{BurstConfig, ExecutionOutcome, PreparedModel};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identity of a pool for slot assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKey {
    Region(u64),
    Token(u32),
}

impl MemoryKey {
    pub fn of(pool: &MemoryPool) -> Self {
        match pool {
            MemoryPool::Region(region) => MemoryKey::Region(region.id()),
            MemoryPool::Token(token) => MemoryKey::Token(*token),
        }
    }
}

// ── Slot table ─────────────────────────────────────────────────────

#[derive(Default)]
struct SlotTable {
    by_key: HashMap<MemoryKey, u32>,
    pools: HashMap<u32, MemoryPool>,
    free: BTreeSet<u32>,
    next: u32,
}

impl SlotTable {
    /// Returns the slot of `pool`, assigning the smallest free one if new.
    fn slot_for(&mut self, pool: &MemoryPool) -> u32 {
        let key = MemoryKey::of(pool);
        if let Some(&slot) = self.by_key.get(&key) {
            return slot;
        }
        let slot = match self.free.pop_first() {
            Some(slot) => slot,
            None => {
                self.next += 1;
                self.next - 1
            }
        };
        self.by_key.insert(key, slot);
        self.pools.insert(slot, pool.clone());
        slot
    }

    fn release(&mut self, pool: &MemoryPool) -> Option<u32> {
        let slot = self.by_key.remove(&MemoryKey::of(pool))?;
        self.pools.remove(&slot);
        self.free.insert(slot);
        Some(slot)
    }
}

/// Slot table shared between a controller and its server's fetch path.
#[derive(Default)]
struct SharedSlots(Mutex<SlotTable>);

impl SharedSlots {
    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SlotFetcher for SharedSlots {
    fn fetch(&self, slots: &[u32]) -> Result<Vec<MemoryPool>, BurstError> {
        let table = self.lock();
        slots
            .iter()
            .map(|slot| {
                table
                    .pools
                    .get(slot)
                    .cloned()
                    .ok_or(BurstError::UnknownSlot(*slot))
            })
            .collect()
    }
}

// ── Controller ─────────────────────────────────────────────────────

/// Clears the in-flight flag when a `compute` call returns.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, BurstError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BurstError::RequestInFlight)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Client end of a burst channel bound to one prepared model.
///
/// Requests are issued one at a time; a call made while another is in
/// flight fails with [`BurstError::RequestInFlight`]. Dropping the
/// controller closes both queues and waits for the server thread.
pub struct BurstController {
    prepared: Arc<PreparedModel>,
    requests: PacketSender,
    results: PacketReceiver,
    slots: Arc<SharedSlots>,
    server: BurstServer,
    in_flight: AtomicBool,
}

impl BurstController {
    /// Creates both queues and starts the server thread.
    pub fn new(prepared: Arc<PreparedModel>, config: &BurstConfig) -> Result<Self, BurstError> {
        let (requests, server_requests) =
            packet_channel(config.request_queue_bytes, config.poll_window());
        let (server_results, results) =
            packet_channel(config.result_queue_bytes, config.poll_window());
        let slots = Arc::new(SharedSlots::default());
        let server = BurstServer::spawn(
            Arc::clone(&prepared),
            server_requests,
            server_results,
            Arc::clone(&slots) as Arc<dyn SlotFetcher>,
        )?;
        Ok(Self {
            prepared,
            requests,
            results,
            slots,
            server,
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn prepared(&self) -> &Arc<PreparedModel> {
        &self.prepared
    }

    /// Executes `request` through the channel.
    ///
    /// `Ok` carries `NoError` or `OutputInsufficientSize` with per-output
    /// shapes. Other statuses come back as [`BurstError::Remote`].
    pub fn compute(&self, request: &Request, measure: bool) -> Result<ExecutionOutcome, BurstError> {
        let _guard = InFlight::acquire(&self.in_flight)?;

        let packet = self.encode(request, measure)?;
        self.requests.send(wire::encode_request(&packet))?;
        let frame = self.results.recv()?;
        let result = wire::decode_result(&frame)?;

        tracing::debug!(model = %self.prepared.id(), status = %result.status, "burst result");
        match result.status {
            status if status.is_ok() || status == nn_core::ErrorStatus::OutputInsufficientSize => {
                Ok(ExecutionOutcome {
                    status,
                    output_shapes: result.output_shapes,
                    timing: result.timing,
                })
            }
            status => Err(BurstError::Remote(status)),
        }
    }

    /// Like [`compute`](Self::compute), executing directly on the calling
    /// thread when the channel itself fails.
    pub fn compute_with_fallback(
        &self,
        request: &Request,
        measure: bool,
    ) -> Result<ExecutionOutcome, BurstError> {
        match self.compute(request, measure) {
            Err(e) if e.is_transport() => {
                tracing::warn!(error = %e, "burst channel failed, executing directly");
                Ok(self.prepared.execute(request, measure, None, None)?)
            }
            other => other,
        }
    }

    /// Forgets the slot of `pool` on both ends. Returns the freed slot.
    pub fn free_memory(&self, pool: &MemoryPool) -> Option<u32> {
        let slot = self.slots.lock().release(pool)?;
        self.server.evict(slot);
        tracing::debug!(slot, "burst slot freed");
        Some(slot)
    }

    /// Number of pools currently holding a slot.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().by_key.len()
    }

    /// Whether the server thread is still serving requests.
    pub fn is_alive(&self) -> bool {
        self.server.is_running() && self.requests.is_open()
    }

    fn encode(&self, request: &Request, measure: bool) -> Result<RequestPacket, BurstError> {
        let pool_slots: Vec<u32> = {
            let mut table = self.slots.lock();
            request.pools.iter().map(|p| table.slot_for(p)).collect()
        };

        let argument = |arg: &RequestArgument| -> Result<Option<SlotArgument>, BurstError> {
            if arg.has_no_value {
                return Ok(None);
            }
            let pool_index = arg.location.pool_index;
            let slot = pool_slots.get(pool_index as usize).copied().ok_or_else(|| {
                BurstError::InvalidRequest(format!(
                    "argument references pool {pool_index} of {}",
                    pool_slots.len()
                ))
            })?;
            Ok(Some(SlotArgument {
                slot,
                offset: arg.location.offset,
                length: arg.location.length,
                dimensions: arg.dimensions.clone(),
            }))
        };

        let mut slots = Vec::with_capacity(pool_slots.len());
        for &slot in &pool_slots {
            if !slots.contains(&slot) {
                slots.push(slot);
            }
        }

        Ok(RequestPacket {
            inputs: request.inputs.iter().map(&argument).collect::<Result<_, _>>()?,
            outputs: request.outputs.iter().map(&argument).collect::<Result<_, _>>()?,
            slots,
            measure_timing: measure,
        })
    }
}

impl Drop for BurstController {
    fn drop(&mut self) {
        self.requests.invalidate();
        self.results.invalidate();
        self.server.join();
        tracing::info!(model = %self.prepared.id(), "burst channel closed");
    }
}

impl std::fmt::Debug for BurstController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurstController")
            .field("model", &self.prepared.id())
            .field("slots", &self.slot_count())
            .finish()
    }
}

/// Opens burst channels on a prepared model.
pub trait BurstExt {
    fn configure_burst(&self, config: &BurstConfig) -> Result<BurstController, BurstError>;
}

impl BurstExt for Arc<PreparedModel> {
    fn configure_burst(&self, config: &BurstConfig) -> Result<BurstController, BurstError> {
        tracing::info!(
            model = %self.id(),
            request_queue = config.request_queue_bytes,
            result_queue = config.result_queue_bytes,
            "configuring burst channel"
        );
        BurstController::new(Arc::clone(self), config)
    }
}
