// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Token table with budget enforcement.
//!
//! The [`BufferRegistry`] is an arena of [`ManagedBuffer`]s indexed by
//! small integer tokens:
//!
//! 1. Token `0` is never issued.
//! 2. Released tokens go on a LIFO free list and are reused before the
//!    table grows, so the token space stays dense.
//! 3. The total capacity of live buffers never exceeds the budget.
//!
//! # Thread Safety
//! One registry-wide lock serializes allocation, lookup and release.
//! Buffer state has its own per-buffer lock (see [`ManagedBuffer`]).

use crate::{BufferDescriptor, ManagedBuffer, MemoryBudget, RegistryError, RegistryStats};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct TokenTable {
    /// Slot 0 is permanently empty.
    slots: Vec<Option<Arc<ManagedBuffer>>>,
    free: Vec<u32>,
}

/// Shared registry state; token handles keep it alive.
struct RegistryInner {
    budget: MemoryBudget,
    allocated_bytes: AtomicUsize,
    table: Mutex<TokenTable>,
    stats: Mutex<RegistryStats>,
}

impl RegistryInner {
    fn table(&self) -> MutexGuard<'_, TokenTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stats(&self) -> MutexGuard<'_, RegistryStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called when the last [`TokenHandle`] for `token` drops.
    fn release(&self, token: u32) {
        let mut table = self.table();
        let Some(buffer) = table.slots.get_mut(token as usize).and_then(Option::take) else {
            tracing::warn!(token, "release of unknown token");
            return;
        };
        table.free.push(token);
        drop(table);

        self.allocated_bytes
            .fetch_sub(buffer.capacity() as usize, Ordering::AcqRel);
        self.stats().record_release();
        tracing::debug!(token, capacity = buffer.capacity(), "buffer released");
    }
}

/// The token-addressed buffer store. Cloning shares the same registry.
///
/// # Example
/// ```
/// use buffer_registry::{BufferDescriptor, BufferRegistry, BufferRole, MemoryBudget, ModelId};
/// use nn_core::OperandType;
///
/// let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
/// let handle = registry
///     .allocate(BufferDescriptor {
///         capacity: 16,
///         operand_type: OperandType::TensorFloat32,
///         dimensions: vec![4],
///         roles: [BufferRole::input(ModelId::new(1), 0)].into_iter().collect(),
///     })
///     .unwrap();
/// assert_eq!(registry.get(handle.token()).unwrap().capacity(), 16);
///
/// let token = handle.token();
/// drop(handle);
/// assert!(registry.get(token).is_err());
/// ```
#[derive(Clone)]
pub struct BufferRegistry {
    inner: Arc<RegistryInner>,
}

impl BufferRegistry {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                budget,
                allocated_bytes: AtomicUsize::new(0),
                table: Mutex::new(TokenTable {
                    slots: vec![None],
                    free: Vec::new(),
                }),
                stats: Mutex::new(RegistryStats::default()),
            }),
        }
    }

    /// Creates a buffer and returns the handle that owns its token.
    ///
    /// Rejects zero capacity, extension element types and empty role
    /// sets; returns `OutOfMemory` when the budget would be exceeded.
    pub fn allocate(&self, desc: BufferDescriptor) -> Result<TokenHandle, RegistryError> {
        if desc.capacity == 0 {
            return Err(RegistryError::Unsupported("zero capacity".into()));
        }
        if desc.operand_type.is_extension() {
            return Err(RegistryError::Unsupported(format!(
                "extension type {}",
                desc.operand_type
            )));
        }
        if desc.roles.is_empty() {
            return Err(RegistryError::Unsupported("no roles".into()));
        }

        let size = desc.capacity as usize;
        let budget = self.inner.budget.as_bytes();
        let mut table = self.inner.table();

        let current = self.inner.allocated_bytes.load(Ordering::Acquire);
        if current.saturating_add(size) > budget {
            drop(table);
            self.inner.stats().record_oom();
            return Err(RegistryError::OutOfMemory {
                requested: size,
                available: budget.saturating_sub(current),
                budget,
            });
        }

        let buffer = Arc::new(ManagedBuffer::new(desc));
        let (token, reused) = match table.free.pop() {
            Some(token) => {
                table.slots[token as usize] = Some(buffer);
                (token, true)
            }
            None => {
                table.slots.push(Some(buffer));
                ((table.slots.len() - 1) as u32, false)
            }
        };
        let live = self.inner.allocated_bytes.fetch_add(size, Ordering::AcqRel) + size;
        drop(table);

        self.inner.stats().record_allocation(reused, live);
        tracing::info!(token, capacity = size, reused, "buffer allocated");

        Ok(TokenHandle {
            lease: Arc::new(TokenLease {
                token,
                registry: Arc::clone(&self.inner),
            }),
        })
    }

    /// Looks up a live buffer.
    pub fn get(&self, token: u32) -> Result<Arc<ManagedBuffer>, RegistryError> {
        self.inner
            .table()
            .slots
            .get(token as usize)
            .and_then(Clone::clone)
            .ok_or(RegistryError::UnknownToken(token))
    }

    /// Bytes held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.allocated_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Returns a snapshot of registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.inner.stats().clone()
    }
}

impl std::fmt::Debug for BufferRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferRegistry")
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

struct TokenLease {
    token: u32,
    registry: Arc<RegistryInner>,
}

impl Drop for TokenLease {
    fn drop(&mut self) {
        self.registry.release(self.token);
    }
}

/// Reference-counted ownership of one token.
///
/// Clones share the token; the buffer is freed and the token recycled
/// when the last clone drops.
#[derive(Clone)]
pub struct TokenHandle {
    lease: Arc<TokenLease>,
}

impl TokenHandle {
    pub fn token(&self) -> u32 {
        self.lease.token
    }

    /// The buffer this handle keeps alive.
    pub fn buffer(&self) -> Result<Arc<ManagedBuffer>, RegistryError> {
        self.lease
            .registry
            .table()
            .slots
            .get(self.lease.token as usize)
            .and_then(Clone::clone)
            .ok_or(RegistryError::UnknownToken(self.lease.token))
    }
}

impl std::fmt::Debug for TokenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenHandle")
            .field("token", &self.lease.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferRole, ModelId};
    use nn_core::OperandType;

    fn desc(capacity: u32) -> BufferDescriptor {
        BufferDescriptor {
            capacity,
            operand_type: OperandType::TensorFloat32,
            dimensions: vec![capacity / 4],
            roles: [BufferRole::input(ModelId::new(1), 0)].into_iter().collect(),
        }
    }

    #[test]
    fn test_allocate_and_release() {
        let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
        let handle = registry.allocate(desc(16)).unwrap();
        let token = handle.token();
        assert_ne!(token, 0);
        assert_eq!(registry.get(token).unwrap().capacity(), 16);
        assert_eq!(registry.allocated_bytes(), 16);

        drop(handle);
        assert_eq!(registry.get(token).unwrap_err(), RegistryError::UnknownToken(token));
        assert_eq!(registry.allocated_bytes(), 0);
    }

    #[test]
    fn test_fresh_buffer_is_uninitialized() {
        let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
        let handle = registry.allocate(desc(16)).unwrap();
        let buffer = handle.buffer().unwrap();
        let mut out = [0u8; 16];
        assert!(buffer.copy_to(&mut out).is_err());
        buffer.copy_from(&[1u8; 16], &[]).unwrap();
        assert!(buffer.copy_to(&mut out).is_ok());
    }

    #[test]
    fn test_token_zero_unknown() {
        let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
        assert!(registry.get(0).is_err());
    }

    #[test]
    fn test_tokens_are_reused() {
        let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
        let handles: Vec<_> = (0..3).map(|_| registry.allocate(desc(8)).unwrap()).collect();
        let tokens: Vec<u32> = handles.iter().map(TokenHandle::token).collect();
        assert_eq!(tokens, vec![1, 2, 3]);
        drop(handles);

        let next = registry.allocate(desc(8)).unwrap();
        assert!(tokens.contains(&next.token()));
        assert_ne!(next.token(), 4);
        // LIFO: the last released token comes back first.
        assert_eq!(next.token(), 3);
        assert_eq!(registry.stats().token_reuses, 1);
    }

    #[test]
    fn test_clone_keeps_buffer_alive() {
        let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
        let handle = registry.allocate(desc(8)).unwrap();
        let clone = handle.clone();
        let token = handle.token();
        drop(handle);
        assert!(registry.get(token).is_ok());
        drop(clone);
        assert!(registry.get(token).is_err());
    }

    #[test]
    fn test_budget_enforced() {
        let registry = BufferRegistry::new(MemoryBudget::from_bytes(32));
        let _a = registry.allocate(desc(16)).unwrap();
        let _b = registry.allocate(desc(16)).unwrap();
        assert!(matches!(
            registry.allocate(desc(4)),
            Err(RegistryError::OutOfMemory { available: 0, .. })
        ));
        assert_eq!(registry.stats().oom_count, 1);
    }

    #[test]
    fn test_rejected_descriptors() {
        let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
        assert!(registry.allocate(desc(0)).is_err());

        let mut ext = desc(8);
        ext.operand_type = OperandType::extension(1, 0);
        assert!(registry.allocate(ext).is_err());

        let mut no_roles = desc(8);
        no_roles.roles.clear();
        assert!(registry.allocate(no_roles).is_err());
    }

    #[test]
    fn test_available_bytes() {
        let registry = BufferRegistry::new(MemoryBudget::from_bytes(32));
        assert_eq!(registry.available_bytes(), 32);
        let a = registry.allocate(desc(16)).unwrap();
        assert_eq!(registry.available_bytes(), 16);
        drop(a);
        assert_eq!(registry.available_bytes(), 32);

        let unbounded = BufferRegistry::new(MemoryBudget::unlimited());
        let _big = unbounded.allocate(desc(1 << 20)).unwrap();
        assert_eq!(unbounded.available_bytes(), usize::MAX - (1 << 20));
    }

    #[test]
    fn test_stats_peak() {
        let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
        let a = registry.allocate(desc(100)).unwrap();
        let b = registry.allocate(desc(200)).unwrap();
        drop(a);
        drop(b);
        let stats = registry.stats();
        assert_eq!(stats.peak_allocated_bytes, 300);
        assert_eq!(stats.releases, 2);
    }
}
