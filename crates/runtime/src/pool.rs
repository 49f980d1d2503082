// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Resolution of request pools to addressable memory.
//!
//! A request names its pools either as caller-owned regions or as registry
//! tokens. Before execution every pool is resolved to a [`MappedPool`]:
//!
//! ```text
//! MemoryPool::Region(mem) ──► SharedMemory     ─┐
//!                                               ├─► Arc<dyn MappedPool>
//! MemoryPool::Token(t)    ──► Arc<ManagedBuffer> ┘   (via BufferRegistry)
//! ```

use crate::RuntimeError;
use buffer_registry::{BufferRegistry, ManagedBuffer};
use model_ir::MemoryPool;
use nn_core::SharedMemory;
use std::fmt;
use std::sync::Arc;

/// A byte-addressable region the executor stages arguments through.
pub trait MappedPool: Send + Sync + fmt::Debug {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, offset: usize, length: usize) -> Result<Vec<u8>, RuntimeError>;

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), RuntimeError>;
}

impl MappedPool for SharedMemory {
    fn len(&self) -> usize {
        SharedMemory::len(self)
    }

    fn read(&self, offset: usize, length: usize) -> Result<Vec<u8>, RuntimeError> {
        Ok(SharedMemory::read(self, offset, length)?)
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), RuntimeError> {
        Ok(SharedMemory::write(self, offset, data)?)
    }
}

impl MappedPool for ManagedBuffer {
    fn len(&self) -> usize {
        self.capacity() as usize
    }

    fn read(&self, offset: usize, length: usize) -> Result<Vec<u8>, RuntimeError> {
        Ok(self.read_bytes(offset, length)?)
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), RuntimeError> {
        Ok(self.write_bytes(offset, data)?)
    }
}

/// Maps a request pool descriptor to addressable memory.
pub trait PoolResolver: Send + Sync {
    fn resolve(&self, pool: &MemoryPool) -> Result<Arc<dyn MappedPool>, RuntimeError>;

    /// Resolves every pool of a request, in order.
    fn resolve_all(&self, pools: &[MemoryPool]) -> Result<Vec<Arc<dyn MappedPool>>, RuntimeError> {
        pools.iter().map(|p| self.resolve(p)).collect()
    }
}

/// Resolves caller-owned regions only; tokens are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegionMapper;

impl PoolResolver for RegionMapper {
    fn resolve(&self, pool: &MemoryPool) -> Result<Arc<dyn MappedPool>, RuntimeError> {
        match pool {
            MemoryPool::Region(memory) => Ok(Arc::new(memory.clone())),
            MemoryPool::Token(token) => Err(RuntimeError::InvalidArgument(format!(
                "token {token} cannot be resolved without a buffer registry"
            ))),
        }
    }
}

/// Resolves regions directly and tokens through a [`BufferRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    registry: BufferRegistry,
}

impl RegistryResolver {
    pub fn new(registry: BufferRegistry) -> Self {
        Self { registry }
    }
}

impl PoolResolver for RegistryResolver {
    fn resolve(&self, pool: &MemoryPool) -> Result<Arc<dyn MappedPool>, RuntimeError> {
        match pool {
            MemoryPool::Token(token) => {
                let buffer: Arc<dyn MappedPool> = self.registry.get(*token)?;
                Ok(buffer)
            }
            region => RegionMapper.resolve(region),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer_registry::{BufferDescriptor, BufferRole, MemoryBudget, ModelId, RegistryError};
    use nn_core::OperandType;

    #[test]
    fn test_region_roundtrip() {
        let memory = SharedMemory::new(8);
        let pool = RegionMapper.resolve(&MemoryPool::Region(memory.clone())).unwrap();
        pool.write(2, &[9, 9]).unwrap();
        assert_eq!(pool.len(), 8);
        assert_eq!(memory.read(2, 2).unwrap(), vec![9, 9]);
        assert!(matches!(pool.read(7, 2), Err(RuntimeError::PoolError(_))));
    }

    #[test]
    fn test_region_mapper_rejects_tokens() {
        assert!(RegionMapper.resolve(&MemoryPool::Token(1)).is_err());
    }

    #[test]
    fn test_registry_resolver() {
        let registry = BufferRegistry::new(MemoryBudget::from_mb(1));
        let handle = registry
            .allocate(BufferDescriptor {
                capacity: 8,
                operand_type: OperandType::TensorFloat32,
                dimensions: vec![2],
                roles: [BufferRole::output(ModelId::new(1), 0)].into_iter().collect(),
            })
            .unwrap();
        let resolver = RegistryResolver::new(registry);

        let pool = resolver.resolve(&MemoryPool::Token(handle.token())).unwrap();
        assert_eq!(pool.len(), 8);
        pool.write(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(handle.buffer().unwrap().read_bytes(0, 4).unwrap(), vec![1, 2, 3, 4]);

        assert!(matches!(
            resolver.resolve(&MemoryPool::Token(99)),
            Err(RuntimeError::RegistryError(RegistryError::UnknownToken(99)))
        ));
        assert!(resolver.resolve(&MemoryPool::Region(SharedMemory::new(4))).is_ok());
    }
}
