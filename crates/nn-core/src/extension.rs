// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Extension (vendor) operand type registry.

use crate::OperandType;
use std::collections::HashMap;

/// What the service knows about one extension operand type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionTypeInfo {
    /// Whether operands of this type carry dimensions.
    pub is_tensor: bool,
    /// Size of one element (tensor) or of the whole value (scalar).
    pub byte_size: u32,
}

/// Maps extension type codes to their shape class and size.
///
/// Injected into the validator and executor; a type whose prefix the
/// registry does not know is rejected.
pub trait ExtensionTypeRegistry: Send + Sync {
    /// Looks up an extension type. Returns `None` for unknown prefixes,
    /// unknown types, and all built-in types.
    fn lookup(&self, operand_type: OperandType) -> Option<ExtensionTypeInfo>;
}

/// A registry that knows no extensions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtensions;

impl ExtensionTypeRegistry for NoExtensions {
    fn lookup(&self, _operand_type: OperandType) -> Option<ExtensionTypeInfo> {
        None
    }
}

/// A fixed table of extension types, keyed by full type code.
#[derive(Debug, Default, Clone)]
pub struct StaticExtensionRegistry {
    types: HashMap<u32, ExtensionTypeInfo>,
}

impl StaticExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `type_within_extension` under `prefix`.
    pub fn register(
        &mut self,
        prefix: u16,
        type_within_extension: u16,
        info: ExtensionTypeInfo,
    ) -> &mut Self {
        let code = OperandType::extension(prefix, type_within_extension).code();
        self.types.insert(code, info);
        self
    }
}

impl ExtensionTypeRegistry for StaticExtensionRegistry {
    fn lookup(&self, operand_type: OperandType) -> Option<ExtensionTypeInfo> {
        match operand_type {
            OperandType::Extension(code) => self.types.get(&code).copied(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_registry() {
        let mut registry = StaticExtensionRegistry::new();
        registry.register(
            2,
            1,
            ExtensionTypeInfo {
                is_tensor: true,
                byte_size: 8,
            },
        );

        let info = registry.lookup(OperandType::extension(2, 1)).unwrap();
        assert!(info.is_tensor);
        assert_eq!(info.byte_size, 8);
        assert!(registry.lookup(OperandType::extension(2, 2)).is_none());
        assert!(registry.lookup(OperandType::TensorFloat32).is_none());
    }

    #[test]
    fn test_no_extensions() {
        assert!(NoExtensions.lookup(OperandType::extension(1, 0)).is_none());
    }
}
