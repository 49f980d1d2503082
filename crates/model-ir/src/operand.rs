// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph operands: typed values with a lifetime and an optional location.

use nn_core::{byte_size, ExtensionTypeRegistry, OperandType};
use std::fmt;

/// Where an operand's value comes from, and who owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Produced by one operation and consumed by others inside the subgraph.
    Temporary,
    /// Declared in the subgraph's input list.
    SubgraphInput,
    /// Declared in the subgraph's output list.
    SubgraphOutput,
    /// Bytes live in the model's embedded constant blob.
    EmbeddedConstant,
    /// Bytes live in one of the model's constant pools.
    ReferencedConstant,
    /// An omitted optional operand.
    NoValue,
    /// Names a sibling subgraph; `location.offset` is its index.
    SubgraphReference,
}

impl Lifetime {
    /// Constants must be fully specified and carry a location.
    pub fn is_constant(self) -> bool {
        matches!(self, Lifetime::EmbeddedConstant | Lifetime::ReferencedConstant)
    }

    /// Operands whose value is available before any operation runs.
    pub fn is_known_at_start(self) -> bool {
        matches!(
            self,
            Lifetime::EmbeddedConstant
                | Lifetime::ReferencedConstant
                | Lifetime::SubgraphInput
                | Lifetime::NoValue
                | Lifetime::SubgraphReference
        )
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifetime::Temporary => "temporary",
            Lifetime::SubgraphInput => "subgraph-input",
            Lifetime::SubgraphOutput => "subgraph-output",
            Lifetime::EmbeddedConstant => "embedded-constant",
            Lifetime::ReferencedConstant => "referenced-constant",
            Lifetime::NoValue => "no-value",
            Lifetime::SubgraphReference => "subgraph-reference",
        };
        f.write_str(s)
    }
}

/// Byte region of a constant operand (or subgraph index of a reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct DataLocation {
    #[serde(default)]
    pub pool_index: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub length: u32,
}

impl DataLocation {
    pub fn new(pool_index: u32, offset: u32, length: u32) -> Self {
        Self {
            pool_index,
            offset,
            length,
        }
    }

    /// Returns `true` when all three fields are zero.
    pub fn is_empty(&self) -> bool {
        *self == DataLocation::default()
    }

    /// Checks `offset + length <= size` without overflow.
    pub fn fits_within(&self, size: u64) -> bool {
        u64::from(self.offset) + u64::from(self.length) <= size
    }
}

/// Per-channel symmetric quantization parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChannelQuantParams {
    /// One scale per element along `channel_dim`.
    pub scales: Vec<f32>,
    pub channel_dim: u32,
}

/// Type-specific extra parameters.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraParams {
    #[default]
    None,
    ChannelQuant(ChannelQuantParams),
    /// Opaque bytes interpreted by an extension.
    Extension(Vec<u8>),
}

/// A typed value in a subgraph's operand table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Operand {
    #[serde(rename = "type")]
    pub operand_type: OperandType,
    #[serde(default)]
    pub dimensions: Vec<u32>,
    /// How many operation inputs read this operand.
    #[serde(default)]
    pub number_of_consumers: u32,
    #[serde(default)]
    pub scale: f32,
    #[serde(default)]
    pub zero_point: i32,
    pub lifetime: Lifetime,
    #[serde(default)]
    pub location: DataLocation,
    #[serde(default)]
    pub extra_params: ExtraParams,
}

impl Operand {
    /// A tensor operand with no quantization and an empty location.
    pub fn tensor(operand_type: OperandType, dimensions: Vec<u32>, lifetime: Lifetime) -> Self {
        Self {
            operand_type,
            dimensions,
            number_of_consumers: 0,
            scale: 0.0,
            zero_point: 0,
            lifetime,
            location: DataLocation::default(),
            extra_params: ExtraParams::None,
        }
    }

    /// A scalar operand with no quantization and an empty location.
    pub fn scalar(operand_type: OperandType, lifetime: Lifetime) -> Self {
        Self::tensor(operand_type, Vec::new(), lifetime)
    }

    /// A reference to `referenced[index]`.
    pub fn subgraph_reference(index: u32) -> Self {
        Self {
            location: DataLocation::new(0, index, 0),
            ..Self::scalar(OperandType::Subgraph, Lifetime::SubgraphReference)
        }
    }

    /// Sets the quantization scale and zero point.
    pub fn with_quant(mut self, scale: f32, zero_point: i32) -> Self {
        self.scale = scale;
        self.zero_point = zero_point;
        self
    }

    /// Sets the location.
    pub fn with_location(mut self, location: DataLocation) -> Self {
        self.location = location;
        self
    }

    /// Sets the declared consumer count.
    pub fn with_consumers(mut self, number_of_consumers: u32) -> Self {
        self.number_of_consumers = number_of_consumers;
        self
    }

    /// Whether this operand carries dimensions, consulting the extension
    /// registry for vendor types. Unknown extensions report `None`.
    pub fn is_tensor(&self, extensions: &dyn ExtensionTypeRegistry) -> Option<bool> {
        match self.operand_type {
            OperandType::Extension(_) => extensions.lookup(self.operand_type).map(|i| i.is_tensor),
            ty => Some(ty.is_tensor()),
        }
    }

    /// Byte size of the operand's value for built-in types.
    ///
    /// Returns `Some(0)` for tensors whose shape is not fully known and
    /// `None` for extension types or on overflow.
    pub fn byte_size(&self) -> Option<u32> {
        let element = self.operand_type.element_size()?;
        byte_size(element, self.operand_type.is_scalar(), &self.dimensions)
    }

    /// Index of the referenced subgraph, for subgraph-reference operands.
    pub fn subgraph_index(&self) -> Option<usize> {
        (self.lifetime == Lifetime::SubgraphReference).then_some(self.location.offset as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nn_core::NoExtensions;

    #[test]
    fn test_known_at_start() {
        assert!(Lifetime::SubgraphInput.is_known_at_start());
        assert!(Lifetime::NoValue.is_known_at_start());
        assert!(!Lifetime::Temporary.is_known_at_start());
        assert!(!Lifetime::SubgraphOutput.is_known_at_start());
    }

    #[test]
    fn test_location_bounds() {
        let loc = DataLocation::new(0, u32::MAX, u32::MAX);
        assert!(!loc.fits_within(u64::from(u32::MAX)));
        assert!(DataLocation::new(0, 4, 4).fits_within(8));
        assert!(DataLocation::default().is_empty());
    }

    #[test]
    fn test_byte_size() {
        let t = Operand::tensor(OperandType::TensorFloat32, vec![2, 3], Lifetime::Temporary);
        assert_eq!(t.byte_size(), Some(24));
        let u = Operand::tensor(OperandType::TensorFloat32, vec![0, 3], Lifetime::Temporary);
        assert_eq!(u.byte_size(), Some(0));
        let s = Operand::scalar(OperandType::Int32, Lifetime::EmbeddedConstant);
        assert_eq!(s.byte_size(), Some(4));
    }

    #[test]
    fn test_subgraph_reference() {
        let op = Operand::subgraph_reference(2);
        assert_eq!(op.subgraph_index(), Some(2));
        assert_eq!(op.is_tensor(&NoExtensions), Some(false));
    }

    #[test]
    fn test_serde_defaults() {
        let json = r#"{ "type": "TENSOR_FLOAT32", "dimensions": [2], "lifetime": "temporary" }"#;
        let op: Operand = serde_json::from_str(json).unwrap();
        assert_eq!(op.operand_type, OperandType::TensorFloat32);
        assert_eq!(op.extra_params, ExtraParams::None);
        assert!(op.location.is_empty());
    }
}
