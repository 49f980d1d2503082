// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand element types and interface revisions.

use std::fmt;

/// Number of low bits of an extension type code that identify the type
/// within its extension. The remaining high bits carry the namespace prefix.
pub const EXTENSION_TYPE_LOW_BITS: u32 = 16;

/// Versions of the interface contract, in increasing order.
///
/// A graph is always validated against exactly one revision. Each operand
/// type and each opcode declares the first revision that accepts it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Revision {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

impl Revision {
    /// The newest revision understood by this crate.
    pub const LATEST: Revision = Revision::V1_3;

    /// Whether non-constant tensors may carry unspecified rank or dimensions.
    pub fn allows_unspecified_dimensions(self) -> bool {
        self >= Revision::V1_2
    }

    /// Whether extension (vendor) operand types are accepted.
    pub fn allows_extensions(self) -> bool {
        self >= Revision::V1_2
    }

    /// Returns the dotted label, e.g. `"1.2"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Revision::V1_0 => "1.0",
            Revision::V1_1 => "1.1",
            Revision::V1_2 => "1.2",
            Revision::V1_3 => "1.3",
        }
    }
}

impl Default for Revision {
    fn default() -> Self {
        Revision::LATEST
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The element type of a graph operand.
///
/// Built-in types carry fixed codes. [`OperandType::Extension`] holds the
/// full 32-bit code of a vendor type: the namespace prefix lives in the high
/// 16 bits and the type-within-extension in the low 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperandType {
    Float32,
    Int32,
    Uint32,
    TensorFloat32,
    TensorInt32,
    TensorQuant8Asymm,
    Bool,
    TensorQuant16Symm,
    TensorFloat16,
    TensorBool8,
    Float16,
    TensorQuant8SymmPerChannel,
    TensorQuant16Asymm,
    TensorQuant8Symm,
    TensorQuant8AsymmSigned,
    Subgraph,
    Extension(u32),
}

impl OperandType {
    /// Decodes a numeric type code.
    ///
    /// Codes with a non-zero prefix decode to [`OperandType::Extension`];
    /// unknown built-in codes return `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        if code >> EXTENSION_TYPE_LOW_BITS != 0 {
            return Some(OperandType::Extension(code));
        }
        let ty = match code {
            0 => OperandType::Float32,
            1 => OperandType::Int32,
            2 => OperandType::Uint32,
            3 => OperandType::TensorFloat32,
            4 => OperandType::TensorInt32,
            5 => OperandType::TensorQuant8Asymm,
            6 => OperandType::Bool,
            7 => OperandType::TensorQuant16Symm,
            8 => OperandType::TensorFloat16,
            9 => OperandType::TensorBool8,
            10 => OperandType::Float16,
            11 => OperandType::TensorQuant8SymmPerChannel,
            12 => OperandType::TensorQuant16Asymm,
            13 => OperandType::TensorQuant8Symm,
            14 => OperandType::TensorQuant8AsymmSigned,
            15 => OperandType::Subgraph,
            _ => return None,
        };
        Some(ty)
    }

    /// Returns the numeric type code.
    pub fn code(self) -> u32 {
        match self {
            OperandType::Float32 => 0,
            OperandType::Int32 => 1,
            OperandType::Uint32 => 2,
            OperandType::TensorFloat32 => 3,
            OperandType::TensorInt32 => 4,
            OperandType::TensorQuant8Asymm => 5,
            OperandType::Bool => 6,
            OperandType::TensorQuant16Symm => 7,
            OperandType::TensorFloat16 => 8,
            OperandType::TensorBool8 => 9,
            OperandType::Float16 => 10,
            OperandType::TensorQuant8SymmPerChannel => 11,
            OperandType::TensorQuant16Asymm => 12,
            OperandType::TensorQuant8Symm => 13,
            OperandType::TensorQuant8AsymmSigned => 14,
            OperandType::Subgraph => 15,
            OperandType::Extension(code) => code,
        }
    }

    /// Builds an extension type code from a namespace prefix and a type
    /// index within that extension.
    pub fn extension(prefix: u16, type_within_extension: u16) -> Self {
        OperandType::Extension(
            (u32::from(prefix) << EXTENSION_TYPE_LOW_BITS) | u32::from(type_within_extension),
        )
    }

    /// Returns `true` for vendor extension types.
    pub fn is_extension(self) -> bool {
        matches!(self, OperandType::Extension(_))
    }

    /// Returns the namespace prefix of an extension type.
    pub fn extension_prefix(self) -> Option<u16> {
        match self {
            OperandType::Extension(code) => Some((code >> EXTENSION_TYPE_LOW_BITS) as u16),
            _ => None,
        }
    }

    /// Returns `true` for built-in scalar types.
    ///
    /// Extension types report `false`; their shape class comes from the
    /// extension registry.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            OperandType::Float32
                | OperandType::Int32
                | OperandType::Uint32
                | OperandType::Bool
                | OperandType::Float16
                | OperandType::Subgraph
        )
    }

    /// Returns `true` for built-in tensor types.
    pub fn is_tensor(self) -> bool {
        !self.is_extension() && !self.is_scalar()
    }

    /// Returns the size of one element in bytes, or `None` for extensions.
    pub fn element_size(self) -> Option<u32> {
        let size = match self {
            OperandType::Float32
            | OperandType::Int32
            | OperandType::Uint32
            | OperandType::TensorFloat32
            | OperandType::TensorInt32 => 4,
            OperandType::TensorQuant8Asymm
            | OperandType::Bool
            | OperandType::TensorBool8
            | OperandType::TensorQuant8SymmPerChannel
            | OperandType::TensorQuant8Symm
            | OperandType::TensorQuant8AsymmSigned => 1,
            OperandType::TensorQuant16Symm
            | OperandType::TensorFloat16
            | OperandType::Float16
            | OperandType::TensorQuant16Asymm => 2,
            OperandType::Subgraph => 0,
            OperandType::Extension(_) => return None,
        };
        Some(size)
    }

    /// Returns the first revision that accepts this type.
    pub fn min_revision(self) -> Revision {
        match self {
            OperandType::Float32
            | OperandType::Int32
            | OperandType::Uint32
            | OperandType::TensorFloat32
            | OperandType::TensorInt32
            | OperandType::TensorQuant8Asymm => Revision::V1_0,
            OperandType::Bool
            | OperandType::TensorQuant16Symm
            | OperandType::TensorFloat16
            | OperandType::TensorBool8
            | OperandType::Float16
            | OperandType::TensorQuant8SymmPerChannel
            | OperandType::TensorQuant16Asymm
            | OperandType::TensorQuant8Symm
            | OperandType::Extension(_) => Revision::V1_2,
            OperandType::TensorQuant8AsymmSigned | OperandType::Subgraph => Revision::V1_3,
        }
    }

    /// Returns a human-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            OperandType::Float32 => "FLOAT32",
            OperandType::Int32 => "INT32",
            OperandType::Uint32 => "UINT32",
            OperandType::TensorFloat32 => "TENSOR_FLOAT32",
            OperandType::TensorInt32 => "TENSOR_INT32",
            OperandType::TensorQuant8Asymm => "TENSOR_QUANT8_ASYMM",
            OperandType::Bool => "BOOL",
            OperandType::TensorQuant16Symm => "TENSOR_QUANT16_SYMM",
            OperandType::TensorFloat16 => "TENSOR_FLOAT16",
            OperandType::TensorBool8 => "TENSOR_BOOL8",
            OperandType::Float16 => "FLOAT16",
            OperandType::TensorQuant8SymmPerChannel => "TENSOR_QUANT8_SYMM_PER_CHANNEL",
            OperandType::TensorQuant16Asymm => "TENSOR_QUANT16_ASYMM",
            OperandType::TensorQuant8Symm => "TENSOR_QUANT8_SYMM",
            OperandType::TensorQuant8AsymmSigned => "TENSOR_QUANT8_ASYMM_SIGNED",
            OperandType::Subgraph => "SUBGRAPH",
            OperandType::Extension(_) => "EXTENSION",
        }
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandType::Extension(code) => write!(f, "EXTENSION({code:#010x})"),
            other => f.write_str(other.as_str()),
        }
    }
}
