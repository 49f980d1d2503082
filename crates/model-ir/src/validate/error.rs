// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Structured validation failures.

use crate::{Lifetime, OperationType, SubgraphRef};
use nn_core::{OperandType, Revision};
use std::fmt;

/// What a validation failure is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Model,
    Operand { subgraph: SubgraphRef, index: usize },
    Operation { subgraph: SubgraphRef, index: usize },
    /// Position in a subgraph's declared input list.
    SubgraphInput { subgraph: SubgraphRef, position: usize },
    /// Position in a subgraph's declared output list.
    SubgraphOutput { subgraph: SubgraphRef, position: usize },
    RequestInput(usize),
    RequestOutput(usize),
    RequestPool(usize),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Model => f.write_str("model"),
            Subject::Operand { subgraph, index } => write!(f, "{subgraph} operand {index}"),
            Subject::Operation { subgraph, index } => write!(f, "{subgraph} operation {index}"),
            Subject::SubgraphInput { subgraph, position } => {
                write!(f, "{subgraph} input list entry {position}")
            }
            Subject::SubgraphOutput { subgraph, position } => {
                write!(f, "{subgraph} output list entry {position}")
            }
            Subject::RequestInput(i) => write!(f, "request input {i}"),
            Subject::RequestOutput(i) => write!(f, "request output {i}"),
            Subject::RequestPool(i) => write!(f, "request pool {i}"),
        }
    }
}

/// The violated rule.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rule {
    // ── Operand types and shapes ──
    #[error("type {operand_type} requires revision {required}, validating against {revision}")]
    TypeNotSupported {
        operand_type: OperandType,
        required: Revision,
        revision: Revision,
    },
    #[error("unknown extension type {0}")]
    UnknownExtension(OperandType),
    #[error("scalar operand carries dimensions")]
    ScalarHasDimensions,
    #[error("tensor has unspecified rank or dimensions")]
    UnspecifiedDimensions,
    #[error("operand byte size exceeds u32::MAX")]
    ByteSizeOverflow,

    // ── Quantization ──
    #[error("zero point {zero_point} outside [{min}, {max}]")]
    InvalidZeroPoint { zero_point: i32, min: i64, max: i64 },
    #[error("invalid scale {0}")]
    InvalidScale(f32),
    #[error("operand type does not take quantization parameters")]
    UnexpectedQuantParams,
    #[error("invalid per-channel quantization: {0}")]
    InvalidChannelQuant(String),
    #[error("extra params do not match operand type")]
    UnexpectedExtraParams,

    // ── Locations ──
    #[error("location offset {offset} + length {length} exceeds {available} bytes")]
    LocationOutOfBounds {
        offset: u32,
        length: u32,
        available: u64,
    },
    #[error("pool index {pool_index} out of range ({pools} pools)")]
    PoolIndexOutOfRange { pool_index: u32, pools: usize },
    #[error("non-constant operand carries a location")]
    UnexpectedLocation,
    #[error("constant length {actual} does not match type size {expected}")]
    LengthMismatch { expected: u32, actual: u32 },
    #[error("subgraph index {index} out of range ({count} referenced subgraphs)")]
    SubgraphIndexOutOfRange { index: u32, count: usize },
    #[error("SUBGRAPH type and subgraph-reference lifetime must occur together")]
    SubgraphTypeLifetimeMismatch,

    // ── Operations ──
    #[error("opcode {op_type} requires revision {required}, validating against {revision}")]
    OperationNotSupported {
        op_type: OperationType,
        required: Revision,
        revision: Revision,
    },
    #[error("operand index {index} out of range ({count} operands)")]
    OperandIndexOutOfRange { index: u32, count: usize },
    #[error("operation rejected: {0}")]
    OperationRejected(String),
    #[error("control-flow signature mismatch: {0}")]
    ControlFlowArity(String),

    // ── Dataflow ──
    #[error("operand {operand} read before written")]
    ReadBeforeWritten { operand: u32 },
    #[error("operand {operand} written more than once")]
    WrittenTwice { operand: u32 },
    #[error("operand {operand} with lifetime {lifetime} cannot be an operation output")]
    InvalidOutputLifetime { operand: u32, lifetime: Lifetime },
    #[error("operand is never written")]
    NeverWritten,
    #[error("declared {declared} consumers, observed {observed}")]
    ConsumerCountMismatch { declared: u32, observed: u32 },

    // ── Declared input/output lists ──
    #[error("operand {operand} listed more than once")]
    DuplicateIndex { operand: u32 },
    #[error("listed operand has lifetime {actual}, expected {expected}")]
    ListedWithWrongLifetime { expected: Lifetime, actual: Lifetime },
    #[error("operand with lifetime {0} is missing from the declared list")]
    MissingFromList(Lifetime),

    // ── Subgraph references ──
    #[error("subgraph reference cycle through referenced[{0}]")]
    SubgraphCycle(usize),
    #[error("referenced[{0}] is not reachable from main")]
    UnreachableSubgraph(usize),

    // ── Requests ──
    #[error("expected {expected} arguments, got {actual}")]
    ArgumentCountMismatch { expected: usize, actual: usize },
    #[error("omitted argument carries a location or dimensions")]
    NoValueWithLocation,
    #[error("dimension override on a scalar operand")]
    ScalarOverride,
    #[error("override rank {actual} does not match declared rank {expected}")]
    OverrideRankMismatch { expected: usize, actual: usize },
    #[error("override dimension {actual} on axis {axis} conflicts with declared {expected}")]
    OverrideDimensionMismatch { axis: usize, expected: u32, actual: u32 },
    #[error("input shape is not fully specified")]
    UnspecifiedInput,
    #[error("output shape is not fully specified")]
    UnspecifiedOutput,
    #[error("token pool arguments must use offset 0 and length 0")]
    TokenArgumentLocation,
    #[error("argument provides {provided} bytes, operand needs {required}")]
    InsufficientArgumentLength { required: u32, provided: u64 },
}

/// A rejected graph or request: what, and which rule.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{subject}: {rule}")]
pub struct ValidationError {
    pub subject: Subject,
    pub rule: Rule,
}

impl ValidationError {
    pub fn new(subject: Subject, rule: Rule) -> Self {
        Self { subject, rule }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = ValidationError::new(
            Subject::Operation {
                subgraph: SubgraphRef::Main,
                index: 1,
            },
            Rule::ReadBeforeWritten { operand: 4 },
        );
        assert_eq!(e.to_string(), "main operation 1: operand 4 read before written");
    }

    #[test]
    fn test_referenced_display() {
        let e = ValidationError::new(
            Subject::Operand {
                subgraph: SubgraphRef::Referenced(2),
                index: 0,
            },
            Rule::ScalarHasDimensions,
        );
        assert!(e.to_string().starts_with("referenced[2] operand 0"));
    }
}
