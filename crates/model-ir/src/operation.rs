// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operations and opcodes.

use nn_core::Revision;
use std::fmt;

/// Opcodes understood by the service.
///
/// Numeric kernels are supplied externally; the engine itself only
/// implements the two control-flow opcodes, [`OperationType::If`] and
/// [`OperationType::While`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Add,
    Mul,
    Relu,
    Softmax,
    Sub,
    Less,
    Maximum,
    If,
    While,
}

impl OperationType {
    /// Decodes a numeric opcode.
    pub fn from_code(code: u32) -> Option<Self> {
        let op = match code {
            0 => OperationType::Add,
            18 => OperationType::Mul,
            19 => OperationType::Relu,
            25 => OperationType::Softmax,
            36 => OperationType::Sub,
            58 => OperationType::Less,
            65 => OperationType::Maximum,
            96 => OperationType::If,
            97 => OperationType::While,
            _ => return None,
        };
        Some(op)
    }

    /// Numeric opcode.
    pub fn code(self) -> u32 {
        match self {
            OperationType::Add => 0,
            OperationType::Mul => 18,
            OperationType::Relu => 19,
            OperationType::Softmax => 25,
            OperationType::Sub => 36,
            OperationType::Less => 58,
            OperationType::Maximum => 65,
            OperationType::If => 96,
            OperationType::While => 97,
        }
    }

    /// First revision that accepts this opcode.
    pub fn min_revision(self) -> Revision {
        match self {
            OperationType::Add
            | OperationType::Mul
            | OperationType::Relu
            | OperationType::Softmax => Revision::V1_0,
            OperationType::Sub => Revision::V1_1,
            OperationType::Less | OperationType::Maximum => Revision::V1_2,
            OperationType::If | OperationType::While => Revision::V1_3,
        }
    }

    /// `true` for opcodes the engine executes by recursing into subgraphs.
    pub fn is_control_flow(self) -> bool {
        matches!(self, OperationType::If | OperationType::While)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Add => "ADD",
            OperationType::Mul => "MUL",
            OperationType::Relu => "RELU",
            OperationType::Softmax => "SOFTMAX",
            OperationType::Sub => "SUB",
            OperationType::Less => "LESS",
            OperationType::Maximum => "MAXIMUM",
            OperationType::If => "IF",
            OperationType::While => "WHILE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand positions used by the IF opcode.
pub mod if_op {
    pub const COND_BOOL_OPERAND: usize = 0;
    pub const THEN_MODEL_OPERAND: usize = 1;
    pub const ELSE_MODEL_OPERAND: usize = 2;
    pub const FIRST_INPUT: usize = 3;
}

/// Operand positions used by the WHILE opcode.
pub mod while_op {
    pub const COND_MODEL_OPERAND: usize = 0;
    pub const BODY_MODEL_OPERAND: usize = 1;
    pub const FIRST_INPUT: usize = 2;
}

/// One node of a subgraph.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
}

impl Operation {
    pub fn new(op_type: OperationType, inputs: Vec<u32>, outputs: Vec<u32>) -> Self {
        Self {
            op_type,
            inputs,
            outputs,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?}) -> {:?}", self.op_type, self.inputs, self.outputs)
    }
}
