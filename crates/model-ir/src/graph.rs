// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subgraphs and models.
//!
//! # Type-State Pattern
//!
//! A model transitions through states enforced at compile time:
//!
//! ```text
//! Model<Loaded>    : parsed or built in memory, not yet checked.
//!       │  .validate(&ctx)
//!       ▼
//! Model<Validated> : accepted by the validator, ready to prepare.
//! ```
//!
//! The executor and the request validator only accept `Model<Validated>`,
//! so an unchecked graph can never reach them.

use crate::validate::{self, ValidationContext, ValidationError};
use crate::{Operand, Operation};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: model has been built or loaded but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: model passed graph validation.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for model states.
pub trait GraphState: fmt::Debug + Clone + Send + Sync + 'static {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── Subgraph ───────────────────────────────────────────────────────

/// Identifies one subgraph of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubgraphRef {
    Main,
    Referenced(usize),
}

impl fmt::Display for SubgraphRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubgraphRef::Main => f.write_str("main"),
            SubgraphRef::Referenced(i) => write!(f, "referenced[{i}]"),
        }
    }
}

/// An operand table plus operations in execution order.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Subgraph {
    pub operands: Vec<Operand>,
    pub operations: Vec<Operation>,
    pub input_indexes: Vec<u32>,
    pub output_indexes: Vec<u32>,
}

impl Subgraph {
    /// Operand declared at position `i` of the input list.
    pub fn input_operand(&self, i: usize) -> Option<&Operand> {
        let index = *self.input_indexes.get(i)?;
        self.operands.get(index as usize)
    }

    /// Operand declared at position `i` of the output list.
    pub fn output_operand(&self, i: usize) -> Option<&Operand> {
        let index = *self.output_indexes.get(i)?;
        self.operands.get(index as usize)
    }
}

// ── Constant pools ─────────────────────────────────────────────────

/// A read-only pool backing referenced-constant operands.
#[derive(Debug, Clone)]
pub enum ConstantPool {
    Bytes(Arc<[u8]>),
    /// A memory-mapped file (see [`crate::ModelLoader`]).
    Mapped(Arc<memmap2::Mmap>),
}

impl ConstantPool {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ConstantPool::Bytes(b) => b,
            ConstantPool::Mapped(m) => m,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for ConstantPool {
    fn from(bytes: Vec<u8>) -> Self {
        ConstantPool::Bytes(bytes.into())
    }
}

// ── Model ──────────────────────────────────────────────────────────

/// A main subgraph, its referenced subgraphs and their constant storage.
///
/// The generic parameter `S` encodes the validation state at compile time.
/// Constant pools are not serialised; [`crate::ModelLoader`] attaches them
/// from `pool_<n>.bin` files.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct Model<S: GraphState = Loaded> {
    pub main: Subgraph,
    #[serde(default)]
    pub referenced: Vec<Subgraph>,
    /// Blob backing embedded-constant operands.
    #[serde(default)]
    pub operand_values: Vec<u8>,
    #[serde(skip)]
    pub pools: Vec<ConstantPool>,
    #[serde(default)]
    pub relax_computation_float32_to_float16: bool,
    #[serde(skip)]
    _state: PhantomData<S>,
}

impl<S: GraphState> Model<S> {
    /// Looks up a subgraph by reference.
    pub fn subgraph(&self, which: SubgraphRef) -> Option<&Subgraph> {
        match which {
            SubgraphRef::Main => Some(&self.main),
            SubgraphRef::Referenced(i) => self.referenced.get(i),
        }
    }

    /// Iterates the main subgraph, then each referenced subgraph in order.
    pub fn subgraphs(&self) -> impl Iterator<Item = (SubgraphRef, &Subgraph)> {
        std::iter::once((SubgraphRef::Main, &self.main)).chain(
            self.referenced
                .iter()
                .enumerate()
                .map(|(i, s)| (SubgraphRef::Referenced(i), s)),
        )
    }

    /// Total number of operations across all subgraphs.
    pub fn num_operations(&self) -> usize {
        self.subgraphs().map(|(_, s)| s.operations.len()).sum()
    }

    /// Serialises the model (without constant pools) to pretty JSON.
    pub fn to_json(&self) -> Result<String, crate::ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn transition<T: GraphState>(self) -> Model<T> {
        Model {
            main: self.main,
            referenced: self.referenced,
            operand_values: self.operand_values,
            pools: self.pools,
            relax_computation_float32_to_float16: self.relax_computation_float32_to_float16,
            _state: PhantomData,
        }
    }
}

// ── Loaded state ───────────────────────────────────────────────────

impl Model<Loaded> {
    /// Creates a model in the `Loaded` state with no referenced subgraphs
    /// and no constants.
    pub fn new(main: Subgraph) -> Self {
        Self {
            main,
            referenced: Vec::new(),
            operand_values: Vec::new(),
            pools: Vec::new(),
            relax_computation_float32_to_float16: false,
            _state: PhantomData,
        }
    }

    pub fn with_referenced(mut self, referenced: Vec<Subgraph>) -> Self {
        self.referenced = referenced;
        self
    }

    pub fn with_operand_values(mut self, operand_values: Vec<u8>) -> Self {
        self.operand_values = operand_values;
        self
    }

    pub fn with_pools(mut self, pools: Vec<ConstantPool>) -> Self {
        self.pools = pools;
        self
    }

    /// Parses a model from JSON. Constant pools start empty.
    pub fn from_json(json: &str) -> Result<Self, crate::ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validates the model and transitions to the `Validated` state.
    ///
    /// The checks and their order are documented on
    /// [`validate::validate_graph`]; the first failure is returned.
    pub fn validate(self, ctx: &ValidationContext<'_>) -> Result<Model<Validated>, ValidationError> {
        validate::validate_graph(&self, ctx)?;
        tracing::debug!(
            operations = self.num_operations(),
            referenced = self.referenced.len(),
            revision = %ctx.revision,
            "model validated"
        );
        Ok(self.transition())
    }
}

// ── Validated state ────────────────────────────────────────────────

impl Model<Validated> {
    /// Returns a summary string describing the model.
    pub fn summary(&self) -> String {
        format!(
            "Model: {} inputs, {} outputs, {} operations in {} subgraph(s), {} constant bytes, {} pool(s)",
            self.main.input_indexes.len(),
            self.main.output_indexes.len(),
            self.num_operations(),
            1 + self.referenced.len(),
            self.operand_values.len(),
            self.pools.len(),
        )
    }
}

impl<S: GraphState> fmt::Display for Model<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (which, subgraph) in self.subgraphs() {
            writeln!(
                f,
                "{which}: {} operands, inputs {:?}, outputs {:?}",
                subgraph.operands.len(),
                subgraph.input_indexes,
                subgraph.output_indexes
            )?;
            for op in &subgraph.operations {
                writeln!(f, "  {op}")?;
            }
        }
        Ok(())
    }
}
