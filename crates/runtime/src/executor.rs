// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The CPU graph walker.
//!
//! [`CpuExecutor::run`] executes a validated model against one request:
//!
//! ```text
//! initialise records ──► stage request inputs/outputs ──► walk operations
//!                                                            │
//!            ┌───────────────────────────────────────────────┤
//!            ▼                       ▼                       ▼
//!     kernel dispatch          IF: run one branch     WHILE: cond/body loop
//!            │                       │                       │
//!            └──────── consume inputs, free dead temporaries ◄┘
//!                                    │
//!                     NoError ──► write staged outputs back
//! ```
//!
//! The deadline is checked before every operation, including operations
//! inside referenced subgraphs. A WHILE loop additionally runs against a
//! cumulative time budget.
//!
//! Request outputs are staged in owned buffers and only written back to
//! their pools when the whole walk succeeds, so a failed or timed-out
//! execution never leaves partial results in caller memory.

use crate::{
    KernelDispatcher, KernelError, MappedPool, OperandRecord, OperationContext, RuntimeError,
};
use model_ir::{
    if_op, while_op, Lifetime, Model, Operation, OperationType, Request, RequestArgument,
    Subgraph, Validated,
};
use nn_core::{combine_dimensions, ErrorStatus, ExtensionTypeRegistry, NoExtensions, OutputShape};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executor settings, passed explicitly at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Cumulative budget for a single WHILE operation.
    pub loop_timeout: Duration,
    /// Emit a `trace` event per operation and loop iteration.
    pub verbose: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            loop_timeout: Duration::from_millis(crate::config::DEFAULT_LOOP_TIMEOUT_MS),
            verbose: false,
        }
    }
}

/// Outcome of a walk that produced output shapes.
///
/// `status` is either `NoError` or `OutputInsufficientSize`; every other
/// outcome is reported as an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub status: ErrorStatus,
    pub output_shapes: Vec<OutputShape>,
}

/// Where a staged request output goes back to.
struct OutputBinding {
    operand: usize,
    pool: usize,
    offset: usize,
}

/// Walks validated graphs on the calling thread.
///
/// The executor holds no state between runs; concurrent runs over the same
/// model each get their own operand records.
pub struct CpuExecutor<'a> {
    kernels: &'a dyn KernelDispatcher,
    extensions: &'a dyn ExtensionTypeRegistry,
    config: &'a ExecutorConfig,
    loop_timeout: Duration,
    deadline: Option<Instant>,
}

impl<'a> CpuExecutor<'a> {
    pub fn new(kernels: &'a dyn KernelDispatcher, config: &'a ExecutorConfig) -> Self {
        Self {
            kernels,
            extensions: &NoExtensions,
            config,
            loop_timeout: config.loop_timeout,
            deadline: None,
        }
    }

    /// Sizes extension-typed operands from `extensions`.
    pub fn with_extensions(mut self, extensions: &'a dyn ExtensionTypeRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    /// Overrides the configured WHILE budget for this executor's runs.
    pub fn with_loop_timeout(mut self, loop_timeout: Duration) -> Self {
        self.loop_timeout = loop_timeout;
        self
    }

    /// Sets the absolute point in time after which no further operation starts.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Executes `model` for `request`. `pools` are the request's pools,
    /// already resolved, in request order.
    pub fn run(
        &self,
        model: &Model<Validated>,
        request: &Request,
        pools: &[Arc<dyn MappedPool>],
    ) -> Result<RunOutput, RuntimeError> {
        let main = &model.main;
        let mut records = initialize_records(model, main, self.extensions)?;
        bind_arguments(&main.input_indexes, &request.inputs, pools, &mut records, None)?;
        let mut bindings = Vec::with_capacity(request.outputs.len());
        bind_arguments(
            &main.output_indexes,
            &request.outputs,
            pools,
            &mut records,
            Some(&mut bindings),
        )?;

        let result = self.execute_subgraph(model, main, &mut records);
        let status = match result {
            Ok(()) => ErrorStatus::None,
            Err(RuntimeError::OutputInsufficientSize {
                operand,
                required,
                provided,
            }) => {
                tracing::debug!(operand, required, provided, "output buffer too small");
                ErrorStatus::OutputInsufficientSize
            }
            Err(e) => return Err(e),
        };

        if status == ErrorStatus::None {
            for binding in &bindings {
                if let Some(value) = records[binding.operand].value() {
                    pools[binding.pool].write(binding.offset, value)?;
                }
            }
        }

        let output_shapes = main
            .output_indexes
            .iter()
            .map(|&i| {
                let record = &records[i as usize];
                OutputShape {
                    dimensions: record.dimensions.clone(),
                    is_sufficient: record.is_sufficient(),
                }
            })
            .collect();
        Ok(RunOutput {
            status,
            output_shapes,
        })
    }

    fn check_deadline(&self) -> Result<(), RuntimeError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(RuntimeError::MissedDeadline { persistent: false })
            }
            _ => Ok(()),
        }
    }

    fn execute_subgraph<'m>(
        &self,
        model: &'m Model<Validated>,
        subgraph: &'m Subgraph,
        records: &mut [OperandRecord<'m>],
    ) -> Result<(), RuntimeError> {
        for (index, operation) in subgraph.operations.iter().enumerate() {
            self.execute_operation(model, subgraph, index, operation, records)?;
        }
        Ok(())
    }

    fn execute_operation<'m>(
        &self,
        model: &'m Model<Validated>,
        subgraph: &'m Subgraph,
        index: usize,
        operation: &Operation,
        records: &mut [OperandRecord<'m>],
    ) -> Result<(), RuntimeError> {
        self.check_deadline()?;
        if self.config.verbose {
            tracing::trace!(index, op = %operation.op_type, "executing operation");
        }

        match operation.op_type {
            OperationType::If => self.execute_if(model, subgraph, index, operation, records)?,
            OperationType::While => self.execute_while(model, subgraph, index, operation, records)?,
            _ => {
                let mut context = OperationContext::new(operation, records);
                if let Err(source) = self.kernels.execute(&mut context) {
                    return Err(kernel_failure(index, operation, records, source));
                }
            }
        }

        for &input in &operation.inputs {
            if records[input as usize].consume() && self.config.verbose {
                tracing::trace!(operand = input, "freed temporary");
            }
        }
        Ok(())
    }

    fn execute_if<'m>(
        &self,
        model: &'m Model<Validated>,
        subgraph: &'m Subgraph,
        index: usize,
        operation: &Operation,
        records: &mut [OperandRecord<'m>],
    ) -> Result<(), RuntimeError> {
        let condition = operand_at(records, &operation.inputs, if_op::COND_BOOL_OPERAND)
            .and_then(|r| r.value())
            .and_then(|v| v.first().copied())
            .ok_or_else(|| control_flow(index, "IF condition has no value"))?;
        let branch_slot = if condition != 0 {
            if_op::THEN_MODEL_OPERAND
        } else {
            if_op::ELSE_MODEL_OPERAND
        };
        if self.config.verbose {
            tracing::trace!(index, condition = condition != 0, "IF branch selected");
        }

        let branch = referenced_subgraph(model, subgraph, operation, branch_slot, index)?;
        if operation.inputs.len() != if_op::FIRST_INPUT + branch.input_indexes.len()
            || operation.outputs.len() != branch.output_indexes.len()
        {
            return Err(control_flow(index, "IF operands do not match the branch signature"));
        }
        let mut inner = initialize_records(model, branch, self.extensions)?;
        for (i, &inner_input) in branch.input_indexes.iter().enumerate() {
            let outer = &records[operation.inputs[if_op::FIRST_INPUT + i] as usize];
            inherit_value(&mut inner[inner_input as usize], outer);
        }
        for (i, &inner_output) in branch.output_indexes.iter().enumerate() {
            let outer = &records[operation.outputs[i] as usize];
            let record = &mut inner[inner_output as usize];
            if let Some(dims) = combine_dimensions(&record.dimensions, &outer.dimensions) {
                record.dimensions = dims;
            }
        }

        self.execute_subgraph(model, branch, &mut inner)?;

        for (i, &inner_output) in branch.output_indexes.iter().enumerate() {
            let outer = operation.outputs[i];
            adopt(index, &mut records[outer as usize], outer, &inner[inner_output as usize])?;
        }
        Ok(())
    }

    fn execute_while<'m>(
        &self,
        model: &'m Model<Validated>,
        subgraph: &'m Subgraph,
        index: usize,
        operation: &Operation,
        records: &mut [OperandRecord<'m>],
    ) -> Result<(), RuntimeError> {
        let cond_graph = referenced_subgraph(
            model,
            subgraph,
            operation,
            while_op::COND_MODEL_OPERAND,
            index,
        )?;
        let body_graph = referenced_subgraph(
            model,
            subgraph,
            operation,
            while_op::BODY_MODEL_OPERAND,
            index,
        )?;
        let carried = operation.inputs.len().saturating_sub(while_op::FIRST_INPUT);
        if cond_graph.input_indexes.len() != carried
            || body_graph.input_indexes.len() != carried
            || cond_graph.output_indexes.len() != 1
            || body_graph.output_indexes.len() > carried
            || operation.outputs.is_empty()
            || operation.outputs.len() > body_graph.output_indexes.len()
        {
            return Err(control_flow(
                index,
                "WHILE operands do not match the condition and body signatures",
            ));
        }
        let mut cond = initialize_records(model, cond_graph, self.extensions)?;
        let mut body = initialize_records(model, body_graph, self.extensions)?;

        // Body outputs of unknown size are reallocated every iteration so
        // they may grow; the rest keep their buffers across iterations.
        let unknown_shape: Vec<bool> = body_graph
            .output_indexes
            .iter()
            .map(|&o| matches!(body_graph.operands[o as usize].byte_size(), Some(0) | None))
            .collect();

        for (i, &cond_input) in cond_graph.input_indexes.iter().enumerate() {
            let outer = &records[operation.inputs[while_op::FIRST_INPUT + i] as usize];
            inherit_value(&mut cond[cond_input as usize], outer);
        }

        let budget = self.loop_timeout;
        let start = Instant::now();
        for iteration in 0u64.. {
            if iteration != 0 {
                // The last body outputs become the next condition inputs;
                // the previous condition buffers are recycled as the next
                // body outputs.
                for (i, &body_output) in body_graph.output_indexes.iter().enumerate() {
                    let cond_input = cond_graph.input_indexes[i] as usize;
                    let produced = &mut body[body_output as usize];
                    let next = &mut cond[cond_input];
                    next.inherit_info(produced);
                    std::mem::swap(&mut next.buffer, &mut produced.buffer);
                }
                reset_temporaries(cond_graph, &mut cond);
            }

            self.execute_subgraph(model, cond_graph, &mut cond)?;
            let keep_going = cond_graph
                .output_indexes
                .first()
                .and_then(|&o| cond[o as usize].value())
                .and_then(|v| v.first().copied())
                .ok_or_else(|| control_flow(index, "WHILE condition produced no value"))?
                != 0;
            if self.config.verbose {
                tracing::trace!(index, iteration, keep_going, "WHILE condition evaluated");
            }
            if !keep_going {
                break;
            }

            let elapsed = start.elapsed();
            if elapsed >= budget {
                tracing::warn!(index, iteration, ?elapsed, ?budget, "WHILE loop timed out");
                return Err(RuntimeError::LoopTimeout { elapsed, budget });
            }

            for (i, &body_input) in body_graph.input_indexes.iter().enumerate() {
                let cond_input = cond_graph.input_indexes[i] as usize;
                inherit_value(&mut body[body_input as usize], &cond[cond_input]);
            }
            for (i, &body_output) in body_graph.output_indexes.iter().enumerate() {
                if unknown_shape[i] {
                    let record = &mut body[body_output as usize];
                    record.dimensions = body_graph.operands[body_output as usize].dimensions.clone();
                    record.buffer = None;
                }
            }
            if iteration != 0 {
                reset_temporaries(body_graph, &mut body);
            }

            self.execute_subgraph(model, body_graph, &mut body)?;
        }

        for (i, &outer) in operation.outputs.iter().enumerate() {
            let cond_input = cond_graph.input_indexes[i] as usize;
            adopt(index, &mut records[outer as usize], outer, &cond[cond_input])?;
        }
        Ok(())
    }
}

// ── Record setup ───────────────────────────────────────────────────

/// One record per operand, with constants pointing into the model.
fn initialize_records<'m>(
    model: &'m Model<Validated>,
    subgraph: &Subgraph,
    extensions: &dyn ExtensionTypeRegistry,
) -> Result<Vec<OperandRecord<'m>>, RuntimeError> {
    subgraph
        .operands
        .iter()
        .enumerate()
        .map(|(i, operand)| {
            let mut record = OperandRecord::from_operand(operand)
                .with_extension(extensions.lookup(operand.operand_type));
            let loc = operand.location;
            let bytes: Option<&'m [u8]> = match operand.lifetime {
                Lifetime::EmbeddedConstant => Some(model.operand_values.as_slice()),
                Lifetime::ReferencedConstant => {
                    model.pools.get(loc.pool_index as usize).map(|p| p.as_slice())
                }
                _ => None,
            };
            if operand.lifetime.is_constant() {
                let start = loc.offset as usize;
                let value = bytes
                    .and_then(|b| b.get(start..start + loc.length as usize))
                    .ok_or_else(|| {
                        RuntimeError::InvalidArgument(format!(
                            "constant operand {i} lies outside its pool"
                        ))
                    })?;
                record.buffer = Some(Cow::Borrowed(value));
            }
            Ok(record)
        })
        .collect()
}

/// Stages request arguments into the main subgraph's records. Output
/// bindings are collected for write-back when `outputs` is given.
fn bind_arguments(
    indexes: &[u32],
    arguments: &[RequestArgument],
    pools: &[Arc<dyn MappedPool>],
    records: &mut [OperandRecord<'_>],
    mut outputs: Option<&mut Vec<OutputBinding>>,
) -> Result<(), RuntimeError> {
    for (&operand, argument) in indexes.iter().zip(arguments) {
        let record = &mut records[operand as usize];
        if !argument.dimensions.is_empty() {
            record.dimensions = argument.dimensions.clone();
        }
        if argument.has_no_value {
            record.lifetime = Lifetime::NoValue;
            record.buffer = None;
            continue;
        }

        let loc = argument.location;
        let pool = pools.get(loc.pool_index as usize).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!("pool {} is not bound", loc.pool_index))
        })?;
        let (offset, length) = if argument.covers_whole_pool() {
            (0, pool.len())
        } else {
            (loc.offset as usize, loc.length as usize)
        };
        record.buffer = Some(Cow::Owned(pool.read(offset, length)?));
        record.bound_length = Some(length);
        if let Some(bindings) = outputs.as_deref_mut() {
            bindings.push(OutputBinding {
                operand: operand as usize,
                pool: loc.pool_index as usize,
                offset,
            });
        }
    }
    Ok(())
}

/// Copies type, shape and value from `from`, keeping `to`'s lifetime.
fn inherit_value<'m>(to: &mut OperandRecord<'m>, from: &OperandRecord<'m>) {
    to.inherit_info(from);
    to.buffer = from.buffer.clone();
}

/// Temporaries start every loop iteration with their declared shape.
fn reset_temporaries(subgraph: &Subgraph, records: &mut [OperandRecord<'_>]) {
    for (operand, record) in subgraph.operands.iter().zip(records.iter_mut()) {
        if operand.lifetime == Lifetime::Temporary {
            record.dimensions = operand.dimensions.clone();
            record.uses_left = operand.number_of_consumers;
        }
    }
}

/// Moves an inner subgraph result into the outer operand record.
fn adopt(
    index: usize,
    outer: &mut OperandRecord<'_>,
    outer_index: u32,
    inner: &OperandRecord<'_>,
) -> Result<(), RuntimeError> {
    outer.set_shape(&inner.dimensions).map_err(|e| match e {
        KernelError::InsufficientSize { required, provided } => {
            RuntimeError::OutputInsufficientSize {
                operand: outer_index,
                required,
                provided,
            }
        }
        other => control_flow(index, &other.to_string()),
    })?;
    let value = inner
        .value()
        .ok_or_else(|| control_flow(index, "subgraph output has no value"))?;
    let target = outer
        .value_mut()
        .filter(|t| t.len() == value.len())
        .ok_or_else(|| control_flow(index, "subgraph output size mismatch"))?;
    target.copy_from_slice(value);
    Ok(())
}

fn referenced_subgraph<'m>(
    model: &'m Model<Validated>,
    subgraph: &Subgraph,
    operation: &Operation,
    slot: usize,
    index: usize,
) -> Result<&'m Subgraph, RuntimeError> {
    operation
        .inputs
        .get(slot)
        .and_then(|&i| subgraph.operands.get(i as usize))
        .and_then(|operand| operand.subgraph_index())
        .and_then(|s| model.referenced.get(s))
        .ok_or_else(|| control_flow(index, "operand is not a subgraph reference"))
}

fn operand_at<'r, 'm>(
    records: &'r [OperandRecord<'m>],
    indexes: &[u32],
    position: usize,
) -> Option<&'r OperandRecord<'m>> {
    indexes.get(position).and_then(|&i| records.get(i as usize))
}

fn control_flow(index: usize, detail: &str) -> RuntimeError {
    RuntimeError::ControlFlowError {
        index,
        detail: detail.to_string(),
    }
}

fn kernel_failure(
    index: usize,
    operation: &Operation,
    records: &[OperandRecord<'_>],
    source: KernelError,
) -> RuntimeError {
    match source {
        KernelError::InsufficientSize { required, provided } => {
            let operand = operation
                .outputs
                .iter()
                .copied()
                .find(|&o| !records[o as usize].is_sufficient())
                .or_else(|| operation.outputs.first().copied())
                .unwrap_or_default();
            RuntimeError::OutputInsufficientSize {
                operand,
                required,
                provided,
            }
        }
        source => RuntimeError::KernelError {
            index,
            op_type: operation.op_type,
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReferenceKernels;
    use model_ir::{DataLocation, Operand, ReferenceOperationValidator, ValidationContext};
    use nn_core::{NoExtensions, OperandType, Revision, SharedMemory};

    fn validate(model: Model) -> Model<Validated> {
        let ctx = ValidationContext::new(Revision::V1_3, &ReferenceOperationValidator, &NoExtensions);
        model.validate(&ctx).unwrap()
    }

    /// `out = relu(in + bias)` with `bias` an embedded constant.
    fn add_relu_model() -> Model<Validated> {
        let bias: Vec<u8> = [0.5f32, -4.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let act = 0i32.to_le_bytes().to_vec();
        let main = Subgraph {
            operands: vec![
                Operand::tensor(OperandType::TensorFloat32, vec![2], Lifetime::SubgraphInput)
                    .with_consumers(1),
                Operand::tensor(OperandType::TensorFloat32, vec![2], Lifetime::EmbeddedConstant)
                    .with_location(DataLocation::new(0, 0, 8))
                    .with_consumers(1),
                Operand::scalar(OperandType::Int32, Lifetime::EmbeddedConstant)
                    .with_location(DataLocation::new(0, 8, 4))
                    .with_consumers(1),
                Operand::tensor(OperandType::TensorFloat32, vec![2], Lifetime::Temporary)
                    .with_consumers(1),
                Operand::tensor(OperandType::TensorFloat32, vec![0], Lifetime::SubgraphOutput),
            ],
            operations: vec![
                Operation::new(OperationType::Add, vec![0, 1, 2], vec![3]),
                Operation::new(OperationType::Relu, vec![3], vec![4]),
            ],
            input_indexes: vec![0],
            output_indexes: vec![4],
        };
        validate(Model::new(main).with_operand_values([bias, act].concat()))
    }

    fn run_with(
        model: &Model<Validated>,
        input: &SharedMemory,
        output: &SharedMemory,
    ) -> Result<RunOutput, RuntimeError> {
        let request = Request::new(
            vec![RequestArgument::whole_pool(0)],
            vec![RequestArgument::whole_pool(1)],
            vec![],
        );
        let pools: Vec<Arc<dyn MappedPool>> = vec![Arc::new(input.clone()), Arc::new(output.clone())];
        let config = ExecutorConfig::default();
        CpuExecutor::new(&ReferenceKernels, &config).run(model, &request, &pools)
    }

    #[test]
    fn test_constants_and_temporaries() {
        let model = add_relu_model();
        let input = SharedMemory::from_f32s(&[1.0, 2.0]);
        let output = SharedMemory::new(8);
        let out = run_with(&model, &input, &output).unwrap();
        assert_eq!(out.status, ErrorStatus::None);
        assert_eq!(out.output_shapes[0].dimensions, vec![2]);
        assert_eq!(output.to_f32s(), vec![1.5, 0.0]);
    }

    #[test]
    fn test_insufficient_output_is_not_written() {
        let model = add_relu_model();
        let input = SharedMemory::from_f32s(&[1.0, 2.0]);
        let output = SharedMemory::from_f32s(&[7.0]);
        let out = run_with(&model, &input, &output).unwrap();
        assert_eq!(out.status, ErrorStatus::OutputInsufficientSize);
        assert_eq!(
            out.output_shapes[0],
            OutputShape {
                dimensions: vec![2],
                is_sufficient: false
            }
        );
        assert_eq!(output.to_f32s(), vec![7.0]);
    }

    #[test]
    fn test_expired_deadline_is_transient() {
        let model = add_relu_model();
        let input = SharedMemory::from_f32s(&[1.0, 2.0]);
        let output = SharedMemory::new(8);
        let request = Request::new(
            vec![RequestArgument::whole_pool(0)],
            vec![RequestArgument::whole_pool(1)],
            vec![],
        );
        let pools: Vec<Arc<dyn MappedPool>> = vec![Arc::new(input), Arc::new(output.clone())];
        let config = ExecutorConfig::default();
        let err = CpuExecutor::new(&ReferenceKernels, &config)
            .with_deadline(Some(Instant::now()))
            .run(&model, &request, &pools)
            .unwrap_err();
        assert_eq!(err.status(), ErrorStatus::MissedDeadlineTransient);
        assert_eq!(output.to_f32s(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_temporary_freed_after_last_use() {
        let model = add_relu_model();
        let mut records = initialize_records(&model, &model.main, &NoExtensions).unwrap();
        assert!(records[1].data().is_some());
        assert!(records[3].data().is_none());
        records[3].set_shape(&[2]).unwrap();
        assert!(records[3].consume());
        assert!(records[3].data().is_none());
        // Constants are never freed.
        assert!(!records[1].consume());
    }
}
