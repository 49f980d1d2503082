// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph and request validation.
//!
//! Graph checks run in phases. Each phase covers every subgraph (main
//! first, then referenced subgraphs in order) before the next phase
//! starts, and the first failure is returned:
//!
//! 1. operand type legality for the target revision
//! 2. dimensions vs type and lifetime, byte-size overflow
//! 3. quantization parameters and extra params
//! 4. constant locations and subgraph references
//! 5. opcode legality, operand index range, control-flow arity, per-opcode
//!    rules
//! 6. dataflow: no read before write, single writer, consumer counts
//! 7. declared input/output lists
//! 8. subgraph reference cycles and reachability

mod error;
mod flow;
mod operands;
mod request;

pub use error::{Rule, Subject, ValidationError};
pub use request::validate_request;

use crate::operation::{if_op, while_op};
use crate::{
    GraphState, Model, Operand, Operation, OperationType, OperationValidator, Subgraph,
    SubgraphAccessor, SubgraphRef,
};
use nn_core::{ExtensionTypeRegistry, Revision};

/// Everything graph validation needs besides the model itself.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Revision the model is checked against.
    pub revision: Revision,
    /// Per-opcode rule oracle.
    pub operations: &'a dyn OperationValidator,
    /// Lookup for vendor extension operand types.
    pub extensions: &'a dyn ExtensionTypeRegistry,
}

impl<'a> ValidationContext<'a> {
    pub fn new(
        revision: Revision,
        operations: &'a dyn OperationValidator,
        extensions: &'a dyn ExtensionTypeRegistry,
    ) -> Self {
        Self {
            revision,
            operations,
            extensions,
        }
    }
}

/// Validates a whole model. See the module docs for phase order.
pub fn validate_graph<S: GraphState>(
    model: &Model<S>,
    ctx: &ValidationContext<'_>,
) -> Result<(), ValidationError> {
    for_each_operand(model, |operand| operands::check_type(operand, ctx))?;
    for_each_operand(model, |operand| operands::check_dimensions(operand, ctx))?;
    for_each_operand(model, operands::check_quantization)?;
    for_each_operand(model, |operand| operands::check_location(operand, model))?;

    for (which, subgraph) in model.subgraphs() {
        check_operations(model, which, subgraph, ctx)?;
    }
    for (which, subgraph) in model.subgraphs() {
        flow::check_dataflow(which, subgraph)?;
    }
    for (which, subgraph) in model.subgraphs() {
        flow::check_io_lists(which, subgraph)?;
    }
    flow::check_references(model)
}

fn for_each_operand<S: GraphState>(
    model: &Model<S>,
    mut check: impl FnMut(&crate::Operand) -> Result<(), Rule>,
) -> Result<(), ValidationError> {
    for (which, subgraph) in model.subgraphs() {
        for (index, operand) in subgraph.operands.iter().enumerate() {
            check(operand).map_err(|rule| {
                ValidationError::new(
                    Subject::Operand {
                        subgraph: which,
                        index,
                    },
                    rule,
                )
            })?;
        }
    }
    Ok(())
}

// ── Phase 5: operations ────────────────────────────────────────────

fn check_operations<S: GraphState>(
    model: &Model<S>,
    which: SubgraphRef,
    subgraph: &Subgraph,
    ctx: &ValidationContext<'_>,
) -> Result<(), ValidationError> {
    let count = subgraph.operands.len();
    for (index, op) in subgraph.operations.iter().enumerate() {
        let fail = |rule| {
            ValidationError::new(
                Subject::Operation {
                    subgraph: which,
                    index,
                },
                rule,
            )
        };

        let required = op.op_type.min_revision();
        if required > ctx.revision {
            return Err(fail(Rule::OperationNotSupported {
                op_type: op.op_type,
                required,
                revision: ctx.revision,
            }));
        }
        if let Some(&bad) = op
            .inputs
            .iter()
            .chain(&op.outputs)
            .find(|&&i| i as usize >= count)
        {
            return Err(fail(Rule::OperandIndexOutOfRange { index: bad, count }));
        }
        check_control_flow_arity(op, &subgraph.operands, model)
            .map_err(|reason| fail(Rule::ControlFlowArity(reason)))?;
        ctx.operations
            .validate_operation(op, &subgraph.operands, ctx.revision, model)
            .map_err(|reason| fail(Rule::OperationRejected(reason)))?;
    }
    Ok(())
}

/// Operand counts of IF and WHILE against the subgraphs they reference.
///
/// The executor indexes operands by these counts, so they are enforced
/// here regardless of which [`OperationValidator`] is installed.
fn check_control_flow_arity(
    op: &Operation,
    operands: &[Operand],
    subgraphs: &dyn SubgraphAccessor,
) -> Result<(), String> {
    let resolve = |position: usize| -> Result<&Subgraph, String> {
        op.inputs
            .get(position)
            .and_then(|&i| operands.get(i as usize))
            .and_then(|operand| subgraphs.referenced_subgraph(operand))
            .ok_or_else(|| format!("{} input {position} does not name a subgraph", op.op_type))
    };

    match op.op_type {
        OperationType::If => {
            if op.inputs.len() < if_op::FIRST_INPUT || op.outputs.is_empty() {
                return Err(format!(
                    "IF has {} inputs and {} outputs",
                    op.inputs.len(),
                    op.outputs.len()
                ));
            }
            let passed = op.inputs.len() - if_op::FIRST_INPUT;
            for position in [if_op::THEN_MODEL_OPERAND, if_op::ELSE_MODEL_OPERAND] {
                let branch = resolve(position)?;
                if branch.input_indexes.len() != passed
                    || branch.output_indexes.len() != op.outputs.len()
                {
                    return Err(format!(
                        "IF branch {position} is {} -> {}, operation is {passed} -> {}",
                        branch.input_indexes.len(),
                        branch.output_indexes.len(),
                        op.outputs.len()
                    ));
                }
            }
        }
        OperationType::While => {
            if op.inputs.len() <= while_op::FIRST_INPUT || op.outputs.is_empty() {
                return Err(format!(
                    "WHILE has {} inputs and {} outputs",
                    op.inputs.len(),
                    op.outputs.len()
                ));
            }
            let carried = op.inputs.len() - while_op::FIRST_INPUT;
            let cond = resolve(while_op::COND_MODEL_OPERAND)?;
            if cond.input_indexes.len() != carried || cond.output_indexes.len() != 1 {
                return Err(format!(
                    "WHILE condition is {} -> {}, expected {carried} -> 1",
                    cond.input_indexes.len(),
                    cond.output_indexes.len()
                ));
            }
            let body = resolve(while_op::BODY_MODEL_OPERAND)?;
            let produced = body.output_indexes.len();
            if body.input_indexes.len() != carried
                || produced > carried
                || produced < op.outputs.len()
            {
                return Err(format!(
                    "WHILE body is {} -> {produced}, operation carries {carried} and returns {}",
                    body.input_indexes.len(),
                    op.outputs.len()
                ));
            }
        }
        _ => {}
    }
    Ok(())
}
