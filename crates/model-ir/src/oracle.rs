// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-opcode validation rules.
//!
//! Graph validation delegates the signature of each operation to an
//! [`OperationValidator`]. [`ReferenceOperationValidator`] covers the
//! opcodes the reference kernels implement plus the two control-flow
//! opcodes, whose rules reach into referenced subgraphs through a
//! [`SubgraphAccessor`].

use crate::operation::{if_op, while_op};
use crate::{GraphState, Model, Operand, Operation, OperationType, Subgraph};
use nn_core::{OperandType, Revision};

/// Resolves a subgraph-reference operand to the subgraph it names.
pub trait SubgraphAccessor {
    fn referenced_subgraph(&self, operand: &Operand) -> Option<&Subgraph>;
}

impl<S: GraphState> SubgraphAccessor for Model<S> {
    fn referenced_subgraph(&self, operand: &Operand) -> Option<&Subgraph> {
        operand.subgraph_index().and_then(|i| self.referenced.get(i))
    }
}

/// Checks one operation's inputs and outputs. Errors are human-readable
/// reasons; operand indices are already known to be in range.
pub trait OperationValidator: Send + Sync {
    fn validate_operation(
        &self,
        operation: &Operation,
        operands: &[Operand],
        revision: Revision,
        subgraphs: &dyn SubgraphAccessor,
    ) -> Result<(), String>;
}

/// Rules for the built-in opcode set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceOperationValidator;

impl OperationValidator for ReferenceOperationValidator {
    fn validate_operation(
        &self,
        operation: &Operation,
        operands: &[Operand],
        revision: Revision,
        subgraphs: &dyn SubgraphAccessor,
    ) -> Result<(), String> {
        let sig = Signature { operation, operands };
        match operation.op_type {
            OperationType::Add | OperationType::Sub | OperationType::Mul => {
                sig.counts(3, 1)?;
                let ty = sig.input(0)?.operand_type;
                sig.tensor_of(ty, arithmetic_types(revision))?;
                sig.input_type(1, ty)?;
                sig.input_type(2, OperandType::Int32)?;
                sig.output_type(0, ty)
            }
            OperationType::Maximum => {
                sig.counts(2, 1)?;
                let ty = sig.input(0)?.operand_type;
                sig.tensor_of(ty, arithmetic_types(revision))?;
                sig.input_type(1, ty)?;
                sig.output_type(0, ty)
            }
            OperationType::Less => {
                sig.counts(2, 1)?;
                let ty = sig.input(0)?.operand_type;
                sig.tensor_of(ty, arithmetic_types(revision))?;
                sig.input_type(1, ty)?;
                sig.output_type(0, OperandType::TensorBool8)
            }
            OperationType::Relu => {
                sig.counts(1, 1)?;
                let ty = sig.input(0)?.operand_type;
                sig.tensor_of(ty, &[OperandType::TensorFloat32, OperandType::TensorQuant8Asymm])?;
                sig.output_type(0, ty)
            }
            OperationType::Softmax => {
                let inputs = operation.inputs.len();
                if inputs == 3 && revision < Revision::V1_2 {
                    return Err("SOFTMAX axis input requires revision 1.2".into());
                }
                if !(2..=3).contains(&inputs) || operation.outputs.len() != 1 {
                    return Err(format!(
                        "SOFTMAX expects 2 or 3 inputs and 1 output, got {inputs} and {}",
                        operation.outputs.len()
                    ));
                }
                let ty = sig.input(0)?.operand_type;
                sig.tensor_of(ty, &[OperandType::TensorFloat32, OperandType::TensorQuant8Asymm])?;
                sig.input_type(1, OperandType::Float32)?;
                if inputs == 3 {
                    sig.input_type(2, OperandType::Int32)?;
                }
                sig.output_type(0, ty)
            }
            OperationType::If => validate_if(&sig, subgraphs),
            OperationType::While => validate_while(&sig, subgraphs),
        }
    }
}

fn arithmetic_types(revision: Revision) -> &'static [OperandType] {
    if revision >= Revision::V1_2 {
        &[
            OperandType::TensorFloat32,
            OperandType::TensorQuant8Asymm,
            OperandType::TensorInt32,
        ]
    } else {
        &[OperandType::TensorFloat32, OperandType::TensorQuant8Asymm]
    }
}

// ── Signature helpers ──────────────────────────────────────────────

struct Signature<'a> {
    operation: &'a Operation,
    operands: &'a [Operand],
}

impl<'a> Signature<'a> {
    fn name(&self) -> &'static str {
        self.operation.op_type.as_str()
    }

    fn counts(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        let (i, o) = (self.operation.inputs.len(), self.operation.outputs.len());
        if i != inputs || o != outputs {
            return Err(format!(
                "{} expects {inputs} inputs and {outputs} outputs, got {i} and {o}",
                self.name()
            ));
        }
        Ok(())
    }

    fn input(&self, i: usize) -> Result<&'a Operand, String> {
        self.operation
            .inputs
            .get(i)
            .map(|&idx| &self.operands[idx as usize])
            .ok_or_else(|| format!("{} is missing input {i}", self.name()))
    }

    fn output(&self, i: usize) -> Result<&'a Operand, String> {
        self.operation
            .outputs
            .get(i)
            .map(|&idx| &self.operands[idx as usize])
            .ok_or_else(|| format!("{} is missing output {i}", self.name()))
    }

    fn tensor_of(&self, ty: OperandType, allowed: &[OperandType]) -> Result<(), String> {
        if !allowed.contains(&ty) {
            return Err(format!("{} does not support {ty}", self.name()));
        }
        Ok(())
    }

    fn input_type(&self, i: usize, ty: OperandType) -> Result<(), String> {
        let actual = self.input(i)?.operand_type;
        if actual != ty {
            return Err(format!("{} input {i} is {actual}, expected {ty}", self.name()));
        }
        Ok(())
    }

    fn output_type(&self, i: usize, ty: OperandType) -> Result<(), String> {
        let actual = self.output(i)?.operand_type;
        if actual != ty {
            return Err(format!("{} output {i} is {actual}, expected {ty}", self.name()));
        }
        Ok(())
    }

    fn subgraph<'s>(
        &self,
        i: usize,
        subgraphs: &'s dyn SubgraphAccessor,
    ) -> Result<&'s Subgraph, String> {
        let operand = self.input(i)?;
        if operand.operand_type != OperandType::Subgraph {
            return Err(format!("{} input {i} is not a subgraph reference", self.name()));
        }
        subgraphs
            .referenced_subgraph(operand)
            .ok_or_else(|| format!("{} input {i} names a missing subgraph", self.name()))
    }
}

// ── Control flow ───────────────────────────────────────────────────

/// Operand types agree and known axes match; quantization is identical.
pub fn compatible(a: &Operand, b: &Operand) -> bool {
    if a.operand_type != b.operand_type {
        return false;
    }
    if !a.dimensions.is_empty() && !b.dimensions.is_empty() {
        if a.dimensions.len() != b.dimensions.len() {
            return false;
        }
        let axes_agree = a
            .dimensions
            .iter()
            .zip(&b.dimensions)
            .all(|(&x, &y)| x == 0 || y == 0 || x == y);
        if !axes_agree {
            return false;
        }
    }
    a.scale == b.scale && a.zero_point == b.zero_point && a.extra_params == b.extra_params
}

fn is_bool_condition(operand: &Operand) -> bool {
    operand.operand_type == OperandType::TensorBool8 && operand.dimensions == [1]
}

fn validate_if(sig: &Signature<'_>, subgraphs: &dyn SubgraphAccessor) -> Result<(), String> {
    let op = sig.operation;
    if op.inputs.len() < if_op::FIRST_INPUT || op.outputs.is_empty() {
        return Err(format!(
            "IF expects at least {} inputs and 1 output",
            if_op::FIRST_INPUT
        ));
    }
    if !is_bool_condition(sig.input(if_op::COND_BOOL_OPERAND)?) {
        return Err("IF condition must be TENSOR_BOOL8 of shape [1]".into());
    }

    let outer_inputs = op.inputs.len() - if_op::FIRST_INPUT;
    for (label, position) in [
        ("then", if_op::THEN_MODEL_OPERAND),
        ("else", if_op::ELSE_MODEL_OPERAND),
    ] {
        let branch = sig.subgraph(position, subgraphs)?;
        if branch.input_indexes.len() != outer_inputs {
            return Err(format!(
                "IF {label} branch takes {} inputs, operation passes {outer_inputs}",
                branch.input_indexes.len()
            ));
        }
        if branch.output_indexes.len() != op.outputs.len() {
            return Err(format!(
                "IF {label} branch produces {} outputs, operation expects {}",
                branch.output_indexes.len(),
                op.outputs.len()
            ));
        }
        for i in 0..outer_inputs {
            let outer = sig.input(if_op::FIRST_INPUT + i)?;
            if !branch.input_operand(i).is_some_and(|inner| compatible(outer, inner)) {
                return Err(format!("IF {label} branch input {i} is incompatible"));
            }
        }
        for i in 0..op.outputs.len() {
            let outer = sig.output(i)?;
            if !branch.output_operand(i).is_some_and(|inner| compatible(outer, inner)) {
                return Err(format!("IF {label} branch output {i} is incompatible"));
            }
        }
    }
    Ok(())
}

fn validate_while(sig: &Signature<'_>, subgraphs: &dyn SubgraphAccessor) -> Result<(), String> {
    let op = sig.operation;
    if op.inputs.len() < while_op::FIRST_INPUT + 1 || op.outputs.is_empty() {
        return Err(format!(
            "WHILE expects at least {} inputs and 1 output",
            while_op::FIRST_INPUT + 1
        ));
    }
    let outer_inputs = op.inputs.len() - while_op::FIRST_INPUT;
    let outputs = op.outputs.len();

    let cond = sig.subgraph(while_op::COND_MODEL_OPERAND, subgraphs)?;
    if cond.input_indexes.len() != outer_inputs {
        return Err(format!(
            "WHILE condition takes {} inputs, operation passes {outer_inputs}",
            cond.input_indexes.len()
        ));
    }
    if cond.output_indexes.len() != 1 || !cond.output_operand(0).is_some_and(is_bool_condition) {
        return Err("WHILE condition must produce one TENSOR_BOOL8 of shape [1]".into());
    }
    for i in 0..outer_inputs {
        let outer = sig.input(while_op::FIRST_INPUT + i)?;
        if !cond.input_operand(i).is_some_and(|inner| compatible(outer, inner)) {
            return Err(format!("WHILE condition input {i} is incompatible"));
        }
    }

    let body = sig.subgraph(while_op::BODY_MODEL_OPERAND, subgraphs)?;
    if body.input_indexes.len() != outer_inputs {
        return Err(format!(
            "WHILE body takes {} inputs, operation passes {outer_inputs}",
            body.input_indexes.len()
        ));
    }
    let body_outputs = body.output_indexes.len();
    if body_outputs < outputs || body_outputs > outer_inputs {
        return Err(format!(
            "WHILE body produces {body_outputs} outputs, needs between {outputs} and {outer_inputs}"
        ));
    }
    for i in 0..outer_inputs {
        let outer = sig.input(while_op::FIRST_INPUT + i)?;
        if !body.input_operand(i).is_some_and(|inner| compatible(outer, inner)) {
            return Err(format!("WHILE body input {i} is incompatible"));
        }
    }
    for i in 0..outputs {
        let outer = sig.output(i)?;
        if !body.output_operand(i).is_some_and(|inner| compatible(outer, inner)) {
            return Err(format!("WHILE output {i} is incompatible with body output"));
        }
    }
    // Body outputs feed the next iteration's loop-carried inputs.
    for i in 0..body_outputs {
        let carried = body.input_operand(i);
        let produced = body.output_operand(i);
        if !matches!((carried, produced), (Some(a), Some(b)) if compatible(a, b)) {
            return Err(format!("WHILE body output {i} cannot feed body input {i}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lifetime;

    fn f32_tensor(dims: Vec<u32>, lifetime: Lifetime) -> Operand {
        Operand::tensor(OperandType::TensorFloat32, dims, lifetime)
    }

    fn passthrough() -> Subgraph {
        Subgraph {
            operands: vec![
                f32_tensor(vec![2], Lifetime::SubgraphInput).with_consumers(1),
                f32_tensor(vec![2], Lifetime::SubgraphOutput),
            ],
            operations: vec![Operation::new(OperationType::Relu, vec![0], vec![1])],
            input_indexes: vec![0],
            output_indexes: vec![1],
        }
    }

    fn if_operands() -> Vec<Operand> {
        vec![
            Operand::tensor(OperandType::TensorBool8, vec![1], Lifetime::SubgraphInput),
            Operand::subgraph_reference(0),
            Operand::subgraph_reference(1),
            f32_tensor(vec![2], Lifetime::SubgraphInput),
            f32_tensor(vec![2], Lifetime::SubgraphOutput),
        ]
    }

    fn check(op: &Operation, operands: &[Operand], model: &Model) -> Result<(), String> {
        ReferenceOperationValidator.validate_operation(op, operands, Revision::V1_3, model)
    }

    #[test]
    fn test_compatible() {
        let a = f32_tensor(vec![2, 0], Lifetime::Temporary);
        assert!(compatible(&a, &f32_tensor(vec![2, 5], Lifetime::Temporary)));
        assert!(compatible(&a, &f32_tensor(vec![], Lifetime::Temporary)));
        assert!(!compatible(&a, &f32_tensor(vec![3, 5], Lifetime::Temporary)));
        assert!(!compatible(&a, &f32_tensor(vec![2], Lifetime::Temporary)));
        assert!(!compatible(&a, &a.clone().with_quant(0.5, 0)));
    }

    #[test]
    fn test_add_signature() {
        let operands = vec![
            f32_tensor(vec![2], Lifetime::SubgraphInput),
            f32_tensor(vec![2], Lifetime::SubgraphInput),
            Operand::scalar(OperandType::Int32, Lifetime::EmbeddedConstant),
            f32_tensor(vec![2], Lifetime::SubgraphOutput),
        ];
        let model = Model::new(Subgraph::default());
        let add = Operation::new(OperationType::Add, vec![0, 1, 2], vec![3]);
        assert!(check(&add, &operands, &model).is_ok());

        let missing_activation = Operation::new(OperationType::Add, vec![0, 1], vec![3]);
        assert!(check(&missing_activation, &operands, &model).is_err());

        let wrong_activation = Operation::new(OperationType::Add, vec![0, 1, 0], vec![3]);
        assert!(check(&wrong_activation, &operands, &model)
            .unwrap_err()
            .contains("input 2"));
    }

    #[test]
    fn test_less_outputs_bool() {
        let mut operands = vec![
            f32_tensor(vec![1], Lifetime::SubgraphInput),
            f32_tensor(vec![1], Lifetime::SubgraphInput),
            Operand::tensor(OperandType::TensorBool8, vec![1], Lifetime::SubgraphOutput),
        ];
        let model = Model::new(Subgraph::default());
        let less = Operation::new(OperationType::Less, vec![0, 1], vec![2]);
        assert!(check(&less, &operands, &model).is_ok());
        operands[2].operand_type = OperandType::TensorFloat32;
        assert!(check(&less, &operands, &model).is_err());
    }

    #[test]
    fn test_softmax_axis_revision() {
        let operands = vec![
            f32_tensor(vec![4], Lifetime::SubgraphInput),
            Operand::scalar(OperandType::Float32, Lifetime::EmbeddedConstant),
            Operand::scalar(OperandType::Int32, Lifetime::EmbeddedConstant),
            f32_tensor(vec![4], Lifetime::SubgraphOutput),
        ];
        let model = Model::new(Subgraph::default());
        let op = Operation::new(OperationType::Softmax, vec![0, 1, 2], vec![3]);
        assert!(ReferenceOperationValidator
            .validate_operation(&op, &operands, Revision::V1_1, &model)
            .is_err());
        assert!(check(&op, &operands, &model).is_ok());
    }

    #[test]
    fn test_if_signature() {
        let model = Model::new(Subgraph::default()).with_referenced(vec![passthrough(), passthrough()]);
        let op = Operation::new(OperationType::If, vec![0, 1, 2, 3], vec![4]);
        assert!(check(&op, &if_operands(), &model).is_ok());

        let mut operands = if_operands();
        operands[0].dimensions = vec![2];
        assert!(check(&op, &operands, &model).unwrap_err().contains("condition"));

        let too_many = Operation::new(OperationType::If, vec![0, 1, 2, 3, 3], vec![4]);
        assert!(check(&too_many, &if_operands(), &model).is_err());
    }

    #[test]
    fn test_if_branch_type_mismatch() {
        let mut other = passthrough();
        for o in &mut other.operands {
            o.operand_type = OperandType::TensorQuant8Asymm;
            o.scale = 1.0;
        }
        let model = Model::new(Subgraph::default()).with_referenced(vec![passthrough(), other]);
        let op = Operation::new(OperationType::If, vec![0, 1, 2, 3], vec![4]);
        assert!(check(&op, &if_operands(), &model).unwrap_err().contains("else"));
    }

    fn while_cond() -> Subgraph {
        Subgraph {
            operands: vec![
                f32_tensor(vec![1], Lifetime::SubgraphInput).with_consumers(1),
                f32_tensor(vec![1], Lifetime::EmbeddedConstant).with_consumers(1),
                Operand::tensor(OperandType::TensorBool8, vec![1], Lifetime::SubgraphOutput),
            ],
            operations: vec![Operation::new(OperationType::Less, vec![0, 1], vec![2])],
            input_indexes: vec![0],
            output_indexes: vec![2],
        }
    }

    fn while_body() -> Subgraph {
        Subgraph {
            operands: vec![
                f32_tensor(vec![1], Lifetime::SubgraphInput).with_consumers(1),
                f32_tensor(vec![1], Lifetime::SubgraphOutput),
            ],
            operations: vec![Operation::new(OperationType::Relu, vec![0], vec![1])],
            input_indexes: vec![0],
            output_indexes: vec![1],
        }
    }

    #[test]
    fn test_while_signature() {
        let model = Model::new(Subgraph::default()).with_referenced(vec![while_cond(), while_body()]);
        let operands = vec![
            Operand::subgraph_reference(0),
            Operand::subgraph_reference(1),
            f32_tensor(vec![1], Lifetime::SubgraphInput),
            f32_tensor(vec![1], Lifetime::SubgraphOutput),
        ];
        let op = Operation::new(OperationType::While, vec![0, 1, 2], vec![3]);
        assert!(check(&op, &operands, &model).is_ok());

        let swapped = Operation::new(OperationType::While, vec![1, 0, 2], vec![3]);
        assert!(check(&swapped, &operands, &model).is_err());
    }

    #[test]
    fn test_while_body_output_count() {
        let mut body = while_body();
        body.output_indexes.clear();
        let model = Model::new(Subgraph::default()).with_referenced(vec![while_cond(), body]);
        let operands = vec![
            Operand::subgraph_reference(0),
            Operand::subgraph_reference(1),
            f32_tensor(vec![1], Lifetime::SubgraphInput),
            f32_tensor(vec![1], Lifetime::SubgraphOutput),
        ];
        let op = Operation::new(OperationType::While, vec![0, 1, 2], vec![3]);
        assert!(check(&op, &operands, &model).unwrap_err().contains("body produces"));
    }
}
