// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dataflow, declared-list and subgraph-reference checks.

use super::{Rule, Subject, ValidationError};
use crate::{GraphState, Lifetime, Model, Subgraph, SubgraphRef};
use std::collections::HashSet;

// ── Phase 6: dataflow ──────────────────────────────────────────────

/// Walks operations in order, tracking which operands hold a value.
///
/// Operand indices are assumed in range (checked by the operation phase).
pub(super) fn check_dataflow(which: SubgraphRef, subgraph: &Subgraph) -> Result<(), ValidationError> {
    let operands = &subgraph.operands;
    let mut written: Vec<bool> = operands.iter().map(|o| o.lifetime.is_known_at_start()).collect();
    let mut consumers = vec![0u32; operands.len()];

    for (index, op) in subgraph.operations.iter().enumerate() {
        let subject = Subject::Operation {
            subgraph: which,
            index,
        };
        for &input in &op.inputs {
            if !written[input as usize] {
                return Err(ValidationError::new(
                    subject,
                    Rule::ReadBeforeWritten { operand: input },
                ));
            }
            consumers[input as usize] += 1;
        }
        for &output in &op.outputs {
            let operand = &operands[output as usize];
            if !matches!(operand.lifetime, Lifetime::Temporary | Lifetime::SubgraphOutput) {
                return Err(ValidationError::new(
                    subject,
                    Rule::InvalidOutputLifetime {
                        operand: output,
                        lifetime: operand.lifetime,
                    },
                ));
            }
            if written[output as usize] {
                return Err(ValidationError::new(
                    subject,
                    Rule::WrittenTwice { operand: output },
                ));
            }
            written[output as usize] = true;
        }
    }

    for (index, operand) in operands.iter().enumerate() {
        let subject = Subject::Operand {
            subgraph: which,
            index,
        };
        if !written[index] {
            return Err(ValidationError::new(subject, Rule::NeverWritten));
        }
        if operand.number_of_consumers != consumers[index] {
            return Err(ValidationError::new(
                subject,
                Rule::ConsumerCountMismatch {
                    declared: operand.number_of_consumers,
                    observed: consumers[index],
                },
            ));
        }
    }
    Ok(())
}

// ── Phase 7: declared input/output lists ───────────────────────────

pub(super) fn check_io_lists(which: SubgraphRef, subgraph: &Subgraph) -> Result<(), ValidationError> {
    check_list(
        which,
        subgraph,
        &subgraph.input_indexes,
        Lifetime::SubgraphInput,
        |position| Subject::SubgraphInput {
            subgraph: which,
            position,
        },
    )?;
    check_list(
        which,
        subgraph,
        &subgraph.output_indexes,
        Lifetime::SubgraphOutput,
        |position| Subject::SubgraphOutput {
            subgraph: which,
            position,
        },
    )
}

fn check_list(
    which: SubgraphRef,
    subgraph: &Subgraph,
    list: &[u32],
    expected: Lifetime,
    subject: impl Fn(usize) -> Subject,
) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(list.len());
    for (position, &index) in list.iter().enumerate() {
        let operand = subgraph.operands.get(index as usize).ok_or_else(|| {
            ValidationError::new(
                subject(position),
                Rule::OperandIndexOutOfRange {
                    index,
                    count: subgraph.operands.len(),
                },
            )
        })?;
        if !seen.insert(index) {
            return Err(ValidationError::new(
                subject(position),
                Rule::DuplicateIndex { operand: index },
            ));
        }
        if operand.lifetime != expected {
            return Err(ValidationError::new(
                subject(position),
                Rule::ListedWithWrongLifetime {
                    expected,
                    actual: operand.lifetime,
                },
            ));
        }
    }

    let missing = subgraph
        .operands
        .iter()
        .enumerate()
        .find(|(i, o)| o.lifetime == expected && !seen.contains(&(*i as u32)));
    if let Some((index, _)) = missing {
        return Err(ValidationError::new(
            Subject::Operand {
                subgraph: which,
                index,
            },
            Rule::MissingFromList(expected),
        ));
    }
    Ok(())
}

// ── Phase 8: subgraph references ───────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Unvisited,
    InProgress,
    Done,
}

/// Rejects reference cycles and referenced subgraphs unreachable from main.
pub(super) fn check_references<S: GraphState>(model: &Model<S>) -> Result<(), ValidationError> {
    let mut state = vec![Visit::Unvisited; model.referenced.len()];
    visit(model, &model.main, &mut state)?;

    if let Some(index) = state.iter().position(|&v| v == Visit::Unvisited) {
        return Err(ValidationError::new(
            Subject::Model,
            Rule::UnreachableSubgraph(index),
        ));
    }
    Ok(())
}

fn visit<S: GraphState>(
    model: &Model<S>,
    subgraph: &Subgraph,
    state: &mut [Visit],
) -> Result<(), ValidationError> {
    for child in subgraph.operands.iter().filter_map(|o| o.subgraph_index()) {
        match state[child] {
            Visit::Done => continue,
            Visit::InProgress => {
                return Err(ValidationError::new(
                    Subject::Model,
                    Rule::SubgraphCycle(child),
                ));
            }
            Visit::Unvisited => {
                state[child] = Visit::InProgress;
                visit(model, &model.referenced[child], state)?;
                state[child] = Visit::Done;
            }
        }
    }
    Ok(())
}
