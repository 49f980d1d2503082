// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Request validation against a validated model.

use super::{Rule, Subject, ValidationError};
use crate::{MemoryPool, Model, Operand, Request, RequestArgument, Validated};
use nn_core::{byte_size, combine_dimensions, is_fully_specified};

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Input,
    Output,
}

/// Checks a request against the main subgraph of `model`.
///
/// Token pools are only checked for location shape here; whether the
/// token names a live, compatible buffer is the registry's call.
/// Output arguments whose pool is too small are accepted: that is
/// reported at execution time as an insufficient-size result.
pub fn validate_request(
    request: &Request,
    model: &Model<Validated>,
    allow_unspecified_output: bool,
) -> Result<(), ValidationError> {
    check_arguments(
        request,
        &request.inputs,
        &model.main.input_indexes,
        &model.main.operands,
        Direction::Input,
        allow_unspecified_output,
    )?;
    check_arguments(
        request,
        &request.outputs,
        &model.main.output_indexes,
        &model.main.operands,
        Direction::Output,
        allow_unspecified_output,
    )
}

fn check_arguments(
    request: &Request,
    args: &[RequestArgument],
    indexes: &[u32],
    operands: &[Operand],
    direction: Direction,
    allow_unspecified_output: bool,
) -> Result<(), ValidationError> {
    if args.len() != indexes.len() {
        return Err(ValidationError::new(
            Subject::Model,
            Rule::ArgumentCountMismatch {
                expected: indexes.len(),
                actual: args.len(),
            },
        ));
    }

    for (i, (arg, &index)) in args.iter().zip(indexes).enumerate() {
        let subject = match direction {
            Direction::Input => Subject::RequestInput(i),
            Direction::Output => Subject::RequestOutput(i),
        };
        let operand = &operands[index as usize];
        check_argument(request, arg, operand, direction, allow_unspecified_output)
            .map_err(|rule| ValidationError::new(subject, rule))?;
    }
    Ok(())
}

fn check_argument(
    request: &Request,
    arg: &RequestArgument,
    operand: &Operand,
    direction: Direction,
    allow_unspecified_output: bool,
) -> Result<(), Rule> {
    if arg.has_no_value {
        if !arg.location.is_empty() || !arg.dimensions.is_empty() {
            return Err(Rule::NoValueWithLocation);
        }
        return Ok(());
    }

    let loc = arg.location;
    let pool = request
        .pools
        .get(loc.pool_index as usize)
        .ok_or(Rule::PoolIndexOutOfRange {
            pool_index: loc.pool_index,
            pools: request.pools.len(),
        })?;
    let provided = match pool {
        MemoryPool::Token(_) => {
            if !arg.covers_whole_pool() {
                return Err(Rule::TokenArgumentLocation);
            }
            None
        }
        MemoryPool::Region(memory) => {
            let available = memory.len() as u64;
            if arg.covers_whole_pool() {
                Some(available)
            } else if !loc.fits_within(available) {
                return Err(Rule::LocationOutOfBounds {
                    offset: loc.offset,
                    length: loc.length,
                    available,
                });
            } else {
                Some(u64::from(loc.length))
            }
        }
    };

    let ty = operand.operand_type;
    let is_tensor = !ty.is_scalar();
    if !is_tensor && !arg.dimensions.is_empty() {
        return Err(Rule::ScalarOverride);
    }
    check_override(&operand.dimensions, &arg.dimensions)?;

    let dims = combine_dimensions(&operand.dimensions, &arg.dimensions).unwrap_or_default();
    if !is_fully_specified(is_tensor, &dims) {
        match direction {
            Direction::Input => return Err(Rule::UnspecifiedInput),
            Direction::Output if !allow_unspecified_output => return Err(Rule::UnspecifiedOutput),
            Direction::Output => return Ok(()),
        }
    }

    if direction == Direction::Input {
        if let (Some(provided), Some(element)) = (provided, ty.element_size()) {
            let required = byte_size(element, ty.is_scalar(), &dims).ok_or(Rule::ByteSizeOverflow)?;
            if provided < u64::from(required) {
                return Err(Rule::InsufficientArgumentLength { required, provided });
            }
        }
    }
    Ok(())
}

fn check_override(declared: &[u32], requested: &[u32]) -> Result<(), Rule> {
    if requested.is_empty() || declared.is_empty() {
        return Ok(());
    }
    if declared.len() != requested.len() {
        return Err(Rule::OverrideRankMismatch {
            expected: declared.len(),
            actual: requested.len(),
        });
    }
    for (axis, (&d, &r)) in declared.iter().zip(requested).enumerate() {
        if d != 0 && d != r {
            return Err(Rule::OverrideDimensionMismatch {
                axis,
                expected: d,
                actual: r,
            });
        }
    }
    Ok(())
}
