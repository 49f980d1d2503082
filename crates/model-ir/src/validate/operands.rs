// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-operand checks: type legality, dimensions, quantization, locations.

use super::{Rule, ValidationContext};
use crate::{ChannelQuantParams, ExtraParams, GraphState, Lifetime, Model, Operand};
use nn_core::{is_fully_specified, specified_size_overflows, OperandType};

// ── Phase 1: type legality ─────────────────────────────────────────

pub(super) fn check_type(operand: &Operand, ctx: &ValidationContext<'_>) -> Result<(), Rule> {
    let ty = operand.operand_type;
    match ty {
        OperandType::Extension(_) => {
            if !ctx.revision.allows_extensions() {
                return Err(Rule::TypeNotSupported {
                    operand_type: ty,
                    required: ty.min_revision(),
                    revision: ctx.revision,
                });
            }
            if ctx.extensions.lookup(ty).is_none() {
                return Err(Rule::UnknownExtension(ty));
            }
        }
        _ if ty.min_revision() > ctx.revision => {
            return Err(Rule::TypeNotSupported {
                operand_type: ty,
                required: ty.min_revision(),
                revision: ctx.revision,
            });
        }
        _ => {}
    }
    Ok(())
}

// ── Phase 2: dimensions vs lifetime ────────────────────────────────

pub(super) fn check_dimensions(operand: &Operand, ctx: &ValidationContext<'_>) -> Result<(), Rule> {
    let is_tensor = operand
        .is_tensor(ctx.extensions)
        .ok_or(Rule::UnknownExtension(operand.operand_type))?;

    if !is_tensor {
        if !operand.dimensions.is_empty() {
            return Err(Rule::ScalarHasDimensions);
        }
        return Ok(());
    }

    if !is_fully_specified(true, &operand.dimensions)
        && (operand.lifetime.is_constant() || !ctx.revision.allows_unspecified_dimensions())
    {
        return Err(Rule::UnspecifiedDimensions);
    }

    let element_size = match operand.operand_type.element_size() {
        Some(size) => size,
        None => ctx
            .extensions
            .lookup(operand.operand_type)
            .map(|info| info.byte_size)
            .ok_or(Rule::UnknownExtension(operand.operand_type))?,
    };
    if specified_size_overflows(element_size, &operand.dimensions) {
        return Err(Rule::ByteSizeOverflow);
    }
    Ok(())
}

// ── Phase 3: quantization ──────────────────────────────────────────

pub(super) fn check_quantization(operand: &Operand) -> Result<(), Rule> {
    use OperandType::*;

    match operand.operand_type {
        TensorQuant8Asymm => check_asymm(operand, 0, 255)?,
        TensorQuant8AsymmSigned => check_asymm(operand, -128, 127)?,
        TensorQuant16Asymm => check_asymm(operand, 0, 65535)?,
        TensorQuant8Symm | TensorQuant16Symm => check_asymm(operand, 0, 0)?,
        TensorInt32 => {
            if operand.scale < 0.0 || operand.scale.is_nan() {
                return Err(Rule::InvalidScale(operand.scale));
            }
            if operand.zero_point != 0 {
                return Err(zero_point_rule(operand.zero_point, 0, 0));
            }
        }
        _ => {
            if operand.scale != 0.0 || operand.zero_point != 0 {
                return Err(Rule::UnexpectedQuantParams);
            }
        }
    }

    match (&operand.extra_params, operand.operand_type) {
        (ExtraParams::ChannelQuant(params), TensorQuant8SymmPerChannel) => {
            check_channel_quant(operand, params)
        }
        (_, TensorQuant8SymmPerChannel) => Err(Rule::InvalidChannelQuant(
            "per-channel operand is missing its channel parameters".into(),
        )),
        (ExtraParams::None, _) | (ExtraParams::Extension(_), Extension(_)) => Ok(()),
        _ => Err(Rule::UnexpectedExtraParams),
    }
}

fn check_asymm(operand: &Operand, min: i64, max: i64) -> Result<(), Rule> {
    let zp = i64::from(operand.zero_point);
    if zp < min || zp > max {
        return Err(zero_point_rule(operand.zero_point, min, max));
    }
    // NaN fails this comparison too.
    if !(operand.scale > 0.0) {
        return Err(Rule::InvalidScale(operand.scale));
    }
    Ok(())
}

fn zero_point_rule(zero_point: i32, min: i64, max: i64) -> Rule {
    Rule::InvalidZeroPoint {
        zero_point,
        min,
        max,
    }
}

fn check_channel_quant(operand: &Operand, params: &ChannelQuantParams) -> Result<(), Rule> {
    let dims = &operand.dimensions;
    let channel_dim = params.channel_dim as usize;
    let Some(&channels) = dims.get(channel_dim) else {
        return Err(Rule::InvalidChannelQuant(format!(
            "channel axis {channel_dim} out of range for rank {}",
            dims.len()
        )));
    };
    if channels == 0 {
        return Err(Rule::InvalidChannelQuant(format!(
            "channel axis {channel_dim} is unspecified"
        )));
    }
    if params.scales.len() != channels as usize {
        return Err(Rule::InvalidChannelQuant(format!(
            "{} scales for {channels} channels",
            params.scales.len()
        )));
    }
    if let Some((i, s)) = params.scales.iter().enumerate().find(|(_, &s)| !(s > 0.0)) {
        return Err(Rule::InvalidChannelQuant(format!("scale[{i}] = {s} is not positive")));
    }
    Ok(())
}

// ── Phase 4: locations ─────────────────────────────────────────────

pub(super) fn check_location<S: GraphState>(operand: &Operand, model: &Model<S>) -> Result<(), Rule> {
    let is_subgraph_type = operand.operand_type == OperandType::Subgraph;
    let is_subgraph_lifetime = operand.lifetime == Lifetime::SubgraphReference;
    if is_subgraph_type != is_subgraph_lifetime {
        return Err(Rule::SubgraphTypeLifetimeMismatch);
    }

    let loc = operand.location;
    match operand.lifetime {
        Lifetime::EmbeddedConstant => {
            if loc.pool_index != 0 {
                return Err(Rule::UnexpectedLocation);
            }
            check_bounds(operand, model.operand_values.len() as u64)?;
            check_constant_length(operand)
        }
        Lifetime::ReferencedConstant => {
            let pool = model.pools.get(loc.pool_index as usize).ok_or(
                Rule::PoolIndexOutOfRange {
                    pool_index: loc.pool_index,
                    pools: model.pools.len(),
                },
            )?;
            check_bounds(operand, pool.len() as u64)?;
            check_constant_length(operand)
        }
        Lifetime::SubgraphReference => {
            if loc.pool_index != 0 || loc.length != 0 {
                return Err(Rule::UnexpectedLocation);
            }
            if loc.offset as usize >= model.referenced.len() {
                return Err(Rule::SubgraphIndexOutOfRange {
                    index: loc.offset,
                    count: model.referenced.len(),
                });
            }
            Ok(())
        }
        Lifetime::Temporary
        | Lifetime::SubgraphInput
        | Lifetime::SubgraphOutput
        | Lifetime::NoValue => {
            if !loc.is_empty() {
                return Err(Rule::UnexpectedLocation);
            }
            Ok(())
        }
    }
}

fn check_bounds(operand: &Operand, available: u64) -> Result<(), Rule> {
    let loc = operand.location;
    if !loc.fits_within(available) {
        return Err(Rule::LocationOutOfBounds {
            offset: loc.offset,
            length: loc.length,
            available,
        });
    }
    Ok(())
}

fn check_constant_length(operand: &Operand) -> Result<(), Rule> {
    if operand.operand_type.is_extension() {
        return Ok(());
    }
    let expected = operand.byte_size().ok_or(Rule::ByteSizeOverflow)?;
    if operand.location.length != expected {
        return Err(Rule::LengthMismatch {
            expected,
            actual: operand.location.length,
        });
    }
    Ok(())
}
