// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-opcode kernel dispatch.
//!
//! The executor hands every non-control-flow operation to a
//! [`KernelDispatcher`]. [`ReferenceKernels`] covers the small opcode set
//! accepted by [`model_ir::ReferenceOperationValidator`]:
//!
//! | opcode  | element types               |
//! |---------|-----------------------------|
//! | ADD, SUB, MUL, MAXIMUM | `TENSOR_FLOAT32`, `TENSOR_INT32` (broadcasting) |
//! | LESS    | `TENSOR_FLOAT32`, `TENSOR_INT32` → `TENSOR_BOOL8` |
//! | RELU    | `TENSOR_FLOAT32`, `TENSOR_QUANT8_ASYMM` |
//! | SOFTMAX | `TENSOR_FLOAT32` |

use crate::OperationContext;
use model_ir::OperationType;
use nn_core::OperandType;

/// Errors reported by a kernel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("no kernel for {0}")]
    UnsupportedOperation(OperationType),

    #[error("unsupported operand type {0}")]
    UnsupportedType(OperandType),

    #[error("input {0} is missing or has no value")]
    MissingInput(usize),

    #[error("output {0} is missing")]
    MissingOutput(usize),

    #[error("output {0} has no buffer; set its shape first")]
    UnallocatedOutput(usize),

    #[error("computed shape {computed:?} is incompatible with declared {declared:?}")]
    IncompatibleShape {
        declared: Vec<u32>,
        computed: Vec<u32>,
    },

    #[error("shapes {lhs:?} and {rhs:?} do not broadcast")]
    BroadcastMismatch { lhs: Vec<u32>, rhs: Vec<u32> },

    #[error("output needs {required} bytes, {provided} provided")]
    InsufficientSize { required: usize, provided: usize },

    #[error("operand size overflows u32")]
    SizeOverflow,

    #[error("invalid fused activation {0}")]
    InvalidActivation(i32),

    #[error("axis {axis} out of range for rank {rank}")]
    InvalidAxis { axis: i32, rank: usize },
}

/// Executes one operation against its operand records.
pub trait KernelDispatcher: Send + Sync {
    fn execute(&self, context: &mut OperationContext<'_, '_>) -> Result<(), KernelError>;
}

/// Plain scalar-loop kernels for the reference opcode set.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceKernels;

impl KernelDispatcher for ReferenceKernels {
    fn execute(&self, ctx: &mut OperationContext<'_, '_>) -> Result<(), KernelError> {
        match ctx.operation().op_type {
            OperationType::Add => arithmetic(ctx, |a, b| a + b, |a, b| a.wrapping_add(b)),
            OperationType::Sub => arithmetic(ctx, |a, b| a - b, |a, b| a.wrapping_sub(b)),
            OperationType::Mul => arithmetic(ctx, |a, b| a * b, |a, b| a.wrapping_mul(b)),
            OperationType::Maximum => maximum(ctx),
            OperationType::Less => less(ctx),
            OperationType::Relu => relu(ctx),
            OperationType::Softmax => softmax(ctx),
            op @ (OperationType::If | OperationType::While) => {
                Err(KernelError::UnsupportedOperation(op))
            }
        }
    }
}

// ── Broadcasting ───────────────────────────────────────────────────

/// Right-aligned broadcast of two shapes.
pub fn broadcast_shape(lhs: &[u32], rhs: &[u32]) -> Option<Vec<u32>> {
    let rank = lhs.len().max(rhs.len());
    let axis = |dims: &[u32], i: usize| {
        let pad = rank - dims.len();
        if i < pad {
            1
        } else {
            dims[i - pad]
        }
    };
    (0..rank)
        .map(|i| match (axis(lhs, i), axis(rhs, i)) {
            (a, b) if a == b => Some(a),
            (1, b) => Some(b),
            (a, 1) => Some(a),
            _ => None,
        })
        .collect()
}

/// Flat index into a (possibly broadcast) operand for each output element.
fn broadcast_indices(dims: &[u32], out: &[u32]) -> Vec<usize> {
    let pad = out.len() - dims.len();
    let mut strides = vec![0usize; out.len()];
    let mut stride = 1usize;
    for i in (0..dims.len()).rev() {
        if dims[i] != 1 {
            strides[i + pad] = stride;
        }
        stride *= dims[i] as usize;
    }

    let total: usize = out.iter().map(|&d| d as usize).product();
    let mut indices = Vec::with_capacity(total);
    let mut coord = vec![0u32; out.len()];
    for _ in 0..total {
        indices.push(coord.iter().zip(&strides).map(|(&c, &s)| c as usize * s).sum());
        for axis in (0..out.len()).rev() {
            coord[axis] += 1;
            if coord[axis] < out[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
    indices
}

fn zip_broadcast<T: Copy, U>(
    lhs: &[T],
    lhs_dims: &[u32],
    rhs: &[T],
    rhs_dims: &[u32],
    out_dims: &[u32],
    f: impl Fn(T, T) -> U,
) -> Option<Vec<U>> {
    let li = broadcast_indices(lhs_dims, out_dims);
    let ri = broadcast_indices(rhs_dims, out_dims);
    li.iter()
        .zip(&ri)
        .map(|(&l, &r)| Some(f(*lhs.get(l)?, *rhs.get(r)?)))
        .collect()
}

/// Shape of the broadcast output of inputs 0 and 1; sets output 0.
fn binary_output_shape(ctx: &mut OperationContext<'_, '_>) -> Result<Vec<u32>, KernelError> {
    let lhs = ctx.input(0)?.dimensions.clone();
    let rhs = ctx.input(1)?.dimensions.clone();
    let out = broadcast_shape(&lhs, &rhs).ok_or(KernelError::BroadcastMismatch { lhs, rhs })?;
    ctx.set_output_shape(0, &out)?;
    Ok(out)
}

// ── Kernels ────────────────────────────────────────────────────────

fn check_activation(code: i32) -> Result<i32, KernelError> {
    match code {
        0..=3 => Ok(code),
        other => Err(KernelError::InvalidActivation(other)),
    }
}

/// NONE, RELU, RELU1 and RELU6, by code.
fn activate(code: i32, x: f32) -> f32 {
    match code {
        1 => x.max(0.0),
        2 => x.clamp(-1.0, 1.0),
        3 => x.clamp(0.0, 6.0),
        _ => x,
    }
}

fn arithmetic(
    ctx: &mut OperationContext<'_, '_>,
    float_op: fn(f32, f32) -> f32,
    int_op: fn(i32, i32) -> i32,
) -> Result<(), KernelError> {
    let ty = ctx.input(0)?.operand_type;
    let activation = ctx.scalar_i32(2)?;
    let out_dims = binary_output_shape(ctx)?;
    let lhs_dims = ctx.input(0)?.dimensions.clone();
    let rhs_dims = ctx.input(1)?.dimensions.clone();
    let mismatch = || KernelError::BroadcastMismatch {
        lhs: lhs_dims.clone(),
        rhs: rhs_dims.clone(),
    };

    match ty {
        OperandType::TensorFloat32 => {
            let code = check_activation(activation)?;
            let (a, b) = (ctx.input_f32s(0)?, ctx.input_f32s(1)?);
            let out = zip_broadcast(&a, &lhs_dims, &b, &rhs_dims, &out_dims, |x, y| {
                activate(code, float_op(x, y))
            })
            .ok_or_else(mismatch)?;
            ctx.write_output_f32s(0, &out)
        }
        OperandType::TensorInt32 => {
            if activation != 0 {
                return Err(KernelError::InvalidActivation(activation));
            }
            let (a, b) = (ctx.input_i32s(0)?, ctx.input_i32s(1)?);
            let out = zip_broadcast(&a, &lhs_dims, &b, &rhs_dims, &out_dims, int_op)
                .ok_or_else(mismatch)?;
            ctx.write_output_i32s(0, &out)
        }
        other => Err(KernelError::UnsupportedType(other)),
    }
}

fn maximum(ctx: &mut OperationContext<'_, '_>) -> Result<(), KernelError> {
    let ty = ctx.input(0)?.operand_type;
    let out_dims = binary_output_shape(ctx)?;
    let lhs_dims = ctx.input(0)?.dimensions.clone();
    let rhs_dims = ctx.input(1)?.dimensions.clone();
    let mismatch = || KernelError::BroadcastMismatch {
        lhs: lhs_dims.clone(),
        rhs: rhs_dims.clone(),
    };

    match ty {
        OperandType::TensorFloat32 => {
            let (a, b) = (ctx.input_f32s(0)?, ctx.input_f32s(1)?);
            let out = zip_broadcast(&a, &lhs_dims, &b, &rhs_dims, &out_dims, f32::max)
                .ok_or_else(mismatch)?;
            ctx.write_output_f32s(0, &out)
        }
        OperandType::TensorInt32 => {
            let (a, b) = (ctx.input_i32s(0)?, ctx.input_i32s(1)?);
            let out = zip_broadcast(&a, &lhs_dims, &b, &rhs_dims, &out_dims, i32::max)
                .ok_or_else(mismatch)?;
            ctx.write_output_i32s(0, &out)
        }
        other => Err(KernelError::UnsupportedType(other)),
    }
}

fn less(ctx: &mut OperationContext<'_, '_>) -> Result<(), KernelError> {
    let ty = ctx.input(0)?.operand_type;
    let out_dims = binary_output_shape(ctx)?;
    let lhs_dims = ctx.input(0)?.dimensions.clone();
    let rhs_dims = ctx.input(1)?.dimensions.clone();
    let mismatch = || KernelError::BroadcastMismatch {
        lhs: lhs_dims.clone(),
        rhs: rhs_dims.clone(),
    };

    let out = match ty {
        OperandType::TensorFloat32 => {
            let (a, b) = (ctx.input_f32s(0)?, ctx.input_f32s(1)?);
            zip_broadcast(&a, &lhs_dims, &b, &rhs_dims, &out_dims, |x, y| u8::from(x < y))
        }
        OperandType::TensorInt32 => {
            let (a, b) = (ctx.input_i32s(0)?, ctx.input_i32s(1)?);
            zip_broadcast(&a, &lhs_dims, &b, &rhs_dims, &out_dims, |x, y| u8::from(x < y))
        }
        other => return Err(KernelError::UnsupportedType(other)),
    }
    .ok_or_else(mismatch)?;
    ctx.write_output_bytes(0, &out)
}

fn relu(ctx: &mut OperationContext<'_, '_>) -> Result<(), KernelError> {
    let input = ctx.input(0)?;
    let (ty, dims, zero_point) = (input.operand_type, input.dimensions.clone(), input.zero_point);
    ctx.set_output_shape(0, &dims)?;
    match ty {
        OperandType::TensorFloat32 => {
            let out: Vec<f32> = ctx.input_f32s(0)?.into_iter().map(|x| x.max(0.0)).collect();
            ctx.write_output_f32s(0, &out)
        }
        OperandType::TensorQuant8Asymm => {
            // Zero in the quantized domain is the zero point.
            let floor = zero_point.clamp(0, 255) as u8;
            let out: Vec<u8> = ctx.input_bytes(0)?.iter().map(|&q| q.max(floor)).collect();
            ctx.write_output_bytes(0, &out)
        }
        other => Err(KernelError::UnsupportedType(other)),
    }
}

/// Softmax along `axis` (last by default): `exp(beta * (x - max)) / sum`.
fn softmax(ctx: &mut OperationContext<'_, '_>) -> Result<(), KernelError> {
    let input = ctx.input(0)?;
    let (ty, dims) = (input.operand_type, input.dimensions.clone());
    if ty != OperandType::TensorFloat32 {
        return Err(KernelError::UnsupportedType(ty));
    }
    let beta = ctx.scalar_f32(1)?;
    let axis = if ctx.num_inputs() > 2 && !ctx.is_omitted_input(2) {
        ctx.scalar_i32(2)?
    } else {
        -1
    };
    let rank = dims.len();
    let resolved = if axis < 0 { axis + rank as i32 } else { axis };
    if rank == 0 || resolved < 0 || resolved as usize >= rank {
        return Err(KernelError::InvalidAxis { axis, rank });
    }
    let resolved = resolved as usize;

    ctx.set_output_shape(0, &dims)?;
    let src = ctx.input_f32s(0)?;
    let axis_len = dims[resolved] as usize;
    let inner: usize = dims[resolved + 1..].iter().map(|&d| d as usize).product();
    let outer: usize = dims[..resolved].iter().map(|&d| d as usize).product();
    let mut dst = vec![0.0f32; src.len()];

    for o in 0..outer {
        for i in 0..inner {
            let at = |k: usize| o * axis_len * inner + k * inner + i;

            // Subtract the max for numerical stability.
            let max_val = (0..axis_len)
                .map(|k| src[at(k)])
                .fold(f32::NEG_INFINITY, f32::max);

            let mut sum = 0.0f32;
            for k in 0..axis_len {
                let e = ((src[at(k)] - max_val) * beta).exp();
                dst[at(k)] = e;
                sum += e;
            }
            if sum > 0.0 {
                let inv_sum = 1.0 / sum;
                for k in 0..axis_len {
                    dst[at(k)] *= inv_sum;
                }
            }
        }
    }
    ctx.write_output_f32s(0, &dst)
}
