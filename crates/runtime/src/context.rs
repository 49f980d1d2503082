// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-operand execution records and the view kernels get of them.
//!
//! Every operand of a running subgraph has one [`OperandRecord`]. Constants
//! borrow their bytes from the model; everything else owns a buffer. A
//! kernel sees only the records of its own operation through an
//! [`OperationContext`].

use crate::KernelError;
use model_ir::{Lifetime, Operand, Operation};
use nn_core::{byte_size, combine_dimensions, ExtensionTypeInfo, OperandType};
use std::borrow::Cow;

/// Execution state of one operand.
#[derive(Debug, Clone)]
pub struct OperandRecord<'m> {
    pub operand_type: OperandType,
    /// Current dimensions; refined as shapes are resolved.
    pub dimensions: Vec<u32>,
    pub scale: f32,
    pub zero_point: i32,
    pub lifetime: Lifetime,
    /// Size class of an extension `operand_type`, from the driver's registry.
    pub extension: Option<ExtensionTypeInfo>,
    /// Remaining consumers before a temporary's buffer is freed.
    pub(crate) uses_left: u32,
    pub(crate) buffer: Option<Cow<'m, [u8]>>,
    /// Length of a caller-bound region. Bound buffers are never resized.
    pub(crate) bound_length: Option<usize>,
    pub(crate) is_sufficient: bool,
}

impl<'m> OperandRecord<'m> {
    /// A record with no buffer, initialised from the graph's operand.
    pub(crate) fn from_operand(operand: &Operand) -> Self {
        Self {
            operand_type: operand.operand_type,
            dimensions: operand.dimensions.clone(),
            scale: operand.scale,
            zero_point: operand.zero_point,
            lifetime: operand.lifetime,
            extension: None,
            uses_left: match operand.lifetime {
                Lifetime::Temporary => operand.number_of_consumers,
                _ => 0,
            },
            buffer: None,
            bound_length: None,
            is_sufficient: true,
        }
    }

    /// Attaches the registry entry for an extension operand type.
    pub(crate) fn with_extension(mut self, extension: Option<ExtensionTypeInfo>) -> Self {
        self.extension = extension;
        self
    }

    /// Element size and whether the value is a scalar.
    fn layout(&self) -> Option<(u32, bool)> {
        match self.operand_type.element_size() {
            Some(size) => Some((size, self.operand_type.is_scalar())),
            None => self.extension.map(|info| (info.byte_size, !info.is_tensor)),
        }
    }

    /// The raw buffer, if one is attached.
    pub fn data(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    pub fn is_omitted(&self) -> bool {
        self.lifetime == Lifetime::NoValue
    }

    /// `false` once a caller-bound buffer turned out too small.
    pub fn is_sufficient(&self) -> bool {
        self.is_sufficient
    }

    /// Byte size implied by the current dimensions. `Some(0)` while the
    /// shape is not fully known; `None` for unregistered extension types
    /// or overflow.
    pub fn required_length(&self) -> Option<usize> {
        let (element, is_scalar) = self.layout()?;
        byte_size(element, is_scalar, &self.dimensions).map(|n| n as usize)
    }

    /// Copies type, shape and quantization from `from`, keeping this
    /// record's lifetime and consumer count.
    pub(crate) fn inherit_info(&mut self, from: &OperandRecord<'_>) {
        self.operand_type = from.operand_type;
        self.extension = from.extension;
        self.dimensions = from.dimensions.clone();
        self.scale = from.scale;
        self.zero_point = from.zero_point;
    }

    /// Merges `shape` into the record and makes sure a buffer of the
    /// resulting size is attached.
    ///
    /// Unbound records get a fresh or resized owned buffer. Bound records
    /// keep theirs and fail with [`KernelError::InsufficientSize`] when it
    /// is too small; the dimensions are still committed so the caller can
    /// learn the required shape.
    pub(crate) fn set_shape(&mut self, shape: &[u32]) -> Result<(), KernelError> {
        let merged = combine_dimensions(&self.dimensions, shape).ok_or_else(|| {
            KernelError::IncompatibleShape {
                declared: self.dimensions.clone(),
                computed: shape.to_vec(),
            }
        })?;
        self.dimensions = merged;
        let (element, is_scalar) = self
            .layout()
            .ok_or(KernelError::UnsupportedType(self.operand_type))?;
        let required = byte_size(element, is_scalar, &self.dimensions)
            .ok_or(KernelError::SizeOverflow)? as usize;

        match self.bound_length {
            Some(provided) if provided < required => {
                self.is_sufficient = false;
                Err(KernelError::InsufficientSize { required, provided })
            }
            Some(_) => Ok(()),
            None => {
                let reusable = matches!(&self.buffer, Some(Cow::Owned(v)) if v.len() == required);
                if !reusable {
                    self.buffer = Some(Cow::Owned(vec![0; required]));
                }
                Ok(())
            }
        }
    }

    /// The first `required_length()` bytes, for reading.
    pub(crate) fn value(&self) -> Option<&[u8]> {
        let required = self.required_length()?;
        self.buffer.as_deref()?.get(..required)
    }

    /// The first `required_length()` bytes, for writing.
    pub(crate) fn value_mut(&mut self) -> Option<&mut [u8]> {
        let required = self.required_length()?;
        self.buffer.as_mut()?.to_mut().get_mut(..required)
    }

    /// Drops the buffer of a temporary once its last consumer has run.
    /// Returns `true` if the buffer was released.
    pub(crate) fn consume(&mut self) -> bool {
        if self.uses_left == 0 {
            return false;
        }
        self.uses_left -= 1;
        self.uses_left == 0 && self.buffer.take().is_some()
    }
}

// ── Operation context ──────────────────────────────────────────────

/// The operand records of one operation, as seen by a kernel.
///
/// Inputs are read-only. Outputs must be sized with
/// [`set_output_shape`](Self::set_output_shape) before they are written.
pub struct OperationContext<'c, 'm> {
    operation: &'c Operation,
    records: &'c mut [OperandRecord<'m>],
}

impl<'c, 'm> OperationContext<'c, 'm> {
    pub(crate) fn new(operation: &'c Operation, records: &'c mut [OperandRecord<'m>]) -> Self {
        Self { operation, records }
    }

    pub fn operation(&self) -> &Operation {
        self.operation
    }

    pub fn num_inputs(&self) -> usize {
        self.operation.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.operation.outputs.len()
    }

    pub fn input(&self, i: usize) -> Result<&OperandRecord<'m>, KernelError> {
        self.operation
            .inputs
            .get(i)
            .and_then(|&idx| self.records.get(idx as usize))
            .ok_or(KernelError::MissingInput(i))
    }

    pub fn output(&self, i: usize) -> Result<&OperandRecord<'m>, KernelError> {
        self.operation
            .outputs
            .get(i)
            .and_then(|&idx| self.records.get(idx as usize))
            .ok_or(KernelError::MissingOutput(i))
    }

    fn output_record_mut(&mut self, i: usize) -> Result<&mut OperandRecord<'m>, KernelError> {
        let idx = *self.operation.outputs.get(i).ok_or(KernelError::MissingOutput(i))?;
        self.records
            .get_mut(idx as usize)
            .ok_or(KernelError::MissingOutput(i))
    }

    /// Whether optional input `i` was omitted.
    pub fn is_omitted_input(&self, i: usize) -> bool {
        self.input(i).map(OperandRecord::is_omitted).unwrap_or(true)
    }

    /// The value bytes of input `i`.
    pub fn input_bytes(&self, i: usize) -> Result<&[u8], KernelError> {
        self.input(i)?.value().ok_or(KernelError::MissingInput(i))
    }

    /// Input `i` decoded as little-endian `f32`s.
    pub fn input_f32s(&self, i: usize) -> Result<Vec<f32>, KernelError> {
        Ok(self
            .input_bytes(i)?
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Input `i` decoded as little-endian `i32`s.
    pub fn input_i32s(&self, i: usize) -> Result<Vec<i32>, KernelError> {
        Ok(self
            .input_bytes(i)?
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn scalar_i32(&self, i: usize) -> Result<i32, KernelError> {
        self.input_i32s(i)?
            .first()
            .copied()
            .ok_or(KernelError::MissingInput(i))
    }

    pub fn scalar_f32(&self, i: usize) -> Result<f32, KernelError> {
        self.input_f32s(i)?
            .first()
            .copied()
            .ok_or(KernelError::MissingInput(i))
    }

    /// Resolves the shape of output `i` and attaches its buffer.
    pub fn set_output_shape(&mut self, i: usize, shape: &[u32]) -> Result<(), KernelError> {
        self.output_record_mut(i)?.set_shape(shape)
    }

    /// The writable value bytes of output `i`.
    pub fn output_bytes(&mut self, i: usize) -> Result<&mut [u8], KernelError> {
        self.output_record_mut(i)?
            .value_mut()
            .ok_or(KernelError::UnallocatedOutput(i))
    }

    pub fn write_output_bytes(&mut self, i: usize, values: &[u8]) -> Result<(), KernelError> {
        let out = self.output_bytes(i)?;
        if out.len() != values.len() {
            return Err(KernelError::InsufficientSize {
                required: values.len(),
                provided: out.len(),
            });
        }
        out.copy_from_slice(values);
        Ok(())
    }

    pub fn write_output_f32s(&mut self, i: usize, values: &[f32]) -> Result<(), KernelError> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write_output_bytes(i, &bytes)
    }

    pub fn write_output_i32s(&mut self, i: usize, values: &[i32]) -> Result<(), KernelError> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write_output_bytes(i, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::OperationType;

    fn temporary(dims: Vec<u32>) -> OperandRecord<'static> {
        OperandRecord::from_operand(
            &Operand::tensor(OperandType::TensorFloat32, dims, Lifetime::Temporary).with_consumers(1),
        )
    }

    #[test]
    fn test_set_shape_allocates_temporary() {
        let mut r = temporary(vec![0, 2]);
        assert!(r.data().is_none());
        r.set_shape(&[3, 2]).unwrap();
        assert_eq!(r.dimensions, vec![3, 2]);
        assert_eq!(r.data().unwrap().len(), 24);
        assert!(r.set_shape(&[4, 2]).is_err());
    }

    #[test]
    fn test_extension_sizes_come_from_registry_entry() {
        let operand =
            Operand::tensor(OperandType::extension(1, 0), vec![0], Lifetime::Temporary).with_consumers(1);
        let mut unknown = OperandRecord::from_operand(&operand);
        assert_eq!(unknown.required_length(), None);
        assert_eq!(
            unknown.set_shape(&[3]),
            Err(KernelError::UnsupportedType(OperandType::extension(1, 0)))
        );

        let mut known = OperandRecord::from_operand(&operand).with_extension(Some(ExtensionTypeInfo {
            is_tensor: true,
            byte_size: 2,
        }));
        known.set_shape(&[3]).unwrap();
        assert_eq!(known.required_length(), Some(6));
        assert_eq!(known.data().unwrap().len(), 6);

        let mut copy = temporary(vec![0]);
        copy.inherit_info(&known);
        assert_eq!(copy.required_length(), Some(6));
    }

    #[test]
    fn test_bound_buffer_insufficient() {
        let mut r = temporary(vec![0]);
        r.lifetime = Lifetime::SubgraphOutput;
        r.bound_length = Some(8);
        r.buffer = Some(Cow::Owned(vec![0; 8]));
        assert_eq!(
            r.set_shape(&[3]),
            Err(KernelError::InsufficientSize {
                required: 12,
                provided: 8
            })
        );
        assert!(!r.is_sufficient());
        assert_eq!(r.dimensions, vec![3]);
        assert_eq!(r.data().unwrap().len(), 8);
    }

    #[test]
    fn test_consume_frees_on_last_use() {
        let mut r = temporary(vec![1]);
        r.uses_left = 2;
        r.set_shape(&[1]).unwrap();
        assert!(!r.consume());
        assert!(r.consume());
        assert!(r.data().is_none());
        assert!(!r.consume());
    }

    #[test]
    fn test_context_roundtrip() {
        let op = model_ir::Operation::new(OperationType::Relu, vec![0], vec![1]);
        let mut input = temporary(vec![2]);
        input.buffer = Some(Cow::Owned([1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect()));
        let mut records = vec![input, temporary(vec![0])];
        let mut ctx = OperationContext::new(&op, &mut records);

        assert_eq!(ctx.input_f32s(0).unwrap(), vec![1.5, -2.0]);
        assert!(ctx.output_bytes(0).is_err());
        ctx.set_output_shape(0, &[2]).unwrap();
        ctx.write_output_f32s(0, &[1.5, 0.0]).unwrap();
        assert!(ctx.input(1).is_err());
        assert_eq!(records[1].data().unwrap().len(), 8);
    }
}
