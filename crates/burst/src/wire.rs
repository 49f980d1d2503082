// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Request and result packet encoding.
//!
//! All integers are little-endian.
//!
//! ```text
//! request  := u32 packet_len
//!             u32 num_inputs  u32 num_outputs
//!             argument * (num_inputs + num_outputs)
//!             u32 num_slots   u32 slot * num_slots
//!             u8  measure_timing
//! argument := u8 has_value
//!             [ u32 slot  u32 offset  u32 length  u32 rank  u32 dim * rank ]   if has_value
//! result   := u32 packet_len
//!             u32 status
//!             u32 num_outputs
//!             ( u32 rank  u32 dim * rank  u8 is_sufficient ) * num_outputs
//!             u64 time_on_device_us  u64 time_in_driver_us
//! ```

use crate::DecodeError;
use nn_core::{ErrorStatus, OutputShape, Timing};

// ---------------------------------------------------------------------------
// Wire serialization helpers (all little-endian)
// ---------------------------------------------------------------------------

#[inline]
fn write_u32_le(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

#[inline]
fn write_u64_le(buf: &mut Vec<u8>, val: u64) {
    buf.extend_from_slice(&val.to_le_bytes());
}

/// Writes a `u32` length prefix, to be patched by [`finish_packet`].
fn start_packet() -> Vec<u8> {
    vec![0; 4]
}

fn finish_packet(mut buf: Vec<u8>) -> Vec<u8> {
    let len = buf.len() as u32;
    buf[..4].copy_from_slice(&len.to_le_bytes());
    buf
}

/// A cursor over one frame.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Checks the length prefix against the frame and positions the
    /// cursor after it.
    fn framed(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let declared = buf
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or(DecodeError::LengthMismatch {
                declared: 0,
                actual: buf.len(),
            })?;
        if declared as usize != buf.len() {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }
        Ok(Self { buf, pos: 4 })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn flag(&mut self) -> Result<bool, DecodeError> {
        let offset = self.pos;
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::InvalidFlag { value, offset }),
        }
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn dimensions(&mut self) -> Result<Vec<u32>, DecodeError> {
        let rank = self.u32()?;
        (0..rank).map(|_| self.u32()).collect()
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            extra => Err(DecodeError::TrailingBytes(extra)),
        }
    }
}

// ---------------------------------------------------------------------------
// Request packets
// ---------------------------------------------------------------------------

/// One argument bound to bytes of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotArgument {
    pub slot: u32,
    pub offset: u32,
    pub length: u32,
    pub dimensions: Vec<u32>,
}

/// A decoded request. `None` arguments carry no value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestPacket {
    pub inputs: Vec<Option<SlotArgument>>,
    pub outputs: Vec<Option<SlotArgument>>,
    /// Every slot the arguments reference, in pool order.
    pub slots: Vec<u32>,
    pub measure_timing: bool,
}

pub fn encode_request(packet: &RequestPacket) -> Vec<u8> {
    let mut buf = start_packet();
    write_u32_le(&mut buf, packet.inputs.len() as u32);
    write_u32_le(&mut buf, packet.outputs.len() as u32);
    for argument in packet.inputs.iter().chain(&packet.outputs) {
        match argument {
            None => buf.push(0),
            Some(arg) => {
                buf.push(1);
                write_u32_le(&mut buf, arg.slot);
                write_u32_le(&mut buf, arg.offset);
                write_u32_le(&mut buf, arg.length);
                write_u32_le(&mut buf, arg.dimensions.len() as u32);
                for &dim in &arg.dimensions {
                    write_u32_le(&mut buf, dim);
                }
            }
        }
    }
    write_u32_le(&mut buf, packet.slots.len() as u32);
    for &slot in &packet.slots {
        write_u32_le(&mut buf, slot);
    }
    buf.push(packet.measure_timing as u8);
    finish_packet(buf)
}

pub fn decode_request(frame: &[u8]) -> Result<RequestPacket, DecodeError> {
    let mut reader = Reader::framed(frame)?;
    let num_inputs = reader.u32()?;
    let num_outputs = reader.u32()?;

    let mut arguments = Vec::new();
    for _ in 0..u64::from(num_inputs) + u64::from(num_outputs) {
        let argument = if reader.flag()? {
            Some(SlotArgument {
                slot: reader.u32()?,
                offset: reader.u32()?,
                length: reader.u32()?,
                dimensions: reader.dimensions()?,
            })
        } else {
            None
        };
        arguments.push(argument);
    }

    let num_slots = reader.u32()?;
    let slots = (0..num_slots)
        .map(|_| reader.u32())
        .collect::<Result<Vec<_>, _>>()?;
    let measure_timing = reader.flag()?;
    reader.finish()?;

    if let Some(arg) = arguments
        .iter()
        .flatten()
        .find(|arg| !slots.contains(&arg.slot))
    {
        return Err(DecodeError::UnlistedSlot(arg.slot));
    }

    let outputs = arguments.split_off(num_inputs as usize);
    Ok(RequestPacket {
        inputs: arguments,
        outputs,
        slots,
        measure_timing,
    })
}

// ---------------------------------------------------------------------------
// Result packets
// ---------------------------------------------------------------------------

/// A decoded result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPacket {
    pub status: ErrorStatus,
    pub output_shapes: Vec<OutputShape>,
    pub timing: Timing,
}

impl ResultPacket {
    /// A result carrying only a failure status.
    pub fn failure(status: ErrorStatus) -> Self {
        Self {
            status,
            output_shapes: Vec::new(),
            timing: Timing::UNAVAILABLE,
        }
    }
}

pub fn encode_result(packet: &ResultPacket) -> Vec<u8> {
    let mut buf = start_packet();
    write_u32_le(&mut buf, packet.status.code());
    write_u32_le(&mut buf, packet.output_shapes.len() as u32);
    for shape in &packet.output_shapes {
        write_u32_le(&mut buf, shape.dimensions.len() as u32);
        for &dim in &shape.dimensions {
            write_u32_le(&mut buf, dim);
        }
        buf.push(shape.is_sufficient as u8);
    }
    write_u64_le(&mut buf, packet.timing.time_on_device_us);
    write_u64_le(&mut buf, packet.timing.time_in_driver_us);
    finish_packet(buf)
}

pub fn decode_result(frame: &[u8]) -> Result<ResultPacket, DecodeError> {
    let mut reader = Reader::framed(frame)?;
    let code = reader.u32()?;
    let status = ErrorStatus::from_code(code).ok_or(DecodeError::UnknownStatus(code))?;
    let num_outputs = reader.u32()?;
    let output_shapes = (0..num_outputs)
        .map(|_| {
            Ok(OutputShape {
                dimensions: reader.dimensions()?,
                is_sufficient: reader.flag()?,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;
    let timing = Timing {
        time_on_device_us: reader.u64()?,
        time_in_driver_us: reader.u64()?,
    };
    reader.finish()?;
    Ok(ResultPacket {
        status,
        output_shapes,
        timing,
    })
}
