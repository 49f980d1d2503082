// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for burst channels.

use nn_core::ErrorStatus;

/// A packet that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The length prefix disagrees with the frame. The channel is corrupt.
    #[error("packet declares {declared} bytes but the frame holds {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("packet truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("invalid flag {value} at byte {offset}")]
    InvalidFlag { value: u8, offset: usize },

    #[error("argument references slot {0}, which is not in the slot list")]
    UnlistedSlot(u32),

    #[error("unknown status code {0}")]
    UnknownStatus(u32),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

impl DecodeError {
    /// Whether the failure invalidates the whole channel rather than one
    /// request.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, DecodeError::LengthMismatch { .. })
    }
}

/// Errors reported by burst channels, servers and controllers.
#[derive(Debug, thiserror::Error)]
pub enum BurstError {
    #[error("malformed packet: {0}")]
    Decode(#[from] DecodeError),

    /// The peer is gone or the channel was invalidated.
    #[error("burst channel closed")]
    ChannelClosed,

    /// The queue cannot take the packet right now.
    #[error("queue full: {len} byte packet, {available} of {capacity} bytes free")]
    QueueFull {
        len: usize,
        available: usize,
        capacity: usize,
    },

    /// A second request was issued while one is still in flight.
    #[error("a request is already in flight on this channel")]
    RequestInFlight,

    /// The request cannot be expressed on the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A slot could not be resolved to memory.
    #[error("unknown slot {0}")]
    UnknownSlot(u32),

    /// The server executed the request and reported a failure.
    #[error("execution failed with status {0}")]
    Remote(ErrorStatus),

    /// Direct execution (fallback path) failed.
    #[error("execution error: {0}")]
    Execution(#[from] runtime::RuntimeError),

    /// The server thread could not be started.
    #[error("failed to spawn burst server: {0}")]
    Spawn(#[from] std::io::Error),
}

impl BurstError {
    /// Status reported to the caller.
    pub fn status(&self) -> ErrorStatus {
        match self {
            BurstError::Decode(_)
            | BurstError::InvalidRequest(_)
            | BurstError::UnknownSlot(_) => ErrorStatus::InvalidArgument,
            BurstError::QueueFull { .. } => ErrorStatus::Unavailable,
            BurstError::Remote(status) => *status,
            BurstError::Execution(e) => e.status(),
            BurstError::ChannelClosed | BurstError::RequestInFlight | BurstError::Spawn(_) => {
                ErrorStatus::GeneralFailure
            }
        }
    }

    /// Whether the failure happened in transport, before the request could
    /// reach an executor.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BurstError::ChannelClosed | BurstError::QueueFull { .. } | BurstError::Decode(_)
        )
    }
}
