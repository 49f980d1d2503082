// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Status codes, output shapes and timing records returned to callers.

use std::fmt;
use std::time::Duration;

/// Outcome of a validation, allocation or execution call.
///
/// This is the caller-visible status. Each crate's rich error type maps
/// onto one of these via a `status()` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorStatus {
    None,
    InvalidArgument,
    GeneralFailure,
    OutputInsufficientSize,
    /// The deadline had already passed, or cannot be met on retry.
    MissedDeadlinePersistent,
    /// The deadline or loop budget ran out mid-execution; a retry may succeed.
    MissedDeadlineTransient,
    /// The service (or a burst channel) cannot take the request right now.
    Unavailable,
}

impl ErrorStatus {
    /// Returns `true` for [`ErrorStatus::None`].
    pub fn is_ok(self) -> bool {
        self == ErrorStatus::None
    }

    /// Returns `true` for either missed-deadline variant.
    pub fn is_missed_deadline(self) -> bool {
        matches!(
            self,
            ErrorStatus::MissedDeadlinePersistent | ErrorStatus::MissedDeadlineTransient
        )
    }

    /// Numeric wire code.
    pub fn code(self) -> u32 {
        match self {
            ErrorStatus::None => 0,
            ErrorStatus::Unavailable => 1,
            ErrorStatus::GeneralFailure => 2,
            ErrorStatus::OutputInsufficientSize => 3,
            ErrorStatus::InvalidArgument => 4,
            ErrorStatus::MissedDeadlineTransient => 5,
            ErrorStatus::MissedDeadlinePersistent => 6,
        }
    }

    /// Decodes a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            0 => ErrorStatus::None,
            1 => ErrorStatus::Unavailable,
            2 => ErrorStatus::GeneralFailure,
            3 => ErrorStatus::OutputInsufficientSize,
            4 => ErrorStatus::InvalidArgument,
            5 => ErrorStatus::MissedDeadlineTransient,
            6 => ErrorStatus::MissedDeadlinePersistent,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorStatus::None => "NONE",
            ErrorStatus::InvalidArgument => "INVALID_ARGUMENT",
            ErrorStatus::GeneralFailure => "GENERAL_FAILURE",
            ErrorStatus::OutputInsufficientSize => "OUTPUT_INSUFFICIENT_SIZE",
            ErrorStatus::MissedDeadlinePersistent => "MISSED_DEADLINE_PERSISTENT",
            ErrorStatus::MissedDeadlineTransient => "MISSED_DEADLINE_TRANSIENT",
            ErrorStatus::Unavailable => "DEVICE_UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// Final dimensions of one request output.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct OutputShape {
    pub dimensions: Vec<u32>,
    /// `false` when the bound buffer is smaller than the output requires.
    pub is_sufficient: bool,
}

/// Microsecond timing of one execution.
///
/// Both fields are [`Timing::UNAVAILABLE_US`] when timing was not requested
/// or the execution did not complete normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Timing {
    pub time_on_device_us: u64,
    pub time_in_driver_us: u64,
}

impl Timing {
    /// Sentinel for a field that was not measured.
    pub const UNAVAILABLE_US: u64 = u64::MAX;

    /// Both fields unavailable.
    pub const UNAVAILABLE: Timing = Timing {
        time_on_device_us: Self::UNAVAILABLE_US,
        time_in_driver_us: Self::UNAVAILABLE_US,
    };

    /// Builds a timing record from two measured durations.
    pub fn from_durations(on_device: Duration, in_driver: Duration) -> Self {
        Self {
            time_on_device_us: duration_to_us(on_device),
            time_in_driver_us: duration_to_us(in_driver),
        }
    }

    /// Returns `true` if neither field was measured.
    pub fn is_unavailable(&self) -> bool {
        self.time_on_device_us == Self::UNAVAILABLE_US
            && self.time_in_driver_us == Self::UNAVAILABLE_US
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}

fn duration_to_us(d: Duration) -> u64 {
    // Saturate one below the sentinel so a measured value is never mistaken
    // for "unavailable".
    u64::try_from(d.as_micros())
        .unwrap_or(Timing::UNAVAILABLE_US - 1)
        .min(Timing::UNAVAILABLE_US - 1)
}
