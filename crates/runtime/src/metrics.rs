// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-model execution statistics.
//!
//! [`ExecutionStats`] counts executions of a [`crate::PreparedModel`] by
//! outcome and accumulates their wall-clock time.

use nn_core::ErrorStatus;
use std::time::Duration;

/// Aggregate counters for one prepared model.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ExecutionStats {
    /// Requests that reached the executor or failed validation.
    pub executions: u64,
    /// Executions that finished with `NoError`.
    pub succeeded: u64,
    /// Executions that reported an output buffer too small.
    pub insufficient: u64,
    /// Executions that ran out of deadline or loop budget.
    pub missed_deadlines: u64,
    /// All other failures, including rejected requests.
    pub failed: u64,
    /// Total time spent in successful executions.
    pub total_duration: Duration,
    /// Longest successful execution.
    pub max_duration: Duration,
}

impl ExecutionStats {
    /// Records one finished execution.
    pub fn record(&mut self, status: ErrorStatus, elapsed: Duration) {
        self.executions += 1;
        match status {
            ErrorStatus::None => {
                self.succeeded += 1;
                self.total_duration += elapsed;
                if elapsed > self.max_duration {
                    self.max_duration = elapsed;
                }
            }
            ErrorStatus::OutputInsufficientSize => self.insufficient += 1,
            ErrorStatus::MissedDeadlinePersistent | ErrorStatus::MissedDeadlineTransient => {
                self.missed_deadlines += 1
            }
            _ => self.failed += 1,
        }
    }

    /// Mean duration of successful executions.
    pub fn mean_duration(&self) -> Duration {
        if self.succeeded == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.succeeded as u32
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Executions: {} total, {} ok, {} insufficient, {} missed deadline, {} failed, \
             mean {:.3}ms, max {:.3}ms",
            self.executions,
            self.succeeded,
            self.insufficient,
            self.missed_deadlines,
            self.failed,
            self.mean_duration().as_secs_f64() * 1000.0,
            self.max_duration.as_secs_f64() * 1000.0,
        )
    }
}
