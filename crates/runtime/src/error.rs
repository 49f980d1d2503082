// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the execution runtime.

use crate::KernelError;
use model_ir::OperationType;
use nn_core::ErrorStatus;
use std::time::Duration;

/// Errors that can occur while preparing or executing a model.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The model or request failed structural validation.
    #[error("validation failed: {0}")]
    ValidationError(#[from] model_ir::ValidationError),

    /// Model loading failed.
    #[error("model error: {0}")]
    ModelError(#[from] model_ir::ModelError),

    /// A registry token was unknown, misused or could not be allocated.
    #[error("buffer registry error: {0}")]
    RegistryError(#[from] buffer_registry::RegistryError),

    /// Reading or writing a request memory region failed.
    #[error("memory pool error: {0}")]
    PoolError(#[from] nn_core::CoreError),

    /// A kernel rejected its operands or failed to compute.
    #[error("operation {index} ({op_type}) failed: {source}")]
    KernelError {
        index: usize,
        op_type: OperationType,
        #[source]
        source: KernelError,
    },

    /// A caller-bound output region is smaller than the computed result.
    #[error("output operand {operand} needs {required} bytes, {provided} provided")]
    OutputInsufficientSize {
        operand: u32,
        required: usize,
        provided: usize,
    },

    /// A registry buffer bound as an output is smaller than the result.
    /// The buffer's declared shape was wrong, so no retry can succeed.
    #[error("registry buffer for output {output} is too small")]
    TokenOutputTooSmall { output: usize },

    /// The execution deadline passed. `persistent` is set when it had
    /// already passed before any work started.
    #[error("missed deadline ({})", deadline_kind(.persistent))]
    MissedDeadline { persistent: bool },

    /// A WHILE loop ran past its cumulative time budget.
    #[error("loop timed out after {elapsed:?} (budget {budget:?})")]
    LoopTimeout { elapsed: Duration, budget: Duration },

    /// A control-flow operand could not be interpreted.
    #[error("invalid control flow at operation {index}: {detail}")]
    ControlFlowError { index: usize, detail: String },

    /// The request is well-formed but cannot be served by this driver.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The execution could not be scheduled.
    #[error("execution unavailable: {0}")]
    Unavailable(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

fn deadline_kind(persistent: &bool) -> &'static str {
    if *persistent {
        "persistent"
    } else {
        "transient"
    }
}

impl RuntimeError {
    /// Status reported to the caller.
    pub fn status(&self) -> ErrorStatus {
        match self {
            RuntimeError::ValidationError(_) | RuntimeError::InvalidArgument(_) => {
                ErrorStatus::InvalidArgument
            }
            RuntimeError::ModelError(model_ir::ModelError::Validation(_)) => {
                ErrorStatus::InvalidArgument
            }
            RuntimeError::RegistryError(e) => e.status(),
            RuntimeError::OutputInsufficientSize { .. } => ErrorStatus::OutputInsufficientSize,
            RuntimeError::MissedDeadline { persistent: true } => {
                ErrorStatus::MissedDeadlinePersistent
            }
            RuntimeError::MissedDeadline { persistent: false } | RuntimeError::LoopTimeout { .. } => {
                ErrorStatus::MissedDeadlineTransient
            }
            RuntimeError::Unavailable(_) => ErrorStatus::Unavailable,
            RuntimeError::ModelError(_)
            | RuntimeError::PoolError(_)
            | RuntimeError::KernelError { .. }
            | RuntimeError::ControlFlowError { .. }
            | RuntimeError::TokenOutputTooSmall { .. }
            | RuntimeError::ConfigError(_) => ErrorStatus::GeneralFailure,
        }
    }
}
