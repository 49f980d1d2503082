// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The execution engine and driver front door for validated graphs.
//!
//! The runtime takes:
//! - A `Model<Loaded>` from `model-ir`, validated on preparation.
//! - A `Request` binding the main subgraph's inputs and outputs to caller
//!   memory regions or `buffer-registry` tokens.
//!
//! And walks the graph on the CPU, dispatching each operation to a
//! [`KernelDispatcher`] and running IF/WHILE itself, under an optional
//! deadline and a per-loop time budget.
//!
//! # Pipeline
//! ```text
//! Driver ──prepare_model──► PreparedModel ──execute──► CpuExecutor ──► KernelDispatcher
//!   │                            │                         │
//!   └── BufferRegistry ◄─────────┴── RegistryResolver ◄────┘
//! ```
//!
//! # Example
//! ```no_run
//! use runtime::{Driver, RuntimeConfig};
//!
//! # fn example(model: model_ir::Model, request: model_ir::Request) -> Result<(), runtime::RuntimeError> {
//! let driver = Driver::new(RuntimeConfig::default())?;
//! let prepared = driver.prepare_model(model)?;
//! let outcome = prepared.execute(&request, true, None, None)?;
//! println!("{} {:?}", outcome.status, outcome.output_shapes);
//! # Ok(())
//! # }
//! ```
//!
//! # Async Execution
//! [`PreparedModel::execute_async`] moves an execution onto the tokio
//! blocking pool; the executor itself never awaits.

mod config;
mod context;
mod driver;
mod error;
mod executor;
mod kernels;
mod metrics;
mod pool;

pub use config::{BurstConfig, RuntimeConfig, DEFAULT_LOOP_TIMEOUT_MS, MAX_LOOP_TIMEOUT_MS};
pub use context::{OperandRecord, OperationContext};
pub use driver::{Driver, ExecutionOutcome, PreparedModel};
pub use error::RuntimeError;
pub use executor::{CpuExecutor, ExecutorConfig, RunOutput};
pub use kernels::{broadcast_shape, KernelDispatcher, KernelError, ReferenceKernels};
pub use metrics::ExecutionStats;
pub use pool::{MappedPool, PoolResolver, RegionMapper, RegistryResolver};
