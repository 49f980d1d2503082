// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The graph representation the execution service accepts, and the
//! validator that decides whether a graph or request is acceptable.
//!
//! - [`Operand`] and [`Operation`]: the nodes and values of a subgraph.
//! - [`Subgraph`] and [`Model`]: a main subgraph plus referenced
//!   subgraphs, with a **type-state pattern** (`Loaded` → `Validated`).
//! - [`Request`]: argument bindings for one execution.
//! - [`validate`]: graph and request validation producing structured
//!   [`ValidationError`]s.
//! - [`OperationValidator`]: the per-opcode rule oracle, with
//!   [`ReferenceOperationValidator`] for the built-in opcodes.
//! - [`ModelLoader`]: loads `model.json` plus memory-mapped pool files.
//!
//! # Example
//! ```no_run
//! use model_ir::{ModelLoader, ReferenceOperationValidator, ValidationContext};
//! use nn_core::{NoExtensions, Revision};
//! use std::path::Path;
//!
//! let model = ModelLoader::load(Path::new("./models/counter")).unwrap();
//! let ctx = ValidationContext::new(Revision::V1_3, &ReferenceOperationValidator, &NoExtensions);
//! let model = model.validate(&ctx).unwrap();
//! println!("{}", model.summary());
//! ```

mod error;
pub mod graph;
mod loader;
mod operand;
pub mod operation;
mod oracle;
mod request;
pub mod validate;

pub use error::ModelError;
pub use graph::{ConstantPool, GraphState, Loaded, Model, Subgraph, SubgraphRef, Validated};
pub use loader::ModelLoader;
pub use operand::{ChannelQuantParams, DataLocation, ExtraParams, Lifetime, Operand};
pub use operation::{if_op, while_op, Operation, OperationType};
pub use oracle::{compatible, OperationValidator, ReferenceOperationValidator, SubgraphAccessor};
pub use request::{MemoryPool, Request, RequestArgument};
pub use validate::{validate_request, Rule, Subject, ValidationContext, ValidationError};
