// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: run a WHILE loop through registry buffers.
//!
//! Prepares `while (i < limit) i = i + 1`, allocates token buffers for the
//! loop counter and result, and executes the model a few times, copying
//! each result back into the counter.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p runtime --example counting_loop [config.toml]
//! ```

use anyhow::Context;
use buffer_registry::IoType;
use model_ir::{
    DataLocation, Lifetime, MemoryPool, Model, Operand, Operation, OperationType, Request,
    RequestArgument, Subgraph,
};
use nn_core::{OperandType, SharedMemory};
use runtime::{Driver, RuntimeConfig};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::from_file(path.as_ref())
            .with_context(|| format!("loading {path}"))?,
        None => RuntimeConfig::default(),
    };
    let driver = Driver::new(config)?;
    let prepared = driver.prepare_model(counting_loop())?;
    println!("{}", prepared.model().summary());

    let counter = driver.allocate(&[], &[(&prepared, IoType::Input, 0)])?;
    let result = driver.allocate(&[], &[(&prepared, IoType::Output, 0)])?;
    counter
        .buffer()?
        .copy_from(&0f32.to_le_bytes(), &[])
        .context("seeding the counter")?;

    for limit in [3.0f32, 10.0, 25.0] {
        let request = Request::new(
            vec![RequestArgument::whole_pool(0), RequestArgument::whole_pool(1)],
            vec![RequestArgument::whole_pool(2)],
            vec![
                MemoryPool::Token(counter.token()),
                MemoryPool::Region(SharedMemory::from_f32s(&[limit])),
                MemoryPool::Token(result.token()),
            ],
        );
        let outcome = prepared.execute(&request, true, None, None)?;

        // A buffer cannot be both input and output of one request, so the
        // result is copied back into the counter between executions.
        let mut bytes = [0u8; 4];
        result.buffer()?.copy_to(&mut bytes)?;
        counter.buffer()?.copy_from(&bytes, &[])?;
        println!(
            "limit {limit:>5}: {} -> counter {} (device {}us)",
            outcome.status,
            f32::from_le_bytes(bytes),
            outcome.timing.time_on_device_us,
        );
    }

    println!("{}", prepared.stats().summary());
    println!("{}", driver.registry().stats().summary());
    Ok(())
}

/// `while (i < limit) i = i + 1` over `[1]` floats.
fn counting_loop() -> Model {
    let tensor = |lifetime| Operand::tensor(OperandType::TensorFloat32, vec![1], lifetime);
    let activation = Operand::scalar(OperandType::Int32, Lifetime::EmbeddedConstant)
        .with_location(DataLocation::new(0, 4, 4))
        .with_consumers(1);

    let cond = Subgraph {
        operands: vec![
            tensor(Lifetime::SubgraphInput).with_consumers(1),
            tensor(Lifetime::SubgraphInput).with_consumers(1),
            Operand::tensor(OperandType::TensorBool8, vec![1], Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::Less, vec![0, 1], vec![2])],
        input_indexes: vec![0, 1],
        output_indexes: vec![2],
    };
    let body = Subgraph {
        operands: vec![
            tensor(Lifetime::SubgraphInput).with_consumers(1),
            tensor(Lifetime::SubgraphInput),
            tensor(Lifetime::EmbeddedConstant)
                .with_location(DataLocation::new(0, 0, 4))
                .with_consumers(1),
            activation,
            tensor(Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::Add, vec![0, 2, 3], vec![4])],
        input_indexes: vec![0, 1],
        output_indexes: vec![4],
    };
    let main = Subgraph {
        operands: vec![
            tensor(Lifetime::SubgraphInput).with_consumers(1),
            tensor(Lifetime::SubgraphInput).with_consumers(1),
            Operand::subgraph_reference(0).with_consumers(1),
            Operand::subgraph_reference(1).with_consumers(1),
            tensor(Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::While, vec![2, 3, 0, 1], vec![4])],
        input_indexes: vec![0, 1],
        output_indexes: vec![4],
    };
    Model::new(main)
        .with_referenced(vec![cond, body])
        .with_operand_values([1.0f32.to_le_bytes(), 0i32.to_le_bytes()].concat())
}
