// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for request execution and graph validation.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use model_ir::{
    Lifetime, MemoryPool, Model, Operand, Operation, OperationType, ReferenceOperationValidator,
    Request, RequestArgument, Subgraph, ValidationContext,
};
use nn_core::{NoExtensions, OperandType, Revision, SharedMemory};
use runtime::{Driver, RuntimeConfig};

/// A chain of `n` RELU operations over `width` floats.
fn relu_chain(n: usize, width: u32) -> Model {
    let tensor = |lifetime| Operand::tensor(OperandType::TensorFloat32, vec![width], lifetime);
    let mut operands = vec![tensor(Lifetime::SubgraphInput).with_consumers(1)];
    for _ in 1..n {
        operands.push(tensor(Lifetime::Temporary).with_consumers(1));
    }
    operands.push(tensor(Lifetime::SubgraphOutput));
    Model::new(Subgraph {
        operands,
        operations: (0..n as u32)
            .map(|i| Operation::new(OperationType::Relu, vec![i], vec![i + 1]))
            .collect(),
        input_indexes: vec![0],
        output_indexes: vec![n as u32],
    })
}

fn request(width: u32) -> Request {
    let input: Vec<f32> = (0..width).map(|i| i as f32 - width as f32 / 2.0).collect();
    Request::new(
        vec![RequestArgument::whole_pool(0)],
        vec![RequestArgument::whole_pool(1)],
        vec![
            MemoryPool::Region(SharedMemory::from_f32s(&input)),
            MemoryPool::Region(SharedMemory::new(width as usize * 4)),
        ],
    )
}

fn bench_execute(c: &mut Criterion) {
    let driver = Driver::new(RuntimeConfig::default()).unwrap();
    let mut group = c.benchmark_group("execute_relu_chain");
    for &ops in &[1usize, 16, 64] {
        let prepared = driver.prepare_model(relu_chain(ops, 1024)).unwrap();
        let request = request(1024);
        group.bench_with_input(BenchmarkId::from_parameter(ops), &ops, |b, _| {
            b.iter(|| prepared.execute(&request, false, None, None).unwrap())
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let model = relu_chain(256, 16);
    c.bench_function("validate_relu_chain_256", |b| {
        b.iter(|| {
            let ctx =
                ValidationContext::new(Revision::V1_3, &ReferenceOperationValidator, &NoExtensions);
            model.clone().validate(&ctx).unwrap()
        })
    });
}

criterion_group!(benches, bench_execute, bench_validate);
criterion_main!(benches);
