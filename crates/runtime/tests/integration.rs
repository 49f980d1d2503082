// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end execution pipeline.
//!
//! These tests exercise the complete flow from model construction →
//! preparation → request validation → execution, proving that the
//! validator, registry and executor compose correctly.

use buffer_registry::IoType;
use model_ir::{
    DataLocation, Lifetime, MemoryPool, Model, Operand, Operation, OperationType,
    OperationValidator, Request, RequestArgument, Subgraph, SubgraphAccessor,
};
use nn_core::{
    ErrorStatus, ExtensionTypeInfo, NoExtensions, OperandType, Revision, SharedMemory,
    StaticExtensionRegistry,
};
use runtime::{
    Driver, KernelDispatcher, KernelError, OperationContext, ReferenceKernels, RuntimeConfig,
    MAX_LOOP_TIMEOUT_MS,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Helpers ────────────────────────────────────────────────────

fn f32_tensor(dims: Vec<u32>, lifetime: Lifetime) -> Operand {
    Operand::tensor(OperandType::TensorFloat32, dims, lifetime)
}

fn activation_at(offset: u32) -> Operand {
    Operand::scalar(OperandType::Int32, Lifetime::EmbeddedConstant)
        .with_location(DataLocation::new(0, offset, 4))
        .with_consumers(1)
}

/// `op3 = ADD(op1, op2, NONE)` over `[2]` float tensors. The output shape
/// is left as declared by `output_dims`.
fn add_model(output_dims: Vec<u32>) -> Model {
    Model::new(Subgraph {
        operands: vec![
            f32_tensor(vec![2], Lifetime::SubgraphInput).with_consumers(1),
            f32_tensor(vec![2], Lifetime::SubgraphInput).with_consumers(1),
            activation_at(0),
            f32_tensor(output_dims, Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::Add, vec![0, 1, 2], vec![3])],
        input_indexes: vec![0, 1],
        output_indexes: vec![3],
    })
    .with_operand_values(0i32.to_le_bytes().to_vec())
}

/// A chain of `n` RELU operations from input 0 to the last operand.
fn relu_chain(n: usize) -> Model {
    let mut operands = vec![f32_tensor(vec![2], Lifetime::SubgraphInput).with_consumers(1)];
    for _ in 1..n {
        operands.push(f32_tensor(vec![2], Lifetime::Temporary).with_consumers(1));
    }
    operands.push(f32_tensor(vec![2], Lifetime::SubgraphOutput));
    let operations = (0..n as u32)
        .map(|i| Operation::new(OperationType::Relu, vec![i], vec![i + 1]))
        .collect();
    Model::new(Subgraph {
        operands,
        operations,
        input_indexes: vec![0],
        output_indexes: vec![n as u32],
    })
}

/// `while (i < limit) i = i + 1`, with `i` and `limit` as `[1]` inputs.
fn counting_loop() -> Model {
    let cond = Subgraph {
        operands: vec![
            f32_tensor(vec![1], Lifetime::SubgraphInput).with_consumers(1),
            f32_tensor(vec![1], Lifetime::SubgraphInput).with_consumers(1),
            Operand::tensor(OperandType::TensorBool8, vec![1], Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::Less, vec![0, 1], vec![2])],
        input_indexes: vec![0, 1],
        output_indexes: vec![2],
    };
    let body = Subgraph {
        operands: vec![
            f32_tensor(vec![1], Lifetime::SubgraphInput).with_consumers(1),
            f32_tensor(vec![1], Lifetime::SubgraphInput),
            f32_tensor(vec![1], Lifetime::EmbeddedConstant)
                .with_location(DataLocation::new(0, 0, 4))
                .with_consumers(1),
            activation_at(4),
            f32_tensor(vec![1], Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::Add, vec![0, 2, 3], vec![4])],
        input_indexes: vec![0, 1],
        output_indexes: vec![4],
    };
    let main = Subgraph {
        operands: vec![
            f32_tensor(vec![1], Lifetime::SubgraphInput).with_consumers(1),
            f32_tensor(vec![1], Lifetime::SubgraphInput).with_consumers(1),
            Operand::subgraph_reference(0).with_consumers(1),
            Operand::subgraph_reference(1).with_consumers(1),
            f32_tensor(vec![1], Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::While, vec![2, 3, 0, 1], vec![4])],
        input_indexes: vec![0, 1],
        output_indexes: vec![4],
    };
    let values = [1.0f32.to_le_bytes(), 0i32.to_le_bytes()].concat();
    Model::new(main)
        .with_referenced(vec![cond, body])
        .with_operand_values(values)
}

/// `out = cond ? x + x : relu(x)` over `[2]` floats.
fn branch_model() -> Model {
    let then_branch = Subgraph {
        operands: vec![
            f32_tensor(vec![2], Lifetime::SubgraphInput).with_consumers(2),
            activation_at(0),
            f32_tensor(vec![2], Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::Add, vec![0, 0, 1], vec![2])],
        input_indexes: vec![0],
        output_indexes: vec![2],
    };
    let else_branch = Subgraph {
        operands: vec![
            f32_tensor(vec![2], Lifetime::SubgraphInput).with_consumers(1),
            f32_tensor(vec![2], Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::Relu, vec![0], vec![1])],
        input_indexes: vec![0],
        output_indexes: vec![1],
    };
    let main = Subgraph {
        operands: vec![
            Operand::tensor(OperandType::TensorBool8, vec![1], Lifetime::SubgraphInput)
                .with_consumers(1),
            f32_tensor(vec![2], Lifetime::SubgraphInput).with_consumers(1),
            Operand::subgraph_reference(0).with_consumers(1),
            Operand::subgraph_reference(1).with_consumers(1),
            f32_tensor(vec![2], Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::If, vec![0, 2, 3, 1], vec![4])],
        input_indexes: vec![0, 1],
        output_indexes: vec![4],
    };
    Model::new(main)
        .with_referenced(vec![then_branch, else_branch])
        .with_operand_values(0i32.to_le_bytes().to_vec())
}

fn region(values: &[f32]) -> MemoryPool {
    MemoryPool::Region(SharedMemory::from_f32s(values))
}

/// One whole-pool argument per pool, inputs first.
fn whole_pool_request(inputs: Vec<MemoryPool>, outputs: Vec<MemoryPool>) -> Request {
    let n = inputs.len() as u32;
    let input_args = (0..n).map(RequestArgument::whole_pool).collect();
    let output_args = (0..outputs.len() as u32)
        .map(|i| RequestArgument::whole_pool(n + i))
        .collect();
    Request::new(input_args, output_args, inputs.into_iter().chain(outputs).collect())
}

fn driver_with(config: RuntimeConfig) -> Driver {
    Driver::new(config).unwrap()
}

fn driver() -> Driver {
    driver_with(RuntimeConfig::default())
}

/// Counts kernel calls and sleeps past the deadline on call `slow_call`.
struct SlowKernels {
    calls: AtomicUsize,
    slow_call: usize,
    delay: Duration,
}

impl KernelDispatcher for SlowKernels {
    fn execute(&self, context: &mut OperationContext<'_, '_>) -> Result<(), KernelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.slow_call {
            std::thread::sleep(self.delay);
        }
        ReferenceKernels.execute(context)
    }
}

/// Copies input 0 to output 0 byte for byte, whatever the operand type.
struct CopyKernels;

impl KernelDispatcher for CopyKernels {
    fn execute(&self, context: &mut OperationContext<'_, '_>) -> Result<(), KernelError> {
        let dims = context.input(0)?.dimensions.clone();
        context.set_output_shape(0, &dims)?;
        let bytes = context.input_bytes(0)?.to_vec();
        context.write_output_bytes(0, &bytes)
    }
}

/// Accepts every operation signature.
struct AcceptAll;

impl OperationValidator for AcceptAll {
    fn validate_operation(
        &self,
        _operation: &Operation,
        _operands: &[Operand],
        _revision: Revision,
        _subgraphs: &dyn SubgraphAccessor,
    ) -> Result<(), String> {
        Ok(())
    }
}

// ── End-to-end ─────────────────────────────────────────────────

#[test]
fn test_add_end_to_end() {
    let prepared = driver().prepare_model(add_model(vec![2])).unwrap();
    let out = SharedMemory::new(8);
    let request = whole_pool_request(
        vec![region(&[1.0, 2.0]), region(&[3.0, 4.0])],
        vec![MemoryPool::Region(out.clone())],
    );

    let outcome = prepared.execute(&request, false, None, None).unwrap();
    assert_eq!(outcome.status, ErrorStatus::None);
    assert_eq!(outcome.output_shapes[0].dimensions, vec![2]);
    assert!(outcome.output_shapes[0].is_sufficient);
    assert_eq!(out.to_f32s(), vec![4.0, 6.0]);
}

#[test]
fn test_execution_is_deterministic() {
    let prepared = driver().prepare_model(add_model(vec![0])).unwrap();
    let run = || {
        let out = SharedMemory::new(8);
        let request = whole_pool_request(
            vec![region(&[0.25, -1.5]), region(&[8.0, 1.5])],
            vec![MemoryPool::Region(out.clone())],
        );
        let outcome = prepared.execute(&request, false, None, None).unwrap();
        (outcome.output_shapes, out.to_vec())
    };
    assert_eq!(run(), run());
}

#[test]
fn test_unspecified_output_shape_is_resolved() {
    let prepared = driver().prepare_model(add_model(vec![0])).unwrap();
    let out = SharedMemory::new(8);
    let request = whole_pool_request(
        vec![region(&[1.0, 1.0]), region(&[2.0, 2.0])],
        vec![MemoryPool::Region(out.clone())],
    );
    let outcome = prepared.execute(&request, false, None, None).unwrap();
    assert_eq!(outcome.output_shapes[0].dimensions, vec![2]);
    assert_eq!(out.to_f32s(), vec![3.0, 3.0]);
}

#[test]
fn test_unspecified_output_rejected_when_disallowed() {
    let config = RuntimeConfig {
        allow_unspecified_output: false,
        ..Default::default()
    };
    let prepared = driver_with(config).prepare_model(add_model(vec![0])).unwrap();
    let request = whole_pool_request(
        vec![region(&[1.0, 1.0]), region(&[2.0, 2.0])],
        vec![MemoryPool::Region(SharedMemory::new(8))],
    );
    let err = prepared.execute(&request, false, None, None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::InvalidArgument);
}

#[test]
fn test_insufficient_output_reports_shape() {
    let prepared = driver().prepare_model(add_model(vec![0])).unwrap();
    let out = SharedMemory::new(4);
    let request = whole_pool_request(
        vec![region(&[1.0, 2.0]), region(&[3.0, 4.0])],
        vec![MemoryPool::Region(out.clone())],
    );
    let outcome = prepared.execute(&request, true, None, None).unwrap();
    assert_eq!(outcome.status, ErrorStatus::OutputInsufficientSize);
    assert_eq!(outcome.output_shapes[0].dimensions, vec![2]);
    assert!(!outcome.output_shapes[0].is_sufficient);
    assert!(outcome.timing.is_unavailable());
    assert_eq!(out.to_vec(), vec![0; 4]);
    assert_eq!(prepared.stats().insufficient, 1);
}

#[test]
fn test_request_argument_count_mismatch() {
    let prepared = driver().prepare_model(add_model(vec![2])).unwrap();
    let request = whole_pool_request(
        vec![region(&[1.0, 2.0])],
        vec![MemoryPool::Region(SharedMemory::new(8))],
    );
    let err = prepared.execute(&request, false, None, None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::InvalidArgument);
    assert_eq!(prepared.stats().failed, 1);
}

#[test]
fn test_sub_range_arguments() {
    let prepared = driver().prepare_model(add_model(vec![2])).unwrap();
    let inputs = SharedMemory::from_f32s(&[1.0, 2.0, 10.0, 20.0]);
    let out = SharedMemory::new(16);
    let request = Request::new(
        vec![RequestArgument::pool(0, 0, 8), RequestArgument::pool(0, 8, 8)],
        vec![RequestArgument::pool(1, 4, 8)],
        vec![MemoryPool::Region(inputs), MemoryPool::Region(out.clone())],
    );
    prepared.execute(&request, false, None, None).unwrap();
    assert_eq!(out.to_f32s(), vec![0.0, 11.0, 22.0, 0.0]);
}

// ── Deadlines ──────────────────────────────────────────────────

#[test]
fn test_deadline_stops_after_slow_operation() {
    let kernels = Arc::new(SlowKernels {
        calls: AtomicUsize::new(0),
        slow_call: 2,
        delay: Duration::from_millis(300),
    });
    let driver = Driver::with_components(
        RuntimeConfig::default(),
        kernels.clone(),
        Arc::new(model_ir::ReferenceOperationValidator),
        Arc::new(nn_core::NoExtensions),
    )
    .unwrap();
    let prepared = driver.prepare_model(relu_chain(6)).unwrap();
    let out = SharedMemory::new(8);
    let request = whole_pool_request(vec![region(&[1.0, -1.0])], vec![MemoryPool::Region(out.clone())]);

    let deadline = Instant::now() + Duration::from_millis(150);
    let err = prepared.execute(&request, false, Some(deadline), None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::MissedDeadlineTransient);
    assert_eq!(kernels.calls.load(Ordering::SeqCst), 3);
    assert_eq!(out.to_vec(), vec![0; 8]);
}

#[test]
fn test_past_deadline_is_persistent() {
    let prepared = driver().prepare_model(relu_chain(2)).unwrap();
    let request = whole_pool_request(
        vec![region(&[1.0, -1.0])],
        vec![MemoryPool::Region(SharedMemory::new(8))],
    );
    let deadline = Instant::now();
    std::thread::sleep(Duration::from_millis(2));
    let err = prepared.execute(&request, false, Some(deadline), None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::MissedDeadlinePersistent);
}

#[test]
fn test_generous_deadline_succeeds() {
    let prepared = driver().prepare_model(relu_chain(4)).unwrap();
    let out = SharedMemory::new(8);
    let request = whole_pool_request(vec![region(&[1.0, -1.0])], vec![MemoryPool::Region(out.clone())]);
    let deadline = Instant::now() + Duration::from_secs(10);
    let outcome = prepared.execute(&request, false, Some(deadline), None).unwrap();
    assert_eq!(outcome.status, ErrorStatus::None);
    assert_eq!(out.to_f32s(), vec![1.0, 0.0]);
}

// ── Control flow ───────────────────────────────────────────────

#[test]
fn test_while_counting_loop() {
    let prepared = driver().prepare_model(counting_loop()).unwrap();
    let out = SharedMemory::new(4);
    let request = whole_pool_request(
        vec![region(&[0.0]), region(&[5.0])],
        vec![MemoryPool::Region(out.clone())],
    );
    let outcome = prepared.execute(&request, false, None, None).unwrap();
    assert_eq!(outcome.status, ErrorStatus::None);
    assert_eq!(outcome.output_shapes[0].dimensions, vec![1]);
    assert_eq!(out.to_f32s(), vec![5.0]);
}

#[test]
fn test_while_zero_budget_is_transient() {
    let config = RuntimeConfig {
        loop_timeout_ms: 0,
        ..Default::default()
    };
    let prepared = driver_with(config).prepare_model(counting_loop()).unwrap();
    let out = SharedMemory::new(4);
    let request = whole_pool_request(
        vec![region(&[0.0]), region(&[5.0])],
        vec![MemoryPool::Region(out.clone())],
    );
    let err = prepared.execute(&request, false, None, None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::MissedDeadlineTransient);
    assert_eq!(out.to_vec(), vec![0; 4]);
}

#[test]
fn test_while_that_never_iterates_ignores_budget() {
    let config = RuntimeConfig {
        loop_timeout_ms: 0,
        ..Default::default()
    };
    let prepared = driver_with(config).prepare_model(counting_loop()).unwrap();
    let out = SharedMemory::new(4);
    let request = whole_pool_request(
        vec![region(&[7.0]), region(&[5.0])],
        vec![MemoryPool::Region(out.clone())],
    );
    prepared.execute(&request, false, None, None).unwrap();
    assert_eq!(out.to_f32s(), vec![7.0]);
}

#[test]
fn test_if_selects_branch() {
    let prepared = driver().prepare_model(branch_model()).unwrap();
    for (condition, expected) in [(1u8, vec![3.0, -4.0]), (0u8, vec![1.5, 0.0])] {
        let out = SharedMemory::new(8);
        let request = whole_pool_request(
            vec![
                MemoryPool::Region(SharedMemory::from_bytes(vec![condition])),
                region(&[1.5, -2.0]),
            ],
            vec![MemoryPool::Region(out.clone())],
        );
        let outcome = prepared.execute(&request, false, None, None).unwrap();
        assert_eq!(outcome.status, ErrorStatus::None);
        assert_eq!(out.to_f32s(), expected);
    }
}

#[test]
fn test_per_call_loop_timeout() {
    let prepared = driver().prepare_model(counting_loop()).unwrap();
    let run = |loop_timeout| {
        let out = SharedMemory::new(4);
        let request = whole_pool_request(
            vec![region(&[0.0]), region(&[5.0])],
            vec![MemoryPool::Region(out.clone())],
        );
        prepared
            .execute(&request, false, None, loop_timeout)
            .map(|_| out.to_f32s())
    };

    let err = run(Some(Duration::ZERO)).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::MissedDeadlineTransient);
    assert_eq!(run(None).unwrap(), vec![5.0]);
    // Values above the ceiling are clamped rather than rejected.
    let above_ceiling = Duration::from_millis(MAX_LOOP_TIMEOUT_MS * 4);
    assert_eq!(run(Some(above_ceiling)).unwrap(), vec![5.0]);
}

#[test]
fn test_control_flow_arity_rejected_with_permissive_oracle() {
    let driver = Driver::with_components(
        RuntimeConfig::default(),
        Arc::new(ReferenceKernels),
        Arc::new(AcceptAll),
        Arc::new(NoExtensions),
    )
    .unwrap();

    // IF with no branch inputs against single-input branches.
    let mut model = branch_model();
    model.main.operations[0].inputs = vec![0, 2, 3];
    model.main.operands[1].number_of_consumers = 0;
    let err = driver.prepare_model(model).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::InvalidArgument);

    // WHILE carrying one value into a two-input condition and body.
    let mut model = counting_loop();
    model.main.operations[0].inputs = vec![2, 3, 0];
    model.main.operands[1].number_of_consumers = 0;
    let err = driver.prepare_model(model).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::InvalidArgument);
}

// ── Extension types ────────────────────────────────────────────

#[test]
fn test_extension_operands_sized_from_registry() {
    let element = OperandType::extension(1, 0);
    let mut extensions = StaticExtensionRegistry::new();
    extensions.register(
        1,
        0,
        ExtensionTypeInfo {
            is_tensor: true,
            byte_size: 4,
        },
    );
    let driver = Driver::with_components(
        RuntimeConfig::default(),
        Arc::new(CopyKernels),
        Arc::new(AcceptAll),
        Arc::new(extensions),
    )
    .unwrap();
    let model = Model::new(Subgraph {
        operands: vec![
            Operand::tensor(element, vec![2], Lifetime::SubgraphInput).with_consumers(1),
            Operand::tensor(element, vec![2], Lifetime::SubgraphOutput),
        ],
        operations: vec![Operation::new(OperationType::Relu, vec![0], vec![1])],
        input_indexes: vec![0],
        output_indexes: vec![1],
    });
    let prepared = driver.prepare_model(model).unwrap();

    let input: Vec<u8> = (1..=8).collect();
    let out = SharedMemory::new(8);
    let request = whole_pool_request(
        vec![MemoryPool::Region(SharedMemory::from_bytes(input.clone()))],
        vec![MemoryPool::Region(out.clone())],
    );
    let outcome = prepared.execute(&request, false, None, None).unwrap();
    assert_eq!(outcome.status, ErrorStatus::None);
    assert_eq!(outcome.output_shapes[0].dimensions, vec![2]);
    assert_eq!(out.to_vec(), input);

    // The same model on a four-byte output reports the eight it needs.
    let short = whole_pool_request(
        vec![MemoryPool::Region(SharedMemory::from_bytes(input))],
        vec![MemoryPool::Region(SharedMemory::new(4))],
    );
    let outcome = prepared.execute(&short, false, None, None).unwrap();
    assert_eq!(outcome.status, ErrorStatus::OutputInsufficientSize);
    assert!(!outcome.output_shapes[0].is_sufficient);
}

// ── Registry tokens ────────────────────────────────────────────

#[test]
fn test_token_buffers_round_trip() {
    let driver = driver();
    let prepared = driver.prepare_model(add_model(vec![2])).unwrap();
    let lhs = driver.allocate(&[], &[(&prepared, IoType::Input, 0)]).unwrap();
    let result = driver
        .allocate(&[], &[(&prepared, IoType::Output, 0), (&prepared, IoType::Input, 0)])
        .unwrap();

    let lhs_buffer = lhs.buffer().unwrap();
    let bytes: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
    lhs_buffer.copy_from(&bytes, &[]).unwrap();

    let request = Request::new(
        vec![RequestArgument::whole_pool(0), RequestArgument::whole_pool(1)],
        vec![RequestArgument::whole_pool(2)],
        vec![
            MemoryPool::Token(lhs.token()),
            region(&[10.0, 20.0]),
            MemoryPool::Token(result.token()),
        ],
    );
    let result_buffer = result.buffer().unwrap();
    assert!(!result_buffer.is_initialized());
    prepared.execute(&request, false, None, None).unwrap();
    assert!(result_buffer.is_initialized());
    assert_eq!(result_buffer.dimensions(), vec![2]);

    let mut readback = vec![0u8; 8];
    result_buffer.copy_to(&mut readback).unwrap();
    assert_eq!(readback, SharedMemory::from_f32s(&[11.0, 22.0]).to_vec());

    // The result feeds the next execution as an input.
    let out = SharedMemory::new(8);
    let chained = Request::new(
        vec![RequestArgument::whole_pool(0), RequestArgument::whole_pool(1)],
        vec![RequestArgument::whole_pool(2)],
        vec![
            MemoryPool::Token(result.token()),
            region(&[1.0, 1.0]),
            MemoryPool::Region(out.clone()),
        ],
    );
    prepared.execute(&chained, false, None, None).unwrap();
    assert_eq!(out.to_f32s(), vec![12.0, 23.0]);
}

#[test]
fn test_uninitialized_token_input_fails() {
    let driver = driver();
    let prepared = driver.prepare_model(add_model(vec![2])).unwrap();
    let lhs = driver.allocate(&[], &[(&prepared, IoType::Input, 0)]).unwrap();
    let request = Request::new(
        vec![RequestArgument::whole_pool(0), RequestArgument::whole_pool(1)],
        vec![RequestArgument::whole_pool(2)],
        vec![
            MemoryPool::Token(lhs.token()),
            region(&[1.0, 1.0]),
            MemoryPool::Region(SharedMemory::new(8)),
        ],
    );
    let err = prepared.execute(&request, false, None, None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::GeneralFailure);
}

#[test]
fn test_token_in_wrong_role_is_rejected() {
    let driver = driver();
    let prepared = driver.prepare_model(add_model(vec![2])).unwrap();
    let other = driver.prepare_model(add_model(vec![2])).unwrap();
    let out = driver.allocate(&[], &[(&other, IoType::Output, 0)]).unwrap();
    let request = whole_pool_request(
        vec![region(&[1.0, 2.0]), region(&[3.0, 4.0])],
        vec![MemoryPool::Token(out.token())],
    );
    let err = prepared.execute(&request, false, None, None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::InvalidArgument);
}

#[test]
fn test_token_output_too_small_is_general_failure() {
    let driver = driver();
    let prepared = driver.prepare_model(add_model(vec![0])).unwrap();
    let out = driver.allocate(&[1], &[(&prepared, IoType::Output, 0)]).unwrap();
    let request = whole_pool_request(
        vec![region(&[1.0, 2.0]), region(&[3.0, 4.0])],
        vec![MemoryPool::Token(out.token())],
    );
    let err = prepared.execute(&request, false, None, None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::GeneralFailure);
    assert!(!out.buffer().unwrap().is_initialized());
}

#[test]
fn test_released_token_is_unknown() {
    let driver = driver();
    let prepared = driver.prepare_model(add_model(vec![2])).unwrap();
    let handle = driver.allocate(&[], &[(&prepared, IoType::Output, 0)]).unwrap();
    let token = handle.token();
    drop(handle);
    let request = whole_pool_request(
        vec![region(&[1.0, 2.0]), region(&[3.0, 4.0])],
        vec![MemoryPool::Token(token)],
    );
    let err = prepared.execute(&request, false, None, None).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::InvalidArgument);
}

// ── Concurrency ────────────────────────────────────────────────

#[test]
fn test_concurrent_executions_are_independent() {
    let prepared = driver().prepare_model(add_model(vec![2])).unwrap();
    let workers: Vec<_> = (0..4)
        .map(|t| {
            let prepared = Arc::clone(&prepared);
            std::thread::spawn(move || {
                let base = t as f32;
                let out = SharedMemory::new(8);
                let request = whole_pool_request(
                    vec![region(&[base, base]), region(&[1.0, 2.0])],
                    vec![MemoryPool::Region(out.clone())],
                );
                for _ in 0..25 {
                    prepared.execute(&request, false, None, None).unwrap();
                }
                (base, out.to_f32s())
            })
        })
        .collect();
    for worker in workers {
        let (base, values) = worker.join().unwrap();
        assert_eq!(values, vec![base + 1.0, base + 2.0]);
    }
    assert_eq!(prepared.stats().succeeded, 100);
}

#[tokio::test]
async fn test_execute_async() {
    let prepared = driver().prepare_model(add_model(vec![2])).unwrap();
    let out = SharedMemory::new(8);
    let request = whole_pool_request(
        vec![region(&[1.0, 2.0]), region(&[3.0, 4.0])],
        vec![MemoryPool::Region(out.clone())],
    );
    let outcome = prepared.execute_async(request, true, None, None).await.unwrap();
    assert_eq!(outcome.status, ErrorStatus::None);
    assert!(!outcome.timing.is_unavailable());
    assert_eq!(out.to_f32s(), vec![4.0, 6.0]);
}
