// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The driver front door.
//!
//! ```text
//! Driver::prepare_model(Model<Loaded>)
//!     │  validate against the configured revision
//!     ▼
//! Arc<PreparedModel>
//!     │  .execute(&Request, measure, deadline, loop_timeout)
//!     ▼
//! validate request ──► check token buffers ──► resolve pools ──► CpuExecutor::run
//!                                                                     │
//!                        commit or invalidate token outputs ◄─────────┘
//!     ▼
//! ExecutionOutcome { status, output_shapes, timing }
//! ```
//!
//! Every collaborator the driver consults (kernel dispatcher, operation
//! oracle, extension registry) is injected at construction.

use crate::{
    CpuExecutor, ExecutionStats, ExecutorConfig, KernelDispatcher, PoolResolver, ReferenceKernels,
    RegistryResolver, RuntimeConfig, RuntimeError, MAX_LOOP_TIMEOUT_MS,
};
use buffer_registry::{
    BufferDescriptor, BufferRegistry, BufferRole, IoType, ManagedBuffer, ModelId, TokenHandle,
};
use model_ir::{
    validate_request, Loaded, Model, ModelLoader, OperationValidator, ReferenceOperationValidator,
    Request, Validated, ValidationContext,
};
use nn_core::{byte_size, combine_dimensions, ErrorStatus, ExtensionTypeRegistry, NoExtensions};
use nn_core::{OutputShape, Timing};
use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of one execution that reached the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// `NoError` or `OutputInsufficientSize`.
    pub status: ErrorStatus,
    pub output_shapes: Vec<OutputShape>,
    /// Measured only when requested and the status is `NoError`.
    pub timing: Timing,
}

/// Owns configuration, the buffer registry and the injected collaborators.
pub struct Driver {
    config: RuntimeConfig,
    registry: BufferRegistry,
    kernels: Arc<dyn KernelDispatcher>,
    operations: Arc<dyn OperationValidator>,
    extensions: Arc<dyn ExtensionTypeRegistry>,
    next_model_id: AtomicU64,
}

impl Driver {
    /// A driver with the reference kernels and operation oracle and no
    /// extension types.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::with_components(
            config,
            Arc::new(ReferenceKernels),
            Arc::new(ReferenceOperationValidator),
            Arc::new(NoExtensions),
        )
    }

    pub fn with_components(
        config: RuntimeConfig,
        kernels: Arc<dyn KernelDispatcher>,
        operations: Arc<dyn OperationValidator>,
        extensions: Arc<dyn ExtensionTypeRegistry>,
    ) -> Result<Self, RuntimeError> {
        let budget = config.parse_budget()?;
        tracing::info!(
            revision = %config.revision,
            %budget,
            loop_timeout = ?config.loop_timeout(),
            "driver created"
        );
        Ok(Self {
            config,
            registry: BufferRegistry::new(budget),
            kernels,
            operations,
            extensions,
            next_model_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    /// Validates `model` and returns a handle ready for execution.
    pub fn prepare_model(&self, model: Model<Loaded>) -> Result<Arc<PreparedModel>, RuntimeError> {
        let start = Instant::now();
        let ctx = ValidationContext::new(
            self.config.revision,
            self.operations.as_ref(),
            self.extensions.as_ref(),
        );
        let model = model.validate(&ctx).map_err(|e| {
            tracing::warn!(error = %e, "model rejected");
            e
        })?;
        let id = ModelId::new(self.next_model_id.fetch_add(1, Ordering::Relaxed));
        tracing::info!(model = %id, elapsed = ?start.elapsed(), "{}", model.summary());

        Ok(Arc::new(PreparedModel {
            id,
            model: Arc::new(model),
            kernels: Arc::clone(&self.kernels),
            extensions: Arc::clone(&self.extensions),
            registry: self.registry.clone(),
            executor_config: self.config.executor_config(),
            allow_unspecified_output: self.config.allow_unspecified_output,
            stats: Mutex::new(ExecutionStats::default()),
        }))
    }

    /// Loads a model directory (see [`ModelLoader`]) and prepares it.
    pub fn load_model(&self, model_dir: &Path) -> Result<Arc<PreparedModel>, RuntimeError> {
        self.prepare_model(ModelLoader::load(model_dir)?)
    }

    /// Allocates a registry buffer usable in the given roles.
    ///
    /// Each role names a prepared model, a direction and an argument index.
    /// The element type comes from the role operands, which must agree; the
    /// shape is `dimensions` merged with every role operand's shape and must
    /// end up fully specified.
    pub fn allocate(
        &self,
        dimensions: &[u32],
        roles: &[(&PreparedModel, IoType, usize)],
    ) -> Result<TokenHandle, RuntimeError> {
        let mut operand_type = None;
        let mut merged = dimensions.to_vec();
        for &(prepared, io, index) in roles {
            let main = &prepared.model.main;
            let operand = match io {
                IoType::Input => main.input_operand(index),
                IoType::Output => main.output_operand(index),
            }
            .ok_or_else(|| {
                RuntimeError::InvalidArgument(format!(
                    "{} has no {io} {index}",
                    prepared.id
                ))
            })?;
            match operand_type {
                Some(t) if t != operand.operand_type => {
                    return Err(RuntimeError::InvalidArgument(format!(
                        "roles disagree on element type: {t} vs {}",
                        operand.operand_type
                    )));
                }
                _ => operand_type = Some(operand.operand_type),
            }
            merged = combine_dimensions(&merged, &operand.dimensions).ok_or_else(|| {
                RuntimeError::InvalidArgument(format!(
                    "dimensions {merged:?} incompatible with {io} {index} of {}",
                    prepared.id
                ))
            })?;
        }
        let operand_type = operand_type
            .ok_or_else(|| RuntimeError::InvalidArgument("no roles given".into()))?;
        let element = operand_type.element_size().ok_or_else(|| {
            RuntimeError::InvalidArgument(format!("cannot allocate {operand_type}"))
        })?;
        let capacity = byte_size(element, operand_type.is_scalar(), &merged).ok_or_else(|| {
            RuntimeError::InvalidArgument(format!("size of {merged:?} overflows"))
        })?;

        let roles = roles
            .iter()
            .map(|&(prepared, io, index)| match io {
                IoType::Input => BufferRole::input(prepared.id, index),
                IoType::Output => BufferRole::output(prepared.id, index),
            })
            .collect();
        let handle = self.registry.allocate(BufferDescriptor {
            capacity,
            operand_type,
            dimensions: merged,
            roles,
        })?;
        tracing::debug!(
            token = handle.token(),
            available = self.registry.available_bytes(),
            "registry buffer allocated"
        );
        Ok(handle)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

// ── Prepared model ─────────────────────────────────────────────────

/// A validated model bound to a driver's registry and kernels.
///
/// Executions are independent of one another; the model itself is never
/// mutated, so any number of threads may execute concurrently.
pub struct PreparedModel {
    id: ModelId,
    model: Arc<Model<Validated>>,
    kernels: Arc<dyn KernelDispatcher>,
    extensions: Arc<dyn ExtensionTypeRegistry>,
    registry: BufferRegistry,
    executor_config: ExecutorConfig,
    allow_unspecified_output: bool,
    stats: Mutex<ExecutionStats>,
}

impl PreparedModel {
    /// Identity used in registry buffer roles.
    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn model(&self) -> &Model<Validated> {
        &self.model
    }

    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    /// Returns a snapshot of execution statistics.
    pub fn stats(&self) -> ExecutionStats {
        self.stats_lock().clone()
    }

    fn stats_lock(&self) -> MutexGuard<'_, ExecutionStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validates and runs `request` on the calling thread.
    ///
    /// A `deadline` that has already passed fails with a persistent missed
    /// deadline; one that passes mid-execution fails transiently. `Ok` is
    /// returned for `NoError` and for `OutputInsufficientSize`.
    ///
    /// `loop_timeout` bounds each WHILE loop of this execution and is
    /// clamped to [`MAX_LOOP_TIMEOUT_MS`]; `None` uses the configured budget.
    pub fn execute(
        &self,
        request: &Request,
        measure: bool,
        deadline: Option<Instant>,
        loop_timeout: Option<Duration>,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        let start = Instant::now();
        let loop_timeout = loop_timeout
            .map(|t| t.min(Duration::from_millis(MAX_LOOP_TIMEOUT_MS)))
            .unwrap_or(self.executor_config.loop_timeout);
        let result = self.execute_inner(request, measure, deadline, loop_timeout, start);
        let elapsed = start.elapsed();

        let status = match &result {
            Ok(outcome) => outcome.status,
            Err(e) => e.status(),
        };
        self.stats_lock().record(status, elapsed);
        match &result {
            Ok(_) => tracing::debug!(model = %self.id, %status, ?elapsed, "execution finished"),
            Err(e) => tracing::warn!(model = %self.id, %status, error = %e, "execution failed"),
        }
        result
    }

    /// Runs [`execute`](Self::execute) on the tokio blocking pool.
    pub async fn execute_async(
        self: &Arc<Self>,
        request: Request,
        measure: bool,
        deadline: Option<Instant>,
        loop_timeout: Option<Duration>,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        let prepared = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            prepared.execute(&request, measure, deadline, loop_timeout)
        })
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("execution task failed: {e}")))?
    }

    fn execute_inner(
        &self,
        request: &Request,
        measure: bool,
        deadline: Option<Instant>,
        loop_timeout: Duration,
        start: Instant,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        if deadline.is_some_and(|d| start >= d) {
            return Err(RuntimeError::MissedDeadline { persistent: true });
        }

        let buffers = request
            .tokens()
            .map(|(pool, token)| self.registry.get(token).map(|buffer| (pool, buffer)))
            .collect::<Result<Vec<_>, _>>()?;
        let request = with_token_dimensions(request, &buffers);

        validate_request(&request, &self.model, self.allow_unspecified_output)?;
        for (pool, buffer) in &buffers {
            buffer.validate_as_request_argument(*pool as u32, &request, self.id)?;
        }
        let pools = RegistryResolver::new(self.registry.clone()).resolve_all(&request.pools)?;

        let token_outputs: Vec<(usize, &Arc<ManagedBuffer>)> = request
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, arg)| !arg.has_no_value)
            .filter_map(|(i, arg)| {
                buffers
                    .iter()
                    .find(|(pool, _)| *pool == arg.location.pool_index as usize)
                    .map(|(_, buffer)| (i, buffer))
            })
            .collect();
        let invalidate_outputs = || {
            for (_, buffer) in &token_outputs {
                buffer.set_initialized(false);
            }
        };

        let run_start = Instant::now();
        let executor = CpuExecutor::new(self.kernels.as_ref(), &self.executor_config)
            .with_extensions(self.extensions.as_ref())
            .with_loop_timeout(loop_timeout)
            .with_deadline(deadline);
        let run = match executor.run(&self.model, &request, &pools) {
            Ok(run) => run,
            Err(e) => {
                invalidate_outputs();
                return Err(e);
            }
        };
        let on_device = run_start.elapsed();

        if run.status == ErrorStatus::OutputInsufficientSize {
            invalidate_outputs();
            if let Some(&(output, _)) = token_outputs
                .iter()
                .find(|(i, _)| !run.output_shapes[*i].is_sufficient)
            {
                return Err(RuntimeError::TokenOutputTooSmall { output });
            }
            return Ok(ExecutionOutcome {
                status: run.status,
                output_shapes: run.output_shapes,
                timing: Timing::UNAVAILABLE,
            });
        }

        for (i, buffer) in &token_outputs {
            if let Err(e) = buffer.update_dimensions(&run.output_shapes[*i].dimensions) {
                invalidate_outputs();
                return Err(e.into());
            }
            buffer.set_initialized(true);
        }

        let timing = if measure {
            Timing::from_durations(on_device, start.elapsed())
        } else {
            Timing::UNAVAILABLE
        };
        Ok(ExecutionOutcome {
            status: run.status,
            output_shapes: run.output_shapes,
            timing,
        })
    }
}

impl std::fmt::Debug for PreparedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedModel")
            .field("id", &self.id)
            .field("operations", &self.model.num_operations())
            .finish()
    }
}

/// Token inputs without a dimension override take the buffer's committed
/// shape.
fn with_token_dimensions<'r>(
    request: &'r Request,
    buffers: &[(usize, Arc<ManagedBuffer>)],
) -> Cow<'r, Request> {
    let needs_fill = |arg: &model_ir::RequestArgument| {
        !arg.has_no_value
            && arg.dimensions.is_empty()
            && buffers
                .iter()
                .any(|(pool, _)| *pool == arg.location.pool_index as usize)
    };
    if !request.inputs.iter().any(needs_fill) {
        return Cow::Borrowed(request);
    }

    let mut filled = request.clone();
    for arg in filled.inputs.iter_mut().filter(|a| needs_fill(a)) {
        if let Some((_, buffer)) = buffers
            .iter()
            .find(|(pool, _)| *pool == arg.location.pool_index as usize)
        {
            arg.dimensions = buffer.dimensions();
        }
    }
    Cow::Owned(filled)
}
