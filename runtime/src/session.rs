//! Device session: the dispatch path of the scheduler.
//!
//! A [`Session`] owns the device handle, the program cache and the command
//! queues. It is the explicit replacement for a process-wide cache: create
//! one per device and pass it to whatever runs operations.

use std::sync::Arc;

use snafu::{OptionExt, ResultExt, ensure};
use tessera_device::{Device, Program, Tensor};

use crate::config::RuntimeConfig;
use crate::error::{CompileSnafu, DeviceSnafu, QueueOutOfRangeSnafu, Result, ValidationSnafu};
use crate::operation::{DeviceOperation, Stage};
use crate::program_cache::ProgramCache;
use crate::queue::{CommandQueue, Event};

/// Outputs and the device-bound program of one invocation.
#[derive(Debug)]
pub struct Dispatch {
    pub outputs: Vec<Tensor>,
    /// Snapshot of the plan with this invocation's addresses.
    pub program: Program,
    pub cache_hit: bool,
}

#[derive(Debug)]
pub struct Session {
    device: Arc<dyn Device>,
    cache: ProgramCache,
    queues: Vec<CommandQueue>,
}

impl Session {
    pub fn new(device: Arc<dyn Device>, config: RuntimeConfig) -> Self {
        let queues = (0..config.num_queues).map(CommandQueue::new).collect();
        tracing::debug!(
            device = device.id(),
            queues = config.num_queues,
            program_cache = config.program_cache,
            "opened session"
        );
        Self { device, cache: ProgramCache::new(config.program_cache), queues }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn program_cache(&self) -> &ProgramCache {
        &self.cache
    }

    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    pub fn queue(&self, queue: usize) -> Result<&CommandQueue> {
        self.queues.get(queue).context(QueueOutOfRangeSnafu { queue, num_queues: self.queues.len() })
    }

    /// Drive `op` through every stage up to a device-bound program.
    #[tracing::instrument(skip_all, fields(op = op.name()))]
    pub fn prepare(&self, op: &dyn DeviceOperation, inputs: &[Tensor]) -> Result<Dispatch> {
        let name = op.name();

        op.validate(inputs)?;
        tracing::trace!(stage = %Stage::Validated);

        let shapes = op.compute_output_shapes(inputs)?;
        tracing::trace!(stage = %Stage::ShapesComputed, outputs = shapes.len());

        let outputs = op.create_output_tensors(inputs)?;
        ensure!(
            outputs.len() == shapes.len() && outputs.iter().zip(&shapes).all(|(tensor, shape)| tensor.shape() == shape),
            ValidationSnafu { op: name, reason: "allocated outputs do not match computed output shapes" }
        );
        tracing::trace!(stage = %Stage::OutputsAllocated);

        let build = || -> Result<Program> {
            let mut program = op.create_program(inputs, &outputs)?;
            program
                .compile(self.device.compute_grid_size(), &self.device.circular_buffer_region())
                .context(CompileSnafu { op: name })?;
            Ok(program)
        };

        let (program, cache_hit) = if self.cache.is_enabled() {
            let signature = op.compute_program_hash(inputs)?;
            let cached = self.cache.get_or_create(signature, build)?;

            let mut shared = cached.program.lock();
            if cached.cache_hit {
                let input_addresses = addresses(inputs)?;
                let output_addresses = addresses(&outputs)?;
                shared.apply_new_addresses(&input_addresses, &output_addresses).context(DeviceSnafu)?;
            }
            (Program::clone(&shared), cached.cache_hit)
        } else {
            (build()?, false)
        };
        tracing::debug!(stage = %Stage::ProgramReady, program = program.name(), cache_hit);

        Ok(Dispatch { outputs, program, cache_hit })
    }

    /// Run `op` on `queue` and return its outputs as soon as the launch is enqueued.
    ///
    /// Inputs and outputs are kept alive by the queued task until the launch
    /// completes. Launch failures surface from [`Session::finish`].
    pub fn run(&self, queue: usize, op: &dyn DeviceOperation, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let command_queue = self.queue(queue)?;
        let Dispatch { outputs, program, .. } = self.prepare(op, inputs)?;

        let device = Arc::clone(&self.device);
        let held = (inputs.to_vec(), outputs.clone());
        command_queue.submit(Box::new(move || {
            let _held = held;
            device.launch(&program).context(DeviceSnafu)
        }));
        tracing::debug!(op = op.name(), queue, stage = %Stage::Dispatched);

        Ok(outputs)
    }

    pub fn record_event(&self, queue: usize) -> Result<Event> {
        Ok(self.queue(queue)?.record_event())
    }

    pub fn wait_for_event(&self, queue: usize, event: &Event) -> Result<()> {
        self.queue(queue)?.wait_for_event(event);
        Ok(())
    }

    pub fn finish(&self, queue: usize) -> Result<()> {
        self.queue(queue)?.finish()
    }

    /// Finish every queue, returning the first error encountered.
    pub fn finish_all(&self) -> Result<()> {
        let mut first = None;
        for queue in &self.queues {
            if let Err(error) = queue.finish() {
                first.get_or_insert(error);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

fn addresses(tensors: &[Tensor]) -> Result<Vec<u32>> {
    tensors.iter().map(|tensor| tensor.address().context(DeviceSnafu)).collect()
}
