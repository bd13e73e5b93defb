//! Accelerator abstraction and the in-process simulator.
//!
//! A [`Device`] is everything the scheduling core needs from hardware: a
//! compute grid, an allocator for its DRAM and L1 banks, the L1 window that
//! circular buffers are placed in, and a way to launch compiled programs.
//!
//! [`SimulatorDevice`] implements it without hardware. Launching validates
//! every core of a program in parallel and records what would have been
//! written to the cores, which is what tests inspect.

use std::collections::BTreeMap;
use std::sync::Arc;

use bon::bon;
use parking_lot::Mutex;
use rayon::prelude::*;
use snafu::ensure;
use tessera_grid::CoreCoord;

use crate::allocator::{Allocator, BankAllocator, BankRange};
use crate::error::{MissingRuntimeArgsSnafu, NotCompiledSnafu, Result};
use crate::program::{CircularBufferRegion, Processor, Program};

pub trait Device: Send + Sync + std::fmt::Debug {
    fn id(&self) -> u32;

    /// Number of worker cores along x and y.
    fn compute_grid_size(&self) -> CoreCoord;

    fn allocator(&self) -> Arc<dyn Allocator>;

    fn circular_buffer_region(&self) -> CircularBufferRegion;

    /// Run a compiled program to completion.
    fn launch(&self, program: &Program) -> Result<()>;
}

// ============================================================================
// SIMULATOR CONFIG
// ============================================================================

/// Geometry and memory map of a simulated device.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub id: u32,
    pub grid_size: CoreCoord,
    pub dram: BankRange,
    pub l1: BankRange,
    pub circular_buffers: CircularBufferRegion,
    pub alignment: u32,
}

#[bon]
impl SimulatorConfig {
    #[builder]
    pub fn new(
        #[builder(default)] id: u32,
        #[builder(default = CoreCoord::new(8, 8))] grid_size: CoreCoord,
        #[builder(default = BankRange { base: 0, size: 1 << 30 })] dram: BankRange,
        #[builder(default = BankRange { base: 0x0010_0000, size: 0x0010_0000 })] l1: BankRange,
        #[builder(default = CircularBufferRegion { base: 0x0001_0000, size: 0x000F_0000 })]
        circular_buffers: CircularBufferRegion,
        #[builder(default = 32)] alignment: u32,
    ) -> Self {
        Self { id, grid_size, dram, l1, circular_buffers, alignment }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

// ============================================================================
// SIMULATOR DEVICE
// ============================================================================

/// Snapshot of one program launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub program: String,
    /// Runtime arguments per kernel source, per core.
    pub runtime_args: Vec<(String, BTreeMap<CoreCoord, Vec<u32>>)>,
    /// Circular buffer index and address, in program order.
    pub circular_buffers: Vec<(u8, u32)>,
}

impl LaunchRecord {
    /// Runtime arguments of the first kernel whose source is `source`.
    pub fn args_of(&self, source: &str, core: CoreCoord) -> Option<&[u32]> {
        self.runtime_args
            .iter()
            .find(|(name, _)| name == source)
            .and_then(|(_, per_core)| per_core.get(&core))
            .map(Vec::as_slice)
    }
}

#[derive(Debug)]
pub struct SimulatorDevice {
    config: SimulatorConfig,
    allocator: Arc<dyn Allocator>,
    launches: Mutex<Vec<LaunchRecord>>,
}

impl SimulatorDevice {
    pub fn new(config: SimulatorConfig) -> Self {
        let allocator: Arc<dyn Allocator> = Arc::new(BankAllocator::new(config.dram, config.l1, config.alignment));
        tracing::debug!(id = config.id, grid = %config.grid_size, "opened simulator device");
        Self { config, allocator, launches: Mutex::new(Vec::new()) }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Every launch so far, oldest first.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().clone()
    }

    pub fn last_launch(&self) -> Option<LaunchRecord> {
        self.launches.lock().last().cloned()
    }

    pub fn num_launches(&self) -> usize {
        self.launches.lock().len()
    }
}

impl Default for SimulatorDevice {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl Device for SimulatorDevice {
    fn id(&self) -> u32 {
        self.config.id
    }

    fn compute_grid_size(&self) -> CoreCoord {
        self.config.grid_size
    }

    fn allocator(&self) -> Arc<dyn Allocator> {
        Arc::clone(&self.allocator)
    }

    fn circular_buffer_region(&self) -> CircularBufferRegion {
        self.config.circular_buffers
    }

    fn launch(&self, program: &Program) -> Result<()> {
        ensure!(program.is_compiled(), NotCompiledSnafu { program: program.name() });

        // Data movement kernels address buffers through runtime args, so every
        // core they are placed on must have received them.
        let data_movement = program.kernels().par_iter().filter(|kernel| kernel.spec().config.processor() != Processor::Compute);
        data_movement.try_for_each(|kernel| {
            let cores: Vec<CoreCoord> = kernel.spec().cores.cores().collect();
            cores.par_iter().try_for_each(|&core| {
                ensure!(
                    kernel.runtime_args(core).is_some(),
                    MissingRuntimeArgsSnafu { program: program.name(), kernel: &kernel.spec().source, core }
                );
                Ok(())
            })
        })?;

        let record = LaunchRecord {
            program: program.name().to_string(),
            runtime_args: program
                .kernels()
                .iter()
                .map(|kernel| (kernel.spec().source.clone(), kernel.all_runtime_args().clone()))
                .collect(),
            circular_buffers: program
                .circular_buffers()
                .iter()
                .filter_map(|cb| cb.address().map(|address| (cb.config().index, address)))
                .collect(),
        };

        tracing::debug!(device = self.config.id, program = %program.name(), kernels = program.kernels().len(), "launched program");
        self.launches.lock().push(record);
        Ok(())
    }
}
