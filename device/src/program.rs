//! Compiled per-core execution plans.
//!
//! A [`Program`] binds kernels to core sets, configures the circular buffers
//! that stage tiles between them, and stores per-core runtime arguments. The
//! plan does not depend on where its tensors live except through the slots
//! recorded in its [`AddressPatch`], which is what lets a cached program be
//! reused for new buffers by rewriting a handful of integers.
//!
//! # Lifecycle
//!
//! ```ignore
//! let mut program = Program::new("eltwise_binary");
//! let reader = program.add_kernel(KernelSpec::builder()...build())?;
//! program.set_runtime_args(reader, core, vec![src_addr, num_tiles, start])?;
//! program.patch_runtime_arg(reader, core, 0, BufferSource::Input(0))?;
//! program.compile(device.compute_grid_size(), &device.circular_buffer_region())?;
//! // later, on a cache hit:
//! program.apply_new_addresses(&[new_src], &[new_dst])?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use bon::bon;
use snafu::{OptionExt, ResultExt, ensure};
use tessera_grid::{CoreCoord, CoreRangeSet};
use xxhash_rust::xxh64::Xxh64;

use crate::error::{
    BufferIndexSnafu, CompileSnafu, CoreNotInKernelSnafu, CoreOutOfGridSnafu, GeometrySnafu, Result,
    RuntimeArgIndexSnafu, UnknownCircularBufferSnafu, UnknownKernelSnafu,
};
use crate::tensor::DataType;

/// First circular buffer index reserved for kernel outputs.
pub const OUTPUT_CB_INDEX: u8 = 16;
/// Intermediate buffers follow the outputs.
pub const INTERMEDIATE_CB_INDEX: u8 = 24;
pub const NUM_CIRCULAR_BUFFERS: u8 = 32;

// ============================================================================
// HANDLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelHandle(usize);

impl KernelHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircularBufferHandle(usize);

impl CircularBufferHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CircularBufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// KERNELS
// ============================================================================

/// RISC-V data movement cores. By convention readers run on `Riscv1` and
/// writers on `Riscv0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum DataMovementProcessor {
    Riscv0,
    Riscv1,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
pub enum MathFidelity {
    LoFi,
    HiFi2,
    HiFi3,
    #[default]
    HiFi4,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ComputeConfig {
    pub math_fidelity: MathFidelity,
    pub fp32_dest_acc_en: bool,
    pub math_approx_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelConfig {
    DataMovement { processor: DataMovementProcessor },
    Compute(ComputeConfig),
}

impl KernelConfig {
    pub const fn reader() -> Self {
        Self::DataMovement { processor: DataMovementProcessor::Riscv1 }
    }

    pub const fn writer() -> Self {
        Self::DataMovement { processor: DataMovementProcessor::Riscv0 }
    }

    pub fn compute() -> Self {
        Self::Compute(ComputeConfig::default())
    }

    /// Hardware slot the kernel occupies on each of its cores.
    pub fn processor(&self) -> Processor {
        match self {
            Self::DataMovement { processor: DataMovementProcessor::Riscv0 } => Processor::Riscv0,
            Self::DataMovement { processor: DataMovementProcessor::Riscv1 } => Processor::Riscv1,
            Self::Compute(_) => Processor::Compute,
        }
    }
}

/// A core runs at most one kernel per processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Processor {
    Riscv0,
    Riscv1,
    Compute,
}

/// Kernel source bound to a set of cores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelSpec {
    /// Opaque source identifier.
    pub source: String,
    pub cores: CoreRangeSet,
    pub config: KernelConfig,
    pub compile_args: Vec<u32>,
    pub defines: BTreeMap<String, String>,
}

#[bon]
impl KernelSpec {
    #[builder]
    pub fn new(
        #[builder(into)] source: String,
        #[builder(into)] cores: CoreRangeSet,
        config: KernelConfig,
        #[builder(default)] compile_args: Vec<u32>,
        #[builder(default)] defines: BTreeMap<String, String>,
    ) -> Self {
        Self { source, cores, config, compile_args, defines }
    }
}

#[derive(Debug, Clone)]
pub struct Kernel {
    spec: KernelSpec,
    runtime_args: BTreeMap<CoreCoord, Vec<u32>>,
    binary_key: Option<u64>,
}

impl Kernel {
    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    pub fn runtime_args(&self, core: CoreCoord) -> Option<&[u32]> {
        self.runtime_args.get(&core).map(Vec::as_slice)
    }

    /// Per-core arguments ordered by core.
    pub fn all_runtime_args(&self) -> &BTreeMap<CoreCoord, Vec<u32>> {
        &self.runtime_args
    }

    /// Key of the compiled kernel binary, set by [`Program::compile`].
    pub fn binary_key(&self) -> Option<u64> {
        self.binary_key
    }

    fn compute_binary_key(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        self.spec.source.hash(&mut hasher);
        self.spec.config.hash(&mut hasher);
        self.spec.compile_args.hash(&mut hasher);
        self.spec.defines.hash(&mut hasher);
        hasher.finish()
    }
}

// ============================================================================
// CIRCULAR BUFFERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CircularBufferConfig {
    pub index: u8,
    pub cores: CoreRangeSet,
    pub num_pages: u32,
    pub page_size: u32,
    pub data_format: DataType,
    /// Backed by an existing L1 buffer instead of the circular buffer region.
    pub global_address: Option<u32>,
}

impl CircularBufferConfig {
    pub fn new(index: u8, cores: impl Into<CoreRangeSet>, num_pages: u32, page_size: u32, data_format: DataType) -> Self {
        Self { index, cores: cores.into(), num_pages, page_size, data_format, global_address: None }
    }

    /// Place the buffer at `address`, typically a sharded tensor's L1 buffer.
    pub fn with_global_address(mut self, address: u32) -> Self {
        self.global_address = Some(address);
        self
    }

    pub fn total_size(&self) -> u64 {
        u64::from(self.num_pages) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone)]
pub struct CircularBuffer {
    config: CircularBufferConfig,
    address: Option<u32>,
}

impl CircularBuffer {
    pub fn config(&self) -> &CircularBufferConfig {
        &self.config
    }

    /// Address on every core of the buffer; known after compilation.
    pub fn address(&self) -> Option<u32> {
        self.address
    }

    pub fn is_globally_allocated(&self) -> bool {
        self.config.global_address.is_some()
    }
}

/// L1 window that locally allocated circular buffers are stacked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularBufferRegion {
    pub base: u32,
    pub size: u32,
}

// ============================================================================
// ADDRESS PATCH
// ============================================================================

/// Which invocation buffer an address comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferSource {
    Input(usize),
    Output(usize),
}

impl fmt::Display for BufferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(i) => write!(f, "input {i}"),
            Self::Output(i) => write!(f, "output {i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchTarget {
    RuntimeArg { kernel: KernelHandle, core: CoreCoord, index: usize },
    CircularBuffer(CircularBufferHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchSlot {
    pub target: PatchTarget,
    pub source: BufferSource,
}

/// The slots of a program that hold buffer addresses.
///
/// Everything else in a compiled program depends only on the invocation's
/// signature; these slots are rewritten on every reuse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressPatch {
    slots: Vec<PatchSlot>,
}

impl AddressPatch {
    pub fn slots(&self) -> &[PatchSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn push(&mut self, target: PatchTarget, source: BufferSource) {
        self.slots.push(PatchSlot { target, source });
    }
}

// ============================================================================
// PROGRAM
// ============================================================================

#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    kernels: Vec<Kernel>,
    circular_buffers: Vec<CircularBuffer>,
    address_patch: AddressPatch,
    compiled: bool,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kernels: Vec::new(),
            circular_buffers: Vec::new(),
            address_patch: AddressPatch::default(),
            compiled: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Handle of the first kernel built from `source`.
    pub fn find_kernel(&self, source: &str) -> Option<KernelHandle> {
        self.kernels.iter().position(|kernel| kernel.spec.source == source).map(KernelHandle)
    }

    pub fn kernel(&self, handle: KernelHandle) -> Result<&Kernel> {
        self.kernels.get(handle.0).context(UnknownKernelSnafu { kernel: handle })
    }

    pub fn circular_buffers(&self) -> &[CircularBuffer] {
        &self.circular_buffers
    }

    pub fn circular_buffer(&self, handle: CircularBufferHandle) -> Result<&CircularBuffer> {
        self.circular_buffers.get(handle.0).context(UnknownCircularBufferSnafu { cb: handle })
    }

    pub fn address_patch(&self) -> &AddressPatch {
        &self.address_patch
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn add_kernel(&mut self, spec: KernelSpec) -> KernelHandle {
        let handle = KernelHandle(self.kernels.len());
        self.kernels.push(Kernel { spec, runtime_args: BTreeMap::new(), binary_key: None });
        self.compiled = false;
        handle
    }

    pub fn add_circular_buffer(&mut self, config: CircularBufferConfig) -> CircularBufferHandle {
        let handle = CircularBufferHandle(self.circular_buffers.len());
        let address = config.global_address;
        self.circular_buffers.push(CircularBuffer { config, address });
        self.compiled = false;
        handle
    }

    /// Replace the runtime arguments of `kernel` on `core`.
    pub fn set_runtime_args(&mut self, kernel: KernelHandle, core: CoreCoord, args: Vec<u32>) -> Result<()> {
        let entry = self.kernels.get_mut(kernel.0).context(UnknownKernelSnafu { kernel })?;
        ensure!(entry.spec.cores.core_coord_in_core_ranges(core), CoreNotInKernelSnafu { kernel, core });
        entry.runtime_args.insert(core, args);
        Ok(())
    }

    /// Give every core of `cores` the same runtime arguments.
    pub fn set_common_runtime_args(&mut self, kernel: KernelHandle, cores: &CoreRangeSet, args: &[u32]) -> Result<()> {
        for core in cores.cores() {
            self.set_runtime_args(kernel, core, args.to_vec())?;
        }
        Ok(())
    }

    pub fn runtime_args(&self, kernel: KernelHandle, core: CoreCoord) -> Result<&[u32]> {
        let entry = self.kernel(kernel)?;
        entry.runtime_args(core).context(RuntimeArgIndexSnafu { kernel, core, index: 0usize, len: 0usize })
    }

    /// Record that runtime argument `index` of `kernel` on `core` holds the
    /// address of `source`.
    pub fn patch_runtime_arg(
        &mut self,
        kernel: KernelHandle,
        core: CoreCoord,
        index: usize,
        source: BufferSource,
    ) -> Result<()> {
        let len = self.runtime_args(kernel, core)?.len();
        ensure!(index < len, RuntimeArgIndexSnafu { kernel, core, index, len });
        self.address_patch.push(PatchTarget::RuntimeArg { kernel, core, index }, source);
        Ok(())
    }

    /// Record that a globally allocated circular buffer sits at the address of `source`.
    pub fn patch_circular_buffer(&mut self, cb: CircularBufferHandle, source: BufferSource) -> Result<()> {
        let entry = self.circular_buffer(cb)?;
        ensure!(
            entry.is_globally_allocated(),
            CompileSnafu {
                program: self.name.clone(),
                reason: format!("circular buffer {cb} is not globally allocated and cannot follow a tensor"),
            }
        );
        self.address_patch.push(PatchTarget::CircularBuffer(cb), source);
        Ok(())
    }

    /// Rewrite every recorded address slot for a new set of buffers.
    ///
    /// All slots are resolved before any is written, so a failure leaves the
    /// program untouched. Returns the number of slots written.
    pub fn apply_new_addresses(&mut self, inputs: &[u32], outputs: &[u32]) -> Result<usize> {
        let resolve = |source: BufferSource| -> Result<u32> {
            let (buffers, index) = match source {
                BufferSource::Input(i) => (inputs, i),
                BufferSource::Output(i) => (outputs, i),
            };
            buffers.get(index).copied().context(BufferIndexSnafu { buffer: source, available: buffers.len() })
        };

        let resolved: Vec<(PatchTarget, u32)> = self
            .address_patch
            .slots
            .iter()
            .map(|slot| Ok((slot.target, resolve(slot.source)?)))
            .collect::<Result<_>>()?;

        for &(target, _) in &resolved {
            if let PatchTarget::RuntimeArg { kernel, core, index } = target {
                let len = self.runtime_args(kernel, core)?.len();
                ensure!(index < len, RuntimeArgIndexSnafu { kernel, core, index, len });
            }
        }

        for &(target, address) in &resolved {
            match target {
                PatchTarget::RuntimeArg { kernel, core, index } => {
                    if let Some(args) = self.kernels[kernel.0].runtime_args.get_mut(&core) {
                        args[index] = address;
                    }
                    tracing::trace!(program = %self.name, %kernel, %core, index, address, "patched runtime arg");
                }
                PatchTarget::CircularBuffer(cb) => {
                    let entry = &mut self.circular_buffers[cb.0];
                    entry.config.global_address = Some(address);
                    entry.address = Some(address);
                    tracing::trace!(program = %self.name, %cb, address, "patched circular buffer");
                }
            }
        }

        Ok(resolved.len())
    }

    /// Check placement and assign circular buffer addresses and binary keys.
    ///
    /// Fails if a kernel or circular buffer touches a core outside `grid`, two
    /// kernels share a processor on some core, two circular buffers with the
    /// same index share a core, or the locally allocated buffers of a core
    /// overflow `region`.
    pub fn compile(&mut self, grid: CoreCoord, region: &CircularBufferRegion) -> Result<()> {
        let full_grid = CoreRangeSet::from(tessera_grid::CoreRange::grid(grid).context(GeometrySnafu)?);

        for (i, kernel) in self.kernels.iter().enumerate() {
            check_in_grid(&kernel.spec.cores, &full_grid, grid, || format!("kernel {} ({})", i, kernel.spec.source))?;
        }
        for (i, cb) in self.circular_buffers.iter().enumerate() {
            check_in_grid(&cb.config.cores, &full_grid, grid, || format!("circular buffer #{i} (index {})", cb.config.index))?;
        }

        self.check_processor_conflicts()?;
        self.check_circular_buffer_conflicts()?;
        self.place_circular_buffers(region)?;

        for kernel in &mut self.kernels {
            kernel.binary_key = Some(kernel.compute_binary_key());
        }
        self.compiled = true;

        tracing::debug!(
            program = %self.name,
            kernels = self.kernels.len(),
            circular_buffers = self.circular_buffers.len(),
            patch_slots = self.address_patch.len(),
            "compiled program"
        );
        Ok(())
    }

    fn compile_error(&self, reason: String) -> crate::error::Error {
        CompileSnafu { program: self.name.clone(), reason }.build()
    }

    fn check_processor_conflicts(&self) -> Result<()> {
        for (i, a) in self.kernels.iter().enumerate() {
            for (j, b) in self.kernels.iter().enumerate().skip(i + 1) {
                if a.spec.config.processor() == b.spec.config.processor() && a.spec.cores.intersects_set(&b.spec.cores) {
                    return Err(self.compile_error(format!(
                        "kernels {i} and {j} both occupy processor {} on overlapping cores",
                        a.spec.config.processor()
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_circular_buffer_conflicts(&self) -> Result<()> {
        for (i, a) in self.circular_buffers.iter().enumerate() {
            ensure!(
                a.config.index < NUM_CIRCULAR_BUFFERS,
                CompileSnafu { program: self.name.clone(), reason: format!("circular buffer index {} out of range", a.config.index) }
            );
            for b in self.circular_buffers.iter().skip(i + 1) {
                if a.config.index == b.config.index && a.config.cores.intersects_set(&b.config.cores) {
                    return Err(self.compile_error(format!(
                        "circular buffer index {} configured twice on overlapping cores",
                        a.config.index
                    )));
                }
            }
        }
        Ok(())
    }

    /// Stack local circular buffers per core, each at the lowest address free on all of its cores.
    fn place_circular_buffers(&mut self, region: &CircularBufferRegion) -> Result<()> {
        let limit = u64::from(region.base) + u64::from(region.size);
        let mut top: HashMap<CoreCoord, u64> = HashMap::new();

        for i in 0..self.circular_buffers.len() {
            let cb = &self.circular_buffers[i];
            if let Some(address) = cb.config.global_address {
                self.circular_buffers[i].address = Some(address);
                continue;
            }

            let cores: Vec<CoreCoord> = cb.config.cores.cores().collect();
            let start = cores.iter().map(|core| top.get(core).copied().unwrap_or(u64::from(region.base))).max();
            let start = start.unwrap_or(u64::from(region.base));
            let end = start + cb.config.total_size();
            if end > limit {
                return Err(self.compile_error(format!(
                    "circular buffers need {} bytes of L1, region holds {}",
                    end - u64::from(region.base),
                    region.size
                )));
            }

            for core in cores {
                top.insert(core, end);
            }
            // `end <= limit` keeps the start inside the 32-bit region.
            self.circular_buffers[i].address = Some(start as u32);
        }
        Ok(())
    }
}

fn check_in_grid(
    cores: &CoreRangeSet,
    full_grid: &CoreRangeSet,
    grid: CoreCoord,
    owner: impl FnOnce() -> String,
) -> Result<()> {
    let outside = cores.ranges().iter().find(|range| !full_grid.contains_range(range));
    match outside {
        Some(range) => {
            let core = range.cores().find(|core| !core.within(grid)).unwrap_or(range.end());
            CoreOutOfGridSnafu { owner: owner(), core, grid }.fail()
        }
        None => Ok(()),
    }
}
