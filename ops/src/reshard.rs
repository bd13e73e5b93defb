//! Moving tensors between interleaved and height-sharded placement.
//!
//! Both directions run one reader and one writer per shard core, visiting the
//! shard grid row-major so core `i` owns units `i * units_per_shard..`. The
//! sharded side is never copied through a streaming buffer: circular buffer 0
//! is the shard itself, globally allocated at the sharded tensor's address.
//! Tiled tensors move whole tiles, row-major tensors move rows ("sticks").

use snafu::{OptionExt, ResultExt, ensure};
use tessera_device::{
    BufferSource, CircularBufferConfig, KernelConfig, KernelSpec, Layout, MemoryConfig, Program, Shape, ShardSpec,
    TILE_HEIGHT, TILE_HW, TILE_WIDTH, Tensor, TensorMemoryLayout,
};
use tessera_grid::{CoreCoord, CoreOrder, WorkSplit};
use tessera_runtime::{DeviceOperation, DeviceSnafu, ProgramSignature, Result, SignatureBuilder, ValidationSnafu};

use crate::common::{address, check_arity, check_tiled, device_of, is_dram, kernel_arg, set_args};

const SHARD_CB_INDEX: u8 = 0;

/// How a tensor is cut into units for transfer.
#[derive(Debug, Clone, Copy)]
struct Units {
    total: u32,
    per_shard: u32,
    /// Bytes per unit.
    size: u32,
}

impl Units {
    fn new(op: &str, tensor: &Tensor, spec: &ShardSpec) -> Result<Self> {
        let (dtype, width) = (tensor.dtype(), tensor.shape().width().max(1));
        Ok(match tensor.layout() {
            Layout::Tile => Self {
                total: kernel_arg(op, "tiles", tensor.volume() / u64::from(TILE_HW))?,
                per_shard: kernel_arg(op, "tiles per shard", spec.volume() / u64::from(TILE_HW))?,
                size: dtype.tile_size(),
            },
            Layout::RowMajor => Self {
                total: kernel_arg(op, "rows", tensor.volume() / u64::from(width))?,
                per_shard: spec.shape[0],
                size: width * dtype.element_size(),
            },
        })
    }

    /// Compile args describing interleaved pages for the stick kernels.
    fn stick_compile_args(&self, cb: u8, dram: u32) -> Vec<u32> {
        let pow2 = self.size.is_power_of_two();
        let log2 = if pow2 { self.size.trailing_zeros() } else { 0 };
        vec![u32::from(cb), dram, u32::from(pow2), log2]
    }

    /// `(core, start, count)` for every shard core. The last shards may be
    /// short or empty.
    fn assignments(&self, split: &WorkSplit) -> Vec<(CoreCoord, u32, u32)> {
        let mut start = 0;
        split
            .cores()
            .map(|(core, per_shard)| {
                let count = per_shard.min(self.total.saturating_sub(start));
                let entry = (core, start, count);
                start += count;
                entry
            })
            .collect()
    }
}

fn shard_cb(split: &WorkSplit, units: Units, sharded: &Tensor) -> Result<CircularBufferConfig> {
    Ok(CircularBufferConfig::new(
        SHARD_CB_INDEX,
        split.all_cores().clone(),
        units.per_shard,
        units.size,
        sharded.dtype(),
    )
    .with_global_address(address(sharded)?))
}

fn check_height_sharded(op: &str, what: &str, config: &MemoryConfig) -> Result<()> {
    ensure!(
        config.memory_layout == TensorMemoryLayout::HeightSharded,
        ValidationSnafu { op, reason: format!("{what} must be height sharded, got {:?}", config.memory_layout) }
    );
    Ok(())
}

fn check_layout(op: &str, tensor: &Tensor) -> Result<()> {
    if tensor.layout() == Layout::Tile {
        check_tiled(op, "input", tensor)?;
    }
    Ok(())
}

// ============================================================================
// INTERLEAVED -> SHARDED
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterleavedToSharded {
    pub output_memory_config: MemoryConfig,
    pub shard_spec: ShardSpec,
}

impl InterleavedToSharded {
    /// Height-shard onto `shard_spec`.
    pub fn new(shard_spec: ShardSpec) -> Self {
        Self { output_memory_config: MemoryConfig::sharded(TensorMemoryLayout::HeightSharded), shard_spec }
    }

    fn reader(&self, input: &Tensor, split: &WorkSplit, units: Units) -> KernelSpec {
        let (source, compile_args) = match input.layout() {
            Layout::Tile => (
                "tt_metal/kernels/dataflow/reader_unary_blocks_interleaved_start_id.cpp",
                vec![u32::from(SHARD_CB_INDEX), is_dram(input)],
            ),
            Layout::RowMajor => (
                "tt_metal/kernels/dataflow/reader_unary_stick_layout_blocks_interleaved_start_id.cpp",
                units.stick_compile_args(SHARD_CB_INDEX, is_dram(input)),
            ),
        };
        KernelSpec::builder()
            .source(source)
            .cores(split.all_cores().clone())
            .config(KernelConfig::reader())
            .compile_args(compile_args)
            .build()
    }
}

impl DeviceOperation for InterleavedToSharded {
    fn name(&self) -> &'static str {
        "interleaved_to_sharded"
    }

    fn validate(&self, inputs: &[Tensor]) -> Result<()> {
        let op = self.name();
        check_arity(op, inputs, 1)?;
        let input = &inputs[0];

        device_of(op, "input", input)?;
        check_layout(op, input)?;
        ensure!(!input.is_sharded(), ValidationSnafu { op, reason: "input is already sharded" });
        check_height_sharded(op, "output", &self.output_memory_config)?;

        let [shard_height, shard_width] = self.shard_spec.shape;
        let width = input.shape().width();
        ensure!(
            shard_width == width,
            ValidationSnafu { op, reason: format!("shard width {shard_width} does not match tensor width {width}") }
        );
        if input.layout() == Layout::Tile {
            ensure!(
                shard_height % TILE_HEIGHT == 0 && shard_width % TILE_WIDTH == 0,
                ValidationSnafu {
                    op,
                    reason: format!("shard shape {:?} is not a whole number of tiles", self.shard_spec.shape)
                }
            );
        }
        let rows = input.volume() / u64::from(width.max(1));
        let shards = rows.div_ceil(u64::from(shard_height.max(1)));
        ensure!(
            shard_height > 0 && shards <= self.shard_spec.num_cores() as u64,
            ValidationSnafu {
                op,
                reason: format!("{rows} rows need {shards} shards of height {shard_height}, grid has {}", self.shard_spec.num_cores())
            }
        );
        Ok(())
    }

    fn compute_output_shapes(&self, inputs: &[Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn create_output_tensors(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = &inputs[0];
        let device = device_of(self.name(), "input", input)?;
        let output = Tensor::allocate_sharded(
            device,
            input.shape().clone(),
            input.dtype(),
            input.layout(),
            self.output_memory_config,
            self.shard_spec.clone(),
        )
        .context(DeviceSnafu)?;
        Ok(vec![output])
    }

    #[tracing::instrument(skip_all, fields(op = self.name(), cores = self.shard_spec.num_cores()))]
    fn create_program(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Program> {
        let (input, output) = (&inputs[0], &outputs[0]);
        let units = Units::new(self.name(), input, &self.shard_spec)?;
        let split = WorkSplit::from_shard_grid(&self.shard_spec.grid, units.per_shard, CoreOrder::RowMajor);
        tracing::debug!(units = units.total, per_shard = units.per_shard, "interleaved to sharded program");

        let mut program = Program::new(self.name());
        let cb = program.add_circular_buffer(shard_cb(&split, units, output)?);
        program.patch_circular_buffer(cb, BufferSource::Output(0)).context(DeviceSnafu)?;

        let reader = program.add_kernel(self.reader(input, &split, units));
        let writer = program.add_kernel(
            KernelSpec::builder()
                .source("tt_metal/kernels/dataflow/writer_unary_sharded.cpp")
                .cores(split.all_cores().clone())
                .config(KernelConfig::writer())
                .compile_args(vec![u32::from(SHARD_CB_INDEX)])
                .build(),
        );

        let src = address(input)?;
        for (core, start, count) in units.assignments(&split) {
            let reader_args = match input.layout() {
                Layout::Tile => vec![src, count, 1, start],
                Layout::RowMajor => vec![src, units.size, count, 1, start],
            };
            set_args(&mut program, reader, core, reader_args, &[(0, BufferSource::Input(0))])?;
            set_args(&mut program, writer, core, vec![count], &[])?;
        }
        Ok(program)
    }

    fn compute_program_hash(&self, inputs: &[Tensor]) -> Result<ProgramSignature> {
        Ok(SignatureBuilder::new(self.name())
            .attribute(&self.output_memory_config)
            .attribute(&self.shard_spec)
            .tensors(inputs)
            .finish())
    }
}

// ============================================================================
// SHARDED -> INTERLEAVED
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShardedToInterleaved {
    pub output_memory_config: MemoryConfig,
}

impl ShardedToInterleaved {
    pub fn new(output_memory_config: MemoryConfig) -> Self {
        Self { output_memory_config }
    }

    fn writer(&self, output: &Tensor, split: &WorkSplit, units: Units) -> KernelSpec {
        let (source, compile_args) = match output.layout() {
            Layout::Tile => (
                "tt_metal/kernels/dataflow/writer_unary_blocks_interleaved_start_id.cpp",
                vec![u32::from(SHARD_CB_INDEX), is_dram(output)],
            ),
            Layout::RowMajor => (
                "tt_metal/kernels/dataflow/writer_unary_stick_layout_blocks_interleaved_start_id.cpp",
                units.stick_compile_args(SHARD_CB_INDEX, is_dram(output)),
            ),
        };
        KernelSpec::builder()
            .source(source)
            .cores(split.all_cores().clone())
            .config(KernelConfig::writer())
            .compile_args(compile_args)
            .build()
    }
}

impl DeviceOperation for ShardedToInterleaved {
    fn name(&self) -> &'static str {
        "sharded_to_interleaved"
    }

    fn validate(&self, inputs: &[Tensor]) -> Result<()> {
        let op = self.name();
        check_arity(op, inputs, 1)?;
        let input = &inputs[0];

        device_of(op, "input", input)?;
        check_layout(op, input)?;
        ensure!(input.shard_spec().is_some(), ValidationSnafu { op, reason: "input must be sharded" });
        check_height_sharded(op, "input", input.memory_config())?;
        ensure!(
            !self.output_memory_config.is_sharded(),
            ValidationSnafu { op, reason: "output memory config must be interleaved" }
        );
        Ok(())
    }

    fn compute_output_shapes(&self, inputs: &[Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn create_output_tensors(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = &inputs[0];
        let device = device_of(self.name(), "input", input)?;
        let output = Tensor::allocate(
            device,
            input.shape().clone(),
            input.dtype(),
            input.layout(),
            self.output_memory_config,
        )
        .context(DeviceSnafu)?;
        Ok(vec![output])
    }

    #[tracing::instrument(skip_all, fields(op = self.name()))]
    fn create_program(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Program> {
        let op = self.name();
        let (input, output) = (&inputs[0], &outputs[0]);
        let spec = input.shard_spec().context(ValidationSnafu { op, reason: "input must be sharded" })?;
        let units = Units::new(op, input, spec)?;
        let split = WorkSplit::from_shard_grid(&spec.grid, units.per_shard, CoreOrder::RowMajor);
        tracing::debug!(units = units.total, per_shard = units.per_shard, "sharded to interleaved program");

        let mut program = Program::new(op);
        let cb = program.add_circular_buffer(shard_cb(&split, units, input)?);
        program.patch_circular_buffer(cb, BufferSource::Input(0)).context(DeviceSnafu)?;

        let reader = program.add_kernel(
            KernelSpec::builder()
                .source("tt_metal/kernels/dataflow/reader_unary_sharded.cpp")
                .cores(split.all_cores().clone())
                .config(KernelConfig::reader())
                .compile_args(vec![u32::from(SHARD_CB_INDEX)])
                .build(),
        );
        let writer = program.add_kernel(self.writer(output, &split, units));

        let dst = address(output)?;
        for (core, start, count) in units.assignments(&split) {
            set_args(&mut program, reader, core, vec![count], &[])?;
            let writer_args = match output.layout() {
                Layout::Tile => vec![dst, count, 1, start],
                Layout::RowMajor => vec![dst, units.size, count, 1, start],
            };
            set_args(&mut program, writer, core, writer_args, &[(0, BufferSource::Output(0))])?;
        }
        Ok(program)
    }

    fn compute_program_hash(&self, inputs: &[Tensor]) -> Result<ProgramSignature> {
        Ok(SignatureBuilder::new(self.name()).attribute(&self.output_memory_config).tensors(inputs).finish())
    }
}
