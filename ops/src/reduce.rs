//! Sum and max reductions over the two innermost dimensions.
//!
//! Results keep rank and are padded to whole tiles: reducing `W` of an
//! `[N, C, H, W]` tensor yields `[N, C, H, 32]`, reducing `H` yields
//! `[N, C, 32, W]` and reducing both yields `[N, C, 32, 32]`. The scaler is
//! multiplied into every reduced value and travels to the reader as `f32` bits.

use bon::bon;
use snafu::{ResultExt, ensure};
use tessera_device::{
    BufferSource, CircularBufferConfig, DataType, KernelConfig, KernelHandle, KernelSpec, Layout, MemoryConfig,
    OUTPUT_CB_INDEX, Program, Shape, TILE_HEIGHT, TILE_WIDTH, Tensor,
};
use tessera_grid::{CoreCoord, CoreOrder, CoreRange, CoreRangeSet, split_work_to_cores};
use tessera_runtime::{
    DeviceOperation, DeviceSnafu, GeometrySnafu, ProgramSignature, Result, SignatureBuilder, ValidationSnafu,
};

use crate::common::{
    Defines, address, check_arity, check_dtype, check_tiled, cols_batched_writer, defines, device_of, grid_of, is_dram,
    nchw, set_args, start_id_writer, stream_cb,
};

const READER_ROWS: &str = "tt_metal/kernels/dataflow/reader_unary_reduce_interleaved_start_id.cpp";
const READER_COLS: &str = "tt_metal/kernels/dataflow/reader_unary_reduce_h_interleaved_partitioned.cpp";

/// Circular buffer holding the scaler tile.
const SCALER_CB_INDEX: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ReduceMath {
    Sum,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum ReduceDim {
    /// Reduce along each row.
    W,
    /// Reduce along each column.
    H,
    HW,
}

impl ReduceDim {
    fn compute_source(self) -> &'static str {
        match self {
            Self::W => "tt_metal/kernels/compute/reduce_w.cpp",
            Self::H => "tt_metal/kernels/compute/reduce_h.cpp",
            Self::HW => "tt_metal/kernels/compute/reduce_hw.cpp",
        }
    }
}

pub fn reduce_defines(math: ReduceMath, dim: ReduceDim) -> Defines {
    let op = match math {
        ReduceMath::Sum => "PoolType::SUM",
        ReduceMath::Max => "PoolType::MAX",
    };
    let reduce_dim = match dim {
        ReduceDim::W => "ReduceDim::REDUCE_ROW",
        ReduceDim::H => "ReduceDim::REDUCE_COL",
        ReduceDim::HW => "ReduceDim::REDUCE_SCALAR",
    };
    defines([("REDUCE_OP", op), ("REDUCE_DIM", reduce_dim)])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ReduceStrategy {
    /// Tile rows split over the grid.
    MultiCoreH,
    /// Tile columns split over the grid.
    MultiCoreW,
    SingleCore,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduce {
    pub math: ReduceMath,
    pub dim: ReduceDim,
    pub scaler: f32,
    pub output_memory_config: MemoryConfig,
}

#[bon]
impl Reduce {
    #[builder]
    pub fn new(
        math: ReduceMath,
        dim: ReduceDim,
        #[builder(default = 1.0)] scaler: f32,
        #[builder(default)] output_memory_config: MemoryConfig,
    ) -> Self {
        Self { math, dim, scaler, output_memory_config }
    }
}

impl Reduce {
    pub fn parallelization_strategy(&self, input: &Tensor) -> ReduceStrategy {
        let ht = input.shape().height() / TILE_HEIGHT;
        let wt = input.shape().width() / TILE_WIDTH;
        let rows = input.shape().batch() * u64::from(ht);
        match self.dim {
            ReduceDim::W if rows > 1 => ReduceStrategy::MultiCoreH,
            ReduceDim::H if wt > 1 => ReduceStrategy::MultiCoreW,
            _ => ReduceStrategy::SingleCore,
        }
    }

    fn skeleton(&self, cores: &CoreRangeSet, input: &Tensor, reader_source: &str, writer: KernelSpec) -> (Program, KernelHandle, KernelHandle) {
        let dtype = input.dtype();
        let mut program = Program::new(self.name());
        program.add_circular_buffer(stream_cb(0, cores, dtype));
        program.add_circular_buffer(CircularBufferConfig::new(SCALER_CB_INDEX, cores.clone(), 1, dtype.tile_size(), dtype));
        program.add_circular_buffer(stream_cb(OUTPUT_CB_INDEX, cores, dtype));

        let reader = program.add_kernel(
            KernelSpec::builder()
                .source(reader_source)
                .cores(cores.clone())
                .config(KernelConfig::reader())
                .compile_args(vec![is_dram(input)])
                .build(),
        );
        let writer = program.add_kernel(writer);
        (program, reader, writer)
    }

    fn add_compute(&self, program: &mut Program, cores: &CoreRangeSet, args: Vec<u32>) {
        if cores.is_empty() {
            return;
        }
        program.add_kernel(
            KernelSpec::builder()
                .source(self.dim.compute_source())
                .cores(cores.clone())
                .config(KernelConfig::compute())
                .compile_args(args)
                .defines(reduce_defines(self.math, self.dim))
                .build(),
        );
    }

    /// Whole tile rows per core, one output tile per row.
    fn multi_core_h(&self, input: &Tensor, output: &Tensor, [n, c, h, w]: [u32; 4]) -> Result<Program> {
        let (ht, wt) = (h / TILE_HEIGHT, w / TILE_WIDTH);
        let rows = n * c * ht;
        let split = split_work_to_cores(grid_of(input), rows, CoreOrder::RowMajor).context(GeometrySnafu)?;

        let writer = start_id_writer(split.all_cores(), output);
        let (mut program, reader, writer) = self.skeleton(split.all_cores(), input, READER_ROWS, writer);
        self.add_compute(&mut program, split.group1(), vec![split.units_per_core_group1(), wt, 1]);
        self.add_compute(&mut program, split.group2(), vec![split.units_per_core_group2(), wt, 1]);

        let (src, dst, scaler) = (address(input)?, address(output)?, self.scaler.to_bits());
        let mut row = 0;
        for (core, rows_per_core) in split.cores() {
            let reader_args = vec![src, rows_per_core * wt, row * wt, scaler];
            set_args(&mut program, reader, core, reader_args, &[(0, BufferSource::Input(0))])?;
            set_args(&mut program, writer, core, vec![dst, rows_per_core, row], &[(0, BufferSource::Output(0))])?;
            row += rows_per_core;
        }
        Ok(program)
    }

    /// Tile columns per core across every batch, one output tile per column.
    fn multi_core_w(&self, input: &Tensor, output: &Tensor, [n, c, h, w]: [u32; 4]) -> Result<Program> {
        let (nc, ht, wt) = (n * c, h / TILE_HEIGHT, w / TILE_WIDTH);
        let split = split_work_to_cores(grid_of(input), wt, CoreOrder::RowMajor).context(GeometrySnafu)?;

        let writer = cols_batched_writer(split.all_cores(), output);
        let (mut program, reader, writer) = self.skeleton(split.all_cores(), input, READER_COLS, writer);
        self.add_compute(&mut program, split.group1(), vec![ht, split.units_per_core_group1(), nc]);
        self.add_compute(&mut program, split.group2(), vec![ht, split.units_per_core_group2(), nc]);

        let (src, dst, scaler) = (address(input)?, address(output)?, self.scaler.to_bits());
        let mut column = 0;
        for (core, cols_per_core) in split.cores() {
            let reader_args = vec![src, ht, wt, column, cols_per_core, nc, scaler];
            set_args(&mut program, reader, core, reader_args, &[(0, BufferSource::Input(0))])?;

            // The output holds a single tile row per batch.
            let writer_args = vec![dst, 0, 0, 1, cols_per_core, column, wt - cols_per_core, nc, wt];
            set_args(&mut program, writer, core, writer_args, &[(0, BufferSource::Output(0))])?;
            column += cols_per_core;
        }
        Ok(program)
    }

    fn single_core(&self, input: &Tensor, output: &Tensor, [n, c, h, w]: [u32; 4]) -> Result<Program> {
        let (nc, ht, wt) = (n * c, h / TILE_HEIGHT, w / TILE_WIDTH);
        let core = CoreCoord::new(0, 0);
        let cores = CoreRangeSet::from(CoreRange::single(core));

        let writer = start_id_writer(&cores, output);
        let (mut program, reader, writer) = self.skeleton(&cores, input, READER_ROWS, writer);
        let compute_args = match self.dim {
            ReduceDim::W => vec![nc * ht, wt, 1],
            ReduceDim::H | ReduceDim::HW => vec![ht, wt, nc],
        };
        self.add_compute(&mut program, &cores, compute_args);

        let output_tiles = match self.dim {
            ReduceDim::W => nc * ht,
            ReduceDim::H => nc * wt,
            ReduceDim::HW => nc,
        };
        let (src, dst) = (address(input)?, address(output)?);
        let reader_args = vec![src, nc * ht * wt, 0, self.scaler.to_bits()];
        set_args(&mut program, reader, core, reader_args, &[(0, BufferSource::Input(0))])?;
        set_args(&mut program, writer, core, vec![dst, output_tiles, 0], &[(0, BufferSource::Output(0))])?;
        Ok(program)
    }
}

impl DeviceOperation for Reduce {
    fn name(&self) -> &'static str {
        "reduce"
    }

    fn validate(&self, inputs: &[Tensor]) -> Result<()> {
        let op = self.name();
        check_arity(op, inputs, 1)?;
        let input = &inputs[0];

        device_of(op, "input", input)?;
        check_tiled(op, "input", input)?;
        check_dtype(op, "input", input, DataType::BFloat16)?;
        nchw(op, "input", input)?;
        ensure!(
            !input.is_sharded() && !self.output_memory_config.is_sharded(),
            ValidationSnafu { op, reason: "sharded operands are not supported" }
        );
        ensure!(self.scaler.is_finite(), ValidationSnafu { op, reason: format!("scaler {} is not finite", self.scaler) });
        Ok(())
    }

    fn compute_output_shapes(&self, inputs: &[Tensor]) -> Result<Vec<Shape>> {
        let [n, c, h, w] = nchw(self.name(), "input", &inputs[0])?;
        let shape = match self.dim {
            ReduceDim::W => [n, c, h, TILE_WIDTH],
            ReduceDim::H => [n, c, TILE_HEIGHT, w],
            ReduceDim::HW => [n, c, TILE_HEIGHT, TILE_WIDTH],
        };
        Ok(vec![Shape::from(shape)])
    }

    fn create_output_tensors(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = &inputs[0];
        let device = device_of(self.name(), "input", input)?;
        let shapes = self.compute_output_shapes(inputs)?;
        shapes
            .into_iter()
            .map(|shape| {
                Tensor::allocate(device, shape, input.dtype(), Layout::Tile, self.output_memory_config).context(DeviceSnafu)
            })
            .collect()
    }

    #[tracing::instrument(skip_all, fields(op = self.name(), math = %self.math, dim = %self.dim))]
    fn create_program(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Program> {
        let (input, output) = (&inputs[0], &outputs[0]);
        let dims = nchw(self.name(), "input", input)?;
        let strategy = self.parallelization_strategy(input);
        tracing::debug!(%strategy, "reduce program");

        match strategy {
            ReduceStrategy::MultiCoreH => self.multi_core_h(input, output, dims),
            ReduceStrategy::MultiCoreW => self.multi_core_w(input, output, dims),
            ReduceStrategy::SingleCore => self.single_core(input, output, dims),
        }
    }

    fn compute_program_hash(&self, inputs: &[Tensor]) -> Result<ProgramSignature> {
        Ok(SignatureBuilder::new(self.name())
            .attribute(&self.math)
            .attribute(&self.dim)
            .attribute(&self.scaler.to_bits())
            .attribute(&self.output_memory_config)
            .tensors(inputs)
            .finish())
    }
}
