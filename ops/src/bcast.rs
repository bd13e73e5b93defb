//! Broadcast arithmetic.
//!
//! `a` is a full `[N, C, H, W]` tensor, `b` holds a single row of tiles
//! (`H` broadcast), a single column of tiles (`W` broadcast) or a single tile
//! (`HW` broadcast) per batch, or one of those shared by every batch.
//!
//! Four strategies exist. `H` broadcasts split tile rows over the grid
//! column-major, `W` broadcasts split tile columns, `HW` broadcasts split
//! plain tiles, and anything with a single unit of work runs on core `(0, 0)`.

use bon::bon;
use snafu::{ResultExt, ensure};
use tessera_device::{
    BufferSource, KernelConfig, KernelHandle, KernelSpec, Layout, MemoryConfig, OUTPUT_CB_INDEX, Program, Shape,
    TILE_HEIGHT, TILE_HW, TILE_WIDTH, Tensor,
};
use tessera_grid::{CoreCoord, CoreOrder, CoreRange, CoreRangeSet, split_work_to_cores};
use tessera_runtime::{
    DeviceOperation, DeviceSnafu, GeometrySnafu, ProgramSignature, Result, SignatureBuilder, ValidationSnafu,
};

use crate::common::{
    Defines, address, check_arity, check_same_device, check_tiled, cols_batched_writer, defines, device_of, grid_of,
    is_dram, nchw, set_args, start_id_writer, stream_cb,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum BcastMath {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum BcastDim {
    H,
    W,
    HW,
}

impl BcastDim {
    fn compute_source(self) -> &'static str {
        match self {
            Self::H => "tt_metal/kernels/compute/bcast_h.cpp",
            Self::W => "tt_metal/kernels/compute/bcast_w.cpp",
            Self::HW => "tt_metal/kernels/compute/bcast_hw.cpp",
        }
    }

    fn reader_source(self, strategy: BcastStrategy) -> &'static str {
        match (self, strategy) {
            (Self::H, BcastStrategy::SingleCore) => "tt_metal/kernels/dataflow/reader_bcast_h_8bank.cpp",
            (Self::W, BcastStrategy::SingleCore) => "tt_metal/kernels/dataflow/reader_bcast_w_8bank.cpp",
            (Self::HW, BcastStrategy::SingleCore) => "tt_metal/kernels/dataflow/reader_bcast_hw_8bank.cpp",
            (Self::H, _) => "tt_metal/kernels/dataflow/reader_bcast_h_8bank_input_rows_partitioned.cpp",
            (Self::W, _) => "tt_metal/kernels/dataflow/reader_bcast_w_8bank_input_cols_partitioned.cpp",
            (Self::HW, _) => "tt_metal/kernels/dataflow/reader_bcast_hw_8bank_partitioned.cpp",
        }
    }
}

/// Compute kernel defines selecting the broadcast op and direction.
pub fn bcast_defines(math: BcastMath, dim: BcastDim) -> Defines {
    let (op, llk_op) = match math {
        BcastMath::Add => ("add_tiles_bcast", "ELWADD"),
        BcastMath::Sub => ("sub_tiles_bcast", "ELWSUB"),
        BcastMath::Mul => ("mul_tiles_bcast", "ELWMUL"),
    };
    let llk_dim = match dim {
        BcastDim::H => "BroadcastType::ROW",
        BcastDim::W => "BroadcastType::COL",
        BcastDim::HW => "BroadcastType::SCALAR",
    };
    defines([("BCAST_OP", op), ("BCAST_LLKOP", llk_op), ("BCAST_DIM", llk_dim)])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BcastStrategy {
    MultiCoreH,
    MultiCoreW,
    MultiCoreHW,
    SingleCore,
}

/// Tile geometry shared by every strategy.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    nc: u32,
    ht: u32,
    wt: u32,
    b_tiles: u32,
    /// `b` is shared by every batch.
    bnc1: u32,
}

impl Geometry {
    fn new(a: [u32; 4], b: [u32; 4]) -> Self {
        let [n, c, h, w] = a;
        let [bn, bc, bh, bw] = b;
        Self {
            nc: n * c,
            ht: h / TILE_HEIGHT,
            wt: w / TILE_WIDTH,
            b_tiles: bn * bc * bh * bw / TILE_HW,
            bnc1: u32::from(bn * bc == 1),
        }
    }

    fn tiles(&self) -> u32 {
        self.nc * self.ht * self.wt
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bcast {
    pub math: BcastMath,
    pub dim: BcastDim,
    pub output_memory_config: MemoryConfig,
}

#[bon]
impl Bcast {
    #[builder]
    pub fn new(math: BcastMath, dim: BcastDim, #[builder(default)] output_memory_config: MemoryConfig) -> Self {
        Self { math, dim, output_memory_config }
    }
}

impl Bcast {
    pub fn parallelization_strategy(&self, a: &Tensor) -> BcastStrategy {
        let ht = a.shape().height() / TILE_HEIGHT;
        let wt = a.shape().width() / TILE_WIDTH;
        match self.dim {
            BcastDim::H if ht > 1 => BcastStrategy::MultiCoreH,
            BcastDim::W if wt > 1 => BcastStrategy::MultiCoreW,
            BcastDim::HW if a.num_tiles() > 1 => BcastStrategy::MultiCoreHW,
            _ => BcastStrategy::SingleCore,
        }
    }

    /// Program skeleton: circular buffers, reader and writer on `cores`.
    fn skeleton(
        &self,
        strategy: BcastStrategy,
        cores: &CoreRangeSet,
        inputs: &[Tensor],
        writer: KernelSpec,
    ) -> (Program, KernelHandle, KernelHandle) {
        let (a, b) = (&inputs[0], &inputs[1]);

        let mut program = Program::new(self.name());
        for index in [0, 1, OUTPUT_CB_INDEX] {
            program.add_circular_buffer(stream_cb(index, cores, a.dtype()));
        }

        let reader = program.add_kernel(
            KernelSpec::builder()
                .source(self.dim.reader_source(strategy))
                .cores(cores.clone())
                .config(KernelConfig::reader())
                .compile_args(vec![is_dram(a), is_dram(b)])
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
                .defines(bcast_defines(self.math, self.dim))
                .build(),
        );
    }

    fn single_core(&self, inputs: &[Tensor], output: &Tensor, geometry: Geometry) -> Result<Program> {
        let core = CoreCoord::new(0, 0);
        let cores = CoreRangeSet::from(CoreRange::single(core));
        let (mut program, reader, writer) =
            self.skeleton(BcastStrategy::SingleCore, &cores, inputs, start_id_writer(&cores, output));
        let Geometry { nc, ht, wt, b_tiles, bnc1 } = geometry;
        let tiles = geometry.tiles();

        self.add_compute(&mut program, &cores, vec![nc, ht, wt]);

        let (src0, src1, dst) = (address(&inputs[0])?, address(&inputs[1])?, address(output)?);
        let reader_args = vec![src0, 0, 0, tiles, src1, 0, 0, b_tiles, tiles, nc, ht, wt, bnc1];
        set_args(&mut program, reader, core, reader_args, &reader_patches())?;
        set_args(&mut program, writer, core, vec![dst, tiles, 0], &[(0, BufferSource::Output(0))])?;
        Ok(program)
    }

    /// Tile rows split over the grid column-major.
    fn multi_core_h(&self, inputs: &[Tensor], output: &Tensor, geometry: Geometry) -> Result<Program> {
        let Geometry { nc, ht, wt, b_tiles, bnc1 } = geometry;
        let split = split_work_to_cores(grid_of(&inputs[0]), ht, CoreOrder::ColumnMajor).context(GeometrySnafu)?;
        let writer = cols_batched_writer(split.all_cores(), output);
        let (mut program, reader, writer) = self.skeleton(BcastStrategy::MultiCoreH, split.all_cores(), inputs, writer);

        self.add_compute(&mut program, split.group1(), vec![nc, split.units_per_core_group1(), wt]);
        self.add_compute(&mut program, split.group2(), vec![nc, split.units_per_core_group2(), wt]);

        let (src0, src1, dst) = (address(&inputs[0])?, address(&inputs[1])?, address(output)?);
        let mut tiles_read = 0;
        for (core, ht_per_core) in split.cores() {
            let tiles_per_core = nc * ht_per_core * wt;
            #[rustfmt::skip]
            let reader_args = vec![
                src0, 0, 0, tiles_per_core,
                src1, 0, 0, b_tiles,
                tiles_per_core, nc, ht_per_core, wt, bnc1, tiles_read, ht * wt,
            ];
            set_args(&mut program, reader, core, reader_args, &reader_patches())?;

            let writer_args = vec![dst, 0, 0, ht_per_core, wt, tiles_read, 0, nc, ht * wt];
            set_args(&mut program, writer, core, writer_args, &[(0, BufferSource::Output(0))])?;
            tiles_read += ht_per_core * wt;
        }
        Ok(program)
    }

    /// Tile columns split over the grid column-major.
    fn multi_core_w(&self, inputs: &[Tensor], output: &Tensor, geometry: Geometry) -> Result<Program> {
        let Geometry { nc, ht, wt, b_tiles, bnc1 } = geometry;
        let split = split_work_to_cores(grid_of(&inputs[0]), wt, CoreOrder::ColumnMajor).context(GeometrySnafu)?;
        let writer = cols_batched_writer(split.all_cores(), output);
        let (mut program, reader, writer) = self.skeleton(BcastStrategy::MultiCoreW, split.all_cores(), inputs, writer);

        self.add_compute(&mut program, split.group1(), vec![nc, ht, split.units_per_core_group1()]);
        self.add_compute(&mut program, split.group2(), vec![nc, ht, split.units_per_core_group2()]);

        let (src0, src1, dst) = (address(&inputs[0])?, address(&inputs[1])?, address(output)?);
        let mut column = 0;
        for (core, wt_per_core) in split.cores() {
            let tiles_per_core = nc * ht * wt_per_core;
            let wt_skip = wt - wt_per_core;
            #[rustfmt::skip]
            let reader_args = vec![
                src0, 0, 0, tiles_per_core,
                src1, 0, 0, b_tiles,
                tiles_per_core, nc, ht, wt_per_core, bnc1, column, ht * wt, wt_skip,
            ];
            set_args(&mut program, reader, core, reader_args, &reader_patches())?;

            let writer_args = vec![dst, 0, 0, ht, wt_per_core, column, wt_skip, nc, ht * wt];
            set_args(&mut program, writer, core, writer_args, &[(0, BufferSource::Output(0))])?;
            column += wt_per_core;
        }
        Ok(program)
    }

    /// Tiles split over the grid row-major.
    fn multi_core_hw(&self, inputs: &[Tensor], output: &Tensor, geometry: Geometry) -> Result<Program> {
        let Geometry { ht, wt, b_tiles, bnc1, .. } = geometry;
        let split =
            split_work_to_cores(grid_of(&inputs[0]), geometry.tiles(), CoreOrder::RowMajor).context(GeometrySnafu)?;
        let writer = start_id_writer(split.all_cores(), output);
        let (mut program, reader, writer) = self.skeleton(BcastStrategy::MultiCoreHW, split.all_cores(), inputs, writer);

        self.add_compute(&mut program, split.group1(), vec![1, 1, split.units_per_core_group1()]);
        self.add_compute(&mut program, split.group2(), vec![1, 1, split.units_per_core_group2()]);

        let (src0, src1, dst) = (address(&inputs[0])?, address(&inputs[1])?, address(output)?);
        let mut start = 0;
        for (core, tiles_per_core) in split.cores() {
            let reader_args = vec![src0, 0, 0, tiles_per_core, src1, 0, 0, b_tiles, start, ht * wt, bnc1];
            set_args(&mut program, reader, core, reader_args, &reader_patches())?;
            set_args(&mut program, writer, core, vec![dst, tiles_per_core, start], &[(0, BufferSource::Output(0))])?;
            start += tiles_per_core;
        }
        Ok(program)
    }
}

/// Reader argument slots holding the two source addresses.
fn reader_patches() -> [(usize, BufferSource); 2] {
    [(0, BufferSource::Input(0)), (4, BufferSource::Input(1))]
}

impl DeviceOperation for Bcast {
    fn name(&self) -> &'static str {
        "bcast"
    }

    fn validate(&self, inputs: &[Tensor]) -> Result<()> {
        let op = self.name();
        check_arity(op, inputs, 2)?;
        let (a, b) = (&inputs[0], &inputs[1]);

        check_same_device(op, a, b)?;
        check_tiled(op, "first operand", a)?;
        ensure!(b.layout() == Layout::Tile, ValidationSnafu { op, reason: "second operand must be tilized" });
        ensure!(
            a.dtype() == b.dtype(),
            ValidationSnafu { op, reason: format!("operand dtypes {} and {} differ", a.dtype(), b.dtype()) }
        );
        ensure!(
            !a.is_sharded() && !b.is_sharded() && !self.output_memory_config.is_sharded(),
            ValidationSnafu { op, reason: "sharded operands are not supported" }
        );

        let [n, c, h, w] = nchw(op, "first operand", a)?;
        let [bn, bc, bh, bw] = nchw(op, "second operand", b)?;
        ensure!(
            bn * bc == 1 || (bn == n && bc == c),
            ValidationSnafu { op, reason: format!("broadcast needs bN*bC == 1 or matching N and C, got {} for {}", b.shape(), a.shape()) }
        );

        let ok = match self.dim {
            BcastDim::H => w == bw && bh == TILE_HEIGHT,
            BcastDim::W => h == bh && bw == TILE_WIDTH,
            BcastDim::HW => bh == TILE_HEIGHT && bw == TILE_WIDTH,
        };
        ensure!(
            ok,
            ValidationSnafu { op, reason: format!("{} broadcast of {} does not accept {}", self.dim, a.shape(), b.shape()) }
        );
        Ok(())
    }

    fn compute_output_shapes(&self, inputs: &[Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn create_output_tensors(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let a = &inputs[0];
        let device = device_of(self.name(), "first operand", a)?;
        let output = Tensor::allocate(device, a.shape().clone(), a.dtype(), Layout::Tile, self.output_memory_config)
            .context(DeviceSnafu)?;
        Ok(vec![output])
    }

    #[tracing::instrument(skip_all, fields(op = self.name(), math = %self.math, dim = %self.dim))]
    fn create_program(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Program> {
        let op = self.name();
        let geometry = Geometry::new(nchw(op, "first operand", &inputs[0])?, nchw(op, "second operand", &inputs[1])?);
        let strategy = self.parallelization_strategy(&inputs[0]);
        tracing::debug!(%strategy, nc = geometry.nc, ht = geometry.ht, wt = geometry.wt, "bcast program");

        let output = &outputs[0];
        match strategy {
            BcastStrategy::SingleCore => self.single_core(inputs, output, geometry),
            BcastStrategy::MultiCoreH => self.multi_core_h(inputs, output, geometry),
            BcastStrategy::MultiCoreW => self.multi_core_w(inputs, output, geometry),
            BcastStrategy::MultiCoreHW => self.multi_core_hw(inputs, output, geometry),
        }
    }

    fn compute_program_hash(&self, inputs: &[Tensor]) -> Result<ProgramSignature> {
        Ok(SignatureBuilder::new(self.name())
            .attribute(&self.math)
            .attribute(&self.dim)
            .attribute(&self.output_memory_config)
            .tensors(inputs)
            .finish())
    }
}
