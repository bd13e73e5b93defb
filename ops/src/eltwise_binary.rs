//! Eltwise binary operations.
//!
//! Two same-shaped tiled operands are streamed tile by tile through circular
//! buffers 0 and 1 into the binary FPU op. Comparisons and logical ops reuse
//! `add`/`sub`/`mul` followed by an SFPU op; a few ops also prescale each
//! input through an intermediate circular buffer. Height-sharded operands
//! bind their circular buffer straight onto the shard.

use bon::bon;
use snafu::{ResultExt, ensure};
use tessera_device::{
    BufferSource, CircularBufferConfig, DataType, INTERMEDIATE_CB_INDEX, KernelConfig, KernelSpec, Layout,
    MemoryConfig, Program, Shape, ShardSpec, TILE_HEIGHT, TILE_HW, Tensor, TensorMemoryLayout,
};
use tessera_grid::{CoreOrder, WorkSplit, num_cores_to_core_range_set};
use tessera_runtime::{
    DeviceOperation, DeviceSnafu, GeometrySnafu, ProgramSignature, Result, SignatureBuilder, ValidationSnafu,
};

use crate::common::{
    Defines, add_output_cb, address, check_arity, check_dtype, check_same_device, check_tiled, defines, device_of,
    grid_of, is_dram, merge_defines, set_args, shard_cb, split_tiles, start_id_writer, stream_cb, tile_count,
};
use crate::eltwise_unary::{UnaryOpType, UnaryWithParam, block_defines, check_chain, op_defines};

const READER: &str = "tt_metal/kernels/dataflow/reader_binary_interleaved_start_id.cpp";
const COMPUTE: &str = "tt_metal/kernels/compute/eltwise_binary.cpp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOpType {
    Add,
    Sub,
    Mul,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Ne,
    SquaredDifference,
    BiasGelu,
    LogicalAnd,
    LogicalOr,
    LogAddExp,
    LogAddExp2,
    Ldexp,
}

impl BinaryOpType {
    /// FPU op and its op code.
    fn fpu_op(self) -> (&'static str, &'static str) {
        match self {
            Self::Add | Self::BiasGelu | Self::LogicalOr | Self::LogAddExp | Self::LogAddExp2 => ("add_tiles", "0"),
            Self::Mul | Self::LogicalAnd | Self::Ldexp => ("mul_tiles", "2"),
            Self::Sub | Self::Gt | Self::Lt | Self::Gte | Self::Lte | Self::Eq | Self::Ne | Self::SquaredDifference => {
                ("sub_tiles", "1")
            }
        }
    }

    /// SFPU op applied to the FPU result.
    fn post_op(self) -> Option<UnaryWithParam> {
        let op = match self {
            Self::Gt | Self::LogicalOr => UnaryOpType::Gtz,
            Self::Lt => UnaryOpType::Ltz,
            Self::Gte => UnaryOpType::Gez,
            Self::Lte => UnaryOpType::Lez,
            Self::Eq => UnaryOpType::Eqz,
            Self::Ne | Self::LogicalAnd => UnaryOpType::Nez,
            Self::SquaredDifference => UnaryOpType::Square,
            Self::BiasGelu => return Some(UnaryWithParam::with_param(UnaryOpType::Gelu, 0.0)),
            Self::LogAddExp => UnaryOpType::Log,
            Self::LogAddExp2 => UnaryOpType::Log2,
            Self::Add | Self::Sub | Self::Mul | Self::Ldexp => return None,
        };
        Some(op.into())
    }

    /// SFPU ops applied to each input before the FPU op.
    fn pre_ops(self) -> [Option<UnaryOpType>; 2] {
        match self {
            Self::LogAddExp => [Some(UnaryOpType::Exp), Some(UnaryOpType::Exp)],
            Self::LogAddExp2 => [Some(UnaryOpType::Exp2), Some(UnaryOpType::Exp2)],
            Self::LogicalOr => [Some(UnaryOpType::Nez), Some(UnaryOpType::Nez)],
            Self::Ldexp => [None, Some(UnaryOpType::Exp2)],
            _ => [None, None],
        }
    }

    /// Compute kernel defines, with `fused_activations` run after the op.
    pub fn defines(self, fused_activations: &[UnaryWithParam]) -> Defines {
        let mut result = Defines::new();
        for (input, pre_op) in self.pre_ops().into_iter().enumerate() {
            if let Some(pre_op) = pre_op {
                merge_defines(&mut result, op_defines(&pre_op.into(), &format!("PRE_IN{input}_0"), "0"));
            }
        }
        if let Some(post_op) = self.post_op() {
            merge_defines(&mut result, op_defines(&post_op, "0", "0"));
        }

        let (op_name, op_code) = self.fpu_op();
        result.insert("ELTWISE_OP".to_string(), op_name.to_string());
        result.insert("ELTWISE_OP_CODE".to_string(), op_code.to_string());

        if !fused_activations.is_empty() {
            merge_defines(&mut result, block_defines(fused_activations, "0", "0"));
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinaryStrategy {
    SingleCore,
    MultiCore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EltwiseBinary {
    pub op_type: BinaryOpType,
    pub fused_activations: Vec<UnaryWithParam>,
    pub output_memory_config: MemoryConfig,
}

#[bon]
impl EltwiseBinary {
    #[builder]
    pub fn new(
        op_type: BinaryOpType,
        #[builder(default)] fused_activations: Vec<UnaryWithParam>,
        #[builder(default)] output_memory_config: MemoryConfig,
    ) -> Self {
        Self { op_type, fused_activations, output_memory_config }
    }
}

impl EltwiseBinary {
    pub fn parallelization_strategy(&self, a: &Tensor) -> BinaryStrategy {
        if a.num_tiles() > 1 { BinaryStrategy::MultiCore } else { BinaryStrategy::SingleCore }
    }

    fn validate_sharding(&self, a: &Tensor, b: &Tensor) -> Result<()> {
        let op = self.name();
        let output = &self.output_memory_config;

        if let Some(sharded) = [a, b].into_iter().find(|tensor| tensor.is_sharded()) {
            ensure!(
                sharded.memory_config().memory_layout == TensorMemoryLayout::HeightSharded,
                ValidationSnafu { op, reason: "only height sharding is supported" }
            );
            if a.is_sharded() && b.is_sharded() {
                ensure!(
                    a.memory_config() == b.memory_config() && a.shard_spec() == b.shard_spec(),
                    ValidationSnafu { op, reason: "sharded operands must share memory config and shard spec" }
                );
            }
            ensure!(
                !output.is_sharded() || output == sharded.memory_config(),
                ValidationSnafu { op, reason: "sharded output must match the sharded operand" }
            );
            if let Some(spec) = sharded.shard_spec() {
                let assigned = spec.num_cores() as u64 * (spec.volume() / u64::from(TILE_HW));
                ensure!(
                    assigned == a.num_tiles(),
                    ValidationSnafu {
                        op,
                        reason: format!(
                            "{} shards of {:?} hold {assigned} tiles, tensor has {}",
                            spec.num_cores(),
                            spec.shape,
                            a.num_tiles()
                        )
                    }
                );
            }
        } else if output.is_sharded() {
            ensure!(
                output.memory_layout == TensorMemoryLayout::HeightSharded,
                ValidationSnafu { op, reason: "only height sharding is supported" }
            );
            let (blocks, cores) = (height_blocks(a), grid_of(a).num_cores() as u64);
            ensure!(
                blocks < cores || blocks % cores == 0,
                ValidationSnafu { op, reason: format!("{blocks} tile rows cannot be split evenly over {cores} cores") }
            );
        }
        Ok(())
    }

    /// Shard spec of the output when the output is sharded.
    fn output_shard_spec(&self, a: &Tensor, b: &Tensor) -> Result<ShardSpec> {
        if let Some(spec) = a.shard_spec().or(b.shard_spec()) {
            return Ok(spec.clone());
        }

        let grid = grid_of(a);
        let blocks = height_blocks(a);
        let target = blocks.min(grid.num_cores() as u64).max(1);
        let cores = num_cores_to_core_range_set(target as usize, grid, CoreOrder::RowMajor).context(GeometrySnafu)?;
        let shard_height = (blocks / target) as u32 * TILE_HEIGHT;
        Ok(ShardSpec::new(cores, [shard_height, a.shape().width()]))
    }
}

/// Rows of tiles in `tensor`.
fn height_blocks(tensor: &Tensor) -> u64 {
    tensor.volume() / u64::from(tensor.shape().width().max(1)) / u64::from(TILE_HEIGHT)
}

impl DeviceOperation for EltwiseBinary {
    fn name(&self) -> &'static str {
        "eltwise_binary"
    }

    fn validate(&self, inputs: &[Tensor]) -> Result<()> {
        let op = self.name();
        check_arity(op, inputs, 2)?;
        let (a, b) = (&inputs[0], &inputs[1]);

        ensure!(
            a.shape() == b.shape(),
            ValidationSnafu { op, reason: format!("input shapes {} and {} differ", a.shape(), b.shape()) }
        );
        check_same_device(op, a, b)?;
        check_tiled(op, "first operand", a)?;
        check_tiled(op, "second operand", b)?;
        ensure!(
            a.dtype() == b.dtype(),
            ValidationSnafu { op, reason: format!("operand dtypes {} and {} differ", a.dtype(), b.dtype()) }
        );
        check_dtype(op, "first operand", a, DataType::BFloat16)?;
        check_chain(op, &self.fused_activations)?;
        self.validate_sharding(a, b)
    }

    fn compute_output_shapes(&self, inputs: &[Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn create_output_tensors(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let (a, b) = (&inputs[0], &inputs[1]);
        let device = device_of(self.name(), "first operand", a)?;
        let shape = a.shape().clone();

        let output = if self.output_memory_config.is_sharded() {
            let spec = self.output_shard_spec(a, b)?;
            Tensor::allocate_sharded(device, shape, a.dtype(), Layout::Tile, self.output_memory_config, spec)
        } else {
            Tensor::allocate(device, shape, a.dtype(), Layout::Tile, self.output_memory_config)
        };
        Ok(vec![output.context(DeviceSnafu)?])
    }

    #[tracing::instrument(skip_all, fields(op = self.name(), op_type = %self.op_type))]
    fn create_program(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Program> {
        let (a, b, output) = (&inputs[0], &inputs[1], &outputs[0]);
        let strategy = self.parallelization_strategy(a);
        let tiles = tile_count(self.name(), a)?;

        let shard_spec = output.shard_spec().or(a.shard_spec()).or(b.shard_spec());
        let split = match shard_spec {
            Some(spec) => {
                let tiles_per_shard = (spec.volume() / u64::from(TILE_HW)) as u32;
                WorkSplit::from_shard_grid(&spec.grid, tiles_per_shard, CoreOrder::RowMajor)
            }
            None => split_tiles(grid_of(a), tiles, strategy == BinaryStrategy::MultiCore)?,
        };
        tracing::debug!(%strategy, tiles, cores = split.num_cores(), sharded = shard_spec.is_some(), "eltwise binary program");

        let mut program = Program::new(self.name());
        for (index, input) in [a, b].into_iter().enumerate() {
            if input.is_sharded() {
                let cb = program.add_circular_buffer(shard_cb(index as u8, &split, input)?);
                program.patch_circular_buffer(cb, BufferSource::Input(index)).context(DeviceSnafu)?;
            } else {
                program.add_circular_buffer(stream_cb(index as u8, split.all_cores(), input.dtype()));
            }
        }

        let compute_defines = self.op_type.defines(&self.fused_activations);
        for (input, pre_op) in self.op_type.pre_ops().into_iter().enumerate() {
            if pre_op.is_some() {
                let dtype = inputs[input].dtype();
                let cb = CircularBufferConfig::new(
                    INTERMEDIATE_CB_INDEX + input as u8,
                    split.all_cores().clone(),
                    1,
                    dtype.tile_size(),
                    dtype,
                );
                program.add_circular_buffer(cb);
            }
        }
        add_output_cb(&mut program, &split, output)?;

        let mut reader_defines = Defines::new();
        if a.is_sharded() {
            reader_defines.insert("IN0_SHARDED".to_string(), "1".to_string());
        }
        if b.is_sharded() {
            reader_defines.insert("IN1_SHARDED".to_string(), "1".to_string());
        }
        let writer_defines = if output.is_sharded() { defines([("OUT_SHARDED", "1")]) } else { Defines::new() };

        let reader = program.add_kernel(
            KernelSpec::builder()
                .source(READER)
                .cores(split.all_cores().clone())
                .config(KernelConfig::reader())
                .compile_args(vec![is_dram(a), is_dram(b)])
                .defines(reader_defines)
                .build(),
        );
        let mut writer_spec = start_id_writer(split.all_cores(), output);
        writer_spec.defines = writer_defines;
        let writer = program.add_kernel(writer_spec);
        for (cores, tiles_per_core) in [
            (split.group1(), split.units_per_core_group1()),
            (split.group2(), split.units_per_core_group2()),
        ] {
            if cores.is_empty() {
                continue;
            }
            program.add_kernel(
                KernelSpec::builder()
                    .source(COMPUTE)
                    .cores(cores.clone())
                    .config(KernelConfig::compute())
                    .compile_args(vec![tiles_per_core, 1])
                    .defines(compute_defines.clone())
                    .build(),
            );
        }

        let (src0, src1, dst) = (address(a)?, address(b)?, address(output)?);
        let mut start = 0;
        for (core, tiles_per_core) in split.cores() {
            set_args(
                &mut program,
                reader,
                core,
                vec![src0, src1, tiles_per_core, start],
                &[(0, BufferSource::Input(0)), (1, BufferSource::Input(1))],
            )?;
            set_args(&mut program, writer, core, vec![dst, tiles_per_core, start], &[(0, BufferSource::Output(0))])?;
            start += tiles_per_core;
        }
        Ok(program)
    }

    fn compute_program_hash(&self, inputs: &[Tensor]) -> Result<ProgramSignature> {
        Ok(SignatureBuilder::new(self.name())
            .attribute(&self.op_type)
            .attribute(&self.fused_activations)
            .attribute(&self.output_memory_config)
            .tensors(inputs)
            .finish())
    }
}
