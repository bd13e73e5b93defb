//! Eltwise unary operations on the SFPU.
//!
//! A single program applies a chain of unary ops to every tile: the reader
//! streams tiles into circular buffer 0, the compute kernel runs the chain
//! and the writer drains circular buffer 16.
//!
//! The chain reaches the compute kernel as preprocessor defines. For a chain
//! `[exp, relu]` in block `0`:
//!
//! ```text
//! SFPU_OP_CHAIN_0_INIT_0 = exp_tile_init();
//! SFPU_OP_CHAIN_0_FUNC_0 = exp_tile(0);
//! SFPU_OP_CHAIN_0_INIT_1 = relu_min_tile_init();
//! SFPU_OP_CHAIN_0_FUNC_1 = relu_min_tile(0, 0x0u);
//! SFPU_OP_CHAIN_0        = SFPU_OP_CHAIN_0_INIT_0 SFPU_OP_CHAIN_0_FUNC_0 SFPU_OP_CHAIN_0_INIT_1 SFPU_OP_CHAIN_0_FUNC_1
//! ```
//!
//! plus include guards for the op families the chain pulls in.

use std::hash::{Hash, Hasher};

use bon::bon;
use snafu::{ResultExt, ensure};
use tessera_device::{
    BufferSource, DataType, KernelConfig, KernelSpec, Layout, MemoryConfig, Program, Shape, Tensor,
};
use tessera_runtime::{DeviceOperation, DeviceSnafu, ProgramSignature, Result, SignatureBuilder, ValidationSnafu};

use crate::common::{
    Defines, add_output_cb, address, check_arity, check_dtype, check_tiled, device_of, grid_of, is_dram, set_args,
    split_tiles, start_id_writer, stream_cb, tile_count,
};

const READER: &str = "tt_metal/kernels/dataflow/reader_unary_interleaved_start_id.cpp";
const COMPUTE: &str = "tt_metal/kernels/compute/eltwise_sfpu.cpp";

/// Include guards every SFPU define set carries, disabled unless an op needs them.
const INCLUDE_GUARDS: [&str; 4] = [
    "SFPU_OP_ERF_ERFC_INCLUDE",
    "SFPU_OP_ELU_INCLUDE",
    "SFPU_OP_RELU_FAMILY_INCLUDE",
    "SFPU_OP_ISINF_ISNAN_INCLUDE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum UnaryOpType {
    Exp,
    Exp2,
    Expm1,
    Recip,
    Gelu,
    Relu,
    Relu6,
    ReluMax,
    ReluMin,
    LeakyRelu,
    Elu,
    Sqrt,
    Rsqrt,
    Sigmoid,
    Log,
    Log2,
    Log10,
    Tanh,
    Sin,
    Cos,
    Asin,
    Acos,
    Atan,
    Abs,
    Sign,
    Signbit,
    Square,
    Power,
    Heaviside,
    Erf,
    Erfc,
    Erfinv,
    Eqz,
    Nez,
    Gtz,
    Ltz,
    Gez,
    Lez,
    Isinf,
    Isposinf,
    Isneginf,
    Isnan,
    Isfinite,
    LogicalNotUnary,
}

/// How an op uses its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    None,
    /// Required, passed as the bit pattern of an `f32`.
    Float,
    /// Required, truncated to an unsigned integer.
    Integer,
    /// Optional mode flag, defaults to `0`.
    Mode,
    /// Optional, passed as the bit pattern of an `f32`, defaults to `0.0`.
    OptionalFloat,
}

impl UnaryOpType {
    fn param_kind(self) -> ParamKind {
        match self {
            Self::ReluMax | Self::ReluMin | Self::LeakyRelu | Self::Elu | Self::Heaviside => ParamKind::Float,
            Self::Power => ParamKind::Integer,
            Self::Gelu | Self::Rsqrt => ParamKind::Mode,
            Self::Erf | Self::Erfc => ParamKind::OptionalFloat,
            _ => ParamKind::None,
        }
    }

    /// Include guard the op's SFPU implementation lives behind.
    fn include(self) -> Option<&'static str> {
        match self {
            Self::Exp | Self::Exp2 => Some("SFPU_OP_EXP_INCLUDE"),
            Self::Gelu => Some("SFPU_OP_GELU_INCLUDE"),
            Self::Recip => Some("SFPU_OP_RECIP_INCLUDE"),
            Self::Sqrt => Some("SFPU_OP_SQRT_INCLUDE"),
            Self::Erfinv => Some("SFPU_OP_ERFINV_INCLUDE"),
            Self::Erf | Self::Erfc => Some("SFPU_OP_ERF_ERFC_INCLUDE"),
            Self::Elu => Some("SFPU_OP_ELU_INCLUDE"),
            Self::Relu | Self::Relu6 | Self::ReluMax | Self::ReluMin | Self::LeakyRelu => {
                Some("SFPU_OP_RELU_FAMILY_INCLUDE")
            }
            Self::Isinf | Self::Isnan | Self::Isneginf | Self::Isposinf | Self::Isfinite => {
                Some("SFPU_OP_ISINF_ISNAN_INCLUDE")
            }
            Self::LogicalNotUnary => Some("SFPU_OP_LOGICAL_NOT_NOTI_INCLUDE"),
            _ => None,
        }
    }
}

/// One element of a unary chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnaryWithParam {
    pub op: UnaryOpType,
    pub param: Option<f32>,
}

impl Hash for UnaryWithParam {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.op.hash(state);
        self.param.map(f32::to_bits).hash(state);
    }
}

impl From<UnaryOpType> for UnaryWithParam {
    fn from(op: UnaryOpType) -> Self {
        Self { op, param: None }
    }
}

impl UnaryWithParam {
    pub fn new(op: UnaryOpType) -> Self {
        Self { op, param: None }
    }

    pub fn with_param(op: UnaryOpType, param: f32) -> Self {
        Self { op, param: Some(param) }
    }

    /// Init and call statements of the op on destination register `idst`.
    ///
    /// Parameters are assumed checked with [`check_chain`].
    pub fn init_and_func(&self, idst: &str) -> (String, String) {
        let name = self.op.to_string();
        let param = self.param.unwrap_or(0.0);

        match self.op {
            UnaryOpType::Relu => ("relu_min_tile_init();".into(), format!("relu_min_tile({idst}, 0x0u);")),
            UnaryOpType::Relu6 => ("relu_max_tile_init();".into(), format!("relu_max_tile({idst}, 0x40c00000u);")),
            // log_b(x) = ln(x) * (1 / ln(b)), scale as bfloat16 bits
            UnaryOpType::Log10 => ("log_with_base_tile_init();".into(), format!("log_with_base_tile({idst}, 0x36f3u);")),
            UnaryOpType::Log2 => ("log_with_base_tile_init();".into(), format!("log_with_base_tile({idst}, 0x3dc5u);")),
            op => {
                let func = match op.param_kind() {
                    ParamKind::None => format!("{name}_tile({idst});"),
                    ParamKind::Float | ParamKind::OptionalFloat => format!("{name}_tile({idst}, {}u);", hex_bits(param)),
                    ParamKind::Integer | ParamKind::Mode => format!("{name}_tile({idst}, {}u);", param as u32),
                };
                (format!("{name}_tile_init();"), func)
            }
        }
    }
}

/// `0x`-prefixed bit pattern of `value`, as SFPU kernels take float parameters.
fn hex_bits(value: f32) -> String {
    format!("{:#x}", value.to_bits())
}

/// Reject chains whose parameters do not match their ops.
pub fn check_chain(op: &str, chain: &[UnaryWithParam]) -> Result<()> {
    for unary in chain {
        match (unary.op.param_kind(), unary.param) {
            (ParamKind::Float | ParamKind::Integer, None) => {
                return ValidationSnafu { op, reason: format!("{} requires a parameter", unary.op) }.fail();
            }
            (ParamKind::None, Some(_)) => {
                return ValidationSnafu { op, reason: format!("{} takes no parameter", unary.op) }.fail();
            }
            (ParamKind::Integer | ParamKind::Mode, Some(param)) if !(param >= 0.0 && param.fract() == 0.0) => {
                return ValidationSnafu { op, reason: format!("{} needs a non-negative integer parameter, got {param}", unary.op) }
                    .fail();
            }
            _ => {}
        }
    }
    Ok(())
}

fn set_include_guards(defines: &mut Defines, ops: impl IntoIterator<Item = UnaryOpType>) {
    for guard in INCLUDE_GUARDS {
        defines.entry(guard.to_string()).or_insert_with(|| "0".to_string());
    }
    for include in ops.into_iter().filter_map(UnaryOpType::include) {
        defines.insert(include.to_string(), "1".to_string());
    }
}

/// Defines for a single op, as `SFPU_OP_INIT_{id}` / `SFPU_OP_FUNC_{id}`.
pub fn op_defines(unary: &UnaryWithParam, id: &str, idst: &str) -> Defines {
    let (init, func) = unary.init_and_func(idst);
    let mut defines = Defines::new();
    defines.insert(format!("SFPU_OP_INIT_{id}"), init);
    defines.insert(format!("SFPU_OP_FUNC_{id}"), func);
    set_include_guards(&mut defines, [unary.op]);
    defines
}

/// Defines for a whole chain, run by the kernel as `SFPU_OP_CHAIN_{block}`.
pub fn block_defines(chain: &[UnaryWithParam], block: &str, idst: &str) -> Defines {
    let mut defines = Defines::new();
    let mut sequence = String::new();

    for (i, unary) in chain.iter().enumerate() {
        let init_def = format!("SFPU_OP_CHAIN_{block}_INIT_{i}");
        let func_def = format!("SFPU_OP_CHAIN_{block}_FUNC_{i}");
        sequence.push_str(&format!("{init_def} {func_def} "));

        let (init, func) = unary.init_and_func(idst);
        defines.insert(init_def, init);
        defines.insert(func_def, func);
    }

    set_include_guards(&mut defines, chain.iter().map(|unary| unary.op));
    defines.insert(format!("SFPU_OP_CHAIN_{block}"), sequence);
    defines
}

// ============================================================================
// OPERATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum UnaryStrategy {
    SingleCore,
    MultiCore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EltwiseUnary {
    pub op_chain: Vec<UnaryWithParam>,
    pub output_memory_config: MemoryConfig,
}

#[bon]
impl EltwiseUnary {
    #[builder]
    pub fn new(
        #[builder(into)] op_chain: Vec<UnaryWithParam>,
        #[builder(default)] output_memory_config: MemoryConfig,
    ) -> Self {
        Self { op_chain, output_memory_config }
    }
}

impl EltwiseUnary {
    /// Single op with the default output placement.
    pub fn single(op: impl Into<UnaryWithParam>) -> Self {
        Self::builder().op_chain(vec![op.into()]).build()
    }

    pub fn parallelization_strategy(&self, input: &Tensor) -> UnaryStrategy {
        if input.num_tiles() > 1 { UnaryStrategy::MultiCore } else { UnaryStrategy::SingleCore }
    }
}

impl DeviceOperation for EltwiseUnary {
    fn name(&self) -> &'static str {
        "eltwise_unary"
    }

    fn validate(&self, inputs: &[Tensor]) -> Result<()> {
        let op = self.name();
        check_arity(op, inputs, 1)?;
        let input = &inputs[0];

        device_of(op, "input", input)?;
        check_tiled(op, "input", input)?;
        check_dtype(op, "input", input, DataType::BFloat16)?;
        ensure!(!self.op_chain.is_empty(), ValidationSnafu { op, reason: "op chain is empty" });
        check_chain(op, &self.op_chain)?;
        ensure!(
            !input.is_sharded() && !self.output_memory_config.is_sharded(),
            ValidationSnafu { op, reason: "sharded operands are not supported" }
        );
        Ok(())
    }

    fn compute_output_shapes(&self, inputs: &[Tensor]) -> Result<Vec<Shape>> {
        Ok(vec![inputs[0].shape().clone()])
    }

    fn create_output_tensors(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = &inputs[0];
        let device = device_of(self.name(), "input", input)?;
        let output = Tensor::allocate(device, input.shape().clone(), input.dtype(), Layout::Tile, self.output_memory_config)
            .context(DeviceSnafu)?;
        Ok(vec![output])
    }

    #[tracing::instrument(skip_all, fields(op = self.name()))]
    fn create_program(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Program> {
        let (input, output) = (&inputs[0], &outputs[0]);
        let strategy = self.parallelization_strategy(input);
        let tiles = tile_count(self.name(), input)?;
        let split = split_tiles(grid_of(input), tiles, strategy == UnaryStrategy::MultiCore)?;
        tracing::debug!(%strategy, tiles, cores = split.num_cores(), "eltwise unary program");

        let mut program = Program::new(self.name());
        program.add_circular_buffer(stream_cb(0, split.all_cores(), input.dtype()));
        add_output_cb(&mut program, &split, output)?;

        let reader = program.add_kernel(
            KernelSpec::builder()
                .source(READER)
                .cores(split.all_cores().clone())
                .config(KernelConfig::reader())
                .compile_args(vec![is_dram(input)])
                .build(),
        );
        let writer = program.add_kernel(start_id_writer(split.all_cores(), output));

        let defines = block_defines(&self.op_chain, "0", "0");
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
                    .defines(defines.clone())
                    .build(),
            );
        }

        let (src, dst) = (address(input)?, address(output)?);
        let mut start = 0;
        for (core, tiles_per_core) in split.cores() {
            set_args(&mut program, reader, core, vec![src, tiles_per_core, start], &[(0, BufferSource::Input(0))])?;
            set_args(&mut program, writer, core, vec![dst, tiles_per_core, start], &[(0, BufferSource::Output(0))])?;
            start += tiles_per_core;
        }
        Ok(program)
    }

    fn compute_program_hash(&self, inputs: &[Tensor]) -> Result<ProgramSignature> {
        Ok(SignatureBuilder::new(self.name())
            .attribute(&self.op_chain)
            .attribute(&self.output_memory_config)
            .tensors(inputs)
            .finish())
    }
}
