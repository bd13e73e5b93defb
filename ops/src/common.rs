//! Validation and program-building helpers shared by the operations.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, ensure};
use tessera_device::{
    BufferSource, CircularBufferConfig, DataType, Device, KernelConfig, KernelHandle, KernelSpec, Layout, OUTPUT_CB_INDEX,
    Program, Tensor,
};
use tessera_grid::{CoreCoord, CoreOrder, CoreRangeSet, WorkSplit, split_work_to_cores};
use tessera_runtime::{DeviceSnafu, GeometrySnafu, Result, ValidationSnafu};

/// Preprocessor defines passed to a kernel.
pub type Defines = BTreeMap<String, String>;

const WRITER_START_ID: &str = "tt_metal/kernels/dataflow/writer_unary_interleaved_start_id.cpp";
const WRITER_COLS_BATCHED: &str = "tt_metal/kernels/dataflow/writer_unary_8bank_input_cols_batched.cpp";

/// Tiles double-buffered by streaming circular buffers.
pub(crate) const STREAM_TILES: u32 = 2;

// ============================================================================
// VALIDATION
// ============================================================================

pub(crate) fn check_arity(op: &str, inputs: &[Tensor], expected: usize) -> Result<()> {
    ensure!(
        inputs.len() == expected,
        ValidationSnafu { op, reason: format!("expects {expected} input tensors, got {}", inputs.len()) }
    );
    Ok(())
}

/// The device `tensor` is allocated on.
pub(crate) fn device_of<'a>(op: &str, what: &str, tensor: &'a Tensor) -> Result<&'a Arc<dyn Device>> {
    tensor.device().context(ValidationSnafu { op, reason: format!("{what} must be allocated on device") })
}

pub(crate) fn check_tiled(op: &str, what: &str, tensor: &Tensor) -> Result<()> {
    ensure!(tensor.layout() == Layout::Tile, ValidationSnafu { op, reason: format!("{what} must be tilized") });
    ensure!(
        tensor.shape().is_tile_aligned(),
        ValidationSnafu { op, reason: format!("{what} shape {} is not a whole number of tiles", tensor.shape()) }
    );
    Ok(())
}

pub(crate) fn check_dtype(op: &str, what: &str, tensor: &Tensor, expected: DataType) -> Result<()> {
    ensure!(
        tensor.dtype() == expected,
        ValidationSnafu { op, reason: format!("{what} must be {expected}, got {}", tensor.dtype()) }
    );
    Ok(())
}

pub(crate) fn check_same_device(op: &str, a: &Tensor, b: &Tensor) -> Result<()> {
    let a_device = device_of(op, "first operand", a)?;
    let b_device = device_of(op, "second operand", b)?;
    ensure!(
        a_device.id() == b_device.id(),
        ValidationSnafu { op, reason: format!("operands are on devices {} and {}", a_device.id(), b_device.id()) }
    );
    Ok(())
}

/// `[N, C, H, W]` of a rank-4 tensor.
pub(crate) fn nchw(op: &str, what: &str, tensor: &Tensor) -> Result<[u32; 4]> {
    tensor.shape().nchw().context(ValidationSnafu { op, reason: format!("{what} must be rank 4, got {}", tensor.shape()) })
}

/// Tile count of `tensor` as a kernel argument.
pub(crate) fn tile_count(op: &str, tensor: &Tensor) -> Result<u32> {
    kernel_arg(op, "tiles", tensor.num_tiles())
}

/// `value` as a 32-bit kernel argument.
pub(crate) fn kernel_arg(op: &str, what: &str, value: u64) -> Result<u32> {
    u32::try_from(value).ok().context(ValidationSnafu { op, reason: format!("{value} {what} exceed a kernel argument") })
}

// ============================================================================
// PROGRAM BUILDING
// ============================================================================

pub(crate) fn address(tensor: &Tensor) -> Result<u32> {
    tensor.address().context(DeviceSnafu)
}

/// `1` when `tensor` is interleaved across DRAM banks, `0` for L1.
pub(crate) fn is_dram(tensor: &Tensor) -> u32 {
    u32::from(tensor.buffer().is_some_and(|buffer| buffer.is_dram()))
}

pub(crate) fn grid_of(tensor: &Tensor) -> CoreCoord {
    tensor.device().map(|device| device.compute_grid_size()).unwrap_or_default()
}

/// Split `tiles` row-major over the grid, or onto core `(0, 0)` alone.
pub(crate) fn split_tiles(grid: CoreCoord, tiles: u32, multi_core: bool) -> Result<WorkSplit> {
    let grid = if multi_core { grid } else { CoreCoord::new(1, 1) };
    split_work_to_cores(grid, tiles, CoreOrder::RowMajor).context(GeometrySnafu)
}

/// Streaming circular buffer of [`STREAM_TILES`] tiles at `index`.
pub(crate) fn stream_cb(index: u8, cores: &CoreRangeSet, dtype: DataType) -> CircularBufferConfig {
    CircularBufferConfig::new(index, cores.clone(), STREAM_TILES, dtype.tile_size(), dtype)
}

/// Circular buffer at `index` backed by the shard of `tensor` on every core.
pub(crate) fn shard_cb(index: u8, split: &WorkSplit, tensor: &Tensor) -> Result<CircularBufferConfig> {
    let dtype = tensor.dtype();
    Ok(CircularBufferConfig::new(index, split.all_cores().clone(), split.units_per_core_group1(), dtype.tile_size(), dtype)
        .with_global_address(address(tensor)?))
}

/// The output circular buffer: streaming, or the output shard itself.
pub(crate) fn add_output_cb(program: &mut Program, split: &WorkSplit, output: &Tensor) -> Result<()> {
    if output.is_sharded() {
        let cb = program.add_circular_buffer(shard_cb(OUTPUT_CB_INDEX, split, output)?);
        program.patch_circular_buffer(cb, BufferSource::Output(0)).context(DeviceSnafu)?;
    } else {
        program.add_circular_buffer(stream_cb(OUTPUT_CB_INDEX, split.all_cores(), output.dtype()));
    }
    Ok(())
}

/// Writer streaming `n` tiles from a start tile id.
pub(crate) fn start_id_writer(cores: &CoreRangeSet, output: &Tensor) -> KernelSpec {
    KernelSpec::builder()
        .source(WRITER_START_ID)
        .cores(cores.clone())
        .config(KernelConfig::writer())
        .compile_args(vec![u32::from(OUTPUT_CB_INDEX), is_dram(output)])
        .build()
}

/// Writer laying out a block of tile rows or columns inside each batch.
pub(crate) fn cols_batched_writer(cores: &CoreRangeSet, output: &Tensor) -> KernelSpec {
    KernelSpec::builder()
        .source(WRITER_COLS_BATCHED)
        .cores(cores.clone())
        .config(KernelConfig::writer())
        .compile_args(vec![is_dram(output)])
        .build()
}

/// Set `args` on `core` and register the address slots for patching.
pub(crate) fn set_args(
    program: &mut Program,
    kernel: KernelHandle,
    core: CoreCoord,
    args: Vec<u32>,
    patches: &[(usize, BufferSource)],
) -> Result<()> {
    program.set_runtime_args(kernel, core, args).context(DeviceSnafu)?;
    for &(index, source) in patches {
        program.patch_runtime_arg(kernel, core, index, source).context(DeviceSnafu)?;
    }
    Ok(())
}

pub(crate) fn defines<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Defines {
    pairs.into_iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
}

/// Merge `from` into `into`, keeping existing values except that an enabled
/// include guard (`"1"`) overrides a disabled one.
pub(crate) fn merge_defines(into: &mut Defines, from: Defines) {
    for (key, value) in from {
        match into.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
            Entry::Occupied(mut entry) => {
                if value == "1" && entry.get() == "0" {
                    entry.insert(value);
                }
            }
        }
    }
}
