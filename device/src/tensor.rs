//! Tensor descriptors and device placement.
//!
//! Tensors here carry no data: operations only read their descriptors (shape,
//! dtype, layout, placement) and the address of their device buffer.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tessera_grid::CoreRangeSet;

use crate::allocator::BufferType;
use crate::buffer::DeviceBuffer;
use crate::device::Device;
use crate::error::{InvalidShardSnafu, NotOnDeviceSnafu, Result};

pub const TILE_HEIGHT: u32 = 32;
pub const TILE_WIDTH: u32 = 32;
pub const TILE_HW: u32 = TILE_HEIGHT * TILE_WIDTH;

// ============================================================================
// SHAPE
// ============================================================================

/// Tensor dimensions, outermost first (stack-allocated up to rank 4).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(SmallVec<[u32; 4]>);

impl Shape {
    pub fn new(dims: impl IntoIterator<Item = u32>) -> Self {
        Self(dims.into_iter().collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[u32] {
        &self.0
    }

    /// Number of elements.
    pub fn volume(&self) -> u64 {
        self.0.iter().map(|&d| u64::from(d)).product()
    }

    /// Dimension at `index`; negative indices count from the innermost dimension.
    pub fn dim(&self, index: isize) -> Option<u32> {
        let resolved = if index < 0 { self.0.len().checked_sub(index.unsigned_abs())? } else { index as usize };
        self.0.get(resolved).copied()
    }

    pub fn width(&self) -> u32 {
        self.dim(-1).unwrap_or(1)
    }

    pub fn height(&self) -> u32 {
        self.dim(-2).unwrap_or(1)
    }

    /// Product of all dimensions except the last two.
    pub fn batch(&self) -> u64 {
        self.0.iter().rev().skip(2).map(|&d| u64::from(d)).product()
    }

    /// `[N, C, H, W]` for rank-4 shapes.
    pub fn nchw(&self) -> Option<[u32; 4]> {
        <[u32; 4]>::try_from(self.0.as_slice()).ok()
    }

    /// Whether the two innermost dimensions are whole tiles.
    pub fn is_tile_aligned(&self) -> bool {
        self.width() % TILE_WIDTH == 0 && self.height() % TILE_HEIGHT == 0
    }
}

impl<const N: usize> From<[u32; N]> for Shape {
    fn from(dims: [u32; N]) -> Self {
        Self::new(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.as_slice())
    }
}

// ============================================================================
// ELEMENT FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::VariantArray)]
pub enum DataType {
    BFloat16,
    Float32,
    UInt32,
    /// Block float: eight-bit mantissas sharing one exponent per 16 values.
    BFloat8B,
}

impl DataType {
    /// Bytes per element, rounded up for block formats.
    pub fn element_size(self) -> u32 {
        match self {
            Self::BFloat16 => 2,
            Self::Float32 | Self::UInt32 => 4,
            Self::BFloat8B => 1,
        }
    }

    /// Bytes of one 32x32 tile.
    pub fn tile_size(self) -> u32 {
        match self {
            Self::BFloat16 => 2 * TILE_HW,
            Self::Float32 | Self::UInt32 => 4 * TILE_HW,
            Self::BFloat8B => TILE_HW + TILE_HW / 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Layout {
    RowMajor,
    Tile,
}

// ============================================================================
// PLACEMENT
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
pub enum TensorMemoryLayout {
    #[default]
    Interleaved,
    HeightSharded,
    WidthSharded,
    BlockSharded,
}

/// Where an operation places a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryConfig {
    pub memory_layout: TensorMemoryLayout,
    pub buffer_type: BufferType,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::interleaved(BufferType::Dram)
    }
}

impl MemoryConfig {
    pub const fn interleaved(buffer_type: BufferType) -> Self {
        Self { memory_layout: TensorMemoryLayout::Interleaved, buffer_type }
    }

    /// Sharded tensors always live in L1.
    pub const fn sharded(memory_layout: TensorMemoryLayout) -> Self {
        Self { memory_layout, buffer_type: BufferType::L1 }
    }

    pub fn is_sharded(&self) -> bool {
        self.memory_layout != TensorMemoryLayout::Interleaved
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ShardOrientation {
    #[default]
    RowMajor,
    ColMajor,
}

/// Distribution of a sharded tensor across core-local memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardSpec {
    pub grid: CoreRangeSet,
    /// `[height, width]` of one shard in elements.
    pub shape: [u32; 2],
    pub orientation: ShardOrientation,
}

impl ShardSpec {
    pub fn new(grid: CoreRangeSet, shape: [u32; 2]) -> Self {
        Self { grid, shape, orientation: ShardOrientation::RowMajor }
    }

    pub fn num_cores(&self) -> usize {
        self.grid.num_cores()
    }

    pub fn volume(&self) -> u64 {
        u64::from(self.shape[0]) * u64::from(self.shape[1])
    }
}

// ============================================================================
// TENSOR
// ============================================================================

#[derive(Debug, Clone)]
pub enum Storage {
    Host,
    Device { buffer: Arc<DeviceBuffer>, device: Arc<dyn Device> },
}

#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Shape,
    dtype: DataType,
    layout: Layout,
    storage: Storage,
    memory_config: MemoryConfig,
    shard_spec: Option<ShardSpec>,
}

impl Tensor {
    /// Host-resident tensor descriptor.
    pub fn host(shape: impl Into<Shape>, dtype: DataType, layout: Layout) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            layout,
            storage: Storage::Host,
            memory_config: MemoryConfig::default(),
            shard_spec: None,
        }
    }

    /// Allocate an interleaved tensor on `device`.
    pub fn allocate(
        device: &Arc<dyn Device>,
        shape: impl Into<Shape>,
        dtype: DataType,
        layout: Layout,
        memory_config: MemoryConfig,
    ) -> Result<Self> {
        ensure!(
            !memory_config.is_sharded(),
            InvalidShardSnafu { reason: format!("{} tensor needs a shard spec", memory_config.memory_layout) }
        );
        let shape = shape.into();
        let size = storage_bytes(&shape, dtype, layout);
        let buffer = DeviceBuffer::allocate(
            device.allocator(),
            size,
            page_size(&shape, dtype, layout),
            memory_config.buffer_type,
        )?;

        Ok(Self {
            shape,
            dtype,
            layout,
            storage: Storage::Device { buffer: Arc::new(buffer), device: Arc::clone(device) },
            memory_config,
            shard_spec: None,
        })
    }

    /// Allocate a sharded tensor on `device`.
    ///
    /// Every core of the shard grid holds one shard at the same L1 address, so
    /// the bank reservation is the size of a single shard.
    pub fn allocate_sharded(
        device: &Arc<dyn Device>,
        shape: impl Into<Shape>,
        dtype: DataType,
        layout: Layout,
        memory_config: MemoryConfig,
        shard_spec: ShardSpec,
    ) -> Result<Self> {
        let shape = shape.into();
        validate_shard_spec(&shape, layout, &memory_config, &shard_spec)?;

        let shard_bytes = match layout {
            Layout::Tile => shard_spec.volume() / u64::from(TILE_HW) * u64::from(dtype.tile_size()),
            Layout::RowMajor => shard_spec.volume() * u64::from(dtype.element_size()),
        };
        let buffer = DeviceBuffer::allocate(
            device.allocator(),
            shard_bytes,
            page_size(&shape, dtype, layout),
            memory_config.buffer_type,
        )?;

        Ok(Self {
            shape,
            dtype,
            layout,
            storage: Storage::Device { buffer: Arc::new(buffer), device: Arc::clone(device) },
            memory_config,
            shard_spec: Some(shard_spec),
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn memory_config(&self) -> &MemoryConfig {
        &self.memory_config
    }

    pub fn shard_spec(&self) -> Option<&ShardSpec> {
        self.shard_spec.as_ref()
    }

    pub fn is_sharded(&self) -> bool {
        self.memory_config.is_sharded()
    }

    pub fn is_on_device(&self) -> bool {
        matches!(self.storage, Storage::Device { .. })
    }

    pub fn buffer(&self) -> Option<&Arc<DeviceBuffer>> {
        match &self.storage {
            Storage::Device { buffer, .. } => Some(buffer),
            Storage::Host => None,
        }
    }

    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        match &self.storage {
            Storage::Device { device, .. } => Some(device),
            Storage::Host => None,
        }
    }

    /// Address of the backing device buffer.
    pub fn address(&self) -> Result<u32> {
        self.buffer().map(|buffer| buffer.address()).context(NotOnDeviceSnafu)
    }

    pub fn volume(&self) -> u64 {
        self.shape.volume()
    }

    /// Whole tiles covered by the tensor.
    pub fn num_tiles(&self) -> u64 {
        self.shape.volume() / u64::from(TILE_HW)
    }

    pub fn size_bytes(&self) -> u64 {
        storage_bytes(&self.shape, self.dtype, self.layout)
    }
}

fn storage_bytes(shape: &Shape, dtype: DataType, layout: Layout) -> u64 {
    match layout {
        Layout::Tile => shape.volume().div_ceil(u64::from(TILE_HW)) * u64::from(dtype.tile_size()),
        Layout::RowMajor => shape.volume() * u64::from(dtype.element_size()),
    }
}

/// One tile, or one row for row-major tensors.
fn page_size(shape: &Shape, dtype: DataType, layout: Layout) -> u32 {
    match layout {
        Layout::Tile => dtype.tile_size(),
        Layout::RowMajor => shape.width() * dtype.element_size(),
    }
}

fn validate_shard_spec(shape: &Shape, layout: Layout, config: &MemoryConfig, spec: &ShardSpec) -> Result<()> {
    ensure!(
        config.is_sharded(),
        InvalidShardSnafu { reason: "shard spec given for an interleaved memory config".to_string() }
    );
    ensure!(!spec.grid.is_empty(), InvalidShardSnafu { reason: "shard grid is empty".to_string() });

    let [shard_height, shard_width] = spec.shape;
    ensure!(
        shard_height > 0 && shard_width > 0,
        InvalidShardSnafu { reason: format!("shard shape {:?} has a zero dimension", spec.shape) }
    );
    if layout == Layout::Tile {
        ensure!(
            shard_height % TILE_HEIGHT == 0 && shard_width % TILE_WIDTH == 0,
            InvalidShardSnafu { reason: format!("shard shape {:?} is not tile aligned", spec.shape) }
        );
    }

    let rows = shape.volume() / u64::from(shape.width().max(1));
    let capacity = spec.volume() * spec.num_cores() as u64;
    ensure!(
        capacity >= shape.volume(),
        InvalidShardSnafu { reason: format!("{} shards of {:?} cannot hold shape {shape}", spec.num_cores(), spec.shape) }
    );

    if config.memory_layout == TensorMemoryLayout::HeightSharded {
        ensure!(
            shard_width == shape.width(),
            InvalidShardSnafu {
                reason: format!("height sharding needs full-width shards, got {shard_width} for width {}", shape.width())
            }
        );
        ensure!(
            rows.div_ceil(u64::from(shard_height)) <= spec.num_cores() as u64,
            InvalidShardSnafu { reason: format!("{rows} rows do not fit in {} shards", spec.num_cores()) }
        );
    }
    Ok(())
}
