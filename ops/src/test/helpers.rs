use std::sync::Arc;

use tessera_device::{
    DataType, Device, Kernel, Layout, MemoryConfig, Program, Shape, ShardSpec, SimulatorConfig,
    SimulatorDevice, Tensor, TensorMemoryLayout,
};
use tessera_grid::{CoreCoord, CoreRange, CoreRangeSet};
use tessera_runtime::{RuntimeConfig, Session};

pub fn simulator(grid: CoreCoord) -> (Arc<SimulatorDevice>, Arc<dyn Device>) {
    let device = Arc::new(SimulatorDevice::new(SimulatorConfig::builder().grid_size(grid).build()));
    let handle: Arc<dyn Device> = device.clone();
    (device, handle)
}

/// Session with the program cache enabled.
pub fn session(grid: CoreCoord) -> (Arc<SimulatorDevice>, Session) {
    let (sim, device) = simulator(grid);
    (sim, Session::new(device, RuntimeConfig::builder().program_cache(true).build()))
}

pub fn tile_tensor(device: &Arc<dyn Device>, shape: impl Into<Shape>) -> Tensor {
    Tensor::allocate(device, shape, DataType::BFloat16, Layout::Tile, MemoryConfig::default()).unwrap()
}

pub fn height_sharded() -> MemoryConfig {
    MemoryConfig::sharded(TensorMemoryLayout::HeightSharded)
}

/// Height-sharded tile tensor with `[shard_height, width]` shards on `grid`.
pub fn sharded_tensor(device: &Arc<dyn Device>, shape: impl Into<Shape>, grid: CoreCoord, shard_height: u32) -> Tensor {
    let shape = shape.into();
    let spec = ShardSpec::new(core_grid(grid), [shard_height, shape.width()]);
    Tensor::allocate_sharded(device, shape, DataType::BFloat16, Layout::Tile, height_sharded(), spec).unwrap()
}

/// Every core of a `grid`-sized rectangle at the origin.
pub fn core_grid(grid: CoreCoord) -> CoreRangeSet {
    CoreRangeSet::from(CoreRange::grid(grid).unwrap())
}

pub fn kernel<'a>(program: &'a Program, source: &str) -> &'a Kernel {
    program.kernel(program.find_kernel(source).unwrap()).unwrap()
}

/// Every kernel built from `source`, in program order.
pub fn kernels<'a>(program: &'a Program, source: &'a str) -> impl Iterator<Item = &'a Kernel> + 'a {
    program.kernels().iter().filter(move |kernel| kernel.spec().source == source)
}

pub fn core(x: usize, y: usize) -> CoreCoord {
    CoreCoord::new(x, y)
}
