//! Device-side collaborators of the tessera scheduler.
//!
//! The scheduling core in `tessera-runtime` treats the accelerator as a set of
//! interfaces. This crate defines them and ships one in-process implementation
//! of each:
//!
//! - [`Tensor`] - shape, dtype, layout and placement of an operand, plus the
//!   [`DeviceBuffer`] that pins its address.
//! - [`Allocator`] / [`BankAllocator`] - DRAM and L1 bank assignment.
//! - [`Device`] / [`SimulatorDevice`] - compute grid and program launch.
//! - [`Program`] - a compiled per-core execution plan with its [`AddressPatch`].
//! - [`TimelineSignal`] - ordering between command-queue producers and workers.

pub mod allocator;
pub mod buffer;
pub mod device;
pub mod error;
pub mod program;
pub mod sync;
pub mod tensor;


pub use allocator::{Allocator, BankAllocator, BankRange, BufferType};
pub use buffer::DeviceBuffer;
pub use device::{Device, LaunchRecord, SimulatorConfig, SimulatorDevice};
pub use error::*;
pub use program::{
    AddressPatch, BufferSource, CircularBuffer, CircularBufferConfig, CircularBufferHandle, CircularBufferRegion,
    ComputeConfig, DataMovementProcessor, INTERMEDIATE_CB_INDEX, Kernel, KernelConfig, KernelHandle, KernelSpec,
    MathFidelity, NUM_CIRCULAR_BUFFERS, OUTPUT_CB_INDEX, PatchSlot, PatchTarget, Processor, Program,
};
pub use sync::{CpuTimelineSignal, TimelineSignal};
pub use tensor::{
    DataType, Layout, MemoryConfig, Shape, ShardOrientation, ShardSpec, Storage, TILE_HEIGHT, TILE_HW, TILE_WIDTH,
    Tensor, TensorMemoryLayout,
};
