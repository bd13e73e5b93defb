use snafu::Snafu;
use tessera_grid::CoreCoord;

use crate::allocator::BufferType;
use crate::program::{BufferSource, CircularBufferHandle, KernelHandle};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// No free block in the bank is large enough.
    #[snafu(display("out of {buffer_type} memory: requested {size} bytes, largest free block {largest_free}"))]
    OutOfMemory { buffer_type: BufferType, size: u64, largest_free: u64 },

    #[snafu(display("cannot allocate a zero-sized {buffer_type} buffer"))]
    ZeroSizedAllocation { buffer_type: BufferType },

    /// Deallocation of an address the bank never handed out.
    #[snafu(display("address {address:#x} is not allocated in {buffer_type}"))]
    UnknownAddress { address: u32, buffer_type: BufferType },

    /// Tensor operation that requires device storage was given a host tensor.
    #[snafu(display("tensor is not resident on a device"))]
    NotOnDevice,

    #[snafu(display("invalid shard spec: {reason}"))]
    InvalidShard { reason: String },

    #[snafu(display("kernel {kernel} does not exist in program"))]
    UnknownKernel { kernel: KernelHandle },

    #[snafu(display("circular buffer {cb} does not exist in program"))]
    UnknownCircularBuffer { cb: CircularBufferHandle },

    /// Runtime arguments set on a core the kernel is not placed on.
    #[snafu(display("core {core} is not in the core set of kernel {kernel}"))]
    CoreNotInKernel { kernel: KernelHandle, core: CoreCoord },

    /// Runtime argument slot outside the per-core argument list.
    #[snafu(display("runtime arg {index} out of range for kernel {kernel} on core {core} ({len} args)"))]
    RuntimeArgIndex { kernel: KernelHandle, core: CoreCoord, index: usize, len: usize },

    /// Address patch referenced a buffer the invocation does not provide.
    #[snafu(display("{buffer} buffer out of range: {available} provided"))]
    BufferIndex { buffer: BufferSource, available: usize },

    #[snafu(display("{owner} uses core {core} outside compute grid {grid}"))]
    CoreOutOfGrid { owner: String, core: CoreCoord, grid: CoreCoord },

    /// Program rejected while compiling.
    #[snafu(display("failed to compile program '{program}': {reason}"))]
    Compile { program: String, reason: String },

    /// Data movement kernel placed on a core that never received runtime args.
    #[snafu(display("program '{program}': kernel {kernel} has no runtime args on core {core}"))]
    MissingRuntimeArgs { program: String, kernel: String, core: CoreCoord },

    #[snafu(display("program '{program}' must be compiled before launch"))]
    NotCompiled { program: String },

    #[snafu(display("core geometry error: {source}"))]
    Geometry { source: tessera_grid::Error },
}
