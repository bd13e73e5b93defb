//! Concrete device operations for tessera.
//!
//! Every operation here implements [`tessera_runtime::DeviceOperation`]: it
//! validates its inputs, allocates its outputs and builds a [`Program`] whose
//! buffer addresses are registered for patching, so a [`Session`] can replay
//! the cached program for new tensors with the same signature.
//!
//! [`Program`]: tessera_device::Program
//! [`Session`]: tessera_runtime::Session

pub mod bcast;
mod common;
pub mod eltwise_binary;
pub mod eltwise_unary;
pub mod reduce;
pub mod reshard;


pub use bcast::{Bcast, BcastDim, BcastMath, BcastStrategy, bcast_defines};
pub use common::Defines;
pub use eltwise_binary::{BinaryOpType, BinaryStrategy, EltwiseBinary};
pub use eltwise_unary::{EltwiseUnary, UnaryOpType, UnaryStrategy, UnaryWithParam, block_defines, op_defines};
pub use reduce::{Reduce, ReduceDim, ReduceMath, ReduceStrategy, reduce_defines};
pub use reshard::{InterleavedToSharded, ShardedToInterleaved};
