//! Error types for operation dispatch.

use snafu::Snafu;

use crate::operation::Stage;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Operation preconditions violated by its inputs.
    #[snafu(display("{op}: {reason}"))]
    Validation { op: String, reason: String },

    /// Operation has no implementation for a pipeline stage or strategy.
    #[snafu(display("{op} does not implement {stage}"))]
    NotImplemented { op: String, stage: Stage },

    /// Program construction or compilation failed.
    #[snafu(display("failed to build program for {op}: {source}"))]
    Compile { op: String, source: tessera_device::Error },

    /// Allocation, address patching or launch failed.
    #[snafu(display("device error: {source}"))]
    Device { source: tessera_device::Error },

    #[snafu(display("core geometry error: {source}"))]
    Geometry { source: tessera_grid::Error },

    #[snafu(display("command queue {queue} does not exist, session has {num_queues}"))]
    QueueOutOfRange { queue: usize, num_queues: usize },
}
