//! The operation contract.
//!
//! Every device operation is driven through the same pipeline:
//!
//! ```text
//! Created -> Validated -> ShapesComputed -> OutputsAllocated -> ProgramReady -> Dispatched
//! ```
//!
//! Each stage either advances or fails with an error, and no later stage runs
//! after a failure. Retrying is the caller's business. Operation kinds live
//! outside this crate and plug in through [`DeviceOperation`].

use std::fmt;

use tessera_device::{Program, Shape, Tensor};

use crate::error::{NotImplementedSnafu, Result};
use crate::signature::ProgramSignature;

/// Pipeline position of one operation invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter)]
pub enum Stage {
    Created,
    Validated,
    ShapesComputed,
    OutputsAllocated,
    ProgramReady,
    Dispatched,
}

pub trait DeviceOperation: Send + Sync + fmt::Debug {
    /// Name used in errors, logs and as the signature namespace.
    fn name(&self) -> &'static str;

    /// Check inputs without side effects.
    fn validate(&self, inputs: &[Tensor]) -> Result<()>;

    fn compute_output_shapes(&self, inputs: &[Tensor]) -> Result<Vec<Shape>>;

    /// Allocate outputs on the device of the first input.
    fn create_output_tensors(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>>;

    /// Build the per-core plan for `inputs` and `outputs`.
    ///
    /// Runtime arguments holding buffer addresses must be registered in the
    /// program's address patch so cache hits can retarget them.
    fn create_program(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Program>;

    /// Key under which the program for `inputs` is cached.
    fn compute_program_hash(&self, _inputs: &[Tensor]) -> Result<ProgramSignature> {
        NotImplementedSnafu { op: self.name(), stage: Stage::ProgramReady }.fail()
    }
}
