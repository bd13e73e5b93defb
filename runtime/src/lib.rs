//! Operation dispatch for tessera.
//!
//! This crate turns a [`DeviceOperation`] and its input tensors into work on a
//! device:
//!
//! 1. the operation validates its inputs, infers and allocates outputs;
//! 2. its program is looked up in the session's [`ProgramCache`] by
//!    [`ProgramSignature`], built and compiled on a miss, or retargeted to the
//!    new buffer addresses on a hit;
//! 3. the device-bound program is launched from a [`CommandQueue`].
//!
//! [`Session`] ties the three together for one device.

pub mod config;
pub mod error;
pub mod operation;
pub mod program_cache;
pub mod queue;
pub mod session;
pub mod signature;


pub use config::RuntimeConfig;
pub use error::*;
pub use operation::{DeviceOperation, Stage};
pub use program_cache::{CachedProgram, ProgramCache, SharedProgram};
pub use queue::{CommandQueue, Event, MAX_QUEUES, Task};
pub use session::{Dispatch, Session};
pub use signature::{ProgramSignature, SignatureBuilder};
