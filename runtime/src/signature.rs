//! Program cache keys.
//!
//! A [`ProgramSignature`] identifies the class of invocations that can share a
//! compiled program: operation kind, attributes and input descriptors. Buffer
//! addresses are deliberately left out, so two calls that differ only in where
//! their tensors live map to the same key and the cached program is reused
//! with its addresses patched.

use std::fmt;
use std::hash::{Hash, Hasher};

use tessera_device::Tensor;
use xxhash_rust::xxh64::Xxh64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramSignature(u64);

impl ProgramSignature {
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProgramSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Incremental builder for a [`ProgramSignature`].
///
/// ```ignore
/// let signature = SignatureBuilder::new("eltwise_binary")
///     .attribute(&self.op)
///     .attribute(&self.output_memory_config)
///     .tensors(inputs)
///     .finish();
/// ```
pub struct SignatureBuilder {
    hasher: Xxh64,
}

impl SignatureBuilder {
    pub fn new(op: &str) -> Self {
        let mut hasher = Xxh64::new(0);
        op.hash(&mut hasher);
        Self { hasher }
    }

    pub fn attribute<T: Hash + ?Sized>(mut self, value: &T) -> Self {
        value.hash(&mut self.hasher);
        self
    }

    /// Hash everything that describes `tensor` except its address.
    pub fn tensor(mut self, tensor: &Tensor) -> Self {
        tensor.shape().hash(&mut self.hasher);
        tensor.dtype().hash(&mut self.hasher);
        tensor.layout().hash(&mut self.hasher);
        tensor.memory_config().hash(&mut self.hasher);
        tensor.shard_spec().hash(&mut self.hasher);
        tensor.is_on_device().hash(&mut self.hasher);
        self
    }

    pub fn tensors(self, tensors: &[Tensor]) -> Self {
        let builder = self.attribute(&tensors.len());
        tensors.iter().fold(builder, Self::tensor)
    }

    pub fn finish(self) -> ProgramSignature {
        ProgramSignature(self.hasher.finish())
    }
}
