use std::sync::Arc;

use crate::allocator::{Allocator, BufferType};
use crate::error::Result;

/// A block of device memory owned by one tensor.
///
/// The address is fixed for the lifetime of the buffer and returned to the
/// allocator on drop, so a live `DeviceBuffer` is proof that its address is
/// reserved. Buffers are shared between tensor clones through `Arc`.
#[derive(Debug)]
pub struct DeviceBuffer {
    address: u32,
    size: u64,
    page_size: u32,
    buffer_type: BufferType,
    allocator: Arc<dyn Allocator>,
}

impl DeviceBuffer {
    pub fn allocate(allocator: Arc<dyn Allocator>, size: u64, page_size: u32, buffer_type: BufferType) -> Result<Self> {
        let address = allocator.allocate(size, buffer_type)?;
        Ok(Self { address, size, page_size, buffer_type, allocator })
    }

    /// Base address, the value kernels receive in their runtime arguments.
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn num_pages(&self) -> u64 {
        if self.page_size == 0 { 0 } else { self.size.div_ceil(u64::from(self.page_size)) }
    }

    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    pub fn is_dram(&self) -> bool {
        self.buffer_type == BufferType::Dram
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Err(error) = self.allocator.deallocate(self.address, self.buffer_type) {
            tracing::warn!(%error, address = self.address, "failed to release device buffer");
        }
    }
}
