use std::sync::Arc;

use crate::{Allocator, BankAllocator, BankRange, BufferType, DeviceBuffer, Error};

fn allocator() -> BankAllocator {
    BankAllocator::new(BankRange { base: 0, size: 1024 }, BankRange { base: 0x1000, size: 256 }, 32)
}

#[test]
fn test_sizes_are_aligned() {
    let allocator = allocator();
    let a = allocator.allocate(10, BufferType::Dram).unwrap();
    let b = allocator.allocate(33, BufferType::Dram).unwrap();

    assert_eq!(a, 0);
    assert_eq!(b, 32);
    assert_eq!(allocator.allocated_bytes(BufferType::Dram), 32 + 64);
    assert_eq!(allocator.allocated_bytes(BufferType::L1), 0);
}

#[test]
fn test_banks_are_independent() {
    let allocator = allocator();
    assert_eq!(allocator.allocate(64, BufferType::L1).unwrap(), 0x1000);
    assert_eq!(allocator.allocate(64, BufferType::Dram).unwrap(), 0);
}

#[test]
fn test_first_fit_reuses_freed_block() {
    let allocator = allocator();
    let a = allocator.allocate(64, BufferType::Dram).unwrap();
    let _b = allocator.allocate(64, BufferType::Dram).unwrap();

    allocator.deallocate(a, BufferType::Dram).unwrap();
    assert_eq!(allocator.allocate(32, BufferType::Dram).unwrap(), a);
}

#[test]
fn test_free_blocks_coalesce() {
    let allocator = allocator();
    let a = allocator.allocate(64, BufferType::Dram).unwrap();
    let b = allocator.allocate(64, BufferType::Dram).unwrap();
    let c = allocator.allocate(64, BufferType::Dram).unwrap();
    let _guard = allocator.allocate(64, BufferType::Dram).unwrap();

    allocator.deallocate(b, BufferType::Dram).unwrap();
    allocator.deallocate(a, BufferType::Dram).unwrap();
    allocator.deallocate(c, BufferType::Dram).unwrap();

    // Three neighbours merged back into one block at the front.
    assert_eq!(allocator.allocate(192, BufferType::Dram).unwrap(), a);
}

#[test]
fn test_out_of_memory() {
    let allocator = allocator();
    allocator.allocate(200, BufferType::L1).unwrap();

    let error = allocator.allocate(64, BufferType::L1).unwrap_err();
    assert!(matches!(error, Error::OutOfMemory { buffer_type: BufferType::L1, size: 64, largest_free: 32 }));
}

#[test]
fn test_zero_sized_allocation() {
    let error = allocator().allocate(0, BufferType::Dram).unwrap_err();
    assert!(matches!(error, Error::ZeroSizedAllocation { buffer_type: BufferType::Dram }));
}

#[test]
fn test_unknown_address() {
    let allocator = allocator();
    allocator.allocate(32, BufferType::Dram).unwrap();

    let error = allocator.deallocate(16, BufferType::Dram).unwrap_err();
    assert!(matches!(error, Error::UnknownAddress { address: 16, buffer_type: BufferType::Dram }));
    // Right address, wrong bank.
    assert!(allocator.deallocate(0, BufferType::L1).is_err());
}

#[test]
fn test_buffer_releases_on_drop() {
    let allocator: Arc<dyn Allocator> = Arc::new(allocator());
    let buffer = DeviceBuffer::allocate(Arc::clone(&allocator), 100, 32, BufferType::L1).unwrap();

    assert_eq!(buffer.address(), 0x1000);
    assert_eq!(buffer.num_pages(), 4);
    assert!(!buffer.is_dram());
    assert_eq!(allocator.allocated_bytes(BufferType::L1), 128);

    drop(buffer);
    assert_eq!(allocator.allocated_bytes(BufferType::L1), 0);
}
