//! Device memory bank allocation.
//!
//! The scheduling core only needs addresses: a buffer is a `(bank, address,
//! size)` triple and the allocation policy is a collaborator. [`BankAllocator`]
//! is the in-process policy used by the simulator: one first-fit free list per
//! [`BufferType`], aligned, coalescing on free.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use snafu::{OptionExt, ensure};

use crate::error::{OutOfMemorySnafu, Result, UnknownAddressSnafu, ZeroSizedAllocationSnafu};

/// Memory bank a buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum BufferType {
    #[strum(to_string = "DRAM")]
    Dram,
    #[strum(to_string = "L1")]
    L1,
}

pub trait Allocator: Send + Sync + std::fmt::Debug {
    /// Reserve `size` bytes and return the base address.
    fn allocate(&self, size: u64, buffer_type: BufferType) -> Result<u32>;

    fn deallocate(&self, address: u32, buffer_type: BufferType) -> Result<()>;

    /// Bytes currently handed out, including alignment padding.
    fn allocated_bytes(&self, buffer_type: BufferType) -> u64;

    fn name(&self) -> &str;
}

/// Address range managed by one bank.
#[derive(Debug, Clone, Copy)]
pub struct BankRange {
    pub base: u32,
    pub size: u64,
}

#[derive(Debug)]
struct Bank {
    /// Free blocks keyed by start address.
    free: BTreeMap<u32, u64>,
    /// Live allocations: start address to padded length.
    allocated: HashMap<u32, u64>,
}

impl Bank {
    fn new(range: BankRange) -> Self {
        let mut free = BTreeMap::new();
        if range.size > 0 {
            free.insert(range.base, range.size);
        }
        Self { free, allocated: HashMap::new() }
    }

    fn largest_free(&self) -> u64 {
        self.free.values().copied().max().unwrap_or(0)
    }

    fn allocate(&mut self, size: u64) -> Option<u32> {
        let (&start, &len) = self.free.iter().find(|&(_, &len)| len >= size)?;
        self.free.remove(&start);
        if len > size {
            // Block sizes stay within the u32 address space of the bank.
            self.free.insert(start + size as u32, len - size);
        }
        self.allocated.insert(start, size);
        Some(start)
    }

    fn deallocate(&mut self, address: u32) -> Option<()> {
        let mut len = self.allocated.remove(&address)?;
        let mut start = address;

        if let Some((&prev_start, &prev_len)) = self.free.range(..address).next_back()
            && u64::from(prev_start) + prev_len == u64::from(address)
        {
            self.free.remove(&prev_start);
            start = prev_start;
            len += prev_len;
        }

        let end = u64::from(start) + len;
        if let Ok(end) = u32::try_from(end)
            && let Some(next_len) = self.free.remove(&end)
        {
            len += next_len;
        }

        self.free.insert(start, len);
        Some(())
    }
}

/// First-fit allocator with one bank per buffer type.
#[derive(Debug)]
pub struct BankAllocator {
    dram: Mutex<Bank>,
    l1: Mutex<Bank>,
    alignment: u64,
}

impl BankAllocator {
    pub fn new(dram: BankRange, l1: BankRange, alignment: u32) -> Self {
        Self { dram: Mutex::new(Bank::new(dram)), l1: Mutex::new(Bank::new(l1)), alignment: u64::from(alignment.max(1)) }
    }

    fn bank(&self, buffer_type: BufferType) -> &Mutex<Bank> {
        match buffer_type {
            BufferType::Dram => &self.dram,
            BufferType::L1 => &self.l1,
        }
    }
}

impl Allocator for BankAllocator {
    fn allocate(&self, size: u64, buffer_type: BufferType) -> Result<u32> {
        ensure!(size > 0, ZeroSizedAllocationSnafu { buffer_type });
        let padded = size.div_ceil(self.alignment) * self.alignment;

        let mut bank = self.bank(buffer_type).lock();
        let address = bank
            .allocate(padded)
            .context(OutOfMemorySnafu { buffer_type, size: padded, largest_free: bank.largest_free() })?;

        tracing::trace!(%buffer_type, address, size = padded, "allocated buffer");
        Ok(address)
    }

    fn deallocate(&self, address: u32, buffer_type: BufferType) -> Result<()> {
        self.bank(buffer_type).lock().deallocate(address).context(UnknownAddressSnafu { address, buffer_type })?;
        tracing::trace!(%buffer_type, address, "freed buffer");
        Ok(())
    }

    fn allocated_bytes(&self, buffer_type: BufferType) -> u64 {
        self.bank(buffer_type).lock().allocated.values().sum()
    }

    fn name(&self) -> &str {
        "bank"
    }
}
