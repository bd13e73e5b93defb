//! Per-session cache of compiled programs.
//!
//! Maps a [`ProgramSignature`] to the program built for it, using papaya's
//! lock-free map so that cache hits never take a lock on the index.
//!
//! # Single builder
//!
//! Each signature owns a slot with its own build lock. The first caller to
//! find the slot empty builds while holding that lock, and concurrent callers
//! for the same signature block on it and then observe the finished program.
//! Unrelated signatures build concurrently.
//!
//! A failed build leaves the slot empty. Empty slots are invisible to
//! [`ProgramCache::num_entries`] and the next caller simply builds again, so a
//! failure is never cached.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use papaya::{Compute, HashMap, Operation};
use parking_lot::Mutex;
use tessera_device::Program;

use crate::error::Result;
use crate::signature::ProgramSignature;

/// Program shared between the cache and its users.
///
/// Patching and snapshotting happen under the lock so no user observes a
/// half-patched plan.
pub type SharedProgram = Arc<Mutex<Program>>;

#[derive(Default)]
struct CacheSlot {
    program: OnceLock<SharedProgram>,
    build_lock: Mutex<()>,
}

/// Result of [`ProgramCache::get_or_create`].
#[derive(Debug, Clone)]
pub struct CachedProgram {
    pub program: SharedProgram,
    /// The program was built for an earlier invocation and needs new addresses.
    pub cache_hit: bool,
}

pub struct ProgramCache {
    entries: HashMap<ProgramSignature, Arc<CacheSlot>>,
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ProgramCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramCache")
            .field("enabled", &self.is_enabled())
            .field("entries", &self.num_entries())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ProgramCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: HashMap::new(),
            enabled: AtomicBool::new(enabled),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        tracing::info!("program cache enabled");
    }

    /// Disable the cache and drop every entry.
    pub fn disable_and_clear(&self) {
        self.enabled.store(false, Ordering::Release);
        self.clear();
        tracing::info!("program cache disabled");
    }

    /// Drop every entry without changing whether the cache is enabled.
    pub fn clear(&self) {
        let guard = self.entries.guard();
        self.entries.clear(&guard);
        tracing::debug!("program cache cleared");
    }

    /// Number of signatures with a finished program.
    pub fn num_entries(&self) -> usize {
        let guard = self.entries.guard();
        self.entries.iter(&guard).filter(|(_, slot)| slot.program.get().is_some()).count()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Return the program cached under `signature`, building it with `build`
    /// if there is none.
    ///
    /// While the cache is disabled every call builds and nothing is stored.
    /// Errors from `build` are returned unchanged and leave no entry behind.
    pub fn get_or_create<F>(&self, signature: ProgramSignature, build: F) -> Result<CachedProgram>
    where
        F: FnOnce() -> Result<Program>,
    {
        if !self.is_enabled() {
            let program = build()?;
            return Ok(CachedProgram { program: Arc::new(Mutex::new(program)), cache_hit: false });
        }

        let guard = self.entries.guard();

        // Fast path: finished program, no locks taken.
        if let Some(slot) = self.entries.get(&signature, &guard)
            && let Some(program) = slot.program.get()
        {
            return Ok(self.hit(signature, program));
        }

        let fresh = Arc::new(CacheSlot::default());
        let slot = match self.entries.compute(
            signature,
            |entry| match entry {
                Some((_, existing)) => Operation::Abort(Arc::clone(existing)),
                None => Operation::Insert(Arc::clone(&fresh)),
            },
            &guard,
        ) {
            Compute::Inserted(_, slot) => Arc::clone(slot),
            Compute::Aborted(slot) => slot,
            _ => fresh,
        };

        let _building = slot.build_lock.lock();
        if let Some(program) = slot.program.get() {
            return Ok(self.hit(signature, program));
        }

        tracing::debug!(%signature, "building program");
        let program = build()?;
        let program = Arc::clone(slot.program.get_or_init(|| Arc::new(Mutex::new(program))));
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%signature, "program cache miss");

        Ok(CachedProgram { program, cache_hit: false })
    }

    fn hit(&self, signature: ProgramSignature, program: &SharedProgram) -> CachedProgram {
        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%signature, "program cache hit");
        CachedProgram { program: Arc::clone(program), cache_hit: true }
    }
}
