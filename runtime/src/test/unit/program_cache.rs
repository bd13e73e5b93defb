use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tessera_device::Program;

use crate::{Error, ProgramCache, ProgramSignature, ValidationSnafu};

const SIG: ProgramSignature = ProgramSignature::from_raw(0xfeed);

fn counting_build(counter: &AtomicUsize) -> impl FnOnce() -> crate::Result<Program> + '_ {
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Program::new("cached"))
    }
}

#[test]
fn test_disabled_cache_always_builds() {
    let cache = ProgramCache::new(false);
    let builds = AtomicUsize::new(0);

    let first = cache.get_or_create(SIG, counting_build(&builds)).unwrap();
    let second = cache.get_or_create(SIG, counting_build(&builds)).unwrap();

    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert!(!first.cache_hit && !second.cache_hit);
    assert!(!Arc::ptr_eq(&first.program, &second.program));
    assert_eq!(cache.num_entries(), 0);
}

#[test]
fn test_hit_returns_stored_program() {
    let cache = ProgramCache::new(true);
    let builds = AtomicUsize::new(0);

    let first = cache.get_or_create(SIG, counting_build(&builds)).unwrap();
    let second = cache.get_or_create(SIG, counting_build(&builds)).unwrap();

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert!(Arc::ptr_eq(&first.program, &second.program));
    assert_eq!(cache.num_entries(), 1);
    assert_eq!((cache.hits(), cache.misses()), (1, 1));
}

#[test]
fn test_concurrent_callers_build_once() {
    const CALLERS: usize = 8;
    let cache = Arc::new(ProgramCache::new(true));
    let builds = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let (cache, builds, barrier) = (Arc::clone(&cache), Arc::clone(&builds), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_create(SIG, || {
                        builds.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok(Program::new("slow"))
                    })
                    .unwrap()
                    .program
            })
        })
        .collect();
    let programs: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(programs.iter().all(|program| Arc::ptr_eq(program, &programs[0])));
    assert_eq!(cache.num_entries(), 1);
}

#[test]
fn test_unrelated_signatures_are_separate() {
    let cache = ProgramCache::new(true);
    let builds = AtomicUsize::new(0);

    cache.get_or_create(ProgramSignature::from_raw(1), counting_build(&builds)).unwrap();
    cache.get_or_create(ProgramSignature::from_raw(2), counting_build(&builds)).unwrap();

    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(cache.num_entries(), 2);
}

#[test]
fn test_failed_build_is_not_cached() {
    let cache = ProgramCache::new(true);
    let builds = AtomicUsize::new(0);

    let error = cache
        .get_or_create(SIG, || ValidationSnafu { op: "broken", reason: "no strategy" }.fail())
        .unwrap_err();
    assert!(matches!(error, Error::Validation { .. }));
    assert_eq!(cache.num_entries(), 0);

    let retry = cache.get_or_create(SIG, counting_build(&builds)).unwrap();
    assert!(!retry.cache_hit);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(cache.num_entries(), 1);
}

#[test]
#[tracing_test::traced_test]
fn test_disable_and_clear_forgets_programs() {
    let cache = ProgramCache::new(true);
    let builds = AtomicUsize::new(0);
    cache.get_or_create(SIG, counting_build(&builds)).unwrap();

    cache.disable_and_clear();
    assert!(!cache.is_enabled());
    assert_eq!(cache.num_entries(), 0);

    cache.enable();
    let rebuilt = cache.get_or_create(SIG, counting_build(&builds)).unwrap();
    assert!(!rebuilt.cache_hit);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert!(logs_contain("program cache disabled"));
}

#[test]
fn test_clear_keeps_enabled_flag() {
    let cache = ProgramCache::new(true);
    let builds = AtomicUsize::new(0);
    cache.get_or_create(SIG, counting_build(&builds)).unwrap();

    cache.clear();
    assert!(cache.is_enabled());
    assert_eq!(cache.num_entries(), 0);
    cache.get_or_create(SIG, counting_build(&builds)).unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}
