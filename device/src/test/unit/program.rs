use std::collections::BTreeMap;

use tessera_grid::{CoreCoord, CoreRange, CoreRangeSet};

use crate::{
    BufferSource, CircularBufferConfig, CircularBufferRegion, DataType, Error, KernelConfig, KernelHandle, KernelSpec,
    OUTPUT_CB_INDEX, PatchTarget, Program,
};

const GRID: CoreCoord = CoreCoord::new(4, 4);
const REGION: CircularBufferRegion = CircularBufferRegion { base: 0x1000, size: 0x4000 };

fn cores(x0: usize, y0: usize, x1: usize, y1: usize) -> CoreRangeSet {
    CoreRange::new(CoreCoord::new(x0, y0), CoreCoord::new(x1, y1)).unwrap().into()
}

fn kernel(source: &str, cores: CoreRangeSet, config: KernelConfig) -> KernelSpec {
    KernelSpec::builder().source(source).cores(cores).config(config).build()
}

/// Reader and writer on the first two cores of row 0, reader args patched from input 0.
fn copy_program() -> (Program, KernelHandle, KernelHandle) {
    let mut program = Program::new("copy");
    let reader = program.add_kernel(kernel("reader.cpp", cores(0, 0, 1, 0), KernelConfig::reader()));
    let writer = program.add_kernel(kernel("writer.cpp", cores(0, 0, 1, 0), KernelConfig::writer()));

    for (i, core) in [CoreCoord::new(0, 0), CoreCoord::new(1, 0)].into_iter().enumerate() {
        program.set_runtime_args(reader, core, vec![0xA000, 4, 4 * i as u32]).unwrap();
        program.set_runtime_args(writer, core, vec![0xB000, 4, 4 * i as u32]).unwrap();
        program.patch_runtime_arg(reader, core, 0, BufferSource::Input(0)).unwrap();
        program.patch_runtime_arg(writer, core, 0, BufferSource::Output(0)).unwrap();
    }
    (program, reader, writer)
}

#[test]
fn test_runtime_args_must_target_kernel_cores() {
    let (mut program, reader, _) = copy_program();

    let error = program.set_runtime_args(reader, CoreCoord::new(3, 3), vec![1]).unwrap_err();
    assert!(matches!(error, Error::CoreNotInKernel { core, .. } if core == CoreCoord::new(3, 3)));
}

#[test]
fn test_common_runtime_args() {
    let (mut program, _, writer) = copy_program();
    program.set_common_runtime_args(writer, &cores(0, 0, 1, 0), &[7, 8]).unwrap();

    assert_eq!(program.runtime_args(writer, CoreCoord::new(0, 0)).unwrap(), &[7, 8]);
    assert_eq!(program.runtime_args(writer, CoreCoord::new(1, 0)).unwrap(), &[7, 8]);
}

#[test]
fn test_patch_slot_must_exist() {
    let (mut program, reader, _) = copy_program();

    let error = program.patch_runtime_arg(reader, CoreCoord::new(0, 0), 3, BufferSource::Input(0)).unwrap_err();
    assert!(matches!(error, Error::RuntimeArgIndex { index: 3, len: 3, .. }));
}

#[test]
fn test_apply_new_addresses_rewrites_only_patched_slots() {
    let (mut program, reader, writer) = copy_program();
    assert_eq!(program.address_patch().len(), 4);

    let written = program.apply_new_addresses(&[0x1234], &[0x5678]).unwrap();
    assert_eq!(written, 4);

    for (i, core) in [CoreCoord::new(0, 0), CoreCoord::new(1, 0)].into_iter().enumerate() {
        assert_eq!(program.runtime_args(reader, core).unwrap(), &[0x1234, 4, 4 * i as u32]);
        assert_eq!(program.runtime_args(writer, core).unwrap(), &[0x5678, 4, 4 * i as u32]);
    }
}

#[test]
fn test_apply_new_addresses_is_all_or_nothing() {
    let (mut program, reader, _) = copy_program();

    // Output 0 is referenced by the writer slots but not provided.
    let error = program.apply_new_addresses(&[0x1234], &[]).unwrap_err();
    assert!(matches!(error, Error::BufferIndex { buffer: BufferSource::Output(0), available: 0 }));
    assert_eq!(program.runtime_args(reader, CoreCoord::new(0, 0)).unwrap()[0], 0xA000);
}

#[test]
fn test_circular_buffer_patch() {
    let mut program = Program::new("sharded");
    let local = program.add_circular_buffer(CircularBufferConfig::new(0, cores(0, 0, 0, 0), 2, 2048, DataType::BFloat16));
    let global = program.add_circular_buffer(
        CircularBufferConfig::new(OUTPUT_CB_INDEX, cores(0, 0, 0, 0), 2, 2048, DataType::BFloat16)
            .with_global_address(0x9000),
    );

    assert!(matches!(program.patch_circular_buffer(local, BufferSource::Output(0)), Err(Error::Compile { .. })));
    program.patch_circular_buffer(global, BufferSource::Output(0)).unwrap();
    assert_eq!(program.address_patch().slots()[0].target, PatchTarget::CircularBuffer(global));

    program.apply_new_addresses(&[], &[0xC000]).unwrap();
    let cb = program.circular_buffer(global).unwrap();
    assert_eq!(cb.address(), Some(0xC000));
    assert_eq!(cb.config().global_address, Some(0xC000));
}

#[test]
fn test_compile_assigns_addresses_and_keys() {
    let (mut program, reader, writer) = copy_program();
    let in_cb = program.add_circular_buffer(CircularBufferConfig::new(0, cores(0, 0, 1, 0), 2, 2048, DataType::BFloat16));
    let out_cb = program.add_circular_buffer(CircularBufferConfig::new(
        OUTPUT_CB_INDEX,
        cores(1, 0, 1, 0),
        2,
        2048,
        DataType::BFloat16,
    ));
    assert!(!program.is_compiled());

    program.compile(GRID, &REGION).unwrap();

    assert!(program.is_compiled());
    assert_eq!(program.circular_buffer(in_cb).unwrap().address(), Some(0x1000));
    // Stacked above the input buffer on the shared core.
    assert_eq!(program.circular_buffer(out_cb).unwrap().address(), Some(0x1000 + 4096));

    let reader_key = program.kernel(reader).unwrap().binary_key().unwrap();
    let writer_key = program.kernel(writer).unwrap().binary_key().unwrap();
    assert_ne!(reader_key, writer_key);

    // Keys depend only on what is compiled, not on runtime args.
    let (mut other, other_reader, _) = copy_program();
    other.apply_new_addresses(&[1], &[2]).unwrap();
    other.compile(GRID, &REGION).unwrap();
    assert_eq!(other.kernel(other_reader).unwrap().binary_key(), Some(reader_key));
}

#[test]
fn test_defines_change_binary_key() {
    let mut program = Program::new("keys");
    let plain = program.add_kernel(kernel("compute.cpp", cores(0, 0, 0, 0), KernelConfig::compute()));
    let defined = program.add_kernel(
        KernelSpec::builder()
            .source("compute.cpp")
            .cores(cores(1, 0, 1, 0))
            .config(KernelConfig::compute())
            .defines(BTreeMap::from([("ELTWISE_OP".to_string(), "add_tiles".to_string())]))
            .build(),
    );
    program.compile(GRID, &REGION).unwrap();

    assert_ne!(program.kernel(plain).unwrap().binary_key(), program.kernel(defined).unwrap().binary_key());
}

#[test]
fn test_compile_rejects_processor_overlap() {
    let mut program = Program::new("overlap");
    program.add_kernel(kernel("a.cpp", cores(0, 0, 1, 1), KernelConfig::reader()));
    program.add_kernel(kernel("b.cpp", cores(1, 1, 2, 2), KernelConfig::reader()));
    // Same cores, other processor.
    program.add_kernel(kernel("c.cpp", cores(0, 0, 1, 1), KernelConfig::writer()));

    let error = program.compile(GRID, &REGION).unwrap_err();
    assert!(matches!(&error, Error::Compile { reason, .. } if reason.contains("kernels 0 and 1")), "{error}");
}

#[test]
fn test_compile_rejects_duplicate_cb_index() {
    let mut program = Program::new("cbs");
    program.add_circular_buffer(CircularBufferConfig::new(0, cores(0, 0, 1, 0), 1, 2048, DataType::BFloat16));
    program.add_circular_buffer(CircularBufferConfig::new(0, cores(1, 0, 2, 0), 1, 2048, DataType::BFloat16));

    assert!(matches!(program.compile(GRID, &REGION), Err(Error::Compile { .. })));
}

#[test]
fn test_compile_rejects_cb_overflow() {
    let mut program = Program::new("big");
    program.add_circular_buffer(CircularBufferConfig::new(0, cores(0, 0, 0, 0), 8, 2048, DataType::BFloat16));
    program.add_circular_buffer(CircularBufferConfig::new(1, cores(0, 0, 0, 0), 1, 2048, DataType::BFloat16));

    let error = program.compile(GRID, &REGION).unwrap_err();
    assert!(matches!(&error, Error::Compile { reason, .. } if reason.contains("18432 bytes")), "{error}");
}

#[test]
fn test_global_cb_does_not_use_region() {
    let mut program = Program::new("global");
    program.add_circular_buffer(
        CircularBufferConfig::new(0, cores(0, 0, 0, 0), 64, 2048, DataType::BFloat16).with_global_address(0x20_0000),
    );
    let local = program.add_circular_buffer(CircularBufferConfig::new(1, cores(0, 0, 0, 0), 1, 2048, DataType::BFloat16));

    program.compile(GRID, &REGION).unwrap();
    assert_eq!(program.circular_buffer(local).unwrap().address(), Some(0x1000));
}

#[test]
fn test_compile_rejects_cores_outside_grid() {
    let mut program = Program::new("wide");
    program.add_kernel(kernel("reader.cpp", cores(2, 0, 4, 0), KernelConfig::reader()));

    let error = program.compile(GRID, &REGION).unwrap_err();
    assert!(matches!(error, Error::CoreOutOfGrid { core, .. } if core == CoreCoord::new(4, 0)));
}
