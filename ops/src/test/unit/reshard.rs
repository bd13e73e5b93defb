use tessera_device::{DataType, Layout, MemoryConfig, ShardSpec, Tensor, TensorMemoryLayout};
use tessera_runtime::{DeviceOperation, Error};

use crate::common::kernel_arg;
use crate::test::helpers::{core, core_grid, kernel, session, sharded_tensor, simulator, tile_tensor};
use crate::{InterleavedToSharded, ShardedToInterleaved};

const TILE_READER: &str = "tt_metal/kernels/dataflow/reader_unary_blocks_interleaved_start_id.cpp";
const STICK_READER: &str = "tt_metal/kernels/dataflow/reader_unary_stick_layout_blocks_interleaved_start_id.cpp";
const SHARDED_WRITER: &str = "tt_metal/kernels/dataflow/writer_unary_sharded.cpp";
const SHARDED_READER: &str = "tt_metal/kernels/dataflow/reader_unary_sharded.cpp";
const TILE_WRITER: &str = "tt_metal/kernels/dataflow/writer_unary_blocks_interleaved_start_id.cpp";

fn to_sharded(grid: (usize, usize), shard: [u32; 2]) -> InterleavedToSharded {
    InterleavedToSharded::new(ShardSpec::new(core_grid(core(grid.0, grid.1)), shard))
}

#[test]
#[tracing_test::traced_test]
fn test_interleaved_to_sharded_tiles() {
    let (sim, session) = session(core(2, 2));
    let input = tile_tensor(session.device(), [1, 1, 128, 64]);
    let op = to_sharded((2, 2), [32, 64]);

    let outputs = session.run(0, &op, std::slice::from_ref(&input)).unwrap();
    session.finish(0).unwrap();
    let output = &outputs[0];
    assert_eq!(output.shard_spec(), Some(&op.shard_spec));
    assert_eq!(output.memory_config().memory_layout, TensorMemoryLayout::HeightSharded);

    // Two tiles per shard, shards visited row-major.
    let launch = sim.last_launch().unwrap();
    let src = input.address().unwrap();
    assert_eq!(launch.args_of(TILE_READER, core(1, 0)), Some(&[src, 2, 1, 2][..]));
    assert_eq!(launch.args_of(TILE_READER, core(1, 1)), Some(&[src, 2, 1, 6][..]));
    assert_eq!(launch.args_of(SHARDED_WRITER, core(0, 1)), Some(&[2][..]));
    assert_eq!(launch.circular_buffers, vec![(0, output.address().unwrap())]);
    assert!(logs_contain("interleaved to sharded program"));
}

#[test]
fn test_interleaved_to_sharded_sticks() {
    let (_, session) = session(core(2, 2));
    let input =
        Tensor::allocate(session.device(), [1, 1, 64, 32], DataType::BFloat16, Layout::RowMajor, MemoryConfig::default())
            .unwrap();

    let dispatch = session.prepare(&to_sharded((2, 1), [32, 32]), std::slice::from_ref(&input)).unwrap();
    let program = &dispatch.program;

    // 64-byte rows: a power of two, log2 6.
    let reader = kernel(program, STICK_READER);
    assert_eq!(reader.spec().compile_args, vec![0, 1, 1, 6]);
    assert_eq!(reader.runtime_args(core(1, 0)), Some(&[input.address().unwrap(), 64, 32, 1, 32][..]));

    let cb = &program.circular_buffers()[0];
    assert_eq!((cb.config().num_pages, cb.config().page_size), (32, 64));
}

#[test]
fn test_short_last_shard() {
    let (_, session) = session(core(2, 2));
    let input = tile_tensor(session.device(), [1, 1, 96, 32]);

    let dispatch = session.prepare(&to_sharded((2, 2), [32, 32]), std::slice::from_ref(&input)).unwrap();

    // Three tiles over four shards leave the last core idle.
    let reader = kernel(&dispatch.program, TILE_READER);
    let src = input.address().unwrap();
    assert_eq!(reader.runtime_args(core(0, 1)), Some(&[src, 1, 1, 2][..]));
    assert_eq!(reader.runtime_args(core(1, 1)), Some(&[src, 0, 1, 3][..]));
}

#[test]
fn test_interleaved_to_sharded_rejects() {
    let (_, device) = simulator(core(2, 2));
    let input = tile_tensor(&device, [1, 1, 128, 32]);

    let cases = [
        // Shard narrower than the tensor.
        (to_sharded((2, 2), [32, 64]), input.clone()),
        // Four tile rows, two shards.
        (to_sharded((2, 1), [32, 32]), input.clone()),
        (to_sharded((2, 2), [32, 32]), sharded_tensor(&device, [1, 1, 128, 32], core(2, 2), 32)),
        (
            InterleavedToSharded {
                output_memory_config: MemoryConfig::sharded(TensorMemoryLayout::BlockSharded),
                shard_spec: ShardSpec::new(core_grid(core(2, 2)), [32, 32]),
            },
            input.clone(),
        ),
    ];
    for (op, input) in cases {
        let error = op.validate(&[input]).unwrap_err();
        assert!(matches!(error, Error::Validation { .. }), "{error}");
    }
}

#[test]
fn test_cache_hit_moves_shard_buffer() {
    let (_, session) = session(core(2, 2));
    let op = to_sharded((2, 2), [32, 32]);

    let first = session.prepare(&op, &[tile_tensor(session.device(), [1, 1, 128, 32])]).unwrap();
    let input = tile_tensor(session.device(), [1, 1, 128, 32]);
    let second = session.prepare(&op, std::slice::from_ref(&input)).unwrap();

    assert!(second.cache_hit);
    assert_ne!(first.outputs[0].address().unwrap(), second.outputs[0].address().unwrap());
    assert_eq!(second.program.circular_buffers()[0].address(), Some(second.outputs[0].address().unwrap()));
    let reader = kernel(&second.program, TILE_READER);
    assert_eq!(reader.runtime_args(core(1, 1)).map(|args| args[0]), Some(input.address().unwrap()));
}

#[test]
fn test_sharded_to_interleaved_tiles() {
    let (sim, session) = session(core(2, 2));
    let input = sharded_tensor(session.device(), [1, 1, 128, 64], core(2, 2), 32);

    let outputs = session.run(0, &ShardedToInterleaved::default(), std::slice::from_ref(&input)).unwrap();
    session.finish(0).unwrap();
    let output = &outputs[0];
    assert!(!output.is_sharded());
    assert_eq!(output.shape(), input.shape());

    let launch = sim.last_launch().unwrap();
    let dst = output.address().unwrap();
    assert_eq!(launch.args_of(SHARDED_READER, core(1, 1)), Some(&[2][..]));
    assert_eq!(launch.args_of(TILE_WRITER, core(0, 1)), Some(&[dst, 2, 1, 4][..]));
    assert_eq!(launch.circular_buffers, vec![(0, input.address().unwrap())]);
}

#[test]
fn test_sharded_to_interleaved_rejects() {
    let (_, device) = simulator(core(2, 2));
    let sharded = sharded_tensor(&device, [1, 1, 64, 32], core(2, 1), 32);

    let error = ShardedToInterleaved::default().validate(&[tile_tensor(&device, [1, 1, 64, 32])]).unwrap_err();
    assert!(error.to_string().contains("must be sharded"), "{error}");

    let op = ShardedToInterleaved::new(MemoryConfig::sharded(TensorMemoryLayout::HeightSharded));
    assert!(op.validate(&[sharded]).is_err());
}

#[test]
fn test_interleaved_to_sharded_rejects_partial_tile_shards() {
    let (_, device) = simulator(core(2, 2));
    let input = tile_tensor(&device, [1, 1, 96, 32]);

    let error = to_sharded((2, 1), [48, 32]).validate(std::slice::from_ref(&input)).unwrap_err();
    assert!(matches!(&error, Error::Validation { reason, .. } if reason.contains("whole number of tiles")), "{error}");
    to_sharded((2, 2), [32, 32]).validate(&[input]).unwrap();
}

#[test]
fn test_unit_counts_must_fit_kernel_args() {
    assert_eq!(kernel_arg("reshard", "tiles", u64::from(u32::MAX)).unwrap(), u32::MAX);
    let error = kernel_arg("reshard", "tiles", u64::from(u32::MAX) + 1).unwrap_err();
    assert!(matches!(&error, Error::Validation { op, .. } if op == "reshard"), "{error}");
}
