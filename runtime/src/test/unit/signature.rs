use tessera_device::{BufferType, DataType, Layout, MemoryConfig, Tensor};
use tessera_grid::CoreCoord;

use crate::SignatureBuilder;
use crate::test::helpers::{simulator, tile_tensor};

#[test]
fn test_addresses_do_not_change_signature() {
    let (_, device) = simulator(CoreCoord::new(4, 4));
    let a = tile_tensor(&device, [1, 1, 64, 64]);
    let b = tile_tensor(&device, [1, 1, 64, 64]);
    assert_ne!(a.address().unwrap(), b.address().unwrap());

    let sig_a = SignatureBuilder::new("copy").tensor(&a).finish();
    let sig_b = SignatureBuilder::new("copy").tensor(&b).finish();
    assert_eq!(sig_a, sig_b);
}

#[test]
fn test_descriptors_change_signature() {
    let (_, device) = simulator(CoreCoord::new(4, 4));
    let base = tile_tensor(&device, [1, 1, 64, 64]);
    let taller = tile_tensor(&device, [1, 1, 96, 64]);
    let float = Tensor::allocate(&device, [1, 1, 64, 64], DataType::Float32, Layout::Tile, MemoryConfig::default()).unwrap();
    let l1 = Tensor::allocate(
        &device,
        [1, 1, 64, 64],
        DataType::BFloat16,
        Layout::Tile,
        MemoryConfig::interleaved(BufferType::L1),
    )
    .unwrap();

    let signature = |tensor: &Tensor| SignatureBuilder::new("copy").tensor(tensor).finish();
    let reference = signature(&base);
    assert_ne!(reference, signature(&taller));
    assert_ne!(reference, signature(&float));
    assert_ne!(reference, signature(&l1));
}

#[test]
fn test_op_name_and_attributes_change_signature() {
    let (_, device) = simulator(CoreCoord::new(4, 4));
    let tensor = tile_tensor(&device, [1, 1, 32, 32]);

    let add = SignatureBuilder::new("binary").attribute("add").tensor(&tensor).finish();
    let mul = SignatureBuilder::new("binary").attribute("mul").tensor(&tensor).finish();
    let other_op = SignatureBuilder::new("unary").attribute("add").tensor(&tensor).finish();
    assert_ne!(add, mul);
    assert_ne!(add, other_op);
}

#[test]
fn test_signature_display_is_fixed_width_hex() {
    let signature = SignatureBuilder::new("copy").finish();
    let text = signature.to_string();
    assert_eq!(text.len(), 16);
    assert_eq!(u64::from_str_radix(&text, 16).unwrap(), signature.raw());
}
