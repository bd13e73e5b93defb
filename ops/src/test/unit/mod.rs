pub mod reshard;
