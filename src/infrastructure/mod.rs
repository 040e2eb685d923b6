pub mod in_memory;
mod locks;
pub mod notify;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
