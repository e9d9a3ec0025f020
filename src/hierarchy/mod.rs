pub mod bus;
pub mod cache;
pub mod common;
pub mod memory;
pub mod processor;

pub use bus::Bus;
pub use cache::{Cache, CacheEngine, CacheLine, CacheSet, Lookup, WriteBack};
pub use common::*;
pub use memory::{Memory, MemoryStore};
pub use processor::Processor;
