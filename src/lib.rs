//! Trace-driven simulator of a processor / cache / bus / memory hierarchy.
//!
//! A binary trace holds the memory accesses of one or more processors. Each
//! processor replays its share through a private set-associative write-back
//! cache; caches reach memory either directly (single processor) or through a
//! bus that serializes their requests. Components are actors exchanging
//! messages over a delayed queue, driven one clock cycle at a time by
//! [`Simulation`].

pub mod config;
pub mod delayed_q;
pub mod error;
pub mod hierarchy;
pub mod simulator;
pub mod stats;
pub mod trace;

pub use error::{Error, Result};
pub use simulator::{simulate, Simulation};
pub use stats::{CacheStats, Report};
