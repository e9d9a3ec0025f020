//! Error type shared by the trace reader, the memory hierarchy and the driver.
//!
//! Every error here is fatal and deterministic: replaying the same trace with
//! the same configuration fails the same way, so nothing is ever retried.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid command line or system configuration. Raised before any
    /// simulation state exists.
    #[error("configuration error: {0}")]
    Config(String),

    /// The trace file could not be opened.
    #[error("unable to open trace file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading or seeking inside an already opened trace failed.
    #[error("unable to read trace: {0}")]
    Read(#[from] io::Error),

    /// The trace does not start with the `5TRF` signature, or declares no
    /// processors.
    #[error("invalid trace format: {0}")]
    Format(String),

    /// The trace is too short for the processor count it declares.
    #[error("unexpected end of trace: {procs} processor(s) declared, {len} byte(s) present")]
    TruncatedFile { procs: u32, len: u64 },

    /// `next` was asked for a processor the trace does not contain.
    #[error("invalid processor id {proc_id} (trace has {procs} processor(s))")]
    InvalidProcessor { proc_id: usize, procs: usize },

    /// An entry carries a kind code the configured mapping does not assign.
    #[error("processor {proc_id}: unrecognized entry kind {code} at byte offset {offset}")]
    RuntimeTrace { proc_id: usize, code: u8, offset: u64 },

    /// An actor received a signal that its current state cannot accept.
    #[error("{actor} received unexpected signal {signal} at cycle {cycle}")]
    UnexpectedSignal {
        actor: String,
        signal: String,
        cycle: u64,
    },

    /// The simulation ran past the configured cycle limit.
    #[error("simulation did not finish within {0} cycles")]
    CycleLimitExceeded(u64),
}
