use std::fmt;
use std::str::FromStr;

use crate::delayed_q::DelQSender;
use crate::error::{Error, Result};

/// Word address. Only the low 61 bits are ever used.
pub type Addr = u64;
/// Unit of data moved between the components.
pub type Word = u64;

pub const WORD_BYTES: u32 = std::mem::size_of::<Word>() as u32;

// system specs

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// Direct for a single processor, Shared otherwise.
    Auto,
    /// One cache wired straight to memory.
    Direct,
    /// One cache per processor, all behind the bus.
    Shared,
}

impl Topology {
    /// Resolves `Auto` and checks the choice against the processor count.
    pub fn resolve(self, procs: usize) -> Result<Topology> {
        match (self, procs) {
            (Topology::Auto, 1) => Ok(Topology::Direct),
            (Topology::Auto, _) => Ok(Topology::Shared),
            (Topology::Direct, 1) => Ok(Topology::Direct),
            (Topology::Direct, n) => Err(Error::Config(format!(
                "direct topology drives a single processor, trace has {n}"
            ))),
            (Topology::Shared, _) => Ok(Topology::Shared),
        }
    }
}

impl FromStr for Topology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Topology::Auto),
            "direct" => Ok(Topology::Direct),
            "shared" | "bus" => Ok(Topology::Shared),
            other => Err(Error::Config(format!("unknown topology '{other}'"))),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topology::Auto => "auto",
            Topology::Direct => "direct",
            Topology::Shared => "shared",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemSpec {         // unit         reference
    pub mem_size: usize,        // words        8912
    pub mem_lat: u64,           // cycles       100
    pub cache_hit_lat: u64,     // cycles       1
    pub cache_size: u32,        // bytes        32768
    pub line_size: u32,         // bytes        32
    pub word_size: u32,         // bytes        8
    pub cache_assoc: u32,       // lines        8
    pub topology: Topology,
    pub cycle_limit: Option<u64>,
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            mem_size: 8912,
            mem_lat: 100,
            cache_hit_lat: 1,
            cache_size: 32 * 1024,
            line_size: 32,
            word_size: WORD_BYTES,
            cache_assoc: 8,
            topology: Topology::Auto,
            cycle_limit: None,
        }
    }
}

impl SystemSpec {
    pub fn geometry(&self) -> Result<CacheGeometry> {
        CacheGeometry::new(self.cache_size, self.line_size, self.word_size, self.cache_assoc)
    }
}

/// Shape of a set-associative cache and the address split it implies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheGeometry {
    pub sets: usize,
    pub ways: usize,
    pub line_words: usize,
    pub offset_bits: u32,
    pub index_bits: u32,
}

impl CacheGeometry {
    pub const MAX_LINE_WORDS: usize = 64;

    pub fn new(size: u32, line_size: u32, word_size: u32, ways: u32) -> Result<Self> {
        let bad = |msg: String| -> Result<CacheGeometry> { Err(Error::Config(msg)) };

        if size == 0 || line_size == 0 || word_size == 0 || ways == 0 {
            return bad(format!(
                "cache parameters must be non-zero \
                 (size {size}, line {line_size}, word {word_size}, ways {ways})"
            ));
        }
        if line_size % word_size != 0 {
            return bad(format!("line size {line_size} is not a multiple of word size {word_size}"));
        }
        let set_bytes = line_size as u64 * ways as u64;
        if size as u64 % set_bytes != 0 {
            return bad(format!(
                "cache size {size} is not a multiple of line size * ways ({set_bytes})"
            ));
        }
        let line_words = (line_size / word_size) as usize;
        let sets = (size as u64 / set_bytes) as usize;
        if !line_words.is_power_of_two() || line_words > Self::MAX_LINE_WORDS {
            return bad(format!(
                "words per line ({line_words}) must be a power of two no larger than {}",
                Self::MAX_LINE_WORDS
            ));
        }
        if !sets.is_power_of_two() {
            return bad(format!("number of sets ({sets}) must be a power of two"));
        }

        Ok(CacheGeometry {
            sets,
            ways: ways as usize,
            line_words,
            offset_bits: line_words.trailing_zeros(),
            index_bits: sets.trailing_zeros(),
        })
    }

    /// Splits an address into `(tag, index, offset)`.
    pub fn decompose(&self, addr: Addr) -> (u64, usize, usize) {
        let offset = addr & (self.line_words as u64 - 1);
        let index = (addr >> self.offset_bits) & (self.sets as u64 - 1);
        let tag = addr >> (self.offset_bits + self.index_bits);
        (tag, index as usize, offset as usize)
    }

    /// Inverse of [`decompose`](Self::decompose).
    pub fn compose(&self, tag: u64, index: usize, offset: usize) -> Addr {
        (tag << (self.index_bits + self.offset_bits))
            | ((index as u64) << self.offset_bits)
            | offset as u64
    }
}

// actor identity and lifecycle

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorPhase {
    Idle,
    AwaitingStimulus,
    Processing,
    AwaitingCompletion,
}

impl fmt::Display for ActorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActorPhase::Idle => "IDLE",
            ActorPhase::AwaitingStimulus => "AWAITING_STIMULUS",
            ActorPhase::Processing => "PROCESSING",
            ActorPhase::AwaitingCompletion => "AWAITING_COMPLETION",
        };
        f.write_str(name)
    }
}

/// Where a cache sends its memory requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Downstream {
    Memory,
    Bus,
}

/// Where memory sends its completions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upstream {
    Cache(usize),
    Bus,
}

// message types

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemOp {
    Read,
    Write,
}

impl fmt::Display for MemOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemOp::Read => f.write_str("read"),
            MemOp::Write => f.write_str("write"),
        }
    }
}

/// A processor access as seen by its cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Access {
    pub op: MemOp,
    pub addr: Addr,
    /// Present for writes only.
    pub data: Option<Word>,
}

impl Access {
    pub fn read(addr: Addr) -> Self {
        Access { op: MemOp::Read, addr, data: None }
    }

    pub fn write(addr: Addr, data: Word) -> Self {
        Access { op: MemOp::Write, addr, data: Some(data) }
    }
}

/// A memory transaction, from a cache through the bus to memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusRequest {
    pub origin: usize,
    pub addr: Addr,
    pub op: MemOp,
    pub data: Option<Word>,
}

/// Completion of a [`BusRequest`]. `data` is only asserted for reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemResponse {
    pub origin: usize,
    pub op: MemOp,
    pub data: Option<Word>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcMsg {
    /// The cache resolved the outstanding access. Carries the word for reads.
    Done(Option<Word>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMsg {
    Request(Access),
    LookupDue,                      // hit latency elapsed
    MemDone(MemResponse),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusMsg {
    Request(BusRequest),
    MemDone(MemResponse),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemMsg {
    Request(BusRequest),
    AccessDue,                      // memory latency elapsed
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Msg {
    ToProc(usize, ProcMsg),
    ToCache(usize, CacheMsg),
    ToBus(BusMsg),
    ToMem(MemMsg),
}

pub type MsgSender = DelQSender<Msg>;
