use std::path::PathBuf;

use clap::Parser;
use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::hierarchy::{SystemSpec, Topology};
use crate::trace::KindMap;

/// Replays a binary memory-access trace against a simulated cache hierarchy
/// and prints per-processor hit/miss statistics.
#[derive(Parser, Debug, Clone)]
#[command(name = "cachesim-trace", version)]
pub struct Config {
    /// Trace file to replay
    pub trace: PathBuf,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// How caches reach memory: direct, shared (through the bus) or auto
    #[arg(long, default_value_t = Topology::Auto)]
    pub topology: Topology,

    /// Kind letters in code order (N)OP (R)EAD (W)RITE (E)ND (B)ARRIER
    #[arg(long, default_value_t = KindMap::default())]
    pub kind_map: KindMap,

    /// Memory size in words
    #[arg(long, default_value_t = 8912)]
    pub mem_size: usize,

    /// Memory access latency in cycles
    #[arg(long, default_value_t = 100)]
    pub mem_latency: u64,

    /// Cache size in bytes
    #[arg(long, default_value_t = 32 * 1024)]
    pub cache_size: u32,

    /// Cache line size in bytes
    #[arg(long, default_value_t = 32)]
    pub line_size: u32,

    /// Word size in bytes
    #[arg(long, default_value_t = 8)]
    pub word_size: u32,

    /// Cache associativity
    #[arg(long, default_value_t = 8)]
    pub ways: u32,

    /// Cache hit latency in cycles
    #[arg(long, default_value_t = 1)]
    pub hit_latency: u64,

    /// Abort if the simulation runs longer than this many cycles. Without a
    /// limit, a trace whose barrier is never released runs forever
    #[arg(long)]
    pub cycle_limit: Option<u64>,

    /// Print every non-zero memory word after the report
    #[arg(long, conflicts_with = "print_trace")]
    pub dump_memory: bool,

    /// Print the trace entries instead of simulating
    #[arg(long)]
    pub print_trace: bool,

    /// Print addresses in hex (with --print-trace)
    #[arg(long, requires = "print_trace")]
    pub hex: bool,
}

impl Config {
    pub fn to_spec(&self) -> SystemSpec {
        SystemSpec {
            mem_size: self.mem_size,
            mem_lat: self.mem_latency,
            cache_hit_lat: self.hit_latency,
            cache_size: self.cache_size,
            line_size: self.line_size,
            word_size: self.word_size,
            cache_assoc: self.ways,
            topology: self.topology,
            cycle_limit: self.cycle_limit,
        }
    }

    /// Logs go to stderr, filtered by `CACHESIM_LOG` (default `info`).
    /// `--quiet` caps the level at `warn` whatever the environment says.
    pub fn logger(&self) -> Builder {
        let env = Env::default()
            .filter_or("CACHESIM_LOG", "info")
            .write_style_or("CACHESIM_LOG_STYLE", "auto");
        let mut builder = Builder::from_env(env);
        if self.quiet {
            builder.filter_level(LevelFilter::Warn);
        }
        builder.format_timestamp(None);
        builder
    }

    pub fn init_logging(&self) {
        self.logger().init();
    }
}
