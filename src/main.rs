use std::fs::File;
use std::io::{self, BufReader, Write};
use std::process;

use clap::Parser;
use log::error;

use cachesim_trace::config::Config;
use cachesim_trace::trace::{TraceDump, TraceReader};
use cachesim_trace::{Error, Result, Simulation};

fn main() {
    let config = Config::parse();
    config.init_logging();

    let result = if config.print_trace {
        print_trace(&config)
    } else {
        run(&config)
    };

    if let Err(e) = result {
        error!("{e}");
        process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    let trace = TraceReader::open(&config.trace, config.kind_map)?;
    let mut sim = Simulation::new(trace, config.to_spec())?;
    let report = sim.run()?;
    println!("{report}");

    if config.dump_memory {
        println!();
        sim.memory().store().write_dump(io::stdout().lock())?;
    }
    Ok(())
}

fn print_trace(config: &Config) -> Result<()> {
    let file = File::open(&config.trace).map_err(|source| Error::Io {
        path: config.trace.clone(),
        source,
    })?;
    let dump = TraceDump::new(BufReader::new(file), config.kind_map)?;

    let mut out = io::stdout().lock();
    writeln!(out, "{}", dump.header())?;
    for entry in dump {
        writeln!(out, "{}", entry?.format(config.hex))?;
    }
    Ok(())
}
