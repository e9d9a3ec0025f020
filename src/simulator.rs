use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::{debug, info, warn};

use crate::delayed_q::DelayedQ;
use crate::error::{Error, Result};
use crate::hierarchy::*;
use crate::stats::Report;
use crate::trace::{KindMap, TraceReader};

/*
    one cycle of the simulation:

    1. clock edge: every processor, then the bus, reacts to the edge
    2. delta cycles: every message due now is delivered, in send order. zero-delay
       messages sent while delivering land in the same instant and are delivered
       in the same loop
    3. post tick: actors that finished a transaction get ready for the next edge
    4. time advances by one

    the simulation stops once every processor has stopped. messages still in flight
    at that point are dropped. a barrier that a finished processor never reaches
    holds the others forever; only a cycle limit ends such a run.
 */

/// Owns the trace and every actor, and drives them cycle by cycle.
pub struct Simulation<R> {
    trace: TraceReader<R>,
    procs: Vec<Processor>,
    caches: Vec<Cache>,
    bus: Option<Bus>,
    memory: Memory,
    dq: DelayedQ<Msg>,
    topology: Topology,
    cycle_limit: Option<u64>,
    stall_reported: bool,
}

impl<R: Read + Seek> Simulation<R> {
    pub fn new(trace: TraceReader<R>, spec: SystemSpec) -> Result<Self> {
        let geometry = spec.geometry()?;
        let n = trace.processor_count();
        let topology = spec.topology.resolve(n)?;
        let (dq, tx) = DelayedQ::<Msg>::new();

        let (downstream, upstream) = match topology {
            Topology::Direct => (Downstream::Memory, Upstream::Cache(0)),
            _ => (Downstream::Bus, Upstream::Bus),
        };

        let procs = (0..n).map(|i| Processor::new(i, tx.clone())).collect();
        let caches = (0..n)
            .map(|i| Cache::new(i, geometry, spec.cache_hit_lat, downstream, tx.clone()))
            .collect();
        let bus = match topology {
            Topology::Direct => None,
            _ => Some(Bus::new(tx.clone())),
        };
        let memory = Memory::new(MemoryStore::new(spec.mem_size), spec.mem_lat, upstream, tx);

        info!(
            "{n} processor(s), {topology} topology, {} sets x {} ways x {} words per line",
            geometry.sets, geometry.ways, geometry.line_words
        );

        Ok(Simulation {
            trace,
            procs,
            caches,
            bus,
            memory,
            dq,
            topology,
            cycle_limit: spec.cycle_limit,
            stall_reported: false,
        })
    }

    /// Runs one cycle.
    pub fn step(&mut self) -> Result<()> {
        for proc in self.procs.iter_mut() {
            proc.tick(&mut self.trace)?;
        }
        if let Some(bus) = self.bus.as_mut() {
            bus.tick();
        }

        while let Some(msg) = self.dq.try_fetch() {
            self.dispatch(msg)?;
        }

        for proc in self.procs.iter_mut() {
            proc.post_tick();
        }
        if let Some(bus) = self.bus.as_mut() {
            bus.post_tick();
        }

        let time = self.dq.time() + 1;
        self.dq.update_time(time);
        Ok(())
    }

    /// Runs until every processor has stopped.
    pub fn run(&mut self) -> Result<Report> {
        while !self.is_done() {
            if let Some(limit) = self.cycle_limit {
                if self.time() >= limit {
                    return Err(Error::CycleLimitExceeded(limit));
                }
            }
            self.step()?;
            if !self.stall_reported && self.is_stalled() {
                warn!(
                    "{:>8}: every running processor waits at a barrier that finished \
                     processors will never reach; use --cycle-limit to bound the run",
                    self.time()
                );
                self.stall_reported = true;
            }
        }
        if !self.dq.is_empty() {
            debug!("dropping {} message(s) still in flight", self.dq.len());
        }
        self.dq.clear();
        info!("simulation finished after {} cycles", self.time());
        Ok(self.report())
    }
}

impl<R> Simulation<R> {
    fn dispatch(&mut self, msg: Msg) -> Result<()> {
        match msg {
            Msg::ToProc(i, msg) => self.procs[i].handle_msg(msg),
            Msg::ToCache(i, msg) => self.caches[i].handle_msg(msg),
            Msg::ToMem(msg) => self.memory.handle_msg(msg),
            Msg::ToBus(msg) => match self.bus.as_mut() {
                Some(bus) => bus.handle_msg(msg),
                None => Err(Error::UnexpectedSignal {
                    actor: "bus".into(),
                    signal: format!("{msg:?}"),
                    cycle: self.dq.time(),
                }),
            },
        }
    }

    pub fn is_done(&self) -> bool {
        self.procs.iter().all(|p| p.is_done())
    }

    /// True when some processor's trace has ended and every other one waits
    /// at a barrier. Such a barrier is never released.
    pub fn is_stalled(&self) -> bool {
        let n = self.procs.len();
        let finished = (0..n).filter(|&i| self.trace.is_finished(i)).count();
        finished > 0
            && finished < n
            && (0..n).all(|i| self.trace.is_finished(i) || self.trace.is_waiting(i))
    }

    /// Current cycle.
    pub fn time(&self) -> u64 {
        self.dq.time()
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn trace(&self) -> &TraceReader<R> {
        &self.trace
    }

    pub fn processor(&self, i: usize) -> &Processor {
        &self.procs[i]
    }

    pub fn cache(&self, i: usize) -> &Cache {
        &self.caches[i]
    }

    pub fn bus(&self) -> Option<&Bus> {
        self.bus.as_ref()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn report(&self) -> Report {
        Report {
            per_cpu: self.caches.iter().map(|c| *c.stats()).collect(),
            cycles: self.time(),
        }
    }
}

/// Replays the trace at `path` through a freshly built system.
pub fn simulate(path: impl AsRef<Path>, spec: SystemSpec, kind_map: KindMap) -> Result<Report> {
    let trace: TraceReader<BufReader<File>> = TraceReader::open(path, kind_map)?;
    Simulation::new(trace, spec)?.run()
}
