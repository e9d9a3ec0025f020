use std::collections::VecDeque;
use std::io::{self, Write};

use log::{debug, info, warn};

use super::common::*;
use crate::error::{Error, Result};

/// Flat backing store. Addresses past the end read as zero and ignore writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryStore {
    words: Vec<Word>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        MemoryStore {
            words: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn read(&self, addr: Addr) -> Word {
        usize::try_from(addr)
            .ok()
            .and_then(|i| self.words.get(i))
            .copied()
            .unwrap_or(0)
    }

    pub fn write(&mut self, addr: Addr, data: Word) {
        if let Some(word) = usize::try_from(addr).ok().and_then(|i| self.words.get_mut(i)) {
            *word = data;
        }
    }

    /// Every word that holds a non-zero value, by ascending address.
    pub fn dump(&self) -> impl Iterator<Item = (Addr, Word)> + '_ {
        self.words
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0)
            .map(|(i, w)| (i as Addr, *w))
    }

    /// Writes one `address: word` line per non-zero word.
    pub fn write_dump<W: Write>(&self, mut out: W) -> io::Result<()> {
        for (addr, word) in self.dump() {
            writeln!(out, "{addr:>8}: {word}")?;
        }
        Ok(())
    }
}

// memory

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MemState {
    Idle,
    Busy(BusRequest),
}

pub struct Memory {
    state: MemState,
    store: MemoryStore,
    latency: u64,
    upstream: Upstream,
    pending: VecDeque<BusRequest>,
    tx: MsgSender,
    pub reads: u64,
    pub writes: u64,
}

impl Memory {
    pub fn new(store: MemoryStore, latency: u64, upstream: Upstream, tx: MsgSender) -> Self {
        Memory {
            state: MemState::Idle,
            store,
            latency,
            upstream,
            pending: VecDeque::new(),
            tx,
            reads: 0,
            writes: 0,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn into_store(self) -> MemoryStore {
        self.store
    }

    pub fn phase(&self) -> ActorPhase {
        match self.state {
            MemState::Idle => ActorPhase::AwaitingStimulus,
            MemState::Busy(_) => ActorPhase::Processing,
        }
    }

    pub fn handle_msg(&mut self, msg: MemMsg) -> Result<()> {
        match (msg, self.state) {
            (MemMsg::Request(req), MemState::Idle) => {
                self.start(req);
                Ok(())
            }
            (MemMsg::Request(req), MemState::Busy(_)) => {
                warn!(
                    "{:>8}: {:>10}: request from cache {} while busy, queued",
                    self.tx.now(),
                    "memory",
                    req.origin
                );
                self.pending.push_back(req);
                Ok(())
            }
            (MemMsg::AccessDue, MemState::Busy(req)) => {
                self.complete(req);
                if let Some(next) = self.pending.pop_front() {
                    self.start(next);
                }
                Ok(())
            }
            (MemMsg::AccessDue, MemState::Idle) => Err(Error::UnexpectedSignal {
                actor: "memory".into(),
                signal: format!("{msg:?}"),
                cycle: self.tx.now(),
            }),
        }
    }

    fn start(&mut self, req: BusRequest) {
        match (req.op, req.data) {
            (MemOp::Write, Some(data)) => info!(
                "{:>8}: {:>10}: received write on address {} with data {}",
                self.tx.now(),
                "memory",
                req.addr,
                data
            ),
            _ => info!(
                "{:>8}: {:>10}: received {} on address {}",
                self.tx.now(),
                "memory",
                req.op,
                req.addr
            ),
        }
        self.state = MemState::Busy(req);
        self.tx.send(self.latency, Msg::ToMem(MemMsg::AccessDue));
    }

    fn complete(&mut self, req: BusRequest) {
        let data = match req.op {
            MemOp::Read => {
                self.reads += 1;
                Some(self.store.read(req.addr))
            }
            MemOp::Write => {
                self.writes += 1;
                self.store.write(req.addr, req.data.unwrap_or_default());
                None
            }
        };
        debug!(
            "{:>8}: {:>10}: {} on address {} done",
            self.tx.now(),
            "memory",
            req.op,
            req.addr
        );

        let resp = MemResponse {
            origin: req.origin,
            op: req.op,
            data,
        };
        let msg = match self.upstream {
            Upstream::Cache(id) => Msg::ToCache(id, CacheMsg::MemDone(resp)),
            Upstream::Bus => Msg::ToBus(BusMsg::MemDone(resp)),
        };
        self.tx.send(0, msg);
        self.state = MemState::Idle;
    }
}
