use std::collections::VecDeque;

use log::{debug, info};

use super::common::*;
use crate::error::{Error, Result};
use crate::stats::CacheStats;

// data cache

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheLine {
    pub tag: u64,
    pub valid: bool,
    pub dirty: bool,
    pub data: Vec<Word>,
    dirty_words: u64,       // bit i set: data[i] differs from memory
}

impl CacheLine {
    fn new(line_words: usize) -> Self {
        CacheLine {
            tag: 0,
            valid: false,
            dirty: false,
            data: vec![0; line_words],
            dirty_words: 0,
        }
    }

    fn store(&mut self, offset: usize, word: Word) {
        self.data[offset] = word;
        self.dirty_words |= 1 << offset;
        self.dirty = true;
    }

    /// Offsets of the words a write-back has to flush, ascending.
    pub fn dirty_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.data.len()).filter(|i| self.dirty_words & (1 << i) != 0)
    }
}

/// The lines of one set, most recently used first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSet {
    lines: Vec<CacheLine>,
}

impl CacheSet {
    fn new(ways: usize, line_words: usize) -> Self {
        CacheSet {
            lines: (0..ways).map(|_| CacheLine::new(line_words)).collect(),
        }
    }

    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }

    /// Tags of the valid lines, most recently used first.
    pub fn tags(&self) -> Vec<u64> {
        self.lines.iter().filter(|l| l.valid).map(|l| l.tag).collect()
    }

    fn find(&self, tag: u64) -> Option<usize> {
        self.lines.iter().position(|l| l.valid && l.tag == tag)
    }

    /// Moves the line at `pos` to the front.
    fn touch(&mut self, pos: usize) {
        self.lines[..=pos].rotate_right(1);
    }

    /// Line a fill replaces: the first invalid line, otherwise the LRU tail.
    fn victim(&self) -> usize {
        self.lines
            .iter()
            .position(|l| !l.valid)
            .unwrap_or(self.lines.len() - 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// Carries the word for reads.
    Hit(Option<Word>),
    Miss,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteBack {
    pub addr: Addr,
    pub data: Word,
}

/// Set-associative, write-back cache with LRU replacement.
///
/// A miss is resolved in two steps driven by the owner: the addressed word is
/// fetched from memory, the victim's dirty words are written back
/// ([`victim_write_backs`](Self::victim_write_backs)), and only then is the
/// line replaced ([`fill`](Self::fill)). Only the addressed word is installed;
/// the other words of a freshly filled line are zero.
#[derive(Clone, Debug)]
pub struct CacheEngine {
    geometry: CacheGeometry,
    sets: Vec<CacheSet>,
    stats: CacheStats,
}

impl CacheEngine {
    pub fn new(geometry: CacheGeometry) -> Self {
        CacheEngine {
            geometry,
            sets: (0..geometry.sets)
                .map(|_| CacheSet::new(geometry.ways, geometry.line_words))
                .collect(),
            stats: CacheStats::default(),
        }
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn set(&self, index: usize) -> &CacheSet {
        &self.sets[index]
    }

    /// Resolves `access` against the cache, counting it as a hit or a miss.
    /// A hit is fully handled here; a miss leaves the cache untouched.
    pub fn access(&mut self, access: &Access) -> Lookup {
        let (tag, index, offset) = self.geometry.decompose(access.addr);
        let set = &mut self.sets[index];

        let Some(pos) = set.find(tag) else {
            match access.op {
                MemOp::Read => self.stats.read_misses += 1,
                MemOp::Write => self.stats.write_misses += 1,
            }
            return Lookup::Miss;
        };

        let line = &mut set.lines[pos];
        let data = match access.op {
            MemOp::Read => {
                self.stats.read_hits += 1;
                Some(line.data[offset])
            }
            MemOp::Write => {
                self.stats.write_hits += 1;
                line.store(offset, access.data.unwrap_or_default());
                None
            }
        };
        set.touch(pos);
        Lookup::Hit(data)
    }

    /// Write-backs needed before the line for `addr` can be filled: one per
    /// dirty word of the victim, empty when the victim is invalid or clean.
    pub fn victim_write_backs(&mut self, addr: Addr) -> Vec<WriteBack> {
        let (_, index, _) = self.geometry.decompose(addr);
        let set = &self.sets[index];
        let victim = &set.lines[set.victim()];
        if !victim.valid || !victim.dirty {
            return Vec::new();
        }
        let wbs = victim
            .dirty_offsets()
            .map(|offset| WriteBack {
                addr: self.geometry.compose(victim.tag, index, offset),
                data: victim.data[offset],
            })
            .collect::<Vec<_>>();
        self.stats.write_backs += wbs.len() as u64;
        wbs
    }

    /// Installs the line for a missed `access`. `fetched` is the word memory
    /// returned for the addressed location; writes store their own data.
    pub fn fill(&mut self, access: &Access, fetched: Word) {
        let (tag, index, offset) = self.geometry.decompose(access.addr);
        let line_words = self.geometry.line_words;
        let set = &mut self.sets[index];
        let pos = set.victim();

        let line = &mut set.lines[pos];
        if line.valid {
            self.stats.evictions += 1;
            debug!(
                "evict {} line address = {} set = {}",
                if line.dirty { "dirty" } else { "clean" },
                self.geometry.compose(line.tag, index, 0),
                index
            );
        }
        *line = CacheLine::new(line_words);
        line.tag = tag;
        line.valid = true;
        match access.op {
            MemOp::Read => line.data[offset] = fetched,
            MemOp::Write => line.store(offset, access.data.unwrap_or_default()),
        }
        set.touch(pos);
    }

    /// Cached value of `addr`, without touching recency or counters.
    pub fn probe(&self, addr: Addr) -> Option<Word> {
        let (tag, index, offset) = self.geometry.decompose(addr);
        let set = &self.sets[index];
        set.find(tag).map(|pos| set.lines[pos].data[offset])
    }
}

// cache

#[derive(Clone, Debug, PartialEq, Eq)]
enum CacheState {
    Idle,
    Resolving(Access),                  // waiting out the hit latency
    Fetching(Access),                   // waiting for the missed word
    WritingBack {
        access: Access,
        fetched: Word,
        pending: VecDeque<WriteBack>,
    },
}

pub struct Cache {
    pub id: usize,
    state: CacheState,
    engine: CacheEngine,
    hit_lat: u64,
    downstream: Downstream,
    tx: MsgSender,
}

impl Cache {
    pub fn new(
        id: usize,
        geometry: CacheGeometry,
        hit_lat: u64,
        downstream: Downstream,
        tx: MsgSender,
    ) -> Self {
        Cache {
            id,
            state: CacheState::Idle,
            engine: CacheEngine::new(geometry),
            hit_lat,
            downstream,
            tx,
        }
    }

    pub fn engine(&self) -> &CacheEngine {
        &self.engine
    }

    pub fn stats(&self) -> &CacheStats {
        self.engine.stats()
    }

    pub fn phase(&self) -> ActorPhase {
        match self.state {
            CacheState::Idle => ActorPhase::AwaitingStimulus,
            CacheState::Resolving(_) => ActorPhase::Processing,
            CacheState::Fetching(_) | CacheState::WritingBack { .. } => {
                ActorPhase::AwaitingCompletion
            }
        }
    }

    fn name(&self) -> String {
        format!("cache{}", self.id)
    }

    // helper functions

    fn send_mem(&self, op: MemOp, addr: Addr, data: Option<Word>) {
        let req = BusRequest {
            origin: self.id,
            addr,
            op,
            data,
        };
        let msg = match self.downstream {
            Downstream::Memory => Msg::ToMem(MemMsg::Request(req)),
            Downstream::Bus => Msg::ToBus(BusMsg::Request(req)),
        };
        self.tx.send(0, msg);
    }

    fn respond(&self, data: Option<Word>) {
        self.tx.send(0, Msg::ToProc(self.id, ProcMsg::Done(data)));
    }

    fn write_back(&self, wb: &WriteBack) {
        info!(
            "{:>8}: {:>10}: evict dirty line, write back address = {} data = {}",
            self.tx.now(),
            self.name(),
            wb.addr,
            wb.data
        );
        self.send_mem(MemOp::Write, wb.addr, Some(wb.data));
    }

    fn finish(&mut self, access: &Access, fetched: Word) -> CacheState {
        self.engine.fill(access, fetched);
        self.respond(match access.op {
            MemOp::Read => Some(fetched),
            MemOp::Write => None,
        });
        CacheState::Idle
    }

    // inputs

    pub fn handle_msg(&mut self, msg: CacheMsg) -> Result<()> {
        let state = std::mem::replace(&mut self.state, CacheState::Idle);
        self.state = match (state, msg) {
            (CacheState::Idle, CacheMsg::Request(access)) => {
                info!(
                    "{:>8}: {:>10}: {} address = {}",
                    self.tx.now(),
                    self.name(),
                    access.op,
                    access.addr
                );
                self.tx.send(self.hit_lat, Msg::ToCache(self.id, CacheMsg::LookupDue));
                CacheState::Resolving(access)
            }
            (CacheState::Resolving(access), CacheMsg::LookupDue) => {
                let (_, index, offset) = self.engine.geometry().decompose(access.addr);
                match self.engine.access(&access) {
                    Lookup::Hit(data) => {
                        info!(
                            "{:>8}: {:>10}: {} hit address = {} set = {} word = {}",
                            self.tx.now(),
                            self.name(),
                            access.op,
                            access.addr,
                            index,
                            offset
                        );
                        self.respond(data);
                        CacheState::Idle
                    }
                    Lookup::Miss => {
                        info!(
                            "{:>8}: {:>10}: {} miss address = {} set = {} word = {}",
                            self.tx.now(),
                            self.name(),
                            access.op,
                            access.addr,
                            index,
                            offset
                        );
                        // single-word fetch, the rest of the line is not loaded
                        self.send_mem(MemOp::Read, access.addr, None);
                        CacheState::Fetching(access)
                    }
                }
            }
            (CacheState::Fetching(access), CacheMsg::MemDone(resp)) if resp.op == MemOp::Read => {
                let fetched = resp.data.unwrap_or_default();
                let mut pending = VecDeque::from(self.engine.victim_write_backs(access.addr));
                match pending.pop_front() {
                    None => self.finish(&access, fetched),
                    Some(wb) => {
                        self.write_back(&wb);
                        CacheState::WritingBack {
                            access,
                            fetched,
                            pending,
                        }
                    }
                }
            }
            (
                CacheState::WritingBack {
                    access,
                    fetched,
                    mut pending,
                },
                CacheMsg::MemDone(resp),
            ) if resp.op == MemOp::Write => match pending.pop_front() {
                None => self.finish(&access, fetched),
                Some(wb) => {
                    self.write_back(&wb);
                    CacheState::WritingBack {
                        access,
                        fetched,
                        pending,
                    }
                }
            },
            (state, msg) => {
                debug!("{} in state {:?}", self.name(), state);
                return Err(Error::UnexpectedSignal {
                    actor: self.name(),
                    signal: format!("{msg:?}"),
                    cycle: self.tx.now(),
                });
            }
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delayed_q::DelayedQ;

    // one set, two ways, one word per line
    fn tiny() -> CacheGeometry {
        CacheGeometry::new(16, 8, 8, 2).unwrap()
    }

    /// Runs an access through the engine the way the cache actor does, with
    /// memory modeled by a closure. Returns the lookup and the write-backs.
    fn run(
        engine: &mut CacheEngine,
        access: Access,
        mem: impl Fn(Addr) -> Word,
    ) -> (Lookup, Vec<WriteBack>) {
        let lookup = engine.access(&access);
        let mut wbs = Vec::new();
        if lookup == Lookup::Miss {
            wbs = engine.victim_write_backs(access.addr);
            engine.fill(&access, mem(access.addr));
        }
        (lookup, wbs)
    }

    mod set_tests {
        use super::*;

        #[test]
        fn new_set_is_invalid() {
            let set = CacheSet::new(4, 2);
            assert_eq!(set.lines().len(), 4);
            assert!(set.lines().iter().all(|l| !l.valid && !l.dirty));
            assert!(set.tags().is_empty());
            assert_eq!(set.victim(), 0);
        }

        #[test]
        fn touch_moves_to_front() {
            let mut set = CacheSet::new(3, 1);
            for (i, line) in set.lines.iter_mut().enumerate() {
                line.valid = true;
                line.tag = i as u64;
            }
            set.touch(2);
            assert_eq!(set.tags(), vec![2, 0, 1]);
            set.touch(0);
            assert_eq!(set.tags(), vec![2, 0, 1]);
            assert_eq!(set.victim(), 2);
        }
    }

    mod engine_tests {
        use super::*;

        #[test]
        fn two_way_conflict_is_strict_lru() {
            let mut engine = CacheEngine::new(tiny());
            let seq = [0x00, 0x20, 0x40, 0x00].map(|a| run(&mut engine, Access::read(a), |_| 0).0);
            assert_eq!(seq, [Lookup::Miss; 4]);
            assert_eq!(engine.stats().read_misses, 4);
            assert_eq!(engine.stats().read_hits, 0);
            assert_eq!(engine.stats().evictions, 2);
            assert_eq!(engine.set(0).tags(), vec![0x00, 0x40]);
        }

        #[test]
        fn hit_refreshes_recency() {
            let mut engine = CacheEngine::new(tiny());
            run(&mut engine, Access::read(0x00), |_| 0);
            run(&mut engine, Access::read(0x20), |_| 0);
            assert_eq!(run(&mut engine, Access::read(0x00), |_| 0).0, Lookup::Hit(Some(0)));
            run(&mut engine, Access::read(0x40), |_| 0);
            // 0x20 was least recently used
            assert_eq!(engine.set(0).tags(), vec![0x40, 0x00]);
        }

        #[test]
        fn read_miss_installs_fetched_word() {
            let geometry = CacheGeometry::new(256, 32, 8, 2).unwrap();
            let mut engine = CacheEngine::new(geometry);
            let (lookup, _) = run(&mut engine, Access::read(0x13), |a| a * 3);
            assert_eq!(lookup, Lookup::Miss);
            assert_eq!(engine.probe(0x13), Some(0x39));
            // neighbours in the line are not loaded
            assert_eq!(engine.probe(0x12), Some(0));
            assert_eq!(run(&mut engine, Access::read(0x13), |_| 0).0, Lookup::Hit(Some(0x39)));
            assert_eq!(engine.stats().read_hits, 1);
        }

        #[test]
        fn write_hit_marks_dirty() {
            let mut engine = CacheEngine::new(tiny());
            run(&mut engine, Access::read(0x8), |_| 1);
            assert!(!engine.set(0).lines()[0].dirty);
            assert_eq!(run(&mut engine, Access::write(0x8, 77), |_| 0).0, Lookup::Hit(None));
            assert!(engine.set(0).lines()[0].dirty);
            assert_eq!(engine.probe(0x8), Some(77));
            assert_eq!(engine.stats().write_hits, 1);
        }

        #[test]
        fn write_miss_installs_dirty_line() {
            let mut engine = CacheEngine::new(tiny());
            run(&mut engine, Access::write(0x8, 5), |_| 123);
            let line = &engine.set(0).lines()[0];
            assert!(line.valid && line.dirty);
            assert_eq!(line.data, vec![5]);
            assert_eq!(engine.stats().write_misses, 1);
        }

        #[test]
        fn dirty_victim_is_written_back_to_its_own_address() {
            let mut engine = CacheEngine::new(tiny());
            run(&mut engine, Access::write(0x100, 1), |_| 0);
            run(&mut engine, Access::write(0x100, 2), |_| 0);
            run(&mut engine, Access::read(0x200), |_| 0);
            let (_, wbs) = run(&mut engine, Access::read(0x300), |_| 0);
            assert_eq!(wbs, vec![WriteBack { addr: 0x100, data: 2 }]);
            assert_eq!(engine.stats().write_backs, 1);
        }

        #[test]
        fn clean_victim_needs_no_write_back() {
            let mut engine = CacheEngine::new(tiny());
            run(&mut engine, Access::read(0x100), |_| 0);
            run(&mut engine, Access::read(0x200), |_| 0);
            let (_, wbs) = run(&mut engine, Access::read(0x300), |_| 0);
            assert!(wbs.is_empty());
            assert_eq!(engine.stats().evictions, 1);
            assert_eq!(engine.stats().write_backs, 0);
        }

        #[test]
        fn multi_word_write_back_covers_each_dirty_word() {
            // one set, two ways, four words per line
            let geometry = CacheGeometry::new(64, 32, 8, 2).unwrap();
            let mut engine = CacheEngine::new(geometry);
            run(&mut engine, Access::write(0x41, 10), |_| 0);
            run(&mut engine, Access::write(0x43, 30), |_| 0);
            run(&mut engine, Access::read(0x80), |_| 0);
            let (_, wbs) = run(&mut engine, Access::read(0xc0), |_| 0);
            assert_eq!(
                wbs,
                vec![
                    WriteBack { addr: 0x41, data: 10 },
                    WriteBack { addr: 0x43, data: 30 },
                ]
            );
        }
    }

    mod actor_tests {
        use super::*;

        fn deliver(q: &mut DelayedQ<Msg>) -> Vec<Msg> {
            std::iter::from_fn(|| q.try_fetch()).collect()
        }

        #[test]
        fn hit_resolves_after_hit_latency() {
            let (mut q, tx) = DelayedQ::new();
            let mut cache = Cache::new(0, tiny(), 1, Downstream::Memory, tx);
            cache.engine.fill(&Access::read(4), 44);

            cache.handle_msg(CacheMsg::Request(Access::read(4))).unwrap();
            assert_eq!(cache.phase(), ActorPhase::Processing);
            assert!(deliver(&mut q).is_empty());

            q.update_time(1);
            assert_eq!(deliver(&mut q), vec![Msg::ToCache(0, CacheMsg::LookupDue)]);
            cache.handle_msg(CacheMsg::LookupDue).unwrap();
            assert_eq!(deliver(&mut q), vec![Msg::ToProc(0, ProcMsg::Done(Some(44)))]);
            assert_eq!(cache.phase(), ActorPhase::AwaitingStimulus);
        }

        #[test]
        fn miss_with_dirty_victim_fetches_then_writes_back() {
            let (mut q, tx) = DelayedQ::new();
            let mut cache = Cache::new(1, tiny(), 0, Downstream::Bus, tx);
            cache.engine.fill(&Access::write(0x10, 9), 0);
            cache.engine.fill(&Access::read(0x18), 0);

            cache.handle_msg(CacheMsg::Request(Access::read(0x20))).unwrap();
            cache.handle_msg(CacheMsg::LookupDue).unwrap();
            let fetch = BusRequest { origin: 1, addr: 0x20, op: MemOp::Read, data: None };
            assert_eq!(
                deliver(&mut q),
                vec![
                    Msg::ToCache(1, CacheMsg::LookupDue),
                    Msg::ToBus(BusMsg::Request(fetch)),
                ]
            );
            assert_eq!(cache.phase(), ActorPhase::AwaitingCompletion);

            let read_done = MemResponse { origin: 1, op: MemOp::Read, data: Some(6) };
            cache.handle_msg(CacheMsg::MemDone(read_done)).unwrap();
            let wb = BusRequest { origin: 1, addr: 0x10, op: MemOp::Write, data: Some(9) };
            assert_eq!(deliver(&mut q), vec![Msg::ToBus(BusMsg::Request(wb))]);
            // victim stays in place until the write-back completes
            assert_eq!(cache.engine().probe(0x10), Some(9));

            let write_done = MemResponse { origin: 1, op: MemOp::Write, data: None };
            cache.handle_msg(CacheMsg::MemDone(write_done)).unwrap();
            assert_eq!(deliver(&mut q), vec![Msg::ToProc(1, ProcMsg::Done(Some(6)))]);
            assert_eq!(cache.engine().probe(0x10), None);
            assert_eq!(cache.engine().probe(0x20), Some(6));
        }

        #[test]
        fn request_while_busy_is_rejected() {
            let (_q, tx) = DelayedQ::new();
            let mut cache = Cache::new(0, tiny(), 1, Downstream::Memory, tx);
            cache.handle_msg(CacheMsg::Request(Access::read(0))).unwrap();
            assert!(matches!(
                cache.handle_msg(CacheMsg::Request(Access::read(8))),
                Err(Error::UnexpectedSignal { .. })
            ));
        }
    }
}
