use std::collections::HashMap;

use proptest::prelude::*;

use cachesim_trace::hierarchy::{
    Access, Addr, CacheEngine, CacheGeometry, Lookup, MemOp, MemoryStore,
};

// two sets, two ways, two words per line
fn geometry() -> CacheGeometry {
    CacheGeometry::new(64, 16, 8, 2).unwrap()
}

fn access() -> impl Strategy<Value = Access> {
    (any::<bool>(), 0..32u64, any::<u64>()).prop_map(|(write, addr, data)| {
        if write {
            Access::write(addr, data)
        } else {
            Access::read(addr)
        }
    })
}

/// Drives the engine the way the cache actor does, with an instant memory.
fn apply(engine: &mut CacheEngine, mem: &mut MemoryStore, access: &Access) -> Lookup {
    let lookup = engine.access(access);
    if lookup == Lookup::Miss {
        let fetched = mem.read(access.addr);
        for wb in engine.victim_write_backs(access.addr) {
            mem.write(wb.addr, wb.data);
        }
        engine.fill(access, fetched);
    }
    lookup
}

/// Value the hierarchy holds for `addr`: the cached word if it was written
/// while cached, memory otherwise.
fn visible(engine: &CacheEngine, mem: &MemoryStore, addr: Addr) -> u64 {
    let g = engine.geometry();
    let (tag, index, offset) = g.decompose(addr);
    engine
        .set(index)
        .lines()
        .iter()
        .find(|l| l.valid && l.tag == tag && l.dirty_offsets().any(|o| o == offset))
        .map(|l| l.data[offset])
        .unwrap_or_else(|| mem.read(addr))
}

proptest! {
    #[test]
    fn matches_reference_lru(accesses in prop::collection::vec(access(), 1..200)) {
        let g = geometry();
        let mut engine = CacheEngine::new(g);
        let mut mem = MemoryStore::new(64);
        // per set, tags most recently used first
        let mut model: Vec<Vec<u64>> = vec![Vec::new(); g.sets];

        for a in &accesses {
            let (tag, index, _) = g.decompose(a.addr);
            let set = &mut model[index];
            let expect_hit = match set.iter().position(|t| *t == tag) {
                Some(pos) => {
                    set.remove(pos);
                    true
                }
                None => false,
            };
            set.insert(0, tag);
            set.truncate(g.ways);

            let lookup = apply(&mut engine, &mut mem, a);
            prop_assert_eq!(lookup != Lookup::Miss, expect_hit);
            prop_assert_eq!(engine.set(index).tags(), set.clone());
        }

        let s = engine.stats();
        prop_assert_eq!(s.reads() + s.writes(), accesses.len() as u64);
        for i in 0..g.sets {
            prop_assert!(engine.set(i).tags().len() <= g.ways);
        }
    }

    #[test]
    fn no_write_is_lost(accesses in prop::collection::vec(access(), 1..200)) {
        let mut engine = CacheEngine::new(geometry());
        let mut mem = MemoryStore::new(64);
        let mut last_written = HashMap::new();

        for a in &accesses {
            apply(&mut engine, &mut mem, a);
            if a.op == MemOp::Write {
                last_written.insert(a.addr, a.data.unwrap_or_default());
            }
            for (addr, data) in &last_written {
                prop_assert_eq!(visible(&engine, &mem, *addr), *data);
            }
        }
    }
}

#[test]
fn every_dirty_word_is_written_back() {
    let g = geometry();
    let mut engine = CacheEngine::new(g);
    let mut mem = MemoryStore::new(64);

    apply(&mut engine, &mut mem, &Access::write(0, 1));
    apply(&mut engine, &mut mem, &Access::write(1, 2));
    // same set, other tags: push the line out
    apply(&mut engine, &mut mem, &Access::read(4));
    apply(&mut engine, &mut mem, &Access::read(8));

    assert_eq!(mem.read(0), 1);
    assert_eq!(mem.read(1), 2);
    assert_eq!(engine.stats().write_backs, 2);
    assert_eq!(engine.stats().evictions, 1);
}

#[test]
fn only_the_addressed_word_is_installed() {
    let mut engine = CacheEngine::new(geometry());
    let mut mem = MemoryStore::new(64);
    mem.write(2, 20);
    mem.write(3, 30);

    apply(&mut engine, &mut mem, &Access::read(2));
    // 3 shares the line but was never fetched
    assert_eq!(apply(&mut engine, &mut mem, &Access::read(3)), Lookup::Hit(Some(0)));
    assert_eq!(engine.probe(2), Some(20));
}

#[test]
fn read_of_never_cached_address_misses() {
    let mut engine = CacheEngine::new(geometry());
    assert_eq!(engine.access(&Access::read(5)), Lookup::Miss);
    assert_eq!(engine.stats().read_misses, 1);
    assert_eq!(engine.probe(5), None);
}
