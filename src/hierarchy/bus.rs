use std::collections::VecDeque;

use log::{debug, info};

use super::common::*;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BusState {
    Free,
    Busy(usize),        // transaction of this cache is with memory
    FreeNext,
}

/// Serializes the memory requests of all caches onto the single memory.
///
/// Requests are served first come first served. Only one transaction is ever
/// in flight; a cache's write-back is queued like any other request. The bus
/// carries no coherence traffic, so a cache never learns that another one
/// wrote to a line it holds.
pub struct Bus {
    state: BusState,
    queue: VecDeque<BusRequest>,
    tx: MsgSender,
    pub forwarded: u64,
}

impl Bus {
    pub fn new(tx: MsgSender) -> Self {
        Bus {
            state: BusState::Free,
            queue: VecDeque::new(),
            tx,
            forwarded: 0,
        }
    }

    pub fn phase(&self) -> ActorPhase {
        match self.state {
            BusState::Free if self.queue.is_empty() => ActorPhase::AwaitingStimulus,
            BusState::Free => ActorPhase::Processing,
            BusState::Busy(_) => ActorPhase::AwaitingCompletion,
            BusState::FreeNext => ActorPhase::Idle,
        }
    }

    /// Requests waiting for the bus, not counting the one in flight.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn tick(&mut self) {
        if self.state != BusState::Free {
            return;
        }
        if let Some(req) = self.queue.pop_front() {
            info!(
                "{:>8}: {:>10}: granted to cache {} for {} address = {}",
                self.tx.now(),
                "bus",
                req.origin,
                req.op,
                req.addr
            );
            self.state = BusState::Busy(req.origin);
            self.forwarded += 1;
            self.tx.send(0, Msg::ToMem(MemMsg::Request(req)));
        }
    }

    pub fn handle_msg(&mut self, msg: BusMsg) -> Result<()> {
        match (msg, self.state) {
            (BusMsg::Request(req), _) => {
                debug!(
                    "{:>8}: {:>10}: cache {} queued {} address = {}",
                    self.tx.now(),
                    "bus",
                    req.origin,
                    req.op,
                    req.addr
                );
                self.queue.push_back(req);
                Ok(())
            }
            (BusMsg::MemDone(resp), BusState::Busy(origin)) if resp.origin == origin => {
                self.tx.send(0, Msg::ToCache(origin, CacheMsg::MemDone(resp)));
                self.state = BusState::FreeNext;
                Ok(())
            }
            (BusMsg::MemDone(_), _) => Err(Error::UnexpectedSignal {
                actor: "bus".into(),
                signal: format!("{msg:?}"),
                cycle: self.tx.now(),
            }),
        }
    }

    pub fn post_tick(&mut self) {
        if self.state == BusState::FreeNext {
            self.state = BusState::Free;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delayed_q::DelayedQ;

    fn read(origin: usize, addr: Addr) -> BusRequest {
        BusRequest { origin, addr, op: MemOp::Read, data: None }
    }

    fn done(origin: usize) -> BusMsg {
        BusMsg::MemDone(MemResponse { origin, op: MemOp::Read, data: Some(1) })
    }

    #[test]
    fn serves_requests_in_arrival_order() {
        let (mut q, tx) = DelayedQ::new();
        let mut bus = Bus::new(tx);

        bus.handle_msg(BusMsg::Request(read(2, 0x20))).unwrap();
        bus.handle_msg(BusMsg::Request(read(0, 0x00))).unwrap();
        assert_eq!(bus.queued(), 2);
        assert_eq!(bus.phase(), ActorPhase::Processing);

        bus.tick();
        assert_eq!(q.try_fetch(), Some(Msg::ToMem(MemMsg::Request(read(2, 0x20)))));
        assert_eq!(bus.phase(), ActorPhase::AwaitingCompletion);

        // busy: nothing else goes out
        bus.tick();
        assert_eq!(q.try_fetch(), None);

        bus.handle_msg(done(2)).unwrap();
        assert_eq!(
            q.try_fetch(),
            Some(Msg::ToCache(
                2,
                CacheMsg::MemDone(MemResponse { origin: 2, op: MemOp::Read, data: Some(1) })
            ))
        );

        // freed only after the tick that routed the completion
        bus.tick();
        assert_eq!(q.try_fetch(), None);
        bus.post_tick();
        bus.tick();
        assert_eq!(q.try_fetch(), Some(Msg::ToMem(MemMsg::Request(read(0, 0x00)))));
        assert_eq!(bus.forwarded, 2);
    }

    #[test]
    fn completion_for_another_cache_is_rejected() {
        let (_q, tx) = DelayedQ::new();
        let mut bus = Bus::new(tx);
        bus.handle_msg(BusMsg::Request(read(1, 0))).unwrap();
        bus.tick();
        assert!(matches!(bus.handle_msg(done(0)), Err(Error::UnexpectedSignal { .. })));
    }

    #[test]
    fn completion_while_free_is_rejected() {
        let (_q, tx) = DelayedQ::new();
        let mut bus = Bus::new(tx);
        assert!(bus.handle_msg(done(0)).is_err());
    }
}
