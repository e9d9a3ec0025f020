use std::io::{Read, Seek};

use log::{debug, info};

use super::common::*;
use crate::error::{Error, Result};
use crate::trace::{EntryKind, TraceReader};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProcState {
    Ready,
    WaitingForCache,
    ProceedNext,
    Done,
}

/// Replays one processor's share of the trace against its cache.
///
/// At most one access is outstanding. A processor that is ready on a clock
/// edge either stops (the whole trace is exhausted) or pulls its next entry.
pub struct Processor {
    pub id: usize,
    state: ProcState,
    tx: MsgSender,
    /// Word returned by the most recent read.
    pub last_read: Option<Word>,
}

impl Processor {
    pub fn new(id: usize, tx: MsgSender) -> Self {
        Processor {
            id,
            state: ProcState::Ready,
            tx,
            last_read: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ProcState::Done
    }

    pub fn phase(&self) -> ActorPhase {
        match self.state {
            ProcState::Ready => ActorPhase::AwaitingStimulus,
            ProcState::ProceedNext => ActorPhase::Processing,
            ProcState::WaitingForCache => ActorPhase::AwaitingCompletion,
            ProcState::Done => ActorPhase::Idle,
        }
    }

    fn name(&self) -> String {
        format!("cpu{}", self.id)
    }

    fn send_cache(&self, access: Access) {
        self.tx.send(0, Msg::ToCache(self.id, CacheMsg::Request(access)));
    }

    pub fn tick<R: Read + Seek>(&mut self, trace: &mut TraceReader<R>) -> Result<()> {
        if self.state != ProcState::Ready {
            return Ok(());
        }
        if trace.eof() {
            info!("{:>8}: {:>10}: trace exhausted, stopping", self.tx.now(), self.name());
            self.state = ProcState::Done;
            return Ok(());
        }

        let entry = trace.next(self.id)?;
        self.state = match entry.kind {
            EntryKind::Read => {
                info!(
                    "{:>8}: {:>10}: read address = {}",
                    self.tx.now(),
                    self.name(),
                    entry.address
                );
                self.send_cache(Access::read(entry.address));
                ProcState::WaitingForCache
            }
            EntryKind::Write => {
                let data = entry.address.wrapping_mul(10);
                info!(
                    "{:>8}: {:>10}: write address = {} data = {}",
                    self.tx.now(),
                    self.name(),
                    entry.address,
                    data
                );
                self.send_cache(Access::write(entry.address, data));
                ProcState::WaitingForCache
            }
            _ => ProcState::ProceedNext,
        };
        Ok(())
    }

    pub fn handle_msg(&mut self, msg: ProcMsg) -> Result<()> {
        match (msg, self.state) {
            (ProcMsg::Done(data), ProcState::WaitingForCache) => {
                debug!("{:>8}: {:>10}: access complete", self.tx.now(), self.name());
                if data.is_some() {
                    self.last_read = data;
                }
                self.state = ProcState::ProceedNext;
                Ok(())
            }
            _ => Err(Error::UnexpectedSignal {
                actor: self.name(),
                signal: format!("{msg:?}"),
                cycle: self.tx.now(),
            }),
        }
    }

    pub fn post_tick(&mut self) {
        if self.state == ProcState::ProceedNext {
            self.state = ProcState::Ready;
        }
    }
}
