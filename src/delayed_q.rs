// implements a message queue with discrete message delays

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

/*
    the queue never decrements a delay. a message sent with delay `d` at time `t` is
    stored as a TimedMsg with timestamp `t + d`, and the monotonically increasing `ord`
    orders messages that share a timestamp. messages due at the same time are therefore
    fetched in the order they were sent, which is what makes a delta cycle deterministic:
    a zero-delay message sent while handling another one is fetched in the same instant,
    after everything that was already queued for it.
 */

struct TimedMsg<MsgType> {
    t: u64,
    ord: u64,
    msg: MsgType,
}

impl<MsgType> Eq for TimedMsg<MsgType> {}

impl<MsgType> PartialEq for TimedMsg<MsgType> {
    fn eq(&self, other: &Self) -> bool {
        (self.t, self.ord) == (other.t, other.ord)
    }
}

impl<MsgType> Ord for TimedMsg<MsgType> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed, BinaryHeap is a max-heap
        (other.t, other.ord).cmp(&(self.t, self.ord))
    }
}

impl<MsgType> PartialOrd for TimedMsg<MsgType> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner<MsgType> {
    q: BinaryHeap<TimedMsg<MsgType>>,
    time: u64,
    ord_ctr: u64,
}

/// Sending half of a [`DelayedQ`]. Cheap to clone, every actor holds one.
pub struct DelQSender<MsgType> {
    q: Rc<RefCell<Inner<MsgType>>>,
}

impl<MsgType> Clone for DelQSender<MsgType> {
    fn clone(&self) -> Self {
        DelQSender { q: Rc::clone(&self.q) }
    }
}

impl<MsgType> DelQSender<MsgType> {
    /// Queues `msg` to become available `delay` cycles from now.
    pub fn send(&self, delay: u64, msg: MsgType) {
        let mut inner = self.q.borrow_mut();
        let timed = TimedMsg {
            t: inner.time + delay,
            ord: inner.ord_ctr,
            msg,
        };
        inner.ord_ctr += 1;
        inner.q.push(timed);
    }

    /// Current time of the queue this sender feeds.
    pub fn now(&self) -> u64 {
        self.q.borrow().time
    }
}

pub struct DelayedQ<MsgType> {
    q: Rc<RefCell<Inner<MsgType>>>,
}

impl<MsgType> DelayedQ<MsgType> {
    pub fn new() -> (Self, DelQSender<MsgType>) {
        let inner = Rc::new(RefCell::new(Inner {
            q: BinaryHeap::new(),
            time: 0,
            ord_ctr: 0,
        }));
        let sender = DelQSender {
            q: Rc::clone(&inner),
        };
        (DelayedQ { q: inner }, sender)
    }

    pub fn time(&self) -> u64 {
        self.q.borrow().time
    }

    /// Moves the queue to `new_time`. Time never goes backwards.
    pub fn update_time(&mut self, new_time: u64) {
        let mut inner = self.q.borrow_mut();
        debug_assert!(new_time >= inner.time, "delayed queue time went backwards");
        inner.time = new_time;
    }

    pub fn is_empty(&self) -> bool {
        self.q.borrow().q.is_empty()
    }

    pub fn len(&self) -> usize {
        self.q.borrow().q.len()
    }

    /// Whether a message is due at the current time.
    fn msg_available(&self) -> bool {
        let inner = self.q.borrow();
        inner.q.peek().map_or(false, |m| m.t <= inner.time)
    }

    /// Pops the oldest message due at the current time, if any.
    pub fn try_fetch(&mut self) -> Option<MsgType> {
        if self.msg_available() {
            self.q.borrow_mut().q.pop().map(|m| m.msg)
        } else {
            None
        }
    }

    /// Drops every pending message.
    pub fn clear(&mut self) {
        self.q.borrow_mut().q.clear();
    }
}
