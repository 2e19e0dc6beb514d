//! Timer support: deadlines a coroutine can park on, served by the event
//! loop's min-heap alongside fd readiness.

use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Instant;

use crate::coroutine::CoroutineInner;

/// One pending deadline. Ordered by `deadline` (earliest first once wrapped
/// in `Reverse`), with `seq` as a tiebreaker so two timers set for the exact
/// same instant still pop in registration order.
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) seq: u64,
    pub(crate) coroutine: Rc<CoroutineInner>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline).then(self.seq.cmp(&other.seq))
    }
}
