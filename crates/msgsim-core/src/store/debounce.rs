use std::cell::Cell;
use std::time::{Duration, Instant};

/// Single-slot coalescing scheduler.
///
/// `schedule` re-arms the slot, replacing any earlier deadline, so a burst of
/// mutations yields one write. The owner polls `take_due` once per frame and
/// reads its state at that moment, never at schedule time.
#[derive(Debug)]
pub struct FrameDebouncer {
    delay: Duration,
    deadline: Cell<Option<Instant>>,
}

impl FrameDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: Cell::new(None),
        }
    }

    /// Due on the next frame
    pub fn next_frame() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn schedule(&self, now: Instant) {
        self.deadline.set(Some(now + self.delay));
    }

    pub fn cancel(&self) {
        self.deadline.set(None);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.get().is_some()
    }

    /// Disarm and return true if the deadline has passed
    pub fn take_due(&self, now: Instant) -> bool {
        match self.deadline.get() {
            Some(deadline) if deadline <= now => {
                self.deadline.set(None);
                true
            }
            _ => false,
        }
    }
}
