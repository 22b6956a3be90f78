//! Race between an expected event and a deadline
//!
//! Each fallback in the engine is one [`Race`]: whichever of "the event
//! happened" or "the deadline passed" is observed first settles it, and the
//! other side becomes a no-op. Races are tagged with the epoch they were
//! created under and never settle on behalf of a different epoch.

use crate::types::{Epoch, Millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Event,
    Deadline,
}

#[derive(Debug, Clone)]
pub struct Race {
    epoch: Epoch,
    deadline: Millis,
    outcome: Option<Outcome>,
}

impl Race {
    pub fn new(epoch: Epoch, deadline: Millis) -> Self {
        Self {
            epoch,
            deadline,
            outcome: None,
        }
    }

    /// Record the expected event. Returns true if it won the race.
    pub fn event(&mut self) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(Outcome::Event);
        true
    }

    /// Check the deadline. Returns true exactly once, when the deadline wins.
    pub fn poll(&mut self, epoch: Epoch, now: Millis) -> bool {
        if epoch != self.epoch || self.outcome.is_some() || now < self.deadline {
            return false;
        }
        self.outcome = Some(Outcome::Deadline);
        true
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn deadline(&self) -> Millis {
        self.deadline
    }
}
