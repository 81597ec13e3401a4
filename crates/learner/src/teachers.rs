use std::collections::VecDeque;

use rand::RngCore;
use tracing::{debug, info};

use fleetlearn_fleet::FleetState;
use fleetlearn_peer::PeerIdentity;

use crate::error::LearningError;

/// Queue of teachers, refilled from a shuffled fleet when exhausted.
#[derive(Clone, Debug, Default)]
pub struct TeacherQueue {
    queue: VecDeque<PeerIdentity>,
    current: Option<PeerIdentity>,
}

impl TeacherQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<PeerIdentity> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The current teacher, selecting one first if there is none.
    pub fn current_or_cycle(
        &mut self,
        fleet: &FleetState,
        rng: &mut dyn RngCore,
    ) -> Result<PeerIdentity, LearningError> {
        match self.current {
            Some(current) if fleet.contains(&current) => Ok(current),
            _ => self.cycle(fleet, rng),
        }
    }

    /// Move on to the next teacher. The current teacher is never picked again
    /// right away if any other node is known.
    pub fn cycle(
        &mut self,
        fleet: &FleetState,
        rng: &mut dyn RngCore,
    ) -> Result<PeerIdentity, LearningError> {
        self.queue.retain(|identity| fleet.contains(identity));

        if self.queue.is_empty() {
            let shuffled = fleet.shuffled(rng);
            debug!(count = shuffled.len(), "Shuffled known nodes into the teacher queue");
            self.queue.extend(shuffled);
        }

        let mut next = self.pop()?;

        if Some(next) == self.current && !self.queue.is_empty() {
            self.queue.push_back(next);
            next = self.pop()?;
        }

        info!(teacher = %next, "Cycled teachers");

        self.current = Some(next);
        Ok(next)
    }

    fn pop(&mut self) -> Result<PeerIdentity, LearningError> {
        self.queue.pop_front().ok_or_else(|| {
            LearningError::NotEnoughTeachers(
                "no known node to learn from, check the network connection and seed nodes"
                    .to_string(),
            )
        })
    }
}
