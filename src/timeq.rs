/*
Simulated time for the request harness.

Requests are not scheduled by a global event queue here; each tracking stage holds a `Ticket` that
records when the stage accepted the request and when its service completes, and polls it every
cycle.
*/

pub type Cycle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
}

impl Ticket {
    pub fn new(issued_at: Cycle, latency: Cycle) -> Self {
        Self {
            issued_at,
            ready_at: issued_at.saturating_add(latency),
        }
    }

    // Cycle at which the stage accepted the request.
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    // Cycle at which the stage is done with the request.
    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }
}
