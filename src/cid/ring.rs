//! Ring/silence bookkeeping.
//!
//! The ring count grows with every RING line. Each poll timeout compares it
//! with the count seen on the previous timeout; once the count has stayed
//! unchanged for [`RINGWAIT`] consecutive timeouts the call is considered over.

/// Consecutive unchanged poll timeouts that confirm ring silence.
pub const RINGWAIT: u32 = 29;

#[derive(Debug, Default, Clone)]
pub struct RingState {
    ring: i32,
    last_ring: i32,
    silent_ticks: u32,
    cid_sent: bool,
}

impl RingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one RING line and return the new total.
    pub fn ring(&mut self) -> i32 {
        self.ring += 1;
        self.ring
    }

    pub fn count(&self) -> i32 {
        self.ring
    }

    pub fn cid_sent(&self) -> bool {
        self.cid_sent
    }

    pub fn set_cid_sent(&mut self, sent: bool) {
        self.cid_sent = sent;
    }

    /// Advance on a poll timeout. Returns true exactly once per ring cycle,
    /// when silence is confirmed; the state is then back to zero.
    pub fn on_timeout(&mut self) -> bool {
        if self.ring <= 0 {
            return false;
        }
        if self.ring != self.last_ring {
            self.last_ring = self.ring;
            self.silent_ticks = 1;
        } else {
            self.silent_ticks += 1;
        }
        if self.silent_ticks >= RINGWAIT {
            self.reset();
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        *self = RingState::default();
    }
}
