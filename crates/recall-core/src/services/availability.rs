//! Circuit for the distributed tier: skip it for a cooldown after an error.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Tier believed healthy.
    Open,
    /// Cooldown elapsed; probe before use.
    Probe,
    /// Within cooldown; skip the tier.
    Closed,
}

pub struct AvailabilityGate {
    cooldown: Duration,
    down_since: Mutex<Option<Instant>>,
}

impl AvailabilityGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            down_since: Mutex::new(None),
        }
    }

    pub fn state(&self) -> GateState {
        match *self.down_since.lock() {
            None => GateState::Open,
            Some(since) if since.elapsed() >= self.cooldown => GateState::Probe,
            Some(_) => GateState::Closed,
        }
    }

    pub fn mark_down(&self, reason: &str) {
        let mut down = self.down_since.lock();
        if down.is_none() {
            warn!("Distributed cache marked unavailable: {}", reason);
        }
        *down = Some(Instant::now());
    }

    pub fn mark_up(&self) {
        let mut down = self.down_since.lock();
        if down.take().is_some() {
            info!("Distributed cache available again");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let gate = AvailabilityGate::new(Duration::from_secs(60));
        assert_eq!(gate.state(), GateState::Open);

        gate.mark_down("refused");
        assert_eq!(gate.state(), GateState::Closed);

        gate.mark_up();
        assert_eq!(gate.state(), GateState::Open);
    }

    #[test]
    fn test_zero_cooldown_probes_immediately() {
        let gate = AvailabilityGate::new(Duration::ZERO);
        gate.mark_down("timeout");
        assert_eq!(gate.state(), GateState::Probe);
    }
}
