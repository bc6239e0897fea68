use crate::bitrate::clock::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Enforces a minimum delay between two successful measurements of a name.
///
/// Unlike [`BitrateCalculator::should_measure`](super::BitrateCalculator::should_measure),
/// the gate only advances when the caller reports a success with
/// [`CadenceGate::mark`], so a failed read is retried on the next tick.
#[derive(Debug)]
pub struct CadenceGate {
    last_success: Mutex<HashMap<String, Instant>>,
    min_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl CadenceGate {
    pub fn with_clock(min_delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            last_success: Mutex::new(HashMap::new()),
            min_delay,
            clock,
        }
    }

    pub fn should_measure(&self, name: &str) -> bool {
        match self.last_success.lock().get(name) {
            None => true,
            Some(last) => self.clock.now().saturating_duration_since(*last) > self.min_delay,
        }
    }

    /// Records a successful measurement of `name`.
    pub fn mark(&self, name: &str) {
        let now = self.clock.now();
        self.last_success.lock().insert(name.to_string(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitrate::clock::ManualClock;

    #[test]
    fn test_gate_opens_after_min_delay() {
        let clock = ManualClock::new();
        let gate = CadenceGate::with_clock(Duration::from_secs(30), clock.clone());

        assert!(gate.should_measure("wan"));
        gate.mark("wan");
        assert!(!gate.should_measure("wan"));

        clock.advance(Duration::from_secs(31));
        assert!(gate.should_measure("wan"));
    }

    #[test]
    fn test_gate_stays_open_until_marked() {
        let clock = ManualClock::new();
        let gate = CadenceGate::with_clock(Duration::from_secs(30), clock.clone());

        // A failed read never calls mark, so the next tick may retry at once.
        assert!(gate.should_measure("eth0"));
        clock.advance(Duration::from_secs(1));
        assert!(gate.should_measure("eth0"));
    }

    #[test]
    fn test_zero_delay_never_gates() {
        let clock = ManualClock::new();
        let gate = CadenceGate::with_clock(Duration::ZERO, clock.clone());

        gate.mark("eth0");
        clock.advance(Duration::from_millis(1));
        assert!(gate.should_measure("eth0"));
    }
}
