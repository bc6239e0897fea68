//! First-difference bitrate estimation over cumulative byte counters.
//!
//! A [`BitrateCalculator`] remembers the last sample seen for every name and
//! turns the next sample into a tx/rx bitrate in Mbit/s. It never fails:
//! anomalies degrade to an absent channel or to a `reset` flag.

pub mod cadence;
pub mod clock;

use crate::bitrate::clock::Clock;
use livebox_exporter_common::{bytes_per_sec_to_mbits, BitrateSpec, Bitrates, Counters};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bitrates above this value are considered arithmetic artifacts.
pub const DEFAULT_MAX_MEASURED_MBITS: f64 = 10000.0;

/// Final clamp applied by pollers before publishing a bitrate.
pub const DEFAULT_MAX_DISPLAY_MBITS: f64 = 2150.0;

/// A baseline older than this is too stale to compute a rate from.
pub const MAX_BASELINE_AGE: Duration = Duration::from_secs(6 * 60);

/// The two independent bitrate ceilings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateCeilings {
    /// Rates above this are discarded by the calculator.
    pub measured: f64,
    /// Rates above this are clamped before publication.
    pub display: f64,
}

impl Default for RateCeilings {
    fn default() -> Self {
        Self {
            measured: DEFAULT_MAX_MEASURED_MBITS,
            display: DEFAULT_MAX_DISPLAY_MBITS,
        }
    }
}

/// Clamps a bitrate to the display ceiling.
pub fn sanitize_mbits(mbits: f64, ceiling: f64) -> f64 {
    mbits.min(ceiling)
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    counters: Counters,
    observed_at: Instant,
}

/// Bitrate calculator for a set of named counter streams.
///
/// Each name keeps only its latest sample. The map is locked for the duration
/// of a single read-modify-write, so one calculator can be shared by
/// concurrent callers as long as a given name is measured from one place.
#[derive(Debug)]
pub struct BitrateCalculator {
    samples: Mutex<HashMap<String, Sample>>,
    min_delay_between_measures: Duration,
    max_mbits: f64,
    clock: Arc<dyn Clock>,
}

impl BitrateCalculator {
    /// `min_delay_between_measures` of zero disables cadence gating.
    pub fn with_clock(min_delay_between_measures: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            min_delay_between_measures,
            max_mbits: DEFAULT_MAX_MEASURED_MBITS,
            clock,
        }
    }

    pub fn with_max_mbits(mut self, max_mbits: f64) -> Self {
        self.max_mbits = max_mbits;
        self
    }

    /// Returns true if `name` has never been measured or if its last sample
    /// is older than the minimum delay between measures.
    pub fn should_measure(&self, name: &str) -> bool {
        let samples = self.samples.lock();
        match samples.get(name) {
            None => true,
            Some(last) => self.elapsed_since(last.observed_at) > self.min_delay_between_measures,
        }
    }

    /// Counters of the latest sample recorded for `name`.
    pub fn last_counters(&self, name: &str) -> Option<Counters> {
        self.samples.lock().get(name).map(|s| s.counters)
    }

    /// Records `current` as the latest sample of `name` and returns the
    /// bitrates since the previous sample.
    pub fn measure(&self, name: &str, current: Counters) -> Bitrates {
        let now = self.clock.now();
        let mut samples = self.samples.lock();

        let mut bitrates = Bitrates::default();

        if let Some(last) = samples.get(name) {
            match now.checked_duration_since(last.observed_at) {
                Some(elapsed) if !elapsed.is_zero() && elapsed <= MAX_BASELINE_AGE => {
                    let secs = elapsed.as_secs_f64();
                    bitrates.tx = self.channel(last.counters.tx, current.tx, secs);
                    bitrates.rx = self.channel(last.counters.rx, current.rx, secs);
                }
                _ => {
                    log::debug!(
                        "Skipping bitrate of {}: baseline outside of the measurement window",
                        name
                    );
                }
            }
        }

        samples.insert(
            name.to_string(),
            Sample {
                counters: current,
                observed_at: now,
            },
        );

        bitrates
    }

    fn channel(&self, last: u64, current: u64, elapsed_secs: f64) -> Option<BitrateSpec> {
        if current < last {
            return Some(BitrateSpec::reset());
        }

        let value = bytes_per_sec_to_mbits((current - last) as f64 / elapsed_secs);
        if value > self.max_mbits {
            log::debug!("Discarding implausible bitrate of {:.2} Mbit/s", value);
            return None;
        }

        Some(BitrateSpec::rate(value))
    }

    fn elapsed_since(&self, instant: Instant) -> Duration {
        self.clock.now().saturating_duration_since(instant)
    }
}
