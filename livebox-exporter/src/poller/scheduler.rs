use super::{PollTask, PollerSet, Pollable};
use crate::client::DeviceApi;
use crate::error::{ClientError, PollError};
use crate::metrics::{MetricDesc, Registry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const POLLS_TOTAL: MetricDesc = MetricDesc::counter(
    "livebox_exporter_polls_total",
    "Number of polling ticks by result.",
    &["result"],
);
pub const LAST_POLL_DURATION: MetricDesc = MetricDesc::gauge(
    "livebox_exporter_last_poll_duration_seconds",
    "Duration of the last polling tick.",
    &[],
);

pub static METRICS: [MetricDesc; 2] = [POLLS_TOTAL, LAST_POLL_DURATION];

/// Task name reported when a whole tick runs out of time.
const TICK: &str = "tick";

/// Drives a [`PollerSet`] until shutdown or a fatal error.
pub struct Scheduler<A: DeviceApi, T: Pollable = PollTask> {
    pollers: PollerSet<A, T>,
    registry: Arc<Registry>,
    polling_frequency: Duration,
    tick_timeout: Duration,
}

impl<A: DeviceApi, T: Pollable> Scheduler<A, T> {
    pub fn new(
        pollers: PollerSet<A, T>,
        registry: Arc<Registry>,
        polling_frequency: Duration,
        tick_timeout: Duration,
    ) -> Self {
        registry.register_all(METRICS.iter().cloned());
        let polling_frequency = pollers.effective_polling_frequency(polling_frequency);

        Self {
            pollers,
            registry,
            polling_frequency,
            tick_timeout,
        }
    }

    pub fn polling_frequency(&self) -> Duration {
        self.polling_frequency
    }

    /// Polls every `polling_frequency` until `shutdown` is cancelled.
    ///
    /// Recoverable failures are logged and the loop goes on; a fatal one
    /// stops the loop and is returned. A token cancelled before the call
    /// stops the loop before the first tick.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), PollError> {
        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.tick(&shutdown) => result,
            };

            match result {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    log::error!("Polling failed with a fatal error: {}", err);
                    return Err(err);
                }
                Err(err) => log::warn!("Polling failed ({}): {}", err.kind(), err),
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.polling_frequency) => {}
            }
        }

        log::info!("Poller received shutdown signal, stopping...");
        Ok(())
    }

    /// One tick under the tick timeout. A timed-out tick is cancelled and
    /// reported as a recoverable error.
    async fn tick(&self, shutdown: &CancellationToken) -> Result<(), PollError> {
        let cancel = shutdown.child_token();
        let started = Instant::now();

        let poll = self.pollers.poll(&cancel);
        let result = match tokio::time::timeout(self.tick_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(PollError::new(
                    TICK,
                    ClientError::Transport(format!(
                        "timed out after {}s",
                        self.tick_timeout.as_secs()
                    )),
                ))
            }
        };

        let outcome = match &result {
            Ok(()) => "success",
            Err(err) if err.task == TICK => "timeout",
            Err(_) => "failure",
        };
        self.registry
            .add_counter(POLLS_TOTAL.name, &[("result", outcome)], 1.0);
        self.registry.set_gauge(
            LAST_POLL_DURATION.name,
            &[],
            started.elapsed().as_secs_f64(),
        );

        result
    }
}
