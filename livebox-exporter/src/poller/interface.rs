use super::{homelan_stats_request, publish_bitrates, HomeLanStats, HOMELAN_REFRESH_INTERVAL};
use crate::bitrate::cadence::CadenceGate;
use crate::bitrate::clock::{Clock, SystemClock};
use crate::bitrate::{BitrateCalculator, RateCeilings};
use crate::client::{request_as, DeviceApi};
use crate::discovery::discover_interfaces;
use crate::error::ClientError;
use crate::metrics::{MetricDesc, Registry};
use futures_util::future::try_join_all;
use livebox_exporter_common::{Counters, Interface};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

pub const TX_MBITS: MetricDesc = MetricDesc::gauge(
    "livebox_interface_tx_mbits",
    "Transmitted Mbits per second.",
    &["interface"],
);
pub const RX_MBITS: MetricDesc = MetricDesc::gauge(
    "livebox_interface_rx_mbits",
    "Received Mbits per second.",
    &["interface"],
);
pub const BYTES_SENT: MetricDesc = MetricDesc::counter(
    "livebox_interface_bytes_sent_total",
    "Bytes sent on the interface",
    &["interface"],
);
pub const BYTES_RECEIVED: MetricDesc = MetricDesc::counter(
    "livebox_interface_bytes_received_total",
    "Bytes received on the interface",
    &["interface"],
);

pub static METRICS: [MetricDesc; 4] = [TX_MBITS, RX_MBITS, BYTES_SENT, BYTES_RECEIVED];

/// Bandwidth and byte totals of every interface, from the HomeLan
/// statistics.
///
/// Interfaces are discovered on the first poll. Each interface is read at
/// most once per HomeLan refresh; a failed read is retried on the next tick.
#[derive(Debug)]
pub struct InterfaceMbits {
    interfaces: OnceCell<Vec<Interface>>,
    gate: CadenceGate,
    bitrate: BitrateCalculator,
    display_ceiling: f64,
}

impl InterfaceMbits {
    pub fn new(ceilings: RateCeilings) -> Self {
        Self::with_clock(ceilings, Arc::new(SystemClock))
    }

    pub fn with_clock(ceilings: RateCeilings, clock: Arc<dyn Clock>) -> Self {
        Self {
            interfaces: OnceCell::new(),
            gate: CadenceGate::with_clock(HOMELAN_REFRESH_INTERVAL, Arc::clone(&clock)),
            bitrate: BitrateCalculator::with_clock(Duration::ZERO, clock)
                .with_max_mbits(ceilings.measured),
            display_ceiling: ceilings.display,
        }
    }

    pub async fn poll<A: DeviceApi>(
        &self,
        api: &A,
        registry: &Registry,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let interfaces = self
            .interfaces
            .get_or_try_init(|| discover_interfaces(api, cancel))
            .await?;

        let due = interfaces
            .iter()
            .filter(|itf| self.gate.should_measure(&itf.name))
            .map(|itf| self.poll_interface(api, registry, cancel, itf));

        try_join_all(due).await?;
        Ok(())
    }

    async fn poll_interface<A: DeviceApi>(
        &self,
        api: &A,
        registry: &Registry,
        cancel: &CancellationToken,
        itf: &Interface,
    ) -> Result<(), ClientError> {
        let stats: HomeLanStats = request_as(api, cancel, homelan_stats_request(&itf.name)).await?;

        // Non-WAN statistics are seen from the device side.
        let mut counters = Counters::new(stats.bytes_sent, stats.bytes_received);
        if !itf.is_wan() {
            counters.swap();
        }

        let labels = [("interface", itf.name.as_str())];
        let previous = self.bitrate.last_counters(&itf.name);
        let bitrates = self.bitrate.measure(&itf.name, counters);

        publish_bitrates(
            registry,
            (&TX_MBITS, &RX_MBITS),
            &labels,
            &bitrates,
            self.display_ceiling,
        );
        update_byte_counter(registry, &BYTES_SENT, &labels, previous.map(|c| c.tx), counters.tx);
        update_byte_counter(
            registry,
            &BYTES_RECEIVED,
            &labels,
            previous.map(|c| c.rx),
            counters.rx,
        );

        self.gate.mark(&itf.name);
        Ok(())
    }
}

/// Adds the growth of a raw counter to its exported total. The total is
/// seeded with the raw value on the first read and after a reset.
fn update_byte_counter(
    registry: &Registry,
    desc: &MetricDesc,
    labels: &[(&str, &str)],
    previous: Option<u64>,
    current: u64,
) {
    match previous {
        Some(last) if current >= last => {
            registry.add_counter(desc.name, labels, (current - last) as f64)
        }
        Some(_) => {
            log::debug!("{} was reset on {:?}, reseeding", desc.name, labels);
            registry.reset_counter(desc.name, labels, current as f64)
        }
        None => registry.reset_counter(desc.name, labels, current as f64),
    }
}
