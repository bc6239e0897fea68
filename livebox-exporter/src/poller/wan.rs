use super::{publish_bitrates, HOMELAN_REFRESH_INTERVAL};
use crate::bitrate::clock::{Clock, SystemClock};
use crate::bitrate::{BitrateCalculator, RateCeilings};
use crate::client::{request_as, DeviceApi, Request};
use crate::error::ClientError;
use crate::metrics::{MetricDesc, Registry};
use livebox_exporter_common::Counters;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const WAN: &str = "WAN";

pub const WAN_TX_MBITS: MetricDesc = MetricDesc::gauge(
    "livebox_wan_tx_mbits",
    "Transmitted Mbits per second on the WAN interface.",
    &[],
);
pub const WAN_RX_MBITS: MetricDesc = MetricDesc::gauge(
    "livebox_wan_rx_mbits",
    "Received Mbits per second on the WAN interface.",
    &[],
);

pub static METRICS: [MetricDesc; 2] = [WAN_TX_MBITS, WAN_RX_MBITS];

#[derive(Debug, Deserialize)]
struct WanCounters {
    #[serde(rename = "BytesSent")]
    bytes_sent: u64,
    #[serde(rename = "BytesReceived")]
    bytes_received: u64,
}

/// Bandwidth of the WAN link from `HomeLan/getWANCounters`.
#[derive(Debug)]
pub struct WanMbits {
    bitrate: BitrateCalculator,
    display_ceiling: f64,
}

impl WanMbits {
    pub fn new(ceilings: RateCeilings) -> Self {
        Self::with_clock(ceilings, Arc::new(SystemClock))
    }

    pub fn with_clock(ceilings: RateCeilings, clock: Arc<dyn Clock>) -> Self {
        Self {
            bitrate: BitrateCalculator::with_clock(HOMELAN_REFRESH_INTERVAL, clock)
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
        if !self.bitrate.should_measure(WAN) {
            return Ok(());
        }

        let stats: WanCounters =
            request_as(api, cancel, Request::new("HomeLan", "getWANCounters")).await?;

        // The counters are reported from the LAN side of the link.
        let counters = Counters::new(stats.bytes_sent, stats.bytes_received).swapped();

        let bitrates = self.bitrate.measure(WAN, counters);
        publish_bitrates(
            registry,
            (&WAN_TX_MBITS, &WAN_RX_MBITS),
            &[],
            &bitrates,
            self.display_ceiling,
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitrate::clock::ManualClock;
    use crate::client::fake::FakeDevice;
    use serde_json::json;
    use std::time::Duration;

    const KEY: &str = "HomeLan/getWANCounters";

    fn setup() -> (WanMbits, Arc<ManualClock>, Registry) {
        let clock = ManualClock::new();
        let poller = WanMbits::with_clock(RateCeilings::default(), clock.clone());
        let registry = Registry::new();
        registry.register_all(METRICS.iter().cloned());
        (poller, clock, registry)
    }

    #[tokio::test]
    async fn test_wan_counters_are_swapped() {
        let (poller, clock, registry) = setup();
        let device = FakeDevice::new();
        device
            .reply(KEY, json!({"BytesSent": 0, "BytesReceived": 0}))
            .reply(KEY, json!({"BytesSent": 3_875_000, "BytesReceived": 7_750_000}));
        let cancel = CancellationToken::new();

        poller.poll(&device, &registry, &cancel).await.unwrap();
        assert_eq!(registry.get(WAN_TX_MBITS.name, &[]), None);

        clock.advance(Duration::from_secs(31));
        poller.poll(&device, &registry, &cancel).await.unwrap();

        assert_eq!(registry.get(WAN_TX_MBITS.name, &[]), Some(2.0));
        assert_eq!(registry.get(WAN_RX_MBITS.name, &[]), Some(1.0));
    }

    #[tokio::test]
    async fn test_wan_is_not_read_before_refresh() {
        let (poller, clock, registry) = setup();
        let device = FakeDevice::new();
        device.reply(KEY, json!({"BytesSent": 0, "BytesReceived": 0}));
        let cancel = CancellationToken::new();

        poller.poll(&device, &registry, &cancel).await.unwrap();
        clock.advance(Duration::from_secs(5));
        poller.poll(&device, &registry, &cancel).await.unwrap();

        assert_eq!(device.call_count(KEY), 1);
    }

    #[tokio::test]
    async fn test_display_ceiling_clamps() {
        let clock = ManualClock::new();
        let poller = WanMbits::with_clock(
            RateCeilings {
                measured: 10000.0,
                display: 1.5,
            },
            clock.clone(),
        );
        let registry = Registry::new();
        registry.register_all(METRICS.iter().cloned());
        let device = FakeDevice::new();
        device
            .reply(KEY, json!({"BytesSent": 0, "BytesReceived": 0}))
            .reply(KEY, json!({"BytesSent": 0, "BytesReceived": 7_750_000}));
        let cancel = CancellationToken::new();

        poller.poll(&device, &registry, &cancel).await.unwrap();
        clock.advance(Duration::from_secs(31));
        poller.poll(&device, &registry, &cancel).await.unwrap();

        assert_eq!(registry.get(WAN_TX_MBITS.name, &[]), Some(1.5));
        assert_eq!(registry.get(WAN_RX_MBITS.name, &[]), Some(0.0));
    }
}
