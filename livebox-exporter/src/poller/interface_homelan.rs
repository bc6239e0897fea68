use super::{homelan_stats_request, publish_bitrates, HomeLanStats, HOMELAN_REFRESH_INTERVAL};
use crate::bitrate::clock::{Clock, SystemClock};
use crate::bitrate::{BitrateCalculator, RateCeilings};
use crate::client::{request_as, DeviceApi};
use crate::error::ClientError;
use crate::metrics::{MetricDesc, Registry};
use livebox_exporter_common::{Counters, Interface};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const HOMELAN_TX_MBITS: MetricDesc = MetricDesc::gauge(
    "livebox_interface_homelan_tx_mbits",
    "Transmitted Mbits per second.",
    &["interface"],
);
pub const HOMELAN_RX_MBITS: MetricDesc = MetricDesc::gauge(
    "livebox_interface_homelan_rx_mbits",
    "Received Mbits per second.",
    &["interface"],
);

pub static METRICS: [MetricDesc; 2] = [HOMELAN_TX_MBITS, HOMELAN_RX_MBITS];

/// Per-interface bandwidth from the HomeLan statistics.
#[derive(Debug)]
pub struct InterfaceHomeLanMbits {
    interfaces: Vec<Interface>,
    bitrate: BitrateCalculator,
    display_ceiling: f64,
}

impl InterfaceHomeLanMbits {
    pub fn new(interfaces: Vec<Interface>, ceilings: RateCeilings) -> Self {
        Self::with_clock(interfaces, ceilings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        interfaces: Vec<Interface>,
        ceilings: RateCeilings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            interfaces,
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
        for itf in &self.interfaces {
            if !self.bitrate.should_measure(&itf.name) {
                continue;
            }

            let stats: HomeLanStats =
                request_as(api, cancel, homelan_stats_request(&itf.name)).await?;

            let mut counters = Counters::new(stats.bytes_sent, stats.bytes_received);
            if itf.is_wan() {
                counters.swap();
            }

            let bitrates = self.bitrate.measure(&itf.name, counters);
            publish_bitrates(
                registry,
                (&HOMELAN_TX_MBITS, &HOMELAN_RX_MBITS),
                &[("interface", itf.name.as_str())],
                &bitrates,
                self.display_ceiling,
            );
        }

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

    #[tokio::test]
    async fn test_wan_interface_is_swapped() {
        let clock = ManualClock::new();
        let poller = InterfaceHomeLanMbits::with_clock(
            vec![
                Interface::new("veip0", "wan netdev statmon enabled"),
                Interface::new("eth1", "eth netdev statmon enabled"),
            ],
            RateCeilings::default(),
            clock.clone(),
        );
        let registry = Registry::new();
        registry.register_all(METRICS.iter().cloned());

        let device = FakeDevice::new();
        for key in ["HomeLan.Interface.veip0.Stats/get", "HomeLan.Interface.eth1.Stats/get"] {
            device
                .reply(key, json!({"BytesSent": 0, "BytesReceived": 0}))
                .reply(key, json!({"BytesSent": 3_875_000, "BytesReceived": 0}));
        }
        let cancel = CancellationToken::new();

        poller.poll(&device, &registry, &cancel).await.unwrap();
        clock.advance(Duration::from_secs(31));
        poller.poll(&device, &registry, &cancel).await.unwrap();

        let get = |desc: &MetricDesc, itf| registry.get(desc.name, &[("interface", itf)]);
        assert_eq!(get(&HOMELAN_RX_MBITS, "veip0"), Some(1.0));
        assert_eq!(get(&HOMELAN_TX_MBITS, "veip0"), Some(0.0));
        assert_eq!(get(&HOMELAN_TX_MBITS, "eth1"), Some(1.0));
        assert_eq!(get(&HOMELAN_RX_MBITS, "eth1"), Some(0.0));
    }

    #[tokio::test]
    async fn test_interfaces_are_read_once_per_refresh() {
        let clock = ManualClock::new();
        let poller = InterfaceHomeLanMbits::with_clock(
            vec![Interface::new("eth1", "eth")],
            RateCeilings::default(),
            clock.clone(),
        );
        let registry = Registry::new();
        let device = FakeDevice::new();
        device.reply(
            "HomeLan.Interface.eth1.Stats/get",
            json!({"BytesSent": 1, "BytesReceived": 1}),
        );
        let cancel = CancellationToken::new();

        poller.poll(&device, &registry, &cancel).await.unwrap();
        clock.advance(Duration::from_secs(10));
        poller.poll(&device, &registry, &cancel).await.unwrap();
        assert_eq!(device.call_count("HomeLan.Interface.eth1.Stats/get"), 1);

        clock.advance(Duration::from_secs(21));
        poller.poll(&device, &registry, &cancel).await.unwrap();
        assert_eq!(device.call_count("HomeLan.Interface.eth1.Stats/get"), 2);
    }

    #[tokio::test]
    async fn test_counter_reset_is_not_published() {
        let clock = ManualClock::new();
        let poller = InterfaceHomeLanMbits::with_clock(
            vec![Interface::new("eth1", "eth")],
            RateCeilings::default(),
            clock.clone(),
        );
        let registry = Registry::new();
        registry.register_all(METRICS.iter().cloned());
        let key = "HomeLan.Interface.eth1.Stats/get";
        let device = FakeDevice::new();
        device
            .reply(key, json!({"BytesSent": 1_000_000, "BytesReceived": 0}))
            .reply(key, json!({"BytesSent": 10, "BytesReceived": 3_875_000}));
        let cancel = CancellationToken::new();

        poller.poll(&device, &registry, &cancel).await.unwrap();
        clock.advance(Duration::from_secs(31));
        poller.poll(&device, &registry, &cancel).await.unwrap();

        assert_eq!(
            registry.get(HOMELAN_TX_MBITS.name, &[("interface", "eth1")]),
            None
        );
        assert_eq!(
            registry.get(HOMELAN_RX_MBITS.name, &[("interface", "eth1")]),
            Some(1.0)
        );
    }
}
