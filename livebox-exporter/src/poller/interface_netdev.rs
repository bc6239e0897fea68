use super::publish_bitrates;
use crate::bitrate::clock::{Clock, SystemClock};
use crate::bitrate::{BitrateCalculator, RateCeilings};
use crate::client::{request_as, DeviceApi, Request};
use crate::error::ClientError;
use crate::metrics::{MetricDesc, Registry};
use livebox_exporter_common::{Counters, Interface};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest tick interval the netdev statistics are usable with.
pub const MAX_POLLING_INTERVAL: Duration = Duration::from_secs(5);

pub const NETDEV_TX_MBITS: MetricDesc = MetricDesc::gauge(
    "livebox_interface_netdev_tx_mbits",
    "Transmitted Mbits per second.",
    &["interface"],
);
pub const NETDEV_RX_MBITS: MetricDesc = MetricDesc::gauge(
    "livebox_interface_netdev_rx_mbits",
    "Received Mbits per second.",
    &["interface"],
);

pub static METRICS: [MetricDesc; 2] = [NETDEV_TX_MBITS, NETDEV_RX_MBITS];

#[derive(Debug, Deserialize)]
struct NetDevStats {
    #[serde(rename = "TxBytes")]
    tx_bytes: u64,
    #[serde(rename = "RxBytes")]
    rx_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct SsidStats {
    #[serde(rename = "BytesSent")]
    bytes_sent: u64,
    #[serde(rename = "BytesReceived")]
    bytes_received: u64,
}

/// Per-interface bandwidth from the NeMo netdev statistics. WLAN access
/// points report through the SSID statistics instead.
#[derive(Debug)]
pub struct InterfaceNetDevMbits {
    interfaces: Vec<Interface>,
    bitrate: BitrateCalculator,
    display_ceiling: f64,
}

impl InterfaceNetDevMbits {
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
            bitrate: BitrateCalculator::with_clock(Duration::ZERO, clock)
                .with_max_mbits(ceilings.measured),
            display_ceiling: ceilings.display,
        }
    }

    async fn counters<A: DeviceApi>(
        &self,
        api: &A,
        cancel: &CancellationToken,
        itf: &Interface,
    ) -> Result<Counters, ClientError> {
        let service = format!("NeMo.Intf.{}", itf.name);

        if itf.is_wlan() {
            let stats: SsidStats =
                request_as(api, cancel, Request::new(service, "getSSIDStats")).await?;
            Ok(Counters::new(stats.bytes_sent, stats.bytes_received))
        } else {
            let stats: NetDevStats =
                request_as(api, cancel, Request::new(service, "getNetDevStats")).await?;
            Ok(Counters::new(stats.tx_bytes, stats.rx_bytes))
        }
    }

    pub async fn poll<A: DeviceApi>(
        &self,
        api: &A,
        registry: &Registry,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        for itf in &self.interfaces {
            let mut counters = self.counters(api, cancel, itf).await?;
            if !itf.is_wan() {
                counters.swap();
            }

            let bitrates = self.bitrate.measure(&itf.name, counters);
            publish_bitrates(
                registry,
                (&NETDEV_TX_MBITS, &NETDEV_RX_MBITS),
                &[("interface", itf.name.as_str())],
                &bitrates,
                self.display_ceiling,
            );
        }

        Ok(())
    }
}
