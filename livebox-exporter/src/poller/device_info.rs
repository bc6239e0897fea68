use crate::client::{request_as, DeviceApi, Request};
use crate::error::ClientError;
use crate::metrics::{MetricDesc, Registry};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub const UPTIME: MetricDesc = MetricDesc::gauge(
    "livebox_deviceinfo_uptime_seconds_total",
    "Livebox current uptime.",
    &[],
);
pub const REBOOTS: MetricDesc = MetricDesc::gauge(
    "livebox_deviceinfo_reboots_total",
    "Number of Livebox reboots.",
    &[],
);
pub const MEMORY_TOTAL: MetricDesc = MetricDesc::gauge(
    "livebox_deviceinfo_memory_total_bytes",
    "Livebox system total memory.",
    &[],
);
pub const MEMORY_USAGE: MetricDesc = MetricDesc::gauge(
    "livebox_deviceinfo_memory_usage_bytes",
    "Livebox system used memory.",
    &[],
);

pub static METRICS: [MetricDesc; 4] = [UPTIME, REBOOTS, MEMORY_TOTAL, MEMORY_USAGE];

#[derive(Debug, Deserialize)]
struct Info {
    #[serde(rename = "UpTime")]
    up_time: f64,
}

#[derive(Debug, Deserialize)]
struct Reboot {
    #[serde(rename = "BootCounter")]
    boot_counter: f64,
}

/// Sizes in KiB.
#[derive(Debug, Deserialize)]
struct MemoryStatus {
    #[serde(rename = "Total")]
    total: f64,
    #[serde(rename = "Free")]
    free: f64,
}

/// Uptime, reboot count and memory of the device.
#[derive(Debug, Default)]
pub struct DeviceInfo;

impl DeviceInfo {
    pub fn new() -> Self {
        Self
    }

    pub async fn poll<A: DeviceApi>(
        &self,
        api: &A,
        registry: &Registry,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let (info, reboot, memory) = tokio::join!(
            request_as::<_, Info>(api, cancel, Request::new("DeviceInfo", "get")),
            request_as::<_, Reboot>(api, cancel, Request::new("NMC.Reboot", "get")),
            request_as::<_, MemoryStatus>(
                api,
                cancel,
                Request::new("DeviceInfo.MemoryStatus", "get")
            ),
        );

        // Each endpoint only drops its own gauges.
        let mut first_error = None;

        match info {
            Ok(info) => registry.set_gauge(UPTIME.name, &[], info.up_time),
            Err(e) => first_error = first_error.or(Some(e)),
        }
        match reboot {
            Ok(reboot) => registry.set_gauge(REBOOTS.name, &[], reboot.boot_counter),
            Err(e) => first_error = first_error.or(Some(e)),
        }
        match memory {
            Ok(memory) => {
                registry.set_gauge(MEMORY_TOTAL.name, &[], 1000.0 * memory.total);
                registry.set_gauge(MEMORY_USAGE.name, &[], 1000.0 * (memory.total - memory.free));
            }
            Err(e) => first_error = first_error.or(Some(e)),
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
