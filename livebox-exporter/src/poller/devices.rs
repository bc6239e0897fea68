use crate::client::{request_as, DeviceApi, Request};
use crate::error::ClientError;
use crate::metrics::{MetricDesc, Registry};
use serde::de::IgnoredAny;
use serde_json::json;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

pub const DEVICES_TOTAL: MetricDesc = MetricDesc::gauge(
    "livebox_devices_total",
    "The total number of active devices",
    &["type"],
);

pub static METRICS: [MetricDesc; 1] = [DEVICES_TOTAL];

/// Counts active devices per type (ethernet, wifi, printer, dongle).
#[derive(Debug, Default)]
pub struct DevicesTotal;

impl DevicesTotal {
    pub fn new() -> Self {
        Self
    }

    pub async fn poll<A: DeviceApi>(
        &self,
        api: &A,
        registry: &Registry,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let request = Request::new("Devices", "get").param(
            "expression",
            json!({
                "ethernet": "not interface and not self and eth and .Active==true",
                "wifi": "not interface and not self and wifi and .Active==true",
                "printer": "printer and .Active==true",
                "dongle": "usb && wwan and .Active==true",
            }),
        );

        let devices: BTreeMap<String, Vec<IgnoredAny>> = request_as(api, cancel, request).await?;

        registry.replace_family(
            DEVICES_TOTAL.name,
            devices
                .iter()
                .map(|(kind, active)| (vec![("type", kind.as_str())], active.len() as f64)),
        );

        Ok(())
    }
}
