use crate::client::{request_as, DeviceApi, Request};
use crate::error::ClientError;
use livebox_exporter_common::Interface;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const DISCOVERY_SERVICE: &str = "NeMo.Intf.data";
const DISCOVERY_METHOD: &str = "getMIBs";
/// Only interfaces with statistics that are enabled and not a VLAN.
const DISCOVERY_FLAG: &str = "statmon && !vlan && enabled";

#[derive(Debug, Deserialize)]
struct Mibs {
    #[serde(default)]
    base: BTreeMap<String, MibBase>,
}

#[derive(Debug, Deserialize)]
struct MibBase {
    #[serde(default)]
    flags: String,
}

/// Lists the network interfaces of the device, sorted by name.
pub async fn discover_interfaces<A: DeviceApi>(
    api: &A,
    cancel: &CancellationToken,
) -> Result<Vec<Interface>, ClientError> {
    let request = Request::new(DISCOVERY_SERVICE, DISCOVERY_METHOD)
        .param("traverse", "all")
        .param("flag", DISCOVERY_FLAG);

    let mibs: Mibs = request_as(api, cancel, request).await?;
    if mibs.base.is_empty() {
        return Err(ClientError::Device {
            service: DISCOVERY_SERVICE.to_string(),
            method: DISCOVERY_METHOD.to_string(),
            description: "no interfaces found".to_string(),
        });
    }

    let interfaces: Vec<Interface> = mibs
        .base
        .into_iter()
        .map(|(name, mib)| Interface::new(name, mib.flags))
        .collect();

    log::debug!(
        "Discovered {} interfaces: {}",
        interfaces.len(),
        interfaces
            .iter()
            .map(|i| i.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(interfaces)
}
