//! Poll tasks and their concurrent orchestration.
//!
//! Every [`PollTask`] reads some counters through the [`DeviceApi`], turns
//! them into observations and writes them to the [`Registry`]. A
//! [`PollerSet`] runs all tasks of a tick concurrently and reduces their
//! outcomes to a single result.

pub mod device_info;
pub mod devices;
pub mod interface;
pub mod interface_homelan;
pub mod interface_netdev;
pub mod scheduler;
pub mod wan;

use crate::bitrate::{sanitize_mbits, RateCeilings};
use crate::client::{DeviceApi, Request};
use crate::error::{ClientError, ErrorKind, PollError};
use crate::metrics::{MetricDesc, Registry};
use livebox_exporter_common::{BitrateSpec, Bitrates, Interface};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use device_info::DeviceInfo;
pub use devices::DevicesTotal;
pub use interface::InterfaceMbits;
pub use interface_homelan::InterfaceHomeLanMbits;
pub use interface_netdev::InterfaceNetDevMbits;
pub use wan::WanMbits;

/// The device refreshes its HomeLan statistics every 30 seconds.
pub const HOMELAN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// A task running longer than this is reported as slow.
pub const SLOW_POLL_THRESHOLD: Duration = Duration::from_secs(10);

/// Metrics that are only polled when enabled with `--experimental`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Experimental {
    InterfaceHomeLan,
    InterfaceNetDev,
    Wan,
}

impl Experimental {
    pub const ALL: [Experimental; 3] = [
        Experimental::InterfaceHomeLan,
        Experimental::InterfaceNetDev,
        Experimental::Wan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Experimental::InterfaceHomeLan => "livebox_interface_homelan",
            Experimental::InterfaceNetDev => "livebox_interface_netdev",
            Experimental::Wan => "livebox_wan",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }

    /// Whether the poller needs the interface list at construction.
    pub fn needs_interfaces(self) -> bool {
        matches!(
            self,
            Experimental::InterfaceHomeLan | Experimental::InterfaceNetDev
        )
    }

    /// Parses a comma-separated list of experimental metric names.
    ///
    /// Unknown names are logged and skipped, duplicates are ignored.
    pub fn parse_list(value: &str) -> Vec<Experimental> {
        let mut enabled = Vec::new();

        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match Self::from_name(name) {
                Some(exp) if enabled.contains(&exp) => {}
                Some(exp) => {
                    log::info!("Enabled experimental metrics: {}", name);
                    enabled.push(exp);
                }
                None => log::warn!(
                    "Unknown experimental metrics: {} (available: {})",
                    name,
                    Self::names()
                ),
            }
        }

        enabled
    }

    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// What the orchestrator needs from a task.
pub trait Pollable: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Metric families this task writes to.
    fn describe_metrics(&self) -> &'static [MetricDesc];

    /// Longest delay between two ticks this task tolerates.
    fn max_polling_interval(&self) -> Option<Duration> {
        None
    }

    fn poll<A: DeviceApi>(
        &self,
        api: &A,
        registry: &Registry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// A polling task. The set of tasks is closed; each variant owns the state
/// it needs between ticks.
pub enum PollTask {
    DevicesTotal(DevicesTotal),
    InterfaceMbits(InterfaceMbits),
    InterfaceHomeLanMbits(InterfaceHomeLanMbits),
    InterfaceNetDevMbits(InterfaceNetDevMbits),
    WanMbits(WanMbits),
    DeviceInfo(DeviceInfo),
}

impl PollTask {
    /// Tasks that always run.
    pub fn defaults(ceilings: RateCeilings) -> Vec<PollTask> {
        vec![
            PollTask::DevicesTotal(DevicesTotal::new()),
            PollTask::InterfaceMbits(InterfaceMbits::new(ceilings)),
            PollTask::DeviceInfo(DeviceInfo::new()),
        ]
    }

    pub fn experimental(
        experimental: Experimental,
        interfaces: &[Interface],
        ceilings: RateCeilings,
    ) -> PollTask {
        match experimental {
            Experimental::InterfaceHomeLan => PollTask::InterfaceHomeLanMbits(
                InterfaceHomeLanMbits::new(interfaces.to_vec(), ceilings),
            ),
            Experimental::InterfaceNetDev => PollTask::InterfaceNetDevMbits(
                InterfaceNetDevMbits::new(interfaces.to_vec(), ceilings),
            ),
            Experimental::Wan => PollTask::WanMbits(WanMbits::new(ceilings)),
        }
    }
}

impl Pollable for PollTask {
    fn name(&self) -> &'static str {
        match self {
            PollTask::DevicesTotal(_) => "DevicesTotal",
            PollTask::InterfaceMbits(_) => "InterfaceMbits",
            PollTask::InterfaceHomeLanMbits(_) => "InterfaceHomeLanMbits",
            PollTask::InterfaceNetDevMbits(_) => "InterfaceNetDevMbits",
            PollTask::WanMbits(_) => "WANMbits",
            PollTask::DeviceInfo(_) => "DeviceInfo",
        }
    }

    fn describe_metrics(&self) -> &'static [MetricDesc] {
        match self {
            PollTask::DevicesTotal(_) => &devices::METRICS,
            PollTask::InterfaceMbits(_) => &interface::METRICS,
            PollTask::InterfaceHomeLanMbits(_) => &interface_homelan::METRICS,
            PollTask::InterfaceNetDevMbits(_) => &interface_netdev::METRICS,
            PollTask::WanMbits(_) => &wan::METRICS,
            PollTask::DeviceInfo(_) => &device_info::METRICS,
        }
    }

    fn max_polling_interval(&self) -> Option<Duration> {
        match self {
            PollTask::InterfaceNetDevMbits(_) => Some(interface_netdev::MAX_POLLING_INTERVAL),
            _ => None,
        }
    }

    async fn poll<A: DeviceApi>(
        &self,
        api: &A,
        registry: &Registry,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        match self {
            PollTask::DevicesTotal(p) => p.poll(api, registry, cancel).await,
            PollTask::InterfaceMbits(p) => p.poll(api, registry, cancel).await,
            PollTask::InterfaceHomeLanMbits(p) => p.poll(api, registry, cancel).await,
            PollTask::InterfaceNetDevMbits(p) => p.poll(api, registry, cancel).await,
            PollTask::WanMbits(p) => p.poll(api, registry, cancel).await,
            PollTask::DeviceInfo(p) => p.poll(api, registry, cancel).await,
        }
    }
}

/// Runs a fixed set of tasks against one device.
pub struct PollerSet<A: DeviceApi, T: Pollable = PollTask> {
    api: Arc<A>,
    registry: Arc<Registry>,
    tasks: Vec<Arc<T>>,
}

impl<A: DeviceApi, T: Pollable> PollerSet<A, T> {
    /// Registers the metrics of every task.
    pub fn new(api: Arc<A>, registry: Arc<Registry>, tasks: Vec<T>) -> Self {
        for task in &tasks {
            registry.register_all(task.describe_metrics().iter().cloned());
        }

        Self {
            api,
            registry,
            tasks: tasks.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// The configured frequency, tightened to what every task tolerates.
    pub fn effective_polling_frequency(&self, configured: Duration) -> Duration {
        let mut frequency = configured;

        for task in &self.tasks {
            if let Some(max) = task.max_polling_interval() {
                if max < frequency {
                    log::warn!(
                        "{} requires a lower polling frequency, setting polling frequency to {} seconds",
                        task.name(),
                        max.as_secs()
                    );
                    frequency = max;
                }
            }
        }

        frequency
    }

    /// Runs every task once, concurrently.
    ///
    /// The first failure cancels `cancel` so that in-flight requests of the
    /// other tasks abort, but every task is waited for. The returned error is
    /// the first one that is not a cancellation, if any. A panicking task
    /// counts as a failed one.
    pub async fn poll(&self, cancel: &CancellationToken) -> Result<(), PollError> {
        let mut set = JoinSet::new();
        let mut names = HashMap::new();

        for task in &self.tasks {
            let task = Arc::clone(task);
            let api = Arc::clone(&self.api);
            let registry = Arc::clone(&self.registry);
            let cancel = cancel.clone();
            let name = task.name();

            let handle = set.spawn(async move {
                let started = Instant::now();
                let result = task.poll(api.as_ref(), &registry, &cancel).await;

                let elapsed = started.elapsed();
                if elapsed > SLOW_POLL_THRESHOLD {
                    log::warn!(
                        "Poller {} is slow: took {:.1}s",
                        task.name(),
                        elapsed.as_secs_f64()
                    );
                }

                result.map_err(|e| {
                    cancel.cancel();
                    PollError::new(task.name(), e)
                })
            });
            names.insert(handle.id(), name);
        }

        let mut first: Option<PollError> = None;

        while let Some(joined) = set.join_next_with_id().await {
            let err = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((_, Err(err))) => err,
                Err(e) => {
                    let task = names.get(&e.id()).copied().unwrap_or("unknown");
                    log::error!("Poller {} panicked: {}", task, e);
                    cancel.cancel();
                    PollError::new(task, ClientError::Panicked(e.to_string()))
                }
            };

            log::debug!("Poller failed: {}", err);
            let replaces = match &first {
                None => true,
                Some(prev) => {
                    prev.kind() == ErrorKind::Cancelled && err.kind() != ErrorKind::Cancelled
                }
            };
            if replaces {
                first = Some(err);
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Payload of `HomeLan.Interface.<name>.Stats/get`.
#[derive(Debug, Deserialize)]
struct HomeLanStats {
    #[serde(rename = "BytesSent")]
    bytes_sent: u64,
    #[serde(rename = "BytesReceived")]
    bytes_received: u64,
}

fn homelan_stats_request(interface: &str) -> Request {
    Request::new(format!("HomeLan.Interface.{}.Stats", interface), "get")
}

/// Writes the publishable channels of `bitrates`, clamped to `display_ceiling`.
fn publish_bitrates(
    registry: &Registry,
    (tx, rx): (&MetricDesc, &MetricDesc),
    labels: &[(&str, &str)],
    bitrates: &Bitrates,
    display_ceiling: f64,
) {
    if let Some(value) = BitrateSpec::publishable(bitrates.tx) {
        registry.set_gauge(tx.name, labels, sanitize_mbits(value, display_ceiling));
    }
    if let Some(value) = BitrateSpec::publishable(bitrates.rx) {
        registry.set_gauge(rx.name, labels, sanitize_mbits(value, display_ceiling));
    }
}
