use crate::bitrate::{RateCeilings, DEFAULT_MAX_DISPLAY_MBITS, DEFAULT_MAX_MEASURED_MBITS};
use crate::client::livebox::{DEFAULT_ADDRESS, DEFAULT_USERNAME};
use crate::client::{LiveboxClient, LiveboxConfig};
use crate::discovery::discover_interfaces;
use crate::metrics::Registry;
use crate::poller::scheduler::Scheduler;
use crate::poller::{Experimental, PollTask, PollerSet};
use crate::system::log_startup_info;
use crate::web;
use clap::{Args, Parser};
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How long the web server gets to drain once polling has stopped.
const WEB_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Common arguments
#[derive(Debug, Args, Clone)]
pub struct CommonArgs {
    #[clap(
        long,
        default_value = ":8080",
        help = "Listening address of the metrics endpoint"
    )]
    pub listen: String,

    #[clap(
        long,
        default_value = "30",
        help = "Polling frequency (seconds)"
    )]
    pub polling_frequency: u64,

    #[clap(
        long,
        default_value = "60",
        help = "Maximum duration of one polling tick (seconds)"
    )]
    pub tick_timeout: u64,

    #[clap(
        long,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace)"
    )]
    pub log_level: String,

    #[clap(
        long,
        default_value = "",
        help = "Comma separated list of experimental metrics to enable (livebox_interface_homelan,livebox_interface_netdev,livebox_wan)"
    )]
    pub experimental: String,
}

/// Livebox connection arguments
#[derive(Debug, Args, Clone)]
pub struct DeviceArgs {
    #[clap(
        long,
        env = "LIVEBOX_ADDRESS",
        default_value = DEFAULT_ADDRESS,
        help = "Livebox address"
    )]
    pub address: String,

    #[clap(
        long,
        env = "ADMIN_PASSWORD",
        hide_env_values = true,
        help = "Livebox admin password (required)"
    )]
    pub password: String,

    #[clap(
        long,
        env = "LIVEBOX_CACERT",
        help = "PEM file with additional CA certificates trusted for the Livebox"
    )]
    pub cacert: Option<PathBuf>,

    #[clap(
        long,
        default_value = "10",
        help = "Timeout of a single request to the Livebox (seconds)"
    )]
    pub request_timeout: u64,
}

/// Bitrate ceilings
#[derive(Debug, Args, Clone)]
pub struct RateArgs {
    #[clap(
        long,
        default_value_t = DEFAULT_MAX_MEASURED_MBITS,
        help = "Measured bitrates above this value (Mbit/s) are discarded"
    )]
    pub max_measured_mbits: f64,

    #[clap(
        long,
        default_value_t = DEFAULT_MAX_DISPLAY_MBITS,
        help = "Published bitrates are clamped to this value (Mbit/s)"
    )]
    pub max_display_mbits: f64,
}

#[derive(Debug, Parser, Clone)]
#[clap(name = "livebox-exporter")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
#[clap(about = "Prometheus exporter for Livebox bandwidth and device statistics")]
pub struct Options {
    #[clap(flatten)]
    pub common: CommonArgs,

    #[clap(flatten)]
    pub device: DeviceArgs,

    #[clap(flatten)]
    pub rate: RateArgs,
}

impl Options {
    pub fn listen(&self) -> &str {
        &self.common.listen
    }

    pub fn polling_frequency(&self) -> Duration {
        Duration::from_secs(self.common.polling_frequency)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.common.tick_timeout)
    }

    pub fn log_level(&self) -> &str {
        &self.common.log_level
    }

    pub fn experimental(&self) -> &str {
        &self.common.experimental
    }

    pub fn address(&self) -> &str {
        &self.device.address
    }

    pub fn cacert(&self) -> Option<&PathBuf> {
        self.device.cacert.as_ref()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.device.request_timeout)
    }

    pub fn rate_ceilings(&self) -> RateCeilings {
        RateCeilings {
            measured: self.rate.max_measured_mbits,
            display: self.rate.max_display_mbits,
        }
    }

    pub fn livebox_config(&self) -> LiveboxConfig {
        LiveboxConfig {
            address: self.device.address.clone(),
            username: DEFAULT_USERNAME.to_string(),
            password: self.device.password.clone(),
            ca_cert: self.device.cacert.clone(),
            request_timeout: self.request_timeout(),
        }
    }
}

// Validate arguments
fn validate_arguments(opt: &Options) -> Result<LevelFilter, anyhow::Error> {
    if opt.common.polling_frequency == 0 {
        return Err(anyhow::anyhow!("polling_frequency must be greater than 0"));
    }

    if opt.common.tick_timeout == 0 {
        return Err(anyhow::anyhow!("tick_timeout must be greater than 0"));
    }

    if opt.device.request_timeout == 0 {
        return Err(anyhow::anyhow!("request_timeout must be greater than 0"));
    }

    if opt.device.password.is_empty() {
        return Err(anyhow::anyhow!(
            "Livebox admin password is required (--password or ADMIN_PASSWORD)"
        ));
    }

    let ceilings = opt.rate_ceilings();
    if [ceilings.measured, ceilings.display]
        .iter()
        .any(|v| !v.is_finite() || *v <= 0.0)
    {
        return Err(anyhow::anyhow!(
            "max_measured_mbits and max_display_mbits must be greater than 0"
        ));
    }

    LevelFilter::from_str(opt.log_level())
        .map_err(|_| anyhow::anyhow!("Invalid log level '{}'", opt.log_level()))
}

// Build the default tasks and the enabled experimental ones. Interfaces are
// discovered once here for the experimental pollers that need them.
// Returns `None` when shutdown is requested during discovery.
async fn create_poll_tasks(
    client: &LiveboxClient,
    experimental: &[Experimental],
    ceilings: RateCeilings,
    shutdown: &CancellationToken,
) -> Result<Option<Vec<PollTask>>, anyhow::Error> {
    let mut tasks = PollTask::defaults(ceilings);

    let interfaces = if experimental.iter().any(|e| e.needs_interfaces()) {
        match discover_interfaces(client, shutdown).await {
            Ok(interfaces) => interfaces,
            Err(_) if shutdown.is_cancelled() => return Ok(None),
            Err(e) => return Err(anyhow::anyhow!("Failed to discover interfaces: {}", e)),
        }
    } else {
        Vec::new()
    };

    for exp in experimental {
        tasks.push(PollTask::experimental(*exp, &interfaces, ceilings));
    }

    Ok(Some(tasks))
}

// Run service: start the web server and poll until shutdown
async fn run_service(options: &Options, experimental: &[Experimental]) -> Result<(), anyhow::Error> {
    let shutdown = CancellationToken::new();
    let shutdown_on_signal = shutdown.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, gracefully shutting down...");
            shutdown_on_signal.cancel();
        }
    });

    let client = Arc::new(LiveboxClient::new(options.livebox_config())?);
    let Some(tasks) =
        create_poll_tasks(&client, experimental, options.rate_ceilings(), &shutdown).await?
    else {
        info!("Shutdown requested during interface discovery, program exiting");
        return Ok(());
    };

    let registry = Arc::new(Registry::new());
    let pollers = PollerSet::new(Arc::clone(&client), Arc::clone(&registry), tasks);
    info!("Enabled pollers: {}", pollers.task_names().join(", "));

    let scheduler = Scheduler::new(
        pollers,
        Arc::clone(&registry),
        options.polling_frequency(),
        options.tick_timeout(),
    );
    info!(
        "Polling every {} seconds",
        scheduler.polling_frequency().as_secs()
    );

    let listen = options.listen().to_string();
    let registry_for_web = Arc::clone(&registry);
    let shutdown_for_web = shutdown.clone();
    let mut web_task = tokio::spawn(async move {
        if let Err(e) = web::start_server(&listen, registry_for_web, shutdown_for_web).await {
            log::error!("Web server error: {}", e);
        }
    });

    let result = scheduler.run(shutdown.clone()).await;

    // Polling stopped on its own after a fatal error: stop the web server too.
    shutdown.cancel();
    match tokio::time::timeout(WEB_SHUTDOWN_GRACE, &mut web_task).await {
        Ok(Err(e)) => log::error!("Web server task error: {}", e),
        Ok(Ok(())) => {}
        Err(_) => {
            log::warn!("Web server did not stop in time, aborting");
            web_task.abort();
        }
    }

    result?;
    info!("All tasks stopped, program exiting");

    Ok(())
}

pub async fn run(options: Options) -> Result<(), anyhow::Error> {
    let level = validate_arguments(&options)?;

    env_logger::Builder::new()
        .filter(None, level)
        .target(env_logger::Target::Stdout)
        .init();

    let experimental = Experimental::parse_list(options.experimental());

    log_startup_info(&options, &experimental);

    run_service(&options, &experimental).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        let mut argv = vec!["livebox-exporter"];
        argv.extend_from_slice(args);
        Options::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let opt = parse(&["--password", "secret"]);

        assert_eq!(opt.listen(), ":8080");
        assert_eq!(opt.polling_frequency(), Duration::from_secs(30));
        assert_eq!(opt.tick_timeout(), Duration::from_secs(60));
        assert_eq!(opt.request_timeout(), Duration::from_secs(10));
        assert_eq!(opt.rate_ceilings().measured, 10000.0);
        assert_eq!(opt.rate_ceilings().display, 2150.0);
        assert!(opt.cacert().is_none());
        assert_eq!(validate_arguments(&opt).unwrap(), LevelFilter::Info);

        let config = opt.livebox_config();
        assert_eq!(config.username, "admin");
        assert_eq!(config.password, "secret");
    }

    #[test]
    fn test_invalid_arguments_are_rejected() {
        for args in [
            &["--password", "secret", "--polling-frequency", "0"][..],
            &["--password", "secret", "--tick-timeout", "0"],
            &["--password", "secret", "--max-display-mbits", "0"],
            &["--password", "secret", "--log-level", "loud"],
            &["--password", ""],
        ] {
            assert!(validate_arguments(&parse(args)).is_err(), "{:?}", args);
        }
    }

    #[test]
    fn test_ceilings_are_independent() {
        let opt = parse(&[
            "--password",
            "secret",
            "--max-measured-mbits",
            "5000",
            "--max-display-mbits",
            "1000",
        ]);
        let ceilings = opt.rate_ceilings();
        assert_eq!(ceilings.measured, 5000.0);
        assert_eq!(ceilings.display, 1000.0);
    }

    #[tokio::test]
    async fn test_shutdown_during_discovery_is_not_an_error() {
        let opt = parse(&["--password", "secret", "--address", "http://127.0.0.1:1"]);
        let client = LiveboxClient::new(opt.livebox_config()).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let tasks = create_poll_tasks(
            &client,
            &[Experimental::InterfaceHomeLan],
            opt.rate_ceilings(),
            &shutdown,
        )
        .await
        .unwrap();
        assert!(tasks.is_none());

        let tasks = create_poll_tasks(&client, &[Experimental::Wan], opt.rate_ceilings(), &shutdown)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tasks.len(), 4);
    }
}
