use crate::command::Options;
use crate::poller::Experimental;
use crate::web::listen_address;
use log::{info, warn};
use std::env;
use std::fs;

// ---- Startup diagnostics ----
fn read_first_line(path: &str) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.lines().next().map(|l| l.trim().to_string()))
}

fn kernel_version() -> Option<String> {
    read_first_line("/proc/sys/kernel/osrelease")
}

fn hostname() -> Option<String> {
    read_first_line("/proc/sys/kernel/hostname").or_else(|| read_first_line("/etc/hostname"))
}

pub fn log_startup_info(options: &Options, experimental: &[Experimental]) {
    let cwd = env::current_dir()
        .ok()
        .and_then(|p| p.to_str().map(|s| s.to_string()))
        .unwrap_or_default();

    info!("livebox-exporter v{} started", env!("CARGO_PKG_VERSION"));
    info!("Host: {}", hostname().unwrap_or_else(|| "unknown".to_string()));
    info!("OS: {}", env::consts::OS);
    info!("Kernel: {}", kernel_version().unwrap_or_else(|| "unknown".to_string()));
    info!("Arch: {}", env::consts::ARCH);
    info!("Working directory: {}", cwd);
    info!("Listening address: {}", listen_address(options.listen()));
    info!("Livebox address: {}", options.address());
    match options.cacert() {
        Some(path) => info!("Livebox CA certificate: {}", path.display()),
        None => info!("Livebox CA certificate: system roots"),
    }
    info!("Polling frequency: {}s", options.polling_frequency().as_secs());
    info!("Tick timeout: {}s", options.tick_timeout().as_secs());
    info!("Request timeout: {}s", options.request_timeout().as_secs());
    let ceilings = options.rate_ceilings();
    info!(
        "Bitrate ceilings: measured {} Mbit/s, display {} Mbit/s",
        ceilings.measured, ceilings.display
    );
    info!("Log level: {}", options.log_level());

    if experimental.is_empty() {
        info!("Experimental metrics: None");
    } else {
        info!("Experimental metrics ({}):", experimental.len());
        for exp in experimental {
            info!("  • {}", exp.as_str());
        }
    }

    if options.cacert().is_some() && options.address().starts_with("http://") {
        warn!(
            "A CA certificate is configured but the Livebox address {} does not use https",
            options.address()
        );
    }
}
