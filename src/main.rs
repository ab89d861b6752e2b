//! drishti-relay - media buffer relay daemon
//!
//! Accepts camera (reader) and headset (writer) peers on one TCP port,
//! reassembles chunked media messages into pooled buffers and fans them
//! out according to the configured switching strategy.

use drishti_relay::app::RelayApp;
use drishti_relay::config::RelayConfig;
use drishti_relay::error::{Error, Result};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `drishti-relay <path>` (positional)
/// - `drishti-relay --config <path>` (flag-based)
/// - `drishti-relay -c <path>` (short flag)
///
/// Defaults to `/etc/drishti-relay.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/drishti-relay.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = RelayConfig::from_file(&config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("drishti-relay v0.3.0 starting");
    log::info!("using config: {config_path}");
    log::info!(
        "pool: {} buffers of {} bytes, strategy: {}",
        config.pool.buffer_count,
        config.pool.buffer_capacity,
        config.routing.strategy
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("error setting Ctrl-C handler: {e}")))?;

    let app = RelayApp::new(&config)?;
    app.run(&running)?;

    log::info!("drishti-relay stopped");
    Ok(())
}
