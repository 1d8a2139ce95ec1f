//! falconeye-resolver: standalone endpoint resolver
//!
//! Runs the resolution engine and prints every published base address to
//! stdout, one line per change, until interrupted.
//!
//! ## Configuration
//! - `--config <path>` or FALCONEYE_CONFIG: YAML configuration file
//! - FALCONEYE__*: per-key overrides (e.g. FALCONEYE__PROBE__TIMEOUT_MS=800)
//! - FALCONEYE_LOG: log filter (default: info)

use tracing::{error, info};

use falconeye_resolver::utils::bootstrap::{init_tracing, parse_config_path};
use falconeye_resolver::{Config, Engine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let engine = Engine::from_config(&config)?;
    let mut updates = engine.selector().subscribe();
    engine.start().await;
    info!(relay = %config.cloud_relay_url, "falconeye-resolver started");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let result = updates.borrow_and_update().clone();
                println!(
                    "{}\t{}\t{:?}",
                    result.selected_base,
                    if result.is_local { "local" } else { "cloud" },
                    result.link_kind()
                );
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    engine.stop();
    Ok(())
}
