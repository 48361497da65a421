//! Bridges the eviqo EV-charger cloud WebSocket API to MQTT with Home
//! Assistant discovery. CLI and runtime bring-up follow the teacher's
//! `coredeck-daemon::main` shape: `clap` derive, `tracing-subscriber`
//! `EnvFilter`, a multi-thread tokio runtime.

mod bridge;
mod config;
mod discovery;
mod error;
mod model;
mod mqtt;
mod registry;
mod session;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use bridge::Bridge;
use config::Config;
use discovery::all_discovery_topics;

/// Bridges the eviqo EV-charger cloud WebSocket API to a local MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "eviqo-bridge", version, about)]
struct Cli {
    /// Enable debug logging regardless of EVIQO_LOG_LEVEL.
    #[arg(long)]
    debug: bool,

    /// Publish empty retained payloads to every discovery topic and exit.
    #[arg(long = "remove-discovery")]
    remove_discovery: bool,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let filter_default = if cli.debug { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_default)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(run(config, cli.remove_discovery));
    std::process::exit(exit_code);
}

async fn run(config: Config, remove_discovery: bool) -> i32 {
    if remove_discovery {
        return run_remove_discovery(config).await;
    }

    match Bridge::connect(config).await {
        Ok(bridge) => {
            bridge.run().await;
            0
        }
        Err(err) => {
            tracing::error!(error = %err, "fatal startup error");
            1
        }
    }
}

/// `--remove-discovery`: publish an empty retained payload to every
/// discovery topic the bridge would ever publish, then exit (§4.4, §8's
/// removal property). This still performs the handshake, since the set of
/// topics depends on each device's widget registry.
async fn run_remove_discovery(config: Config) -> i32 {
    let bridge_status_topic = config.bridge_status_topic();
    let (mqtt_client, _inbound) = match mqtt::Mqtt::connect(&config.mqtt_url, &bridge_status_topic) {
        Ok(pair) => pair,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect to mqtt");
            return 1;
        }
    };

    let (events_tx, _events_rx) = tokio::sync::mpsc::unbounded_channel();
    let session = session::SessionClient::new(events_tx);
    let pages = match session.connect(&config.email, &config.password).await {
        Ok(pages) => pages,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect to eviqo during --remove-discovery");
            return 1;
        }
    };

    for (device, page) in pages {
        let widget_registry = registry::WidgetRegistry::from_page(device.device_id, &page);
        for topic in all_discovery_topics(&config.discovery_prefix, &config.topic_prefix, device.device_id, &widget_registry) {
            mqtt_client.publish(&topic, Vec::<u8>::new(), true).await;
        }
    }

    session.close().await;
    0
}
