//! CSMS Node - OCPP 1.6 central system
//!
//! Runs the decision engine and command dispatcher on an in-memory store and
//! accepts charging stations over OCPP-J.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (ws://0.0.0.0:8180/steve/websocket/CentralSystemService/{id})
//! csms-node
//!
//! # Seed tags and shorten the heartbeat
//! csms-node --tag 04A2B3C4 --tag 04FFEE01 --blocked-tag DEADBEEF --heartbeat-interval 300
//!
//! # Ask every connected station for its status once a minute
//! csms-node --probe-interval-secs 60
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use csms_adapter_ocpp::ocpp::TriggerMessageResponse;
use csms_adapter_ocpp::{CentralServer, ConnectionRegistry, ServerConfig};
use csms_core::{
    AuthorizationTag, CentralSystem, DispatcherConfig, EngineConfig, MemoryStore, Outcome, Stores,
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPP 1.6 central system node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address for station WebSockets
    #[arg(short, long, default_value = "0.0.0.0:8180")]
    bind: SocketAddr,

    /// URL path prefix; stations connect to <path>/<stationId>
    #[arg(long, default_value = "/steve/websocket/CentralSystemService")]
    path: String,

    /// Heartbeat interval handed to stations on boot (seconds)
    #[arg(long, default_value = "14400")]
    heartbeat_interval: u64,

    /// Validity window of an accepted tag (hours)
    #[arg(long, default_value = "1")]
    tag_validity_hours: u64,

    /// Time a station has to answer a command (seconds)
    #[arg(long, default_value = "30")]
    call_timeout_secs: u64,

    /// Status probe interval for connected stations (seconds, 0 = off)
    #[arg(long, default_value = "0")]
    probe_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Accepted tag id (can be repeated)
    #[arg(long)]
    tag: Vec<String>,

    /// Blocked tag id (can be repeated)
    #[arg(long)]
    blocked_tag: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              CSMS Node - OCPP 1.6 Central System             ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Listen:    {:<49} ║", args.bind);
    println!("║  Path:      {:<49} ║", truncate(&args.path, 49));
    println!("║  Heartbeat: {:<49} ║", format!("{} s", args.heartbeat_interval));
    println!("║  Tags:      {:<49} ║", format!("{} accepted, {} blocked", args.tag.len(), args.blocked_tag.len()));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Seed tag store
    let store = Arc::new(MemoryStore::new());
    for tag in &args.tag {
        store.put_tag(AuthorizationTag::new(tag.as_str()));
    }
    for tag in &args.blocked_tag {
        store.put_tag(AuthorizationTag::new(tag.as_str()).blocked());
    }

    let call_timeout = Duration::from_secs(args.call_timeout_secs);
    let engine_config = EngineConfig::default()
        .with_heartbeat_interval(args.heartbeat_interval)
        .with_tag_validity_hours(args.tag_validity_hours);
    let dispatcher_config = DispatcherConfig::default().with_delivery_timeout(call_timeout);

    let connections = Arc::new(ConnectionRegistry::new());
    let central = Arc::new(CentralSystem::new(
        engine_config,
        dispatcher_config,
        Stores::memory(store),
        connections.clone(),
    ));

    let server_config = ServerConfig::new(args.bind).with_path(&args.path);
    let server = CentralServer::new(server_config, central.engine().clone(), connections.clone());

    if args.probe_interval_secs > 0 {
        tokio::spawn(probe_loop(
            central.clone(),
            connections,
            Duration::from_secs(args.probe_interval_secs),
            call_timeout,
        ));
    }

    info!("Starting central system...");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

/// Periodically ask every connected station to re-send its status
async fn probe_loop(
    central: Arc<CentralSystem>,
    connections: Arc<ConnectionRegistry>,
    every: Duration,
    call_timeout: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let stations = connections.connected_stations();
        if stations.is_empty() {
            continue;
        }

        let task_id = match central.dispatcher().heartbeat_probe(stations) {
            Ok(id) => id,
            Err(e) => {
                error!("Status probe not dispatched: {}", e);
                continue;
            }
        };

        let Some(snapshot) = central
            .wait_task(task_id, call_timeout + Duration::from_secs(1))
            .await
        else {
            continue;
        };

        for (station_id, outcome) in &snapshot.results {
            match outcome {
                Outcome::Success { payload } => match TriggerMessageResponse::from_payload(payload) {
                    Ok(response) => {
                        info!("Probe {}: {} answered {:?}", task_id, station_id, response.status)
                    }
                    Err(e) => warn!("Probe {}: {} sent unexpected payload: {}", task_id, station_id, e),
                },
                Outcome::Failure(reason) => warn!("Probe {}: {} {}", task_id, station_id, reason),
                Outcome::Pending => warn!("Probe {}: {} still pending", task_id, station_id),
            }
        }
    }
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("/ocpp", 10), "/ocpp");
        assert_eq!(truncate("/steve/websocket", 10), "/steve/...");
        assert_eq!(truncate("/čćžšđčćžšđčć", 10), "/čćžšđč...");
    }
}
