//! Overlay OCPP Node - CLI for one node of the overlay network
//!
//! Runs a charging station, local controller, gateway or CSMS that routes
//! OCPP messages to its WebSocket neighbours.
//!
//! # Usage
//!
//! ```bash
//! # CSMS accepting gateways
//! overlay-ocpp-node --id csms --role csms --listen 0.0.0.0:9000 --route cs1=gw
//!
//! # Gateway between local controllers and the CSMS
//! overlay-ocpp-node --id gw --role gateway --listen 0.0.0.0:9100 \
//!     --upstream ws://localhost:9000/overlay --default-csms csms --route cs1=lc
//!
//! # Local controller speaking binary to its gateway
//! overlay-ocpp-node --id lc --role local-controller --listen 0.0.0.0:9200 \
//!     --upstream ws://localhost:9100/overlay --format binary --default-csms csms \
//!     --neighbor-role em1=energy-meter
//!
//! # Charging station
//! overlay-ocpp-node --id cs1 --role cs --upstream ws://localhost:9200/overlay
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use overlay_adapter_ocpp::{Adapter, AdapterConfig, UpstreamConfig};
use overlay_core::{NodeRole, WireFormat};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPP overlay network node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node identifier
    #[arg(short, long)]
    id: String,

    /// Node role (charging-station, energy-meter, local-controller, gateway, csms)
    #[arg(short, long, default_value = "charging-station")]
    role: NodeRole,

    /// Address to accept downstream neighbours on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Upstream WebSocket URL (this node's id is appended)
    #[arg(long)]
    upstream: Option<String>,

    /// Upstream node id, if the upstream does not announce it
    #[arg(long)]
    upstream_id: Option<String>,

    /// Framing on the upstream link (json, binary)
    #[arg(long, default_value = "json")]
    format: WireFormat,

    /// Default CSMS for requests addressed to "the CSMS"
    #[arg(long)]
    default_csms: Option<String>,

    /// Static routes as destination=next-hop (can be repeated)
    #[arg(long)]
    route: Vec<String>,

    /// Roles of neighbours as id=role, overriding what they declare (can be repeated)
    #[arg(long)]
    neighbor_role: Vec<String>,

    /// Seconds a local request waits for its answer
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Seconds a forwarded request is remembered
    #[arg(long, default_value = "60")]
    forward_timeout: u64,

    /// Heartbeat interval handed out by a CSMS, in seconds
    #[arg(long, default_value = "300")]
    heartbeat_interval: i32,

    /// Vendor name
    #[arg(long, default_value = "Elektrokombinacija")]
    vendor: String,

    /// Model name
    #[arg(long, default_value = "EK3-OCPP")]
    model: String,

    /// Do not send BootNotification on connect (stations only)
    #[arg(long)]
    no_boot: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
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
    println!("║              Overlay OCPP Node - Message Routing             ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Node:     {:<50} ║", args.id);
    println!("║  Role:     {:<50} ║", args.role.to_string());
    println!("║  Listen:   {:<50} ║", args.listen.map(|a| a.to_string()).unwrap_or_else(|| "-".into()));
    println!("║  Upstream: {:<50} ║", truncate(args.upstream.as_deref().unwrap_or("-"), 50));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Build configuration
    let mut config = AdapterConfig::new(args.id.as_str(), args.role)
        .with_vendor(&args.vendor, &args.model)
        .with_heartbeat_interval(args.heartbeat_interval)
        .with_request_timeout(Duration::from_secs(args.request_timeout))
        .with_forward_timeout(Duration::from_secs(args.forward_timeout));

    if let Some(addr) = args.listen {
        config = config.with_listen_addr(addr);
    }

    if let Some(url) = &args.upstream {
        let mut upstream = UpstreamConfig::new(url);
        upstream.format = args.format;
        upstream.node_id = args.upstream_id.as_deref().map(Into::into);
        config = config.with_upstream(upstream);
    }

    if let Some(csms) = &args.default_csms {
        config = config.with_default_csms(csms.as_str());
    }

    if args.no_boot {
        config = config.without_auto_boot();
    }

    // Add static routes
    for route in &args.route {
        match route.split_once('=') {
            Some((destination, next_hop)) if !destination.is_empty() && !next_hop.is_empty() => {
                config = config.with_route(destination, next_hop);
                info!("Added static route: {} via {}", destination, next_hop);
            }
            _ => eprintln!("Invalid route (expected destination=next-hop): {}", route),
        }
    }

    // Pin neighbour roles
    for pinned in &args.neighbor_role {
        let parsed = pinned
            .split_once('=')
            .and_then(|(neighbor, role)| Some((neighbor, role.parse::<NodeRole>().ok()?)));
        match parsed {
            Some((neighbor, role)) if !neighbor.is_empty() => {
                config = config.with_neighbor_role(neighbor, role);
                info!("Neighbour {} has role {}", neighbor, role);
            }
            _ => eprintln!("Invalid neighbour role (expected id=role): {}", pinned),
        }
    }

    info!("Starting overlay node...");

    // Create and run adapter
    let adapter = Adapter::new(config).await?;
    adapter.run().await?;

    Ok(())
}

/// Truncate string with ellipsis, counting characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let end = s.char_indices().nth(keep).map_or(s.len(), |(i, _)| i);
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_strings_unchanged() {
        assert_eq!(truncate("ws://gw:9000", 50), "ws://gw:9000");
        assert_eq!(truncate("", 5), "");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("abcdefghij", 8), "abcde...");

        let url = "ws://čvor-ž.example/overlay/ćšđ";
        let cut = truncate(url, 10);
        assert_eq!(cut, "ws://čv...");
        assert_eq!(cut.chars().count(), 10);
    }
}
