//! mtroute - live network path diagnostics
//!
//! This is the command-line interface for the mtroute library.

#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;
use mtroute::config::{
    DEFAULT_INTERVAL_MS, DEFAULT_MAX_HOPS, DEFAULT_PACKET_SIZE, PATH_ANALYSIS_PACKET_COUNT,
};
use mtroute::{
    DiscoveryError, DnsServer, Finding, HopState, IpPreference, RecentHosts, SessionConfig,
    SessionController, SessionError, SessionEvent, SessionHandle, TransportError,
};
use std::io::IsTerminal;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Get the version string for mtroute
fn get_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "-UNRELEASED")
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Command-line arguments for the path diagnostics tool.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Live route monitoring, per-hop loss analysis and automatic diagnosis", long_about = None)]
struct Args {
    /// Target hostname or IP address
    host: String,

    /// Maximum number of hops to discover
    #[clap(short = 'm', long, default_value_t = DEFAULT_MAX_HOPS)]
    max_hops: u8,

    /// Interval between monitoring cycles in milliseconds
    #[clap(short = 'i', long, default_value_t = DEFAULT_INTERVAL_MS)]
    interval_ms: u64,

    /// Payload size of monitoring probes in bytes
    #[clap(short = 's', long, default_value_t = DEFAULT_PACKET_SIZE)]
    packet_size: usize,

    /// Echoes sent to each hop by the path analysis
    #[clap(short = 'c', long, default_value_t = PATH_ANALYSIS_PACKET_COUNT)]
    packets_per_hop: u32,

    /// Disable reverse DNS lookups
    #[clap(long)]
    no_rdns: bool,

    /// DNS server used when the platform resolver fails and for reverse lookups
    #[clap(long, value_enum, default_value_t = DnsServer::System)]
    dns_server: DnsServer,

    /// Prefer IPv6 addresses when resolving the target
    #[clap(short = '6', long)]
    prefer_ipv6: bool,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[clap(short = 'd', long)]
    duration: Option<u64>,

    /// Do not record the target in the recent hosts list
    #[clap(long)]
    no_history: bool,

    /// Print the final result as JSON instead of tables
    #[clap(long)]
    json: bool,

    /// Enable verbose output (use -vv for debug logs)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// JSON output structure for a finished session
#[derive(Debug, serde::Serialize)]
struct JsonOutput {
    version: String,
    target: String,
    hops: Vec<HopState>,
    findings: Vec<Finding>,
    path_report: String,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mtroute={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    if let Err(e) = runtime.block_on(async_main(args)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn async_main(args: Args) -> Result<()> {
    let preference = if args.prefer_ipv6 {
        IpPreference::PreferIpv6
    } else {
        IpPreference::PreferIpv4
    };
    let config = SessionConfig::builder()
        .max_hops(args.max_hops)
        .interval(Duration::from_millis(args.interval_ms))
        .packet_size(args.packet_size)
        .packets_per_hop(args.packets_per_hop)
        .resolve_names(!args.no_rdns)
        .dns_server(args.dns_server)
        .ip_preference(preference)
        .build()
        .map_err(anyhow::Error::msg)?;
    let refresh = config.timing.refresh_interval;
    let resolve_names = config.resolve_names;

    if !args.no_history {
        if let Some(history) = RecentHosts::open() {
            history.save(&args.host);
        }
    }

    info!("Starting mtroute {} against {}", get_version(), args.host);
    let controller = SessionController::from_config(config);
    let (session, mut events) = controller.start(&args.host)?;

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let interactive = !args.json && std::io::stdout().is_terminal();
    let mut tick = tokio::time::interval(refresh);
    let mut status = format!("Starting session for {}...", args.host);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = wait_until(deadline) => break,
            Some(event) = events.recv() => {
                if let SessionEvent::Status(line) = event {
                    status = line;
                }
            }
            _ = tick.tick() => {
                if session.is_finished() {
                    break;
                }
                if interactive {
                    print!("\x1b[2J\x1b[H");
                    println!("{}", render_live(&session, &status, resolve_names));
                }
            }
        }
    }

    match session.stop().await {
        Ok(()) => {}
        Err(SessionError::Discovery(DiscoveryError::Transport(
            TransportError::InsufficientPermissions {
                required,
                suggestion,
            },
        ))) => {
            eprintln!("Error: Insufficient permissions");
            eprintln!("Required: {}", required);
            eprintln!("Suggestion: {}", suggestion);
            eprintln!(
                "\nTo run with elevated privileges: sudo {}",
                std::env::args().collect::<Vec<_>>().join(" ")
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }

    if args.json {
        let output = JsonOutput {
            version: get_version().to_string(),
            target: session.target().to_string(),
            hops: session.snapshot(),
            findings: session.diagnose(),
            path_report: session.path_report(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", render_live(&session, "Session stopped", resolve_names));
        let report = session.path_report();
        if !report.is_empty() {
            println!("\n{}", report);
        }
    }
    Ok(())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn render_live(session: &SessionHandle, status: &str, resolve_names: bool) -> String {
    let hops = session.snapshot();
    let mut out = format!("mtroute {} to {}\n{}\n\n", get_version(), session.target(), status);
    out.push_str(&render_table(&hops, resolve_names));
    out.push_str("\nDiagnosis:\n");
    out.push_str(&render_findings(&session.diagnose()));
    out
}

/// Keep cell text within `width` characters
fn fit(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('~');
    cut
}

fn ms_cell(value: Option<f64>) -> String {
    match value {
        Some(v) if v > 0.0 => format!("{:.1}", v),
        _ => "*".to_string(),
    }
}

fn render_table(hops: &[HopState], resolve_names: bool) -> String {
    let mut out = format!(
        "{:>3}  {:<36} {:<26} {:<22} {:>6} {:>5} {:>6} {:>6} {:>6} {:>6} {:>6}\n",
        "Hop", "Host", "ASN", "Location", "Loss%", "Sent", "Last", "Avg", "Best", "Worst", "Jitter"
    );
    for hop in hops {
        let host = if hop.is_resolving_hostname {
            format!("{} (resolving...)", hop.address_text())
        } else {
            hop.display_name(resolve_names)
        };
        let (asn, location) = if hop.is_fetching_geo_info {
            ("looking up...".to_string(), "looking up...".to_string())
        } else {
            (hop.asn_info.clone(), hop.location.clone())
        };
        let loss = if hop.total_probes_sent == 0 {
            "N/A".to_string()
        } else {
            format!("{:.1}%", hop.loss_percent())
        };
        let last = hop
            .last_rtt
            .map_or_else(|| "*".to_string(), |r| r.to_string());
        let best = hop
            .best_rtt
            .map_or_else(|| "*".to_string(), |r| r.to_string());
        let worst = if hop.worst_rtt > 0 {
            hop.worst_rtt.to_string()
        } else {
            "*".to_string()
        };
        out.push_str(&format!(
            "{:>3}  {:<36} {:<26} {:<22} {:>6} {:>5} {:>6} {:>6} {:>6} {:>6} {:>6}\n",
            hop.hop_number,
            fit(&host, 36),
            fit(&asn, 26),
            fit(&location, 22),
            loss,
            hop.total_probes_sent,
            last,
            ms_cell(hop.average_rtt()),
            best,
            worst,
            ms_cell(Some(hop.jitter)),
        ));
    }
    out
}

fn render_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| {
            if f.emphasize {
                format!("{}\n", f.message)
            } else {
                format!("    {}\n", f.message)
            }
        })
        .collect()
}
