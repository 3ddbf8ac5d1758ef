// Demos are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Interactive lease console.
//!
//! Starts dnsmasq on an interface (or attaches to one already running) and
//! answers lease queries typed on standard input:
//!
//! - an empty line lists every known lease
//! - a MAC address prints the IPv4 address leased to it
//! - `exit` (or Ctrl-D / Ctrl-C) stops the server and quits
//!
//! # Usage
//!
//! ```bash
//! # Launch dnsmasq on eth1 with 5 minute leases (needs sudo)
//! cargo run --example console -- eth1 --lease-time 5m
//!
//! # Only observe an already running dnsmasq
//! cargo run --example console -- eth1 --monitor-only
//!
//! # Use a TOML configuration file
//! cargo run --example console -- --config dhcpwatch.toml
//! ```

use std::sync::Arc;

use dhcpwatch::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

struct Args {
    interface: Option<String>,
    config: Option<String>,
    lease_time: Option<LeaseTime>,
    monitor_only: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        interface: None,
        config: None,
        lease_time: None,
        monitor_only: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = iter.next(),
            "--lease-time" => {
                let value = iter.next().expect("--lease-time needs a value");
                args.lease_time = Some(value.parse().expect("invalid lease time"));
            }
            "--monitor-only" => args.monitor_only = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => args.interface = Some(arg),
        }
    }
    args
}

fn print_help() {
    println!("Usage: console [INTERFACE] [--config FILE] [--lease-time T] [--monitor-only]");
    println!();
    println!("Type a MAC address to look up its lease, an empty line to list all");
    println!("leases, or 'exit' to quit.");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = parse_args();
    let config = match args.config {
        Some(ref path) => HarnessConfig::load(path).expect("failed to load configuration"),
        None => HarnessConfig::default(),
    };

    let mut controller = Controller::new(
        config,
        Arc::new(SystemRunner::new()),
        Arc::new(DbusConnector::system()),
    );
    if let Some(lease_time) = args.lease_time {
        controller.set_lease_time(lease_time).expect("invalid lease time");
    }

    let ifname = args.interface.as_deref();
    let started = if args.monitor_only {
        controller.restart_monitoring_server(ifname).await
    } else {
        controller.start(ifname, None).await
    };
    if let Err(e) = started {
        eprintln!("failed to start: {e}");
        controller.stop().await.ok();
        std::process::exit(1);
    }

    println!(
        "Watching leases on {}. Empty line lists leases, 'exit' quits.",
        controller.current_interface().unwrap_or("?")
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Ok(Some(line)) = line else { break };
        let line = line.trim();

        let result = match line {
            "exit" => break,
            "" => controller.log_leases().map(|leases| {
                for lease in leases {
                    println!("{lease}");
                }
            }),
            mac => controller.find_ip_for_mac(mac).map(|ip| match ip {
                Some(ip) => println!("{mac} -> {ip}"),
                None => println!("{mac} has no lease"),
            }),
        };
        if let Err(e) = result {
            eprintln!("error: {e}");
            if e.is_fatal() {
                break;
            }
        }
    }

    if args.monitor_only {
        controller.stop_monitoring_server().await;
    } else if let Err(e) = controller.stop().await {
        eprintln!("failed to stop dnsmasq: {e}");
    }
}
