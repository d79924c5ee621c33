use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ftl::{
    DummyCredentialProvider, DummyStreamRegistry, IngestServer, NullPacketSink, ServerConfig,
};

#[derive(Parser)]
#[command(
    name = "ftl-ingest",
    about = "Standalone FTL ingest server with a fixed stream key"
)]
struct Args {
    /// Bind address for ingest control connections (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8084")]
    bind: String,

    /// Hostname reported in stream metadata
    #[arg(long, default_value = "localhost")]
    hostname: String,

    /// UDP media port range, half-open (min-max)
    #[arg(long, default_value = "9000-65535", value_parser = parse_port_range)]
    media_ports: (u16, u16),

    /// Shared HMAC stream key accepted for every channel
    #[arg(long, default_value = "aBcDeFgHiJkLmNoPqRsTuVwXyZ123456")]
    stream_key: String,

    /// Metadata report interval in seconds
    #[arg(long, default_value_t = 4)]
    report_interval: u64,

    /// Disable NACK retransmission requests
    #[arg(long)]
    no_nack: bool,
}

fn parse_port_range(value: &str) -> Result<(u16, u16), String> {
    let (min, max) = value
        .split_once('-')
        .ok_or_else(|| "expected min-max".to_string())?;
    let min: u16 = min.parse().map_err(|_| "invalid minimum port")?;
    let max: u16 = max.parse().map_err(|_| "invalid maximum port")?;
    if min >= max {
        return Err("minimum port must be below maximum".to_string());
    }
    Ok((min, max))
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = ServerConfig {
        hostname: args.hostname,
        media_port_range: args.media_ports.0..args.media_ports.1,
        metadata_report_interval: Duration::from_secs(args.report_interval),
        nack_enabled: !args.no_nack,
        // No preview encoder is wired in, so don't pretend to generate any.
        generate_previews: false,
        ..ServerConfig::default()
    };

    let mut server = IngestServer::with_config(
        &args.bind,
        config,
        Arc::new(DummyCredentialProvider::new(args.stream_key.into_bytes())),
        Arc::new(DummyStreamRegistry::default()),
        None,
        Arc::new(NullPacketSink),
    );

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    println!("FTL ingest server on {} — press Enter to stop", args.bind);
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    server.stop();
}
