use clap::Parser;
use client::input::InputPattern;
use client::network::{Client, ClientConfig};
use log::info;
use shared::TickConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Tick rate until the server sends its own
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Scripted movement to drive the entity with
    #[arg(short, long, value_enum, default_value = "circle")]
    pattern: InputPattern,

    /// Seed for the wander pattern
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Input pattern: {:?}", args.pattern);

    let config = ClientConfig {
        server: args.server,
        fake_ping_ms: args.fake_ping,
        tick: TickConfig::new(args.tick_rate)?,
        pattern: args.pattern,
        seed: args.seed,
        run_for: args.duration_secs.map(Duration::from_secs),
    };

    let mut client = Client::new(config).await?;
    client.run().await?;

    Ok(())
}
