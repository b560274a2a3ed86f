use clap::Parser;
use log::info;
use server::authority::DEFAULT_MAX_INPUT_STARVATION;
use server::network::{Server, ServerConfig};
use shared::{MovementConfig, TickConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Horizontal speed at full input, units per second
    #[arg(long, default_value = "6.0")]
    run_speed: f32,

    /// Downward acceleration while airborne
    #[arg(long, default_value = "20.0")]
    gravity: f32,

    /// Tallest ledge an entity climbs without jumping
    #[arg(long, default_value = "0.4")]
    max_step_height: f32,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    timeout_secs: u64,

    /// Ticks without input before an entity advances on its own
    #[arg(long, default_value_t = DEFAULT_MAX_INPUT_STARVATION)]
    max_input_starvation: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let movement = MovementConfig {
        run_speed: args.run_speed,
        gravity: args.gravity,
        max_step_height: args.max_step_height,
        ..Default::default()
    };
    let config = ServerConfig {
        tick: TickConfig::new(args.tick_rate)?,
        movement,
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.timeout_secs),
        max_input_starvation: args.max_input_starvation,
    };

    info!("Starting server...");
    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
