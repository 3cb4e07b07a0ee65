use clap::Parser;
use log::info;
use peer::network::{Peer, PeerOptions};
use shared::Settings;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    relay: String,

    /// Display name sent to the relay
    #[arg(short, long, default_value = "racer")]
    name: String,

    /// YAML file with race settings
    #[arg(short, long)]
    config: Option<String>,

    /// Override the number of laps needed to win
    #[arg(short, long)]
    goal_laps: Option<u32>,

    /// Override the simulation tick rate (ticks per second)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Seed for item rolls and obstacle layout
    #[arg(long)]
    seed: Option<u64>,

    /// Peers required before the leader finalizes the track
    #[arg(short, long, default_value = "2")]
    min_peers: usize,

    /// Seconds after a finished race before asking for a restart
    #[arg(short, long)]
    restart_after: Option<f32>,

    /// Leave after this many finished races
    #[arg(long)]
    rounds: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(goal_laps) = args.goal_laps {
        settings.rules.goal_laps = goal_laps;
    }
    if let Some(tick_rate) = args.tick_rate {
        settings.net.tick_rate = tick_rate;
    }
    settings.validate()?;

    let options = PeerOptions {
        name: args.name,
        min_peers: args.min_peers,
        restart_after: args.restart_after.map(Duration::from_secs_f32),
        max_rounds: args.rounds,
        seed: Some(args.seed.unwrap_or_else(rand::random)),
        ..PeerOptions::default()
    };

    info!("Starting peer...");
    info!(
        "Racing to {} laps or {} gold",
        settings.rules.goal_laps, settings.items.gold_to_win
    );

    let mut peer = Peer::connect(&args.relay, settings, options).await?;

    tokio::select! {
        result = peer.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
