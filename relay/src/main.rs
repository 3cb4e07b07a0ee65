use clap::Parser;
use log::{error, info};
use relay::network::Relay;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of peers in one race
    #[arg(short, long, default_value = "8")]
    max_peers: usize,

    /// Seconds of silence before a peer is dropped
    #[arg(short = 't', long, default_value = "5")]
    peer_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    info!("Starting relay on {} (max {} peers)", address, args.max_peers);

    let relay = Relay::bind(
        &address,
        args.max_peers,
        Duration::from_secs(args.peer_timeout),
    )
    .await?;

    tokio::select! {
        result = relay.run() => {
            if let Err(e) = result {
                error!("Relay stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
