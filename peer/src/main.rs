use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use peer::{GameLoop, OpenArena, Session, SessionConfig, SessionEvent};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Play alone, no networking
    Single,
    /// Host a session for one joining player
    Host,
    /// Join a hosted session
    Join,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Session mode
    #[arg(short, long, value_enum, default_value = "single")]
    mode: Mode,

    /// Host address to join
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (host) or connect to (join)
    #[arg(short, long, default_value = "5555")]
    port: u16,

    /// Simulation ticks per second (1 to 1000)
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Milliseconds between network updates
    #[arg(short, long, default_value = "50")]
    broadcast_ms: u64,

    /// Fixed seed for spawns and wandering
    #[arg(short, long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config =
        SessionConfig::default().with_broadcast_interval(Duration::from_millis(args.broadcast_ms));
    config.rng_seed = args.seed;
    let map = Arc::new(OpenArena::new(config.world_width, config.world_height));
    let (session, mut events) = Session::new(config, map);

    match args.mode {
        Mode::Single => session.setup_single_player(),
        Mode::Host => {
            let addr = session.start_host(args.port).await?;
            info!("Waiting for a player on {}", addr);
        }
        Mode::Join => {
            session.start_client(&args.host, args.port).await?;
            info!("Connected to {}:{}, waiting for identity", args.host, args.port);
        }
    }

    let game_handle = GameLoop::new(session.clone(), args.tick_rate).spawn();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::GameOver) => {
                    info!("Game over with score {}", session.score());
                    break;
                }
                Some(SessionEvent::Disconnected) => {
                    warn!("Disconnected from host");
                    break;
                }
                Some(event) => info!("{:?}", event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    game_handle.abort();
    if let Err(e) = game_handle.await {
        if !e.is_cancelled() {
            error!("Game loop task panicked: {}", e);
        }
    }
    session.stop();

    Ok(())
}
