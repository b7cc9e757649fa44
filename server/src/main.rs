use clap::Parser;
use log::{error, info};
use server::config::{DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT};
use server::{Lobby, LobbyInbox, Server, ServerConfig};
use shared::{NetDispatch, TcpNetwork};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Maximum simultaneous clients
    #[clap(short, long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
    /// Seconds between keep-alive broadcasts
    #[clap(short, long, default_value_t = DEFAULT_KEEP_ALIVE_INTERVAL.as_secs())]
    keep_alive: u64,
}

/// Parses arguments, binds the server and runs the tick loop until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    if args.tick_rate == 0 {
        return Err("tick rate must be greater than zero".into());
    }

    let config =
        ServerConfig::default().with_keep_alive_interval(Duration::from_secs(args.keep_alive));
    let mut dispatch = NetDispatch::new();
    let mut server = Server::new(TcpNetwork, config);
    let mut lobby = Lobby::new();

    let inbox = LobbyInbox::default();
    inbox.attach(&mut dispatch, &mut server);
    server.set_on_server_disconnect(|| info!("All clients disconnected"));

    if let Err(e) = server.init(args.port, args.max_connections) {
        error!("Failed to start server: {}", e);
        return Err(e.into());
    }

    run_tick_loop(&mut server, &mut dispatch, &mut lobby, &inbox, args.tick_rate).await;
    Ok(())
}

/// Ticks the server at a fixed rate, feeding the lobby after every tick.
async fn run_tick_loop(
    server: &mut Server<TcpNetwork>,
    dispatch: &mut NetDispatch,
    lobby: &mut Lobby,
    inbox: &LobbyInbox,
    tick_rate: u32,
) {
    let mut interval_timer = interval(Duration::from_secs_f32(1.0 / tick_rate as f32));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                server.update(Instant::now(), dispatch);
                inbox.drain(lobby, server);
            }
            _ = &mut shutdown => {
                info!("Received Ctrl+C, shutting down gracefully...");
                server.shutdown();
                server.update(Instant::now(), dispatch);
                lobby.clear();
                break;
            }
        }
    }
}
