use clap::Parser;
use client::config::{DEFAULT_ADDRESS, DEFAULT_PORT};
use client::{Client, ClientConfig, Session};
use log::{error, info};
use server::config::DEFAULT_MAX_CONNECTIONS;
use server::{Lobby, LobbyInbox, Server, ServerConfig};
use shared::protocol::NetReady;
use shared::{NetDispatch, NetMessage, TcpNetwork};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 'a', long, default_value = DEFAULT_ADDRESS)]
    address: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Display name sent with JOIN
    #[arg(short = 'n', long, default_value = "Player")]
    name: String,

    /// Tick rate (updates per second)
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,

    /// Also run a server in this process and join it locally
    #[arg(long)]
    host: bool,

    /// Send READY as soon as the server welcomes us
    #[arg(short = 'r', long)]
    ready: bool,
}

/// Server half of host mode, ticked on the same loop as the client.
struct Host {
    server: Server<TcpNetwork>,
    lobby: Lobby,
    inbox: LobbyInbox,
}

impl Host {
    fn start(port: u16, dispatch: &mut NetDispatch) -> Result<Self, shared::NetError> {
        let mut server = Server::new(TcpNetwork, ServerConfig::default());
        let inbox = LobbyInbox::default();
        inbox.attach(dispatch, &mut server);
        server.init(port, DEFAULT_MAX_CONNECTIONS)?;
        Ok(Self {
            server,
            lobby: Lobby::new(),
            inbox,
        })
    }

    fn update(&mut self, dispatch: &mut NetDispatch) {
        self.server.update(Instant::now(), dispatch);
        self.inbox.drain(&mut self.lobby, &mut self.server);
    }

    fn stop(&mut self, dispatch: &mut NetDispatch) {
        self.server.shutdown();
        self.server.update(Instant::now(), dispatch);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    if args.tick_rate == 0 {
        return Err("tick rate must be greater than zero".into());
    }

    let mut dispatch = NetDispatch::new();
    let session = Session::new();
    session.attach(&mut dispatch);

    let (address, mut host) = if args.host {
        info!("Hosting on port {}", args.port);
        let host = Host::start(args.port, &mut dispatch).map_err(|e| {
            error!("Failed to host: {}", e);
            e
        })?;
        (DEFAULT_ADDRESS.to_string(), Some(host))
    } else {
        (args.address.clone(), None)
    };

    let mut client = Client::new(TcpNetwork, ClientConfig::default());
    client.set_on_server_disconnect(|| info!("Server closed the connection"));
    client.init(&address, args.port, &args.name)?;

    let mut interval_timer = interval(Duration::from_secs_f32(1.0 / args.tick_rate as f32));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ready_sent = false;
    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                if let Some(host) = host.as_mut() {
                    host.update(&mut dispatch);
                }
                client.update(&mut dispatch);

                if args.ready && !ready_sent {
                    if let Some(player_id) = session.local_id() {
                        let _ = client.send(&NetMessage::Ready(NetReady { player_id, ready: true }));
                        ready_sent = true;
                    }
                }

                if !client.is_active() {
                    info!("Disconnected from server, exiting");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Received Ctrl+C, shutting down gracefully...");
                client.shutdown();
                break;
            }
        }
    }

    if let Some(host) = host.as_mut() {
        host.stop(&mut dispatch);
    }
    Ok(())
}
