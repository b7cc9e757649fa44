//! Server engine: owns the listening driver and the connection registry and
//! does all of its work inside `update`, one synchronous tick at a time.

use crate::config::{validate_max_connections, ServerConfig};
use crate::registry::ConnectionRegistry;
use log::{debug, error, info, warn};
use shared::{
    Connection, Driver, EngineState, NetDispatch, NetError, NetMessage, Network, NetworkEvent,
};
use std::time::Instant;

pub type ClientDisconnectedCallback = Box<dyn FnMut(u8)>;
pub type ServerDisconnectCallback = Box<dyn FnMut()>;

pub struct Server<N: Network> {
    network: N,
    config: ServerConfig,
    driver: Option<N::Driver>,
    connections: ConnectionRegistry,
    state: EngineState,
    last_keep_alive: Option<Instant>,
    on_client_disconnected: Option<ClientDisconnectedCallback>,
    on_server_disconnect: Option<ServerDisconnectCallback>,
}

impl<N: Network> Server<N> {
    pub fn new(network: N, config: ServerConfig) -> Self {
        Self {
            network,
            config,
            driver: None,
            connections: ConnectionRegistry::default(),
            state: EngineState::Inactive,
            last_keep_alive: None,
            on_client_disconnected: None,
            on_server_disconnect: None,
        }
    }

    /// Binds `port` and starts accepting up to `max_connections` clients.
    ///
    /// An already running server is reset first. On failure the error is
    /// logged and returned and the server stays inactive; nothing retries.
    pub fn init(&mut self, port: u16, max_connections: usize) -> Result<(), NetError> {
        validate_max_connections(max_connections)?;
        self.config.validate()?;

        if self.state.is_running() {
            self.reset();
        }

        let driver = match self.network.listen(port, max_connections) {
            Ok(driver) => driver,
            Err(e) => {
                error!("Unable to bind to port {}: {}", port, e);
                return Err(e);
            }
        };
        info!("Currently listening on port {}", port);

        self.driver = Some(driver);
        self.connections = ConnectionRegistry::with_capacity(max_connections);
        self.state = EngineState::Active;
        self.last_keep_alive = None;
        Ok(())
    }

    /// Runs one tick: keep-alive, transport service, cleanup, accept, message
    /// pump, and finally the deferred reset if a shutdown was requested.
    pub fn update(&mut self, now: Instant, dispatch: &mut NetDispatch) {
        if !self.state.is_running() {
            return;
        }

        self.keep_alive(now);

        if let Some(driver) = self.driver.as_mut() {
            driver.schedule_update();
        }

        self.cleanup_connections();
        self.accept_new_connections();
        self.update_message_pump(dispatch);

        if self.state == EngineState::ShuttingDown {
            self.reset();
        }
    }

    /// Disconnects every client and schedules the reset for the end of the
    /// next tick. The server-disconnect callback fires once per shutdown.
    pub fn shutdown(&mut self) {
        if self.state != EngineState::Active {
            return;
        }

        let mut closed = 0;
        if let Some(driver) = self.driver.as_mut() {
            for connection in self.connections.live() {
                driver.disconnect(connection);
                closed += 1;
            }
        }
        info!("Server shutting down, closed {} connections", closed);

        if let Some(callback) = self.on_server_disconnect.as_mut() {
            callback();
        }
        self.state = EngineState::ShuttingDown;
    }

    fn reset(&mut self) {
        self.driver = None;
        self.connections.clear();
        self.state = EngineState::Inactive;
        self.last_keep_alive = None;
        info!("Server reset");
    }

    fn keep_alive(&mut self, now: Instant) {
        match self.last_keep_alive {
            None => self.last_keep_alive = Some(now),
            Some(last) if now.saturating_duration_since(last) >= self.config.keep_alive_interval => {
                self.last_keep_alive = Some(now);
                let sent = self.broadcast(&NetMessage::KeepAlive);
                debug!("Keep-alive sent to {} connections", sent);
            }
            Some(_) => {}
        }
    }

    fn cleanup_connections(&mut self) {
        let Some(driver) = self.driver.as_ref() else {
            return;
        };
        let removed = self.connections.compact(|c| driver.is_created(c));
        if removed > 0 {
            debug!("Removed {} dead connections", removed);
        }
    }

    fn accept_new_connections(&mut self) {
        let Some(driver) = self.driver.as_mut() else {
            return;
        };
        while let Some(connection) = driver.accept() {
            if self.connections.add(connection) {
                info!("Accepted connection {}", connection);
            }
        }
    }

    fn update_message_pump(&mut self, dispatch: &mut NetDispatch) {
        for index in 0..self.connections.len() {
            let Some(connection) = self.connections.get(index) else {
                continue;
            };

            loop {
                let event = match self.driver.as_mut() {
                    Some(driver) => driver.pop_event_for_connection(connection),
                    None => return,
                };

                match event {
                    NetworkEvent::Empty => break,
                    NetworkEvent::Data(frame) => self.on_data(&frame, connection, dispatch),
                    NetworkEvent::Disconnect => {
                        self.on_disconnect(index, connection);
                        break;
                    }
                    NetworkEvent::Connect => {
                        debug!("Ignoring connect event for accepted {}", connection);
                    }
                }
            }
        }
    }

    fn on_data(&mut self, frame: &[u8], connection: Connection, dispatch: &mut NetDispatch) {
        match NetMessage::from_frame(frame) {
            Ok(message) => {
                debug!("Received {:?} from {}", message.code(), connection);
                message.received_on_server(connection, dispatch);
            }
            Err(e) => error!("Dropping frame from {}: {}", connection, e),
        }
    }

    fn on_disconnect(&mut self, index: usize, connection: Connection) {
        let id = connection.internal_id();
        info!("Client {} disconnected from the server", id);

        self.broadcast(&NetMessage::disconnect(id));
        if let Some(callback) = self.on_client_disconnected.as_mut() {
            callback(id);
        }
        self.connections.invalidate(index);
    }

    /// Serializes `message` into its own buffer and hands it to the driver.
    /// A failure is logged and the message dropped.
    pub fn send_to(&mut self, connection: Connection, message: &NetMessage) -> Result<(), NetError> {
        let Some(driver) = self.driver.as_mut() else {
            warn!("Dropped {:?} for {}: server not active", message.code(), connection);
            return Err(NetError::NotActive);
        };

        let result = message
            .to_frame()
            .map_err(NetError::from)
            .and_then(|frame| driver.send(connection, frame));
        if let Err(e) = &result {
            warn!("Dropped {:?} for {}: {}", message.code(), connection, e);
        }
        result
    }

    /// Sends to every live connection. Returns how many sends succeeded.
    pub fn broadcast(&mut self, message: &NetMessage) -> usize {
        self.broadcast_filtered(message, None)
    }

    /// Sends to every live connection except `except`.
    pub fn broadcast_except(&mut self, message: &NetMessage, except: Connection) -> usize {
        self.broadcast_filtered(message, Some(except))
    }

    fn broadcast_filtered(&mut self, message: &NetMessage, except: Option<Connection>) -> usize {
        let targets = self.live_connections();
        let mut sent = 0;
        for connection in targets {
            if Some(connection) == except {
                continue;
            }
            debug!("Sending {:?} to: {}", message.code(), connection.internal_id());
            if self.send_to(connection, message).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Registered connections the driver still reports as created.
    pub fn live_connections(&self) -> Vec<Connection> {
        match self.driver.as_ref() {
            Some(driver) => self
                .connections
                .live()
                .filter(|c| self.connections.is_live(*c, |c| driver.is_created(c)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.live_connections().len()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_running()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Called with the departing connection's id after its DISCONNECT has
    /// been broadcast.
    pub fn set_on_client_disconnected<F>(&mut self, callback: F)
    where
        F: FnMut(u8) + 'static,
    {
        self.on_client_disconnected = Some(Box::new(callback));
    }

    pub fn set_on_server_disconnect<F>(&mut self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.on_server_disconnect = Some(Box::new(callback));
    }
}
