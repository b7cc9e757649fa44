use crate::config::ClientConfig;
use log::{debug, error, info, warn};
use shared::{
    Connection, Driver, EngineState, NetDispatch, NetError, NetMessage, Network, NetworkEvent,
    Player,
};

pub type ServerDisconnectCallback = Box<dyn FnMut()>;

/// Client engine: a single outbound connection, polled once per tick.
pub struct Client<N: Network> {
    network: N,
    config: ClientConfig,
    driver: Option<N::Driver>,
    connection: Option<Connection>,
    state: EngineState,
    display_name: String,
    on_server_disconnect: Option<ServerDisconnectCallback>,
}

impl<N: Network> Client<N> {
    pub fn new(network: N, config: ClientConfig) -> Self {
        Self {
            network,
            config,
            driver: None,
            connection: None,
            state: EngineState::Inactive,
            display_name: String::new(),
            on_server_disconnect: None,
        }
    }

    /// Connects to `address:port` and queues a JOIN carrying `display_name`.
    pub fn init(&mut self, address: &str, port: u16, display_name: &str) -> Result<(), NetError> {
        if self.state.is_running() {
            self.reset();
        }

        let (driver, connection) = match self.network.connect(address, port) {
            Ok(pair) => pair,
            Err(e) => {
                error!("Unable to connect to {}:{}: {}", address, port, e);
                return Err(e);
            }
        };
        info!("Attempting to connect to server on {}:{}", address, port);

        self.driver = Some(driver);
        self.connection = Some(connection);
        self.state = EngineState::Active;

        let player = Player::new(0, display_name);
        self.display_name = player.name.clone();
        // a refused connection surfaces as Disconnect on the next update
        let _ = self.send(&NetMessage::join(player));
        Ok(())
    }

    /// Services the transport and drains every event for the connection.
    pub fn update(&mut self, dispatch: &mut NetDispatch) {
        if !self.state.is_running() {
            return;
        }
        let Some(connection) = self.connection else {
            return;
        };

        if let Some(driver) = self.driver.as_mut() {
            driver.schedule_update();
        }

        loop {
            let event = match self.driver.as_mut() {
                Some(driver) => driver.pop_event_for_connection(connection),
                None => return,
            };

            match event {
                NetworkEvent::Empty => break,
                NetworkEvent::Connect => info!("We're connected!"),
                NetworkEvent::Data(frame) => self.on_data(&frame, dispatch),
                NetworkEvent::Disconnect => {
                    warn!("Client got disconnected from server");
                    if let Some(callback) = self.on_server_disconnect.as_mut() {
                        callback();
                    }
                    self.reset();
                    return;
                }
            }
        }
    }

    fn on_data(&mut self, frame: &[u8], dispatch: &mut NetDispatch) {
        let message = match NetMessage::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                error!("Dropping frame from server: {}", e);
                return;
            }
        };
        debug!("Received {:?} from server", message.code());

        if message == NetMessage::KeepAlive && self.config.echo_keep_alive {
            // failures are already logged
            let _ = self.send(&NetMessage::KeepAlive);
        }
        message.received_on_client(dispatch);
    }

    /// Serializes `message` and submits it on the connection. A failure is
    /// logged and the message dropped.
    pub fn send(&mut self, message: &NetMessage) -> Result<(), NetError> {
        let (Some(driver), Some(connection)) = (self.driver.as_mut(), self.connection) else {
            warn!("Dropped {:?}: client not connected", message.code());
            return Err(NetError::NotActive);
        };

        let result = message
            .to_frame()
            .map_err(NetError::from)
            .and_then(|frame| driver.send(connection, frame));
        if let Err(e) = &result {
            warn!("Dropped {:?}: {}", message.code(), e);
        }
        result
    }

    /// Disconnects and releases the transport right away.
    pub fn shutdown(&mut self) {
        if !self.state.is_running() {
            return;
        }
        self.state = EngineState::ShuttingDown;
        if let (Some(driver), Some(connection)) = (self.driver.as_mut(), self.connection) {
            driver.disconnect(connection);
        }
        info!("Client shut down");
        self.reset();
    }

    fn reset(&mut self) {
        self.driver = None;
        self.connection = None;
        self.state = EngineState::Inactive;
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_running()
    }

    /// Name sent in the last JOIN, after truncation.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Called when the server closes the connection. Not called for a local
    /// `shutdown`.
    pub fn set_on_server_disconnect<F>(&mut self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.on_server_disconnect = Some(Box::new(callback));
    }
}
