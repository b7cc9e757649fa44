//! TCP transport backed by tokio tasks.
//!
//! Socket I/O runs on spawned tasks that feed one unbounded channel per
//! driver; `schedule_update` drains that channel without blocking, so engine
//! ticks stay synchronous. Each frame on the stream is a 4-byte big-endian
//! length followed by the frame bytes.

use super::{free_slot, Connection, Driver, Network, NetworkEvent};
use crate::error::{NetError, ProtocolError};
use crate::protocol::MAX_FRAME_LEN;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events sent from socket tasks to the owning driver
#[derive(Debug)]
enum TransportEvent {
    Accepted(TcpStream, SocketAddr),
    Connected(Connection),
    Frame(Connection, Vec<u8>),
    Closed(Connection),
}

/// Opens TCP drivers on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpNetwork;

impl Network for TcpNetwork {
    type Driver = TcpDriver;

    fn listen(&self, port: u16, max_connections: usize) -> Result<TcpDriver, NetError> {
        let runtime = Handle::try_current().map_err(|_| NetError::NoRuntime)?;

        let std_listener = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| NetError::Bind { port, source })?;
        std_listener.set_nonblocking(true)?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener)?
        };

        let mut driver = TcpDriver::new(runtime, max_connections);
        let events = driver.events_tx.clone();
        driver.listener = Some(driver.runtime.spawn(accept_loop(listener, events)));
        Ok(driver)
    }

    fn connect(&self, address: &str, port: u16) -> Result<(TcpDriver, Connection), NetError> {
        let runtime = Handle::try_current().map_err(|_| NetError::NoRuntime)?;
        let mut driver = TcpDriver::new(runtime, 1);

        let index = free_slot(&mut driver.slots, driver.capacity)
            .ok_or_else(|| NetError::InvalidConfig("no slot for outbound connection".into()))?;
        let connection = driver.next_connection(index);

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let events = driver.events_tx.clone();
        let target = format!("{}:{}", address, port);

        let reader = driver.runtime.spawn(async move {
            match TcpStream::connect(target.as_str()).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    let (read_half, write_half) = stream.into_split();
                    tokio::spawn(write_frames(write_half, writer_rx));
                    if events.send(TransportEvent::Connected(connection)).is_err() {
                        return;
                    }
                    read_frames(read_half, connection, events).await;
                }
                Err(e) => {
                    warn!("Unable to connect to {}: {}", target, e);
                    let _ = events.send(TransportEvent::Closed(connection));
                }
            }
        });

        driver.slots[index] = Some(Peer::new(writer_tx, reader));
        Ok((driver, connection))
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<TransportEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if events.send(TransportEvent::Accepted(stream, addr)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    connection: Connection,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        let mut header = [0u8; 4];
        if let Err(e) = reader.read_exact(&mut header).await {
            debug!("Connection {} closed: {}", connection, e);
            break;
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            warn!(
                "Connection {} sent a {} byte frame (max {}), closing",
                connection, len, MAX_FRAME_LEN
            );
            break;
        }

        let mut frame = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut frame).await {
            debug!("Connection {} closed mid-frame: {}", connection, e);
            break;
        }

        if events.send(TransportEvent::Frame(connection, frame)).is_err() {
            return;
        }
    }
    let _ = events.send(TransportEvent::Closed(connection));
}

async fn write_frames(mut writer: OwnedWriteHalf, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        let header = (frame.len() as u32).to_be_bytes();
        if let Err(e) = writer.write_all(&header).await {
            debug!("Write failed: {}", e);
            break;
        }
        if let Err(e) = writer.write_all(&frame).await {
            debug!("Write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[derive(Debug)]
struct Peer {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    inbox: VecDeque<NetworkEvent>,
    closed: bool,
}

impl Peer {
    fn new(writer: mpsc::UnboundedSender<Vec<u8>>, reader: JoinHandle<()>) -> Self {
        Self {
            writer,
            reader,
            inbox: VecDeque::new(),
            closed: false,
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        // Dropping `writer` lets the write task flush and shut the socket down.
        self.reader.abort();
    }
}

/// Driver returned by `TcpNetwork`.
#[derive(Debug)]
pub struct TcpDriver {
    runtime: Handle,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    slots: Vec<Option<Peer>>,
    versions: Vec<u16>,
    capacity: usize,
    accepted: VecDeque<Connection>,
    listener: Option<JoinHandle<()>>,
}

impl TcpDriver {
    fn new(runtime: Handle, max_connections: usize) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            events_tx,
            events_rx,
            slots: Vec::new(),
            versions: Vec::new(),
            capacity: max_connections.min(u8::MAX as usize + 1),
            accepted: VecDeque::new(),
            listener: None,
        }
    }

    fn next_connection(&mut self, index: usize) -> Connection {
        if self.versions.len() <= index {
            self.versions.resize(index + 1, 0);
        }
        Connection::new(index as u8, self.versions[index])
    }

    fn peer_mut(&mut self, connection: Connection) -> Option<&mut Peer> {
        let index = connection.internal_id() as usize;
        if self.versions.get(index) != Some(&connection.version()) {
            return None;
        }
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    fn free(&mut self, connection: Connection) {
        let index = connection.internal_id() as usize;
        self.slots[index] = None;
        self.versions[index] = self.versions[index].wrapping_add(1);
    }

    fn accept_stream(&mut self, stream: TcpStream, addr: SocketAddr) {
        let Some(index) = free_slot(&mut self.slots, self.capacity) else {
            warn!(
                "Refusing connection from {}: {} connections open",
                addr, self.capacity
            );
            return;
        };

        let connection = self.next_connection(index);
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        self.runtime.spawn(write_frames(write_half, writer_rx));
        let reader = self
            .runtime
            .spawn(read_frames(read_half, connection, self.events_tx.clone()));

        self.slots[index] = Some(Peer::new(writer_tx, reader));
        self.accepted.push_back(connection);
        info!("Accepted {} as {}", addr, connection);
    }
}

impl Driver for TcpDriver {
    fn schedule_update(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                TransportEvent::Accepted(stream, addr) => self.accept_stream(stream, addr),
                TransportEvent::Connected(connection) => {
                    if let Some(peer) = self.peer_mut(connection) {
                        peer.inbox.push_back(NetworkEvent::Connect);
                    }
                }
                TransportEvent::Frame(connection, frame) => {
                    if let Some(peer) = self.peer_mut(connection) {
                        peer.inbox.push_back(NetworkEvent::Data(frame));
                    }
                }
                TransportEvent::Closed(connection) => {
                    if let Some(peer) = self.peer_mut(connection) {
                        if !peer.closed {
                            peer.closed = true;
                            peer.inbox.push_back(NetworkEvent::Disconnect);
                        }
                    }
                }
            }
        }
    }

    fn accept(&mut self) -> Option<Connection> {
        self.accepted.pop_front()
    }

    fn pop_event_for_connection(&mut self, connection: Connection) -> NetworkEvent {
        let event = match self.peer_mut(connection) {
            Some(peer) => peer.inbox.pop_front().unwrap_or(NetworkEvent::Empty),
            None => return NetworkEvent::Empty,
        };
        if event == NetworkEvent::Disconnect {
            self.free(connection);
        }
        event
    }

    fn send(&mut self, connection: Connection, frame: Vec<u8>) -> Result<(), NetError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: frame.len(),
                max: MAX_FRAME_LEN,
            }
            .into());
        }
        let peer = self
            .peer_mut(connection)
            .ok_or(NetError::UnknownConnection(connection))?;
        if peer.closed {
            return Err(NetError::SendFailed(connection));
        }
        peer.writer
            .send(frame)
            .map_err(|_| NetError::SendFailed(connection))
    }

    fn disconnect(&mut self, connection: Connection) {
        if self.peer_mut(connection).is_some() {
            self.free(connection);
            debug!("Disconnected {}", connection);
        }
    }

    fn is_created(&self, connection: Connection) -> bool {
        let index = connection.internal_id() as usize;
        self.versions.get(index) == Some(&connection.version())
            && matches!(self.slots.get(index), Some(Some(_)))
    }
}

impl Drop for TcpDriver {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
        for _ in 0..400 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_listen_requires_runtime() {
        assert!(matches!(TcpNetwork.listen(0, 1), Err(NetError::NoRuntime)));
        assert!(matches!(
            TcpNetwork.connect("127.0.0.1", 1),
            Err(NetError::NoRuntime)
        ));
    }

    #[test]
    fn test_port_in_use_is_bind_error() {
        tokio_test::block_on(async {
            let port = free_port();
            let first = TcpNetwork.listen(port, 2);
            assert_ok!(&first);

            let second = TcpNetwork.listen(port, 2);
            assert_err!(&second);
            assert!(matches!(second, Err(NetError::Bind { port: p, .. }) if p == port));
        });
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let port = free_port();
        let mut server = TcpNetwork.listen(port, 4).unwrap();
        let (mut client, cnn) = TcpNetwork.connect("127.0.0.1", port).unwrap();
        client.send(cnn, vec![3, 1, 4]).unwrap();

        let mut accepted = None;
        assert!(
            wait_for(|| {
                server.schedule_update();
                if accepted.is_none() {
                    accepted = server.accept();
                }
                accepted.is_some()
            })
            .await
        );
        let accepted = accepted.unwrap();

        let mut received = None;
        assert!(
            wait_for(|| {
                server.schedule_update();
                if let NetworkEvent::Data(frame) = server.pop_event_for_connection(accepted) {
                    received = Some(frame);
                }
                received.is_some()
            })
            .await
        );
        assert_eq!(received.unwrap(), vec![3, 1, 4]);

        server.send(accepted, vec![2, 7]).unwrap();
        let mut events = Vec::new();
        assert!(
            wait_for(|| {
                client.schedule_update();
                loop {
                    match client.pop_event_for_connection(cnn) {
                        NetworkEvent::Empty => break,
                        event => events.push(event),
                    }
                }
                events.len() >= 2
            })
            .await
        );
        assert_eq!(
            events,
            vec![NetworkEvent::Connect, NetworkEvent::Data(vec![2, 7])]
        );
    }

    #[tokio::test]
    async fn test_server_disconnect_reaches_client() {
        let port = free_port();
        let mut server = TcpNetwork.listen(port, 4).unwrap();
        let (mut client, cnn) = TcpNetwork.connect("127.0.0.1", port).unwrap();

        let mut accepted = None;
        assert!(
            wait_for(|| {
                server.schedule_update();
                accepted = accepted.or_else(|| server.accept());
                accepted.is_some()
            })
            .await
        );
        let accepted = accepted.unwrap();

        server.disconnect(accepted);
        assert!(!server.is_created(accepted));
        assert!(server.send(accepted, vec![1]).is_err());

        assert!(
            wait_for(|| {
                client.schedule_update();
                client.pop_event_for_connection(cnn) == NetworkEvent::Disconnect
                    || !client.is_created(cnn)
            })
            .await
        );
        assert!(!client.is_created(cnn));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_reports_disconnect() {
        let port = free_port();
        let (mut client, cnn) = TcpNetwork.connect("127.0.0.1", port).unwrap();

        assert!(
            wait_for(|| {
                client.schedule_update();
                client.pop_event_for_connection(cnn) == NetworkEvent::Disconnect
            })
            .await
        );
        assert!(!client.is_created(cnn));
    }

    #[test]
    fn test_oversized_frame_rejected_before_queueing() {
        tokio_test::block_on(async {
            let port = free_port();
            let (mut client, cnn) = TcpNetwork.connect("127.0.0.1", port).unwrap();
            let result = client.send(cnn, vec![0; MAX_FRAME_LEN + 1]);
            assert!(matches!(
                result,
                Err(NetError::Protocol(ProtocolError::FrameTooLarge { .. }))
            ));
        });
    }
}
