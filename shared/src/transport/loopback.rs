//! In-process transport: every driver opened from the same `LoopbackNetwork`
//! shares one hub, so a server and its clients can run on one thread with no
//! sockets. Frames are delivered in order and never lost.

use super::{free_slot, Connection, Driver, Network, NetworkEvent};
use crate::error::NetError;
use log::{debug, info};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;

type LinkId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Server,
    Client,
}

#[derive(Debug, Default)]
struct Link {
    to_server: VecDeque<NetworkEvent>,
    to_client: VecDeque<NetworkEvent>,
    open: bool,
    server_released: bool,
    client_released: bool,
}

impl Link {
    fn inbox(&mut self, side: Side) -> &mut VecDeque<NetworkEvent> {
        match side {
            Side::Server => &mut self.to_server,
            Side::Client => &mut self.to_client,
        }
    }
}

#[derive(Debug)]
struct Listener {
    max_connections: usize,
    backlog: VecDeque<LinkId>,
    members: Vec<LinkId>,
}

#[derive(Debug, Default)]
struct Hub {
    listeners: HashMap<u16, Listener>,
    links: HashMap<LinkId, Link>,
    next_link: LinkId,
}

impl Hub {
    fn is_open(&self, link: LinkId) -> bool {
        self.links.get(&link).map_or(false, |l| l.open)
    }

    /// Closes the link from `side`; the other side gets a Disconnect.
    fn close(&mut self, link: LinkId, side: Side) {
        if let Some(l) = self.links.get_mut(&link) {
            if l.open {
                l.open = false;
                let peer = match side {
                    Side::Server => Side::Client,
                    Side::Client => Side::Server,
                };
                l.inbox(peer).push_back(NetworkEvent::Disconnect);
            }
        }
    }

    /// Marks `side` as done with the link, dropping it once both are.
    fn release(&mut self, link: LinkId, side: Side) {
        let done = match self.links.get_mut(&link) {
            Some(l) => {
                match side {
                    Side::Server => l.server_released = true,
                    Side::Client => l.client_released = true,
                }
                l.server_released && l.client_released
            }
            None => false,
        };
        if done {
            self.links.remove(&link);
        }
    }

    fn send(&mut self, link: LinkId, to: Side, frame: Vec<u8>) -> bool {
        match self.links.get_mut(&link) {
            Some(l) if l.open => {
                l.inbox(to).push_back(NetworkEvent::Data(frame));
                true
            }
            _ => false,
        }
    }
}

/// Handle to an in-process network. Clones share the same hub.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.hub.borrow().listeners.contains_key(&port)
    }

    /// Links still held by at least one side.
    pub fn link_count(&self) -> usize {
        self.hub.borrow().links.len()
    }
}

impl Network for LoopbackNetwork {
    type Driver = LoopbackDriver;

    fn listen(&self, port: u16, max_connections: usize) -> Result<LoopbackDriver, NetError> {
        let mut hub = self.hub.borrow_mut();
        if hub.listeners.contains_key(&port) {
            return Err(NetError::Bind {
                port,
                source: io::Error::new(io::ErrorKind::AddrInUse, "loopback port already bound"),
            });
        }

        let capacity = max_connections.min(u8::MAX as usize + 1);
        hub.listeners.insert(
            port,
            Listener {
                max_connections: capacity,
                backlog: VecDeque::new(),
                members: Vec::new(),
            },
        );

        Ok(LoopbackDriver::Listener(ListenerEndpoint {
            hub: Rc::clone(&self.hub),
            port,
            capacity,
            slots: Vec::new(),
            versions: Vec::new(),
            accepted: VecDeque::new(),
        }))
    }

    fn connect(&self, address: &str, port: u16) -> Result<(LoopbackDriver, Connection), NetError> {
        let mut hub = self.hub.borrow_mut();
        let Hub {
            listeners,
            links,
            next_link,
        } = &mut *hub;

        let Some(listener) = listeners.get_mut(&port) else {
            return Err(NetError::Connect {
                address: format!("{}:{}", address, port),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "nothing listening"),
            });
        };

        let id = *next_link;
        *next_link += 1;

        listener
            .members
            .retain(|member| links.get(member).map_or(false, |l| l.open));

        let mut link = Link::default();
        if listener.members.len() < listener.max_connections {
            link.open = true;
            link.to_client.push_back(NetworkEvent::Connect);
            listener.members.push(id);
            listener.backlog.push_back(id);
        } else {
            debug!("Loopback port {} full, refusing link {}", port, id);
            link.to_client.push_back(NetworkEvent::Disconnect);
            link.server_released = true;
        }
        links.insert(id, link);

        let connection = Connection::new(0, 0);
        let driver = LoopbackDriver::Peer(PeerEndpoint {
            hub: Rc::clone(&self.hub),
            link: id,
            connection,
            alive: true,
        });
        Ok((driver, connection))
    }
}

/// Driver returned by `LoopbackNetwork`.
#[derive(Debug)]
pub enum LoopbackDriver {
    Listener(ListenerEndpoint),
    Peer(PeerEndpoint),
}

impl Driver for LoopbackDriver {
    fn schedule_update(&mut self) {
        match self {
            LoopbackDriver::Listener(endpoint) => endpoint.schedule_update(),
            LoopbackDriver::Peer(_) => {}
        }
    }

    fn accept(&mut self) -> Option<Connection> {
        match self {
            LoopbackDriver::Listener(endpoint) => endpoint.accepted.pop_front(),
            LoopbackDriver::Peer(_) => None,
        }
    }

    fn pop_event_for_connection(&mut self, connection: Connection) -> NetworkEvent {
        match self {
            LoopbackDriver::Listener(endpoint) => endpoint.pop_event(connection),
            LoopbackDriver::Peer(endpoint) => endpoint.pop_event(connection),
        }
    }

    fn send(&mut self, connection: Connection, frame: Vec<u8>) -> Result<(), NetError> {
        let delivered = match self {
            LoopbackDriver::Listener(endpoint) => endpoint.lookup(connection).map_or(false, |link| {
                endpoint.hub.borrow_mut().send(link, Side::Client, frame)
            }),
            LoopbackDriver::Peer(endpoint) => {
                endpoint.is_created(connection)
                    && endpoint.hub.borrow_mut().send(endpoint.link, Side::Server, frame)
            }
        };
        if delivered {
            Ok(())
        } else {
            Err(NetError::SendFailed(connection))
        }
    }

    fn disconnect(&mut self, connection: Connection) {
        match self {
            LoopbackDriver::Listener(endpoint) => endpoint.disconnect(connection),
            LoopbackDriver::Peer(endpoint) => endpoint.disconnect(connection),
        }
    }

    fn is_created(&self, connection: Connection) -> bool {
        match self {
            LoopbackDriver::Listener(endpoint) => endpoint.lookup(connection).is_some(),
            LoopbackDriver::Peer(endpoint) => endpoint.is_created(connection),
        }
    }
}

#[derive(Debug)]
pub struct ListenerEndpoint {
    hub: Rc<RefCell<Hub>>,
    port: u16,
    capacity: usize,
    slots: Vec<Option<LinkId>>,
    versions: Vec<u16>,
    accepted: VecDeque<Connection>,
}

impl ListenerEndpoint {
    fn lookup(&self, connection: Connection) -> Option<LinkId> {
        let index = connection.internal_id() as usize;
        match (self.slots.get(index), self.versions.get(index)) {
            (Some(Some(link)), Some(&version)) if version == connection.version() => Some(*link),
            _ => None,
        }
    }

    fn free(&mut self, index: usize) {
        self.slots[index] = None;
        self.versions[index] = self.versions[index].wrapping_add(1);
    }

    fn schedule_update(&mut self) {
        let mut hub = self.hub.borrow_mut();
        loop {
            let front = hub
                .listeners
                .get(&self.port)
                .and_then(|listener| listener.backlog.front().copied());
            let Some(link) = front else {
                break;
            };

            if !hub.is_open(link) {
                if let Some(listener) = hub.listeners.get_mut(&self.port) {
                    listener.backlog.pop_front();
                }
                hub.release(link, Side::Server);
                continue;
            }

            let Some(index) = free_slot(&mut self.slots, self.capacity) else {
                break;
            };
            if let Some(listener) = hub.listeners.get_mut(&self.port) {
                listener.backlog.pop_front();
            }
            if self.versions.len() <= index {
                self.versions.resize(index + 1, 0);
            }
            self.slots[index] = Some(link);

            let connection = Connection::new(index as u8, self.versions[index]);
            debug!("Loopback port {} accepted link {} as {}", self.port, link, connection);
            self.accepted.push_back(connection);
        }
    }

    fn pop_event(&mut self, connection: Connection) -> NetworkEvent {
        let Some(link) = self.lookup(connection) else {
            return NetworkEvent::Empty;
        };

        let mut hub = self.hub.borrow_mut();
        let event = hub
            .links
            .get_mut(&link)
            .and_then(|l| l.to_server.pop_front())
            .unwrap_or(NetworkEvent::Empty);

        if event == NetworkEvent::Disconnect {
            hub.release(link, Side::Server);
            drop(hub);
            self.free(connection.internal_id() as usize);
        }
        event
    }

    fn disconnect(&mut self, connection: Connection) {
        let Some(link) = self.lookup(connection) else {
            return;
        };
        {
            let mut hub = self.hub.borrow_mut();
            hub.close(link, Side::Server);
            hub.release(link, Side::Server);
        }
        self.free(connection.internal_id() as usize);
    }
}

impl Drop for ListenerEndpoint {
    fn drop(&mut self) {
        let Ok(mut hub) = self.hub.try_borrow_mut() else {
            return;
        };

        let mut held: Vec<LinkId> = self.slots.iter().flatten().copied().collect();
        if let Some(listener) = hub.listeners.remove(&self.port) {
            held.extend(listener.backlog);
        }
        for link in held {
            hub.close(link, Side::Server);
            hub.release(link, Side::Server);
        }
        info!("Loopback port {} closed", self.port);
    }
}

#[derive(Debug)]
pub struct PeerEndpoint {
    hub: Rc<RefCell<Hub>>,
    link: LinkId,
    connection: Connection,
    alive: bool,
}

impl PeerEndpoint {
    fn is_created(&self, connection: Connection) -> bool {
        self.alive && connection == self.connection
    }

    fn pop_event(&mut self, connection: Connection) -> NetworkEvent {
        if !self.is_created(connection) {
            return NetworkEvent::Empty;
        }

        let mut hub = self.hub.borrow_mut();
        let event = hub
            .links
            .get_mut(&self.link)
            .and_then(|l| l.to_client.pop_front())
            .unwrap_or(NetworkEvent::Empty);

        if event == NetworkEvent::Disconnect {
            self.alive = false;
            hub.release(self.link, Side::Client);
        }
        event
    }

    fn disconnect(&mut self, connection: Connection) {
        if !self.is_created(connection) {
            return;
        }
        let mut hub = self.hub.borrow_mut();
        hub.close(self.link, Side::Client);
        hub.release(self.link, Side::Client);
        self.alive = false;
    }
}

impl Drop for PeerEndpoint {
    fn drop(&mut self) {
        if !self.alive {
            return;
        }
        if let Ok(mut hub) = self.hub.try_borrow_mut() {
            hub.close(self.link, Side::Client);
            hub.release(self.link, Side::Client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_one(server: &mut LoopbackDriver) -> Connection {
        server.schedule_update();
        server.accept().expect("pending connection")
    }

    #[test]
    fn test_port_is_exclusive() {
        let network = LoopbackNetwork::new();
        let first = network.listen(8007, 4).unwrap();

        assert!(matches!(
            network.listen(8007, 4),
            Err(NetError::Bind { port: 8007, .. })
        ));

        drop(first);
        assert!(!network.is_bound(8007));
        assert!(network.listen(8007, 4).is_ok());
    }

    #[test]
    fn test_connect_without_listener_is_refused() {
        let network = LoopbackNetwork::new();
        assert!(matches!(
            network.connect("127.0.0.1", 9000),
            Err(NetError::Connect { .. })
        ));
    }

    #[test]
    fn test_frames_flow_both_ways() {
        let network = LoopbackNetwork::new();
        let mut server = network.listen(8007, 4).unwrap();
        let (mut client, cnn) = network.connect("127.0.0.1", 8007).unwrap();

        client.send(cnn, vec![1, 2, 3]).unwrap();
        let accepted = accept_one(&mut server);
        assert!(server.is_created(accepted));

        assert_eq!(
            server.pop_event_for_connection(accepted),
            NetworkEvent::Data(vec![1, 2, 3])
        );
        assert_eq!(server.pop_event_for_connection(accepted), NetworkEvent::Empty);

        server.send(accepted, vec![9]).unwrap();
        assert_eq!(client.pop_event_for_connection(cnn), NetworkEvent::Connect);
        assert_eq!(client.pop_event_for_connection(cnn), NetworkEvent::Data(vec![9]));
        assert_eq!(client.pop_event_for_connection(cnn), NetworkEvent::Empty);
    }

    #[test]
    fn test_client_disconnect_reaches_server() {
        let network = LoopbackNetwork::new();
        let mut server = network.listen(8007, 4).unwrap();
        let (mut client, cnn) = network.connect("127.0.0.1", 8007).unwrap();
        let accepted = accept_one(&mut server);

        client.disconnect(cnn);
        assert!(!client.is_created(cnn));
        assert!(client.send(cnn, vec![1]).is_err());

        assert_eq!(
            server.pop_event_for_connection(accepted),
            NetworkEvent::Disconnect
        );
        assert!(!server.is_created(accepted));
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn test_server_disconnect_reaches_client() {
        let network = LoopbackNetwork::new();
        let mut server = network.listen(8007, 4).unwrap();
        let (mut client, cnn) = network.connect("127.0.0.1", 8007).unwrap();
        let accepted = accept_one(&mut server);

        server.disconnect(accepted);
        assert!(!server.is_created(accepted));
        assert_eq!(server.pop_event_for_connection(accepted), NetworkEvent::Empty);
        assert!(server.send(accepted, vec![1]).is_err());

        assert_eq!(client.pop_event_for_connection(cnn), NetworkEvent::Connect);
        assert_eq!(client.pop_event_for_connection(cnn), NetworkEvent::Disconnect);
        assert!(!client.is_created(cnn));
    }

    #[test]
    fn test_excess_connections_are_refused() {
        let network = LoopbackNetwork::new();
        let mut server = network.listen(8007, 2).unwrap();

        let (_c1, _) = network.connect("127.0.0.1", 8007).unwrap();
        let (_c2, _) = network.connect("127.0.0.1", 8007).unwrap();
        let (mut c3, cnn3) = network.connect("127.0.0.1", 8007).unwrap();

        server.schedule_update();
        assert!(server.accept().is_some());
        assert!(server.accept().is_some());
        assert!(server.accept().is_none());

        assert_eq!(c3.pop_event_for_connection(cnn3), NetworkEvent::Disconnect);
        assert!(!c3.is_created(cnn3));
    }

    #[test]
    fn test_slot_reuse_changes_version() {
        let network = LoopbackNetwork::new();
        let mut server = network.listen(8007, 1).unwrap();

        let (mut first, cnn) = network.connect("127.0.0.1", 8007).unwrap();
        let old = accept_one(&mut server);
        first.disconnect(cnn);
        assert_eq!(server.pop_event_for_connection(old), NetworkEvent::Disconnect);

        let (_second, _) = network.connect("127.0.0.1", 8007).unwrap();
        let new = accept_one(&mut server);

        assert_eq!(old.internal_id(), new.internal_id());
        assert_ne!(old, new);
        assert!(!server.is_created(old));
        assert!(server.is_created(new));
    }

    #[test]
    fn test_dropping_listener_disconnects_peers() {
        let network = LoopbackNetwork::new();
        let mut server = network.listen(8007, 4).unwrap();
        let (mut accepted_client, cnn1) = network.connect("127.0.0.1", 8007).unwrap();
        accept_one(&mut server);
        let (mut pending_client, cnn2) = network.connect("127.0.0.1", 8007).unwrap();

        drop(server);

        assert_eq!(accepted_client.pop_event_for_connection(cnn1), NetworkEvent::Connect);
        assert_eq!(
            accepted_client.pop_event_for_connection(cnn1),
            NetworkEvent::Disconnect
        );
        assert_eq!(pending_client.pop_event_for_connection(cnn2), NetworkEvent::Connect);
        assert_eq!(
            pending_client.pop_event_for_connection(cnn2),
            NetworkEvent::Disconnect
        );
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn test_dropping_peer_disconnects_it() {
        let network = LoopbackNetwork::new();
        let mut server = network.listen(8007, 4).unwrap();
        let (client, _) = network.connect("127.0.0.1", 8007).unwrap();
        let accepted = accept_one(&mut server);

        drop(client);
        assert_eq!(
            server.pop_event_for_connection(accepted),
            NetworkEvent::Disconnect
        );
    }
}
