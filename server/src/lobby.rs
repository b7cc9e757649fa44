//! Server-side lobby roster.
//!
//! `Lobby` never touches the network. Each handler returns the messages the
//! server should send, and the caller applies them after the tick with
//! `Outgoing::apply`. `LobbyInbox` collects what the dispatch table and the
//! server's disconnect callback deliver during `Server::update`.

use crate::network::Server;
use log::{debug, info, warn};
use shared::protocol::{NetMakeMove, NetReady, NetStartGame, NetWelcome};
use shared::{Connection, NetDispatch, NetMessage, Network, OpCode, Player, SubscriptionId};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// Players needed before START_GAME can go out.
pub const MIN_PLAYERS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    To(Connection, NetMessage),
    Broadcast(NetMessage),
    BroadcastExcept(Connection, NetMessage),
}

impl Outgoing {
    pub fn apply<N: Network>(self, server: &mut Server<N>) {
        match self {
            Outgoing::To(connection, message) => {
                // failures are logged by the server
                let _ = server.send_to(connection, &message);
            }
            Outgoing::Broadcast(message) => {
                server.broadcast(&message);
            }
            Outgoing::BroadcastExcept(connection, message) => {
                server.broadcast_except(&message, connection);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Seat {
    connection: Connection,
    player: Player,
}

#[derive(Debug, Default)]
pub struct Lobby {
    seats: BTreeMap<u8, Seat>,
    first_turn: Option<u8>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reacts to one message received from `connection`.
    pub fn handle(&mut self, message: &NetMessage, connection: Connection) -> Vec<Outgoing> {
        match message {
            NetMessage::Join(join) => self.on_join(&join.player.name, connection),
            NetMessage::Ready(ready) => self.on_ready(ready.ready, connection),
            NetMessage::MakeMove(mv) => self.on_make_move(mv, connection),
            other => {
                debug!("Lobby ignores {:?} from {}", other.code(), connection);
                Vec::new()
            }
        }
    }

    fn on_join(&mut self, name: &str, connection: Connection) -> Vec<Outgoing> {
        let id = connection.internal_id();
        if self.seats.contains_key(&id) {
            warn!("Player {} sent JOIN twice, ignoring", id);
            return Vec::new();
        }

        let mut player = Player::new(id, name);
        player.is_host = self.seats.is_empty();
        info!("Player {} joined as '{}'", id, player.name);

        let mut out = vec![Outgoing::To(
            connection,
            NetMessage::Welcome(NetWelcome { assigned_id: id }),
        )];
        for seat in self.seats.values() {
            out.push(Outgoing::To(connection, NetMessage::join(seat.player.clone())));
        }
        self.seats.insert(
            id,
            Seat {
                connection,
                player: player.clone(),
            },
        );
        // the joiner gets its own entry too, with the assigned id and host flag
        out.push(Outgoing::Broadcast(NetMessage::join(player)));
        if let Some(first_turn) = self.first_turn {
            debug!("Player {} joined a running game", id);
            out.push(Outgoing::To(
                connection,
                NetMessage::StartGame(NetStartGame { first_turn }),
            ));
        }
        out
    }

    fn on_ready(&mut self, ready: bool, connection: Connection) -> Vec<Outgoing> {
        let id = connection.internal_id();
        let Some(seat) = self.seat_for(connection) else {
            warn!("READY from {} before JOIN", connection);
            return Vec::new();
        };
        seat.player.ready = ready;
        debug!("Player {} ready: {}", id, ready);

        let mut out = vec![Outgoing::Broadcast(NetMessage::Ready(NetReady {
            player_id: id,
            ready,
        }))];
        out.extend(self.try_start());
        out
    }

    fn on_make_move(&mut self, mv: &NetMakeMove, connection: Connection) -> Vec<Outgoing> {
        if self.seat_for(connection).is_none() {
            warn!("MAKE_MOVE from {} before JOIN", connection);
            return Vec::new();
        }
        let relayed = NetMakeMove {
            player_id: connection.internal_id(),
            ..mv.clone()
        };
        vec![Outgoing::BroadcastExcept(
            connection,
            NetMessage::MakeMove(relayed),
        )]
    }

    /// Seat held by exactly this connection. A reused slot id with a newer
    /// version does not match.
    fn seat_for(&mut self, connection: Connection) -> Option<&mut Seat> {
        self.seats
            .get_mut(&connection.internal_id())
            .filter(|seat| seat.connection == connection)
    }

    /// START_GAME broadcast once at least `MIN_PLAYERS` are seated and all
    /// of them are ready. The lowest id moves first.
    fn try_start(&mut self) -> Option<Outgoing> {
        if self.first_turn.is_some()
            || self.seats.len() < MIN_PLAYERS
            || !self.seats.values().all(|seat| seat.player.ready)
        {
            return None;
        }
        let first_turn = *self.seats.keys().next()?;
        self.first_turn = Some(first_turn);
        info!("All {} players ready, player {} moves first", self.seats.len(), first_turn);
        Some(Outgoing::Broadcast(NetMessage::StartGame(NetStartGame {
            first_turn,
        })))
    }

    /// Drops the player with `id`. The server has already broadcast the
    /// DISCONNECT. The remaining players may now all be ready, in which case
    /// START_GAME is returned.
    pub fn remove(&mut self, id: u8) -> Vec<Outgoing> {
        let Some(seat) = self.seats.remove(&id) else {
            return Vec::new();
        };
        info!("Player {} ('{}') left the lobby", id, seat.player.name);
        if self.seats.is_empty() {
            self.first_turn = None;
        }
        self.try_start().into_iter().collect()
    }

    pub fn player(&self, id: u8) -> Option<&Player> {
        self.seats.get(&id).map(|seat| &seat.player)
    }

    /// Players ordered by id.
    pub fn players(&self) -> impl Iterator<Item = &Player> + '_ {
        self.seats.values().map(|seat| &seat.player)
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn has_started(&self) -> bool {
        self.first_turn.is_some()
    }

    /// Player who moved first, once the game has started.
    pub fn first_turn(&self) -> Option<u8> {
        self.first_turn
    }

    pub fn clear(&mut self) {
        self.seats.clear();
        self.first_turn = None;
    }
}

/// Queues filled by dispatch callbacks during a server tick.
#[derive(Debug, Clone, Default)]
pub struct LobbyInbox {
    messages: Rc<RefCell<VecDeque<(NetMessage, Connection)>>>,
    departed: Rc<RefCell<Vec<u8>>>,
}

impl LobbyInbox {
    /// Subscribes to the opcodes the lobby reacts to. Replaces the server's
    /// client-disconnected callback.
    pub fn attach<N: Network>(
        &self,
        dispatch: &mut NetDispatch,
        server: &mut Server<N>,
    ) -> Vec<SubscriptionId> {
        let ids = [OpCode::Join, OpCode::Ready, OpCode::MakeMove]
            .into_iter()
            .map(|code| {
                let messages = Rc::clone(&self.messages);
                dispatch.on_server(code, move |message, connection| {
                    messages.borrow_mut().push_back((message.clone(), connection));
                })
            })
            .collect();

        let departed = Rc::clone(&self.departed);
        server.set_on_client_disconnected(move |id| departed.borrow_mut().push(id));
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty() && self.departed.borrow().is_empty()
    }

    /// Feeds everything queued since the last call to `lobby` and applies the
    /// resulting messages to `server`. Messages go before departures, the
    /// same order the server pumped them in.
    pub fn drain<N: Network>(&self, lobby: &mut Lobby, server: &mut Server<N>) {
        let messages: Vec<_> = self.messages.borrow_mut().drain(..).collect();
        for (message, connection) in messages {
            for outgoing in lobby.handle(&message, connection) {
                outgoing.apply(server);
            }
        }

        let departed: Vec<u8> = self.departed.borrow_mut().drain(..).collect();
        for id in departed {
            for outgoing in lobby.remove(id) {
                outgoing.apply(server);
            }
        }
    }
}
