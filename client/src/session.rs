//! Client-side view of the lobby, rebuilt from what the server sends.

use log::{debug, info};
use shared::protocol::NetMakeMove;
use shared::{NetDispatch, NetMessage, OpCode, Player, SubscriptionId};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Id assigned by the server's WELCOME.
    pub local_id: Option<u8>,
    pub players: BTreeMap<u8, Player>,
    /// Player who moves first, once the game has started.
    pub first_turn: Option<u8>,
    /// Moves relayed from other players, oldest first.
    pub moves: Vec<NetMakeMove>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: &NetMessage) {
        match message {
            NetMessage::Welcome(welcome) => {
                info!("Server assigned id {}", welcome.assigned_id);
                self.local_id = Some(welcome.assigned_id);
            }
            NetMessage::Join(join) => {
                info!("Player {} ('{}') is in the lobby", join.player.id, join.player.name);
                self.players.insert(join.player.id, join.player.clone());
            }
            NetMessage::Disconnect(disconnect) => {
                if let Some(player) = self.players.remove(&disconnect.player_id) {
                    info!("Player {} ('{}') left", player.id, player.name);
                }
            }
            NetMessage::Ready(ready) => {
                if let Some(player) = self.players.get_mut(&ready.player_id) {
                    player.ready = ready.ready;
                }
            }
            NetMessage::StartGame(start) => {
                info!("Game started, player {} moves first", start.first_turn);
                self.first_turn = Some(start.first_turn);
            }
            NetMessage::MakeMove(mv) => {
                debug!("Player {} moved to ({}, {})", mv.player_id, mv.x, mv.y);
                self.moves.push(mv.clone());
            }
            NetMessage::KeepAlive => {}
        }
    }

    pub fn has_started(&self) -> bool {
        self.first_turn.is_some()
    }

    /// True when the server picked this client to make the opening move.
    pub fn moves_first(&self) -> bool {
        self.local_id.is_some() && self.local_id == self.first_turn
    }
}

/// Shared handle the dispatch callbacks write into.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: Rc<RefCell<SessionState>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every opcode the session tracks.
    pub fn attach(&self, dispatch: &mut NetDispatch) -> Vec<SubscriptionId> {
        [
            OpCode::Welcome,
            OpCode::Join,
            OpCode::Disconnect,
            OpCode::Ready,
            OpCode::StartGame,
            OpCode::MakeMove,
        ]
        .into_iter()
        .map(|code| {
            let state = Rc::clone(&self.state);
            dispatch.on_client(code, move |message| state.borrow_mut().apply(message))
        })
        .collect()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn local_id(&self) -> Option<u8> {
        self.state.borrow().local_id
    }

    pub fn player_count(&self) -> usize {
        self.state.borrow().players.len()
    }

    pub fn reset(&self) {
        *self.state.borrow_mut() = SessionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{NetReady, NetStartGame, NetWelcome};

    fn player(id: u8, name: &str) -> Player {
        Player::new(id, name)
    }

    #[test]
    fn test_roster_tracking() {
        let mut state = SessionState::new();
        state.apply(&NetMessage::Welcome(NetWelcome { assigned_id: 1 }));
        state.apply(&NetMessage::join(player(0, "Alice")));
        state.apply(&NetMessage::join(player(1, "Bob")));
        state.apply(&NetMessage::Ready(NetReady {
            player_id: 0,
            ready: true,
        }));

        assert_eq!(state.local_id, Some(1));
        assert_eq!(state.players.len(), 2);
        assert!(state.players[&0].ready);
        assert!(!state.players[&1].ready);

        state.apply(&NetMessage::disconnect(0));
        assert_eq!(state.players.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_unknown_ids_ignored() {
        let mut state = SessionState::new();
        state.apply(&NetMessage::disconnect(9));
        state.apply(&NetMessage::Ready(NetReady {
            player_id: 9,
            ready: true,
        }));
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn test_start_and_opening_move() {
        let mut state = SessionState::new();
        state.apply(&NetMessage::Welcome(NetWelcome { assigned_id: 0 }));
        assert!(!state.has_started());

        state.apply(&NetMessage::StartGame(NetStartGame { first_turn: 0 }));
        assert!(state.has_started());
        assert!(state.moves_first());

        state.apply(&NetMessage::MakeMove(NetMakeMove {
            player_id: 1,
            x: 2,
            y: 0,
        }));
        assert_eq!(state.moves.len(), 1);
        // relayed moves do not change who opened
        assert!(state.moves_first());
    }

    #[test]
    fn test_session_via_dispatch() {
        let session = Session::new();
        let mut dispatch = NetDispatch::new();
        assert_eq!(session.attach(&mut dispatch).len(), 6);

        NetMessage::Welcome(NetWelcome { assigned_id: 4 }).received_on_client(&mut dispatch);
        NetMessage::join(player(4, "Carol")).received_on_client(&mut dispatch);

        assert_eq!(session.local_id(), Some(4));
        assert_eq!(session.player_count(), 1);

        session.reset();
        assert_eq!(session.snapshot(), SessionState::default());
    }
}
