//! Opcode → callback routing between the engines' message pumps and domain code.
//!
//! A `NetDispatch` is owned by whatever composes the application and lent to
//! `Server::update`/`Client::update`. Subscriptions live until they are
//! explicitly unregistered or the table is cleared; a component that goes
//! away without unregistering leaves its callbacks behind.
//!
//! Callbacks run on the tick thread. A callback that panics is logged and
//! skipped, the remaining callbacks for the same message still run.

use crate::protocol::{NetMessage, OpCode};
use crate::transport::Connection;
use log::error;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub type ServerCallback = Box<dyn FnMut(&NetMessage, Connection)>;
pub type ClientCallback = Box<dyn FnMut(&NetMessage)>;

/// Handle returned by registration, used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct NetDispatch {
    on_server: HashMap<OpCode, Vec<(SubscriptionId, ServerCallback)>>,
    on_client: HashMap<OpCode, Vec<(SubscriptionId, ClientCallback)>>,
    next_id: u64,
}

impl NetDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_subscription(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Subscribes to `code` as received by a server, with the sending connection.
    pub fn on_server<F>(&mut self, code: OpCode, callback: F) -> SubscriptionId
    where
        F: FnMut(&NetMessage, Connection) + 'static,
    {
        let id = self.next_subscription();
        self.on_server
            .entry(code)
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    /// Subscribes to `code` as received by a client.
    pub fn on_client<F>(&mut self, code: OpCode, callback: F) -> SubscriptionId
    where
        F: FnMut(&NetMessage) + 'static,
    {
        let id = self.next_subscription();
        self.on_client
            .entry(code)
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    /// Removes a subscription from whichever table holds it.
    pub fn unregister(&mut self, id: SubscriptionId) -> bool {
        for callbacks in self.on_server.values_mut() {
            if let Some(pos) = callbacks.iter().position(|(sub, _)| *sub == id) {
                callbacks.remove(pos);
                return true;
            }
        }
        for callbacks in self.on_client.values_mut() {
            if let Some(pos) = callbacks.iter().position(|(sub, _)| *sub == id) {
                callbacks.remove(pos);
                return true;
            }
        }
        false
    }

    /// Calls every server subscriber of the message's opcode in registration
    /// order. Returns how many completed without panicking.
    pub fn publish_on_server(&mut self, message: &NetMessage, connection: Connection) -> usize {
        let code = message.code();
        let Some(callbacks) = self.on_server.get_mut(&code) else {
            return 0;
        };

        let mut completed = 0;
        for (id, callback) in callbacks.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| callback(message, connection))) {
                Ok(()) => completed += 1,
                Err(_) => error!(
                    "Server callback {:?} for {:?} from {} panicked",
                    id, code, connection
                ),
            }
        }
        completed
    }

    /// Calls every client subscriber of the message's opcode in registration
    /// order. Returns how many completed without panicking.
    pub fn publish_on_client(&mut self, message: &NetMessage) -> usize {
        let code = message.code();
        let Some(callbacks) = self.on_client.get_mut(&code) else {
            return 0;
        };

        let mut completed = 0;
        for (id, callback) in callbacks.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(()) => completed += 1,
                Err(_) => error!("Client callback {:?} for {:?} panicked", id, code),
            }
        }
        completed
    }

    pub fn server_subscribers(&self, code: OpCode) -> usize {
        self.on_server.get(&code).map_or(0, Vec::len)
    }

    pub fn client_subscribers(&self, code: OpCode) -> usize {
        self.on_client.get(&code).map_or(0, Vec::len)
    }

    /// Drops every subscription in both tables.
    pub fn clear(&mut self) {
        self.on_server.clear();
        self.on_client.clear();
    }
}
