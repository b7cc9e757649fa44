//! Ordered list of the server's live connection handles.
//!
//! A slot is invalidated in place when its connection reports Disconnect
//! during the message pump, and the next tick's `compact` removes it. Removal
//! swaps the last entry into the hole, so relative order is not preserved;
//! connections are addressed by value, never by index, across ticks.

use log::warn;
use shared::Connection;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: Vec<Option<Connection>>,
}

impl ConnectionRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Appends a handle. Returns false, leaving the registry unchanged, if an
    /// equal handle is already present.
    pub fn add(&mut self, connection: Connection) -> bool {
        if self.contains(connection) {
            warn!("Connection {} is already registered", connection);
            return false;
        }
        self.slots.push(Some(connection));
        true
    }

    pub fn contains(&self, connection: Connection) -> bool {
        self.slots.iter().any(|slot| *slot == Some(connection))
    }

    /// True if the handle is registered and the transport still reports it.
    pub fn is_live<F>(&self, connection: Connection, is_created: F) -> bool
    where
        F: Fn(Connection) -> bool,
    {
        self.contains(connection) && is_created(connection)
    }

    /// Handle stored at `index`, if the slot has not been invalidated.
    pub fn get(&self, index: usize) -> Option<Connection> {
        self.slots.get(index).copied().flatten()
    }

    /// Clears the slot at `index`; `compact` removes it later.
    pub fn invalidate(&mut self, index: usize) -> Option<Connection> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Drops every invalidated slot and every handle the transport no longer
    /// reports as created. Returns how many entries were removed.
    pub fn compact<F>(&mut self, is_created: F) -> usize
    where
        F: Fn(Connection) -> bool,
    {
        let before = self.slots.len();
        let mut i = 0;
        while i < self.slots.len() {
            let keep = matches!(self.slots[i], Some(connection) if is_created(connection));
            if keep {
                i += 1;
            } else {
                // the swapped-in entry lands on `i` and is checked next
                self.slots.swap_remove(i);
            }
        }
        before - self.slots.len()
    }

    /// Handles in slot order, skipping invalidated slots.
    pub fn live(&self) -> impl Iterator<Item = Connection> + '_ {
        self.slots.iter().flatten().copied()
    }

    /// Number of slots, including invalidated ones not yet compacted.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn conn(id: u8) -> Connection {
        Connection::new(id, 0)
    }

    #[test]
    fn test_registry_creation() {
        let registry = ConnectionRegistry::with_capacity(10);
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_add() {
        let mut registry = ConnectionRegistry::default();
        assert!(registry.add(conn(0)));
        assert!(registry.add(conn(1)));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(conn(1)));
        assert_eq!(registry.live().collect::<Vec<_>>(), vec![conn(0), conn(1)]);
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut registry = ConnectionRegistry::default();
        assert!(registry.add(conn(4)));
        assert!(!registry.add(conn(4)));
        assert_eq!(registry.len(), 1);

        // same slot id with a newer version is a different connection
        assert!(registry.add(Connection::new(4, 1)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_is_live() {
        let mut registry = ConnectionRegistry::default();
        registry.add(conn(1));

        assert!(registry.is_live(conn(1), |_| true));
        assert!(!registry.is_live(conn(1), |_| false));
        assert!(!registry.is_live(conn(2), |_| true));
    }

    #[test]
    fn test_invalidate() {
        let mut registry = ConnectionRegistry::default();
        registry.add(conn(0));
        registry.add(conn(1));

        assert_eq!(registry.invalidate(0), Some(conn(0)));
        assert_eq!(registry.invalidate(0), None);
        assert_eq!(registry.invalidate(9), None);
        assert_eq!(registry.get(0), None);
        assert_eq!(registry.get(1), Some(conn(1)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.live().collect::<Vec<_>>(), vec![conn(1)]);
    }

    #[test]
    fn test_compact_removes_dead_handles() {
        let mut registry = ConnectionRegistry::default();
        for id in 0..5 {
            registry.add(conn(id));
        }
        registry.invalidate(2);
        let dead: HashSet<Connection> = [conn(0)].into_iter().collect();

        let removed = registry.compact(|c| !dead.contains(&c));
        assert_eq!(removed, 2);
        assert_eq!(registry.len(), 3);

        let survivors: HashSet<Connection> = registry.live().collect();
        let expected: HashSet<Connection> = [conn(1), conn(3), conn(4)].into_iter().collect();
        assert_eq!(survivors, expected);
    }

    #[test]
    fn test_compact_consecutive_dead_with_dead_tail() {
        // swap-back must re-check the entry moved into the hole
        let mut registry = ConnectionRegistry::default();
        for id in 0..6 {
            registry.add(conn(id));
        }
        let alive: HashSet<Connection> = [conn(2), conn(4)].into_iter().collect();

        registry.compact(|c| alive.contains(&c));
        assert_eq!(registry.len(), 2);
        assert!(registry.live().all(|c| alive.contains(&c)));
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut registry = ConnectionRegistry::default();
        for id in 0..4 {
            registry.add(conn(id));
        }
        let is_created = |c: Connection| c.internal_id() % 2 == 0;

        assert_eq!(registry.compact(is_created), 2);
        let after_first: Vec<Connection> = registry.live().collect();

        assert_eq!(registry.compact(is_created), 0);
        assert_eq!(registry.live().collect::<Vec<_>>(), after_first);
    }

    #[test]
    fn test_no_dead_handle_survives_mixed_sequence() {
        let mut registry = ConnectionRegistry::default();
        let mut dead = HashSet::new();

        for round in 0u8..20 {
            registry.add(conn(round));
            if round % 3 == 0 {
                dead.insert(conn(round));
            }
            if round % 4 == 0 {
                let before = registry.len();
                registry.compact(|c| !dead.contains(&c));
                assert!(registry.len() <= before);
                assert!(registry.live().all(|c| !dead.contains(&c)));
            }
        }

        registry.compact(|c| !dead.contains(&c));
        assert!(registry.live().all(|c| registry.is_live(c, |c| !dead.contains(&c))));
        assert_eq!(registry.len(), 20 - dead.len());
    }

    #[test]
    fn test_clear() {
        let mut registry = ConnectionRegistry::default();
        registry.add(conn(0));
        registry.clear();
        assert!(registry.is_empty());
    }
}
