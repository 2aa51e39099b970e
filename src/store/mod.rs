//! Store Module
//!
//! The concurrent façade over the (a,b)-tree engine.
//!
//! ## Concurrency model
//! A readers-writer gate guards the tree: any number of concurrent
//! readers, or exactly one writer, never both. Every operation takes
//! effect at a single point between acquiring and releasing the gate, so
//! a reader can never observe a half-applied mutation and writes are
//! linearised in lock-acquisition order.
//!
//! Uses parking_lot::RwLock, which never poisons on panic.

use parking_lot::RwLock;

use crate::error::Result;
use crate::protocol::Value;
use crate::tree::AbTree;

/// Concurrent key-value store backed by an (a,b)-tree
pub struct Store {
    /// The engine; the gate around it is the only synchronisation
    tree: RwLock<AbTree>,
}

impl Store {
    /// Create a store over an empty tree with the given branching bounds
    pub fn new(a: usize, b: usize) -> Result<Self> {
        Ok(Store {
            tree: RwLock::new(AbTree::new(a, b)?),
        })
    }

    /// Insert or replace a key (write gate)
    pub fn add(&self, key: String, value: Value) {
        self.tree.write().add(key, value);
    }

    /// Remove a key (write gate); absent keys are a successful no-op
    pub fn remove(&self, key: &str) -> bool {
        self.tree.write().remove(key)
    }

    /// Look up a key (read gate)
    pub fn find(&self, key: &str) -> Option<Value> {
        self.tree.read().find(key).cloned()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }
}
