//! (a,b)-Tree Module
//!
//! The ordered key-value engine behind the store: a balanced search tree
//! parameterised by `a >= 2` and `b >= 2a - 1`, with logarithmic
//! `find` / `add` / `remove`.
//!
//! ## Invariants
//! - Every non-root node holds between `a - 1` and `b - 1` entries; the
//!   root holds between `1` and `b - 1`.
//! - An internal node with `k` entries has exactly `k + 1` children;
//!   nodes on the last internal layer have none.
//! - Keys are strictly increasing within a node, and every child subtree
//!   lies strictly between the entries that bracket it.
//! - All last-layer nodes sit at the same depth.
//!
//! ## Rebalancing
//! - `add` overwrites in place or inserts at the last layer; a node that
//!   reaches `b` entries splits around its (left-biased) middle entry and
//!   pushes it into the parent, growing a new root at the top if needed.
//! - `remove` reduces an internal deletion to a last-layer one by
//!   swapping in the predecessor, then repairs underfull nodes bottom-up,
//!   borrowing from a sibling when it has entries to spare and merging
//!   through the parent pivot when it does not. An emptied root collapses
//!   onto its single child (or away entirely).
//!
//! The structure is deterministic: the same operations in the same order
//! produce the same tree for fixed `a` and `b`.

mod node;

pub use node::Node;

use crate::error::{Result, TideError};
use crate::protocol::Value;

/// A key and the value stored under it; the unit held by tree nodes
#[derive(Debug, Clone, PartialEq)]
pub struct KeyData {
    pub key: String,
    pub value: Value,
}

/// Ordered map from string keys to typed values
#[derive(Debug, Clone, PartialEq)]
pub struct AbTree {
    /// Absent for an empty tree
    root: Option<Box<Node>>,

    /// Lower branching bound (immutable after construction)
    a: usize,

    /// Upper branching bound (immutable after construction)
    b: usize,

    /// Number of stored keys
    size: usize,
}

impl AbTree {
    /// Create an empty tree; rejects parameters outside `a >= 2`,
    /// `b >= 2a - 1`
    pub fn new(a: usize, b: usize) -> Result<Self> {
        if a < 2 || b < 2 * a - 1 {
            return Err(TideError::InvalidTreeOrder { a, b });
        }
        Ok(AbTree {
            root: None,
            a,
            b,
            size: 0,
        })
    }

    /// Lower branching bound
    pub fn a(&self) -> usize {
        self.a
    }

    /// Upper branching bound
    pub fn b(&self) -> usize {
        self.b
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of node layers; 0 for an empty tree
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            depth += 1;
            node = n.first_child();
        }
        depth
    }

    /// Look up a key
    pub fn find(&self, key: &str) -> Option<&Value> {
        let mut node = self.root.as_deref()?;
        loop {
            match node.search(key) {
                Ok(i) => return Some(node.entry_value(i)),
                Err(i) => {
                    node = node.child(i)?;
                }
            }
        }
    }

    /// Insert a key or overwrite its value in place
    pub fn add(&mut self, key: String, value: Value) {
        match self.root.as_mut() {
            None => {
                self.root = Some(Box::new(Node::leaf(KeyData { key, value })));
                self.size = 1;
            }
            Some(root) => {
                let inserted = root.insert(key, value, self.b);
                if let Some((separator, right)) = inserted.split {
                    // the old root overflowed; grow a new root above it
                    let left = self.root.take().unwrap();
                    self.root = Some(Box::new(Node::branch(separator, left, right)));
                }
                if inserted.added {
                    self.size += 1;
                }
            }
        }
    }

    /// Remove a key; returns whether it was present. Removing an absent
    /// key leaves the tree untouched.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(root) = self.root.as_mut() else {
            return false;
        };

        let removed = root.remove(key, self.a);
        if removed {
            self.size -= 1;
            if root.is_drained() {
                // an emptied root collapses onto its single child, or the
                // tree becomes empty
                let old_root = self.root.take().unwrap();
                self.root = old_root.into_single_child();
            }
        }
        removed
    }

    /// Walk the whole tree and report the first structural invariant
    /// violation, if any. Intended for tests and diagnostics.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let Some(root) = self.root.as_deref() else {
            if self.size != 0 {
                return Err(format!("empty tree reports size {}", self.size));
            }
            return Ok(());
        };

        let mut last_layer_depth = None;
        let mut counted = 0;
        check_node(
            root,
            self.a,
            self.b,
            true,
            None,
            None,
            1,
            &mut last_layer_depth,
            &mut counted,
        )?;

        if counted != self.size {
            return Err(format!(
                "tree holds {} entries but reports size {}",
                counted, self.size
            ));
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn check_node(
    node: &Node,
    a: usize,
    b: usize,
    is_root: bool,
    lower: Option<&str>,
    upper: Option<&str>,
    depth: usize,
    last_layer_depth: &mut Option<usize>,
    counted: &mut usize,
) -> std::result::Result<(), String> {
    let k = node.entry_count();
    *counted += k;

    let min = if is_root { 1 } else { a - 1 };
    if k < min || k > b - 1 {
        return Err(format!(
            "node at depth {} holds {} entries (allowed {}..={})",
            depth,
            k,
            min,
            b - 1
        ));
    }

    let keys = node.keys();
    for pair in keys.windows(2) {
        if pair[0] >= pair[1] {
            return Err(format!("keys out of order at depth {}: {:?}", depth, pair));
        }
    }
    if let Some(lo) = lower {
        if keys[0] <= lo {
            return Err(format!("key {:?} escapes its subtree lower bound", keys[0]));
        }
    }
    if let Some(hi) = upper {
        if keys[k - 1] >= hi {
            return Err(format!(
                "key {:?} escapes its subtree upper bound",
                keys[k - 1]
            ));
        }
    }

    if node.is_last_layer() {
        match last_layer_depth {
            None => *last_layer_depth = Some(depth),
            Some(expected) if *expected != depth => {
                return Err(format!(
                    "last-layer node at depth {} (expected {})",
                    depth, expected
                ));
            }
            _ => {}
        }
        return Ok(());
    }

    if node.child_count() != k + 1 {
        return Err(format!(
            "node at depth {} holds {} entries but {} children",
            depth,
            k,
            node.child_count()
        ));
    }

    for i in 0..node.child_count() {
        let child_lower = if i == 0 { lower } else { Some(keys[i - 1]) };
        let child_upper = if i == k { upper } else { Some(keys[i]) };
        check_node(
            node.child(i).unwrap(),
            a,
            b,
            false,
            child_lower,
            child_upper,
            depth + 1,
            last_layer_depth,
            counted,
        )?;
    }
    Ok(())
}
