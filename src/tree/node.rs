//! Tree nodes
//!
//! A node owns its entries and its children; there are no parent pointers.
//! Rebalancing works bottom-up: a recursive call reports back, and the
//! parent frame repairs the child it descended into. A node with no
//! children sits on the last internal layer.

use super::KeyData;
use crate::protocol::Value;

/// Result of a subtree insertion
pub(super) struct Inserted {
    /// False when an existing key's value was overwritten in place
    pub added: bool,

    /// Present when this node overflowed and split; the separator and the
    /// new right sibling must be installed in the parent
    pub split: Option<(KeyData, Box<Node>)>,
}

/// A single tree node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Entries in strictly increasing key order
    pub(super) entries: Vec<KeyData>,

    /// Either empty (last internal layer) or exactly `entries.len() + 1`
    pub(super) children: Vec<Box<Node>>,
}

impl Node {
    /// A last-layer node holding a single entry
    pub(super) fn leaf(entry: KeyData) -> Self {
        Node {
            entries: vec![entry],
            children: Vec::new(),
        }
    }

    /// A one-entry internal node over two children; the shape of a freshly
    /// grown root
    pub(super) fn branch(separator: KeyData, left: Box<Node>, right: Box<Node>) -> Self {
        Node {
            entries: vec![separator],
            children: vec![left, right],
        }
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Whether this node sits on the last internal layer (no children)
    pub fn is_last_layer(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of entries held by this node
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of children held by this node
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// The keys of this node, in order
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Borrow child `i`, if present
    pub fn child(&self, i: usize) -> Option<&Node> {
        self.children.get(i).map(|c| c.as_ref())
    }

    pub(super) fn first_child(&self) -> Option<&Node> {
        self.child(0)
    }

    pub(super) fn entry_value(&self, i: usize) -> &Value {
        &self.entries[i].value
    }

    /// Whether a removal drained this node of its last entry
    pub(super) fn is_drained(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the node, yielding its sole child if it has one
    pub(super) fn into_single_child(self) -> Option<Box<Node>> {
        self.children.into_iter().next()
    }

    /// Locate `key` in this node: `Ok(i)` when `entries[i]` holds it,
    /// `Err(i)` with the child slot whose subtree may contain it
    pub(super) fn search(&self, key: &str) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.as_str().cmp(key))
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    /// Insert or overwrite `key` in this subtree.
    ///
    /// `b` is the node capacity bound; a node that reaches `b` entries
    /// splits and hands its middle entry up to the caller.
    pub(super) fn insert(&mut self, key: String, value: Value, b: usize) -> Inserted {
        match self.search(&key) {
            Ok(i) => {
                self.entries[i].value = value;
                return Inserted {
                    added: false,
                    split: None,
                };
            }
            Err(i) => {
                if self.is_last_layer() {
                    self.entries.insert(i, KeyData { key, value });
                } else {
                    let inserted = self.children[i].insert(key, value, b);
                    if let Some((sep, right)) = inserted.split {
                        self.entries.insert(i, sep);
                        self.children.insert(i + 1, right);
                    }
                    if !inserted.added {
                        return Inserted {
                            added: false,
                            split: None,
                        };
                    }
                }
            }
        }

        let split = (self.entries.len() == b).then(|| self.split());
        Inserted { added: true, split }
    }

    /// Split an overflowing node around its middle entry (left-biased for
    /// an even entry count) and return the separator plus the right half.
    fn split(&mut self) -> (KeyData, Box<Node>) {
        let mid = (self.entries.len() - 1) / 2;

        let right_entries = self.entries.split_off(mid + 1);
        // entries now holds 0..=mid; pop yields the separator
        let separator = self.entries.pop().unwrap();

        let right_children = if self.is_last_layer() {
            Vec::new()
        } else {
            self.children.split_off(mid + 1)
        };

        let right = Box::new(Node {
            entries: right_entries,
            children: right_children,
        });
        (separator, right)
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Remove `key` from this subtree; returns whether it was present.
    ///
    /// `a` is the lower branching bound. A child left underfull by the
    /// removal is repaired here, in its parent's frame; this node itself
    /// may end up underfull for its own parent to repair.
    pub(super) fn remove(&mut self, key: &str, a: usize) -> bool {
        match self.search(key) {
            Ok(i) => {
                if self.is_last_layer() {
                    self.entries.remove(i);
                } else {
                    // Replace with the predecessor: the rightmost entry of
                    // child i's subtree, then repair the path walked.
                    let predecessor = self.children[i].take_last(a);
                    self.entries[i] = predecessor;
                    self.repair_child(i, a);
                }
                true
            }
            Err(i) => {
                if self.is_last_layer() {
                    return false;
                }
                let removed = self.children[i].remove(key, a);
                if removed {
                    self.repair_child(i, a);
                }
                removed
            }
        }
    }

    /// Remove and return the rightmost entry of this subtree, repairing
    /// any underflow below this node on the way back up.
    fn take_last(&mut self, a: usize) -> KeyData {
        if self.is_last_layer() {
            // every reachable node holds at least one entry
            self.entries.pop().unwrap()
        } else {
            let last = self.children.len() - 1;
            let taken = self.children[last].take_last(a);
            self.repair_child(last, a);
            taken
        }
    }

    /// Restore the minimum-occupancy invariant of child `i` after a
    /// removal below it, rotating from or merging with a sibling.
    ///
    /// The left sibling is preferred; only the leftmost child borrows from
    /// its right sibling. A minimal sibling forces a merge through the
    /// separating pivot, which may leave this node underfull in turn.
    fn repair_child(&mut self, i: usize, a: usize) {
        if self.children[i].entries.len() >= a - 1 {
            return;
        }

        if i > 0 {
            if self.children[i - 1].entries.len() == a - 1 {
                self.merge_children(i - 1);
            } else {
                self.rotate_from_left(i);
            }
        } else if self.children[i + 1].entries.len() == a - 1 {
            self.merge_children(i);
        } else {
            self.rotate_from_right(i);
        }
    }

    /// Merge children `left_idx` and `left_idx + 1` through the pivot
    /// entry that separates them.
    fn merge_children(&mut self, left_idx: usize) {
        let right = self.children.remove(left_idx + 1);
        let pivot = self.entries.remove(left_idx);

        let left = &mut self.children[left_idx];
        left.entries.push(pivot);
        left.entries.extend(right.entries);
        left.children.extend(right.children);
    }

    /// Move one entry from the left sibling into child `i` through the
    /// pivot; the parent's entry count is unchanged.
    fn rotate_from_left(&mut self, i: usize) {
        let pivot_idx = i - 1;
        let (left_half, right_half) = self.children.split_at_mut(i);
        let sibling = &mut left_half[i - 1];
        let child = &mut right_half[0];

        let replacement = sibling.entries.pop().unwrap();
        let pivot = std::mem::replace(&mut self.entries[pivot_idx], replacement);
        child.entries.insert(0, pivot);

        if let Some(moved) = sibling.children.pop() {
            child.children.insert(0, moved);
        }
    }

    /// Mirror image of `rotate_from_left` for the leftmost child.
    fn rotate_from_right(&mut self, i: usize) {
        let pivot_idx = i;
        let (left_half, right_half) = self.children.split_at_mut(i + 1);
        let child = &mut left_half[i];
        let sibling = &mut right_half[0];

        let replacement = sibling.entries.remove(0);
        let pivot = std::mem::replace(&mut self.entries[pivot_idx], replacement);
        child.entries.push(pivot);

        if !sibling.children.is_empty() {
            child.children.push(sibling.children.remove(0));
        }
    }
}
