//! Graph module: a directed multigraph with cycle-aware topological sorting.
//!
//! Nodes live in a generational arena so that edges and cycle groups can be
//! plain key lists. Sorting groups strongly-connected components together:
//! a group of one node is an ordinary node, a larger group is a feedback
//! loop. The sort is cached and only recomputed after a structural change.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::error::GraphError;
use crate::invariant_ppt::{
    check_invariant, CYCLE_GROUPED, GRAPH_LEGALITY, GRAPH_REJECTS_INVALID, SORT_COVERS_GRAPH,
};
use slotmap::{new_key_type, SecondaryMap, SlotMap};

new_key_type! {
    /// Stable, generation-checked identifier for a graph node.
    pub struct NodeKey;
}

#[derive(Debug)]
struct Node<T> {
    payload: T,
    // Insertion sequence; keeps iteration and group order stable when
    // arena slots are reused.
    seq: u64,
    outgoing: Vec<NodeKey>,
    incoming: Vec<NodeKey>,
}

/// A directed multigraph of payloads.
#[derive(Debug)]
pub struct Graph<T> {
    nodes: SlotMap<NodeKey, Node<T>>,
    next_seq: u64,
    connections: usize,
    changed: bool,
    sorted: Option<Vec<Vec<NodeKey>>>,
}

impl<T> Graph<T> {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            next_seq: 0,
            connections: 0,
            changed: false,
            sorted: None,
        }
    }

    /// Add a node.
    pub fn add_node(&mut self, payload: T) -> NodeKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.nodes.insert(Node {
            payload,
            seq,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        });
        self.touch();
        key
    }

    /// Remove a node and every connection touching it, returning its payload.
    pub fn remove_node(&mut self, key: NodeKey) -> Result<T, GraphError> {
        let Some(node) = self.nodes.remove(key) else {
            check_invariant(GRAPH_REJECTS_INVALID, true, "Removal of absent node rejected");
            return Err(GraphError::NodeNotFound);
        };
        for &to in &node.outgoing {
            if let Some(target) = self.nodes.get_mut(to) {
                target.incoming.retain(|&k| k != key);
            }
        }
        for &from in &node.incoming {
            if let Some(source) = self.nodes.get_mut(from) {
                source.outgoing.retain(|&k| k != key);
            }
        }
        // Self-loops appear in both lists of the removed node.
        let loops = node.outgoing.iter().filter(|&&k| k == key).count();
        self.connections -= node.outgoing.len() + node.incoming.len() - loops;
        self.touch();
        Ok(node.payload)
    }

    /// Add a connection `from -> to`. Parallel connections are allowed.
    pub fn connect(&mut self, from: NodeKey, to: NodeKey) -> Result<(), GraphError> {
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return Err(GraphError::NodeNotFound);
        }
        self.nodes[from].outgoing.push(to);
        self.nodes[to].incoming.push(from);
        self.connections += 1;
        self.touch();
        check_invariant(
            GRAPH_LEGALITY,
            self.nodes[to].incoming.contains(&from),
            "Connection recorded on both endpoints",
        );
        Ok(())
    }

    /// Remove one connection `from -> to`.
    pub fn disconnect(&mut self, from: NodeKey, to: NodeKey) -> Result<(), GraphError> {
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return Err(GraphError::NodeNotFound);
        }
        let Some(out_pos) = self.nodes[from].outgoing.iter().position(|&k| k == to) else {
            check_invariant(GRAPH_REJECTS_INVALID, true, "Removal of absent connection rejected");
            return Err(GraphError::ConnectionNotFound);
        };
        self.nodes[from].outgoing.remove(out_pos);
        if let Some(in_pos) = self.nodes[to].incoming.iter().position(|&k| k == from) {
            self.nodes[to].incoming.remove(in_pos);
        }
        self.connections -= 1;
        self.touch();
        Ok(())
    }

    /// Whether the node exists.
    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Borrow a node's payload.
    pub fn get(&self, key: NodeKey) -> Option<&T> {
        self.nodes.get(key).map(|n| &n.payload)
    }

    /// Mutably borrow a node's payload. Payload edits are not structural.
    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut T> {
        self.nodes.get_mut(key).map(|n| &mut n.payload)
    }

    /// Nodes this node connects to, one entry per connection.
    pub fn successors(&self, key: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes
            .get(key)
            .into_iter()
            .flat_map(|n| n.outgoing.iter().copied())
    }

    /// Nodes connecting to this node, one entry per connection.
    pub fn predecessors(&self, key: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes
            .get(key)
            .into_iter()
            .flat_map(|n| n.incoming.iter().copied())
    }

    /// Number of connections ending at this node.
    pub fn in_degree(&self, key: NodeKey) -> usize {
        self.nodes.get(key).map_or(0, |n| n.incoming.len())
    }

    /// Node keys in insertion order.
    pub fn keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self.nodes.keys().collect();
        keys.sort_by_key(|&k| self.nodes[k].seq);
        keys
    }

    /// Total node count.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Total connection count.
    pub fn connection_count(&self) -> usize {
        self.connections
    }

    /// Whether the structure changed since the last `mark_clean`.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Acknowledge the current structure; called once the plan is rebuilt.
    pub fn mark_clean(&mut self) {
        self.changed = false;
    }

    /// Topologically ordered groups of nodes.
    ///
    /// Every connection from group A to group B has A before B. Groups of
    /// more than one node are strongly-connected components; members are
    /// listed in insertion order, so the order is stable across calls.
    pub fn sort(&mut self) -> &[Vec<NodeKey>] {
        if self.sorted.is_none() {
            let groups = self.strongly_connected();
            let covered: usize = groups.iter().map(Vec::len).sum();
            check_invariant(
                SORT_COVERS_GRAPH,
                covered == self.nodes.len(),
                "Sort emits every node exactly once",
            );
            check_invariant(
                CYCLE_GROUPED,
                groups.iter().all(|g| !g.is_empty()),
                "Every group is non-empty",
            );
            self.sorted = Some(groups);
        }
        self.sorted.as_deref().unwrap_or_default()
    }

    fn touch(&mut self) {
        self.changed = true;
        self.sorted = None;
    }

    // Iterative Tarjan. Components come out sinks-first and are reversed.
    fn strongly_connected(&self) -> Vec<Vec<NodeKey>> {
        let mut index: SecondaryMap<NodeKey, usize> = SecondaryMap::with_capacity(self.nodes.len());
        let mut low: SecondaryMap<NodeKey, usize> = SecondaryMap::with_capacity(self.nodes.len());
        let mut on_stack: SecondaryMap<NodeKey, bool> =
            SecondaryMap::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeKey> = Vec::new();
        let mut groups: Vec<Vec<NodeKey>> = Vec::new();
        let mut counter = 0usize;

        for root in self.keys() {
            if index.contains_key(root) {
                continue;
            }
            index.insert(root, counter);
            low.insert(root, counter);
            counter += 1;
            stack.push(root);
            on_stack.insert(root, true);
            let mut calls: Vec<(NodeKey, usize)> = vec![(root, 0)];

            while let Some(frame) = calls.last_mut() {
                let node = frame.0;
                if let Some(&next) = self.nodes[node].outgoing.get(frame.1) {
                    frame.1 += 1;
                    if !index.contains_key(next) {
                        index.insert(next, counter);
                        low.insert(next, counter);
                        counter += 1;
                        stack.push(next);
                        on_stack.insert(next, true);
                        calls.push((next, 0));
                    } else if on_stack.get(next).copied().unwrap_or(false) {
                        low[node] = low[node].min(index[next]);
                    }
                    continue;
                }

                calls.pop();
                if let Some(&(parent, _)) = calls.last() {
                    low[parent] = low[parent].min(low[node]);
                }
                if low[node] == index[node] {
                    let mut group = Vec::new();
                    while let Some(member) = stack.pop() {
                        on_stack.insert(member, false);
                        group.push(member);
                        if member == node {
                            break;
                        }
                    }
                    group.sort_by_key(|&k| self.nodes[k].seq);
                    groups.push(group);
                }
            }
        }

        groups.reverse();
        groups
    }
}

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}
