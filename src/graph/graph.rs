//! # Workflow graph: events linked by completion dependencies.
//!
//! A [`Graph`] holds one [`GraphNode`] per `(id, key)`. Children must complete
//! before their parent is scheduled; the root completes last.
//!
//! ```text
//!            R            add_node(A, R); add_node(B, R); add_node(C, A); add_node(C, B)
//!          ┌─┴─┐
//!          A   B          schedule order: C → {A, B} → R
//!          └─┬─┘
//!            C
//! ```
//!
//! ## Link sets (per node)
//! - `child_links`: every child, in insertion order
//! - `waiting_links`: children not yet completed (mirrors `child_links` until pruned)
//! - `executed_links`: children that completed and were unlinked
//!
//! The graph is a plain serde value; it can travel across a worker stream.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::GraphError;
use crate::model::{Event, EventKey};

/// One event's position inside a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: EventKey,
    pub event: Event,
    /// Parents in the order they linked this node; empty for the root.
    pub parent_links: Vec<EventKey>,
    pub child_links: Vec<EventKey>,
    pub waiting_links: Vec<EventKey>,
    pub executed_links: Vec<EventKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The node's event has been handed to the scheduler.
    #[serde(default)]
    pub scheduled: bool,
    /// The node's event completed and the node was unlinked.
    #[serde(default)]
    pub completed: bool,
}

impl GraphNode {
    fn new(event: Event) -> Self {
        Self {
            key: event.event_key(),
            event,
            parent_links: Vec::new(),
            child_links: Vec::new(),
            waiting_links: Vec::new(),
            executed_links: Vec::new(),
            result: None,
            scheduled: false,
            completed: false,
        }
    }

    /// Ready means every child has fired.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.waiting_links.is_empty()
    }
}

/// A workflow DAG rooted at one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: Uuid,
    pub root: EventKey,
    #[serde(with = "node_list")]
    nodes: HashMap<EventKey, GraphNode>,
}

impl Graph {
    /// Starts a workflow whose last step is `root`.
    pub fn new(mut root: Event) -> Self {
        let id = Uuid::new_v4();
        root.graph = Some(id);
        let node = GraphNode::new(root);
        let root_key = node.key.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_key.clone(), node);
        Self {
            id,
            root: root_key,
            nodes,
        }
    }

    /// Adds `event` as a dependency of `parent`.
    ///
    /// If a node with the same `(id, key)` already exists it is linked under
    /// `parent` as well, turning the tree into a DAG.
    pub fn add_node(&mut self, mut event: Event, parent: &Event) -> Result<(), GraphError> {
        let parent_key = parent.event_key();
        let key = event.event_key();

        if !self.nodes.contains_key(&parent_key) {
            return Err(GraphError::UnknownParent { parent: parent_key });
        }

        if self.nodes.contains_key(&key) {
            if self.nodes[&parent_key].child_links.contains(&key) {
                return Err(GraphError::DuplicateEdge {
                    node: key,
                    parent: parent_key,
                });
            }
            if key == parent_key || self.reaches(&key, &parent_key) {
                return Err(GraphError::Cycle {
                    node: key,
                    parent: parent_key,
                });
            }
        } else {
            if key == parent_key {
                return Err(GraphError::Cycle {
                    node: key,
                    parent: parent_key,
                });
            }
            event.graph = Some(self.id);
            self.nodes.insert(key.clone(), GraphNode::new(event));
        }

        if let Some(node) = self.nodes.get_mut(&key) {
            node.parent_links.push(parent_key.clone());
        }
        if let Some(p) = self.nodes.get_mut(&parent_key) {
            p.child_links.push(key.clone());
            p.waiting_links.push(key);
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` through child links.
    fn reaches(&self, from: &EventKey, to: &EventKey) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(k) = stack.pop() {
            if k == to {
                return true;
            }
            if !seen.insert(k) {
                continue;
            }
            if let Some(n) = self.nodes.get(k) {
                stack.extend(n.child_links.iter());
            }
        }
        false
    }

    /// Removes `key` from its parents' waiting sets and records it as executed.
    ///
    /// Idempotent: a second call changes nothing. Returns the parents that were
    /// actually updated.
    pub fn unlink_node(&mut self, key: &EventKey) -> Vec<EventKey> {
        let Some(parents) = self.nodes.get(key).map(|n| n.parent_links.clone()) else {
            return Vec::new();
        };

        let mut touched = Vec::with_capacity(parents.len());
        for parent in parents {
            let Some(p) = self.nodes.get_mut(&parent) else {
                continue;
            };
            if let Some(pos) = p.waiting_links.iter().position(|c| c == key) {
                p.waiting_links.remove(pos);
                p.executed_links.push(key.clone());
                touched.push(parent);
            }
        }
        touched
    }

    pub fn node(&self, key: &EventKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    pub(crate) fn node_mut(&mut self, key: &EventKey) -> Option<&mut GraphNode> {
        self.nodes.get_mut(key)
    }

    pub fn root_node(&self) -> Option<&GraphNode> {
        self.nodes.get(&self.root)
    }

    /// The root has completed.
    pub fn is_complete(&self) -> bool {
        self.root_node().is_some_and(|n| n.completed)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }
}

/// Serializes the node map as a list: JSON object keys must be strings.
mod node_list {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::GraphNode;
    use crate::model::EventKey;

    pub fn serialize<S: Serializer>(
        nodes: &HashMap<EventKey, GraphNode>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let mut list: Vec<&GraphNode> = nodes.values().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        list.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<HashMap<EventKey, GraphNode>, D::Error> {
        let list = Vec::<GraphNode>::deserialize(d)?;
        Ok(list.into_iter().map(|n| (n.key.clone(), n)).collect())
    }
}
