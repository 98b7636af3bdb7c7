//! # Executor: walks a graph and emits the nodes that are ready.
//!
//! The executor is pure: it mutates the [`Graph`] bookkeeping and returns the
//! events the caller must post. Posting goes through the ordinary
//! `post_event` path, so per-key serialization still applies to graph nodes.
//!
//! ```text
//! start(graph) ──► run(root)
//!                    ├─ node ready (waiting_links empty) ─► mark scheduled, emit event
//!                    └─ otherwise ─► run(child) for every waiting child (depth-first)
//!
//! complete(graph, key, result)
//!   store result ─► unlink from parents ─► run(parent) for each parent touched
//! ```
//!
//! A node is emitted at most once: `scheduled` is checked before emitting,
//! which matters when several parents share one child.

use serde_json::Value;

use super::Graph;
use crate::model::{Event, EventKey};

/// Result of a node completion.
#[derive(Debug, Default)]
pub struct Completion {
    /// Events that became ready and must be posted.
    pub ready: Vec<Event>,
    /// The root completed; the graph is finished.
    pub finished: bool,
}

pub struct Executor;

impl Executor {
    /// Emits the initial frontier: every leaf reachable from the root.
    pub fn start(graph: &mut Graph) -> Vec<Event> {
        let mut out = Vec::new();
        let root = graph.root.clone();
        Self::run(graph, &root, &mut out);
        out
    }

    /// Schedules `key` if ready, otherwise descends into its waiting children.
    pub fn run(graph: &mut Graph, key: &EventKey, out: &mut Vec<Event>) {
        let Some(node) = graph.node(key) else {
            return;
        };
        if node.scheduled || node.completed {
            return;
        }

        if node.is_ready() {
            if let Some(node) = graph.node_mut(key) {
                node.scheduled = true;
                out.push(node.event.clone());
            }
            return;
        }

        let children = node.waiting_links.clone();
        for child in &children {
            Self::run(graph, child, out);
        }
    }

    /// Records completion of `key` and returns what became ready.
    ///
    /// Completing an unknown or already completed node is a no-op.
    pub fn complete(graph: &mut Graph, key: &EventKey, result: Value) -> Completion {
        let mut done = Completion::default();
        match graph.node_mut(key) {
            Some(node) if !node.completed => {
                node.completed = true;
                node.result = Some(result);
            }
            _ => return done,
        }

        for parent in graph.unlink_node(key) {
            Self::run(graph, &parent, &mut done.ready);
        }
        done.finished = *key == graph.root;
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(events: &[Event]) -> Vec<&str> {
        let mut v: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        v.sort_unstable();
        v
    }

    fn key(id: &str) -> EventKey {
        EventKey::new(id, None)
    }

    #[test]
    fn root_waits_for_every_child() {
        let r = Event::new("r");
        let mut g = Graph::new(r.clone());
        g.add_node(Event::new("a"), &r).unwrap();
        g.add_node(Event::new("b"), &r).unwrap();

        let first = Executor::start(&mut g);
        assert_eq!(ids(&first), vec!["a", "b"]);

        let c = Executor::complete(&mut g, &key("a"), json!(1));
        assert!(c.ready.is_empty());
        assert!(!c.finished);

        let c = Executor::complete(&mut g, &key("b"), json!(2));
        assert_eq!(ids(&c.ready), vec!["r"]);

        let c = Executor::complete(&mut g, &key("r"), Value::Null);
        assert!(c.ready.is_empty());
        assert!(c.finished);
        assert!(g.is_complete());
        assert_eq!(g.node(&key("a")).unwrap().result, Some(json!(1)));
    }

    #[test]
    fn single_node_graph_schedules_root() {
        let mut g = Graph::new(Event::new("only"));
        let first = Executor::start(&mut g);
        assert_eq!(ids(&first), vec!["only"]);
        assert!(Executor::start(&mut g).is_empty());
    }

    #[test]
    fn deep_chain_runs_bottom_up() {
        let r = Event::new("r");
        let a = Event::new("a");
        let mut g = Graph::new(r.clone());
        g.add_node(a.clone(), &r).unwrap();
        g.add_node(Event::new("leaf"), &a).unwrap();

        assert_eq!(ids(&Executor::start(&mut g)), vec!["leaf"]);
        assert_eq!(
            ids(&Executor::complete(&mut g, &key("leaf"), Value::Null).ready),
            vec!["a"]
        );
        assert_eq!(
            ids(&Executor::complete(&mut g, &key("a"), Value::Null).ready),
            vec!["r"]
        );
    }

    #[test]
    fn shared_child_is_scheduled_once() {
        let r = Event::new("r");
        let a = Event::new("a");
        let b = Event::new("b");
        let mut g = Graph::new(r.clone());
        g.add_node(a.clone(), &r).unwrap();
        g.add_node(b.clone(), &r).unwrap();
        g.add_node(Event::new("c"), &a).unwrap();
        g.add_node(Event::new("c"), &b).unwrap();

        assert_eq!(ids(&Executor::start(&mut g)), vec!["c"]);
        let c = Executor::complete(&mut g, &key("c"), Value::Null);
        assert_eq!(ids(&c.ready), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_completion_is_ignored() {
        let r = Event::new("r");
        let mut g = Graph::new(r.clone());
        g.add_node(Event::new("a"), &r).unwrap();
        g.add_node(Event::new("b"), &r).unwrap();
        Executor::start(&mut g);

        Executor::complete(&mut g, &key("a"), Value::Null);
        let again = Executor::complete(&mut g, &key("a"), Value::Null);
        assert!(again.ready.is_empty());
        assert_eq!(
            g.root_node().unwrap().waiting_links,
            vec![key("b")]
        );
    }
}
