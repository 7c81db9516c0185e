// src/dataflow/acp.rs

//! Active connection points.
//!
//! An ACP binds a node of one of an instance's IO trees (addressed by key
//! path) to the connections that start or end there. ACPs live in a
//! per-project arena and are referenced by [`AcpId`].

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dataflow::instance::InstanceId;
use crate::dataflow::item_path::{IoSlot, ItemKey, format_items};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcpId(usize);

/// Address of a connection point: which tree, and where in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcpKey {
    pub instance: InstanceId,
    pub slot: IoSlot,
    pub path: Vec<ItemKey>,
}

impl AcpKey {
    pub fn new(instance: InstanceId, slot: IoSlot, path: Vec<ItemKey>) -> Self {
        Self {
            instance,
            slot,
            path,
        }
    }

    /// Whether a write at `path` in the same tree touches this point: one
    /// path is a prefix of the other.
    pub fn overlaps(&self, path: &[ItemKey]) -> bool {
        let n = self.path.len().min(path.len());
        self.path[..n] == path[..n]
    }
}

#[derive(Debug)]
struct AcpNode {
    key: AcpKey,
    source: Option<AcpId>,
    dests: Vec<AcpId>,
}

#[derive(Debug, Default)]
pub struct AcpGraph {
    nodes: Vec<AcpNode>,
    index: HashMap<AcpKey, AcpId>,
    by_tree: HashMap<(InstanceId, IoSlot), Vec<AcpId>>,
}

impl AcpGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn lookup(&self, key: &AcpKey) -> Option<AcpId> {
        self.index.get(key).copied()
    }

    pub fn key(&self, id: AcpId) -> &AcpKey {
        &self.nodes[id.0].key
    }

    pub fn direct_source(&self, id: AcpId) -> Option<AcpId> {
        self.nodes[id.0].source
    }

    pub fn direct_dests(&self, id: AcpId) -> &[AcpId] {
        &self.nodes[id.0].dests
    }

    /// Follow direct sources back to the point the data originates from.
    pub fn ultimate_source(&self, id: AcpId) -> AcpId {
        let mut cur = id;
        let mut steps = 0;
        while let Some(src) = self.nodes[cur.0].source {
            cur = src;
            steps += 1;
            if steps > self.nodes.len() {
                break;
            }
        }
        cur
    }

    fn get_or_insert(&mut self, key: AcpKey) -> AcpId {
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = AcpId(self.nodes.len());
        self.by_tree
            .entry((key.instance, key.slot))
            .or_default()
            .push(id);
        self.index.insert(key.clone(), id);
        self.nodes.push(AcpNode {
            key,
            source: None,
            dests: Vec::new(),
        });
        id
    }

    /// Check that `edges` can be added on top of the current graph: every
    /// destination gets at most one source, and no cycle appears.
    pub fn check_new_edges(&self, edges: &[(AcpKey, AcpKey)]) -> Result<(), String> {
        // points that don't exist yet get ids past the end of the arena
        let mut fresh: HashMap<&AcpKey, usize> = HashMap::new();
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            for dst in &node.dests {
                graph.add_edge(i, dst.0, ());
            }
        }

        let mut claimed: Vec<&AcpKey> = Vec::new();
        for (src, dst) in edges {
            if let Some(id) = self.lookup(dst) {
                if self.nodes[id.0].source.is_some() {
                    return Err(format!("{} already has a source", describe(dst)));
                }
            }
            if claimed.contains(&dst) {
                return Err(format!("{} is connected twice", describe(dst)));
            }
            claimed.push(dst);

            let next = self.nodes.len() + fresh.len();
            let s = match self.lookup(src) {
                Some(id) => id.0,
                None => *fresh.entry(src).or_insert(next),
            };
            let next = self.nodes.len() + fresh.len();
            let d = match self.lookup(dst) {
                Some(id) => id.0,
                None => *fresh.entry(dst).or_insert(next),
            };
            graph.add_edge(s, d, ());
        }

        toposort(&graph, None)
            .map(|_| ())
            .map_err(|_| "connection would create a cycle".to_string())
    }

    /// Add a connection between two points, creating them as needed. The
    /// caller has already run [`check_new_edges`](Self::check_new_edges).
    pub fn connect(&mut self, src: AcpKey, dst: AcpKey) -> (AcpId, AcpId) {
        let s = self.get_or_insert(src);
        let d = self.get_or_insert(dst);
        self.nodes[d.0].source = Some(s);
        if !self.nodes[s.0].dests.contains(&d) {
            self.nodes[s.0].dests.push(d);
        }
        (s, d)
    }

    /// Drop every point from `len` on, with the edges that touch them.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.nodes.len() {
            return;
        }
        for node in self.nodes.drain(len..) {
            self.index.remove(&node.key);
        }
        for node in &mut self.nodes {
            if node.source.is_some_and(|s| s.0 >= len) {
                node.source = None;
            }
            node.dests.retain(|d| d.0 < len);
        }
        for ids in self.by_tree.values_mut() {
            ids.retain(|id| id.0 < len);
        }
        self.by_tree.retain(|_, ids| !ids.is_empty());
    }

    /// Points in tree `(instance, slot)` affected by a write at `path` that
    /// feed at least one destination.
    pub fn listeners(&self, instance: InstanceId, slot: IoSlot, path: &[ItemKey]) -> Vec<AcpId> {
        self.by_tree
            .get(&(instance, slot))
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| {
                        let node = &self.nodes[id.0];
                        !node.dests.is_empty() && node.key.overlaps(path)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every point attached to tree `(instance, slot)`.
    pub fn tree_acps(&self, instance: InstanceId, slot: IoSlot) -> &[AcpId] {
        self.by_tree
            .get(&(instance, slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn describe(key: &AcpKey) -> String {
    format!(
        "#{}:{}.{}",
        key.instance.0,
        key.slot.as_str(),
        format_items(&key.path)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(inst: usize, slot: IoSlot, field: &str) -> AcpKey {
        AcpKey::new(InstanceId(inst), slot, vec![ItemKey::Field(field.into())])
    }

    #[test]
    fn connect_records_both_directions() {
        let mut g = AcpGraph::new();
        let (s, d) = g.connect(k(1, IoSlot::Out, "x"), k(2, IoSlot::In, "x"));
        assert_eq!(g.direct_source(d), Some(s));
        assert_eq!(g.direct_dests(s), &[d]);
        assert_eq!(g.ultimate_source(d), s);
    }

    #[test]
    fn ultimate_source_follows_chain() {
        let mut g = AcpGraph::new();
        let (a, _) = g.connect(k(1, IoSlot::In, "x"), k(2, IoSlot::In, "x"));
        let (_, c) = g.connect(k(2, IoSlot::In, "x"), k(3, IoSlot::In, "x"));
        assert_eq!(g.ultimate_source(c), a);
    }

    #[test]
    fn second_source_is_rejected() {
        let mut g = AcpGraph::new();
        g.connect(k(1, IoSlot::Out, "x"), k(2, IoSlot::In, "x"));
        let err = g
            .check_new_edges(&[(k(3, IoSlot::Out, "x"), k(2, IoSlot::In, "x"))])
            .unwrap_err();
        assert!(err.contains("already has a source"));

        let twice = [
            (k(3, IoSlot::Out, "x"), k(4, IoSlot::In, "x")),
            (k(5, IoSlot::Out, "x"), k(4, IoSlot::In, "x")),
        ];
        assert!(g.check_new_edges(&twice).unwrap_err().contains("twice"));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut g = AcpGraph::new();
        g.connect(k(1, IoSlot::In, "x"), k(1, IoSlot::Out, "x"));
        let err = g
            .check_new_edges(&[(k(1, IoSlot::Out, "x"), k(1, IoSlot::In, "x"))])
            .unwrap_err();
        assert!(err.contains("cycle"));
    }

    #[test]
    fn truncate_forgets_newer_points_and_their_edges() {
        let mut g = AcpGraph::new();
        let (a, _) = g.connect(k(1, IoSlot::Out, "x"), k(2, IoSlot::In, "x"));
        let mark = g.len();
        g.connect(k(1, IoSlot::Out, "x"), k(3, IoSlot::In, "x"));
        g.connect(k(3, IoSlot::Out, "x"), k(4, IoSlot::In, "x"));

        g.truncate(mark);
        assert_eq!(g.len(), mark);
        assert_eq!(g.direct_dests(a).len(), 1);
        assert!(g.lookup(&k(3, IoSlot::In, "x")).is_none());
        assert!(g.tree_acps(InstanceId(4), IoSlot::In).is_empty());
        // the freed slot can be claimed again
        assert!(g.check_new_edges(&[(k(1, IoSlot::Out, "x"), k(3, IoSlot::In, "x"))]).is_ok());
    }

    #[test]
    fn listeners_match_ancestors_and_descendants() {
        let mut g = AcpGraph::new();
        let whole = AcpKey::new(InstanceId(1), IoSlot::Out, vec![]);
        g.connect(whole, k(2, IoSlot::In, "r"));
        g.connect(k(1, IoSlot::Out, "x"), k(3, IoSlot::In, "x"));
        g.connect(k(1, IoSlot::Out, "y"), k(4, IoSlot::In, "y"));

        let hit = g.listeners(InstanceId(1), IoSlot::Out, &[ItemKey::Field("x".into())]);
        assert_eq!(hit.len(), 2);
        let all = g.listeners(InstanceId(1), IoSlot::Out, &[]);
        assert_eq!(all.len(), 3);
        assert!(g.listeners(InstanceId(2), IoSlot::In, &[]).is_empty());
    }
}
