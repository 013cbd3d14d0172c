//! DependencyGraph: the registry of `upstream -> downstream` edges between
//! metadata identifiers.
//!
//! Edges come in two strengths:
//! - **Hard** edges mean "required before compute". The registry refuses any
//!   hard edge that would close a cycle made only of hard edges; the refused
//!   call leaves the graph untouched.
//! - **Soft** edges are reads that tolerate a deferred answer. Cycles through
//!   soft edges are legal and are resolved by the engine's defer protocol.
//!
//! The graph is a petgraph `StableGraph` so node indices survive removals,
//! with a side table from [`Identifier`] to node index.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::Identifier;

/// Strength of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    Hard,
    Soft,
}

/// Directed dependency graph keyed by [`Identifier`].
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: StableGraph<Identifier, EdgeKind, Directed, u32>,
    nodes: HashMap<Identifier, NodeIndex<u32>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Registers `upstream -> downstream`.
    ///
    /// Returns `Ok(true)` if the graph changed and `Ok(false)` if an edge of
    /// equal or greater strength already existed (a hard edge subsumes a soft
    /// one). A soft self-edge is ignored; a hard self-edge is a cycle.
    pub fn register_edge(
        &mut self,
        upstream: &Identifier,
        downstream: &Identifier,
        kind: EdgeKind,
    ) -> Result<bool, CoreError> {
        if upstream == downstream {
            return match kind {
                EdgeKind::Soft => Ok(false),
                EdgeKind::Hard => Err(CoreError::HardCycle {
                    upstream: upstream.clone(),
                    downstream: downstream.clone(),
                    path: vec![upstream.clone(), downstream.clone()],
                }),
            };
        }

        if let (Some(&up), Some(&down)) = (self.nodes.get(upstream), self.nodes.get(downstream)) {
            if let Some(edge) = self.graph.find_edge(up, down) {
                if self.graph[edge] == kind || self.graph[edge] == EdgeKind::Hard {
                    return Ok(false);
                }
                self.check_hard_cycle(upstream, downstream)?;
                self.graph[edge] = EdgeKind::Hard;
                return Ok(true);
            }
        }

        if kind == EdgeKind::Hard {
            self.check_hard_cycle(upstream, downstream)?;
        }
        self.insert_unchecked(upstream, downstream, kind);
        Ok(true)
    }

    /// Removes `id` and every edge touching it. Returns the number of edges
    /// removed.
    pub fn deregister_all_for(&mut self, id: &Identifier) -> usize {
        let Some(idx) = self.nodes.remove(id) else {
            return 0;
        };
        let removed = self.graph.edges_directed(idx, Direction::Incoming).count()
            + self.graph.edges_directed(idx, Direction::Outgoing).count();
        self.graph.remove_node(idx);
        removed
    }

    /// Replaces every incoming edge of `downstream` with `reads`.
    ///
    /// Used when an item is recomputed: edges from the previous computation
    /// that are not in the new read set disappear. If any hard edge is
    /// refused the previous upstream edges are restored and the error is
    /// returned.
    pub fn replace_upstream(
        &mut self,
        downstream: &Identifier,
        reads: &[(Identifier, EdgeKind)],
    ) -> Result<(), CoreError> {
        let previous = self.upstream_edges_of(downstream);
        let known: HashSet<Identifier> = self.nodes.keys().cloned().collect();
        self.remove_upstream_edges(downstream);

        for (upstream, kind) in reads {
            if let Err(err) = self.register_edge(upstream, downstream, *kind) {
                self.remove_upstream_edges(downstream);
                for (upstream, kind) in &previous {
                    self.insert_unchecked(upstream, downstream, *kind);
                }
                let created: Vec<Identifier> = self
                    .nodes
                    .keys()
                    .filter(|id| !known.contains(*id))
                    .cloned()
                    .collect();
                for id in created {
                    self.deregister_all_for(&id);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn remove_upstream_edges(&mut self, downstream: &Identifier) {
        let Some(&idx) = self.nodes.get(downstream) else {
            return;
        };
        let incoming: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in incoming {
            self.graph.remove_edge(edge);
        }
    }

    fn ensure_node(&mut self, id: &Identifier) -> NodeIndex<u32> {
        if let Some(&idx) = self.nodes.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.nodes.insert(id.clone(), idx);
        idx
    }

    fn insert_unchecked(&mut self, upstream: &Identifier, downstream: &Identifier, kind: EdgeKind) {
        let up = self.ensure_node(upstream);
        let down = self.ensure_node(downstream);
        match self.graph.find_edge(up, down) {
            Some(edge) => self.graph[edge] = kind,
            None => {
                self.graph.add_edge(up, down, kind);
            }
        }
    }

    /// Fails if a path of hard edges already leads from `downstream` back to
    /// `upstream`, i.e. if the hard edge `upstream -> downstream` would close
    /// a hard cycle. Does not mutate.
    fn check_hard_cycle(&self, upstream: &Identifier, downstream: &Identifier) -> Result<(), CoreError> {
        let (Some(&start), Some(&goal)) = (self.nodes.get(downstream), self.nodes.get(upstream)) else {
            return Ok(());
        };

        let mut predecessor: HashMap<NodeIndex<u32>, NodeIndex<u32>> = HashMap::new();
        let mut visited: HashSet<NodeIndex<u32>> = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            if node == goal {
                // Walk back from upstream to downstream, then close the loop.
                let mut path = vec![self.graph[goal].clone()];
                let mut cursor = goal;
                while let Some(&prev) = predecessor.get(&cursor) {
                    path.push(self.graph[prev].clone());
                    cursor = prev;
                }
                path.push(upstream.clone());
                path.reverse();
                return Err(CoreError::HardCycle {
                    upstream: upstream.clone(),
                    downstream: downstream.clone(),
                    path,
                });
            }
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                if *edge.weight() != EdgeKind::Hard {
                    continue;
                }
                let next = edge.target();
                if visited.insert(next) {
                    predecessor.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn contains(&self, id: &Identifier) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn edge_kind(&self, upstream: &Identifier, downstream: &Identifier) -> Option<EdgeKind> {
        let up = *self.nodes.get(upstream)?;
        let down = *self.nodes.get(downstream)?;
        self.graph.find_edge(up, down).map(|e| self.graph[e])
    }

    pub fn downstream_of(&self, id: &Identifier) -> BTreeSet<Identifier> {
        self.neighbors(id, Direction::Outgoing)
    }

    pub fn upstream_of(&self, id: &Identifier) -> BTreeSet<Identifier> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Incoming edges of `id` with their strength, sorted by upstream.
    pub fn upstream_edges_of(&self, id: &Identifier) -> Vec<(Identifier, EdgeKind)> {
        let Some(&idx) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<(Identifier, EdgeKind)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (self.graph[e.source()].clone(), *e.weight()))
            .collect();
        edges.sort();
        edges
    }

    fn neighbors(&self, id: &Identifier, direction: Direction) -> BTreeSet<Identifier> {
        match self.nodes.get(id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, direction)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Every identifier that has a node, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &Identifier> + '_ {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All edges as sorted `(upstream, downstream, kind)` triples.
    pub fn edges(&self) -> Vec<(Identifier, Identifier, EdgeKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (up, down) = self.graph.edge_endpoints(e)?;
                Some((self.graph[up].clone(), self.graph[down].clone(), self.graph[e]))
            })
            .collect();
        edges.sort();
        edges
    }

    /// Everything reachable downstream of `roots` (roots excluded), in
    /// dependency order.
    ///
    /// Reachable identifiers are collected breadth-first with duplicates
    /// suppressed, then ordered so that each identifier comes after all of
    /// its reachable upstreams. Cycles (necessarily soft) are broken at the
    /// earliest-discovered member.
    pub fn affected_order<'a>(&self, roots: impl IntoIterator<Item = &'a Identifier>) -> Vec<Identifier> {
        let mut seen: HashSet<NodeIndex<u32>> = HashSet::new();
        let mut queue = VecDeque::new();
        for root in roots {
            if let Some(&idx) = self.nodes.get(root) {
                if seen.insert(idx) {
                    queue.push_back(idx);
                }
            }
        }
        let roots: HashSet<NodeIndex<u32>> = seen.clone();

        let mut discovered: Vec<NodeIndex<u32>> = Vec::new();
        while let Some(node) = queue.pop_front() {
            let mut next: Vec<NodeIndex<u32>> = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .collect();
            next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
            next.dedup();
            for n in next {
                if seen.insert(n) {
                    discovered.push(n);
                    queue.push_back(n);
                }
            }
        }

        let position: HashMap<NodeIndex<u32>, usize> = discovered
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (idx, pos))
            .collect();
        let mut indegree = vec![0usize; discovered.len()];
        for (pos, &idx) in discovered.iter().enumerate() {
            indegree[pos] = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter(|n| position.contains_key(n) && !roots.contains(n))
                .collect::<HashSet<_>>()
                .len();
        }

        let mut ready: BTreeSet<usize> = (0..discovered.len())
            .filter(|&pos| indegree[pos] == 0)
            .collect();
        let mut emitted = vec![false; discovered.len()];
        let mut order = Vec::with_capacity(discovered.len());

        while order.len() < discovered.len() {
            let pos = match ready.pop_first() {
                Some(pos) => pos,
                // Only cycle members remain blocked.
                None => match emitted.iter().position(|done| !done) {
                    Some(pos) => pos,
                    None => break,
                },
            };
            if emitted[pos] {
                continue;
            }
            emitted[pos] = true;
            let idx = discovered[pos];
            order.push(self.graph[idx].clone());

            let successors: HashSet<NodeIndex<u32>> =
                self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
            for succ in successors {
                if let Some(&succ_pos) = position.get(&succ) {
                    if emitted[succ_pos] {
                        continue;
                    }
                    indegree[succ_pos] = indegree[succ_pos].saturating_sub(1);
                    if indegree[succ_pos] == 0 {
                        ready.insert(succ_pos);
                    }
                }
            }
        }
        order
    }
}
