use core::fmt;

use smallvec::SmallVec;

/// A dense identifier for a CFG node.
///
/// Identifiers are expected to be low-valued array indices; the tree and its
/// algorithms use memory proportional to the largest id they observe.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline(always)]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// An abstraction over the graph-like structure a dominator tree is computed
/// for.
///
/// Implementations must hand back finite successor/predecessor sets, and node
/// identity must be stable for the lifetime of any tree computed over the
/// graph. The iteration order of [Graph::successors] determines visitation
/// order in every traversal, and thereby all tie-breaks, so it must be
/// deterministic.
pub trait Graph {
    /// Get the successors of `node`.
    fn successors(&self, node: NodeId) -> SmallVec<[NodeId; 8]>;

    /// Get the predecessors of `node`.
    fn predecessors(&self, node: NodeId) -> SmallVec<[NodeId; 8]>;
}

impl<G: Graph> Graph for &G {
    fn successors(&self, node: NodeId) -> SmallVec<[NodeId; 8]> {
        (**self).successors(node)
    }

    fn predecessors(&self, node: NodeId) -> SmallVec<[NodeId; 8]> {
        (**self).predecessors(node)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CfgUpdateKind {
    Insert,
    Delete,
}

/// A single arc update applied to a CFG.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CfgUpdate {
    kind: CfgUpdateKind,
    from: NodeId,
    to: NodeId,
}

impl CfgUpdate {
    pub const fn insert(from: NodeId, to: NodeId) -> Self {
        Self {
            kind: CfgUpdateKind::Insert,
            from,
            to,
        }
    }

    pub const fn delete(from: NodeId, to: NodeId) -> Self {
        Self {
            kind: CfgUpdateKind::Delete,
            from,
            to,
        }
    }

    #[inline(always)]
    pub const fn kind(&self) -> CfgUpdateKind {
        self.kind
    }

    #[inline(always)]
    pub const fn from(&self) -> NodeId {
        self.from
    }

    #[inline(always)]
    pub const fn to(&self) -> NodeId {
        self.to
    }
}

impl fmt::Debug for CfgUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(match self.kind {
            CfgUpdateKind::Insert => "Insert",
            CfgUpdateKind::Delete => "Delete",
        })
        .field("from", &self.from)
        .field("to", &self.to)
        .finish()
    }
}

/// A mutable adjacency-list CFG with a designated entry node.
///
/// Nodes are created up front; arcs may be added and removed over the graph's
/// lifetime. Successor order is insertion order.
#[derive(Clone)]
pub struct FlowGraph {
    entry: NodeId,
    succs: alloc::vec::Vec<SmallVec<[NodeId; 4]>>,
    preds: alloc::vec::Vec<SmallVec<[NodeId; 4]>>,
}

impl FlowGraph {
    /// Create a graph with `num_nodes` nodes, ids `0..num_nodes`, and no arcs.
    pub fn new(num_nodes: usize, entry: NodeId) -> Self {
        assert!(entry.as_usize() < num_nodes, "entry node out of range");
        Self {
            entry,
            succs: alloc::vec![SmallVec::new(); num_nodes],
            preds: alloc::vec![SmallVec::new(); num_nodes],
        }
    }

    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.succs.len()
    }

    pub fn has_arc(&self, from: NodeId, to: NodeId) -> bool {
        self.succs[from.as_usize()].contains(&to)
    }

    /// Add the arc `from -> to`. The arc must not already be present.
    pub fn add_arc(&mut self, from: NodeId, to: NodeId) {
        assert!(!self.has_arc(from, to), "arc {from} -> {to} already present");
        self.succs[from.as_usize()].push(to);
        self.preds[to.as_usize()].push(from);
    }

    /// Remove the arc `from -> to`. The arc must be present.
    pub fn remove_arc(&mut self, from: NodeId, to: NodeId) {
        let succs = &mut self.succs[from.as_usize()];
        let index = succs
            .iter()
            .position(|succ| *succ == to)
            .unwrap_or_else(|| panic!("no arc {from} -> {to} to remove"));
        succs.remove(index);

        let preds = &mut self.preds[to.as_usize()];
        let index = preds.iter().position(|pred| *pred == from).unwrap();
        preds.remove(index);
    }

    /// Apply `update` to the graph itself.
    ///
    /// This is the CFG half of the mutation contract; the tree half is
    /// [crate::DomTree::apply_update].
    pub fn apply(&mut self, update: CfgUpdate) {
        match update.kind() {
            CfgUpdateKind::Insert => self.add_arc(update.from(), update.to()),
            CfgUpdateKind::Delete => self.remove_arc(update.from(), update.to()),
        }
    }
}

impl Graph for FlowGraph {
    fn successors(&self, node: NodeId) -> SmallVec<[NodeId; 8]> {
        self.succs[node.as_usize()].iter().copied().collect()
    }

    fn predecessors(&self, node: NodeId) -> SmallVec<[NodeId; 8]> {
        self.preds[node.as_usize()].iter().copied().collect()
    }
}
