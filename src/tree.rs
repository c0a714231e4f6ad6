use core::{cell::Cell, fmt};

use smallvec::{smallvec, SmallVec};

use crate::{
    dfs::run_dfs,
    graph::{CfgUpdate, CfgUpdateKind, Graph, NodeId},
    nca::{self, SemiNCA},
};

/// Per-node dominator tree state.
///
/// A node has a slot here iff it is reachable from the root via CFG arcs; the
/// update paths erase slots as nodes lose reachability.
pub(crate) struct TreeNode {
    /// The immediate dominator; the root is its own immediate dominator.
    pub(crate) idom: NodeId,
    /// Depth in the dominator tree; the root is at level 0.
    pub(crate) level: u32,
    /// Parent in the most recent DFS spanning tree that visited this node.
    pub(crate) preorder_parent: Option<NodeId>,
    /// Inverse of `idom`, in insertion order.
    pub(crate) children: SmallVec<[NodeId; 4]>,
    /// Entry/exit counters of a DFS over the dominator tree, used to answer
    /// dominance queries in constant time. Only meaningful while the tree's
    /// validity flag is set.
    num_in: Cell<u32>,
    num_out: Cell<u32>,
}

/// A dominator tree over a rooted CFG, maintained incrementally.
///
/// The tree never stores the graph it was computed for; every operation that
/// needs CFG access takes it as an argument. Clients must mutate their CFG
/// first and then report the change through [DomTree::insert_arc] or
/// [DomTree::delete_arc] with the same endpoints, one arc at a time.
///
/// Queries may refresh the internal numbering cache through a [Cell], so the
/// tree is deliberately not [Sync].
pub struct DomTree {
    root: NodeId,
    nodes: alloc::vec::Vec<Option<TreeNode>>,
    in_out_valid: Cell<bool>,
}

impl DomTree {
    /// Compute the dominator tree of `graph` rooted at `root`.
    pub fn new<G: Graph>(graph: &G, root: NodeId) -> Self {
        let mut this = Self {
            root,
            nodes: alloc::vec::Vec::new(),
            in_out_valid: Cell::new(false),
        };
        let dfs = run_dfs(graph, root, |_, _| true);
        let mut snca = SemiNCA::new(&dfs);
        snca.run(&this, 0);
        snca.install(&mut this, None);
        this
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The number of reachable nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true iff `node` is reachable from the root.
    pub fn contains(&self, node: NodeId) -> bool {
        self.node(node).is_some()
    }

    /// The immediate dominator of `node`. Panics if `node` is unreachable.
    pub fn idom(&self, node: NodeId) -> NodeId {
        self.expect_node(node).idom
    }

    /// The depth of `node` in the dominator tree. Panics if `node` is
    /// unreachable.
    pub fn level(&self, node: NodeId) -> u32 {
        self.expect_node(node).level
    }

    /// The parent of `node` in the most recent DFS spanning tree that visited
    /// it. Panics if `node` is unreachable.
    pub fn preorder_parent(&self, node: NodeId) -> Option<NodeId> {
        self.expect_node(node).preorder_parent
    }

    /// The nodes immediately dominated by `node`. Panics if `node` is
    /// unreachable.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.expect_node(node).children
    }

    /// Iterate over all reachable nodes, in id order.
    pub fn reachable(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| NodeId::new(id as u32)))
    }

    /// The nearest common ancestor of `a` and `b` in the dominator tree.
    ///
    /// Climbs the deeper node until the levels match, then climbs both
    /// together. Panics if either node is unreachable.
    pub fn nca(&self, a: NodeId, b: NodeId) -> NodeId {
        let mut a = a;
        let mut b = b;
        while a != b {
            if self.level(a) < self.level(b) {
                core::mem::swap(&mut a, &mut b);
            }
            a = self.idom(a);
        }
        a
    }

    /// Returns true iff `a` dominates `b`.
    ///
    /// Returns false when either node is unreachable. Lazily refreshes the
    /// in/out numbering cache, which makes this O(n) after a mutation and O(1)
    /// until the next one.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        let (a_node, b_node) = match (self.node(a), self.node(b)) {
            (Some(a_node), Some(b_node)) => (a_node, b_node),
            _ => return false,
        };
        if a == b {
            return true;
        }
        if !self.in_out_valid.get() {
            self.update_dfs_numbers();
        }
        a_node.num_in.get() <= b_node.num_in.get() && b_node.num_out.get() <= a_node.num_out.get()
    }

    /// Update the tree for a newly inserted arc `from -> to`.
    ///
    /// The arc must already be present in `graph`.
    pub fn insert_arc<G: Graph>(&mut self, graph: &G, from: NodeId, to: NodeId) {
        debug_assert!(
            graph.successors(from).contains(&to),
            "arc {from} -> {to} must be added to the CFG before the tree is updated"
        );
        nca::insert_edge(self, graph, from, to);
    }

    /// Update the tree for a deleted arc `from -> to`.
    ///
    /// The arc must already be gone from `graph`.
    pub fn delete_arc<G: Graph>(&mut self, graph: &G, from: NodeId, to: NodeId) {
        debug_assert!(
            !graph.successors(from).contains(&to),
            "arc {from} -> {to} must be removed from the CFG before the tree is updated"
        );
        nca::delete_edge(self, graph, from, to);
    }

    /// Apply one [CfgUpdate] that has already been applied to `graph`.
    pub fn apply_update<G: Graph>(&mut self, graph: &G, update: CfgUpdate) {
        match update.kind() {
            CfgUpdateKind::Insert => self.insert_arc(graph, update.from(), update.to()),
            CfgUpdateKind::Delete => self.delete_arc(graph, update.from(), update.to()),
        }
    }

    /// Copy the tree into an external dominator tree structure, in preorder
    /// from the root. Later mutations of this tree do not propagate.
    pub fn export<S: DomTreeSink>(&self, sink: &mut S) {
        let mut stack: SmallVec<[NodeId; 32]> = smallvec![self.root];
        while let Some(node) = stack.pop() {
            let idom = if node == self.root {
                None
            } else {
                Some(self.idom(node))
            };
            sink.insert_node(node, idom);
            for child in self.children(node).iter().rev() {
                stack.push(*child);
            }
        }
    }

    #[inline]
    fn node(&self, node: NodeId) -> Option<&TreeNode> {
        self.nodes.get(node.as_usize()).and_then(|slot| slot.as_ref())
    }

    fn node_mut(&mut self, node: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(node.as_usize()).and_then(|slot| slot.as_mut())
    }

    fn expect_node(&self, node: NodeId) -> &TreeNode {
        self.node(node)
            .unwrap_or_else(|| panic!("{node} is not reachable from the root"))
    }

    pub(crate) fn level_of(&self, node: NodeId) -> Option<u32> {
        self.node(node).map(|tn| tn.level)
    }

    pub(crate) fn invalidate_in_out(&self) {
        self.in_out_valid.set(false);
    }

    /// Install or move `node` under `idom`, setting its level directly from
    /// its dominator's. Used by the Semi-NCA attach pass, which visits a
    /// region in preorder so dominator levels are final before their
    /// dominated nodes are placed. A `preorder_parent` of `None` keeps any
    /// previously recorded value.
    pub(crate) fn place(&mut self, node: NodeId, idom: NodeId, preorder_parent: Option<NodeId>) {
        let level = if node == self.root {
            0
        } else {
            self.level(idom) + 1
        };
        if self.contains(node) {
            self.relink(node, idom);
            let tn = self.node_mut(node).unwrap();
            tn.level = level;
            if preorder_parent.is_some() {
                tn.preorder_parent = preorder_parent;
            }
        } else {
            let slot = node.as_usize();
            if slot >= self.nodes.len() {
                self.nodes.resize_with(slot + 1, || None);
            }
            self.nodes[slot] = Some(TreeNode {
                idom,
                level,
                preorder_parent,
                children: SmallVec::new(),
                num_in: Cell::new(0),
                num_out: Cell::new(0),
            });
            if node != self.root {
                self.node_mut(idom)
                    .expect("immediate dominator must already be in the tree")
                    .children
                    .push(node);
            }
        }
    }

    /// Re-point `node` at `new_idom`, maintaining both children lists. Levels
    /// are left alone; callers fix them up.
    pub(crate) fn relink(&mut self, node: NodeId, new_idom: NodeId) {
        if node == self.root {
            return;
        }
        let old_idom = self.idom(node);
        if old_idom == new_idom {
            return;
        }

        let children = &mut self.node_mut(old_idom).unwrap().children;
        let index = children
            .iter()
            .position(|c| *c == node)
            .expect("node missing from its immediate dominator's children");
        children.remove(index);

        self.node_mut(new_idom).unwrap().children.push(node);
        self.node_mut(node).unwrap().idom = new_idom;
    }

    /// Re-point `node` at `new_idom` and recompute the depths of every
    /// descendant whose depth went stale.
    pub(crate) fn set_idom(&mut self, node: NodeId, new_idom: NodeId) {
        if self.idom(node) == new_idom {
            return;
        }
        self.relink(node, new_idom);
        self.update_levels_below(node);
    }

    fn update_levels_below(&mut self, node: NodeId) {
        let mut stack: SmallVec<[NodeId; 64]> = smallvec![node];
        while let Some(current) = stack.pop() {
            let level = self.level(self.idom(current)) + 1;
            self.node_mut(current).unwrap().level = level;
            let children: SmallVec<[NodeId; 4]> = self.expect_node(current).children.clone();
            for child in children {
                if self.level(child) != level + 1 {
                    stack.push(child);
                }
            }
        }
    }

    /// Remove `node` from the tree. It must not dominate any other node.
    pub(crate) fn erase(&mut self, node: NodeId) {
        let tn = self.nodes[node.as_usize()]
            .take()
            .unwrap_or_else(|| panic!("no tree node for {node}"));
        assert!(
            tn.children.is_empty(),
            "cannot erase {node}: it still dominates other nodes"
        );

        if node != self.root {
            let children = &mut self
                .node_mut(tn.idom)
                .expect("erased node's immediate dominator must outlive it")
                .children;
            let index = children
                .iter()
                .position(|c| *c == node)
                .expect("node missing from its immediate dominator's children");
            children.remove(index);
        }

        self.in_out_valid.set(false);
    }

    /// Assign in/out numbers by walking the dominator tree in DFS order.
    fn update_dfs_numbers(&self) {
        let mut dfs_num = 0u32;
        let root = self.expect_node(self.root);
        root.num_in.set(dfs_num);
        dfs_num += 1;

        let mut worklist: SmallVec<[(NodeId, usize); 32]> = smallvec![(self.root, 0)];
        while let Some((node, child_index)) = worklist.last_mut() {
            let tn = self.expect_node(*node);
            if *child_index >= tn.children.len() {
                tn.num_out.set(dfs_num);
                dfs_num += 1;
                worklist.pop();
            } else {
                let child = tn.children[*child_index];
                *child_index += 1;
                self.expect_node(child).num_in.set(dfs_num);
                dfs_num += 1;
                worklist.push((child, 0));
            }
        }

        self.in_out_valid.set(true);
    }
}

/// Receives nodes from [DomTree::export], in preorder from the root.
pub trait DomTreeSink {
    /// Insert `node` with the given immediate dominator; `idom` is `None`
    /// only for the root. Dominators are always inserted before the nodes
    /// they dominate.
    fn insert_node(&mut self, node: NodeId, idom: Option<NodeId>);
}

impl Eq for DomTree {}

impl PartialEq for DomTree {
    /// Two trees are equal when they have the same root and the same
    /// `idom`/`level` mappings over the same reachable set.
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.len() == other.len()
            && self.reachable().all(|n| {
                other.contains(n) && self.idom(n) == other.idom(n) && self.level(n) == other.level(n)
            })
    }
}

impl fmt::Display for DomTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dominator tree rooted at {}:", self.root)?;
        let mut stack: SmallVec<[(NodeId, usize); 32]> = smallvec![(self.root, 1)];
        while let Some((node, depth)) = stack.pop() {
            writeln!(f, "{: <1$}[{2}] {3}", "", depth, self.level(node), node)?;
            for child in self.children(node).iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DomTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for node in self.reachable() {
            map.entry(&node, &(self.idom(node), self.level(node)));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowGraph;

    fn n(id: u32) -> NodeId {
        NodeId::new(id)
    }

    fn diamond() -> FlowGraph {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let mut graph = FlowGraph::new(4, n(0));
        graph.add_arc(n(0), n(1));
        graph.add_arc(n(0), n(2));
        graph.add_arc(n(1), n(3));
        graph.add_arc(n(2), n(3));
        graph
    }

    #[test]
    fn diamond_idoms() {
        let graph = diamond();
        let tree = DomTree::new(&graph, n(0));

        assert_eq!(tree.idom(n(0)), n(0));
        assert_eq!(tree.idom(n(1)), n(0));
        assert_eq!(tree.idom(n(2)), n(0));
        assert_eq!(tree.idom(n(3)), n(0));
        assert_eq!(tree.level(n(0)), 0);
        assert_eq!(tree.level(n(1)), 1);
        assert_eq!(tree.level(n(2)), 1);
        assert_eq!(tree.level(n(3)), 1);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn nca_is_symmetric_and_dominating() {
        let graph = diamond();
        let tree = DomTree::new(&graph, n(0));

        assert_eq!(tree.nca(n(1), n(2)), n(0));
        assert_eq!(tree.nca(n(2), n(1)), n(0));
        assert_eq!(tree.nca(n(1), n(3)), n(0));
        assert_eq!(tree.nca(n(3), n(3)), n(3));
        assert!(tree.dominates(tree.nca(n(1), n(3)), n(1)));
        assert!(tree.dominates(tree.nca(n(1), n(3)), n(3)));
    }

    #[test]
    fn dominates_identities() {
        let graph = diamond();
        let tree = DomTree::new(&graph, n(0));

        for node in tree.reachable() {
            assert!(tree.dominates(n(0), node));
            assert!(tree.dominates(node, node));
        }
        assert!(!tree.dominates(n(1), n(3)));
        assert!(!tree.dominates(n(1), n(2)));
        // Absent nodes dominate nothing and are dominated by nothing.
        assert!(!tree.dominates(n(0), n(5)));
    }

    #[test]
    fn unreachable_nodes_are_absent() {
        let mut graph = FlowGraph::new(4, n(0));
        graph.add_arc(n(0), n(1));
        graph.add_arc(n(2), n(3));

        let tree = DomTree::new(&graph, n(0));
        assert!(tree.contains(n(1)));
        assert!(!tree.contains(n(2)));
        assert!(!tree.contains(n(3)));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn export_preorder() {
        struct Collector(alloc::vec::Vec<(NodeId, Option<NodeId>)>);
        impl DomTreeSink for Collector {
            fn insert_node(&mut self, node: NodeId, idom: Option<NodeId>) {
                self.0.push((node, idom));
            }
        }

        let mut graph = FlowGraph::new(3, n(0));
        graph.add_arc(n(0), n(1));
        graph.add_arc(n(1), n(2));

        let tree = DomTree::new(&graph, n(0));
        let mut sink = Collector(alloc::vec::Vec::new());
        tree.export(&mut sink);
        assert_eq!(
            sink.0,
            alloc::vec![(n(0), None), (n(1), Some(n(0))), (n(2), Some(n(1)))]
        );
    }

    #[test]
    fn display_smoke() {
        let graph = diamond();
        let tree = DomTree::new(&graph, n(0));
        let printed = alloc::format!("{tree}");
        assert!(printed.contains("[0] n0"));
        assert!(printed.contains("[1] n3"));
    }
}
