use smallvec::SmallVec;

use crate::{FxHashMap, Graph, NodeId};

#[derive(Default)]
struct DfsNodeInfo {
    /// Predecessors observed while the search ran, excluding self-loops.
    predecessors: SmallVec<[NodeId; 8]>,
    num: u32,
    parent: Option<NodeId>,
    visited: bool,
}

/// The spanning tree and preorder numbering produced by [run_dfs].
///
/// Numbers are assigned `0, 1, 2, ..` in the order nodes are first popped from
/// the worklist. Nodes that were observed as successors but not descended into
/// carry predecessor information only.
#[derive(Default)]
pub struct DfsResult {
    num_to_node: alloc::vec::Vec<NodeId>,
    info: FxHashMap<NodeId, DfsNodeInfo>,
}

impl DfsResult {
    /// The number of visited nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.num_to_node.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_to_node.is_empty()
    }

    /// The node that received preorder number `num`.
    #[inline]
    pub fn node(&self, num: u32) -> NodeId {
        self.num_to_node[num as usize]
    }

    /// The preorder number of `node`, which must have been visited.
    pub fn num(&self, node: NodeId) -> u32 {
        let info = &self.info[&node];
        assert!(info.visited, "{node} was not visited by this search");
        info.num
    }

    pub fn is_visited(&self, node: NodeId) -> bool {
        self.info.get(&node).is_some_and(|info| info.visited)
    }

    /// The spanning tree parent of `node`; `None` for the search root.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.info[&node].parent
    }

    /// The predecessors of `node` recorded during the search.
    pub fn predecessors(&self, node: NodeId) -> &[NodeId] {
        &self.info[&node].predecessors
    }
}

/// Traverse the CFG from `start`, numbering nodes in preorder.
///
/// `descend` is consulted for each observed arc `(parent, child)` whose child
/// has not yet been visited; when it returns false the child is still recorded
/// as having been observed from `parent`, but the search does not follow the
/// arc. This predicate is how the incremental update paths restrict the search
/// to a level-bounded region.
///
/// Successors are pushed in reverse of their iteration order so that the first
/// listed successor is visited first; all tie-breaks downstream inherit this
/// order.
pub fn run_dfs<G, C>(graph: &G, start: NodeId, mut descend: C) -> DfsResult
where
    G: Graph,
    C: FnMut(NodeId, NodeId) -> bool,
{
    let mut res = DfsResult::default();
    let mut worklist = SmallVec::<[NodeId; 16]>::new();

    res.info.entry(start).or_default();
    worklist.push(start);

    let mut next_num = 0u32;
    while let Some(node) = worklist.pop() {
        {
            let info = res.info.get_mut(&node).unwrap();
            if info.visited {
                continue;
            }
            info.visited = true;
            info.num = next_num;
        }
        next_num += 1;
        res.num_to_node.push(node);

        let successors = graph.successors(node);
        for succ in successors.into_iter().rev() {
            let succ_info = res.info.entry(succ).or_default();
            if succ != node {
                succ_info.predecessors.push(node);
            }
            if !succ_info.visited && descend(node, succ) {
                succ_info.parent = Some(node);
                worklist.push(succ);
            }
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowGraph;

    fn n(id: u32) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn diamond_preorder() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let mut graph = FlowGraph::new(4, n(0));
        graph.add_arc(n(0), n(1));
        graph.add_arc(n(0), n(2));
        graph.add_arc(n(1), n(3));
        graph.add_arc(n(2), n(3));

        let dfs = run_dfs(&graph, n(0), |_, _| true);
        assert_eq!(dfs.len(), 4);
        // First listed successor is visited first.
        assert_eq!(dfs.node(0), n(0));
        assert_eq!(dfs.node(1), n(1));
        assert_eq!(dfs.node(2), n(3));
        assert_eq!(dfs.node(3), n(2));
        assert_eq!(dfs.parent(n(3)), Some(n(1)));
        assert_eq!(dfs.predecessors(n(3)), &[n(1), n(2)]);
    }

    #[test]
    fn descend_predicate_bounds_search() {
        let mut graph = FlowGraph::new(3, n(0));
        graph.add_arc(n(0), n(1));
        graph.add_arc(n(1), n(2));

        let dfs = run_dfs(&graph, n(0), |_, child| child != n(2));
        assert_eq!(dfs.len(), 2);
        assert!(!dfs.is_visited(n(2)));
        // The arc into the unfollowed node is still observed.
        assert_eq!(dfs.predecessors(n(2)), &[n(1)]);
    }

    #[test]
    fn self_loop_not_recorded() {
        let mut graph = FlowGraph::new(2, n(0));
        graph.add_arc(n(0), n(1));
        graph.add_arc(n(1), n(1));

        let dfs = run_dfs(&graph, n(0), |_, _| true);
        assert_eq!(dfs.predecessors(n(1)), &[n(0)]);
    }
}
