use alloc::collections::BinaryHeap;
use core::cmp::Reverse;

use smallvec::SmallVec;

use crate::{
    dfs::{run_dfs, DfsResult},
    graph::{Graph, NodeId},
    tree::DomTree,
    FxHashSet,
};

/// Computes immediate dominators for the region covered by a [DfsResult],
/// using the Semi-NCA algorithm from [1] (see the crate docs).
///
/// The scratch arrays are indexed by preorder number. `parent` starts as the
/// DFS spanning tree and is overwritten by path compression; the original
/// parents survive in `idom`, which the forward pass then resolves to the
/// true immediate dominators.
pub(crate) struct SemiNCA<'a> {
    dfs: &'a DfsResult,
    parent: alloc::vec::Vec<u32>,
    semi: alloc::vec::Vec<u32>,
    label: alloc::vec::Vec<u32>,
    idom: alloc::vec::Vec<u32>,
}

impl<'a> SemiNCA<'a> {
    pub fn new(dfs: &'a DfsResult) -> Self {
        let len = dfs.len();
        let mut parent = alloc::vec::Vec::with_capacity(len);
        let mut semi = alloc::vec::Vec::with_capacity(len);
        let mut label = alloc::vec::Vec::with_capacity(len);
        let mut idom = alloc::vec::Vec::with_capacity(len);
        for i in 0..len as u32 {
            let parent_num = match spanning_parent_num(dfs, i) {
                Some(num) => num,
                None => 0,
            };
            parent.push(parent_num);
            semi.push(i);
            label.push(i);
            idom.push(parent_num);
        }
        Self {
            dfs,
            parent,
            semi,
            label,
            idom,
        }
    }

    /// Run the two Semi-NCA passes over the region.
    ///
    /// `min_level` bounds the computation to the subtree being rebuilt: a
    /// predecessor already in the tree above that level contributes nothing.
    /// The DFS that produced the region never descended past the bound, so
    /// the label walk cannot leave the region either.
    pub fn run(&mut self, tree: &DomTree, min_level: u32) {
        let dfs = self.dfs;
        let len = dfs.len() as u32;

        // Step 1: semidominators, in reverse preorder.
        let mut eval_stack = SmallVec::<[u32; 32]>::new();
        for i in (1..len).rev() {
            let node = dfs.node(i);
            self.semi[i as usize] = self.parent[i as usize];
            for pred in dfs.predecessors(node) {
                if tree.level_of(*pred).is_some_and(|level| level < min_level) {
                    continue;
                }
                let candidate = self.eval(dfs.num(*pred), i + 1, &mut eval_stack);
                let semi_candidate = self.semi[candidate as usize];
                if semi_candidate < self.semi[i as usize] {
                    self.semi[i as usize] = semi_candidate;
                }
            }
        }

        // Step 2: resolve each semidominator to the immediate dominator,
        //
        //     idom(v) = NCA(sdom(v), spanning tree parent of v)
        //
        // by climbing the already-final idoms of lower-numbered nodes.
        for i in 1..len {
            let sdom = self.semi[i as usize];
            let mut candidate = self.idom[i as usize];
            while candidate > sdom {
                candidate = self.idom[candidate as usize];
            }
            self.idom[i as usize] = candidate;
        }
    }

    // Returns the node with the minimal semidominator on the spanning tree
    // path from `v` up to (but not including) the first ancestor that is
    // already linked, compressing the path as it goes. `last_linked` is the
    // lowest preorder number that has been processed so far.
    fn eval(&mut self, v: u32, last_linked: u32, stack: &mut SmallVec<[u32; 32]>) -> u32 {
        if self.parent[v as usize] < last_linked {
            return self.label[v as usize];
        }

        // Ancestors except the root of the virtual tree go on the stack.
        stack.clear();
        let mut top = v;
        loop {
            stack.push(top);
            top = self.parent[top as usize];
            if self.parent[top as usize] < last_linked {
                break;
            }
        }

        // Path compression: point each vertex at the virtual tree root, and
        // pull the label with the minimal semidominator down the chain.
        let mut prev = top;
        let mut best_label = self.label[prev as usize];
        while let Some(current) = stack.pop() {
            self.parent[current as usize] = self.parent[prev as usize];
            let current_label = self.label[current as usize];
            if self.semi[best_label as usize] < self.semi[current_label as usize] {
                self.label[current as usize] = best_label;
            } else {
                best_label = current_label;
            }
            prev = current;
        }

        self.label[v as usize]
    }

    /// Install the computed idoms into `tree`, in preorder, fixing up
    /// children and levels as it goes.
    ///
    /// With `attach_to` the region's root is hung under that (already
    /// reachable) node; without it, the region's root keeps its current
    /// immediate dominator, or is installed as the tree root.
    pub fn install(self, tree: &mut DomTree, attach_to: Option<NodeId>) {
        let len = self.dfs.len() as u32;
        if len == 0 {
            return;
        }

        let sub_root = self.dfs.node(0);
        match attach_to {
            Some(parent) => {
                // A freshly discovered subtree was reached through `parent`;
                // an existing sub-root keeps its recorded preorder parent.
                let preorder_parent = if tree.contains(sub_root) {
                    None
                } else {
                    Some(parent)
                };
                tree.place(sub_root, parent, preorder_parent);
            }
            None if sub_root == tree.root() => tree.place(sub_root, sub_root, None),
            None => {
                let idom = tree.idom(sub_root);
                tree.place(sub_root, idom, None);
            }
        }

        for i in 1..len {
            let node = self.dfs.node(i);
            let idom = self.dfs.node(self.idom[i as usize]);
            tree.place(node, idom, self.dfs.parent(node));
        }
    }
}

fn spanning_parent_num(dfs: &DfsResult, num: u32) -> Option<u32> {
    if num == 0 {
        return None;
    }
    dfs.parent(dfs.node(num)).map(|parent| dfs.num(parent))
}

/// Update `tree` for the newly inserted CFG arc `from -> to`.
pub(crate) fn insert_edge<G: Graph>(tree: &mut DomTree, graph: &G, from: NodeId, to: NodeId) {
    log::trace!("inserting arc {from} -> {to}");

    // Arcs out of unreachable nodes cannot affect dominance until their
    // source itself becomes reachable.
    if !tree.contains(from) {
        return;
    }

    tree.invalidate_in_out();

    if tree.contains(to) {
        insert_reachable(tree, graph, from, to);
    } else {
        insert_unreachable(tree, graph, from, to);
    }
}

/// The inserted arc points into a previously unreachable subgraph. Discover
/// it, hang it under `from`, then replay any arcs that lead from the new
/// subgraph back into the reachable region, since those may lower idoms
/// inside the subtree that was just attached.
fn insert_unreachable<G: Graph>(tree: &mut DomTree, graph: &G, from: NodeId, to: NodeId) {
    log::trace!("inserting {from} -> {to} (previously unreachable)");

    let mut connecting = SmallVec::<[(NodeId, NodeId); 8]>::new();
    let dfs = run_dfs(graph, to, |pred, child| {
        if tree.contains(child) {
            connecting.push((pred, child));
            false
        } else {
            true
        }
    });

    let min_level = tree.level(from) + 1;
    let mut snca = SemiNCA::new(&dfs);
    snca.run(tree, min_level);
    snca.install(tree, Some(from));

    for (pred, target) in connecting {
        log::trace!("replaying discovered connecting arc {pred} -> {target}");
        insert_reachable(tree, graph, pred, target);
    }
}

/// Both endpoints are reachable: apply the Depth Based Search of [2].
///
/// After inserting `(from, to)`, a node `v` is affected iff
/// `level(nca) + 1 < level(v)` and some path from `to` to `v` keeps every
/// node on it at least as deep as `v`. That is a widest path problem, solved
/// with a modified Dijkstra over a min-by-level bucket queue.
fn insert_reachable<G: Graph>(tree: &mut DomTree, graph: &G, from: NodeId, to: NodeId) {
    let nca = tree.nca(from, to);
    let nca_level = tree.level(nca);
    log::trace!("reachable {from} -> {to}, nearest common ancestor {nca}");

    // `to` is on every such path, so level(nca) + 1 < level(v) <= level(to);
    // nothing is affected when that range is empty.
    if nca_level + 1 >= tree.level(to) {
        return;
    }

    let mut bucket = BinaryHeap::new();
    let mut order = 0u32;
    let mut visited = FxHashSet::default();
    let mut affected = SmallVec::<[NodeId; 8]>::new();
    let mut unaffected_on_current_level = SmallVec::<[NodeId; 8]>::new();

    bucket.push(Reverse((tree.level(to), order, to)));
    order += 1;
    visited.insert(to);

    while let Some(Reverse((_, _, popped))) = bucket.pop() {
        affected.push(popped);
        let current_level = tree.level(popped);
        log::trace!("marking {popped} affected, level {current_level}");

        let mut node = popped;
        loop {
            // The first pass of this inner loop expands the affected vertex
            // itself; later passes expand vertices from
            // `unaffected_on_current_level`, which may still lead to affected
            // vertices along a path whose minimum depth is the current level.
            for succ in graph.successors(node) {
                let succ_level = tree.level(succ);

                // A successor at or above level(nca) + 1 is unaffected, and no
                // affected vertex is reachable through it. The first visit of
                // a vertex carries the optimal path, so revisits stop too.
                if succ_level <= nca_level + 1 || !visited.insert(succ) {
                    continue;
                }

                if succ_level > current_level {
                    log::trace!("visiting unaffected {succ}");
                    unaffected_on_current_level.push(succ);
                } else {
                    log::trace!("queueing {succ}");
                    bucket.push(Reverse((succ_level, order, succ)));
                    order += 1;
                }
            }

            match unaffected_on_current_level.pop() {
                Some(next) => node = next,
                None => break,
            }
        }
    }

    // Re-point every affected node at the NCA; set_idom patches the levels of
    // their dominator tree descendants.
    for node in affected {
        log::trace!("idom({node}) = {nca}");
        tree.set_idom(node, nca);
    }
}

/// Update `tree` for the deleted CFG arc `from -> to`.
pub(crate) fn delete_edge<G: Graph>(tree: &mut DomTree, graph: &G, from: NodeId, to: NodeId) {
    log::trace!("deleting arc {from} -> {to}");

    // Deletions in an unreachable region, or of an arc into the root, change
    // nothing.
    if !tree.contains(from) || to == tree.root() {
        return;
    }
    if !tree.contains(to) {
        return;
    }

    // A back arc into a dominator of its source adds no dominance
    // information, so removing it cannot either.
    if tree.nca(from, to) == to {
        return;
    }

    tree.invalidate_in_out();

    // `to` remains reachable iff some remaining predecessor is not itself
    // dominated by `to` (figure 4 of [2]).
    if tree.idom(to) != from || has_proper_support(tree, graph, to) {
        delete_reachable(tree, graph, to);
    } else {
        delete_unreachable(tree, graph, to);
    }
}

fn has_proper_support<G: Graph>(tree: &DomTree, graph: &G, to: NodeId) -> bool {
    for pred in graph.predecessors(to) {
        if !tree.contains(pred) {
            continue;
        }
        if tree.nca(to, pred) != to {
            log::trace!("{to} is supported by predecessor {pred}");
            return true;
        }
    }
    false
}

/// The deletion left `to` reachable. By lemma 2.6 of [2] every node whose set
/// of paths from the root changed lies in the subtree rooted at `idom(to)`,
/// so rebuild exactly that subtree.
fn delete_reachable<G: Graph>(tree: &mut DomTree, graph: &G, to: NodeId) {
    let top = tree.idom(to);
    let min_level = tree.level(top);
    log::trace!("deleting reachable {to}; rebuilding subtree at {top}");

    let dfs = run_dfs(graph, top, |_, child| tree.level(child) > min_level);
    let attach_to = if top == tree.root() {
        None
    } else {
        Some(tree.idom(top))
    };

    let mut snca = SemiNCA::new(&dfs);
    snca.run(tree, min_level);
    snca.install(tree, attach_to);
}

/// The deletion made `to` unreachable, which takes its whole dominator tree
/// subtree with it (lemma 2.7 of [2]). Erase the subtree, then rebuild the
/// region around the deepest node whose paths the dying subtree could still
/// reach.
fn delete_unreachable<G: Graph>(tree: &mut DomTree, graph: &G, to: NodeId) {
    log::trace!("deleting unreachable subtree at {to}");

    let level = tree.level(to);
    let mut affected = SmallVec::<[NodeId; 16]>::new();
    let dfs = run_dfs(graph, to, |_, child| {
        if tree.level(child) > level {
            true
        } else {
            // Reached from the dying subtree but not part of it; its idom may
            // move up.
            if !affected.contains(&child) {
                affected.push(child);
            }
            false
        }
    });

    // The top of the region to rebuild is the deepest NCA linking an affected
    // node with the dying subtree.
    let mut min_node = to;
    for node in affected {
        let ncd = tree.nca(node, to);
        if ncd != node && tree.level(ncd) < tree.level(min_node) {
            min_node = ncd;
        }
    }

    // Erase in reverse preorder so nodes go before their dominators.
    for i in (0..dfs.len() as u32).rev() {
        log::trace!("erasing {}", dfs.node(i));
        tree.erase(dfs.node(i));
    }

    if min_node == to {
        return;
    }

    log::trace!("rebuilding subtree at {min_node}");
    let min_level = tree.level(min_node);
    let dfs = run_dfs(graph, min_node, |_, child| {
        tree.level_of(child).is_some_and(|child_level| child_level > min_level)
    });
    let attach_to = if min_node == tree.root() {
        None
    } else {
        Some(tree.idom(min_node))
    };

    let mut snca = SemiNCA::new(&dfs);
    snca.run(tree, min_level);
    snca.install(tree, attach_to);
}
