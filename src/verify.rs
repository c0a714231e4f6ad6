use smallvec::{smallvec, SmallVec};

use crate::{DomTree, FxHashSet, Graph, NodeId};

bitflags::bitflags! {
    /// Selects which checks [DomTree::verify] runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Verification: u8 {
        /// Structural tree checks: shape, levels, children consistency.
        const BASIC = 1 << 0;
        /// CFG semantics: reachability closure and the parent property
        /// (removing `idom(n)` from the CFG must disconnect `n`).
        const CFG = 1 << 1;
        /// The sibling property (no dominator tree sibling dominates
        /// another). The most expensive check, O(n^3) worst case.
        const SIBLING = 1 << 2;
        /// Compare against a full from-scratch recomputation.
        const OLD_DT = 1 << 3;

        const NORMAL = Self::BASIC.bits() | Self::CFG.bits() | Self::OLD_DT.bits();
        const FULL = Self::NORMAL.bits() | Self::SIBLING.bits();
    }
}

/// The check a [DomTree::verify] run failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("dominator tree shape is malformed")]
    TreeShape,
    #[error("node levels are inconsistent with tree depth")]
    Levels,
    #[error("children lists do not mirror immediate dominators")]
    Children,
    #[error("tree membership does not match CFG reachability")]
    Reachability,
    #[error("an immediate dominator fails the parent property")]
    ParentProperty,
    #[error("a dominator tree sibling dominates another")]
    SiblingProperty,
    #[error("tree differs from a freshly computed dominator tree")]
    FreshTreeMismatch,
}

impl DomTree {
    /// Check the tree against `graph` at the given verification level.
    ///
    /// Returns the first failed check; `Ok(())` means every selected check
    /// passed. `graph` must be the CFG the tree is currently maintained for.
    pub fn verify<G: Graph>(&self, graph: &G, level: Verification) -> Result<(), VerifyError> {
        if level.contains(Verification::BASIC) {
            self.verify_basic()?;
        }
        if level.contains(Verification::CFG) {
            self.verify_reachability(graph)?;
            self.verify_parent_property(graph)?;
        }
        if level.contains(Verification::SIBLING) {
            self.verify_sibling_property(graph)?;
        }
        if level.contains(Verification::OLD_DT) {
            self.verify_with_fresh_tree(graph)?;
        }
        Ok(())
    }

    fn verify_basic(&self) -> Result<(), VerifyError> {
        let root = self.root();
        if !self.contains(root) || self.idom(root) != root {
            return Err(VerifyError::TreeShape);
        }
        if self.level(root) != 0 {
            return Err(VerifyError::Levels);
        }

        let mut child_links = 0usize;
        for node in self.reachable() {
            if node != root {
                let idom = self.idom(node);
                if idom == node || !self.contains(idom) {
                    return Err(VerifyError::TreeShape);
                }
                if self.level(node) != self.level(idom) + 1 {
                    return Err(VerifyError::Levels);
                }
                if !self.children(idom).contains(&node) {
                    return Err(VerifyError::Children);
                }
            }

            let children = self.children(node);
            child_links += children.len();
            for (index, child) in children.iter().enumerate() {
                if *child == root || !self.contains(*child) || self.idom(*child) != node {
                    return Err(VerifyError::Children);
                }
                if children[..index].contains(child) {
                    return Err(VerifyError::Children);
                }
            }
        }

        // Every non-root node hangs off exactly one parent; together with the
        // strictly increasing levels along idom links this forces a tree.
        if child_links + 1 != self.len() {
            return Err(VerifyError::TreeShape);
        }

        Ok(())
    }

    /// Invariant: a node has dominance information iff it is reachable from
    /// the root via CFG arcs.
    fn verify_reachability<G: Graph>(&self, graph: &G) -> Result<(), VerifyError> {
        let reachable = reachable_without(graph, self.root(), None);
        if reachable.len() != self.len() || !reachable.iter().all(|n| self.contains(*n)) {
            return Err(VerifyError::Reachability);
        }
        Ok(())
    }

    /// Parent property: removing `idom(n)` from the CFG must make `n`
    /// unreachable from the root.
    fn verify_parent_property<G: Graph>(&self, graph: &G) -> Result<(), VerifyError> {
        let root = self.root();
        for node in self.reachable() {
            if node == root {
                continue;
            }
            let excluded = self.idom(node);
            if reachable_without(graph, root, Some(excluded)).contains(&node) {
                log::error!("{node} is still reachable without its immediate dominator {excluded}");
                return Err(VerifyError::ParentProperty);
            }
        }
        Ok(())
    }

    /// Sibling property: for dominator tree siblings `a` and `b`, removing
    /// `a` from the CFG must not make `b` unreachable.
    fn verify_sibling_property<G: Graph>(&self, graph: &G) -> Result<(), VerifyError> {
        let root = self.root();
        for parent in self.reachable() {
            let siblings = self.children(parent);
            if siblings.len() < 2 {
                continue;
            }
            for excluded in siblings {
                let reachable = reachable_without(graph, root, Some(*excluded));
                for sibling in siblings {
                    if sibling != excluded && !reachable.contains(sibling) {
                        log::error!("sibling {excluded} dominates {sibling}");
                        return Err(VerifyError::SiblingProperty);
                    }
                }
            }
        }
        Ok(())
    }

    fn verify_with_fresh_tree<G: Graph>(&self, graph: &G) -> Result<(), VerifyError> {
        let fresh = DomTree::new(graph, self.root());
        if *self != fresh {
            log::error!("dominator tree differs from a freshly computed one!");
            log::error!("current: {self}");
            log::error!("fresh: {fresh}");
            return Err(VerifyError::FreshTreeMismatch);
        }
        Ok(())
    }
}

/// The set of nodes reachable from `root`, optionally treating one node as
/// removed from the CFG.
fn reachable_without<G: Graph>(
    graph: &G,
    root: NodeId,
    excluded: Option<NodeId>,
) -> FxHashSet<NodeId> {
    let mut reachable = FxHashSet::default();
    if excluded == Some(root) {
        return reachable;
    }

    let mut worklist: SmallVec<[NodeId; 16]> = smallvec![root];
    reachable.insert(root);
    while let Some(node) = worklist.pop() {
        for succ in graph.successors(node) {
            if Some(succ) == excluded || !reachable.insert(succ) {
                continue;
            }
            worklist.push(succ);
        }
    }
    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowGraph;

    fn n(id: u32) -> NodeId {
        NodeId::new(id)
    }

    fn diamond() -> FlowGraph {
        let mut graph = FlowGraph::new(4, n(0));
        graph.add_arc(n(0), n(1));
        graph.add_arc(n(0), n(2));
        graph.add_arc(n(1), n(3));
        graph.add_arc(n(2), n(3));
        graph
    }

    #[test]
    fn fresh_tree_verifies() {
        let graph = diamond();
        let tree = DomTree::new(&graph, n(0));
        assert_eq!(tree.verify(&graph, Verification::FULL), Ok(()));
    }

    #[test]
    fn stale_level_is_reported() {
        let graph = diamond();
        let mut tree = DomTree::new(&graph, n(0));
        // Move a node without fixing its level.
        tree.relink(n(3), n(1));
        assert_eq!(tree.verify(&graph, Verification::BASIC), Err(VerifyError::Levels));
    }

    #[test]
    fn broken_parent_property_is_reported() {
        let graph = diamond();
        let mut tree = DomTree::new(&graph, n(0));
        // Structurally fine, semantically wrong: 3 is also reachable via 2.
        tree.set_idom(n(3), n(1));
        assert_eq!(tree.verify(&graph, Verification::BASIC), Ok(()));
        assert_eq!(
            tree.verify(&graph, Verification::CFG),
            Err(VerifyError::ParentProperty)
        );
        assert_eq!(
            tree.verify(&graph, Verification::OLD_DT),
            Err(VerifyError::FreshTreeMismatch)
        );
    }

    #[test]
    fn broken_sibling_property_is_reported() {
        let mut graph = FlowGraph::new(3, n(0));
        graph.add_arc(n(0), n(1));
        graph.add_arc(n(1), n(2));

        let mut tree = DomTree::new(&graph, n(0));
        // Pretend 2 hangs directly off the root; 1 then dominates its sibling.
        tree.set_idom(n(2), n(0));
        assert_eq!(tree.verify(&graph, Verification::BASIC), Ok(()));
        assert_eq!(
            tree.verify(&graph, Verification::SIBLING),
            Err(VerifyError::SiblingProperty)
        );
    }

    #[test]
    fn reachability_closure_is_checked() {
        let mut graph = diamond();
        let tree = DomTree::new(&graph, n(0));
        // Grow the CFG behind the tree's back.
        graph.add_arc(n(3), n(3));
        assert_eq!(tree.verify(&graph, Verification::CFG), Ok(()));
        let mut larger = FlowGraph::new(5, n(0));
        larger.add_arc(n(0), n(1));
        larger.add_arc(n(0), n(2));
        larger.add_arc(n(1), n(3));
        larger.add_arc(n(2), n(3));
        larger.add_arc(n(3), n(4));
        assert_eq!(
            tree.verify(&larger, Verification::CFG),
            Err(VerifyError::Reachability)
        );
    }
}
