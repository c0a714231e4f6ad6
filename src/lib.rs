//! Incremental maintenance of dominator trees over rooted control-flow graphs.
//!
//! The tree is constructed with the Semi-NCA algorithm described in the
//! following dissertation:
//!
//!   [1] Linear-Time Algorithms for Dominators and Related Problems
//!   Loukas Georgiadis, Princeton University, November 2005, pp. 21-23:
//!   ftp://ftp.cs.princeton.edu/reports/2005/737.pdf
//!
//! Arc insertions and deletions are applied incrementally with the Depth Based
//! Search algorithm, based on this publication:
//!
//!   [2] An Experimental Study of Dynamic Dominators
//!   Loukas Georgiadis, et al., April 12 2016, pp. 5-7, 9-10:
//!   https://arxiv.org/pdf/1604.02711.pdf
//!
//! Both update paths are required to produce exactly the tree a full
//! recomputation would, which the [Verification] suite can check from any
//! state.
//!
//! The crate does not own a CFG representation. Clients implement [Graph] for
//! their graph, mutate it first, and then report each arc change through
//! [DomTree::insert_arc] / [DomTree::delete_arc]. [FlowGraph] is a plain
//! adjacency-list implementation suitable for tests and tools.
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
pub type FxHashSet<K> = hashbrown::HashSet<K, rustc_hash::FxBuildHasher>;

mod dfs;
mod graph;
mod input;
mod nca;
mod tree;
mod verify;

pub use self::{
    dfs::{run_dfs, DfsResult},
    graph::{CfgUpdate, CfgUpdateKind, FlowGraph, Graph, NodeId},
    input::{GraphParseError, InputGraph},
    tree::{DomTree, DomTreeSink},
    verify::{Verification, VerifyError},
};
