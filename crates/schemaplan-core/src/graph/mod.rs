//! Dependency graph pipeline.
//!
//! # Overview
//!
//! ```text
//! &[ObjectDescriptor]
//!        ↓  build::RawGraph::build()
//! RawGraph (nodes, resolved declarations, no edges)
//!        ↓  normalize::NormalizedGraph::from_raw()
//! NormalizedGraph (directed edges per side, possibly cyclic)
//!        ↓  cycles::CycleBreaker::run()
//! AcyclicGraph (working edges rewritten, break log)
//!        ↓  sequence::sequence()
//! Plan
//! ```
//!
//! ## Edge Direction
//!
//! Inside the pipeline an edge `A → B` means "A waits on B". The petgraph
//! views ([`NormalizedGraph::to_petgraph`], [`Plan::to_graph`]) flip this to
//! dependency → dependent.

pub mod build;
pub mod cycles;
pub mod node;
pub mod normalize;
pub mod sequence;
pub mod set;

pub use build::{ObjectInfo, RawGraph};
pub use cycles::{
    AcyclicGraph, BreakRecord, BreakStrategy, Cycle, CycleBreaker, find_all_cycles, find_cycle,
};
pub use node::{Edge, EdgeOrigin, Node, NodeId, NodeKind, ObjectId, Registry, Side, Synthetic};
pub use normalize::NormalizedGraph;
pub use sequence::{Plan, Step, sequence};
pub use set::DependencySet;
