#![forbid(unsafe_code)]
//! schemaplan-core library.
//!
//! Orders the build and drop steps of a set of schema objects so every step
//! runs after the steps it depends on, breaking dependency cycles along the
//! way.
//!
//! # Conventions
//!
//! - **Errors**: [`PlanError`] for resolution failures, `anyhow::Result` for
//!   config and document loading.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod config;
pub mod descriptor;
pub mod error;
pub mod graph;

use tracing::{info, instrument};

pub use config::{ResolverConfig, StrategyKind};
pub use descriptor::{
    ConditionEvaluator, DependencyDecl, DependencySetSpec, DependencySpec, DescriptorDocument,
    Direction, FallbackPolicy, FallbackScope, FlagSet, Mode, ObjectDescriptor, SplitPolicy,
};
pub use error::{ErrorCode, PlanError};
pub use graph::{NodeKind, NormalizedGraph, Plan, Step, Synthetic};

use graph::{CycleBreaker, RawGraph, sequence};

/// Resolve `descriptors` into an ordered plan for `mode`.
///
/// # Errors
///
/// Returns a [`PlanError`] if a reference cannot be resolved, a descriptor is
/// invalid, or a dependency cycle cannot be broken.
#[instrument(skip_all, fields(objects = descriptors.len(), %mode))]
pub fn resolve(
    descriptors: &[ObjectDescriptor],
    mode: Mode,
    config: &ResolverConfig,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Plan, PlanError> {
    let graph = normalize(descriptors, mode, evaluator)?;
    let acyclic = CycleBreaker::from_config(config).run(graph)?;
    let plan = sequence(acyclic);

    info!(
        steps = plan.len(),
        breaks = plan.breaks.len(),
        fingerprint = %plan.fingerprint(),
        "resolved plan"
    );
    Ok(plan)
}

/// Build and normalize the graph without breaking cycles.
///
/// # Errors
///
/// Returns a [`PlanError`] if a reference cannot be resolved or a descriptor
/// is invalid.
pub fn normalize(
    descriptors: &[ObjectDescriptor],
    mode: Mode,
    evaluator: &dyn ConditionEvaluator,
) -> Result<NormalizedGraph, PlanError> {
    let raw = RawGraph::build(descriptors, mode, evaluator)?;
    Ok(NormalizedGraph::from_raw(raw))
}

/// Strongly connected components of the normalized graph, by node key.
///
/// # Errors
///
/// Same as [`normalize`].
pub fn find_cycles(
    descriptors: &[ObjectDescriptor],
    mode: Mode,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Vec<Vec<String>>, PlanError> {
    let graph = normalize(descriptors, mode, evaluator)?;
    Ok(graph::find_all_cycles(&graph.to_petgraph()))
}
