//! Cycle detection and breaking.
//!
//! # Detection
//!
//! [`find_cycle`] is an iterative coloring DFS over roots in registry order
//! and working edges in list order. Meeting a node that is still `Visiting`
//! closes a [`Cycle`]: the path from the re-entered node to the current node,
//! and the edges along it with the closing edge first.
//!
//! # Breaking
//!
//! [`CycleBreaker`] alternates detection with one rewrite at a time. Each
//! configured [`BreakStrategy`] is offered the cycle in order, the first one
//! that rewrites the graph wins, and detection restarts from scratch. A
//! cycle no strategy can break, or one that survives `max_passes` rounds,
//! becomes [`PlanError::CyclicDependency`].
//!
//! Strategies rewrite `working` edges only, so `deps` still shows what the
//! normalizer produced.

#![allow(clippy::module_name_repetitions)]

use std::fmt;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use crate::config::{ResolverConfig, StrategyKind};
use crate::descriptor::{FallbackScope, SplitPolicy};
use crate::error::PlanError;
use crate::graph::node::{
    Edge, EdgeOrigin, NodeId, NodeKind, Registry, SetId, Status, StatusTable, Synthetic,
};
use crate::graph::normalize::NormalizedGraph;

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Position of one working edge: `registry.node(from).working[position]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleEdge {
    pub from: NodeId,
    pub position: usize,
}

/// A cycle found by [`find_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Nodes from the re-entered node to the node that closed the cycle.
    pub nodes: Vec<NodeId>,
    /// Edges of the cycle, closing edge first, then in path order.
    pub edges: Vec<CycleEdge>,
}

impl Cycle {
    /// Object names along the cycle, in path order. Synthetic nodes carry
    /// their tag, e.g. `view.a (base)`.
    #[must_use]
    pub fn names(&self, registry: &Registry) -> Vec<String> {
        self.nodes
            .iter()
            .map(|&id| {
                let node = registry.node(id);
                match node.synthetic {
                    Some(synthetic) => format!("{} ({})", node.fqn, synthetic.tag()),
                    None => node.fqn.clone(),
                }
            })
            .collect()
    }

    fn close(frames: &[(NodeId, usize)], reentered: NodeId) -> Self {
        let start = frames
            .iter()
            .position(|(node, _)| *node == reentered)
            .unwrap_or_default();
        let path = &frames[start..];

        // Frame cursors already point past the edge being followed.
        let edge_at = |(from, next): &(NodeId, usize)| CycleEdge {
            from: *from,
            position: next.saturating_sub(1),
        };

        let mut edges = Vec::with_capacity(path.len());
        edges.extend(path.last().map(edge_at));
        edges.extend(path[..path.len().saturating_sub(1)].iter().map(edge_at));

        Self {
            nodes: path.iter().map(|(node, _)| *node).collect(),
            edges,
        }
    }
}

/// Find the first cycle over working edges, if any.
#[must_use]
pub fn find_cycle(registry: &Registry) -> Option<Cycle> {
    let mut status = StatusTable::new(registry.len());
    let mut frames: Vec<(NodeId, usize)> = Vec::new();

    for root in registry.ids() {
        if status.get(root) != Status::Unvisited {
            continue;
        }
        status.set(root, Status::Visiting);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (node, position) = *frame;
            let working = &registry.node(node).working;
            if position >= working.len() {
                status.set(node, Status::Resolved);
                frames.pop();
                continue;
            }
            frame.1 += 1;

            let target = working[position].target;
            match status.get(target) {
                Status::Unvisited => {
                    status.set(target, Status::Visiting);
                    frames.push((target, 0));
                }
                Status::Visiting => return Some(Cycle::close(&frames, target)),
                Status::Resolved | Status::Visited => {}
            }
        }
    }

    None
}

/// Strongly connected components of `graph` with more than one member.
///
/// Each entry is a sorted list of node weights; the list is sorted too.
#[must_use]
pub fn find_all_cycles(graph: &DiGraph<String, ()>) -> Vec<Vec<String>> {
    let mut cycles: Vec<Vec<String>> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .map(|component| {
            let mut ids: Vec<String> =
                component.into_iter().map(|idx| graph[idx].clone()).collect();
            ids.sort_unstable();
            ids
        })
        .collect();

    cycles.sort_unstable();
    cycles
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// One way of rewriting working edges so a cycle disappears.
pub trait BreakStrategy: fmt::Debug {
    fn kind(&self) -> StrategyKind;

    /// Rewrite `graph` to break `cycle`. Returns a description of the
    /// rewrite, or `None` if the strategy does not apply.
    fn apply(&self, graph: &mut NormalizedGraph, cycle: &Cycle) -> Option<String>;
}

/// Instantiate the configured strategies, in order.
#[must_use]
pub fn strategies_for(config: &ResolverConfig) -> Vec<Box<dyn BreakStrategy>> {
    config
        .strategies
        .iter()
        .map(|kind| -> Box<dyn BreakStrategy> {
            match kind {
                StrategyKind::SetAlternative => Box::new(SetAlternative {
                    max_retries: config.max_set_retries,
                }),
                StrategyKind::Placeholder => Box::new(Placeholder),
                StrategyKind::FallbackPair => Box::new(FallbackPair),
            }
        })
        .collect()
}

/// Switch a dependency set on the cycle to its next member, or bracket it
/// with its set fallback once every member has been tried.
#[derive(Debug, Clone, Copy)]
pub struct SetAlternative {
    pub max_retries: usize,
}

impl BreakStrategy for SetAlternative {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SetAlternative
    }

    fn apply(&self, graph: &mut NormalizedGraph, cycle: &Cycle) -> Option<String> {
        for at in &cycle.edges {
            let edge = graph.registry.node(at.from).working[at.position];
            let EdgeOrigin::Set(set_id) = edge.origin else {
                continue;
            };

            let set = graph.set(set_id);
            let owner = graph.object(set.declared_by).fqn.clone();
            if set.cycles >= self.max_retries {
                trace!(%owner, cycles = set.cycles, "dependency set exhausted its retries");
                continue;
            }
            let previous = set.chosen().map(|member| member.target);

            if let Some(&next) = graph.set_mut(set_id).advance() {
                release_choice(graph, set_id, *at);
                let (from, replacement) = graph.set(set_id).edge_for(&next);
                graph.registry.add_working_edge(from, replacement);

                let name = |id: Option<NodeId>| {
                    id.map_or_else(String::new, |id| graph.registry.node(id).fqn.clone())
                };
                return Some(format!(
                    "{owner}: switched from {} to {}",
                    name(previous),
                    name(Some(next.target))
                ));
            }

            let set = graph.set(set_id);
            if set.fallen_back {
                continue;
            }
            let Some(capability) = set.fallback.clone() else {
                continue;
            };
            release_choice(graph, set_id, *at);
            graph.set_mut(set_id).fallen_back = true;
            bracket(
                &mut graph.registry,
                at.from,
                edge.target,
                &Bracket::for_set(&capability),
            );
            return Some(format!("{owner}: every member cycles, bracketed with {capability}"));
        }
        None
    }
}

/// Drop the working edge `at` that `set_id` no longer chooses. If another
/// set still chooses the same edge, it stays and is handed to that set.
fn release_choice(graph: &mut NormalizedGraph, set_id: SetId, at: CycleEdge) {
    let target = graph.registry.node(at.from).working[at.position].target;
    let sharing = graph
        .sets
        .iter()
        .filter(|set| set.id != set_id)
        .find(|set| {
            set.chosen().is_some_and(|member| {
                let (source, edge) = set.edge_for(member);
                source == at.from && edge.target == target
            })
        })
        .map(|set| set.id);

    match sharing {
        Some(other) => {
            graph.registry.node_mut(at.from).working[at.position].origin = EdgeOrigin::Set(other);
        }
        None => {
            graph.registry.remove_working_edge(at.from, at.position);
        }
    }
}

/// Nodes with a working path to `target`, `target` included.
fn waiting_on(graph: &NormalizedGraph, target: NodeId) -> Vec<bool> {
    // Dependency → dependent orientation: everything reachable waits on target.
    let view = graph.to_petgraph();
    let mut reached = vec![false; graph.registry.len()];
    let mut dfs = Dfs::new(&view, NodeIndex::new(target.index()));
    while let Some(idx) = dfs.next(&view) {
        reached[idx.index()] = true;
    }
    reached
}

/// Route a cyclic edge to a base placeholder of a splittable target.
#[derive(Debug, Clone, Copy)]
pub struct Placeholder;

impl BreakStrategy for Placeholder {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Placeholder
    }

    fn apply(&self, graph: &mut NormalizedGraph, cycle: &Cycle) -> Option<String> {
        for at in &cycle.edges {
            let edge = graph.registry.node(at.from).working[at.position];
            let target = graph.registry.node(edge.target);
            if target.synthetic.is_some() {
                continue;
            }
            let Some(object) = target.object else {
                continue;
            };
            if graph.object(object).split != Some(SplitPolicy::Base) {
                continue;
            }

            let key = format!("{}:{}", Synthetic::Base.tag(), target.key);
            let (fqn, kind) = (target.fqn.clone(), target.kind);
            let cyclic = waiting_on(graph, edge.target);
            let (base, created) = graph.registry.get_or_insert(
                key,
                &fqn,
                kind,
                Some(object),
                Some(Synthetic::Base),
            );

            if created {
                let carried: Vec<Edge> = graph
                    .registry
                    .node(edge.target)
                    .working
                    .iter()
                    .filter(|carried| !cyclic[carried.target.index()])
                    .map(|carried| {
                        Edge::new(carried.target, EdgeOrigin::Placeholder, carried.declared_by)
                    })
                    .collect();
                for carried in carried {
                    graph.registry.add_working_edge(base, carried);
                }
                debug!(node = %graph.registry.node(base), "created base placeholder");
            }

            if graph.registry.node(at.from).waits_on(base) {
                graph.registry.remove_working_edge(at.from, at.position);
            } else {
                graph.registry.node_mut(at.from).working[at.position].target = base;
            }
            graph
                .registry
                .add_working_edge(edge.target, Edge::new(base, EdgeOrigin::Placeholder, None));

            return Some(format!(
                "{} now waits on the base of {fqn}",
                graph.registry.node(at.from)
            ));
        }
        None
    }
}

/// Bracket a cyclic edge with the declaring object's fallback capability.
#[derive(Debug, Clone, Copy)]
pub struct FallbackPair;

impl BreakStrategy for FallbackPair {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FallbackPair
    }

    fn apply(&self, graph: &mut NormalizedGraph, cycle: &Cycle) -> Option<String> {
        for at in &cycle.edges {
            let edge = graph.registry.node(at.from).working[at.position];
            if edge.origin == EdgeOrigin::Fallback {
                continue;
            }
            let Some(declared_by) = edge.declared_by else {
                continue;
            };
            let object = graph.object(declared_by);
            let Some(policy) = &object.fallback else {
                continue;
            };

            let pair = Bracket::for_object(&policy.capability, policy.scope, &object.fqn);
            let capability = policy.capability.clone();
            graph.registry.remove_working_edge(at.from, at.position);
            bracket(&mut graph.registry, at.from, edge.target, &pair);

            return Some(format!(
                "{} runs under {capability} instead of waiting on {}",
                graph.registry.node(at.from),
                graph.registry.node(edge.target)
            ));
        }
        None
    }
}

/// Keys and kinds of an opening/closing fallback node pair.
struct Bracket {
    capability: String,
    open_key: String,
    close_key: String,
    open: (NodeKind, Synthetic),
    close: (NodeKind, Synthetic),
}

impl Bracket {
    fn for_object(capability: &str, scope: FallbackScope, fqn: &str) -> Self {
        let suffix = match scope {
            FallbackScope::Shared => String::new(),
            FallbackScope::Object => format!("@{fqn}"),
        };
        Self {
            capability: capability.to_string(),
            open_key: format!("fallback:{capability}{suffix}"),
            close_key: format!("endfallback:{capability}{suffix}"),
            open: (NodeKind::Fallback, Synthetic::Fallback),
            close: (NodeKind::EndFallback, Synthetic::EndFallback),
        }
    }

    fn for_set(capability: &str) -> Self {
        Self {
            capability: capability.to_string(),
            open_key: format!("set_fallback:{capability}"),
            close_key: format!("set_end_fallback:{capability}"),
            open: (NodeKind::SetFallback, Synthetic::SetFallback),
            close: (NodeKind::SetEndFallback, Synthetic::SetEndFallback),
        }
    }
}

/// Replace `source → target` with `source → open`, `close → source` and
/// `close → target`. The caller removes the original edge.
fn bracket(registry: &mut Registry, source: NodeId, target: NodeId, pair: &Bracket) {
    let (open, _) = registry.get_or_insert(
        pair.open_key.clone(),
        &pair.capability,
        pair.open.0,
        None,
        Some(pair.open.1),
    );
    let (close, _) = registry.get_or_insert(
        pair.close_key.clone(),
        &pair.capability,
        pair.close.0,
        None,
        Some(pair.close.1),
    );

    registry.add_working_edge(source, Edge::new(open, EdgeOrigin::Fallback, None));
    registry.add_working_edge(close, Edge::new(source, EdgeOrigin::Fallback, None));
    registry.add_working_edge(close, Edge::new(target, EdgeOrigin::Fallback, None));
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

/// One rewrite the breaker performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakRecord {
    pub strategy: StrategyKind,
    pub detail: String,
}

/// A normalized graph with no cycles left in its working edges.
#[derive(Debug, Clone)]
pub struct AcyclicGraph {
    graph: NormalizedGraph,
    breaks: Vec<BreakRecord>,
}

impl AcyclicGraph {
    #[must_use]
    pub const fn graph(&self) -> &NormalizedGraph {
        &self.graph
    }

    #[must_use]
    pub fn breaks(&self) -> &[BreakRecord] {
        &self.breaks
    }

    #[must_use]
    pub fn into_parts(self) -> (NormalizedGraph, Vec<BreakRecord>) {
        (self.graph, self.breaks)
    }
}

#[derive(Debug)]
pub struct CycleBreaker {
    strategies: Vec<Box<dyn BreakStrategy>>,
    max_passes: usize,
}

impl CycleBreaker {
    #[must_use]
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            strategies: strategies_for(config),
            max_passes: config.max_passes,
        }
    }

    /// Break every cycle in `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::CyclicDependency`] naming the objects of a cycle
    /// that no strategy could break, or that was still present after
    /// `max_passes` rewrites.
    #[instrument(skip_all, fields(nodes = graph.registry.len()))]
    pub fn run(&self, mut graph: NormalizedGraph) -> Result<AcyclicGraph, PlanError> {
        let mut breaks = Vec::new();

        while let Some(cycle) = find_cycle(&graph.registry) {
            if breaks.len() >= self.max_passes {
                warn!(max_passes = self.max_passes, "cycle breaking did not converge");
                return Err(PlanError::CyclicDependency {
                    cycle: cycle.names(&graph.registry),
                });
            }

            let applied = self.strategies.iter().find_map(|strategy| {
                strategy.apply(&mut graph, &cycle).map(|detail| BreakRecord {
                    strategy: strategy.kind(),
                    detail,
                })
            });

            let Some(record) = applied else {
                let names = cycle.names(&graph.registry);
                debug!(cycle = ?names, "no strategy breaks cycle");
                return Err(PlanError::CyclicDependency { cycle: names });
            };
            debug!(strategy = ?record.strategy, detail = %record.detail, "broke dependency cycle");
            breaks.push(record);
        }

        debug!(passes = breaks.len(), "dependency graph is acyclic");
        Ok(AcyclicGraph { graph, breaks })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
