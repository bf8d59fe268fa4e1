//! Deterministic emission of an acyclic graph into an ordered [`Plan`].
//!
//! Roots are taken in registry order and each node's working edges in list
//! order; a node is emitted after everything it waits on. The same
//! descriptors and mode therefore always yield the same steps.

#![allow(clippy::module_name_repetitions)]

use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::descriptor::Mode;
use crate::graph::cycles::{AcyclicGraph, BreakRecord};
use crate::graph::node::{NodeId, NodeKind, Status, StatusTable, Synthetic};

/// One ordered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub key: String,
    pub fqn: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic: Option<Synthetic>,
}

impl Step {
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.synthetic.is_some()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.synthetic {
            Some(Synthetic::Base) => write!(f, "{} {} (base)", self.kind, self.fqn),
            _ => write!(f, "{} {}", self.kind, self.fqn),
        }
    }
}

/// The ordered steps of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub mode: Mode,
    pub steps: Vec<Step>,
    /// `(dependent, dependency)` step positions; the dependency always comes
    /// first.
    pub edges: Vec<(usize, usize)>,
    /// Rewrites performed to break cycles, in order.
    pub breaks: Vec<BreakRecord>,
}

impl Plan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Position of the step with `key`.
    #[must_use]
    pub fn position(&self, key: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.key == key)
    }

    /// BLAKE3 hash of the step keys in order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for step in &self.steps {
            hasher.update(step.key.as_bytes());
            hasher.update(b"\n");
        }
        format!("blake3:{}", hasher.finalize())
    }

    /// The final dependency graph, oriented dependency → dependent.
    ///
    /// Node weights are step display names, node indices match step
    /// positions.
    #[must_use]
    pub fn to_graph(&self) -> DiGraph<String, ()> {
        let mut graph = DiGraph::with_capacity(self.steps.len(), self.edges.len());
        let indices: Vec<NodeIndex> = self
            .steps
            .iter()
            .map(|step| graph.add_node(step.to_string()))
            .collect();
        for &(dependent, dependency) in &self.edges {
            graph.add_edge(indices[dependency], indices[dependent], ());
        }
        graph
    }
}

/// Emit every node of `acyclic` after the nodes it waits on.
#[must_use]
#[instrument(skip_all)]
pub fn sequence(acyclic: AcyclicGraph) -> Plan {
    let (graph, breaks) = acyclic.into_parts();
    let registry = &graph.registry;

    let mut status = StatusTable::new(registry.len());
    let mut positions: Vec<Option<usize>> = vec![None; registry.len()];
    let mut order: Vec<NodeId> = Vec::with_capacity(registry.len());
    let mut frames: Vec<(NodeId, usize)> = Vec::new();

    for root in registry.ids() {
        if status.get(root) != Status::Unvisited {
            continue;
        }
        status.set(root, Status::Visiting);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (node, position) = *frame;
            if let Some(edge) = registry.node(node).working.get(position) {
                frame.1 += 1;
                if status.get(edge.target) == Status::Unvisited {
                    status.set(edge.target, Status::Visiting);
                    frames.push((edge.target, 0));
                }
                continue;
            }

            frames.pop();
            status.set(node, Status::Resolved);
            positions[node.index()] = Some(order.len());
            order.push(node);
            status.set(node, Status::Visited);
        }
    }

    let mut edges = Vec::with_capacity(registry.edge_count());
    for (dependent, &id) in order.iter().enumerate() {
        for edge in &registry.node(id).working {
            if let Some(dependency) = positions[edge.target.index()] {
                edges.push((dependent, dependency));
            }
        }
    }

    let steps: Vec<Step> = order
        .iter()
        .map(|&id| {
            let node = registry.node(id);
            Step {
                key: node.key.clone(),
                fqn: node.fqn.clone(),
                kind: node.kind,
                synthetic: node.synthetic,
            }
        })
        .collect();

    debug!(steps = steps.len(), edges = edges.len(), "sequenced plan");

    Plan {
        mode: graph.mode,
        steps,
        edges,
        breaks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::descriptor::{FlagSet, ObjectDescriptor};
    use crate::graph::build::RawGraph;
    use crate::graph::cycles::CycleBreaker;
    use crate::graph::normalize::NormalizedGraph;

    fn plan(descriptors: &[ObjectDescriptor], mode: Mode) -> Plan {
        let raw = RawGraph::build(descriptors, mode, &FlagSet::new()).expect("build");
        let acyclic = CycleBreaker::from_config(&ResolverConfig::default())
            .run(NormalizedGraph::from_raw(raw))
            .expect("acyclic");
        sequence(acyclic)
    }

    fn keys(plan: &Plan) -> Vec<&str> {
        plan.steps.iter().map(|step| step.key.as_str()).collect()
    }

    fn chain() -> Vec<ObjectDescriptor> {
        vec![
            ObjectDescriptor::new("view.v", "view").depends_on("table.t"),
            ObjectDescriptor::new("table.t", "table").depends_on("schema.s"),
            ObjectDescriptor::new("schema.s", "schema"),
        ]
    }

    #[test]
    fn dependencies_are_emitted_first() {
        let plan = plan(&chain(), Mode::Build);
        assert_eq!(
            keys(&plan),
            vec!["build:schema.s", "build:table.t", "build:view.v"]
        );
        assert_eq!(plan.edges, vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn drop_mode_drops_dependents_first() {
        let plan = plan(&chain(), Mode::Drop);
        assert_eq!(
            keys(&plan),
            vec!["drop:view.v", "drop:table.t", "drop:schema.s"]
        );
    }

    #[test]
    fn both_mode_drops_before_rebuilding() {
        let plan = plan(&chain(), Mode::Both);
        assert_eq!(plan.len(), 6);
        for fqn in ["view.v", "table.t", "schema.s"] {
            let drop = plan.position(&format!("drop:{fqn}")).expect("drop");
            let build = plan.position(&format!("build:{fqn}")).expect("build");
            assert!(drop < build, "{fqn}");
        }
        for &(dependent, dependency) in &plan.edges {
            assert!(dependency < dependent);
        }
    }

    #[test]
    fn unrelated_objects_keep_registry_order() {
        let plan = plan(
            &[
                ObjectDescriptor::new("b", "x"),
                ObjectDescriptor::new("a", "x"),
                ObjectDescriptor::new("c", "x"),
            ],
            Mode::Build,
        );
        assert_eq!(keys(&plan), vec!["build:b", "build:a", "build:c"]);
    }

    #[test]
    fn fingerprint_tracks_order() {
        let first = plan(&chain(), Mode::Build);
        let again = plan(&chain(), Mode::Build);
        assert_eq!(first.fingerprint(), again.fingerprint());
        assert!(first.fingerprint().starts_with("blake3:"));

        let other = plan(&chain(), Mode::Drop);
        assert_ne!(first.fingerprint(), other.fingerprint());
    }

    #[test]
    fn to_graph_is_acyclic_and_labelled() {
        let plan = plan(&chain(), Mode::Both);
        let graph = plan.to_graph();
        assert_eq!(graph.node_count(), plan.len());
        assert_eq!(graph.edge_count(), plan.edges.len());
        assert!(!petgraph::algo::is_cyclic_directed(&graph));
        assert_eq!(graph[NodeIndex::new(0)], plan.steps[0].to_string());
    }

    #[test]
    fn step_display_marks_placeholders() {
        let step = Step {
            key: "base:build:view.v1".into(),
            fqn: "view.v1".into(),
            kind: NodeKind::Build,
            synthetic: Some(Synthetic::Base),
        };
        assert_eq!(step.to_string(), "build view.v1 (base)");
        assert!(step.is_fallback());
    }
}
