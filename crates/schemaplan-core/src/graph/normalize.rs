//! Direction normalization: declarations to directed edges.
//!
//! # Overview
//!
//! Every edge in the normalized graph reads "source waits on target". A
//! declaration `A depends on B` contributes, per side it applies to:
//!
//! - build side: `build(A) → build(B)`, so B is built first;
//! - drop side: `drop(B) → drop(A)`, so A is dropped first.
//!
//! `forwards` declarations contribute only the build edge, `backwards` only
//! the drop edge, `both` each. A side contributes nothing when either end
//! has no node on it, which is how the mode and per-object actions filter
//! edges.
//!
//! After the declarations, every object with nodes on both sides gets the
//! implicit mirror edge `build(X) → drop(X)`.
//!
//! Dependency sets are materialized per side as [`DependencySet`]s and
//! contribute only their current choice. Which member that is may later be
//! changed by [`crate::graph::cycles`].

#![allow(clippy::module_name_repetitions)]

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, instrument, trace};

use crate::descriptor::Mode;
use crate::graph::build::{DeclarationBody, ObjectInfo, RawGraph, ResolvedDependency};
use crate::graph::node::{Edge, EdgeOrigin, NodeId, NodeKind, ObjectId, Registry, SetId, Side};
use crate::graph::set::{DependencySet, SetMember};

// ---------------------------------------------------------------------------
// NormalizedGraph
// ---------------------------------------------------------------------------

/// The dependency graph with directed edges on both sides, possibly cyclic.
#[derive(Debug, Clone)]
pub struct NormalizedGraph {
    pub mode: Mode,
    pub registry: Registry,
    pub objects: Vec<ObjectInfo>,
    /// Materialized dependency sets, one per (declaration, side).
    pub sets: Vec<DependencySet>,
}

impl NormalizedGraph {
    /// Turn resolved declarations into edges.
    #[must_use]
    #[instrument(skip(raw), fields(mode = %raw.mode))]
    pub fn from_raw(raw: RawGraph) -> Self {
        let RawGraph {
            mode,
            registry,
            objects,
            declarations,
        } = raw;

        let mut graph = Self {
            mode,
            registry,
            objects,
            sets: Vec::new(),
        };

        for decl in &declarations {
            match &decl.body {
                DeclarationBody::Single(dep) => graph.add_single(decl.declared_by, dep),
                DeclarationBody::Set { members, fallback } => {
                    for side in [Side::Build, Side::Drop] {
                        graph.add_set(decl.declared_by, side, members, fallback.as_ref());
                    }
                }
            }
        }

        let mirrored: Vec<(NodeId, NodeId)> = graph
            .objects
            .iter()
            .filter_map(|object| Some((object.build?, object.drop?)))
            .collect();
        for (build, drop) in mirrored {
            graph
                .registry
                .add_edge(build, Edge::new(drop, EdgeOrigin::Mirror, None));
        }

        debug!(
            nodes = graph.registry.len(),
            edges = graph.edge_count(),
            sets = graph.sets.len(),
            "normalized dependency graph"
        );
        graph
    }

    #[must_use]
    pub fn object(&self, id: ObjectId) -> &ObjectInfo {
        &self.objects[id.index()]
    }

    #[must_use]
    pub fn set(&self, id: SetId) -> &DependencySet {
        &self.sets[id.index()]
    }

    pub fn set_mut(&mut self, id: SetId) -> &mut DependencySet {
        &mut self.sets[id.index()]
    }

    /// Number of working edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.registry.edge_count()
    }

    /// Working edges as a petgraph graph, oriented dependency → dependent.
    ///
    /// Node weights are node keys.
    #[must_use]
    pub fn to_petgraph(&self) -> DiGraph<String, ()> {
        let mut graph = DiGraph::with_capacity(self.registry.len(), self.edge_count());
        let indices: Vec<NodeIndex> = self
            .registry
            .iter()
            .map(|node| graph.add_node(node.key.clone()))
            .collect();

        for node in self.registry.iter() {
            for edge in &node.working {
                graph.add_edge(
                    indices[edge.target.index()],
                    indices[node.id.index()],
                    (),
                );
            }
        }
        graph
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    fn add_single(&mut self, declared_by: ObjectId, dep: &ResolvedDependency) {
        for side in [Side::Build, Side::Drop] {
            if !dep.direction.applies_to(side) {
                continue;
            }
            let Some((from, to)) = self.side_edge(declared_by, dep.target, side) else {
                continue;
            };
            let added =
                self.add_declared(from, Edge::new(to, EdgeOrigin::Declared, Some(declared_by)));

            if added && dep.propagate_mirror {
                let from_mirror = self.registry.node(from).mirror;
                let to_mirror = self.registry.node(to).mirror;
                if let (Some(from_mirror), Some(to_mirror)) = (from_mirror, to_mirror) {
                    self.add_declared(
                        from_mirror,
                        Edge::new(to_mirror, EdgeOrigin::Propagated, Some(declared_by)),
                    );
                }
            }
        }
    }

    fn add_set(
        &mut self,
        declared_by: ObjectId,
        side: Side,
        members: &[ResolvedDependency],
        fallback: Option<&String>,
    ) {
        let Some(owner) = self.object(declared_by).node(side) else {
            return;
        };

        let members: Vec<SetMember> = members
            .iter()
            .filter(|dep| dep.direction.applies_to(side) && dep.target != declared_by)
            .filter_map(|dep| {
                self.object(dep.target).node(side).map(|target| SetMember {
                    target,
                    priority: dep.priority,
                    declared_index: dep.declared_index,
                })
            })
            .collect();

        if members.is_empty() {
            trace!(
                object = %self.object(declared_by).fqn,
                ?side,
                "dependency set has no members on this side"
            );
            return;
        }

        let set = DependencySet::new(
            SetId(self.sets.len()),
            side,
            owner,
            declared_by,
            members,
            fallback.cloned(),
        );
        if let Some(chosen) = set.chosen() {
            let (from, edge) = set.edge_for(chosen);
            self.add_declared(from, edge);
        }
        self.sets.push(set);
    }

    /// The `(source, target)` node pair for `declaring depends on target` on
    /// `side`, if both ends exist there.
    fn side_edge(
        &self,
        declaring: ObjectId,
        target: ObjectId,
        side: Side,
    ) -> Option<(NodeId, NodeId)> {
        let declaring = self.object(declaring).node(side)?;
        let target = self.object(target).node(side)?;
        match side {
            Side::Build => Some((declaring, target)),
            Side::Drop => Some((target, declaring)),
        }
    }

    /// Add a declaration edge unless its source is an `Exists` anchor.
    fn add_declared(&mut self, from: NodeId, edge: Edge) -> bool {
        if self.registry.node(from).kind == NodeKind::Exists {
            trace!(node = %self.registry.node(from), "exists anchors carry no dependencies");
            return false;
        }
        self.registry.add_edge(from, edge)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DependencySetSpec, DependencySpec, Direction, FlagSet, ObjectDescriptor};

    fn normalize(descriptors: &[ObjectDescriptor], mode: Mode) -> NormalizedGraph {
        let raw = RawGraph::build(descriptors, mode, &FlagSet::new()).expect("build");
        NormalizedGraph::from_raw(raw)
    }

    fn edges_of(graph: &NormalizedGraph, key: &str) -> Vec<String> {
        let id = graph.registry.lookup(key).expect("node");
        graph
            .registry
            .node(id)
            .working
            .iter()
            .map(|edge| graph.registry.node(edge.target).key.clone())
            .collect()
    }

    fn pair() -> Vec<ObjectDescriptor> {
        vec![
            ObjectDescriptor::new("view.a", "view").depends_on("table.b"),
            ObjectDescriptor::new("table.b", "table"),
        ]
    }

    #[test]
    fn build_mode_points_dependents_at_dependencies() {
        let graph = normalize(&pair(), Mode::Build);
        assert_eq!(edges_of(&graph, "build:view.a"), vec!["build:table.b"]);
        assert!(edges_of(&graph, "build:table.b").is_empty());
    }

    #[test]
    fn drop_mode_reverses_edges() {
        let graph = normalize(&pair(), Mode::Drop);
        assert_eq!(edges_of(&graph, "drop:table.b"), vec!["drop:view.a"]);
        assert!(edges_of(&graph, "drop:view.a").is_empty());
    }

    #[test]
    fn both_mode_adds_mirror_edges() {
        let graph = normalize(&pair(), Mode::Both);
        assert_eq!(
            edges_of(&graph, "build:view.a"),
            vec!["build:table.b", "drop:view.a"]
        );
        assert_eq!(edges_of(&graph, "drop:table.b"), vec!["drop:view.a"]);
        assert_eq!(edges_of(&graph, "build:table.b"), vec!["drop:table.b"]);
    }

    #[test]
    fn direction_tags_select_sides() {
        let graph = normalize(
            &[
                ObjectDescriptor::new("a", "x")
                    .with_dependency(DependencySpec::fqn("b").direction(Direction::Forwards))
                    .with_dependency(DependencySpec::fqn("c").direction(Direction::Backwards)),
                ObjectDescriptor::new("b", "x"),
                ObjectDescriptor::new("c", "x"),
            ],
            Mode::Both,
        );
        assert_eq!(edges_of(&graph, "build:a"), vec!["build:b", "drop:a"]);
        assert!(edges_of(&graph, "drop:b").is_empty());
        assert_eq!(edges_of(&graph, "drop:c"), vec!["drop:a"]);
        assert_eq!(edges_of(&graph, "build:c"), vec!["drop:c"]);
    }

    #[test]
    fn propagate_mirror_copies_edge_onto_mirrors() {
        let graph = normalize(
            &[
                ObjectDescriptor::new("a", "x").with_dependency(
                    DependencySpec::fqn("b")
                        .direction(Direction::Forwards)
                        .propagate_mirror(),
                ),
                ObjectDescriptor::new("b", "x"),
            ],
            Mode::Both,
        );
        assert_eq!(edges_of(&graph, "drop:a"), vec!["drop:b"]);
        let id = graph.registry.lookup("drop:a").expect("node");
        assert_eq!(
            graph.registry.node(id).working[0].origin,
            EdgeOrigin::Propagated
        );
    }

    #[test]
    fn exists_anchors_have_no_outgoing_edges() {
        let graph = normalize(
            &[
                ObjectDescriptor::new("a", "x")
                    .with_action(NodeKind::Exists)
                    .depends_on("b"),
                ObjectDescriptor::new("b", "x").depends_on("a"),
            ],
            Mode::Build,
        );
        assert!(edges_of(&graph, "exists:a").is_empty());
        assert_eq!(edges_of(&graph, "build:b"), vec!["exists:a"]);
    }

    #[test]
    fn deactivated_targets_are_omitted() {
        let graph = normalize(
            &[
                ObjectDescriptor::new("a", "x").depends_on("b"),
                ObjectDescriptor::new("b", "x").with_action(NodeKind::Deactivated),
            ],
            Mode::Both,
        );
        assert_eq!(edges_of(&graph, "build:a"), vec!["drop:a"]);
        assert!(graph.registry.lookup("build:b").is_none());
    }

    #[test]
    fn sets_contribute_only_their_choice() {
        let graph = normalize(
            &[
                ObjectDescriptor::new("role.r3", "role").with_set(DependencySetSpec::new(vec![
                    DependencySpec::fqn("role.r4").priority(1),
                    DependencySpec::fqn("role.r1").priority(3),
                    DependencySpec::fqn("role.r2").priority(2),
                ])),
                ObjectDescriptor::new("role.r1", "role"),
                ObjectDescriptor::new("role.r2", "role"),
                ObjectDescriptor::new("role.r4", "role"),
            ],
            Mode::Both,
        );
        assert_eq!(graph.sets.len(), 2);
        assert_eq!(
            edges_of(&graph, "build:role.r3"),
            vec!["build:role.r1", "drop:role.r3"]
        );
        assert_eq!(edges_of(&graph, "drop:role.r1"), vec!["drop:role.r3"]);
        assert!(edges_of(&graph, "drop:role.r2").is_empty());
    }

    #[test]
    fn set_members_filtered_per_side() {
        let graph = normalize(
            &[
                ObjectDescriptor::new("a", "x").with_set(DependencySetSpec::new(vec![
                    DependencySpec::fqn("b").direction(Direction::Backwards),
                    DependencySpec::fqn("a"),
                ])),
                ObjectDescriptor::new("b", "x"),
            ],
            Mode::Both,
        );
        // Build side keeps no members, so only the drop-side set exists.
        assert_eq!(graph.sets.len(), 1);
        assert_eq!(graph.sets[0].side, Side::Drop);
        assert_eq!(graph.sets[0].members.len(), 1);
    }

    #[test]
    fn petgraph_view_points_dependency_to_dependent() {
        let graph = normalize(&pair(), Mode::Build);
        let pg = graph.to_petgraph();
        assert_eq!(pg.node_count(), 2);
        let edge = pg.edge_indices().next().expect("edge");
        let (from, to) = pg.edge_endpoints(edge).expect("endpoints");
        assert_eq!(pg[from], "build:table.b");
        assert_eq!(pg[to], "build:view.a");
    }
}
