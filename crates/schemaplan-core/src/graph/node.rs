//! Node model: the vocabulary of graph nodes and edges, and the arena that
//! owns them for one resolution pass.
//!
//! # Ownership
//!
//! All nodes live in a [`Registry`] and are addressed by [`NodeId`]. Edges,
//! mirror links, and dependency-set members store `NodeId`s, never
//! references, so synthetic nodes can be added during cycle breaking without
//! invalidating anything already recorded.
//!
//! # Traversal state
//!
//! The `Unvisited → Visiting → Resolved → Visited` status used by the cycle
//! detector and the sequencer lives in a [`StatusTable`] owned by each
//! traversal, not on the node. A fresh table per attempt is what lets the
//! breaker re-run detection after every rewrite.

#![allow(clippy::module_name_repetitions)]

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Index of a node in its [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Index of an object descriptor in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub(crate) usize);

impl ObjectId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Index of a dependency set instance in a normalized graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetId(pub(crate) usize);

impl SetId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Which family of steps a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Build,
    Drop,
}

impl Side {
    /// The opposite family.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Build => Self::Drop,
            Self::Drop => Self::Build,
        }
    }
}

/// The action a node performs on its object.
///
/// On descriptors this is the requested action (default `Unspecified`, meaning
/// "whatever the mode asks for"). On nodes it is the resolved kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Build,
    Drop,
    Rebuild,
    Diff,
    DiffPrep,
    Fallback,
    EndFallback,
    SetFallback,
    SetEndFallback,
    Exists,
    BuildAndDrop,
    Optional,
    Arrive,
    Depart,
    Deactivated,
    #[default]
    Unspecified,
}

impl NodeKind {
    /// Short tag used in node keys and step display.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Drop => "drop",
            Self::Rebuild => "rebuild",
            Self::Diff => "diff",
            Self::DiffPrep => "diff_prep",
            Self::Fallback => "fallback",
            Self::EndFallback => "end_fallback",
            Self::SetFallback => "set_fallback",
            Self::SetEndFallback => "set_end_fallback",
            Self::Exists => "exists",
            Self::BuildAndDrop => "build_and_drop",
            Self::Optional => "optional",
            Self::Arrive => "arrive",
            Self::Depart => "depart",
            Self::Deactivated => "deactivated",
            Self::Unspecified => "unspecified",
        }
    }

    /// The family this kind belongs to when it appears on an object node.
    ///
    /// Synthetic and request-only kinds have no side.
    #[must_use]
    pub const fn side(self) -> Option<Side> {
        match self {
            Self::Build
            | Self::Rebuild
            | Self::Diff
            | Self::Arrive
            | Self::Exists
            | Self::Optional => Some(Side::Build),
            Self::Drop | Self::DiffPrep | Self::Depart => Some(Side::Drop),
            Self::Fallback
            | Self::EndFallback
            | Self::SetFallback
            | Self::SetEndFallback
            | Self::BuildAndDrop
            | Self::Deactivated
            | Self::Unspecified => None,
        }
    }

    /// Kinds that only the resolver creates.
    #[must_use]
    pub const fn is_synthetic_only(self) -> bool {
        matches!(
            self,
            Self::Fallback | Self::EndFallback | Self::SetFallback | Self::SetEndFallback
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Why a synthetic node exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Synthetic {
    /// Base placeholder carrying the non-cyclic part of its target.
    Base,
    Fallback,
    EndFallback,
    SetFallback,
    SetEndFallback,
}

impl Synthetic {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Fallback => "fallback",
            Self::EndFallback => "end_fallback",
            Self::SetFallback => "set_fallback",
            Self::SetEndFallback => "set_end_fallback",
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Where an edge came from. Strategies use this to decide what they may
/// rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeOrigin {
    /// A single dependency declaration.
    Declared,
    /// The current choice of a dependency set.
    Set(SetId),
    /// Implicit build-after-drop edge between mirrors.
    Mirror,
    /// Copy of a declared edge onto the mirrors (`propagate_mirror`).
    Propagated,
    /// Added while splitting a target into a base placeholder.
    Placeholder,
    /// Added while bracketing a consumer with a fallback pair.
    Fallback,
}

impl EdgeOrigin {
    #[must_use]
    pub const fn is_set(self) -> bool {
        matches!(self, Self::Set(_))
    }
}

/// "This node must wait behind `target`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub target: NodeId,
    pub origin: EdgeOrigin,
    /// The object whose declaration produced this edge, if any.
    pub declared_by: Option<ObjectId>,
}

impl Edge {
    #[must_use]
    pub const fn new(target: NodeId, origin: EdgeOrigin, declared_by: Option<ObjectId>) -> Self {
        Self {
            target,
            origin,
            declared_by,
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One build-or-drop action on one schema object, or a synthetic helper.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Unique registry key, e.g. `build:view.v1` or `fallback:superuser`.
    pub key: String,
    /// Object fqn, or the capability name for fallback nodes.
    pub fqn: String,
    pub kind: NodeKind,
    pub object: Option<ObjectId>,
    /// Edges as produced by the direction normalizer.
    pub deps: Vec<Edge>,
    /// Edges used for traversal. Cycle breaking rewrites only this list.
    pub working: Vec<Edge>,
    pub mirror: Option<NodeId>,
    pub synthetic: Option<Synthetic>,
}

impl Node {
    /// `true` for nodes introduced by cycle breaking.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.synthetic.is_some()
    }

    #[must_use]
    pub const fn side(&self) -> Option<Side> {
        match self.synthetic {
            Some(Synthetic::Base) | None => self.kind.side(),
            Some(_) => None,
        }
    }

    /// Whether `working` already has an edge to `target`.
    #[must_use]
    pub fn waits_on(&self, target: NodeId) -> bool {
        self.working.iter().any(|edge| edge.target == target)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.synthetic {
            Some(Synthetic::Base) => write!(f, "{} {} (base)", self.kind, self.fqn),
            _ => write!(f, "{} {}", self.kind, self.fqn),
        }
    }
}

// ---------------------------------------------------------------------------
// Traversal status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Unvisited,
    Visiting,
    Resolved,
    Visited,
}

/// Per-traversal status side table, indexed by [`NodeId`].
#[derive(Debug, Clone)]
pub struct StatusTable {
    status: Vec<Status>,
}

impl StatusTable {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            status: vec![Status::Unvisited; len],
        }
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Status {
        self.status.get(id.0).copied().unwrap_or_default()
    }

    pub fn set(&mut self, id: NodeId, status: Status) {
        if id.0 >= self.status.len() {
            self.status.resize(id.0 + 1, Status::Unvisited);
        }
        self.status[id.0] = status;
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Arena owning every node of one resolution pass, keyed by node key.
///
/// Insertion order is significant: it is the root order of every traversal,
/// which is what keeps output deterministic.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    nodes: Vec<Node>,
    by_key: HashMap<String, NodeId>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, or return the existing one with the same key.
    ///
    /// The key index doubles as the memo that keeps synthetic nodes unique
    /// per (target, reason).
    pub fn get_or_insert(
        &mut self,
        key: String,
        fqn: &str,
        kind: NodeKind,
        object: Option<ObjectId>,
        synthetic: Option<Synthetic>,
    ) -> (NodeId, bool) {
        if let Some(&id) = self.by_key.get(&key) {
            return (id, false);
        }

        let id = NodeId(self.nodes.len());
        self.by_key.insert(key.clone(), id);
        self.nodes.push(Node {
            id,
            key,
            fqn: fqn.to_string(),
            kind,
            object,
            deps: Vec::new(),
            working: Vec::new(),
            mirror: None,
            synthetic,
        });
        (id, true)
    }

    /// Look up a node by key.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<NodeId> {
        self.by_key.get(key).copied()
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this registry.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this registry.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Node ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Link two nodes as mirrors of each other.
    pub fn link_mirrors(&mut self, a: NodeId, b: NodeId) {
        self.nodes[a.0].mirror = Some(b);
        self.nodes[b.0].mirror = Some(a);
    }

    /// Record a normalized edge on both the original and working lists.
    ///
    /// Self-edges are dropped. An edge to a target `from` already waits on
    /// is merged into the existing one: a set choice that a plain
    /// declaration also requires takes the declaration's origin, so set
    /// switching can no longer remove it. Returns `true` if the edge now
    /// stands for `edge`, either added or merged that way.
    pub fn add_edge(&mut self, from: NodeId, edge: Edge) -> bool {
        if from == edge.target {
            return false;
        }
        let node = &mut self.nodes[from.0];
        if let Some(existing) = node.working.iter_mut().find(|e| e.target == edge.target) {
            if !existing.origin.is_set() || edge.origin.is_set() {
                return false;
            }
            *existing = edge;
            if let Some(original) = node.deps.iter_mut().find(|e| e.target == edge.target) {
                *original = edge;
            }
            return true;
        }
        node.deps.push(edge);
        node.working.push(edge);
        true
    }

    /// Add an edge to the working list only (cycle-breaking rewrites).
    pub fn add_working_edge(&mut self, from: NodeId, edge: Edge) -> bool {
        if from == edge.target || self.nodes[from.0].waits_on(edge.target) {
            return false;
        }
        self.nodes[from.0].working.push(edge);
        true
    }

    /// Remove the working edge at `position` on `from`.
    pub fn remove_working_edge(&mut self, from: NodeId, position: usize) -> Option<Edge> {
        let working = &mut self.nodes[from.0].working;
        (position < working.len()).then(|| working.remove(position))
    }

    /// Total number of working edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|node| node.working.len()).sum()
    }
}
