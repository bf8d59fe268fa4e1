//! Graph construction from object descriptors.
//!
//! # Overview
//!
//! [`RawGraph::build`] walks the descriptors in order and:
//!
//! 1. indexes objects by fully-qualified name, rejecting duplicates;
//! 2. validates fallback policies;
//! 3. creates one node per side each object contributes, linking mirrors;
//! 4. resolves every dependency declaration to concrete objects,
//!    evaluating guard conditions once.
//!
//! The raw graph has nodes but no edges. Which declarations become which
//! edges depends on the mode and is decided by
//! [`crate::graph::normalize`]. Dependency sets are expanded into their
//! members here, but no winner is chosen.
//!
//! ## Node order
//!
//! Drop-side nodes are registered first, then build-side nodes, each in
//! descriptor order. Every traversal uses this order for its roots.
//!
//! ## Name resolution
//!
//! A `fqn` target must match exactly. A `pqn` target is promoted against
//! the declaring object's qualifier first: from `view.app.v1`, the pqn `v2`
//! tries `view.app.v2` then `view.v2`. Failing that, it matches any object
//! whose fqn equals it or ends with `.<pqn>`. Zero or several matches is
//! an [`PlanError::UnresolvedReference`].

#![allow(clippy::module_name_repetitions)]

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, instrument, trace};

use crate::descriptor::{
    ConditionEvaluator, DependencyDecl, DependencySpec, Direction, FallbackPolicy, FallbackScope,
    Mode, ObjectDescriptor, SplitPolicy, Target,
};
use crate::error::PlanError;
use crate::graph::node::{NodeId, NodeKind, ObjectId, Registry, Side};

// ---------------------------------------------------------------------------
// Objects and declarations
// ---------------------------------------------------------------------------

/// What the graph knows about one described object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub fqn: String,
    pub action: NodeKind,
    pub fallback: Option<FallbackPolicy>,
    pub split: Option<SplitPolicy>,
    pub build: Option<NodeId>,
    pub drop: Option<NodeId>,
}

impl ObjectInfo {
    /// This object's node on `side`, if it contributes one.
    #[must_use]
    pub const fn node(&self, side: Side) -> Option<NodeId> {
        match side {
            Side::Build => self.build,
            Side::Drop => self.drop,
        }
    }
}

/// A dependency whose target has been resolved to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub target: ObjectId,
    pub direction: Direction,
    pub propagate_mirror: bool,
    pub priority: i32,
    /// Position within the declaring set (0 for single declarations).
    pub declared_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationBody {
    Single(ResolvedDependency),
    Set {
        members: Vec<ResolvedDependency>,
        fallback: Option<String>,
    },
}

/// One surviving dependency declaration, in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub declared_by: ObjectId,
    pub body: DeclarationBody,
}

// ---------------------------------------------------------------------------
// RawGraph
// ---------------------------------------------------------------------------

/// Nodes, objects, and resolved declarations, before direction is applied.
#[derive(Debug, Clone)]
pub struct RawGraph {
    pub mode: Mode,
    pub registry: Registry,
    pub objects: Vec<ObjectInfo>,
    pub declarations: Vec<Declaration>,
}

impl RawGraph {
    /// Build the raw graph for `mode` from `descriptors`.
    ///
    /// # Errors
    ///
    /// - [`PlanError::DuplicateObject`] if two descriptors share a fqn.
    /// - [`PlanError::InvalidAction`] if a descriptor requests a synthetic kind.
    /// - [`PlanError::InvalidFallbackPolicy`] for empty or conflicting
    ///   capabilities.
    /// - [`PlanError::UnresolvedReference`] for missing or ambiguous targets.
    #[instrument(skip_all, fields(objects = descriptors.len(), %mode))]
    pub fn build(
        descriptors: &[ObjectDescriptor],
        mode: Mode,
        evaluator: &dyn ConditionEvaluator,
    ) -> Result<Self, PlanError> {
        let names = NameIndex::new(descriptors)?;
        validate_fallback_policies(descriptors)?;

        let mut registry = Registry::new();
        let mut objects = descriptors
            .iter()
            .enumerate()
            .map(|(idx, descriptor)| ObjectInfo {
                id: ObjectId(idx),
                fqn: descriptor.fqn.clone(),
                action: descriptor.action,
                fallback: descriptor.fallback.clone(),
                split: descriptor.split,
                build: None,
                drop: None,
            })
            .collect::<Vec<_>>();

        let kinds = descriptors
            .iter()
            .map(|descriptor| {
                node_kinds(descriptor.action, mode).ok_or_else(|| PlanError::InvalidAction {
                    object: descriptor.fqn.clone(),
                    kind: descriptor.action,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for side in [Side::Drop, Side::Build] {
            for (object, (build_kind, drop_kind)) in objects.iter_mut().zip(&kinds) {
                let kind = match side {
                    Side::Build => *build_kind,
                    Side::Drop => *drop_kind,
                };
                let Some(kind) = kind else { continue };
                let (id, _) = registry.get_or_insert(
                    format!("{}:{}", kind.tag(), object.fqn),
                    &object.fqn,
                    kind,
                    Some(object.id),
                    None,
                );
                match side {
                    Side::Build => object.build = Some(id),
                    Side::Drop => object.drop = Some(id),
                }
            }
        }

        for object in &objects {
            if let (Some(build), Some(drop)) = (object.build, object.drop) {
                registry.link_mirrors(build, drop);
            }
        }

        let mut declarations = Vec::new();
        for (idx, descriptor) in descriptors.iter().enumerate() {
            let declared_by = ObjectId(idx);
            for decl in &descriptor.depends {
                if let Some(body) = resolve_declaration(decl, descriptor, &names, evaluator)? {
                    declarations.push(Declaration { declared_by, body });
                }
            }
        }

        debug!(
            nodes = registry.len(),
            declarations = declarations.len(),
            "built raw dependency graph"
        );

        Ok(Self {
            mode,
            registry,
            objects,
            declarations,
        })
    }
}

/// Node kinds `(build side, drop side)` an object contributes for `action`
/// under `mode`. `None` for kinds only the resolver may create.
#[must_use]
pub const fn node_kinds(
    action: NodeKind,
    mode: Mode,
) -> Option<(Option<NodeKind>, Option<NodeKind>)> {
    let build = mode.includes(Side::Build);
    let drop = mode.includes(Side::Drop);
    let kinds = match action {
        NodeKind::Unspecified => (
            if build { Some(NodeKind::Build) } else { None },
            if drop { Some(NodeKind::Drop) } else { None },
        ),
        NodeKind::Optional => (
            if build { Some(NodeKind::Optional) } else { None },
            if drop { Some(NodeKind::Drop) } else { None },
        ),
        NodeKind::Build => (Some(NodeKind::Build), None),
        NodeKind::Arrive => (Some(NodeKind::Arrive), None),
        NodeKind::Exists => (Some(NodeKind::Exists), None),
        NodeKind::Drop => (None, Some(NodeKind::Drop)),
        NodeKind::Depart => (None, Some(NodeKind::Depart)),
        NodeKind::DiffPrep => (None, Some(NodeKind::DiffPrep)),
        NodeKind::Rebuild => (Some(NodeKind::Rebuild), Some(NodeKind::Drop)),
        NodeKind::Diff => (Some(NodeKind::Diff), Some(NodeKind::DiffPrep)),
        NodeKind::BuildAndDrop => (Some(NodeKind::Build), Some(NodeKind::Drop)),
        NodeKind::Deactivated => (None, None),
        NodeKind::Fallback
        | NodeKind::EndFallback
        | NodeKind::SetFallback
        | NodeKind::SetEndFallback => return None,
    };
    Some(kinds)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Object lookup by full and partial name.
struct NameIndex<'a> {
    by_fqn: HashMap<&'a str, ObjectId>,
    fqns: Vec<&'a str>,
}

impl<'a> NameIndex<'a> {
    fn new(descriptors: &'a [ObjectDescriptor]) -> Result<Self, PlanError> {
        let mut by_fqn = HashMap::with_capacity(descriptors.len());
        for (idx, descriptor) in descriptors.iter().enumerate() {
            if by_fqn.insert(descriptor.fqn.as_str(), ObjectId(idx)).is_some() {
                return Err(PlanError::DuplicateObject {
                    fqn: descriptor.fqn.clone(),
                });
            }
        }
        let fqns = descriptors.iter().map(|d| d.fqn.as_str()).collect();
        Ok(Self { by_fqn, fqns })
    }

    fn resolve(&self, target: &Target, declaring: &str) -> Result<ObjectId, PlanError> {
        match target {
            Target::Full(name) => self.by_fqn.get(name.as_str()).copied().ok_or_else(|| {
                PlanError::UnresolvedReference {
                    declared_by: declaring.to_string(),
                    name: name.clone(),
                    candidates: Vec::new(),
                }
            }),
            Target::Partial(name) => self.resolve_partial(name, declaring),
        }
    }

    fn resolve_partial(&self, name: &str, declaring: &str) -> Result<ObjectId, PlanError> {
        // Promotion: replace ever-shorter qualifier tails of the declaring fqn.
        let qualifier: Vec<&str> = declaring.split('.').collect();
        for keep in (1..qualifier.len()).rev() {
            let candidate = format!("{}.{name}", qualifier[..keep].join("."));
            if let Some(&id) = self.by_fqn.get(candidate.as_str()) {
                trace!(declaring, name, resolved = %candidate, "promoted partial name");
                return Ok(id);
            }
        }

        let suffix = format!(".{name}");
        let matches: Vec<&str> = self
            .fqns
            .iter()
            .copied()
            .filter(|fqn| *fqn == name || fqn.ends_with(&suffix))
            .collect();

        match matches.as_slice() {
            [only] => Ok(self.by_fqn[only]),
            _ => Err(PlanError::UnresolvedReference {
                declared_by: declaring.to_string(),
                name: name.to_string(),
                candidates: matches.iter().map(ToString::to_string).collect(),
            }),
        }
    }
}

fn resolve_declaration(
    decl: &DependencyDecl,
    descriptor: &ObjectDescriptor,
    names: &NameIndex<'_>,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Option<DeclarationBody>, PlanError> {
    let guard_passes = |condition: Option<&String>| {
        condition.is_none_or(|predicate| {
            let passes = evaluator.evaluate(predicate, &descriptor.fqn);
            if !passes {
                trace!(object = %descriptor.fqn, predicate, "guard is false, omitting dependency");
            }
            passes
        })
    };

    match decl {
        DependencyDecl::Single(spec) => {
            if !guard_passes(spec.condition.as_ref()) {
                return Ok(None);
            }
            let dep = resolve_spec(spec, 0, descriptor, names)?;
            Ok(Some(DeclarationBody::Single(dep)))
        }
        DependencyDecl::Set(set) => {
            if !guard_passes(set.condition.as_ref()) {
                return Ok(None);
            }
            let mut members = Vec::with_capacity(set.set.len());
            for (idx, spec) in set.set.iter().enumerate() {
                if guard_passes(spec.condition.as_ref()) {
                    members.push(resolve_spec(spec, idx, descriptor, names)?);
                }
            }
            Ok(Some(DeclarationBody::Set {
                members,
                fallback: set.fallback.clone(),
            }))
        }
    }
}

fn resolve_spec(
    spec: &DependencySpec,
    declared_index: usize,
    descriptor: &ObjectDescriptor,
    names: &NameIndex<'_>,
) -> Result<ResolvedDependency, PlanError> {
    Ok(ResolvedDependency {
        target: names.resolve(&spec.target, &descriptor.fqn)?,
        direction: spec.direction,
        propagate_mirror: spec.propagate_mirror,
        priority: spec.priority,
        declared_index,
    })
}

/// Reject empty capabilities and capabilities declared with two scopes.
fn validate_fallback_policies(descriptors: &[ObjectDescriptor]) -> Result<(), PlanError> {
    let mut scopes: BTreeMap<&str, (FallbackScope, &str)> = BTreeMap::new();

    for descriptor in descriptors {
        let Some(policy) = &descriptor.fallback else {
            continue;
        };
        let capability = policy.capability.trim();
        if capability.is_empty() {
            return Err(PlanError::InvalidFallbackPolicy {
                object: descriptor.fqn.clone(),
                capability: policy.capability.clone(),
                reason: "capability name is empty".to_string(),
            });
        }
        match scopes.get(capability) {
            Some((scope, first)) if *scope != policy.scope => {
                return Err(PlanError::InvalidFallbackPolicy {
                    object: descriptor.fqn.clone(),
                    capability: capability.to_string(),
                    reason: format!(
                        "scope {:?} conflicts with scope {:?} declared by '{first}'",
                        policy.scope, scope
                    ),
                });
            }
            Some(_) => {}
            None => {
                scopes.insert(capability, (policy.scope, descriptor.fqn.as_str()));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
