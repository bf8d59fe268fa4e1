//! Dependency sets: "depend on at least one of these".
//!
//! A set is normalized once per side into a [`DependencySet`] whose members
//! are already filtered to those valid for that side and ordered by
//! descending priority (declaration order breaks ties). The set contributes
//! exactly one working edge at a time: the member under `cursor`.
//!
//! On the build side the edge runs `owner → member`. On the drop side it is
//! reversed, `member → owner`, because the chosen member may only be dropped
//! once the owner is gone.

use super::node::{Edge, EdgeOrigin, NodeId, ObjectId, SetId, Side};

/// One candidate of a dependency set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetMember {
    pub target: NodeId,
    pub priority: i32,
    /// Position in the original declaration, used as the tie-breaker.
    pub declared_index: usize,
}

#[derive(Debug, Clone)]
pub struct DependencySet {
    pub id: SetId,
    pub side: Side,
    /// Node of the declaring object on this side.
    pub owner: NodeId,
    pub declared_by: ObjectId,
    /// Members in preference order.
    pub members: Vec<SetMember>,
    /// Index into `members` of the current choice.
    pub cursor: usize,
    /// How many times the set has switched members.
    pub cycles: usize,
    /// Capability bracketed when every member cycles.
    pub fallback: Option<String>,
    pub fallen_back: bool,
}

impl DependencySet {
    /// Build a set from filtered members, sorting them into preference order.
    #[must_use]
    pub fn new(
        id: SetId,
        side: Side,
        owner: NodeId,
        declared_by: ObjectId,
        mut members: Vec<SetMember>,
        fallback: Option<String>,
    ) -> Self {
        // Stable on declared_index, so equal priorities keep declaration order.
        members.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.declared_index.cmp(&b.declared_index))
        });
        Self {
            id,
            side,
            owner,
            declared_by,
            members,
            cursor: 0,
            cycles: 0,
            fallback,
            fallen_back: false,
        }
    }

    /// The member currently chosen, if the set has not fallen back.
    #[must_use]
    pub fn chosen(&self) -> Option<&SetMember> {
        if self.fallen_back {
            None
        } else {
            self.members.get(self.cursor)
        }
    }

    #[must_use]
    pub fn has_untried(&self) -> bool {
        !self.fallen_back && self.cursor + 1 < self.members.len()
    }

    /// Move to the next member. Returns the new choice.
    pub fn advance(&mut self) -> Option<&SetMember> {
        if !self.has_untried() {
            return None;
        }
        self.cursor += 1;
        self.cycles += 1;
        self.members.get(self.cursor)
    }

    /// The `(from, edge)` pair that realizes `member` on this set's side.
    #[must_use]
    pub const fn edge_for(&self, member: &SetMember) -> (NodeId, Edge) {
        let origin = EdgeOrigin::Set(self.id);
        match self.side {
            Side::Build => (
                self.owner,
                Edge::new(member.target, origin, Some(self.declared_by)),
            ),
            Side::Drop => (
                member.target,
                Edge::new(self.owner, origin, Some(self.declared_by)),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{NodeKind, Registry};

    fn ids(n: usize) -> Vec<NodeId> {
        let mut registry = Registry::new();
        (0..n)
            .map(|i| {
                registry
                    .get_or_insert(format!("n{i}"), "n", NodeKind::Build, None, None)
                    .0
            })
            .collect()
    }

    fn member(target: NodeId, priority: i32, declared_index: usize) -> SetMember {
        SetMember {
            target,
            priority,
            declared_index,
        }
    }

    #[test]
    fn members_sort_by_priority_then_declaration() {
        let n = ids(4);
        let set = DependencySet::new(
            SetId(0),
            Side::Build,
            n[0],
            ObjectId(0),
            vec![member(n[1], 1, 0), member(n[2], 5, 1), member(n[3], 1, 2)],
            None,
        );
        let order: Vec<NodeId> = set.members.iter().map(|m| m.target).collect();
        assert_eq!(order, vec![n[2], n[1], n[3]]);
        assert_eq!(set.chosen().map(|m| m.target), Some(n[2]));
    }

    #[test]
    fn advance_walks_members_and_counts_cycles() {
        let n = ids(3);
        let mut set = DependencySet::new(
            SetId(0),
            Side::Build,
            n[0],
            ObjectId(0),
            vec![member(n[1], 0, 0), member(n[2], 0, 1)],
            None,
        );
        assert!(set.has_untried());
        assert_eq!(set.advance().map(|m| m.target), Some(n[2]));
        assert_eq!(set.cycles, 1);
        assert!(!set.has_untried());
        assert!(set.advance().is_none());
    }

    #[test]
    fn drop_side_edges_are_reversed() {
        let n = ids(2);
        let set = DependencySet::new(
            SetId(3),
            Side::Drop,
            n[0],
            ObjectId(0),
            vec![member(n[1], 0, 0)],
            None,
        );
        let chosen = *set.chosen().expect("member");
        let (from, edge) = set.edge_for(&chosen);
        assert_eq!(from, n[1]);
        assert_eq!(edge.target, n[0]);
        assert_eq!(edge.origin, EdgeOrigin::Set(SetId(3)));
    }
}
