use std::fmt;

use crate::graph::node::NodeKind;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    DocumentParseError,
    UnresolvedReference,
    DuplicateObject,
    InvalidAction,
    InvalidFallbackPolicy,
    CyclicDependency,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::DocumentParseError => "E1002",
            Self::UnresolvedReference => "E2001",
            Self::DuplicateObject => "E2002",
            Self::InvalidAction => "E2003",
            Self::InvalidFallbackPolicy => "E2004",
            Self::CyclicDependency => "E3001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Resolver config parse error",
            Self::DocumentParseError => "Descriptor document parse error",
            Self::UnresolvedReference => "Dependency target not found or ambiguous",
            Self::DuplicateObject => "Object declared more than once",
            Self::InvalidAction => "Object action cannot be requested",
            Self::InvalidFallbackPolicy => "Fallback policy cannot be synthesized",
            Self::CyclicDependency => "Unbreakable dependency cycle",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .schemaplan/config.toml and retry."),
            Self::DocumentParseError => {
                Some("Check the descriptor document against the [[object]] layout.")
            }
            Self::UnresolvedReference => {
                Some("Use a fully-qualified name (fqn) or a longer partial name (pqn).")
            }
            Self::DuplicateObject => Some("Give every object a unique fully-qualified name."),
            Self::InvalidAction => {
                Some("Fallback kinds are synthesized by the resolver; pick a build or drop action.")
            }
            Self::InvalidFallbackPolicy => {
                Some("Declare each capability with a non-empty name and a single scope.")
            }
            Self::CyclicDependency => Some(
                "Add a dependency-set alternative, a split policy, or a fallback policy to one of the objects on the cycle.",
            ),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors that abort a resolution pass.
///
/// Every variant is fatal: the caller gets either a complete plan or one of
/// these. Set retries and placeholder synthesis never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// A dependency target matched zero or several objects.
    #[error(
        "{}: '{declared_by}' depends on '{name}', which {}",
        ErrorCode::UnresolvedReference.code(),
        describe_candidates(.candidates)
    )]
    UnresolvedReference {
        declared_by: String,
        name: String,
        candidates: Vec<String>,
    },

    /// Two descriptors share one fully-qualified name.
    #[error("{}: object '{fqn}' is declared more than once", ErrorCode::DuplicateObject.code())]
    DuplicateObject { fqn: String },

    /// A descriptor requested a kind that only the resolver may create.
    #[error(
        "{}: object '{object}' requests action '{kind}', which is reserved for synthesized nodes",
        ErrorCode::InvalidAction.code()
    )]
    InvalidAction { object: String, kind: NodeKind },

    /// A fallback policy cannot be turned into a Fallback/EndFallback pair.
    #[error(
        "{}: fallback '{capability}' on '{object}' is invalid: {reason}",
        ErrorCode::InvalidFallbackPolicy.code()
    )]
    InvalidFallbackPolicy {
        object: String,
        capability: String,
        reason: String,
    },

    /// No strategy could break the cycle.
    #[error(
        "{}: cyclic dependency between {}",
        ErrorCode::CyclicDependency.code(),
        .cycle.join(" -> ")
    )]
    CyclicDependency { cycle: Vec<String> },
}

impl PlanError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnresolvedReference { .. } => ErrorCode::UnresolvedReference,
            Self::DuplicateObject { .. } => ErrorCode::DuplicateObject,
            Self::InvalidAction { .. } => ErrorCode::InvalidAction,
            Self::InvalidFallbackPolicy { .. } => ErrorCode::InvalidFallbackPolicy,
            Self::CyclicDependency { .. } => ErrorCode::CyclicDependency,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

fn describe_candidates(candidates: &[String]) -> String {
    match candidates {
        [] => "matches no object".to_string(),
        [only] => format!("matches only '{only}'"),
        many => format!("is ambiguous between {}", many.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::DocumentParseError,
            ErrorCode::UnresolvedReference,
            ErrorCode::DuplicateObject,
            ErrorCode::InvalidAction,
            ErrorCode::InvalidFallbackPolicy,
            ErrorCode::CyclicDependency,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::CyclicDependency.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn cycle_message_lists_path_in_order() {
        let err = PlanError::CyclicDependency {
            cycle: vec!["view.v1".into(), "view.v2".into(), "view.v3".into()],
        };
        assert_eq!(
            err.to_string(),
            "E3001: cyclic dependency between view.v1 -> view.v2 -> view.v3"
        );
        assert_eq!(err.code(), ErrorCode::CyclicDependency);
    }

    #[test]
    fn unresolved_reference_distinguishes_missing_and_ambiguous() {
        let missing = PlanError::UnresolvedReference {
            declared_by: "grant.g1".into(),
            name: "t9".into(),
            candidates: Vec::new(),
        };
        assert!(missing.to_string().contains("matches no object"));

        let ambiguous = PlanError::UnresolvedReference {
            declared_by: "grant.g1".into(),
            name: "t1".into(),
            candidates: vec!["table.a.t1".into(), "table.b.t1".into()],
        };
        let msg = ambiguous.to_string();
        assert!(msg.contains("ambiguous"), "{msg}");
        assert!(msg.contains("table.a.t1, table.b.t1"), "{msg}");
    }
}
