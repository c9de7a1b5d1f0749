//! Error taxonomy (§7 of the specification).
//!
//! Follows the teacher workspace's error-handling texture: hand-rolled enums
//! with an explicit `Display` impl and `std::error::Error`, no `thiserror`/
//! `anyhow`. Internal stage-specific errors (`BuilderError`, `ResolverError`,
//! `DecoratorError`) convert into the single top-level `PlanError` via `From`,
//! the same pattern as the teacher's `ReplError` wrapping `ParseError`/
//! `CompileError`/`Exception`/`ResourceError`.

use std::fmt;

use crate::resource::ResourceError;

/// Structured diagnostic metadata shared by every recoverable error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostic {
    pub context: String,
    pub suggestion: Option<String>,
    pub example: Option<String>,
    pub event_pos: usize,
    pub total_events: usize,
}

impl Diagnostic {
    #[must_use]
    pub fn new(context: impl Into<String>) -> Self {
        Self { context: context.into(), suggestion: None, example: None, event_pos: 0, total_events: 0 }
    }

    #[must_use]
    pub fn at(mut self, event_pos: usize, total_events: usize) -> Self {
        self.event_pos = event_pos;
        self.total_events = total_events;
        self
    }

    #[must_use]
    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    #[must_use]
    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }
}

/// Errors raised while turning the event stream into an `ExecutionGraph`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    EmptyFunction { name: String, diag: Diagnostic },
    MalformedDeclaration { diag: Diagnostic },
    UnsupportedExpression { diag: Diagnostic },
    UndefinedVariable { name: String, diag: Diagnostic },
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFunction { name, .. } => write!(f, "no commands found in function body: {name}"),
            Self::MalformedDeclaration { diag } => write!(f, "malformed declaration: {}", diag.context),
            Self::UnsupportedExpression { diag } => write!(f, "unsupported expression: {}", diag.context),
            Self::UndefinedVariable { name, .. } => write!(f, "undefined variable: {name}"),
        }
    }
}

impl std::error::Error for BuilderError {}

/// Errors raised while driving the vault from declared to resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    UndefinedVariable { name: String, diag: Diagnostic },
    ConditionTypeError { diag: Diagnostic },
    UnresolvedCycle { diag: Diagnostic },
    TargetNotFound { target: String, diag: Diagnostic },
    Cancelled,
    Resource(ResourceError),
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedVariable { name, .. } => write!(f, "undefined variable: {name}"),
            Self::ConditionTypeError { diag } => write!(f, "condition type error: {}", diag.context),
            Self::UnresolvedCycle { diag } => write!(f, "unresolved dependency cycle: {}", diag.context),
            Self::TargetNotFound { target, .. } => write!(f, "command not found: {target}"),
            Self::Cancelled => write!(f, "plan cancelled"),
            Self::Resource(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ResolverError {}

impl From<ResourceError> for ResolverError {
    fn from(error: ResourceError) -> Self {
        Self::Resource(error)
    }
}

/// Errors raised while resolving a `@path` reference against the decorator
/// registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoratorError {
    NotFound { path: String, diag: Diagnostic },
    ArityError { path: String, diag: Diagnostic },
    TransportViolation { path: String, diag: Diagnostic },
}

impl fmt::Display for DecoratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path, .. } => write!(f, "unknown decorator: @{path}"),
            Self::ArityError { path, .. } => write!(f, "decorator arity error: @{path}"),
            Self::TransportViolation { path, .. } => write!(f, "decorator forbidden in this session: @{path}"),
        }
    }
}

impl std::error::Error for DecoratorError {}

/// Top-level error returned by every public planning entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    UnknownTarget { target: String, diag: Diagnostic },
    Builder(BuilderError),
    Resolver(ResolverError),
    Decorator(DecoratorError),
    /// Post-construction validation failed. This should never happen on
    /// well-formed input and indicates a planner bug, not a user error -- kept
    /// here rather than as a bare `assert!` only so the top-level API never
    /// panics across an FFI-ish boundary; callers should treat it as fatal.
    InvalidPlan { reason: String },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTarget { target, diag } => {
                write!(f, "command not found: {target}")?;
                if let Some(suggestion) = &diag.suggestion {
                    write!(f, " (did you mean `{suggestion}`?)")?;
                }
                Ok(())
            }
            Self::Builder(e) => write!(f, "{e}"),
            Self::Resolver(e) => write!(f, "{e}"),
            Self::Decorator(e) => write!(f, "{e}"),
            Self::InvalidPlan { reason } => write!(f, "internal error: invalid plan: {reason}"),
        }
    }
}

impl std::error::Error for PlanError {}

impl From<BuilderError> for PlanError {
    fn from(error: BuilderError) -> Self {
        Self::Builder(error)
    }
}

impl From<ResolverError> for PlanError {
    fn from(error: ResolverError) -> Self {
        Self::Resolver(error)
    }
}

impl From<DecoratorError> for PlanError {
    fn from(error: DecoratorError) -> Self {
        Self::Decorator(error)
    }
}

/// Ranks `candidates` by Damerau-Levenshtein-like edit distance to `target` and
/// returns the closest one, for "did you mean" suggestions on unknown targets.
#[must_use]
pub fn suggest_closest<'a>(target: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .into_iter()
        .map(|candidate| (candidate, edit_distance(target, candidate)))
        .min_by_key(|(_, dist)| *dist)
        .filter(|(_, dist)| *dist <= target.len().max(3))
        .map(|(candidate, _)| candidate)
}

/// Damerau-Levenshtein edit distance (insertions, deletions, substitutions,
/// and adjacent transpositions all cost 1).
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (la, lb) = (a.len(), b.len());
    let mut d = vec![vec![0usize; lb + 1]; la + 1];
    for (i, row) in d.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=lb {
        d[0][j] = j;
    }
    for i in 1..=la {
        for j in 1..=lb {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            d[i][j] = (d[i - 1][j] + 1).min(d[i][j - 1] + 1).min(d[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                d[i][j] = d[i][j].min(d[i - 2][j - 2] + 1);
            }
        }
    }
    d[la][lb]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_identical_is_zero() {
        assert_eq!(edit_distance("deploy", "deploy"), 0);
    }

    #[test]
    fn edit_distance_transposition_costs_one() {
        assert_eq!(edit_distance("deploy", "depoly"), 1);
    }

    #[test]
    fn suggest_closest_finds_near_miss() {
        let candidates = ["deploy", "build", "test"];
        assert_eq!(suggest_closest("deplyo", candidates), Some("deploy"));
    }

    #[test]
    fn suggest_closest_none_when_nothing_close() {
        let candidates = ["deploy", "build", "test"];
        assert_eq!(suggest_closest("xyzxyzxyzxyz", candidates), None);
    }
}
