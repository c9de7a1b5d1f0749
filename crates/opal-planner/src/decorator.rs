//! The decorator registry capability the planner consumes (§6).
//!
//! The registry itself is a global, process-wide capability owned by the host
//! application; the planner only needs trait objects it can call through, plus
//! a longest-registered-prefix lookup as described in §9 ("Decorator dispatch").
//! A minimal in-memory implementation (`StaticRegistry`, a segment trie) is
//! provided for tests and for small embedders that don't need a real registry.

use std::collections::HashMap;

use crate::error::DecoratorError;
use crate::value::Value;

/// Whether a decorator produces a value (usable in interpolation/conditions) or
/// wraps a block of statements (execution-scoping, like `@retry { ... }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorKind {
    Value,
    Execution,
}

/// A single registered decorator.
pub trait Decorator: Send + Sync {
    fn kind(&self) -> DecoratorKind;
    /// Whether a block following this decorator gets an isolated vault scope
    /// (see §4.1, "decorator-scoped blocks").
    fn isolates_scope(&self) -> bool {
        false
    }
    /// Resolves a batch of raw argument values at once, enabling bulk fetches
    /// (e.g. one Secrets Manager call for many touched expressions). Order of
    /// `results` must match `args`.
    fn resolve(&self, args: &[Value]) -> Result<Vec<Value>, DecoratorError>;
}

/// Longest-registered-prefix lookup over dotted decorator paths.
///
/// `@aws.s3.bucket` resolves to the longest registered prefix among
/// `aws`, `aws.s3`, `aws.s3.bucket`; at most one residual path segment is
/// permitted beyond the matched prefix, and it becomes the decorator's
/// "primary selector" (exposed to callers via `ResolvedDecoratorRef::selector`).
pub trait DecoratorRegistry {
    fn lookup(&self, path: &str) -> Result<ResolvedDecoratorRef<'_>, DecoratorError>;
}

pub struct ResolvedDecoratorRef<'a> {
    pub matched_path: String,
    pub selector: Option<String>,
    pub decorator: &'a dyn Decorator,
}

impl std::fmt::Debug for ResolvedDecoratorRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedDecoratorRef")
            .field("matched_path", &self.matched_path)
            .field("selector", &self.selector)
            .field("decorator_kind", &self.decorator.kind())
            .finish()
    }
}

/// Trie-backed in-memory registry, keyed on dot-separated path segments.
#[derive(Default)]
pub struct StaticRegistry {
    root: TrieNode,
}

#[derive(Default)]
struct TrieNode {
    decorator: Option<Box<dyn Decorator>>,
    children: HashMap<String, TrieNode>,
}

impl StaticRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `decorator` under `path` (dot-separated, e.g. `"aws.s3.bucket"`).
    pub fn register(&mut self, path: &str, decorator: impl Decorator + 'static) {
        let mut node = &mut self.root;
        for segment in path.split('.') {
            node = node.children.entry(segment.to_owned()).or_default();
        }
        node.decorator = Some(Box::new(decorator));
    }
}

impl DecoratorRegistry for StaticRegistry {
    fn lookup(&self, path: &str) -> Result<ResolvedDecoratorRef<'_>, DecoratorError> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut node = &self.root;
        let mut matched_segments = 0usize;
        let mut best: Option<(usize, &TrieNode)> = None;

        for segment in &segments {
            let Some(next) = node.children.get(*segment) else { break };
            node = next;
            matched_segments += 1;
            if node.decorator.is_some() {
                best = Some((matched_segments, node));
            }
        }

        let Some((matched_len, node)) = best else {
            return Err(DecoratorError::NotFound {
                path: path.to_owned(),
                diag: crate::error::Diagnostic::new(format!("no decorator registered for @{path}")),
            });
        };

        let residual = &segments[matched_len..];
        if residual.len() > 1 {
            return Err(DecoratorError::ArityError {
                path: path.to_owned(),
                diag: crate::error::Diagnostic::new(format!(
                    "@{} accepts at most one residual path segment, found {}",
                    segments[..matched_len].join("."),
                    residual.len()
                )),
            });
        }

        Ok(ResolvedDecoratorRef {
            matched_path: segments[..matched_len].join("."),
            selector: residual.first().map(|s| (*s).to_owned()),
            decorator: node.decorator.as_deref().expect("best always has a decorator"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstDecorator(Value);

    impl Decorator for ConstDecorator {
        fn kind(&self) -> DecoratorKind {
            DecoratorKind::Value
        }

        fn resolve(&self, args: &[Value]) -> Result<Vec<Value>, DecoratorError> {
            Ok(args.iter().map(|_| self.0.clone()).collect())
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let mut registry = StaticRegistry::new();
        registry.register("aws", ConstDecorator(Value::Str("generic".into())));
        registry.register("aws.s3", ConstDecorator(Value::Str("s3".into())));

        let resolved = registry.lookup("aws.s3.bucket").unwrap();
        assert_eq!(resolved.matched_path, "aws.s3");
        assert_eq!(resolved.selector.as_deref(), Some("bucket"));
    }

    #[test]
    fn excess_residual_segments_error() {
        let mut registry = StaticRegistry::new();
        registry.register("aws", ConstDecorator(Value::Str("generic".into())));

        let err = registry.lookup("aws.s3.bucket.extra").unwrap_err();
        assert!(matches!(err, DecoratorError::ArityError { .. }));
    }

    #[test]
    fn unknown_path_not_found() {
        let registry = StaticRegistry::new();
        let err = registry.lookup("nope").unwrap_err();
        assert!(matches!(err, DecoratorError::NotFound { .. }));
    }

    #[test]
    fn exact_match_no_selector() {
        let mut registry = StaticRegistry::new();
        registry.register("env.HOME", ConstDecorator(Value::Str("/home/opal".into())));
        let resolved = registry.lookup("env.HOME").unwrap();
        assert_eq!(resolved.selector, None);
    }
}
