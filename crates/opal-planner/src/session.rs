//! The session capability the planner consumes (§6).
//!
//! A session answers two questions the builder and resolver need but cannot
//! know on their own: what transport trust level the plan is being built for
//! (local shell vs. a remote, less-trusted execution target), and what the
//! current values of ambient session state are (working directory, environment
//! snapshot) that literal decorators like `@env.HOME` read from immediately at
//! build time. Mirrors the way the teacher threads a narrow capability object
//! through its builder rather than reaching for global state.

use std::collections::HashMap;

/// The trust boundary a plan is being compiled against. Decorators may refuse
/// to resolve (`DecoratorError::TransportViolation`) outside the scopes they
/// declare support for -- e.g. a `@local.file` decorator has no meaning when
/// `target_scope` is `RemoteUntrusted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportScope {
    Local,
    RemoteTrusted,
    RemoteUntrusted,
}

/// Ambient session state the builder reads from while resolving literal
/// decorators immediately (§4.1).
pub trait Session {
    fn scope(&self) -> TransportScope;
    fn env_var(&self, name: &str) -> Option<String>;
    fn working_dir(&self) -> String;
}

/// Fixture session for tests and small embedders: a fixed scope plus an
/// in-memory environment map.
#[derive(Debug, Clone)]
pub struct TestSession {
    scope: TransportScope,
    env: HashMap<String, String>,
    cwd: String,
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new(TransportScope::Local)
    }
}

impl TestSession {
    #[must_use]
    pub fn new(scope: TransportScope) -> Self {
        Self { scope, env: HashMap::new(), cwd: "/".to_owned() }
    }

    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }
}

impl Session for TestSession {
    fn scope(&self) -> TransportScope {
        self.scope
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn working_dir(&self) -> String {
        self.cwd.clone()
    }
}
