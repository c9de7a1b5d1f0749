//! Top-level configuration for a single planning call (§10.3).

use std::sync::Arc;

use crate::resource::{LimitedTracker, ResourceTracker};
use crate::telemetry::{NoopTelemetry, Telemetry};

/// What happens when the resolver finds a touched expression whose declaration
/// never became live (an undefined-variable read reached along a live path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndefinedVariablePolicy {
    /// Raise `ResolverError::UndefinedVariable` (default; matches shell `set -u`
    /// semantics that most Opal scripts are expected to opt into).
    #[default]
    Error,
    /// Drop the referencing statement from the plan and continue, clearing the
    /// dangling touch so it is excluded from `SecretUses`.
    DropStep,
}

/// Planning configuration. Constructed with [`Config::new`] and customized via
/// the builder-style `with_*` methods, matching the teacher's `Config`/session
/// options pattern.
pub struct Config {
    /// When set, only this function is planned ("command mode", §3); otherwise
    /// the top-level statements are planned as the program.
    pub target: Option<String>,
    pub undefined_variable_policy: UndefinedVariablePolicy,
    pub telemetry: Arc<dyn Telemetry + Send + Sync>,
    pub resource_tracker: Box<dyn ResourceTracker + Send>,
    /// Explicit 32-byte plan salt. When `None`, a fresh random salt is
    /// generated for this call (non-deterministic display IDs across runs).
    pub plan_salt: Option<[u8; 32]>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self {
            target: None,
            undefined_variable_policy: UndefinedVariablePolicy::default(),
            telemetry: Arc::new(NoopTelemetry),
            resource_tracker: Box::new(LimitedTracker::new()),
            plan_salt: None,
            debug: false,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_undefined_variable_policy(mut self, policy: UndefinedVariablePolicy) -> Self {
        self.undefined_variable_policy = policy;
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry + Send + Sync>) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn with_resource_tracker(mut self, tracker: Box<dyn ResourceTracker + Send>) -> Self {
        self.resource_tracker = tracker;
        self
    }

    #[must_use]
    pub fn with_plan_salt(mut self, salt: [u8; 32]) -> Self {
        self.plan_salt = Some(salt);
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
