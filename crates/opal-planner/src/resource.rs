//! Resource limits and cancellation for the resolver.
//!
//! Grounded in the teacher's `resource` module: a trait the hot loop calls into
//! on every unit of work, with a zero-cost `NoLimitTracker` for production use
//! where the caller trusts its input, and a `LimitedTracker` with concrete
//! ceilings for untrusted input. Unlike the teacher (which bounds VM
//! allocation/operation/time/memory), the planner only needs to bound its own
//! wave loop: wave count, statement clones produced by loop unrolling, and
//! nested-block recursion depth, each of which can be driven unboundedly large
//! by an adversarial (but well-typed) event stream.

use std::fmt;

/// Error returned when a resource limit is exceeded while planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    Waves { limit: usize, count: usize },
    LoopClones { limit: usize, count: usize },
    RecursionDepth { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waves { limit, count } => write!(f, "resolver wave limit exceeded: {count} > {limit}"),
            Self::LoopClones { limit, count } => {
                write!(f, "loop-unrolling clone limit exceeded: {count} > {limit}")
            }
            Self::RecursionDepth { limit, depth } => {
                write!(f, "nested block recursion limit exceeded: {depth} > {limit}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Checked at resolver wave boundaries and before each decorator batch, and
/// incremented as loop unrolling splices statement clones into the IR.
pub trait ResourceTracker {
    /// Called once per wave. Returns an error if the wave ceiling is exceeded.
    fn on_wave(&mut self) -> Result<(), ResourceError>;
    /// Called once per statement clone produced by `for`-loop unrolling.
    fn on_loop_clone(&mut self, clones_this_call: usize) -> Result<(), ResourceError>;
    /// Called when entering a nested block (decorator-scoped or control-flow).
    fn on_enter_block(&mut self) -> Result<(), ResourceError>;
    fn on_exit_block(&mut self);
    /// Returns whether the caller's cancellation handle has fired.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Default limits for `LimitedTracker`, chosen generously for ordinary scripts.
pub const DEFAULT_MAX_WAVES: usize = 10_000;
pub const DEFAULT_MAX_LOOP_CLONES: usize = 1_000_000;
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 256;

/// Production tracker with configurable ceilings plus a shared, externally
/// settable cancellation flag.
#[derive(Debug, Clone)]
pub struct LimitedTracker {
    max_waves: usize,
    max_loop_clones: usize,
    max_recursion_depth: usize,
    waves: usize,
    loop_clones: usize,
    depth: usize,
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Default for LimitedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LimitedTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_waves: DEFAULT_MAX_WAVES,
            max_loop_clones: DEFAULT_MAX_LOOP_CLONES,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            waves: 0,
            loop_clones: 0,
            depth: 0,
            cancelled: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn max_waves(mut self, limit: usize) -> Self {
        self.max_waves = limit;
        self
    }

    #[must_use]
    pub fn max_loop_clones(mut self, limit: usize) -> Self {
        self.max_loop_clones = limit;
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    /// Returns a cloneable cancellation handle the caller can hold onto and
    /// trigger from another thread or an outer timeout.
    #[must_use]
    pub fn cancellation_handle(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        std::sync::Arc::clone(&self.cancelled)
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_wave(&mut self) -> Result<(), ResourceError> {
        self.waves += 1;
        if self.waves > self.max_waves {
            return Err(ResourceError::Waves { limit: self.max_waves, count: self.waves });
        }
        Ok(())
    }

    fn on_loop_clone(&mut self, clones_this_call: usize) -> Result<(), ResourceError> {
        self.loop_clones += clones_this_call;
        if self.loop_clones > self.max_loop_clones {
            return Err(ResourceError::LoopClones { limit: self.max_loop_clones, count: self.loop_clones });
        }
        Ok(())
    }

    fn on_enter_block(&mut self) -> Result<(), ResourceError> {
        self.depth += 1;
        if self.depth > self.max_recursion_depth {
            return Err(ResourceError::RecursionDepth { limit: self.max_recursion_depth, depth: self.depth });
        }
        Ok(())
    }

    fn on_exit_block(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// No-op tracker for trusted input / benchmarking, mirroring the teacher's
/// `NoLimitTracker`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    fn on_wave(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn on_loop_clone(&mut self, _clones_this_call: usize) -> Result<(), ResourceError> {
        Ok(())
    }

    fn on_enter_block(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn on_exit_block(&mut self) {}
}
