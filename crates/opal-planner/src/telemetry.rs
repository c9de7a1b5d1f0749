//! Observability hook consumed by the builder, resolver, and emitter.
//!
//! Mirrors the teacher's tracer family (`VmTracer` and friends): a trait with
//! a default no-op implementation, a stderr logger for interactive use, and a
//! recording implementation for tests that need to assert on emitted events
//! without capturing stderr.

use std::fmt;

/// A single observable moment in the planning pipeline, emitted for
/// diagnostics and for the `PlanResult::debug_events` trace (§10.2).
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    BuilderStarted,
    StatementBuilt { kind: &'static str },
    WaveStarted { wave: usize },
    WaveResolved { wave: usize, resolved_count: usize },
    BranchPruned { reason: &'static str },
    LoopUnrolled { iterations: usize },
    EmitterStarted,
    PlanEmitted { step_count: usize },
}

impl fmt::Display for DebugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuilderStarted => write!(f, "builder: started"),
            Self::StatementBuilt { kind } => write!(f, "builder: built {kind}"),
            Self::WaveStarted { wave } => write!(f, "resolver: wave {wave} started"),
            Self::WaveResolved { wave, resolved_count } => {
                write!(f, "resolver: wave {wave} resolved {resolved_count} expressions")
            }
            Self::BranchPruned { reason } => write!(f, "resolver: branch pruned ({reason})"),
            Self::LoopUnrolled { iterations } => write!(f, "resolver: loop unrolled into {iterations} iterations"),
            Self::EmitterStarted => write!(f, "emitter: started"),
            Self::PlanEmitted { step_count } => write!(f, "emitter: emitted {step_count} steps"),
        }
    }
}

/// Observability sink. Every stage calls `emit` at its natural checkpoints;
/// implementations decide whether that's a no-op, a log line, or a capture.
pub trait Telemetry {
    fn emit(&self, event: DebugEvent);
}

/// Default for production use: discards every event at zero cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn emit(&self, _event: DebugEvent) {}
}

/// Writes each event to stderr as it happens, for interactive/CLI use.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTelemetry;

impl Telemetry for StderrTelemetry {
    fn emit(&self, event: DebugEvent) {
        eprintln!("[opal-planner] {event}");
    }
}

/// Captures every event in order, for test assertions.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: std::sync::Mutex<Vec<DebugEvent>>,
}

impl RecordingTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every event recorded so far, in emission order.
    ///
    /// # Panics
    /// Panics if the internal mutex was poisoned by a prior panic while holding
    /// the lock.
    #[must_use]
    pub fn events(&self) -> Vec<DebugEvent> {
        self.events.lock().expect("telemetry mutex poisoned").clone()
    }
}

impl Telemetry for RecordingTelemetry {
    fn emit(&self, event: DebugEvent) {
        self.events.lock().expect("telemetry mutex poisoned").push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_telemetry_preserves_order() {
        let telemetry = RecordingTelemetry::new();
        telemetry.emit(DebugEvent::BuilderStarted);
        telemetry.emit(DebugEvent::WaveStarted { wave: 1 });
        assert_eq!(telemetry.events(), vec![DebugEvent::BuilderStarted, DebugEvent::WaveStarted { wave: 1 }]);
    }
}
