//! Deterministic planner for the Opal shell-scripting language.
//!
//! Consumes a pre-parsed [`event::EventStream`] and turns it into an ordered,
//! fully-resolved [`plan::Plan`]: the IR [`builder`] lowers the event stream
//! into a typed [`ir::ExecutionGraph`], the [`resolver`] drives every touched
//! expression from declared to resolved (deciding `if`/`for`/`when` blockers
//! and unrolling loops along the way), and the [`emitter`] walks the result
//! into a flat plan plus its authorization list.
//!
//! ```no_run
//! use opal_planner::{config::Config, event::EventStream, session::TestSession};
//!
//! # fn example(stream: EventStream) -> Result<(), opal_planner::error::PlanError> {
//! let session = TestSession::default();
//! let registry = opal_planner::decorator::StaticRegistry::new();
//! let plan = opal_planner::plan(&stream, &session, &registry, Config::new())?;
//! println!("{} steps", plan.steps.len());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod decorator;
pub mod emitter;
pub mod error;
pub mod event;
pub mod ir;
pub mod plan;
pub mod resolver;
pub mod resource;
pub mod session;
pub mod telemetry;
pub mod value;
pub mod vault;

use config::Config;
use decorator::DecoratorRegistry;
use error::PlanError;
use event::EventStream;
use session::Session;
use telemetry::DebugEvent;

/// Builds, resolves, and emits a plan from `stream` in one call, using the
/// default observability posture (no debug trace). See [`plan_with_trace`] to
/// additionally capture every intermediate [`telemetry::DebugEvent`].
pub fn plan(
    stream: &EventStream,
    session: &dyn Session,
    registry: &dyn DecoratorRegistry,
    config: Config,
) -> Result<plan::Plan, PlanError> {
    plan_with_trace(stream, session, registry, config).map(|result| result.plan)
}

/// The full output of a planning call when the caller wants the debug trace
/// alongside the plan, mirroring the teacher's pattern of a richer "verbose"
/// return type layered over the plain one.
pub struct PlanResult {
    pub plan: plan::Plan,
    pub waves: usize,
    pub debug_events: Vec<DebugEvent>,
}

/// Like [`plan`], but always captures every [`telemetry::DebugEvent`] emitted
/// during the call (in addition to whatever `config.telemetry` does with
/// them) and returns it alongside the plan.
pub fn plan_with_trace(
    stream: &EventStream,
    session: &dyn Session,
    registry: &dyn DecoratorRegistry,
    config: Config,
) -> Result<PlanResult, PlanError> {
    let recorder = telemetry::RecordingTelemetry::new();
    let target = config.target.clone();
    let policy = config.undefined_variable_policy;
    let outer_telemetry = config.telemetry;
    let mut tracker = config.resource_tracker;

    let forward = ForwardingTelemetry { outer: &*outer_telemetry, recorder: &recorder };

    let mut output = builder::build(stream, session, registry, &forward, config.plan_salt)?;
    builder::synthesize_call_traces(&mut output.graph);

    let resolve_output = resolver::resolve(
        &mut output.graph,
        &mut output.vault,
        registry,
        tracker.as_mut(),
        &forward,
        policy,
        target.as_deref(),
    )?;

    let plan = emitter::emit(&output.graph, &output.vault, target.as_deref(), &forward)?;

    Ok(PlanResult { plan, waves: resolve_output.waves, debug_events: recorder.events() })
}

/// Fans a single `emit` call out to both the caller's configured telemetry
/// sink and an internal recorder, so `plan_with_trace` can return a trace
/// without forcing every caller of `plan` to pay for one.
struct ForwardingTelemetry<'a> {
    outer: &'a dyn telemetry::Telemetry,
    recorder: &'a telemetry::RecordingTelemetry,
}

impl telemetry::Telemetry for ForwardingTelemetry<'_> {
    fn emit(&self, event: DebugEvent) {
        self.outer.emit(event.clone());
        self.recorder.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, NodeKind, Token, TokenType};
    use crate::session::TestSession;

    fn wrap_source(events: Vec<Event>) -> Vec<Event> {
        let mut all = vec![Event::Open(NodeKind::Source)];
        all.extend(events);
        all.push(Event::Close);
        all
    }

    #[test]
    fn plans_a_single_shell_command() {
        let tokens = vec![Token::new(TokenType::Other, "echo hi", false)];
        let events = wrap_source(vec![
            Event::StepEnter,
            Event::Open(NodeKind::ShellCommand),
            Event::Token(0),
            Event::Close,
            Event::StepExit,
        ]);
        let stream = EventStream::new(tokens, events);
        let session = TestSession::default();
        let registry = decorator::StaticRegistry::new();
        let result = plan(&stream, &session, &registry, Config::new()).unwrap();
        assert_eq!(result.steps.len(), 1);
    }

    #[test]
    fn plan_with_trace_captures_builder_started() {
        let tokens = vec![Token::new(TokenType::Other, "echo hi", false)];
        let events = wrap_source(vec![Event::Open(NodeKind::ShellCommand), Event::Token(0), Event::Close]);
        let stream = EventStream::new(tokens, events);
        let session = TestSession::default();
        let registry = decorator::StaticRegistry::new();
        let result = plan_with_trace(&stream, &session, &registry, Config::new()).unwrap();
        assert!(result.debug_events.contains(&DebugEvent::BuilderStarted));
    }
}
