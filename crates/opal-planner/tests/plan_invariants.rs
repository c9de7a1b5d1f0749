//! End-to-end checks of the plan invariants from the data model: step ids are
//! strictly positive and increasing, `CommandNode` args come back sorted, the
//! plan salt round-trips, and every authorized value lands in `secret_uses`
//! with no raw secret text anywhere in the emitted command strings.

#[path = "support/mod.rs"]
mod support;

use opal_planner::config::Config;
use opal_planner::decorator::{Decorator, DecoratorKind, StaticRegistry};
use opal_planner::error::DecoratorError;
use opal_planner::event::TokenType;
use opal_planner::plan::ExecutionNode;
use opal_planner::session::TestSession;
use opal_planner::value::Value;
use support::EventBuilder;

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
fn step_ids_are_positive_and_increasing() {
    let mut builder = EventBuilder::new();
    builder.shell("echo one");
    builder.shell("echo two");
    builder.shell("echo three");
    let stream = builder.finish();

    let session = TestSession::default();
    let registry = StaticRegistry::new();
    let plan = opal_planner::plan(&stream, &session, &registry, Config::new()).unwrap();

    assert_eq!(plan.steps.len(), 3);
    let mut previous = 0;
    for step in &plan.steps {
        assert!(step.id > previous);
        previous = step.id;
    }
}

#[test]
fn command_args_come_back_sorted() {
    let mut builder = EventBuilder::new();
    builder.open(opal_planner::event::NodeKind::ShellCommand);
    builder.decorator_ref("secrets.fetch");
    builder.open(opal_planner::event::NodeKind::ObjectLiteral);
    builder.open(opal_planner::event::NodeKind::ObjectField);
    builder.tok(TokenType::Identifier, "zeta", false);
    builder.tok(TokenType::StringLiteral, "1", true);
    builder.close();
    builder.open(opal_planner::event::NodeKind::ObjectField);
    builder.tok(TokenType::Identifier, "alpha", false);
    builder.tok(TokenType::StringLiteral, "2", true);
    builder.close();
    builder.close();
    builder.close();
    let stream = builder.finish();

    let mut registry = StaticRegistry::new();
    registry.register("secrets.fetch", ConstDecorator(Value::Str("x".into())));
    let session = TestSession::default();
    let plan = opal_planner::plan(&stream, &session, &registry, Config::new()).unwrap();

    let ExecutionNode::Command(command) = &plan.steps[0].node else { panic!("expected a command node") };
    let keys: Vec<&str> = command.args.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["alpha", "zeta"]);
}

#[test]
fn plan_salt_round_trips_through_json() {
    let mut builder = EventBuilder::new();
    builder.shell("echo hi");
    let stream = builder.finish();
    let session = TestSession::default();
    let registry = StaticRegistry::new();
    let plan = opal_planner::plan(&stream, &session, &registry, Config::new().with_plan_salt([9u8; 32])).unwrap();

    assert_eq!(plan.plan_salt, [9u8; 32]);
    let json = serde_json::to_string(&plan).unwrap();
    let round_tripped: opal_planner::plan::Plan = serde_json::from_str(&json).unwrap();
    assert_eq!(round_tripped.plan_salt, [9u8; 32]);
}

#[test]
fn resolved_decorator_value_is_authorized_and_never_appears_in_plain_text() {
    let mut builder = EventBuilder::new();
    builder.open(opal_planner::event::NodeKind::ShellCommand);
    builder.words("curl -H Authorization:");
    builder.decorator_ref("secrets.token");
    builder.close();
    let stream = builder.finish();

    let mut registry = StaticRegistry::new();
    registry.register("secrets.token", ConstDecorator(Value::Str("hunter2".into())));
    let session = TestSession::default();
    let plan = opal_planner::plan(&stream, &session, &registry, Config::new()).unwrap();

    assert_eq!(plan.secret_uses.len(), 1);
    let json = serde_json::to_string(&plan).unwrap();
    assert!(!json.contains("hunter2"), "raw secret text leaked into the plan: {json}");
    assert!(json.contains(plan.secret_uses[0].display_id.as_str()));
}

#[test]
fn unreferenced_var_decl_produces_no_authorization() {
    let mut builder = EventBuilder::new();
    builder.var_decl_str("UNUSED", "never read");
    builder.shell("echo hi");
    let stream = builder.finish();

    let session = TestSession::default();
    let registry = StaticRegistry::new();
    let plan = opal_planner::plan(&stream, &session, &registry, Config::new()).unwrap();

    assert!(plan.secret_uses.is_empty());
}
