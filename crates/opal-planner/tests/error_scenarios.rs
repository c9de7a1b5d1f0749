//! Error-path behavior at the public `plan()` surface: a read of a
//! declaration that never became live under both `UndefinedVariablePolicy`
//! settings, and an unknown `command`-mode target with a fuzzy suggestion.

#[path = "support/mod.rs"]
mod support;

use opal_planner::config::{Config, UndefinedVariablePolicy};
use opal_planner::decorator::StaticRegistry;
use opal_planner::error::PlanError;
use opal_planner::event::NodeKind;
use opal_planner::session::TestSession;
use support::EventBuilder;

fn plan_with(builder: EventBuilder, config: Config) -> Result<opal_planner::plan::Plan, PlanError> {
    let stream = builder.finish();
    let session = TestSession::default();
    let registry = StaticRegistry::new();
    opal_planner::plan(&stream, &session, &registry, config)
}

/// `SECRET` is declared only inside the untaken `then` branch; the top-level
/// command after the `if` still captures a reference to it at build time
/// (the name is visible lexically, the declaration just never runs live).
fn builder_with_dangling_reference() -> EventBuilder {
    let mut builder = EventBuilder::new();
    builder.var_decl_int("FLAG", 0);
    builder.if_var("FLAG", |b| {
        b.var_decl_str("SECRET", "swordfish");
    });
    builder.open(NodeKind::ShellCommand);
    builder.words("echo");
    builder.decorator_ref("var.SECRET");
    builder.close();
    builder
}

#[test]
fn undefined_variable_on_a_live_path_errors_by_default() {
    let builder = builder_with_dangling_reference();
    let err = plan_with(builder, Config::new()).unwrap_err();
    match err {
        PlanError::Resolver(opal_planner::error::ResolverError::UndefinedVariable { name, .. }) => {
            assert_eq!(name, "SECRET");
        }
        other => panic!("expected ResolverError::UndefinedVariable, got {other:?}"),
    }
}

#[test]
fn drop_step_policy_omits_the_referencing_statement_instead_of_erroring() {
    let mut builder = builder_with_dangling_reference();
    builder.shell("echo still here");
    let config = Config::new().with_undefined_variable_policy(UndefinedVariablePolicy::DropStep);
    let plan = plan_with(builder, config).unwrap();

    // The dangling `echo @var.SECRET` statement is dropped entirely; the
    // unrelated command after it still plans normally.
    assert_eq!(plan.steps.len(), 1);
    match &plan.steps[0].node {
        opal_planner::plan::ExecutionNode::Command(command) => {
            assert_eq!(command.args[0].1, "echo still here");
        }
        other => panic!("expected a command leaf, got {other:?}"),
    }
    assert!(plan.secret_uses.is_empty());
}

// Command mode's target lookup happens in the resolver, before the graph ever
// reaches the emitter (whose own `UnknownTarget` + suggestion logic only
// fires when `target` names a function missing from a graph the resolver
// already accepted -- i.e. never, through this public entry point). The
// resolver's `TargetNotFound` diagnostic carries the same "did you mean"
// suggestion for that reason.

#[test]
fn unknown_target_in_command_mode_suggests_the_closest_function_name() {
    let mut builder = EventBuilder::new();
    builder.function("deploy", |b| {
        b.shell("echo deploying");
    });
    let config = Config::new().with_target("deplyo");
    let err = plan_with(builder, config).unwrap_err();

    match err {
        PlanError::Resolver(opal_planner::error::ResolverError::TargetNotFound { target, diag }) => {
            assert_eq!(target, "deplyo");
            assert_eq!(diag.suggestion.as_deref(), Some("deploy"));
        }
        other => panic!("expected ResolverError::TargetNotFound, got {other:?}"),
    }
}

#[test]
fn unknown_target_with_no_close_match_has_no_suggestion() {
    let mut builder = EventBuilder::new();
    builder.function("deploy", |b| {
        b.shell("echo deploying");
    });
    let config = Config::new().with_target("xyzxyzxyzxyz");
    let err = plan_with(builder, config).unwrap_err();

    match err {
        PlanError::Resolver(opal_planner::error::ResolverError::TargetNotFound { diag, .. }) => {
            assert_eq!(diag.suggestion, None);
        }
        other => panic!("expected ResolverError::TargetNotFound, got {other:?}"),
    }
}

#[test]
fn command_mode_plans_only_the_named_function_body() {
    let mut builder = EventBuilder::new();
    builder.function("deploy", |b| {
        b.shell("echo deploying");
    });
    builder.function("rollback", |b| {
        b.shell("echo rolling back");
    });
    let config = Config::new().with_target("rollback");
    let plan = plan_with(builder, config).unwrap();

    assert_eq!(plan.steps.len(), 1);
    match &plan.steps[0].node {
        opal_planner::plan::ExecutionNode::Command(command) => {
            assert_eq!(command.args[0].1, "echo rolling back");
        }
        other => panic!("expected a command leaf, got {other:?}"),
    }
}
