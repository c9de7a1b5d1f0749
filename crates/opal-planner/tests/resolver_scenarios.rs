//! Resolver-level behavior: branch pruning falls out of never walking an
//! untaken branch, loop unrolling produces one fresh binding per element, and
//! shadowing a variable never retargets an earlier, already-captured
//! reference (temporal binding).

#[path = "support/mod.rs"]
mod support;

use opal_planner::config::Config;
use opal_planner::decorator::{Decorator, DecoratorKind, StaticRegistry};
use opal_planner::error::{BuilderError, DecoratorError, PlanError};
use opal_planner::event::NodeKind;
use opal_planner::plan::ExecutionNode;
use opal_planner::session::TestSession;
use opal_planner::value::Value;
use support::EventBuilder;

/// An execution-scoping decorator (e.g. `@retry`/`@timeout`), standing in for
/// whichever ones a real registry provides.
struct ScopedBlock;

impl Decorator for ScopedBlock {
    fn kind(&self) -> DecoratorKind {
        DecoratorKind::Execution
    }

    fn isolates_scope(&self) -> bool {
        true
    }

    fn resolve(&self, _args: &[Value]) -> Result<Vec<Value>, DecoratorError> {
        Ok(Vec::new())
    }
}

fn plan_of(builder: EventBuilder) -> opal_planner::plan::Plan {
    let stream = builder.finish();
    let session = TestSession::default();
    let registry = StaticRegistry::new();
    opal_planner::plan(&stream, &session, &registry, Config::new()).unwrap()
}

fn command_text(node: &ExecutionNode) -> &str {
    match node {
        ExecutionNode::Command(command) => &command.args[0].1,
        other => panic!("expected a command leaf, got {other:?}"),
    }
}

#[test]
fn untaken_if_branch_contributes_nothing_to_the_plan() {
    let mut builder = EventBuilder::new();
    builder.var_decl_int("FLAG", 0);
    builder.if_var_else(
        "FLAG",
        |b| {
            b.shell("echo taken");
        },
        |b| {
            b.shell("echo not-taken");
        },
    );
    let plan = plan_of(builder);

    assert_eq!(plan.steps.len(), 1);
    match &plan.steps[0].node {
        ExecutionNode::Logic { label, steps } => {
            assert_eq!(label, "if:else");
            assert_eq!(command_text(&steps[0].node), "echo not-taken");
        }
        other => panic!("expected a Logic node for the else branch, got {other:?}"),
    }
}

#[test]
fn untouched_branch_declarations_never_get_display_ids() {
    // A variable only referenced from inside the pruned `then` branch must not
    // show up in the authorization list: its declaration is never walked live.
    let mut builder = EventBuilder::new();
    builder.var_decl_int("FLAG", 0);
    builder.var_decl_str("SECRET", "swordfish");
    builder.if_var("FLAG", |b| {
        b.open(NodeKind::ShellCommand);
        b.words("echo");
        b.decorator_ref("var.SECRET");
        b.close();
    });
    let plan = plan_of(builder);

    assert!(plan.secret_uses.is_empty());
}

#[test]
fn for_loop_unrolls_one_step_per_element() {
    let mut builder = EventBuilder::new();
    builder.var_decl_array("ITEMS", &["a", "b", "c"]);
    builder.for_var("item", "ITEMS", |b| {
        b.open(NodeKind::ShellCommand);
        b.words("echo");
        b.decorator_ref("var.item");
        b.close();
    });
    let plan = plan_of(builder);

    assert_eq!(plan.steps.len(), 1);
    match &plan.steps[0].node {
        ExecutionNode::Logic { label, steps } => {
            assert_eq!(label, "for:item");
            assert_eq!(steps.len(), 3);
            let rendered: Vec<&str> = steps.iter().map(|s| command_text(&s.node)).collect();
            // Each iteration's command embeds a distinct display id -- never the
            // raw element text, and never the same placeholder twice.
            assert_ne!(rendered[0], rendered[1]);
            assert_ne!(rendered[1], rendered[2]);
            for text in &rendered {
                assert!(text.starts_with("echo opal:"));
            }
        }
        other => panic!("expected a Logic node for the loop, got {other:?}"),
    }
}

#[test]
fn shadowing_never_retargets_an_earlier_capture() {
    // `var NAME` is declared twice; a command built between the two
    // declarations must keep referring to the first one even after the name
    // is rebound.
    let mut builder = EventBuilder::new();
    builder.var_decl_str("NAME", "first");
    builder.open(NodeKind::ShellCommand);
    builder.words("echo");
    builder.decorator_ref("var.NAME");
    builder.close();
    builder.var_decl_str("NAME", "second");
    builder.open(NodeKind::ShellCommand);
    builder.words("echo");
    builder.decorator_ref("var.NAME");
    builder.close();
    let plan = plan_of(builder);

    assert_eq!(plan.steps.len(), 2);
    let first = command_text(&plan.steps[0].node);
    let second = command_text(&plan.steps[1].node);
    assert_ne!(first, second, "shadowed reference must resolve to a distinct display id");
}

#[test]
fn decorator_scoped_block_variables_do_not_leak_to_the_enclosing_scope() {
    // `TEMP` is declared only inside the `@retry`-scoped block; a reference to
    // it right after the block must fail to resolve, not silently see the
    // inner declaration the way an ordinary `if`/`for` block would.
    let mut builder = EventBuilder::new();
    builder.decorator_block("retry", |b| {
        b.var_decl_str("TEMP", "inner");
        b.shell("echo in block");
    });
    builder.open(NodeKind::ShellCommand);
    builder.words("echo");
    builder.decorator_ref("var.TEMP");
    builder.close();

    let stream = builder.finish();
    let session = TestSession::default();
    let mut registry = StaticRegistry::new();
    registry.register("retry", ScopedBlock);
    let err = opal_planner::plan(&stream, &session, &registry, Config::new()).unwrap_err();

    match err {
        PlanError::Builder(BuilderError::UndefinedVariable { name, .. }) => assert_eq!(name, "TEMP"),
        other => panic!("expected BuilderError::UndefinedVariable, got {other:?}"),
    }
}

#[test]
fn when_blocker_plans_only_the_matched_arm() {
    let mut builder = EventBuilder::new();
    builder.var_decl_int("A", 0);
    builder.var_decl_int("B", 1);
    builder.open(NodeKind::When);
    builder.open(NodeKind::WhenArm);
    builder.tok(opal_planner::event::TokenType::Identifier, "first", false);
    builder.decorator_ref("var.A");
    builder.open(NodeKind::Block);
    builder.shell("echo first");
    builder.close();
    builder.close();
    builder.open(NodeKind::WhenArm);
    builder.tok(opal_planner::event::TokenType::Identifier, "second", false);
    builder.decorator_ref("var.B");
    builder.open(NodeKind::Block);
    builder.shell("echo second");
    builder.close();
    builder.close();
    builder.close();
    let plan = plan_of(builder);

    match &plan.steps[0].node {
        ExecutionNode::Logic { label, steps } => {
            assert_eq!(label, "when:second");
            assert_eq!(command_text(&steps[0].node), "echo second");
        }
        other => panic!("expected a Logic node for the matched arm, got {other:?}"),
    }
}
