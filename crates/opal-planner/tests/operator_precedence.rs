//! Chain-operator precedence and associativity: `|` binds tighter than
//! `&&`/`||`, which bind tighter than `;`, all left-associative, and a
//! redirect attaches to the single command it followed rather than to the
//! whole chain.

#[path = "support/mod.rs"]
mod support;

use opal_planner::config::Config;
use opal_planner::decorator::StaticRegistry;
use opal_planner::event::{NodeKind, TokenType};
use opal_planner::plan::ExecutionNode;
use opal_planner::session::TestSession;
use support::EventBuilder;

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
fn pipe_binds_tighter_than_and() {
    let mut builder = EventBuilder::new();
    builder.shell("a");
    builder.chain_op("|");
    builder.shell("b");
    builder.chain_op("&&");
    builder.shell("c");
    let plan = plan_of(builder);

    match &plan.steps[0].node {
        ExecutionNode::And(left, right) => {
            match left.as_ref() {
                ExecutionNode::Pipeline(commands) => {
                    assert_eq!(commands.len(), 2);
                    assert_eq!(command_text(&commands[0]), "a");
                    assert_eq!(command_text(&commands[1]), "b");
                }
                other => panic!("expected Pipeline on the left of And, got {other:?}"),
            }
            assert_eq!(command_text(right), "c");
        }
        other => panic!("expected And at the root, got {other:?}"),
    }
}

#[test]
fn semicolon_chain_is_one_flat_sequence() {
    let mut builder = EventBuilder::new();
    builder.shell("a");
    builder.chain_op(";");
    builder.shell("b");
    builder.chain_op(";");
    builder.shell("c");
    let plan = plan_of(builder);

    match &plan.steps[0].node {
        ExecutionNode::Sequence(nodes) => {
            assert_eq!(nodes.len(), 3);
            assert_eq!(command_text(&nodes[0]), "a");
            assert_eq!(command_text(&nodes[1]), "b");
            assert_eq!(command_text(&nodes[2]), "c");
        }
        other => panic!("expected a single flat Sequence at the root, got {other:?}"),
    }
}

#[test]
fn pipe_chain_of_three_is_one_flat_pipeline() {
    let mut builder = EventBuilder::new();
    builder.shell("a");
    builder.chain_op("|");
    builder.shell("b");
    builder.chain_op("|");
    builder.shell("c");
    let plan = plan_of(builder);

    match &plan.steps[0].node {
        ExecutionNode::Pipeline(commands) => {
            assert_eq!(commands.len(), 3);
            assert_eq!(command_text(&commands[0]), "a");
            assert_eq!(command_text(&commands[1]), "b");
            assert_eq!(command_text(&commands[2]), "c");
        }
        other => panic!("expected a single flat Pipeline at the root, got {other:?}"),
    }
}

#[test]
fn and_and_or_share_precedence_and_associate_left() {
    let mut builder = EventBuilder::new();
    builder.shell("a");
    builder.chain_op("&&");
    builder.shell("b");
    builder.chain_op("||");
    builder.shell("c");
    let plan = plan_of(builder);

    match &plan.steps[0].node {
        ExecutionNode::Or(left, right) => {
            assert_eq!(command_text(right), "c");
            assert!(matches!(left.as_ref(), ExecutionNode::And(..)));
        }
        other => panic!("expected Or at the root, got {other:?}"),
    }
}

#[test]
fn redirect_attaches_to_its_own_command_not_the_whole_chain() {
    let mut builder = EventBuilder::new();
    builder.open(NodeKind::ShellCommand);
    builder.words("a");
    builder.open(NodeKind::Redirect);
    builder.tok(TokenType::RedirectOperator, ">", true);
    builder.open(NodeKind::RedirectTarget);
    builder.tok(TokenType::Other, "out.txt", true);
    builder.close();
    builder.close();
    builder.close();
    builder.chain_op("&&");
    builder.shell("b");
    let plan = plan_of(builder);

    match &plan.steps[0].node {
        ExecutionNode::And(left, right) => {
            match left.as_ref() {
                ExecutionNode::Redirect { target, inner, .. } => {
                    assert_eq!(target.as_str(), "out.txt");
                    assert_eq!(command_text(inner), "a");
                }
                other => panic!("expected Redirect on the left of And, got {other:?}"),
            }
            assert_eq!(command_text(right), "b");
        }
        other => panic!("expected And at the root, got {other:?}"),
    }
}
