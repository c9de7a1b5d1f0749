//! Walks a resolved `ExecutionGraph` into a flat, deterministic [`Plan`]
//! (§4.4 of the specification).
//!
//! Two structural transforms happen only here, never in the builder or
//! resolver: the operator-precedence tree build for shell chains (`|` binds
//! tighter than `&&`/`||`, which bind tighter than `;`, all left-associative,
//! with redirects attaching to the individual command they followed rather
//! than to the whole chain) and the final loop-unrolling splice (cloning a
//! `for` body once per resolved iteration and substituting that iteration's
//! fresh id for the build-time loop-variable placeholder).

use crate::error::{Diagnostic, PlanError};
use crate::ir::{ArgValue, Blocker, ChainOp, CommandIr, CommandPart, CommandStmt, ExecutionGraph, Stmt};
use crate::plan::{self, CommandNode, ExecutionNode, Plan, RedirectMode, Step};
use crate::resolver::substitute;
use crate::telemetry::{DebugEvent, Telemetry};
use crate::vault::{ExprId, Vault};

/// Emits a `Plan` from `graph`/`vault`, which must already be at a resolved
/// fixed point (see [`crate::resolver::resolve`]). `target` selects "command
/// mode" the same way it did for the resolver -- the two must agree, which
/// [`crate::plan_with_config`] guarantees by construction.
pub fn emit(graph: &ExecutionGraph, vault: &Vault, target: Option<&str>, telemetry: &dyn Telemetry) -> Result<Plan, PlanError> {
    telemetry.emit(DebugEvent::EmitterStarted);

    let entry: &[Stmt] = match target {
        Some(name) => {
            let function = graph.find_function(name).ok_or_else(|| {
                let mut diag = Diagnostic::new(name);
                if let Some(suggestion) = crate::error::suggest_closest(name, graph.functions.iter().map(|f| f.name.as_str())) {
                    diag = diag.suggest(suggestion);
                }
                PlanError::UnknownTarget { target: name.to_owned(), diag }
            })?;
            &function.body
        }
        None => &graph.statements,
    };

    let nodes = emit_nodes(entry, vault)?;
    let steps = to_steps(nodes);
    let plan = Plan { steps, secret_uses: vault.build_secret_uses(), plan_salt: vault.plan_key() };
    plan::validate(&plan).map_err(|reason| PlanError::InvalidPlan { reason })?;

    telemetry.emit(DebugEvent::PlanEmitted { step_count: plan.steps.len() });
    Ok(plan)
}

fn to_steps(nodes: Vec<ExecutionNode>) -> Vec<Step> {
    nodes.into_iter().enumerate().map(|(index, node)| Step { id: (index as u32) + 1, node }).collect()
}

/// Produces one `ExecutionNode` per top-level unit of `stmts`: a run of
/// chained commands, a decided blocker's taken branch, a `try`, or a call
/// trace. `VarDecl`s and undecided/untaken blockers contribute nothing --
/// this is where branch pruning actually takes effect at the plan level.
fn emit_nodes(stmts: &[Stmt], vault: &Vault) -> Result<Vec<ExecutionNode>, PlanError> {
    let mut nodes = Vec::new();
    let mut index = 0;
    while index < stmts.len() {
        match &stmts[index] {
            Stmt::VarDecl(_) => index += 1,
            Stmt::Command(_) => {
                let start = index;
                loop {
                    let Stmt::Command(command) = &stmts[index] else { break };
                    let chained = command.chain_next.is_some();
                    index += 1;
                    if !chained || index >= stmts.len() {
                        break;
                    }
                }
                let chain: Vec<&CommandStmt> = stmts[start..index]
                    .iter()
                    .map(|stmt| match stmt {
                        Stmt::Command(command) => command,
                        _ => unreachable!("chain run contains only Stmt::Command"),
                    })
                    .collect();
                // `None` means some reference in this chain was dropped under
                // `UndefinedVariablePolicy::DropStep` -- the whole chained unit
                // is omitted, the same way an untaken branch contributes nothing.
                if let Some(node) = build_chain(&chain, vault)? {
                    nodes.push(node);
                }
            }
            Stmt::Blocker(Blocker::If(blocker)) => {
                index += 1;
                match blocker.taken {
                    Some(true) => {
                        nodes.push(ExecutionNode::Logic {
                            label: "if:then".to_owned(),
                            steps: to_steps(emit_nodes(&blocker.then_branch, vault)?),
                        });
                    }
                    Some(false) => {
                        if let Some(else_branch) = &blocker.else_branch {
                            nodes.push(ExecutionNode::Logic {
                                label: "if:else".to_owned(),
                                steps: to_steps(emit_nodes(else_branch, vault)?),
                            });
                        }
                    }
                    None => {}
                }
            }
            Stmt::Blocker(Blocker::For(blocker)) => {
                index += 1;
                if let Some(iterations) = &blocker.iterations {
                    let mut combined = Vec::new();
                    for &iteration_id in iterations {
                        let mut body = blocker.body.clone();
                        substitute(&mut body, blocker.loop_var_slot, iteration_id);
                        combined.extend(emit_nodes(&body, vault)?);
                    }
                    nodes.push(ExecutionNode::Logic { label: format!("for:{}", blocker.loop_var), steps: to_steps(combined) });
                }
            }
            Stmt::Blocker(Blocker::When(blocker)) => {
                index += 1;
                if let Some(Some(matched_index)) = blocker.matched {
                    let arm = &blocker.arms[matched_index];
                    nodes.push(ExecutionNode::Logic {
                        label: format!("when:{}", arm.label),
                        steps: to_steps(emit_nodes(&arm.body, vault)?),
                    });
                }
            }
            Stmt::Try(stmt) => {
                index += 1;
                let try_node = Box::new(ExecutionNode::Logic {
                    label: "try".to_owned(),
                    steps: to_steps(emit_nodes(&stmt.try_block, vault)?),
                });
                let catch_node = if stmt.catch_block.is_empty() {
                    None
                } else {
                    Some(Box::new(ExecutionNode::Logic {
                        label: "catch".to_owned(),
                        steps: to_steps(emit_nodes(&stmt.catch_block, vault)?),
                    }))
                };
                let finally_node = if stmt.finally_block.is_empty() {
                    None
                } else {
                    Some(Box::new(ExecutionNode::Logic {
                        label: "finally".to_owned(),
                        steps: to_steps(emit_nodes(&stmt.finally_block, vault)?),
                    }))
                };
                nodes.push(ExecutionNode::Try { try_node, catch_node, finally_node });
            }
            Stmt::CallTrace(stmt) => {
                index += 1;
                nodes.push(ExecutionNode::Logic { label: stmt.label.clone(), steps: to_steps(emit_nodes(&stmt.body, vault)?) });
            }
        }
    }
    Ok(nodes)
}

/// Builds one execution tree from a run of commands chained by `chain_next`,
/// via precedence climbing: `|` (tightest) then `&&`/`||` (equal precedence)
/// then `;` (loosest), all left-associative.
fn build_chain(commands: &[&CommandStmt], vault: &Vault) -> Result<Option<ExecutionNode>, PlanError> {
    let mut cursor = 0usize;
    parse_chain_expr(commands, &mut cursor, 0, vault)
}

fn precedence(op: ChainOp) -> u8 {
    match op {
        ChainOp::Pipe => 2,
        ChainOp::And | ChainOp::Or => 1,
        ChainOp::Semicolon => 0,
    }
}

fn parse_chain_expr(
    commands: &[&CommandStmt],
    cursor: &mut usize,
    min_precedence: u8,
    vault: &Vault,
) -> Result<Option<ExecutionNode>, PlanError> {
    let Some(mut left) = emit_leaf(commands[*cursor], vault)? else { return Ok(None) };

    loop {
        if *cursor + 1 >= commands.len() {
            break;
        }
        let Some(op) = commands[*cursor].chain_next else { break };
        let op_precedence = precedence(op);
        if op_precedence < min_precedence {
            break;
        }
        *cursor += 1;
        let Some(right) = parse_chain_expr(commands, cursor, op_precedence + 1, vault)? else { return Ok(None) };
        left = combine(op, left, right);
    }

    Ok(Some(left))
}

/// Flattens a run of same-precedence `|`/`;` into one `Pipeline`/`Sequence`
/// instead of nesting a binary tree one level per element. `left` already
/// holds every element combined so far (`combine` is called once per step of
/// the precedence-climbing loop in `parse_chain_expr`), so folding just means
/// appending to it in place if it's already the same kind of run. `right` is
/// always a single new element here, never itself a same-op run, by
/// left-associativity -- but it's matched too so this stays correct even if
/// that ever changes.
fn combine(op: ChainOp, left: ExecutionNode, right: ExecutionNode) -> ExecutionNode {
    match op {
        ChainOp::Pipe => {
            let mut items = match left {
                ExecutionNode::Pipeline(items) => items,
                other => vec![other],
            };
            match right {
                ExecutionNode::Pipeline(more) => items.extend(more),
                other => items.push(other),
            }
            ExecutionNode::Pipeline(items)
        }
        ChainOp::And => ExecutionNode::And(Box::new(left), Box::new(right)),
        ChainOp::Or => ExecutionNode::Or(Box::new(left), Box::new(right)),
        ChainOp::Semicolon => {
            let mut items = match left {
                ExecutionNode::Sequence(items) => items,
                other => vec![other],
            };
            match right {
                ExecutionNode::Sequence(more) => items.extend(more),
                other => items.push(other),
            }
            ExecutionNode::Sequence(items)
        }
    }
}

/// Builds the leaf node for a single command: its `CommandNode`, wrapped in a
/// `Redirect` if present, wrapped in a `Logic` node (decorator-call step
/// followed by its body's steps) if this command opened a scoped block.
/// Returns `Ok(None)` when some reference this leaf depends on was dropped
/// under `UndefinedVariablePolicy::DropStep` -- the caller omits the whole
/// leaf (and, transitively, any chain/block it sits inside) rather than
/// rendering a half-formed command.
fn emit_leaf(command: &CommandStmt, vault: &Vault) -> Result<Option<ExecutionNode>, PlanError> {
    let mut args = Vec::with_capacity(command.args.len());
    for (key, value) in &command.args {
        let rendered = if key == "command" {
            match &command.interpolation {
                Some(ir) => render_ir(ir, vault)?,
                None => render_arg(value, vault)?,
            }
        } else {
            render_arg(value, vault)?
        };
        let Some(rendered) = rendered else { return Ok(None) };
        args.push((key.clone(), rendered));
    }

    let mut node = ExecutionNode::Command(CommandNode::new(command.decorator.clone(), args));

    if let Some(redirect) = &command.redirect {
        let Some(target) = render_ir(&redirect.target, vault)? else { return Ok(None) };
        let mode = match redirect.mode {
            crate::ir::RedirectMode::Overwrite => RedirectMode::Overwrite,
            crate::ir::RedirectMode::Append => RedirectMode::Append,
        };
        node = ExecutionNode::Redirect { mode, target, inner: Box::new(node) };
    }

    if let Some(block) = &command.block {
        let mut combined = vec![node];
        combined.extend(emit_nodes(block, vault)?);
        node = ExecutionNode::Logic { label: command.decorator.clone(), steps: to_steps(combined) };
    }

    Ok(Some(node))
}

fn render_arg(value: &ArgValue, vault: &Vault) -> Result<Option<String>, PlanError> {
    match value {
        ArgValue::Literal(value) => Ok(Some(value.display_text())),
        ArgValue::Ref(id) => display_id_text(*id, vault),
        ArgValue::Interpolated(ir) => render_ir(ir, vault),
    }
}

fn render_ir(ir: &CommandIr, vault: &Vault) -> Result<Option<String>, PlanError> {
    let mut pieces = Vec::with_capacity(ir.parts.len());
    for part in &ir.parts {
        let piece = match part {
            CommandPart::Literal(text) => text.clone(),
            CommandPart::Ref(id) => {
                let Some(text) = display_id_text(*id, vault)? else { return Ok(None) };
                text
            }
        };
        pieces.push(piece);
    }
    Ok(Some(pieces.join(" ")))
}

fn display_id_text(id: ExprId, vault: &Vault) -> Result<Option<String>, PlanError> {
    match vault.display_id(id) {
        Some(display_id) => Ok(Some(display_id.as_str().to_owned())),
        None if vault.is_dropped(id) => Ok(None),
        None => Err(PlanError::InvalidPlan { reason: format!("{id} has no display id at emission time") }),
    }
}
