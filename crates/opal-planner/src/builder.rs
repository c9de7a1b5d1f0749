//! Turns a flat [`EventStream`] into an [`ExecutionGraph`] plus the [`Vault`]
//! that backs it (§4.1 of the specification).
//!
//! The builder walks the stream with a single forward cursor and never
//! backtracks, mirroring the teacher's single-pass parser-to-AST lowering.
//! Two things happen here that nowhere else in the pipeline can do correctly:
//!
//! - *Temporal binding*: every variable/decorator reference is resolved to an
//!   `ExprId` the moment it's seen, using the lexical scope visible at that
//!   point in the scan -- never by name lookup again later.
//! - *Literal decorator* resolution (`@env.*`, `@cwd`): these read directly
//!   from the [`Session`] capability and get their value stored immediately;
//!   every other decorator path is only tracked here (no value yet) and left
//!   for the resolver to batch through the decorator registry.

use indexmap::IndexMap;

use crate::error::{BuilderError, Diagnostic};
use crate::event::{Event, EventStream, NodeKind, Token, TokenType};
use crate::ir::{
    ArgValue, Blocker, CallTraceStmt, ChainOp, CommandIr, CommandPart, CommandStmt, ExecutionGraph, ForBlocker,
    Function, IfBlocker, Redirect, RedirectMode, Stmt, TryStmt, VarDeclStmt, WhenArm, WhenBlocker,
};
use crate::decorator::DecoratorRegistry;
use crate::session::Session;
use crate::telemetry::{DebugEvent, Telemetry};
use crate::value::Value;
use crate::vault::{ExprId, ExprKind, Vault};

/// Result of a successful build: the typed graph plus the vault it populated.
pub struct BuildOutput {
    pub graph: ExecutionGraph,
    pub vault: Vault,
}

/// Builds an `ExecutionGraph` from `stream`. `session` backs literal decorator
/// lookups (`@env.*`, `@cwd`); every other decorator reference is only
/// allocated an id here, left unresolved for the resolver. `registry` is
/// consulted only to ask whether a decorator isolates its block's scope
/// (`Decorator::isolates_scope`) -- the name is already known at this point in
/// the scan, so the push/pop has to happen here, not in the resolver, which
/// never does name lookups at all. `plan_salt` seeds the vault's display/site
/// id derivation; `None` generates a fresh random salt (fine for one-off
/// tooling, but callers wanting reproducible plans across runs should pass an
/// explicit salt).
pub fn build(
    stream: &EventStream,
    session: &dyn Session,
    registry: &dyn DecoratorRegistry,
    telemetry: &dyn Telemetry,
    plan_salt: Option<[u8; 32]>,
) -> Result<BuildOutput, BuilderError> {
    let vault = match plan_salt {
        Some(salt) => Vault::with_key(salt),
        None => Vault::random(),
    };
    let mut builder =
        Builder { cursor: Cursor::new(stream), vault, session, registry, telemetry, depth: 0, total_events: stream.len() };
    builder.telemetry.emit(DebugEvent::BuilderStarted);
    builder.expect_open(NodeKind::Source)?;

    let mut statements = Vec::new();
    let mut functions = Vec::new();
    loop {
        match builder.cursor.peek() {
            Some(Event::Close) => {
                builder.cursor.bump();
                break;
            }
            Some(Event::Open(NodeKind::Function)) => {
                functions.push(builder.parse_function()?);
            }
            Some(_) => statements.extend(builder.parse_top_level_item()?),
            None => return Err(builder.eof_error()),
        }
    }

    Ok(BuildOutput { graph: ExecutionGraph { statements, functions }, vault: builder.vault })
}

/// Forward-only cursor over the event stream. Events are small enough (at most
/// one `usize` payload) to clone rather than fight borrow-checker lifetimes
/// over, mirroring the teacher's token-cursor style.
struct Cursor<'a> {
    tokens: &'a [Token],
    events: &'a [Event],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(stream: &'a EventStream) -> Self {
        Self { tokens: &stream.tokens, events: &stream.events, pos: 0 }
    }

    fn peek(&self) -> Option<Event> {
        self.events.get(self.pos).cloned()
    }

    fn bump(&mut self) -> Option<Event> {
        let event = self.peek();
        if event.is_some() {
            self.pos += 1;
        }
        event
    }

    fn token(&self, idx: usize) -> &'a Token {
        &self.tokens[idx]
    }
}

struct Builder<'a> {
    cursor: Cursor<'a>,
    vault: Vault,
    session: &'a dyn Session,
    registry: &'a dyn DecoratorRegistry,
    telemetry: &'a dyn Telemetry,
    depth: usize,
    total_events: usize,
}

impl<'a> Builder<'a> {
    fn diag(&self, context: impl Into<String>) -> Diagnostic {
        Diagnostic::new(context).at(self.cursor.pos, self.total_events)
    }

    fn eof_error(&self) -> BuilderError {
        BuilderError::MalformedDeclaration { diag: self.diag("unexpected end of event stream") }
    }

    fn expect_open(&mut self, kind: NodeKind) -> Result<(), BuilderError> {
        match self.cursor.bump() {
            Some(Event::Open(k)) if k == kind => Ok(()),
            Some(other) => Err(BuilderError::MalformedDeclaration {
                diag: self.diag(format!("expected Open({kind:?}), found {other:?}")),
            }),
            None => Err(self.eof_error()),
        }
    }

    fn expect_close(&mut self) -> Result<(), BuilderError> {
        match self.cursor.bump() {
            Some(Event::Close) => Ok(()),
            Some(other) => {
                Err(BuilderError::MalformedDeclaration { diag: self.diag(format!("expected Close, found {other:?}")) })
            }
            None => Err(self.eof_error()),
        }
    }

    fn expect_token(&mut self) -> Result<&'a Token, BuilderError> {
        match self.cursor.bump() {
            Some(Event::Token(idx)) => Ok(self.cursor.token(idx)),
            Some(other) => {
                Err(BuilderError::MalformedDeclaration { diag: self.diag(format!("expected Token, found {other:?}")) })
            }
            None => Err(self.eof_error()),
        }
    }

    fn enter_block(&mut self) -> Result<(), BuilderError> {
        self.depth += 1;
        if self.depth > 256 {
            return Err(BuilderError::MalformedDeclaration { diag: self.diag("nested blocks too deep") });
        }
        Ok(())
    }

    fn exit_block(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // -- top level ------------------------------------------------------------

    fn parse_top_level_item(&mut self) -> Result<Vec<Stmt>, BuilderError> {
        if matches!(self.cursor.peek(), Some(Event::StepEnter)) {
            self.cursor.bump();
            self.vault.reset_step_counter();
            let mut stmts = Vec::new();
            while !matches!(self.cursor.peek(), Some(Event::StepExit)) {
                stmts.push(self.parse_stmt()?);
            }
            self.cursor.bump();
            Ok(stmts)
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    fn parse_function(&mut self) -> Result<Function, BuilderError> {
        self.expect_open(NodeKind::Function)?;
        let name = self.expect_token()?.text.clone();
        let mut params = Vec::new();
        if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::ParamList))) {
            self.cursor.bump();
            loop {
                match self.cursor.peek() {
                    Some(Event::Open(NodeKind::Param)) => {
                        self.cursor.bump();
                        params.push(self.expect_token()?.text.clone());
                        self.expect_close()?;
                    }
                    Some(Event::Close) => {
                        self.cursor.bump();
                        break;
                    }
                    _ => return Err(self.eof_error()),
                }
            }
        }

        self.expect_open(NodeKind::Block)?;
        self.enter_block()?;
        let mut body = Vec::new();
        while !matches!(self.cursor.peek(), Some(Event::Close)) {
            body.extend(self.parse_top_level_item()?);
        }
        self.cursor.bump();
        self.exit_block();
        self.expect_close()?;

        if body.is_empty() {
            return Err(BuilderError::EmptyFunction { name: name.clone(), diag: self.diag(&name) });
        }
        Ok(Function { name, params, body })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, BuilderError> {
        match self.cursor.peek() {
            Some(Event::Open(NodeKind::ShellCommand)) => Ok(Stmt::Command(self.parse_command()?)),
            Some(Event::Open(NodeKind::VarDecl)) => Ok(Stmt::VarDecl(self.parse_var_decl()?)),
            Some(Event::Open(NodeKind::If)) => Ok(Stmt::Blocker(Blocker::If(self.parse_if()?))),
            Some(Event::Open(NodeKind::For)) => Ok(Stmt::Blocker(Blocker::For(self.parse_for()?))),
            Some(Event::Open(NodeKind::When)) => Ok(Stmt::Blocker(Blocker::When(self.parse_when()?))),
            Some(Event::Open(NodeKind::Try)) => Ok(Stmt::Try(self.parse_try()?)),
            other => Err(BuilderError::UnsupportedExpression {
                diag: self.diag(format!("unexpected node while parsing statement: {other:?}")),
            }),
        }
    }

    // -- variable declarations --------------------------------------------------

    fn parse_var_decl(&mut self) -> Result<VarDeclStmt, BuilderError> {
        self.expect_open(NodeKind::VarDecl)?;
        let name = self.expect_token()?.text.clone();
        let (raw, literal) = match self.cursor.peek() {
            Some(Event::Open(NodeKind::ArrayLiteral) | Event::Open(NodeKind::ObjectLiteral)) => {
                let (value, raw) = self.parse_composite_literal()?;
                (raw, Some(value))
            }
            _ => {
                let (_ir, raw, literal) = self.parse_expr_parts()?;
                (raw, literal)
            }
        };
        self.expect_close()?;

        let id = self.vault.declare_variable(&name, &raw);
        if let Some(value) = literal {
            self.vault.store_unresolved_value(id, value);
        }
        self.telemetry.emit(DebugEvent::StatementBuilt { kind: "var_decl" });
        Ok(VarDeclStmt { name, id, raw })
    }

    // -- shell commands -----------------------------------------------------------

    fn parse_command(&mut self) -> Result<CommandStmt, BuilderError> {
        self.expect_open(NodeKind::ShellCommand)?;

        let (decorator, args, interpolation, isolates_scope) =
            if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::Decorator))) {
                let (path, _id) = self.parse_decorator_path_only()?;
                let args = self.parse_decorator_args()?;
                // An unregistered decorator doesn't isolate anything here -- the
                // resolver's own registry lookup is what raises `TargetNotFound`
                // for it later; this check is best-effort, not validation.
                let isolates = self.registry.lookup(&path).is_ok_and(|r| r.decorator.isolates_scope());
                (path, args, None, isolates)
            } else {
                let (ir, raw, _literal) = self.parse_expr_parts()?;
                let has_ref = ir.parts.iter().any(|p| matches!(p, CommandPart::Ref(_)));
                ("shell".to_owned(), vec![("command".to_owned(), ArgValue::Literal(Value::Str(raw)))], has_ref.then_some(ir), false)
            };

        let block = if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::Block))) {
            self.cursor.bump();
            self.enter_block()?;
            if isolates_scope {
                self.vault.push_scope();
            }
            let mut body = Vec::new();
            while !matches!(self.cursor.peek(), Some(Event::Close)) {
                body.extend(self.parse_top_level_item()?);
            }
            if isolates_scope {
                self.vault.pop_scope();
            }
            self.cursor.bump();
            self.exit_block();
            Some(body)
        } else {
            None
        };

        let redirect = if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::Redirect))) {
            Some(self.parse_redirect()?)
        } else {
            None
        };

        self.expect_close()?;
        let chain_next = self.try_consume_chain_operator()?;
        self.telemetry.emit(DebugEvent::StatementBuilt { kind: "command" });
        Ok(CommandStmt { decorator, args, interpolation, block, redirect, chain_next, isolates_scope })
    }

    fn parse_redirect(&mut self) -> Result<Redirect, BuilderError> {
        self.expect_open(NodeKind::Redirect)?;
        let mode_tok = self.expect_token()?;
        let mode = match mode_tok.text.as_str() {
            ">>" => RedirectMode::Append,
            _ => RedirectMode::Overwrite,
        };
        self.expect_open(NodeKind::RedirectTarget)?;
        let (ir, _raw, _literal) = self.parse_expr_parts()?;
        self.expect_close()?;
        self.expect_close()?;
        Ok(Redirect { mode, target: ir })
    }

    fn try_consume_chain_operator(&mut self) -> Result<Option<ChainOp>, BuilderError> {
        if let Some(Event::Token(idx)) = self.cursor.peek() {
            let tok = self.cursor.token(idx);
            if tok.token_type == TokenType::ChainOperator {
                let op = match tok.text.as_str() {
                    "|" => ChainOp::Pipe,
                    "&&" => ChainOp::And,
                    "||" => ChainOp::Or,
                    ";" => ChainOp::Semicolon,
                    other => {
                        return Err(BuilderError::UnsupportedExpression {
                            diag: self.diag(format!("unknown chain operator: {other}")),
                        })
                    }
                };
                self.cursor.bump();
                return Ok(Some(op));
            }
        }
        Ok(None)
    }

    // -- decorator references ----------------------------------------------------

    /// Reads a `@path.to.thing` reference. Returns `(ExprId, raw_placeholder)`.
    fn parse_decorator_ref(&mut self) -> Result<(ExprId, String), BuilderError> {
        let (path, consumed_only_path) = self.parse_decorator_path_only()?;
        let raw = format!("@{path}");
        if consumed_only_path {
            let id = self.resolve_decorator_value(&path, &raw)?;
            Ok((id, raw))
        } else {
            unreachable!("parse_decorator_path_only always consumes only the path")
        }
    }

    /// Reads the `Open(Decorator) .. Close` node and returns its dotted path.
    /// The second element is always `true`; kept for call-site clarity at
    /// `parse_decorator_ref`.
    fn parse_decorator_path_only(&mut self) -> Result<(String, bool), BuilderError> {
        self.expect_open(NodeKind::Decorator)?;
        let mut segments = Vec::new();
        loop {
            match self.cursor.bump() {
                Some(Event::Token(idx)) => {
                    let tok = self.cursor.token(idx);
                    match tok.token_type {
                        TokenType::Identifier | TokenType::Keyword => segments.push(tok.text.clone()),
                        TokenType::At | TokenType::Dot => {}
                        _ => {
                            return Err(BuilderError::UnsupportedExpression {
                                diag: self.diag(format!("unexpected token in decorator path: {:?}", tok.token_type)),
                            })
                        }
                    }
                }
                Some(Event::Close) => break,
                Some(other) => {
                    return Err(BuilderError::MalformedDeclaration {
                        diag: self.diag(format!("unexpected event in decorator path: {other:?}")),
                    })
                }
                None => return Err(self.eof_error()),
            }
        }
        Ok((segments.join("."), true))
    }

    fn resolve_decorator_value(&mut self, path: &str, raw: &str) -> Result<ExprId, BuilderError> {
        if let Some(name) = path.strip_prefix("var.") {
            return self.vault.lookup(name).ok_or_else(|| BuilderError::UndefinedVariable {
                name: name.to_owned(),
                diag: self.diag(format!("no declaration of `{name}` is visible here")),
            });
        }
        if let Some(var_name) = path.strip_prefix("env.") {
            let value = self.session.env_var(var_name).map_or(Value::Null, Value::Str);
            let id = self.vault.track_expression(raw, ExprKind::Literal);
            self.vault.store_unresolved_value(id, value);
            return Ok(id);
        }
        if path == "cwd" || path == "pwd" {
            let id = self.vault.track_expression(raw, ExprKind::Literal);
            self.vault.store_unresolved_value(id, Value::Str(self.session.working_dir()));
            return Ok(id);
        }
        Ok(self.vault.track_expression(raw, ExprKind::Decorator(path.to_owned())))
    }

    fn parse_decorator_args(&mut self) -> Result<Vec<(String, ArgValue)>, BuilderError> {
        if !matches!(self.cursor.peek(), Some(Event::Open(NodeKind::ObjectLiteral))) {
            return Ok(Vec::new());
        }
        self.cursor.bump();
        let mut args = Vec::new();
        loop {
            match self.cursor.peek() {
                Some(Event::Open(NodeKind::ObjectField)) => {
                    self.cursor.bump();
                    let key = self.expect_token()?.text.clone();
                    let value = self.parse_arg_value()?;
                    self.expect_close()?;
                    args.push((key, value));
                }
                Some(Event::Close) => {
                    self.cursor.bump();
                    break;
                }
                _ => return Err(self.eof_error()),
            }
        }
        Ok(args)
    }

    fn parse_arg_value(&mut self) -> Result<ArgValue, BuilderError> {
        if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::Decorator))) {
            let (id, _raw) = self.parse_decorator_ref()?;
            return Ok(ArgValue::Ref(id));
        }
        if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::ArrayLiteral) | Event::Open(NodeKind::ObjectLiteral))) {
            let (value, _raw) = self.parse_composite_literal()?;
            return Ok(ArgValue::Literal(value));
        }
        let (ir, raw, literal) = self.parse_expr_parts()?;
        if ir.parts.iter().any(|p| matches!(p, CommandPart::Ref(_))) {
            return Ok(ArgValue::Interpolated(ir));
        }
        Ok(ArgValue::Literal(literal.unwrap_or(Value::Str(raw))))
    }

    /// Recursively parses an `ArrayLiteral`/`ObjectLiteral` node into a
    /// concrete `Value`, with a flattened raw-text rendering for diagnostics
    /// and vault dedup. Elements are scalars or nested composites -- the
    /// planner's `Value` has no notion of an arbitrary sub-expression inside a
    /// literal container, only literal values (§3: "any scalar, list, or map").
    fn parse_composite_literal(&mut self) -> Result<(Value, String), BuilderError> {
        match self.cursor.peek() {
            Some(Event::Open(NodeKind::ArrayLiteral)) => {
                self.cursor.bump();
                let mut items = Vec::new();
                let mut raw_parts = Vec::new();
                loop {
                    match self.cursor.peek() {
                        Some(Event::Close) => {
                            self.cursor.bump();
                            break;
                        }
                        Some(Event::Open(NodeKind::ArrayLiteral) | Event::Open(NodeKind::ObjectLiteral)) => {
                            let (value, raw) = self.parse_composite_literal()?;
                            raw_parts.push(raw);
                            items.push(value);
                        }
                        Some(Event::Token(idx)) => {
                            self.cursor.bump();
                            let tok = self.cursor.token(idx);
                            raw_parts.push(tok.text.clone());
                            items.push(literal_value_from_token(tok.token_type, &tok.text));
                        }
                        other => {
                            return Err(BuilderError::UnsupportedExpression {
                                diag: self.diag(format!("unexpected event in array literal: {other:?}")),
                            })
                        }
                    }
                }
                Ok((Value::List(items), format!("[{}]", raw_parts.join(", "))))
            }
            Some(Event::Open(NodeKind::ObjectLiteral)) => {
                self.cursor.bump();
                let mut map = IndexMap::new();
                let mut raw_parts = Vec::new();
                loop {
                    match self.cursor.peek() {
                        Some(Event::Close) => {
                            self.cursor.bump();
                            break;
                        }
                        Some(Event::Open(NodeKind::ObjectField)) => {
                            self.cursor.bump();
                            let key = self.expect_token()?.text.clone();
                            let (value, raw) = self.parse_composite_field_value()?;
                            self.expect_close()?;
                            raw_parts.push(format!("{key}: {raw}"));
                            map.insert(key, value);
                        }
                        other => {
                            return Err(BuilderError::UnsupportedExpression {
                                diag: self.diag(format!("unexpected event in object literal: {other:?}")),
                            })
                        }
                    }
                }
                Ok((Value::Map(map), format!("{{{}}}", raw_parts.join(", "))))
            }
            other => Err(BuilderError::UnsupportedExpression {
                diag: self.diag(format!("expected a literal array or object, found {other:?}")),
            }),
        }
    }

    fn parse_composite_field_value(&mut self) -> Result<(Value, String), BuilderError> {
        match self.cursor.peek() {
            Some(Event::Open(NodeKind::ArrayLiteral) | Event::Open(NodeKind::ObjectLiteral)) => self.parse_composite_literal(),
            Some(Event::Token(idx)) => {
                self.cursor.bump();
                let tok = self.cursor.token(idx);
                Ok((literal_value_from_token(tok.token_type, &tok.text), tok.text.clone()))
            }
            other => Err(BuilderError::UnsupportedExpression {
                diag: self.diag(format!("expected an object field value, found {other:?}")),
            }),
        }
    }

    /// Reads a run of `Token`/`Open(Decorator)` events (stopping at the first
    /// event that is neither) and returns the reconstructed `CommandIr`, its
    /// flattened raw text (decorator refs rendered as `@path`), and -- when the
    /// run was exactly one non-reference literal token -- its typed `Value`.
    fn parse_expr_parts(&mut self) -> Result<(CommandIr, String, Option<Value>), BuilderError> {
        let mut parts = Vec::new();
        let mut raw = String::new();
        let mut token_count = 0usize;
        let mut last_single: Option<(TokenType, String)> = None;

        loop {
            match self.cursor.peek() {
                Some(Event::Token(idx)) => {
                    self.cursor.bump();
                    let tok = self.cursor.token(idx);
                    if tok.had_whitespace_before && !raw.is_empty() {
                        raw.push(' ');
                    }
                    raw.push_str(&tok.text);
                    token_count += 1;
                    last_single = Some((tok.token_type, tok.text.clone()));
                    match parts.last_mut() {
                        Some(CommandPart::Literal(buf)) => {
                            if tok.had_whitespace_before {
                                buf.push(' ');
                            }
                            buf.push_str(&tok.text);
                        }
                        _ => parts.push(CommandPart::Literal(tok.text.clone())),
                    }
                }
                Some(Event::Open(NodeKind::Decorator)) => {
                    let (id, placeholder) = self.parse_decorator_ref()?;
                    if !raw.is_empty() {
                        raw.push(' ');
                    }
                    raw.push_str(&placeholder);
                    token_count += 1;
                    last_single = None;
                    parts.push(CommandPart::Ref(id));
                }
                _ => break,
            }
        }

        let literal = (token_count == 1)
            .then(|| last_single.map(|(token_type, text)| literal_value_from_token(token_type, &text)))
            .flatten();

        Ok((CommandIr { parts }, raw, literal))
    }

    // -- control flow -------------------------------------------------------------

    fn parse_if(&mut self) -> Result<IfBlocker, BuilderError> {
        self.expect_open(NodeKind::If)?;
        let (ir, condition_text, literal) = self.parse_expr_parts()?;
        let condition_id = self.condition_expr_id_from(&ir, &condition_text, literal);

        self.expect_open(NodeKind::Block)?;
        self.enter_block()?;
        let then_branch = self.parse_block_body()?;
        self.exit_block();

        let else_branch = if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::Else))) {
            self.cursor.bump();
            self.expect_open(NodeKind::Block)?;
            self.enter_block()?;
            let body = self.parse_block_body()?;
            self.exit_block();
            self.expect_close()?;
            Some(body)
        } else {
            None
        };

        self.expect_close()?;
        self.telemetry.emit(DebugEvent::StatementBuilt { kind: "if" });
        Ok(IfBlocker { condition_id, condition_text, then_branch, else_branch, taken: None })
    }

    fn parse_for(&mut self) -> Result<ForBlocker, BuilderError> {
        self.expect_open(NodeKind::For)?;
        let loop_var = self.expect_token()?.text.clone();
        let (ir, collection_text, literal) = self.parse_expr_parts()?;
        let collection_id = self.condition_expr_id_from(&ir, &collection_text, literal);

        // The loop variable gets one build-time placeholder id; the resolver
        // substitutes a fresh id per unrolled iteration (see `crate::resolver`).
        let loop_var_slot = self.vault.declare_variable(&loop_var, &format!("__loop_slot::{collection_text}"));

        self.expect_open(NodeKind::Block)?;
        self.enter_block()?;
        let body = self.parse_block_body()?;
        self.exit_block();
        self.expect_close()?;

        self.telemetry.emit(DebugEvent::StatementBuilt { kind: "for" });
        Ok(ForBlocker { loop_var, loop_var_slot, collection_id, collection_text, body, iterations: None })
    }

    fn parse_when(&mut self) -> Result<WhenBlocker, BuilderError> {
        self.expect_open(NodeKind::When)?;
        let mut arms = Vec::new();
        loop {
            match self.cursor.peek() {
                Some(Event::Open(NodeKind::WhenArm)) => {
                    self.cursor.bump();
                    let label = self.expect_token()?.text.clone();
                    let (ir, condition_text, literal) = self.parse_expr_parts()?;
                    let condition_id = self.condition_expr_id_from(&ir, &condition_text, literal);
                    self.expect_open(NodeKind::Block)?;
                    self.enter_block()?;
                    let body = self.parse_block_body()?;
                    self.exit_block();
                    self.expect_close()?;
                    arms.push(WhenArm { label, condition_id, condition_text, body });
                }
                Some(Event::Close) => {
                    self.cursor.bump();
                    break;
                }
                _ => return Err(self.eof_error()),
            }
        }
        self.telemetry.emit(DebugEvent::StatementBuilt { kind: "when" });
        Ok(WhenBlocker { arms, matched: None })
    }

    fn parse_try(&mut self) -> Result<TryStmt, BuilderError> {
        self.expect_open(NodeKind::Try)?;
        self.expect_open(NodeKind::Block)?;
        self.enter_block()?;
        let try_block = self.parse_block_body()?;
        self.exit_block();

        let catch_block = if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::Catch))) {
            self.cursor.bump();
            self.expect_open(NodeKind::Block)?;
            self.enter_block()?;
            let body = self.parse_block_body()?;
            self.exit_block();
            self.expect_close()?;
            body
        } else {
            Vec::new()
        };

        let finally_block = if matches!(self.cursor.peek(), Some(Event::Open(NodeKind::Finally))) {
            self.cursor.bump();
            self.expect_open(NodeKind::Block)?;
            self.enter_block()?;
            let body = self.parse_block_body()?;
            self.exit_block();
            self.expect_close()?;
            body
        } else {
            Vec::new()
        };

        self.expect_close()?;
        self.telemetry.emit(DebugEvent::StatementBuilt { kind: "try" });
        Ok(TryStmt { try_block, catch_block, finally_block })
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, BuilderError> {
        let mut body = Vec::new();
        while !matches!(self.cursor.peek(), Some(Event::Close)) {
            body.extend(self.parse_top_level_item()?);
        }
        self.cursor.bump();
        Ok(body)
    }

    /// Resolves a blocker's condition/collection expression to the `ExprId` the
    /// resolver should actually drive. When the expression was a single
    /// variable/decorator reference (`if @var.FLAG { .. }`, `for x in @var.LIST`),
    /// reuses the id that reference was already bound to at `parse_expr_parts`
    /// time -- allocating a fresh id here instead would silently detach the
    /// condition from the declaration it's supposed to track, leaving it
    /// forever unresolved. Anything else (a plain literal, or a multi-part
    /// interpolated expression) falls back to tracking the raw text directly.
    fn condition_expr_id_from(&mut self, ir: &CommandIr, raw: &str, literal: Option<Value>) -> ExprId {
        if let [CommandPart::Ref(id)] = ir.parts.as_slice() {
            return *id;
        }
        let id = self.vault.track_expression(raw, ExprKind::Literal);
        if let Some(value) = literal {
            self.vault.store_unresolved_value(id, value);
        }
        id
    }
}

fn literal_value_from_token(token_type: TokenType, text: &str) -> Value {
    match token_type {
        TokenType::NumberLiteral => {
            text.parse::<i64>().map(Value::Int).unwrap_or_else(|_| text.parse::<f64>().map_or(Value::Null, Value::Float))
        }
        TokenType::BoolLiteral => Value::Bool(text == "true"),
        TokenType::StringLiteral => Value::Str(text.to_owned()),
        _ => Value::Str(text.to_owned()),
    }
}

/// Synthesizes [`Stmt::CallTrace`] wrappers for any top-level/nested command
/// whose decorator name matches a declared function, so the resolver and
/// emitter can expand user function calls the same way they expand any other
/// execution-scoping block. Call-trace inlining does not bind call arguments
/// to the callee's declared parameters (`Function::params` is informational
/// only) -- recorded as an open decision in the design notes.
pub fn synthesize_call_traces(graph: &mut ExecutionGraph) {
    let functions = graph.functions.clone();
    for function in &mut graph.functions {
        rewrite_block(&mut function.body, &functions);
    }
    rewrite_block(&mut graph.statements, &functions);
}

fn rewrite_block(stmts: &mut [Stmt], functions: &[Function]) {
    for stmt in stmts.iter_mut() {
        match stmt {
            Stmt::Command(command) => {
                if let Some(function) = functions.iter().find(|f| f.name == command.decorator) {
                    let body = function.body.clone();
                    *stmt = Stmt::CallTrace(CallTraceStmt { label: function.name.clone(), body });
                } else if let Some(block) = &mut command.block {
                    rewrite_block(block, functions);
                }
            }
            Stmt::Blocker(Blocker::If(blocker)) => {
                rewrite_block(&mut blocker.then_branch, functions);
                if let Some(else_branch) = &mut blocker.else_branch {
                    rewrite_block(else_branch, functions);
                }
            }
            Stmt::Blocker(Blocker::For(blocker)) => rewrite_block(&mut blocker.body, functions),
            Stmt::Blocker(Blocker::When(blocker)) => {
                for arm in &mut blocker.arms {
                    rewrite_block(&mut arm.body, functions);
                }
            }
            Stmt::Try(stmt) => {
                rewrite_block(&mut stmt.try_block, functions);
                rewrite_block(&mut stmt.catch_block, functions);
                rewrite_block(&mut stmt.finally_block, functions);
            }
            Stmt::CallTrace(stmt) => rewrite_block(&mut stmt.body, functions),
            Stmt::VarDecl(_) => {}
        }
    }
}
