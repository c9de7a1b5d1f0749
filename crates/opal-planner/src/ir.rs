//! The typed execution graph produced by the IR builder and consumed by the
//! resolver and emitter.
//!
//! Shapes here follow §3 of the specification closely; the one addition is
//! that every expression-level node already carries the `ExprId` it was bound
//! to at build time (this is the temporal-binding mechanism: nothing here is
//! re-looked-up by name once built).

use serde::{Deserialize, Serialize};

use crate::vault::ExprId;

/// A chaining operator between two commands within a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainOp {
    And,
    Or,
    Pipe,
    Semicolon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectMode {
    Overwrite,
    Append,
}

/// One part of an interpolated command string: either literal text or a
/// variable/decorator reference whose `ExprId` was captured when this command
/// was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandPart {
    Literal(String),
    Ref(ExprId),
}

/// Flattened, reconstructable form of a command's source text. Present whenever
/// the command "contains interpolation" (at least one decorator/variable
/// reference appeared inside it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandIr {
    pub parts: Vec<CommandPart>,
}

impl CommandIr {
    #[must_use]
    pub fn literal_only(text: impl Into<String>) -> Self {
        Self { parts: vec![CommandPart::Literal(text.into())] }
    }
}

/// A redirect attached to a single command (not to a chain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redirect {
    pub mode: RedirectMode,
    /// The redirect target, itself interpolatable (e.g. `> "$HOME/out.txt"`).
    pub target: CommandIr,
}

/// A single command within a chain: a decorator invocation (shell commands use
/// the implicit `@shell` decorator), its argument map, and its connective to the
/// *next* command in the same step, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStmt {
    pub decorator: String,
    /// Keyword arguments as written. For `@shell` commands this is always the
    /// single `"command"` key carrying the raw/interpolated command text.
    pub args: Vec<(String, ArgValue)>,
    /// Present when this command's raw shell text contains at least one
    /// `@var.*`/decorator reference.
    pub interpolation: Option<CommandIr>,
    pub block: Option<Vec<Stmt>>,
    pub redirect: Option<Redirect>,
    /// Operator joining this command to the next one in the same step's chain.
    pub chain_next: Option<ChainOp>,
    /// Whether entering `block` pushes an isolated vault scope (execution-scoping
    /// decorators such as `@retry`/`@timeout`/`@parallel`).
    pub isolates_scope: bool,
}

/// A literal argument value as written, or a reference captured at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArgValue {
    Literal(crate::value::Value),
    Ref(ExprId),
    Interpolated(CommandIr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDeclStmt {
    pub name: String,
    pub id: ExprId,
    /// Raw source text of the right-hand side, kept for diagnostics and for
    /// the vault's dedup policy.
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfBlocker {
    pub condition_id: ExprId,
    pub condition_text: String,
    pub then_branch: Vec<Stmt>,
    pub else_branch: Option<Vec<Stmt>>,
    /// Populated by the resolver once the condition resolves.
    pub taken: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForBlocker {
    pub loop_var: String,
    /// The single slot identity every body reference to `loop_var` is bound to
    /// at build time; the resolver substitutes this for a fresh per-iteration
    /// id when splicing each unrolled copy (see `crate::resolver::substitute`).
    pub loop_var_slot: ExprId,
    pub collection_id: ExprId,
    pub collection_text: String,
    pub body: Vec<Stmt>,
    /// Populated by the resolver once the collection resolves: one fresh id per
    /// element, matching the splice order.
    pub iterations: Option<Vec<ExprId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenArm {
    pub label: String,
    pub condition_id: ExprId,
    pub condition_text: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenBlocker {
    pub arms: Vec<WhenArm>,
    /// Index into `arms` once resolved. `None` if no arm matched.
    pub matched: Option<Option<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Blocker {
    If(IfBlocker),
    For(ForBlocker),
    When(WhenBlocker),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryStmt {
    pub try_block: Vec<Stmt>,
    pub catch_block: Vec<Stmt>,
    pub finally_block: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTraceStmt {
    pub label: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Command(CommandStmt),
    VarDecl(VarDeclStmt),
    Blocker(Blocker),
    Try(TryStmt),
    CallTrace(CallTraceStmt),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// The full IR produced by the builder: ordered top-level statements plus the
/// function table. Functions are planned independently when `Config.target` is
/// set ("command mode"); otherwise the top-level statements are the program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub statements: Vec<Stmt>,
    pub functions: Vec<Function>,
}

impl ExecutionGraph {
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}

/// Alias used at the resolver/emitter boundary: structurally identical to
/// `ExecutionGraph`, but by the time something is typed as `ResolvedIR` every
/// blocker it (transitively) contains has been resolved and pruned/unrolled.
pub type ResolvedIr = ExecutionGraph;
