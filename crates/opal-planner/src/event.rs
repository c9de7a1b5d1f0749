//! The event/token stream contract consumed by the IR builder.
//!
//! Lexing and parsing happen entirely outside this crate. What arrives here is a
//! flat, preorder-encoded traversal of the already-parsed syntax tree plus the
//! token table it indexes into. The builder (see [`crate::builder`]) walks this
//! stream with a single forward cursor and never backtracks.

use serde::{Deserialize, Serialize};

/// Node kinds that can appear as the payload of an [`Event::Open`].
///
/// This is deliberately not exhaustive of every kind the upstream parser might
/// produce -- only the kinds the planner core understands are listed here. An
/// unrecognized kind is a [`crate::error::BuilderError::MalformedDeclaration`]-class
/// problem for the builder, not a silent skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Function,
    Source,
    ShellCommand,
    VarDecl,
    Literal,
    ObjectLiteral,
    ObjectField,
    ArrayLiteral,
    Decorator,
    ParamList,
    Param,
    Block,
    Redirect,
    RedirectTarget,
    If,
    Else,
    For,
    When,
    WhenArm,
    Try,
    Catch,
    Finally,
}

/// One element of the flat event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Opens a new node of the given kind; must be matched by a later [`Event::Close`].
    Open(NodeKind),
    /// Closes the most recently opened node.
    Close,
    /// References `tokens[idx]`.
    Token(usize),
    /// Marks the start of one user-visible plan step.
    StepEnter,
    /// Marks the end of the current plan step.
    StepExit,
}

/// Lexical category of a [`Token`]. The builder only cares about a handful of
/// these; the rest pass through as opaque text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    Identifier,
    Keyword,
    StringLiteral,
    NumberLiteral,
    BoolLiteral,
    Operator,
    ChainOperator,
    RedirectOperator,
    At,
    Dot,
    Punctuation,
    Other,
}

/// One entry in the shared token table that events index into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: TokenType,
    pub text: String,
    /// Whether source whitespace preceded this token. Used by the builder to
    /// decide whether to insert a space when concatenating shell command text.
    pub had_whitespace_before: bool,
}

impl Token {
    #[must_use]
    pub fn new(token_type: TokenType, text: impl Into<String>, had_whitespace_before: bool) -> Self {
        Self { token_type, text: text.into(), had_whitespace_before }
    }
}

/// The full input contract: a token table plus the flat event stream indexing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStream {
    pub tokens: Vec<Token>,
    pub events: Vec<Event>,
}

impl EventStream {
    #[must_use]
    pub fn new(tokens: Vec<Token>, events: Vec<Event>) -> Self {
        Self { tokens, events }
    }

    /// Total number of events, used for `PlanError::event_pos`/`total_events` reporting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
