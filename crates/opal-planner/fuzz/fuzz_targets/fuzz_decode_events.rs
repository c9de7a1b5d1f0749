//! Fuzz target: decode an arbitrary byte string into an `EventStream` and run
//! it through `builder`/`resolver`/`emitter`.
//!
//! There is no lexer in this crate -- the event stream is normally produced
//! upstream -- so this target is the stand-in for "arbitrary untrusted
//! source text": every byte maps deterministically to an opcode that either
//! opens a node, closes one, pushes a token, or marks a step boundary, and
//! any unclosed nodes at the end are force-closed so the stream is always at
//! least structurally well-formed enough to reach the builder. A crash here
//! indicates a bug in event decoding -- malformed input should only ever
//! produce a `PlanError`, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

use opal_planner::config::Config;
use opal_planner::decorator::StaticRegistry;
use opal_planner::event::{Event, EventStream, NodeKind, Token, TokenType};
use opal_planner::session::TestSession;

const NODE_KINDS: &[NodeKind] = &[
    NodeKind::Function,
    NodeKind::ShellCommand,
    NodeKind::VarDecl,
    NodeKind::Literal,
    NodeKind::ObjectLiteral,
    NodeKind::ObjectField,
    NodeKind::ArrayLiteral,
    NodeKind::Decorator,
    NodeKind::ParamList,
    NodeKind::Param,
    NodeKind::Block,
    NodeKind::Redirect,
    NodeKind::RedirectTarget,
    NodeKind::If,
    NodeKind::Else,
    NodeKind::For,
    NodeKind::When,
    NodeKind::WhenArm,
    NodeKind::Try,
    NodeKind::Catch,
    NodeKind::Finally,
];

const TOKEN_TYPES: &[TokenType] = &[
    TokenType::Identifier,
    TokenType::Keyword,
    TokenType::StringLiteral,
    TokenType::NumberLiteral,
    TokenType::BoolLiteral,
    TokenType::Operator,
    TokenType::ChainOperator,
    TokenType::RedirectOperator,
    TokenType::At,
    TokenType::Dot,
    TokenType::Punctuation,
    TokenType::Other,
];

const WORDS: &[&str] = &["echo", "a", "b", "@", ".", "var", "NAME", "1", "true", "|", "&&", ";"];

/// Decodes `data` into a well-formed `EventStream`: always `Open(Source)`
/// wrapped, every `Open` force-closed by the end, every `Token` index valid.
fn decode(data: &[u8]) -> EventStream {
    let mut tokens = Vec::new();
    let mut events = vec![Event::Open(NodeKind::Source)];
    let mut depth = 1usize;

    for chunk in data.chunks(2) {
        let opcode = chunk[0];
        let operand = chunk.get(1).copied().unwrap_or(0);

        match opcode % 5 {
            0 if depth < 64 => {
                events.push(Event::Open(NODE_KINDS[operand as usize % NODE_KINDS.len()]));
                depth += 1;
            }
            1 if depth > 1 => {
                events.push(Event::Close);
                depth -= 1;
            }
            2 => {
                let idx = tokens.len();
                let token_type = TOKEN_TYPES[operand as usize % TOKEN_TYPES.len()];
                let text = WORDS[operand as usize % WORDS.len()];
                tokens.push(Token::new(token_type, text, operand % 2 == 0));
                events.push(Event::Token(idx));
            }
            3 => events.push(Event::StepEnter),
            _ => events.push(Event::StepExit),
        }
    }

    for _ in 0..depth.saturating_sub(1) {
        events.push(Event::Close);
    }
    events.push(Event::Close);

    EventStream::new(tokens, events)
}

fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }
    let stream = decode(data);
    let session = TestSession::default();
    let registry = StaticRegistry::new();
    let _ = opal_planner::plan(&stream, &session, &registry, Config::new());
});
