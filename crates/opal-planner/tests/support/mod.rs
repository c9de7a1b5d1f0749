//! Hand-built `EventStream` construction for the integration tests.
//!
//! There is no real lexer/parser in this crate -- the event stream is an
//! external contract produced upstream -- so exercising the builder end to
//! end means constructing one by hand. `EventBuilder` mirrors the shape the
//! builder expects: an `Open(Source)`-wrapped run of events, tokens pushed
//! into a flat table and referenced by index, whitespace flags set the way a
//! real lexer would set them.

#![allow(dead_code)]

use opal_planner::event::{Event, EventStream, NodeKind, Token, TokenType};

pub struct EventBuilder {
    tokens: Vec<Token>,
    events: Vec<Event>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self { tokens: Vec::new(), events: vec![Event::Open(NodeKind::Source)] }
    }

    fn push_token(&mut self, token_type: TokenType, text: &str, had_whitespace_before: bool) -> usize {
        let idx = self.tokens.len();
        self.tokens.push(Token::new(token_type, text, had_whitespace_before));
        idx
    }

    pub fn tok(&mut self, token_type: TokenType, text: &str, had_whitespace_before: bool) -> &mut Self {
        let idx = self.push_token(token_type, text, had_whitespace_before);
        self.events.push(Event::Token(idx));
        self
    }

    pub fn open(&mut self, kind: NodeKind) -> &mut Self {
        self.events.push(Event::Open(kind));
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.events.push(Event::Close);
        self
    }

    pub fn step_enter(&mut self) -> &mut Self {
        self.events.push(Event::StepEnter);
        self
    }

    pub fn step_exit(&mut self) -> &mut Self {
        self.events.push(Event::StepExit);
        self
    }

    /// Pushes `text` as whitespace-separated word tokens, flagging every word
    /// after the first as whitespace-preceded so `parse_expr_parts` joins them
    /// back with single spaces.
    pub fn words(&mut self, text: &str) -> &mut Self {
        for (i, word) in text.split_whitespace().enumerate() {
            self.tok(TokenType::Other, word, i > 0);
        }
        self
    }

    /// `Open(ShellCommand) .. words(text) .. Close`, with no block/redirect/chain.
    pub fn shell(&mut self, text: &str) -> &mut Self {
        self.open(NodeKind::ShellCommand);
        self.words(text);
        self.close()
    }

    /// A trailing chain operator token (`|`, `&&`, `||`, `;`), placed right
    /// before the enclosing `ShellCommand`'s `Close` the way the builder's
    /// `try_consume_chain_operator` expects to find it.
    pub fn chain_op(&mut self, op: &str) -> &mut Self {
        self.tok(TokenType::ChainOperator, op, true)
    }

    /// An `Open(Decorator) .. Close` node for `@a.b.c`, with no trailing args.
    pub fn decorator_ref(&mut self, path: &str) -> &mut Self {
        self.open(NodeKind::Decorator);
        self.tok(TokenType::At, "@", false);
        for (i, segment) in path.split('.').enumerate() {
            if i > 0 {
                self.tok(TokenType::Dot, ".", false);
            }
            self.tok(TokenType::Identifier, segment, false);
        }
        self.close()
    }

    /// `var NAME = "text"` with a plain string-literal right-hand side.
    pub fn var_decl_str(&mut self, name: &str, value: &str) -> &mut Self {
        self.open(NodeKind::VarDecl);
        self.tok(TokenType::Identifier, name, false);
        self.tok(TokenType::StringLiteral, value, true);
        self.close()
    }

    /// `var NAME = <number>`.
    pub fn var_decl_int(&mut self, name: &str, value: i64) -> &mut Self {
        self.open(NodeKind::VarDecl);
        self.tok(TokenType::Identifier, name, false);
        self.tok(TokenType::NumberLiteral, &value.to_string(), true);
        self.close()
    }

    /// `var NAME = @path.to.thing`.
    pub fn var_decl_ref(&mut self, name: &str, path: &str) -> &mut Self {
        self.open(NodeKind::VarDecl);
        self.tok(TokenType::Identifier, name, false);
        self.decorator_ref(path);
        self.close()
    }

    /// `var NAME = [items...]`, each item a bare word rendered as a string
    /// token (good enough for loop-collection fixtures).
    pub fn var_decl_array(&mut self, name: &str, items: &[&str]) -> &mut Self {
        self.open(NodeKind::VarDecl);
        self.tok(TokenType::Identifier, name, false);
        self.open(NodeKind::ArrayLiteral);
        for item in items {
            self.tok(TokenType::StringLiteral, item, true);
        }
        self.close();
        self.close()
    }

    /// `if @var.NAME { <then via closure> }`, optionally followed by `else`.
    pub fn if_var(&mut self, var_name: &str, then: impl FnOnce(&mut Self)) -> &mut Self {
        self.open(NodeKind::If);
        self.decorator_ref(&format!("var.{var_name}"));
        self.open(NodeKind::Block);
        then(self);
        self.close();
        self.close()
    }

    pub fn if_var_else(&mut self, var_name: &str, then: impl FnOnce(&mut Self), else_: impl FnOnce(&mut Self)) -> &mut Self {
        self.open(NodeKind::If);
        self.decorator_ref(&format!("var.{var_name}"));
        self.open(NodeKind::Block);
        then(self);
        self.close();
        self.open(NodeKind::Else);
        self.open(NodeKind::Block);
        else_(self);
        self.close();
        self.close();
        self.close()
    }

    /// `for LOOP_VAR in @var.COLLECTION { <body via closure> }`.
    pub fn for_var(&mut self, loop_var: &str, collection_name: &str, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.open(NodeKind::For);
        self.tok(TokenType::Identifier, loop_var, true);
        self.decorator_ref(&format!("var.{collection_name}"));
        self.open(NodeKind::Block);
        body(self);
        self.close();
        self.close()
    }

    /// `@PATH { <body via closure> }` as a shell-command decorator block (e.g.
    /// `@retry { ... }`), with no decorator args.
    pub fn decorator_block(&mut self, path: &str, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.open(NodeKind::ShellCommand);
        self.decorator_ref(path);
        self.open(NodeKind::Block);
        body(self);
        self.close();
        self.close()
    }

    /// `fn NAME() { <body via closure> }`, with no params.
    pub fn function(&mut self, name: &str, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.open(NodeKind::Function);
        self.tok(TokenType::Identifier, name, false);
        self.open(NodeKind::Block);
        body(self);
        self.close();
        self.close()
    }

    pub fn finish(mut self) -> EventStream {
        self.events.push(Event::Close);
        EventStream::new(self.tokens, self.events)
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}
