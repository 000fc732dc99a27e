//! User-authored decision rules.
//!
//! # Grammar
//!
//! ```text
//! scheme      := { line NEWLINE }
//! line        := blank | "//" comment | instruction
//! instruction := events "=" action
//! events      := event { "+" event }
//! event       := "server" | "runtime" "(" [ flags ] ")"
//! flags       := { "e" | "s" | "c" | "u" }      (empty means all four)
//! action      := "server" | "runtime" | "both"
//! ```
//!
//! Whitespace between tokens is ignored. Flags select which protocol outcome a
//! changed runtime must have: `e` error, `s` same, `c` changed, `u` unknown.
//!
//! Rules are evaluated top to bottom and the first whose event set equals the
//! facts wins: `server` present requires the server to have changed, absent
//! requires that it did not; likewise for `runtime(...)`.
//!
//! A scheme with any invalid line is rejected as a whole.

use std::fmt;
use std::path::Path;

use keeper_core::UpdateDecision;
use keeper_oracle::ProtocolOutcome;

use crate::error::{LineError, LineErrorKind, SchemeError};
use crate::facts::ChangeFacts;

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Which protocol outcomes a `runtime(...)` event accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolFlags {
    pub error: bool,
    pub same: bool,
    pub changed: bool,
    pub unknown: bool,
}

impl ProtocolFlags {
    pub const ALL: Self = Self {
        error: true,
        same: true,
        changed: true,
        unknown: true,
    };

    const NONE: Self = Self {
        error: false,
        same: false,
        changed: false,
        unknown: false,
    };

    pub fn accepts(&self, outcome: ProtocolOutcome) -> bool {
        match outcome {
            ProtocolOutcome::Error => self.error,
            ProtocolOutcome::Match => self.same,
            ProtocolOutcome::Mismatch => self.changed,
            ProtocolOutcome::Unknown => self.unknown,
        }
    }
}

impl fmt::Display for ProtocolFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, c) in [
            (self.error, 'e'),
            (self.same, 's'),
            (self.changed, 'c'),
            (self.unknown, 'u'),
        ] {
            if set {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

/// Events one rule requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSet {
    pub server_changed: bool,
    /// `Some` when the rule requires a changed runtime.
    pub runtime_changed: Option<ProtocolFlags>,
}

impl EventSet {
    pub fn matches(&self, facts: &ChangeFacts) -> bool {
        if self.server_changed != facts.server_changed {
            return false;
        }
        match (self.runtime_changed, facts.runtime_protocol()) {
            (None, None) => true,
            (Some(flags), Some(outcome)) => flags.accepts(outcome),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeAction {
    UpdateServer,
    UpdateRuntime,
    UpdateBoth,
}

impl SchemeAction {
    pub fn decision(self) -> UpdateDecision {
        match self {
            SchemeAction::UpdateServer => UpdateDecision::server(),
            SchemeAction::UpdateRuntime => UpdateDecision::runtime(),
            SchemeAction::UpdateBoth => UpdateDecision::both(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemeInstruction {
    pub events: EventSet,
    pub action: SchemeAction,
}

impl fmt::Display for SchemeInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(flags) = self.events.runtime_changed {
            parts.push(format!("runtime({flags})"));
        }
        if self.events.server_changed {
            parts.push("server".to_string());
        }
        let action = match self.action {
            SchemeAction::UpdateServer => "server",
            SchemeAction::UpdateRuntime => "runtime",
            SchemeAction::UpdateBoth => "both",
        };
        write!(f, "{}={action}", parts.join("+"))
    }
}

/// A validated, ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scheme {
    instructions: Vec<SchemeInstruction>,
}

impl Scheme {
    pub fn instructions(&self) -> &[SchemeInstruction] {
        &self.instructions
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// First matching rule wins; no match decides nothing.
    pub fn evaluate(&self, facts: &ChangeFacts) -> UpdateDecision {
        let decision = self
            .instructions
            .iter()
            .find(|rule| rule.events.matches(facts))
            .map(|rule| rule.action.decision())
            .unwrap_or(UpdateDecision::NOTHING);
        if facts.protocol_error() {
            decision.with_error()
        } else {
            decision
        }
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile a whole scheme. Every invalid line is reported.
pub fn compile(text: &str) -> Result<Scheme, SchemeError> {
    let mut instructions = Vec::new();
    let mut errors = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        match parse_instruction(line) {
            Ok(instruction) => instructions.push(instruction),
            Err(kind) => errors.push(LineError {
                line: index + 1,
                text: line.to_string(),
                kind,
            }),
        }
    }

    if errors.is_empty() {
        Ok(Scheme { instructions })
    } else {
        Err(SchemeError::Invalid(errors))
    }
}

pub fn compile_file(path: &Path) -> Result<Scheme, SchemeError> {
    let text = std::fs::read_to_string(path).map_err(|source| SchemeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    compile(&text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    LParen,
    RParen,
    Plus,
    Equals,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Plus => f.write_str("+"),
            Token::Equals => f.write_str("="),
        }
    }
}

fn tokenize(line: &str) -> Result<Vec<Token>, LineErrorKind> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '+' | '=' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '+' => Token::Plus,
                    _ => Token::Equals,
                });
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if w.is_alphanumeric() || w == '_' {
                        word.push(w);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => {
                return Err(LineErrorKind::Malformed(format!(
                    "unexpected character '{other}'"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, wanted: Token, context: &str) -> Result<(), LineErrorKind> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            Some(other) => Err(LineErrorKind::Malformed(format!(
                "expected '{wanted}' {context}, found '{other}'"
            ))),
            None => Err(LineErrorKind::Malformed(format!(
                "expected '{wanted}' {context}"
            ))),
        }
    }

    fn events(&mut self) -> Result<EventSet, LineErrorKind> {
        let mut set = EventSet {
            server_changed: false,
            runtime_changed: None,
        };
        if self.peek() == Some(&Token::Equals) {
            return Err(LineErrorKind::EmptyEvents);
        }
        loop {
            self.event(&mut set)?;
            if self.peek() == Some(&Token::Plus) {
                self.next();
                continue;
            }
            return Ok(set);
        }
    }

    fn event(&mut self, set: &mut EventSet) -> Result<(), LineErrorKind> {
        match self.next() {
            Some(Token::Word(word)) if word == "server" => {
                if set.server_changed {
                    return Err(LineErrorKind::DuplicateEvent("server"));
                }
                set.server_changed = true;
                Ok(())
            }
            Some(Token::Word(word)) if word == "runtime" => {
                if set.runtime_changed.is_some() {
                    return Err(LineErrorKind::DuplicateEvent("runtime"));
                }
                self.expect(Token::LParen, "after 'runtime'")?;
                let flags = if self.peek() == Some(&Token::RParen) {
                    ProtocolFlags::ALL
                } else {
                    match self.next() {
                        Some(Token::Word(raw)) => parse_flags(&raw)?,
                        _ => {
                            return Err(LineErrorKind::Malformed(
                                "malformed runtime(...) event".to_string(),
                            ))
                        }
                    }
                };
                self.expect(Token::RParen, "to close 'runtime('")?;
                set.runtime_changed = Some(flags);
                Ok(())
            }
            Some(Token::Word(word)) => Err(LineErrorKind::UnknownEvent(word)),
            Some(Token::Plus) | Some(Token::Equals) => Err(LineErrorKind::Malformed(
                "empty event between separators".to_string(),
            )),
            Some(other) => Err(LineErrorKind::UnknownEvent(other.to_string())),
            None => Err(LineErrorKind::Malformed("dangling '+'".to_string())),
        }
    }

    fn action(&mut self) -> Result<SchemeAction, LineErrorKind> {
        let action = match self.next() {
            None => return Err(LineErrorKind::EmptyAction),
            Some(Token::Word(word)) => match word.as_str() {
                "server" => SchemeAction::UpdateServer,
                "runtime" => SchemeAction::UpdateRuntime,
                "both" => SchemeAction::UpdateBoth,
                _ => return Err(LineErrorKind::UnknownAction(word)),
            },
            Some(other) => return Err(LineErrorKind::UnknownAction(other.to_string())),
        };
        match self.next() {
            None => Ok(action),
            Some(extra) => Err(LineErrorKind::Malformed(format!(
                "unexpected '{extra}' after action"
            ))),
        }
    }
}

fn parse_flags(raw: &str) -> Result<ProtocolFlags, LineErrorKind> {
    let mut flags = ProtocolFlags::NONE;
    for c in raw.chars() {
        match c {
            'e' => flags.error = true,
            's' => flags.same = true,
            'c' => flags.changed = true,
            'u' => flags.unknown = true,
            other => return Err(LineErrorKind::UnknownFlag(other)),
        }
    }
    Ok(flags)
}

fn parse_instruction(line: &str) -> Result<SchemeInstruction, LineErrorKind> {
    let tokens = tokenize(line)?;
    if !tokens.contains(&Token::Equals) {
        return Err(LineErrorKind::MissingSeparator);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let events = parser.events()?;
    parser.expect(Token::Equals, "between events and action")?;
    let action = parser.action()?;
    Ok(SchemeInstruction { events, action })
}
