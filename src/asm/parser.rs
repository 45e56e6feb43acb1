// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::collections::HashSet;
use std::rc::Rc;

use crate::asm::ast::{BinaryOp, Expression, ImmediateList, Name, Statement, UnaryOp};
use crate::asm::error::{Abort, ErrorList, Position};
use crate::asm::token::{lex, Lexeme, Token};

/// Recursive-descent statement parser with Pratt-style expression
/// precedence climbing (C2). Parse errors resync to the next `LineEnd`
/// rather than aborting the whole document, matching the teacher's
/// `il/parser.rs` recovery style; only exceeding `max_errors` (signalled
/// by `ErrorList::error` returning `Err(Abort)`) unwinds the whole parse.
pub struct Parser<'a> {
    toks: Vec<Lexeme<'a>>,
    pos: usize,
    file: Rc<str>,
    errors: &'a mut ErrorList,
    seen_labels: HashSet<String>,
    seen_dotted_labels: HashSet<String>,
    pragma_target_used: bool,
}

impl<'a> Parser<'a> {
    pub fn new(file: Rc<str>, source: &'a str, errors: &'a mut ErrorList) -> Self {
        Parser {
            toks: lex(source),
            pos: 0,
            file,
            errors,
            seen_labels: HashSet::new(),
            seen_dotted_labels: HashSet::new(),
            pragma_target_used: false,
        }
    }

    /// Parse every statement in the document, accumulating diagnostics for
    /// bad lines and resyncing past them rather than stopping outright.
    pub fn parse(mut self) -> Result<Vec<Statement>, Abort> {
        let mut statements = Vec::new();
        loop {
            match &self.toks[self.pos].token {
                Token::Eof => break,
                Token::LineStart | Token::LineEnd => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            match self.parse_statement() {
                Ok(Some(stmt)) => statements.push(stmt),
                Ok(None) => {}
                Err(Abort) => return Err(Abort),
            }
            self.resync_to_line_end();
        }
        Ok(statements)
    }

    fn resync_to_line_end(&mut self) {
        while !matches!(self.toks[self.pos].token, Token::LineEnd | Token::Eof) {
            self.pos += 1;
        }
        if matches!(self.toks[self.pos].token, Token::LineEnd) {
            self.pos += 1;
        }
    }

    fn here(&self) -> Position {
        Position::new(self.file.clone(), self.toks[self.pos].line)
    }

    fn peek(&self) -> &Token<'a> {
        &self.toks[self.pos].token
    }

    fn advance(&mut self) -> Token<'a> {
        let tok = self.toks[self.pos].token.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        tok
    }

    fn parse_statement(&mut self) -> Result<Option<Statement>, Abort> {
        match self.peek().clone() {
            Token::Comment(_) => {
                self.advance();
                Ok(None)
            }
            Token::Label(name) => {
                self.advance();
                self.register_label(name, false)?;
                Ok(Some(Statement::LabelDef { name: Name::plain(name), pos: self.here() }))
            }
            Token::DottedLabel(name) => {
                self.advance();
                self.register_label(name, true)?;
                Ok(Some(Statement::LabelDef { name: Name::dotted(name), pos: self.here() }))
            }
            Token::Directive(name) => self.parse_directive(name),
            Token::InstrMacroIdent(name) => self.parse_instr_macro_call(name),
            Token::Identifier(name) => {
                let pos = self.here();
                self.advance();
                let lower = name.to_ascii_lowercase();
                if lower == "push" {
                    let value = self.parse_expression(0)?;
                    return Ok(Some(Statement::Push { value, pos }));
                }
                if let Some(size) = push_n_size(&lower) {
                    if size == 0 {
                        if self.peek_starts_expression() {
                            self.errors.error(pos.clone(), "'push0' takes no argument")?;
                            let _ = self.parse_expression(0)?;
                        }
                        return Ok(Some(Statement::Opcode { name: name.to_string(), immediates: Vec::new(), pos }));
                    }
                    let value = self.parse_expression(0)?;
                    return Ok(Some(Statement::PushExplicit { size, value, pos }));
                }
                if (lower == "jump" || lower == "jumpi") && self.peek_starts_expression() {
                    let target = self.parse_expression(0)?;
                    return Ok(Some(Statement::JumpTo { name: name.to_string(), target, pos }));
                }
                let immediates = self.parse_optional_immediates()?;
                Ok(Some(Statement::Opcode { name: name.to_string(), immediates, pos }))
            }
            other => {
                let pos = self.here();
                self.errors.error(pos, format!("unexpected token: {:?}", other))?;
                Ok(None)
            }
        }
    }

    /// Whether the next token can start an expression; used to tell a bare
    /// `jump`/`jumpi`/`push0` from one followed by an argument, since these
    /// opcodes take an optional single expression rather than the bracketed
    /// immediate list other opcodes use.
    fn peek_starts_expression(&self) -> bool {
        matches!(
            self.peek(),
            Token::Number(_)
                | Token::Str(_)
                | Token::LabelRef(_)
                | Token::DottedLabelRef(_)
                | Token::Variable(_)
                | Token::Identifier(_)
                | Token::Minus
                | Token::Tilde
                | Token::LParen
        )
    }

    fn register_label(&mut self, name: &str, dotted: bool) -> Result<(), Abort> {
        let set = if dotted { &mut self.seen_dotted_labels } else { &mut self.seen_labels };
        if !set.insert(name.to_string()) {
            let pos = self.here();
            self.errors.error(pos, format!("duplicate label '{}{}' in this document", if dotted { "." } else { "" }, name))?;
        }
        Ok(())
    }

    fn parse_optional_immediates(&mut self) -> Result<ImmediateList, Abort> {
        if !matches!(self.peek(), Token::LBracket) {
            return Ok(Vec::new());
        }
        self.advance();
        let mut out = Vec::new();
        if !matches!(self.peek(), Token::RBracket) {
            loop {
                out.push(self.parse_expression(0)?);
                if matches!(self.peek(), Token::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        if matches!(self.peek(), Token::RBracket) {
            self.advance();
        } else {
            let pos = self.here();
            self.errors.error(pos, "expected ']'")?;
        }
        Ok(out)
    }

    fn parse_instr_macro_call(&mut self, name: &str) -> Result<Option<Statement>, Abort> {
        let pos = self.here();
        self.advance();
        let args = self.parse_call_args()?;
        Ok(Some(Statement::InstrMacroCall { name: name.to_string(), args, pos }))
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expression>, Abort> {
        let mut args = Vec::new();
        if !matches!(self.peek(), Token::LParen) {
            return Ok(args);
        }
        self.advance();
        if !matches!(self.peek(), Token::RParen) {
            loop {
                args.push(self.parse_expression(0)?);
                if matches!(self.peek(), Token::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        if matches!(self.peek(), Token::RParen) {
            self.advance();
        } else {
            let pos = self.here();
            self.errors.error(pos, "expected ')'")?;
        }
        Ok(args)
    }

    fn parse_directive(&mut self, name: &str) -> Result<Option<Statement>, Abort> {
        match name {
            "define" => self.parse_define(),
            "include" => {
                self.advance();
                let path = self.expect_string()?;
                Ok(Some(Statement::Include { path, pos: self.here() }))
            }
            "assemble" => {
                self.advance();
                let path = self.expect_string()?;
                Ok(Some(Statement::Assemble { path, pos: self.here() }))
            }
            "pragma" => self.parse_pragma(),
            "bytes" => {
                self.advance();
                let pos = self.here();
                let label = match self.peek().clone() {
                    Token::Label(name) => {
                        self.advance();
                        Some(name.to_string())
                    }
                    Token::DottedLabel(name) => {
                        self.advance();
                        Some(name.to_string())
                    }
                    _ => None,
                };
                let value = self.parse_expression(0)?;
                Ok(Some(Statement::Bytes { label, value, pos }))
            }
            other => {
                let pos = self.here();
                self.errors.error(pos, format!("unknown directive '#{}'", other))?;
                self.advance();
                Ok(None)
            }
        }
    }

    fn parse_pragma(&mut self) -> Result<Option<Statement>, Abort> {
        let pos = self.here();
        self.advance();
        let key = match self.advance() {
            Token::Identifier(s) => s.to_string(),
            _ => {
                self.errors.error(pos.clone(), "expected pragma name")?;
                return Ok(None);
            }
        };
        if key == "target" {
            if self.pragma_target_used {
                self.errors.error(pos.clone(), "#pragma target may only appear once per document")?;
            }
            self.pragma_target_used = true;
        }
        let value = match self.peek().clone() {
            Token::Identifier(s) => { self.advance(); s.to_string() }
            Token::Str(s) => { self.advance(); s }
            Token::Number(s) => { self.advance(); s.to_string() }
            _ => String::new(),
        };
        Ok(Some(Statement::Pragma { key, value, pos }))
    }

    fn parse_define(&mut self) -> Result<Option<Statement>, Abort> {
        let pos = self.here();
        self.advance();
        if matches!(self.peek(), Token::Directive("define")) {
            self.errors.error(pos, "nested #define is not allowed")?;
            return Ok(None);
        }
        match self.peek().clone() {
            Token::InstrMacroIdent(name) => {
                let name = name.to_string();
                self.advance();
                let params = self.parse_param_list()?;
                let body = self.parse_macro_body()?;
                Ok(Some(Statement::InstructionMacroDef { name, params, body: Rc::new(body), pos }))
            }
            Token::Identifier(name) => {
                let name = name.to_string();
                self.advance();
                let params = self.parse_param_list()?;
                if matches!(self.peek(), Token::Equals) {
                    self.advance();
                } else {
                    self.errors.warning(pos.clone(), "legacy #define is missing '='");
                }
                let body = self.parse_expression(0)?;
                Ok(Some(Statement::ExpressionMacroDef { name, params, body, pos }))
            }
            _ => {
                self.errors.error(pos, "expected a macro name after #define")?;
                Ok(None)
            }
        }
    }

    fn parse_param_list(&mut self) -> Result<Vec<String>, Abort> {
        let mut params = Vec::new();
        if !matches!(self.peek(), Token::LParen) {
            return Ok(params);
        }
        self.advance();
        if !matches!(self.peek(), Token::RParen) {
            loop {
                match self.advance() {
                    Token::Variable(name) => params.push(name.to_string()),
                    Token::Identifier(name) => params.push(name.to_string()),
                    _ => {
                        let pos = self.here();
                        self.errors.error(pos, "expected parameter name")?;
                    }
                }
                if matches!(self.peek(), Token::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        if matches!(self.peek(), Token::RParen) {
            self.advance();
        } else {
            let pos = self.here();
            self.errors.error(pos, "expected ')'")?;
        }
        Ok(params)
    }

    /// An instruction macro body is `{ statement* }`, parsed with its own
    /// nested label-uniqueness tracking (a macro body is its own document
    /// once cloned per call, so duplicate-label rules reset here).
    fn parse_macro_body(&mut self) -> Result<Vec<Statement>, Abort> {
        if matches!(self.peek(), Token::LineEnd) {
            self.advance();
        }
        if !matches!(self.peek(), Token::LBrace) {
            let pos = self.here();
            self.errors.error(pos, "expected '{' to start instruction macro body")?;
            return Ok(Vec::new());
        }
        self.advance();
        let mut body = Vec::new();
        let saved_labels = std::mem::take(&mut self.seen_labels);
        let saved_dotted = std::mem::take(&mut self.seen_dotted_labels);
        loop {
            match self.peek() {
                Token::RBrace | Token::Eof => break,
                Token::LineStart | Token::LineEnd => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            match self.parse_statement() {
                Ok(Some(stmt)) => body.push(stmt),
                Ok(None) => {}
                Err(Abort) => {
                    self.seen_labels = saved_labels;
                    self.seen_dotted_labels = saved_dotted;
                    return Err(Abort);
                }
            }
            if !matches!(self.peek(), Token::RBrace) {
                self.resync_to_line_end();
            }
        }
        if matches!(self.peek(), Token::RBrace) {
            self.advance();
        } else {
            let pos = self.here();
            self.errors.error(pos, "expected '}' to close instruction macro body")?;
        }
        self.seen_labels = saved_labels;
        self.seen_dotted_labels = saved_dotted;
        Ok(body)
    }

    fn expect_string(&mut self) -> Result<String, Abort> {
        match self.advance() {
            Token::Str(s) => Ok(s),
            _ => {
                let pos = self.here();
                self.errors.error(pos, "expected a string literal")?;
                Ok(String::new())
            }
        }
    }

    // --- expressions: Pratt precedence climbing over the table in ast.rs ---

    fn parse_expression(&mut self, min_prec: u8) -> Result<Expression, Abort> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                Token::Amp => BinaryOp::And,
                Token::Pipe => BinaryOp::Or,
                Token::Caret => BinaryOp::Xor,
                Token::Shl => BinaryOp::Shl,
                Token::Shr => BinaryOp::Shr,
                _ => break,
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            let pos = self.here();
            self.advance();
            let rhs = self.parse_expression(prec + 1)?;
            lhs = Expression::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), pos };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expression, Abort> {
        let pos = self.here();
        match self.peek().clone() {
            Token::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::Unary { op: UnaryOp::Neg, operand: Box::new(operand), pos })
            }
            Token::Tilde => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::Unary { op: UnaryOp::Not, operand: Box::new(operand), pos })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, Abort> {
        let pos = self.here();
        match self.advance() {
            Token::Number(text) => Ok(Expression::Number(parse_number(text))),
            Token::Str(s) => Ok(Expression::Str(s.into_bytes())),
            Token::LabelRef(name) => Ok(Expression::LabelRef(Name::plain(name))),
            Token::DottedLabelRef(name) => Ok(Expression::LabelRef(Name::dotted(name))),
            Token::Variable(name) => Ok(Expression::Variable(name.to_string())),
            Token::Identifier(name) => {
                if matches!(self.peek(), Token::LParen) {
                    let args = self.parse_call_args()?;
                    Ok(Expression::MacroCall { name: name.to_string(), args })
                } else {
                    Ok(Expression::LabelRef(Name::plain(name)))
                }
            }
            Token::LParen => {
                let inner = self.parse_expression(0)?;
                if matches!(self.peek(), Token::RParen) {
                    self.advance();
                } else {
                    self.errors.error(pos, "expected ')'")?;
                }
                Ok(inner)
            }
            other => {
                self.errors.error(pos, format!("expected an expression, found {:?}", other))?;
                Ok(Expression::Number(crate::numeric::Value::from_i64(0)))
            }
        }
    }
}

/// Recognizes `push0`..`push32` case-insensitively, returning the declared
/// size in bytes (0 for `push0`). Anything else, including a bare `push` or
/// an identifier that merely starts with "push", returns `None`.
fn push_n_size(lower: &str) -> Option<u8> {
    let rest = lower.strip_prefix("push")?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: u32 = rest.parse().ok()?;
    if n <= 32 {
        Some(n as u8)
    } else {
        None
    }
}

fn parse_number(text: &str) -> crate::numeric::Value {
    if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        crate::numeric::Value::from_hex_digits(digits)
    } else {
        crate::numeric::Value::from_decimal(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Vec<Statement>, ErrorList) {
        let mut errors = ErrorList::new(32);
        let file: Rc<str> = Rc::from("t.easm");
        let stmts = {
            let parser = Parser::new(file, src, &mut errors);
            parser.parse().unwrap()
        };
        (stmts, errors)
    }

    #[test]
    fn parses_opcode_and_label() {
        let (stmts, errors) = parse("start:\n  add\n");
        assert!(!errors.failed());
        assert!(matches!(stmts[0], Statement::LabelDef { .. }));
        assert!(matches!(stmts[1], Statement::Opcode { .. }));
    }

    #[test]
    fn parses_push_with_label_ref() {
        let (stmts, errors) = parse("push @start\n");
        assert!(!errors.failed());
        assert!(matches!(stmts[0], Statement::Push { .. }));
    }

    #[test]
    fn precedence_is_respected() {
        // 1 | 2 & 3 should parse as 1 | (2 & 3), not (1 | 2) & 3.
        let (stmts, _) = parse("push 1 | 2 & 3\n");
        if let Statement::Push { value: Expression::Binary { op, rhs, .. }, .. } = &stmts[0] {
            assert_eq!(*op, BinaryOp::Or);
            assert!(matches!(**rhs, Expression::Binary { op: BinaryOp::And, .. }));
        } else {
            panic!("expected a binary push expression");
        }
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let (_, errors) = parse("start:\nstart:\n");
        assert!(errors.failed());
    }

    #[test]
    fn instruction_macro_definition_parses_body() {
        let (stmts, errors) = parse("#define %foo() {\n  add\n  sub\n}\n");
        assert!(!errors.failed());
        if let Statement::InstructionMacroDef { body, .. } = &stmts[0] {
            assert_eq!(body.len(), 2);
        } else {
            panic!("expected an instruction macro definition");
        }
    }

    #[test]
    fn legacy_define_without_equals_warns() {
        let (_, errors) = parse("#define foo 1\n");
        assert_eq!(errors.warnings().count(), 1);
    }

    #[test]
    fn uppercase_push_still_parses_its_argument() {
        let (stmts, errors) = parse("PUSH @start\n");
        assert!(!errors.failed());
        assert!(matches!(stmts[0], Statement::Push { .. }));
    }

    #[test]
    fn jump_with_a_label_argument_parses_as_jump_to() {
        let (stmts, errors) = parse("jump @loop\n");
        assert!(!errors.failed());
        assert!(matches!(stmts[0], Statement::JumpTo { .. }));
    }

    #[test]
    fn bare_jump_without_argument_parses_as_a_plain_opcode() {
        let (stmts, errors) = parse("jump\n");
        assert!(!errors.failed());
        assert!(matches!(stmts[0], Statement::Opcode { .. }));
    }

    #[test]
    fn explicit_push2_parses_its_declared_size_and_value() {
        let (stmts, errors) = parse("push2 0x1234\n");
        assert!(!errors.failed());
        if let Statement::PushExplicit { size, .. } = &stmts[0] {
            assert_eq!(*size, 2);
        } else {
            panic!("expected an explicitly-sized push");
        }
    }

    #[test]
    fn push0_with_an_argument_is_rejected() {
        let (_, errors) = parse("push0 1\n");
        assert!(errors.failed());
    }

    #[test]
    fn push0_without_an_argument_is_a_plain_opcode() {
        let (stmts, errors) = parse("push0\n");
        assert!(!errors.failed());
        assert!(matches!(stmts[0], Statement::Opcode { .. }));
    }

    #[test]
    fn bytes_directive_with_a_label_registers_it() {
        let (stmts, errors) = parse("#bytes greeting: \"hi\"\n");
        assert!(!errors.failed());
        if let Statement::Bytes { label, .. } = &stmts[0] {
            assert_eq!(label.as_deref(), Some("greeting"));
        } else {
            panic!("expected a bytes directive");
        }
    }

    #[test]
    fn bytes_directive_without_a_label_is_fine() {
        let (stmts, errors) = parse("#bytes \"hi\"\n");
        assert!(!errors.failed());
        if let Statement::Bytes { label, .. } = &stmts[0] {
            assert!(label.is_none());
        } else {
            panic!("expected a bytes directive");
        }
    }
}
