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
use std::collections::HashMap;
use std::rc::Rc;

use crate::asm::error::Position;

/// Identifies a document within the forest built by the loader and the
/// expander. Top-level files and `#include`d files get one `DocId` each;
/// every clone of an instruction-macro body (one per call site) gets its
/// own fresh `DocId`, since they must not share label instantiations.
pub type DocId = usize;

/// A name as written in source, tagged with whether it carries a leading
/// dot (file-local override of a global name) per §2's scoping rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub text: String,
    pub dotted: bool,
}

impl Name {
    pub fn plain(text: impl Into<String>) -> Self {
        Name { text: text.into(), dotted: false }
    }

    pub fn dotted(text: impl Into<String>) -> Self {
        Name { text: text.into(), dotted: true }
    }

    /// Per §2: names starting with an uppercase letter are global, anything
    /// else (lowercase, `_`, dotted) is file-local.
    pub fn is_global(&self) -> bool {
        !self.dotted && self.text.chars().next().map_or(false, |c| c.is_uppercase())
    }
}

/// An expression, as parsed (C2) and later evaluated (C5).
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Number(crate::numeric::Value),
    Str(Vec<u8>),
    LabelRef(Name),
    Variable(String),
    MacroCall { name: String, args: Vec<Expression> },
    Unary { op: UnaryOp, operand: Box<Expression>, pos: Position },
    Binary { op: BinaryOp, lhs: Box<Expression>, rhs: Box<Expression>, pos: Position },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    /// Lower binding power binds looser; matches the precedence table in
    /// §4.2: OR < XOR < AND < SHIFT < ADD/SUB < MUL/DIV/MOD, all
    /// left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::Xor => 2,
            BinaryOp::And => 3,
            BinaryOp::Shl | BinaryOp::Shr => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
        }
    }
}

/// An immediate-argument list attached to certain opcodes, e.g. the `2, 3`
/// in `exchange[2, 3]`.
pub type ImmediateList = Vec<Expression>;

/// A single parsed statement, positioned, living inside some `Document`.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Opcode { name: String, immediates: ImmediateList, pos: Position },
    Push { value: Expression, pos: Position },
    /// An explicitly-sized `push1`..`push32`, whose declared width is kept
    /// even when the value would fit in fewer bytes (§4.6/§4.7 "explicit
    /// size wins").
    PushExplicit { size: u8, value: Expression, pos: Position },
    /// `jump`/`jumpi` with a literal label-ref argument; synthesized by the
    /// expander into an implicit `push` of `target` immediately before a
    /// bare `name` opcode (§4.4).
    JumpTo { name: String, target: Expression, pos: Position },
    LabelDef { name: Name, pos: Position },
    InstrMacroCall { name: String, args: Vec<Expression>, pos: Position },
    Include { path: String, pos: Position },
    Assemble { path: String, pos: Position },
    Pragma { key: String, value: String, pos: Position },
    /// `#bytes [LABEL:] expr`. `label` is dual-registered by the loader and
    /// expander: as a dotted label anchored at the data's start PC, and as
    /// a zero-parameter expression macro bound to `value` (§6/§9).
    Bytes { label: Option<String>, value: Expression, pos: Position },
    ExpressionMacroDef { name: String, params: Vec<String>, body: Expression, pos: Position },
    InstructionMacroDef { name: String, params: Vec<String>, body: Rc<Vec<Statement>>, pos: Position },
}

impl Statement {
    pub fn pos(&self) -> &Position {
        match self {
            Statement::Opcode { pos, .. }
            | Statement::Push { pos, .. }
            | Statement::PushExplicit { pos, .. }
            | Statement::JumpTo { pos, .. }
            | Statement::LabelDef { pos, .. }
            | Statement::InstrMacroCall { pos, .. }
            | Statement::Include { pos, .. }
            | Statement::Assemble { pos, .. }
            | Statement::Pragma { pos, .. }
            | Statement::Bytes { pos, .. }
            | Statement::ExpressionMacroDef { pos, .. }
            | Statement::InstructionMacroDef { pos, .. } => pos,
        }
    }
}

/// A parsed, not-yet-expanded source file or macro body. Shares its
/// statement list (`Rc`) with every clone produced for macro invocations,
/// since the body text never changes between calls — only the evaluation
/// environment and the document's place in the scope forest do.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocId,
    pub file: Rc<str>,
    pub statements: Rc<Vec<Statement>>,
    /// The document this one was reached from: a parent file for a
    /// top-level `#include`/`#assemble`, or the document that invoked an
    /// instruction macro whose body this document's statements came from.
    pub parent: Option<DocId>,
    /// For each `Statement::Include` at the given index in `statements`,
    /// the `DocId` of the document it resolved to. Populated by whichever
    /// pass actually performed the include (the loader for eagerly-reached
    /// documents, the expander for includes found inside a macro body).
    pub include_map: HashMap<usize, DocId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionMacroDef {
    pub params: Vec<String>,
    pub body: Expression,
}

#[derive(Debug, Clone)]
pub struct InstructionMacroDef {
    pub params: Vec<String>,
    pub body: Rc<Vec<Statement>>,
    pub defined_in: DocId,
}
