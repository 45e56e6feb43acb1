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
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::asm::ast::{BinaryOp, DocId, Expression, ExpressionMacroDef, Name, UnaryOp};
use crate::asm::builtins;
use crate::asm::error::{Abort, ErrorList, Position};
use crate::asm::loader::{GlobalScope, LocalScope};
use crate::numeric::Value;

/// The outcome of looking up a label reference against the current label
/// table. Distinguishes a label that simply doesn't exist from one that
/// exists but was referenced with the wrong dotted-ness (§3: "can't use
/// `@.x` to refer to label `x:`"). A prior design also needed a `Deferred`
/// variant for "not yet known this fixpoint pass", but `layout::layout`
/// always rebuilds the complete label table from every `Instr::Label` in
/// the program before evaluating any instruction in a given pass, so every
/// label that exists anywhere is already present by the time this is
/// called — there is no genuinely transient state to model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelResolution {
    Resolved(i64),
    Undefined,
    DottedMismatch,
}

/// Supplies the program-counter of a label instance. Implemented by the
/// layout pass (C6), which owns the current fixpoint guess; kept as a
/// trait so the evaluator doesn't need to know layout exists.
pub trait LabelLookup {
    fn resolve(&self, doc: DocId, name: &Name) -> LabelResolution;
}

/// Binds an instruction- or expression-macro call's parameters to the
/// argument expressions supplied at the call site, plus the environment
/// those arguments should themselves be evaluated in (a macro argument is
/// sugar for substitution, not eager evaluation, so a parameter can be
/// passed through several nested macro calls unevaluated).
pub struct Frame {
    pub bindings: HashMap<String, (Expression, DocId)>,
    pub outer: Option<Rc<Frame>>,
}

pub struct Environment<'a> {
    pub doc: DocId,
    pub locals: &'a HashMap<DocId, LocalScope>,
    pub global: &'a GlobalScope,
    pub frame: Option<Rc<Frame>>,
    pub labels: &'a dyn LabelLookup,
    pub reached: &'a RefCell<HashSet<(DocId, String, bool)>>,
    /// Expression macro definitions currently being evaluated somewhere on
    /// this call stack, keyed by the definition's own address (stable for
    /// the duration of one pass, since no macro registration happens
    /// during evaluation). Grows on entry to `eval_macro_call`, shrinks on
    /// every exit path including error unwinding (§9 "recursion guards").
    pub active_expr_macros: &'a RefCell<HashSet<usize>>,
    /// Compiles a nested `#assemble`d file to bytes, independently of the
    /// surrounding document's scope. `None` in contexts (such as most unit
    /// tests) where nested assembly isn't wired up.
    pub assemble: Option<&'a dyn Fn(&str, &mut ErrorList) -> Result<Vec<u8>, Abort>>,
}

const MAX_MACRO_DEPTH: usize = 512;

impl<'a> Environment<'a> {
    pub fn eval(&self, expr: &Expression, errors: &mut ErrorList) -> Result<Value, Abort> {
        self.eval_depth(expr, errors, 0)
    }

    fn eval_depth(&self, expr: &Expression, errors: &mut ErrorList, depth: usize) -> Result<Value, Abort> {
        if depth > MAX_MACRO_DEPTH {
            return Err(self.abort_recursive(errors)?);
        }
        match expr {
            Expression::Number(v) => Ok(v.clone()),
            Expression::Str(bytes) => Ok(Value::from_bytes(bytes.clone())),
            Expression::Variable(name) => self.eval_variable(name, errors, depth),
            Expression::LabelRef(name) => {
                self.reached.borrow_mut().insert((self.doc, name.text.clone(), name.dotted));
                match self.labels.resolve(self.doc, name) {
                    LabelResolution::Resolved(pc) => Ok(Value::from_i64(pc)),
                    LabelResolution::Undefined => {
                        errors.error(
                            Position::new(Rc::from("<label>"), 0),
                            format!("undefined label '{}{}'", if name.dotted { "." } else { "" }, name.text),
                        )?;
                        Ok(Value::from_i64(0))
                    }
                    LabelResolution::DottedMismatch => {
                        errors.error(
                            Position::new(Rc::from("<label>"), 0),
                            format!(
                                "can't use '@{}{}' to refer to label '{}{}:'",
                                if name.dotted { "." } else { "" },
                                name.text,
                                if !name.dotted { "." } else { "" },
                                name.text
                            ),
                        )?;
                        Ok(Value::from_i64(0))
                    }
                }
            }
            Expression::MacroCall { name, args } => self.eval_macro_call(name, args, errors, depth),
            Expression::Unary { op, operand, pos: _ } => {
                let v = self.eval_depth(operand, errors, depth)?;
                match op {
                    UnaryOp::Neg => Ok(Value::from_int(-v.to_int())),
                    UnaryOp::Not => Ok(Value::from_int(!v.to_int())),
                }
            }
            Expression::Binary { op, lhs, rhs, pos } => {
                let l = self.eval_depth(lhs, errors, depth)?.to_int();
                let r = self.eval_depth(rhs, errors, depth)?.to_int();
                let result = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => {
                        if r == num_bigint::BigInt::from(0) {
                            errors.error(pos.clone(), "division by zero")?;
                            num_bigint::BigInt::from(0)
                        } else {
                            l / r
                        }
                    }
                    BinaryOp::Mod => {
                        if r == num_bigint::BigInt::from(0) {
                            errors.error(pos.clone(), "modulo by zero")?;
                            num_bigint::BigInt::from(0)
                        } else {
                            l % r
                        }
                    }
                    BinaryOp::And => l & r,
                    BinaryOp::Or => l | r,
                    BinaryOp::Xor => l ^ r,
                    BinaryOp::Shl => match shift_amount(&r) {
                        Some(n) => l << n,
                        None => {
                            errors.error(pos.clone(), "shift amount overflows")?;
                            num_bigint::BigInt::from(0)
                        }
                    },
                    BinaryOp::Shr => match shift_amount(&r) {
                        Some(n) => l >> n,
                        None => {
                            errors.error(pos.clone(), "shift amount overflows")?;
                            num_bigint::BigInt::from(0)
                        }
                    },
                };
                Ok(Value::from_int(result))
            }
        }
    }

    fn eval_variable(&self, name: &str, errors: &mut ErrorList, depth: usize) -> Result<Value, Abort> {
        let mut frame = self.frame.clone();
        while let Some(f) = frame {
            if let Some((expr, doc)) = f.bindings.get(name) {
                let inner = Environment {
                    doc: *doc,
                    locals: self.locals,
                    global: self.global,
                    frame: f.outer.clone(),
                    labels: self.labels,
                    reached: self.reached,
                    active_expr_macros: self.active_expr_macros,
                    assemble: self.assemble,
                };
                return inner.eval_depth(expr, errors, depth + 1);
            }
            frame = f.outer.clone();
        }
        errors.error(Position::new(Rc::from("<macro>"), 0), format!("undefined variable '${}'", name))?;
        Ok(Value::from_i64(0))
    }

    fn lookup_expr_macro(&self, name: &str) -> Option<&ExpressionMacroDef> {
        if let Some(local) = self.locals.get(&self.doc) {
            if let Some(def) = local.expr_macros.get(name) {
                return Some(def);
            }
        }
        self.global.expr_macros.get(name)
    }

    fn eval_macro_call(
        &self,
        name: &str,
        args: &[Expression],
        errors: &mut ErrorList,
        depth: usize,
    ) -> Result<Value, Abort> {
        if let Some(def) = self.lookup_expr_macro(name) {
            if def.params.len() != args.len() {
                errors.error(
                    Position::new(Rc::from("<macro>"), 0),
                    format!("macro '{}' expects {} argument(s), got {}", name, def.params.len(), args.len()),
                )?;
                return Ok(Value::from_i64(0));
            }
            let key = def as *const ExpressionMacroDef as usize;
            if !self.active_expr_macros.borrow_mut().insert(key) {
                errors.error(Position::new(Rc::from("<macro>"), 0), format!("recursive call to macro '{}'", name))?;
                return Ok(Value::from_i64(0));
            }
            let result = (|| -> Result<Value, Abort> {
                let mut bindings = HashMap::new();
                for (param, arg) in def.params.iter().zip(args.iter()) {
                    bindings.insert(param.clone(), (arg.clone(), self.doc));
                }
                let frame = Rc::new(Frame { bindings, outer: self.frame.clone() });
                let inner = Environment {
                    doc: self.doc,
                    locals: self.locals,
                    global: self.global,
                    frame: Some(frame),
                    labels: self.labels,
                    reached: self.reached,
                    active_expr_macros: self.active_expr_macros,
                    assemble: self.assemble,
                };
                inner.eval_depth(&def.body, errors, depth + 1)
            })();
            self.active_expr_macros.borrow_mut().remove(&key);
            return result;
        }
        if name == "assemble" {
            return self.eval_assemble(args, errors, depth);
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_depth(arg, errors, depth + 1)?);
        }
        builtins::call(name, &values, errors)
    }

    fn eval_assemble(&self, args: &[Expression], errors: &mut ErrorList, depth: usize) -> Result<Value, Abort> {
        if args.len() != 1 {
            errors.error(Position::new(Rc::from("<macro>"), 0), "'assemble' expects exactly one path argument")?;
            return Ok(Value::from_i64(0));
        }
        let path_value = self.eval_depth(&args[0], errors, depth + 1)?;
        let path_bytes = path_value.to_bytes().unwrap_or_default();
        let path = String::from_utf8_lossy(&path_bytes).into_owned();
        match self.assemble {
            Some(f) => {
                let bytes = f(&path, errors)?;
                Ok(Value::from_bytes(bytes))
            }
            None => {
                errors.error(Position::new(Rc::from("<macro>"), 0), "'assemble' is not available in this context")?;
                Ok(Value::from_bytes(Vec::new()))
            }
        }
    }

    fn abort_recursive(&self, errors: &mut ErrorList) -> Result<Abort, Abort> {
        errors.error(Position::new(Rc::from("<macro>"), 0), "macro expansion recursion limit exceeded")
    }
}

/// `None` for a negative shift amount or one that doesn't fit a machine
/// `u32`, both of which are "shift amount overflows" per §4.5/§7 rather
/// than silently saturating to an enormous shift.
fn shift_amount(v: &num_bigint::BigInt) -> Option<u32> {
    use num_traits::ToPrimitive;
    if *v < num_bigint::BigInt::from(0) {
        return None;
    }
    v.to_u32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::ast::Name;

    struct NoLabels;
    impl LabelLookup for NoLabels {
        fn resolve(&self, _doc: DocId, _name: &Name) -> LabelResolution {
            LabelResolution::Undefined
        }
    }

    fn env<'a>(
        locals: &'a HashMap<DocId, LocalScope>,
        global: &'a GlobalScope,
        labels: &'a dyn LabelLookup,
        reached: &'a RefCell<HashSet<(DocId, String, bool)>>,
        active_expr_macros: &'a RefCell<HashSet<usize>>,
    ) -> Environment<'a> {
        Environment { doc: 0, locals, global, frame: None, labels, reached, active_expr_macros, assemble: None }
    }

    #[test]
    fn arithmetic_precedence_free_evaluation() {
        let locals = HashMap::new();
        let global = GlobalScope::default();
        let labels = NoLabels;
        let reached = RefCell::new(HashSet::new());
        let active = RefCell::new(HashSet::new());
        let e = env(&locals, &global, &labels, &reached, &active);
        let mut errors = ErrorList::new(8);
        let expr = Expression::Binary {
            op: BinaryOp::Add,
            lhs: Box::new(Expression::Number(Value::from_i64(2))),
            rhs: Box::new(Expression::Number(Value::from_i64(3))),
            pos: Position::new(Rc::from("t"), 1),
        };
        assert_eq!(e.eval(&expr, &mut errors).unwrap().to_int(), num_bigint::BigInt::from(5));
    }

    #[test]
    fn division_by_zero_is_an_error_not_a_panic() {
        let locals = HashMap::new();
        let global = GlobalScope::default();
        let labels = NoLabels;
        let reached = RefCell::new(HashSet::new());
        let active = RefCell::new(HashSet::new());
        let e = env(&locals, &global, &labels, &reached, &active);
        let mut errors = ErrorList::new(8);
        let expr = Expression::Binary {
            op: BinaryOp::Div,
            lhs: Box::new(Expression::Number(Value::from_i64(1))),
            rhs: Box::new(Expression::Number(Value::from_i64(0))),
            pos: Position::new(Rc::from("t"), 1),
        };
        let _ = e.eval(&expr, &mut errors);
        assert!(errors.failed());
    }

    #[test]
    fn builtin_abs_is_reachable_without_a_user_macro() {
        let locals = HashMap::new();
        let global = GlobalScope::default();
        let labels = NoLabels;
        let reached = RefCell::new(HashSet::new());
        let active = RefCell::new(HashSet::new());
        let e = env(&locals, &global, &labels, &reached, &active);
        let mut errors = ErrorList::new(8);
        let expr = Expression::MacroCall { name: "abs".into(), args: vec![Expression::Number(Value::from_i64(-7))] };
        assert_eq!(e.eval(&expr, &mut errors).unwrap().to_int(), num_bigint::BigInt::from(7));
    }

    #[test]
    fn negative_shift_amount_is_an_error_not_a_huge_shift() {
        let locals = HashMap::new();
        let global = GlobalScope::default();
        let labels = NoLabels;
        let reached = RefCell::new(HashSet::new());
        let active = RefCell::new(HashSet::new());
        let e = env(&locals, &global, &labels, &reached, &active);
        let mut errors = ErrorList::new(8);
        let expr = Expression::Binary {
            op: BinaryOp::Shl,
            lhs: Box::new(Expression::Number(Value::from_i64(1))),
            rhs: Box::new(Expression::Number(Value::from_i64(-1))),
            pos: Position::new(Rc::from("t"), 1),
        };
        let _ = e.eval(&expr, &mut errors);
        assert!(errors.failed());
    }

    #[test]
    fn direct_macro_recursion_is_reported_immediately() {
        let mut locals = HashMap::new();
        locals.insert(0usize, LocalScope::default());
        let mut global = GlobalScope::default();
        global.expr_macros.insert(
            "Loop".to_string(),
            ExpressionMacroDef { params: vec![], body: Expression::MacroCall { name: "Loop".into(), args: vec![] } },
        );
        let labels = NoLabels;
        let reached = RefCell::new(HashSet::new());
        let active = RefCell::new(HashSet::new());
        let e = env(&locals, &global, &labels, &reached, &active);
        let mut errors = ErrorList::new(8);
        let expr = Expression::MacroCall { name: "Loop".into(), args: vec![] };
        let _ = e.eval(&expr, &mut errors);
        assert!(errors.failed());
        assert!(active.borrow().is_empty());
    }
}
