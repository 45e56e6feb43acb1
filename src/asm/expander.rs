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
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::asm::ast::{DocId, Document, Expression, InstructionMacroDef, Name, Statement};
use crate::asm::error::{Abort, ErrorList, Position};
use crate::asm::evaluator::Frame;
use crate::asm::fs::{resolve_include, FileSystem};
use crate::asm::loader::{register_expr_macro, register_instr_macro, register_label, GlobalScope, LoadedProgram, LocalScope};
use crate::asm::parser::Parser;

/// Generous backstop against runaway expansion. Direct and mutual
/// recursion are caught immediately by the currently-active-definition set
/// in `expand_macro_call`; this bound only guards against pathological but
/// non-recursive nesting depth.
const MAX_EXPANSION_DEPTH: usize = 256;

/// One flattened instruction, still carrying unevaluated expressions: the
/// layout pass (C6) evaluates them against its current program-counter
/// guess, possibly more than once.
pub enum Instr {
    Op { name: String, immediates: Vec<Expression>, doc: DocId, frame: Option<Rc<Frame>>, pos: Position },
    Push { value: Expression, doc: DocId, frame: Option<Rc<Frame>>, pos: Position },
    /// A `pushN` with a declared fixed size; the value is zero-padded (or
    /// rejected) to exactly `size` bytes rather than sized from its value.
    PushExplicit { size: u8, value: Expression, doc: DocId, frame: Option<Rc<Frame>>, pos: Position },
    Bytes { value: Expression, doc: DocId, frame: Option<Rc<Frame>>, pos: Position },
    Label { name: Name, doc: DocId, pos: Position },
}

impl Instr {
    pub fn pos(&self) -> &Position {
        match self {
            Instr::Op { pos, .. }
            | Instr::Push { pos, .. }
            | Instr::PushExplicit { pos, .. }
            | Instr::Bytes { pos, .. }
            | Instr::Label { pos, .. } => pos,
        }
    }
}

pub struct ExpandedProgram {
    pub instrs: Vec<Instr>,
    pub docs: Vec<Document>,
    pub locals: HashMap<DocId, LocalScope>,
    pub global: GlobalScope,
    /// The fork named by a root-unit `#pragma target "name"`, if any,
    /// together with the position it was declared at (§4.4/§6).
    pub pragma_target: Option<(String, Position)>,
}

struct ExpandState {
    docs: Vec<Document>,
    locals: HashMap<DocId, LocalScope>,
    global: GlobalScope,
    instrs: Vec<Instr>,
    pragma_target: Option<(String, Position)>,
    /// Instruction-macro bodies currently being expanded somewhere on this
    /// call stack, keyed by the body's own `Rc` pointer (stable across
    /// clones of the same definition). Guards against recursive `%macro()`
    /// invocation (§4.4/§9).
    active_instr_macros: HashSet<usize>,
}

/// Flattens the document forest produced by the loader into a linear
/// instruction list (C4), inlining every instruction-macro call. Each
/// macro invocation gets a fresh document clone (fresh `DocId`, sharing
/// the body's `Rc<Vec<Statement>>`) so repeated expansions don't alias
/// label instantiations, matching the "macro hygiene" rule: a duplicate
/// global label only surfaces on the invocation that actually redefines
/// it, not at macro-definition time.
pub fn expand(loaded: LoadedProgram, fs: &dyn FileSystem, max_include_depth: usize, errors: &mut ErrorList) -> Result<ExpandedProgram, Abort> {
    let mut state = ExpandState {
        docs: loaded.docs,
        locals: loaded.locals,
        global: loaded.global,
        instrs: Vec::new(),
        pragma_target: None,
        active_instr_macros: HashSet::new(),
    };
    expand_document(loaded.root, None, &mut state, fs, max_include_depth, errors, 0, true)?;
    Ok(ExpandedProgram {
        instrs: state.instrs,
        docs: state.docs,
        locals: state.locals,
        global: state.global,
        pragma_target: state.pragma_target,
    })
}

#[allow(clippy::too_many_arguments)]
fn expand_document(
    doc: DocId,
    frame: Option<Rc<Frame>>,
    state: &mut ExpandState,
    fs: &dyn FileSystem,
    max_include_depth: usize,
    errors: &mut ErrorList,
    depth: usize,
    is_root: bool,
) -> Result<(), Abort> {
    if depth > MAX_EXPANSION_DEPTH {
        errors.error(Position::new(state.docs[doc].file.clone(), 0), "macro expansion recursion limit exceeded")?;
        return Ok(());
    }
    let statements = Rc::clone(&state.docs[doc].statements);
    for (idx, stmt) in statements.iter().enumerate() {
        match stmt {
            Statement::LabelDef { name, pos } => {
                state.instrs.push(Instr::Label { name: name.clone(), doc, pos: pos.clone() });
            }
            Statement::Opcode { name, immediates, pos } => {
                state.instrs.push(Instr::Op {
                    name: name.clone(),
                    immediates: immediates.clone(),
                    doc,
                    frame: frame.clone(),
                    pos: pos.clone(),
                });
            }
            Statement::Push { value, pos } => {
                state.instrs.push(Instr::Push { value: value.clone(), doc, frame: frame.clone(), pos: pos.clone() });
            }
            Statement::PushExplicit { size, value, pos } => {
                state.instrs.push(Instr::PushExplicit { size: *size, value: value.clone(), doc, frame: frame.clone(), pos: pos.clone() });
            }
            Statement::JumpTo { name, target, pos } => match target {
                Expression::LabelRef(_) => {
                    state.instrs.push(Instr::Push { value: target.clone(), doc, frame: frame.clone(), pos: pos.clone() });
                    state.instrs.push(Instr::Op { name: name.clone(), immediates: Vec::new(), doc, frame: frame.clone(), pos: pos.clone() });
                }
                _ => {
                    errors.error(pos.clone(), format!("'{}' argument must be a label reference", name))?;
                }
            },
            Statement::Bytes { label, value, pos } => {
                if let Some(lbl) = label {
                    state.instrs.push(Instr::Label { name: Name::dotted(lbl.clone()), doc, pos: pos.clone() });
                }
                state.instrs.push(Instr::Bytes { value: value.clone(), doc, frame: frame.clone(), pos: pos.clone() });
            }
            Statement::InstrMacroCall { name, args, pos } => {
                expand_macro_call(name, args, pos, doc, frame.clone(), state, fs, max_include_depth, errors, depth)?;
            }
            Statement::Include { path, pos } => {
                if let Some(&child) = state.docs[doc].include_map.get(&idx) {
                    // Eagerly loaded: splice the child's own expansion here.
                    expand_document(child, None, state, fs, max_include_depth, errors, depth, false)?;
                } else {
                    // Reached only now, through a macro body: load and
                    // register it lazily, exactly once per invocation.
                    load_lazy_include(doc, path, pos, frame.clone(), state, fs, max_include_depth, errors, depth)?;
                }
            }
            Statement::Assemble { path, pos } => {
                state.instrs.push(Instr::Bytes {
                    value: Expression::MacroCall { name: "assemble".to_string(), args: vec![Expression::Str(path.clone().into_bytes())] },
                    doc,
                    frame: frame.clone(),
                    pos: pos.clone(),
                });
            }
            Statement::Pragma { key, value, pos } => {
                if key == "target" {
                    if !is_root {
                        errors.error(pos.clone(), "'#pragma target' is illegal in an included file")?;
                    } else if state.pragma_target.is_some() {
                        errors.error(pos.clone(), "'#pragma target' may only appear once per compilation unit")?;
                    } else {
                        state.pragma_target = Some((value.clone(), pos.clone()));
                    }
                }
            }
            Statement::ExpressionMacroDef { .. } | Statement::InstructionMacroDef { .. } => {
                // Registered when this document was created (loader for
                // eager documents, `expand_macro_call` for clones).
            }
        }
    }
    Ok(())
}

fn lookup_instr_macro<'a>(name: &str, doc: DocId, state: &'a ExpandState) -> Option<&'a InstructionMacroDef> {
    if let Some(local) = state.locals.get(&doc) {
        if let Some(def) = local.instr_macros.get(name) {
            return Some(def);
        }
    }
    state.global.instr_macros.get(name)
}

fn expand_macro_call(
    name: &str,
    args: &[Expression],
    call_pos: &Position,
    call_doc: DocId,
    outer_frame: Option<Rc<Frame>>,
    state: &mut ExpandState,
    fs: &dyn FileSystem,
    max_include_depth: usize,
    errors: &mut ErrorList,
    depth: usize,
) -> Result<(), Abort> {
    let def = match lookup_instr_macro(name, call_doc, state) {
        Some(d) => InstructionMacroDef { params: d.params.clone(), body: Rc::clone(&d.body), defined_in: d.defined_in },
        None => {
            errors.error(call_pos.clone(), format!("unknown instruction macro '%{}'", name))?;
            return Ok(());
        }
    };
    if def.params.len() != args.len() {
        errors.error(call_pos.clone(), format!("macro '%{}' expects {} argument(s), got {}", name, def.params.len(), args.len()))?;
        return Ok(());
    }

    let body_key = Rc::as_ptr(&def.body) as usize;
    if !state.active_instr_macros.insert(body_key) {
        errors.error(call_pos.clone(), format!("recursive call to instruction macro '%{}'", name))?;
        return Ok(());
    }
    let result = expand_macro_call_body(&def, args, call_doc, outer_frame, state, fs, max_include_depth, errors, depth);
    state.active_instr_macros.remove(&body_key);
    result
}

#[allow(clippy::too_many_arguments)]
fn expand_macro_call_body(
    def: &InstructionMacroDef,
    args: &[Expression],
    call_doc: DocId,
    outer_frame: Option<Rc<Frame>>,
    state: &mut ExpandState,
    fs: &dyn FileSystem,
    max_include_depth: usize,
    errors: &mut ErrorList,
    depth: usize,
) -> Result<(), Abort> {
    let new_id = state.docs.len();
    let defining_file = state.docs[def.defined_in].file.clone();
    state.docs.push(Document {
        id: new_id,
        file: defining_file,
        statements: Rc::clone(&def.body),
        parent: Some(def.defined_in),
        include_map: HashMap::new(),
    });

    let mut local = LocalScope::default();
    for stmt in def.body.iter() {
        match stmt {
            Statement::LabelDef { name, pos } => register_label(name, pos, new_id, &mut local, &mut state.global, errors)?,
            Statement::ExpressionMacroDef { name, params, body, pos } => {
                let m = crate::asm::ast::ExpressionMacroDef { params: params.clone(), body: body.clone() };
                register_expr_macro(name, m, pos, &mut local, &mut state.global, errors)?;
            }
            Statement::InstructionMacroDef { name, params, body, pos } => {
                let m = InstructionMacroDef { params: params.clone(), body: Rc::clone(body), defined_in: new_id };
                register_instr_macro(name, m, pos, &mut local, &mut state.global, errors)?;
            }
            Statement::Bytes { label: Some(lbl), value, pos } => {
                register_label(&Name::dotted(lbl.clone()), pos, new_id, &mut local, &mut state.global, errors)?;
                let m = crate::asm::ast::ExpressionMacroDef { params: Vec::new(), body: value.clone() };
                register_expr_macro(lbl, m, pos, &mut local, &mut state.global, errors)?;
            }
            _ => {}
        }
    }
    state.locals.insert(new_id, local);

    let mut bindings = HashMap::new();
    for (param, arg) in def.params.iter().zip(args.iter()) {
        bindings.insert(param.clone(), (arg.clone(), call_doc));
    }
    let frame = Rc::new(Frame { bindings, outer: outer_frame });

    expand_document(new_id, Some(frame), state, fs, max_include_depth, errors, depth + 1, false)
}

/// Loads an `#include` target the first time it is reached, which can only
/// happen inside an instruction-macro body (eager includes are already
/// present in `include_map`). A fresh clone of the macro body produces a
/// fresh `DocId` each call, so this runs once per invocation, registering
/// globals anew each time.
#[allow(clippy::too_many_arguments)]
fn load_lazy_include(
    including_doc: DocId,
    path: &str,
    pos: &Position,
    frame: Option<Rc<Frame>>,
    state: &mut ExpandState,
    fs: &dyn FileSystem,
    max_include_depth: usize,
    errors: &mut ErrorList,
    depth: usize,
) -> Result<(), Abort> {
    if depth > max_include_depth {
        errors.error(pos.clone(), "include depth exceeded")?;
        return Ok(());
    }
    let including_file = state.docs[including_doc].file.clone();
    let resolved = match resolve_include(&including_file, path) {
        Some(r) => r,
        None => {
            errors.error(pos.clone(), format!("include path '{}' escapes its base directory", path))?;
            return Ok(());
        }
    };
    let source = match fs.read(&resolved) {
        Ok(s) => s,
        Err(e) => {
            errors.error(pos.clone(), format!("cannot read '{}': {}", resolved, e))?;
            return Ok(());
        }
    };
    let file: Rc<str> = Rc::from(resolved.as_str());
    let statements = {
        let parser = Parser::new(file.clone(), &source, errors);
        parser.parse()?
    };
    let new_id = state.docs.len();
    state.docs.push(Document {
        id: new_id,
        file,
        statements: Rc::new(statements),
        parent: Some(including_doc),
        include_map: HashMap::new(),
    });
    let body = Rc::clone(&state.docs[new_id].statements);
    let mut local = LocalScope::default();
    for stmt in body.iter() {
        match stmt {
            Statement::LabelDef { name, pos } => register_label(name, pos, new_id, &mut local, &mut state.global, errors)?,
            Statement::ExpressionMacroDef { name, params, body, pos } => {
                let m = crate::asm::ast::ExpressionMacroDef { params: params.clone(), body: body.clone() };
                register_expr_macro(name, m, pos, &mut local, &mut state.global, errors)?;
            }
            Statement::InstructionMacroDef { name, params, body, pos } => {
                let m = InstructionMacroDef { params: params.clone(), body: Rc::clone(body), defined_in: new_id };
                register_instr_macro(name, m, pos, &mut local, &mut state.global, errors)?;
            }
            Statement::Bytes { label: Some(lbl), value, pos } => {
                register_label(&Name::dotted(lbl.clone()), pos, new_id, &mut local, &mut state.global, errors)?;
                let m = crate::asm::ast::ExpressionMacroDef { params: Vec::new(), body: value.clone() };
                register_expr_macro(lbl, m, pos, &mut local, &mut state.global, errors)?;
            }
            _ => {}
        }
    }
    state.locals.insert(new_id, local);
    expand_document(new_id, frame, state, fs, max_include_depth, errors, depth, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::fs::MemoryFileSystem;
    use crate::asm::loader::Loader;

    fn run(files: &[(&str, &str)], entry: &str) -> (ExpandedProgram, ErrorList) {
        let mut fs = MemoryFileSystem::new();
        for (path, contents) in files {
            fs.add(*path, *contents);
        }
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let loaded = loader.load(entry, &mut errors).unwrap();
        let expanded = expand(loaded, &fs, 16, &mut errors).unwrap();
        (expanded, errors)
    }

    #[test]
    fn flat_program_has_one_instr_per_statement() {
        let (prog, errors) = run(&[("a.easm", "start:\n  add\n  sub\n")], "a.easm");
        assert!(!errors.failed());
        assert_eq!(prog.instrs.len(), 3);
    }

    #[test]
    fn instruction_macro_call_inlines_its_body() {
        let src = "#define %twice() {\n  add\n  add\n}\n%twice()\n";
        let (prog, errors) = run(&[("a.easm", src)], "a.easm");
        assert!(!errors.failed());
        assert_eq!(prog.instrs.len(), 2);
    }

    #[test]
    fn second_macro_invocation_of_a_global_label_is_a_duplicate() {
        let src = "#define %once() {\n  Start:\n  add\n}\n%once()\n%once()\n";
        let (_, errors) = run(&[("a.easm", src)], "a.easm");
        // The macro body is cloned fresh per call (fresh `DocId`), but
        // `Start` is global, so it is registered into the one shared
        // `GlobalScope` both times — the second call collides. This is
        // exactly the "macro hygiene" rule: the duplicate only surfaces
        // once the macro is actually invoked a second time, not at
        // definition time.
        assert!(errors.failed());
    }

    #[test]
    fn single_invocation_of_a_global_label_is_fine() {
        let src = "#define %once() {\n  Start:\n  add\n}\n%once()\n";
        let (_, errors) = run(&[("a.easm", src)], "a.easm");
        assert!(!errors.failed());
    }

    #[test]
    fn unknown_macro_call_is_reported() {
        let (_, errors) = run(&[("a.easm", "%nope()\n")], "a.easm");
        assert!(errors.failed());
    }

    #[test]
    fn direct_instruction_macro_recursion_is_reported_immediately() {
        let src = "#define %loop() {\n  %loop()\n}\n%loop()\n";
        let (_, errors) = run(&[("a.easm", src)], "a.easm");
        assert!(errors.failed());
    }

    #[test]
    fn pragma_target_in_an_included_file_is_illegal() {
        let src = "#include \"b.easm\"\n";
        let inc = "#pragma target \"berlin\"\n";
        let (_, errors) = run(&[("a.easm", src), ("b.easm", inc)], "a.easm");
        assert!(errors.failed());
    }

    #[test]
    fn pragma_target_in_the_root_document_is_recorded() {
        let (prog, errors) = run(&[("a.easm", "#pragma target \"berlin\"\nadd\n")], "a.easm");
        assert!(!errors.failed());
        assert_eq!(prog.pragma_target.as_ref().map(|(f, _)| f.as_str()), Some("berlin"));
    }
}
