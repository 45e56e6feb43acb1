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

use crate::asm::ast::{Document, DocId, Expression, ExpressionMacroDef, InstructionMacroDef, Name, Statement};
use crate::asm::error::{Abort, ErrorList, Position};
use crate::asm::fs::{resolve_include, FileSystem};
use crate::asm::parser::Parser;

/// Where a global label was defined, for duplicate detection and for the
/// expander to later look up its instantiated program counter.
#[derive(Debug, Clone)]
pub struct GlobalLabelEntry {
    pub doc: DocId,
    pub pos: Position,
}

/// Names visible everywhere in the compilation (uppercase-first labels and
/// macros). Populated eagerly by the loader for every document reached
/// without passing through an instruction-macro body; documents reached
/// only via a macro body register their globals lazily, once per
/// expansion, in [`crate::asm::expander`].
#[derive(Debug, Default)]
pub struct GlobalScope {
    pub labels: HashMap<String, GlobalLabelEntry>,
    pub expr_macros: HashMap<String, ExpressionMacroDef>,
    pub instr_macros: HashMap<String, InstructionMacroDef>,
}

/// Names visible only within one document (lowercase-first labels and
/// macros, plus every dotted name regardless of case). Include scopes are
/// siblings, not children, so a local name from one file is never visible
/// while parsing or expanding a different file.
#[derive(Debug, Default)]
pub struct LocalScope {
    pub labels: HashSet<Name>,
    pub expr_macros: HashMap<String, ExpressionMacroDef>,
    pub instr_macros: HashMap<String, InstructionMacroDef>,
}

pub struct LoadedProgram {
    pub docs: Vec<Document>,
    pub locals: HashMap<DocId, LocalScope>,
    pub global: GlobalScope,
    pub root: DocId,
}

fn is_global_name(name: &str) -> bool {
    name.chars().next().map_or(false, |c| c.is_uppercase())
}

/// Builds the eagerly-reachable document tree (C3): the entry file and
/// everything pulled in by a chain of `#include`s that never passes
/// through an instruction-macro body. `#assemble` targets are independent
/// sub-compilations and are resolved later, by the expander, rather than
/// merged into this tree's scope.
pub struct Loader<'fs> {
    fs: &'fs dyn FileSystem,
    max_include_depth: usize,
}

struct LoadState {
    docs: Vec<Document>,
    locals: HashMap<DocId, LocalScope>,
    global: GlobalScope,
}

impl<'fs> Loader<'fs> {
    pub fn new(fs: &'fs dyn FileSystem, max_include_depth: usize) -> Self {
        Loader { fs, max_include_depth }
    }

    pub fn load(&self, entry_path: &str, errors: &mut ErrorList) -> Result<LoadedProgram, Abort> {
        let mut state = LoadState { docs: Vec::new(), locals: HashMap::new(), global: GlobalScope::default() };
        let entry_pos = Position::new(Rc::from(entry_path), 0);
        let root = self.load_document(entry_path, None, 0, entry_pos, errors, &mut state)?;
        Ok(LoadedProgram { docs: state.docs, locals: state.locals, global: state.global, root })
    }

    fn load_document(
        &self,
        path: &str,
        parent: Option<DocId>,
        depth: usize,
        blame: Position,
        errors: &mut ErrorList,
        state: &mut LoadState,
    ) -> Result<DocId, Abort> {
        if depth > self.max_include_depth {
            errors.error(blame, "include depth exceeded")?;
            return Ok(self.push_empty_document(path, parent, state));
        }
        let source = match self.fs.read(path) {
            Ok(s) => s,
            Err(e) => {
                errors.error(blame, format!("cannot read '{}': {}", path, e))?;
                return Ok(self.push_empty_document(path, parent, state));
            }
        };
        let file: Rc<str> = Rc::from(path);
        let statements = {
            let parser = Parser::new(file.clone(), &source, errors);
            parser.parse()?
        };
        let id = state.docs.len();
        state.docs.push(Document { id, file, statements: Rc::new(statements), parent, include_map: HashMap::new() });
        let mut local = LocalScope::default();

        let doc_statements = Rc::clone(&state.docs[id].statements);
        for (idx, stmt) in doc_statements.iter().enumerate() {
            match stmt {
                Statement::LabelDef { name, pos } => {
                    register_label(name, pos, id, &mut local, &mut state.global, errors)?;
                }
                Statement::ExpressionMacroDef { name, params, body, pos } => {
                    let def = ExpressionMacroDef { params: params.clone(), body: body.clone() };
                    register_expr_macro(name, def, pos, &mut local, &mut state.global, errors)?;
                }
                Statement::InstructionMacroDef { name, params, body, pos } => {
                    let def = InstructionMacroDef { params: params.clone(), body: Rc::clone(body), defined_in: id };
                    register_instr_macro(name, def, pos, &mut local, &mut state.global, errors)?;
                }
                Statement::Include { path: inc, pos } => match resolve_include(path, inc) {
                    Some(resolved) => {
                        let child = self.load_document(&resolved, Some(id), depth + 1, pos.clone(), errors, state)?;
                        state.docs[id].include_map.insert(idx, child);
                    }
                    None => {
                        errors.error(pos.clone(), format!("include path '{}' escapes its base directory", inc))?;
                    }
                },
                // `#assemble` embeds the bytes of an independent sub-compilation;
                // it does not extend this document's lexical scope, so it is
                // left for the expander/builtins stage to resolve.
                Statement::Assemble { .. } => {}
                Statement::Bytes { label: Some(lbl), value, pos } => {
                    register_label(&Name::dotted(lbl.clone()), pos, id, &mut local, &mut state.global, errors)?;
                    let def = ExpressionMacroDef { params: Vec::new(), body: value.clone() };
                    register_expr_macro(lbl, def, pos, &mut local, &mut state.global, errors)?;
                }
                _ => {}
            }
        }

        state.locals.insert(id, local);
        Ok(id)
    }

    fn push_empty_document(&self, path: &str, parent: Option<DocId>, state: &mut LoadState) -> DocId {
        let id = state.docs.len();
        state.docs.push(Document {
            id,
            file: Rc::from(path),
            statements: Rc::new(Vec::new()),
            parent,
            include_map: HashMap::new(),
        });
        state.locals.insert(id, LocalScope::default());
        id
    }
}

pub(crate) fn register_label(
    name: &Name,
    pos: &Position,
    doc: DocId,
    local: &mut LocalScope,
    global: &mut GlobalScope,
    errors: &mut ErrorList,
) -> Result<(), Abort> {
    if name.is_global() {
        if global.labels.contains_key(&name.text) {
            errors.error(pos.clone(), format!("duplicate global label '{}'", name.text))?;
        } else {
            global.labels.insert(name.text.clone(), GlobalLabelEntry { doc, pos: pos.clone() });
        }
    } else if !local.labels.insert(name.clone()) {
        errors.error(pos.clone(), format!("duplicate label '{}' in this document", name.text))?;
    }
    Ok(())
}

pub(crate) fn register_expr_macro(
    name: &str,
    def: ExpressionMacroDef,
    pos: &Position,
    local: &mut LocalScope,
    global: &mut GlobalScope,
    errors: &mut ErrorList,
) -> Result<(), Abort> {
    if is_global_name(name) {
        if global.expr_macros.contains_key(name) {
            errors.error(pos.clone(), format!("duplicate macro '{}'", name))?;
        } else {
            global.expr_macros.insert(name.to_string(), def);
        }
    } else if local.expr_macros.insert(name.to_string(), def).is_some() {
        errors.error(pos.clone(), format!("duplicate macro '{}' in this document", name))?;
    }
    Ok(())
}

pub(crate) fn register_instr_macro(
    name: &str,
    def: InstructionMacroDef,
    pos: &Position,
    local: &mut LocalScope,
    global: &mut GlobalScope,
    errors: &mut ErrorList,
) -> Result<(), Abort> {
    if is_global_name(name) {
        if global.instr_macros.contains_key(name) {
            errors.error(pos.clone(), format!("duplicate instruction macro '{}'", name))?;
        } else {
            global.instr_macros.insert(name.to_string(), def);
        }
    } else if local.instr_macros.insert(name.to_string(), def).is_some() {
        errors.error(pos.clone(), format!("duplicate instruction macro '{}' in this document", name))?;
    }
    Ok(())
}

/// Installs embedding-caller global overrides (§3 "External globals") into
/// an already-loaded program's global scope, after the loader has finished
/// registering every name reached from the entry file. Each override
/// replaces any same-named global expression macro with a zero-parameter
/// literal; if the macro it replaces took parameters, a warning is raised
/// naming the discarded arity so a caller overriding e.g. `Fee($x)` notices
/// its parameter is now ignored.
pub fn apply_global_overrides(
    global: &mut GlobalScope,
    overrides: &[(String, crate::numeric::Value)],
    errors: &mut ErrorList,
) {
    for (name, value) in overrides {
        let pos = Position::new(Rc::from("<override>"), 0);
        if let Some(prev) = global.expr_macros.get(name) {
            if !prev.params.is_empty() {
                errors.warning(pos, format!("global override for '{}' discards its {} parameter(s)", name, prev.params.len()));
            }
        }
        let literal = ExpressionMacroDef { params: Vec::new(), body: Expression::Number(value.clone()) };
        global.expr_macros.insert(name.clone(), literal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::fs::MemoryFileSystem;

    #[test]
    fn loads_single_file_with_no_includes() {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", "start:\n  add\n");
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let prog = loader.load("a.easm", &mut errors).unwrap();
        assert!(!errors.failed());
        assert_eq!(prog.docs.len(), 1);
    }

    #[test]
    fn follows_includes_into_the_tree() {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", "#include \"b.easm\"\nadd\n");
        fs.add("b.easm", "sub\n");
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let prog = loader.load("a.easm", &mut errors).unwrap();
        assert!(!errors.failed());
        assert_eq!(prog.docs.len(), 2);
    }

    #[test]
    fn missing_include_is_an_error_not_a_panic() {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", "#include \"missing.easm\"\n");
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let _ = loader.load("a.easm", &mut errors).unwrap();
        assert!(errors.failed());
    }

    #[test]
    fn local_label_registers_per_document() {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", "loop:\n  jump @loop\n");
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let prog = loader.load("a.easm", &mut errors).unwrap();
        assert!(prog.locals[&prog.root].labels.contains(&Name::plain("loop")));
    }

    #[test]
    fn duplicate_global_label_across_includes_is_an_error() {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", "#include \"b.easm\"\n#include \"c.easm\"\n");
        fs.add("b.easm", "Start:\n  add\n");
        fs.add("c.easm", "Start:\n  sub\n");
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let _ = loader.load("a.easm", &mut errors).unwrap();
        assert!(errors.failed());
    }
}
