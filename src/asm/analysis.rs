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
use std::collections::HashSet;

use crate::asm::ast::DocId;
use crate::asm::error::ErrorList;
use crate::asm::evaluator::Environment;
use crate::asm::expander::{ExpandedProgram, Instr};
use crate::asm::layout::{label_table, Layout};
use crate::instruction_set::{InstructionSet, TERMINAL_OPCODES};

/// Post-emission diagnostics (C8): unused labels and dead code after an
/// unconditional exit. Neither condition aborts compilation; both are
/// reported as warnings so a clean build can still fail a stricter CI
/// check on warnings without losing the emitted bytecode.
pub fn analyze(prog: &ExpandedProgram, layout: &Layout, instructions: &dyn InstructionSet, errors: &mut ErrorList) {
    warn_unused_labels(prog, layout, instructions, errors);
    warn_unreachable_after_terminal(prog, instructions, errors);
}

/// Re-evaluates every instruction once more, purely to observe which
/// `LabelRef`s get touched, then reports any label definition that was
/// never the target of a reference anywhere in the program. A label is
/// "used" if at least one reachable evaluation touched it; this pass
/// doesn't attempt to also determine whether the referencing code itself
/// is reachable, that's a separate (best-effort) pass below.
fn warn_unused_labels(prog: &ExpandedProgram, layout: &Layout, instructions: &dyn InstructionSet, errors: &mut ErrorList) {
    let table = label_table(prog, layout);
    let reached: RefCell<HashSet<(DocId, String, bool)>> = RefCell::new(HashSet::new());
    let active_expr_macros: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
    let mut scratch = ErrorList::new(usize::MAX);

    for instr in &prog.instrs {
        let (doc, value, frame) = match instr {
            Instr::Op { doc, immediates, frame, .. } => {
                let env = env_for(prog, *doc, frame.clone(), &table, &reached, &active_expr_macros);
                for imm in immediates {
                    let _ = env.eval(imm, &mut scratch);
                }
                continue;
            }
            Instr::Push { value, doc, frame, .. } => (*doc, value, frame.clone()),
            Instr::PushExplicit { value, doc, frame, .. } => (*doc, value, frame.clone()),
            Instr::Bytes { value, doc, frame, .. } => (*doc, value, frame.clone()),
            Instr::Label { .. } => continue,
        };
        let env = env_for(prog, doc, frame, &table, &reached, &active_expr_macros);
        let _ = env.eval(value, &mut scratch);
    }

    let reached = reached.into_inner();
    for instr in &prog.instrs {
        if let Instr::Label { name, doc, pos } = instr {
            if !reached.contains(&(*doc, name.text.clone(), name.dotted)) {
                errors.warning(pos.clone(), format!("label '{}' is never referenced", name.text));
            }
        }
    }
    let _ = instructions;
}

fn env_for<'a>(
    prog: &'a ExpandedProgram,
    doc: DocId,
    frame: Option<std::rc::Rc<crate::asm::evaluator::Frame>>,
    table: &'a crate::asm::layout::LabelTable,
    reached: &'a RefCell<HashSet<(DocId, String, bool)>>,
    active_expr_macros: &'a RefCell<HashSet<usize>>,
) -> Environment<'a> {
    Environment { doc, locals: &prog.locals, global: &prog.global, frame, labels: table, reached, active_expr_macros, assemble: None }
}

/// Flags any instruction directly following a [`TERMINAL_OPCODES`] member
/// (other than a label, which may still be a valid jump target even though
/// nothing falls into it). Mirrors the teacher's dead-code checks in spirit
/// but works on the flattened (post-macro-expansion) instruction stream, so
/// it sees exactly what's about to be emitted rather than the pre-expansion
/// source.
fn warn_unreachable_after_terminal(prog: &ExpandedProgram, instructions: &dyn InstructionSet, errors: &mut ErrorList) {
    let mut terminated = false;
    for instr in &prog.instrs {
        match instr {
            Instr::Label { .. } => {
                // A label always restores reachability: it's a valid jump
                // target regardless of what preceded it.
                terminated = false;
            }
            Instr::Op { name, pos, .. } => {
                if terminated {
                    errors.warning(pos.clone(), format!("instruction '{}' is unreachable", name));
                }
                if let Some(op) = instructions.encode(name) {
                    terminated = TERMINAL_OPCODES.contains(&op);
                } else {
                    terminated = false;
                }
            }
            Instr::Push { pos, .. } => {
                if terminated {
                    errors.warning(pos.clone(), "push is unreachable");
                }
                terminated = false;
            }
            Instr::PushExplicit { pos, .. } => {
                if terminated {
                    errors.warning(pos.clone(), "push is unreachable");
                }
                terminated = false;
            }
            Instr::Bytes { pos, .. } => {
                if terminated {
                    errors.warning(pos.clone(), "data is unreachable");
                }
                terminated = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::emitter::emit;
    use crate::asm::expander::expand;
    use crate::asm::fs::MemoryFileSystem;
    use crate::asm::layout::layout;
    use crate::asm::loader::Loader;
    use crate::fork::Fork;
    use crate::instruction_set::DefaultInstructionSet;

    fn build(src: &str) -> ErrorList {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", src);
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let loaded = loader.load("a.easm", &mut errors).unwrap();
        let prog = expand(loaded, &fs, 16, &mut errors).unwrap();
        let l = layout(&prog, Fork::SHANGHAI, None, &mut errors).unwrap();
        let instructions = DefaultInstructionSet::new(Fork::SHANGHAI);
        let _ = emit(&prog, &l, &instructions, Fork::SHANGHAI, None, &mut errors).unwrap();
        analyze(&prog, &l, &instructions, &mut errors);
        errors
    }

    #[test]
    fn unreferenced_label_warns() {
        let errors = build("loop:\n  stop\n");
        assert!(!errors.failed());
        assert_eq!(errors.warnings().count(), 1);
    }

    #[test]
    fn referenced_label_does_not_warn() {
        let errors = build("push @loop\nloop:\n  stop\n");
        assert_eq!(errors.warnings().count(), 0);
    }

    #[test]
    fn code_after_stop_is_unreachable() {
        let errors = build("stop\nadd\n");
        assert_eq!(errors.warnings().count(), 1);
    }

    #[test]
    fn label_after_stop_restores_reachability() {
        let errors = build("jump @end\nstop\nend:\n  add\n");
        assert_eq!(errors.warnings().count(), 0);
    }
}
