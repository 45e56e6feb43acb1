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

use crate::asm::ast::{DocId, Name};
use crate::asm::error::{Abort, ErrorList};
use crate::asm::evaluator::{Environment, LabelLookup, LabelResolution};
use crate::asm::expander::{ExpandedProgram, Instr};
use crate::fork::Fork;

/// The maximum number of fixpoint passes before giving up (§ "variable-push
/// fixpoint", mirrored from the teacher's `evm/assembler/codegen.rs` label
/// offset loop). Each pass can only grow a push's committed size, so this
/// many passes is always enough for the largest possible single jump from
/// 1 byte to 32 bytes.
pub const MAX_FIXPOINT_ITERATIONS: usize = 32;

pub struct Layout {
    pub pcs: Vec<i64>,
    pub sizes: Vec<usize>,
}

pub struct LabelTable {
    local: HashMap<(DocId, String, bool), i64>,
    global: HashMap<String, i64>,
}

/// Rebuilds the label-to-PC table from a converged [`Layout`], for reuse by
/// the emitter's final evaluation pass.
pub fn label_table(prog: &ExpandedProgram, layout: &Layout) -> LabelTable {
    let mut table = LabelTable { local: HashMap::new(), global: HashMap::new() };
    for (i, instr) in prog.instrs.iter().enumerate() {
        if let Instr::Label { name, doc, .. } = instr {
            if name.is_global() {
                table.global.insert(name.text.clone(), layout.pcs[i]);
            } else {
                table.local.insert((*doc, name.text.clone(), name.dotted), layout.pcs[i]);
            }
        }
    }
    table
}

impl LabelLookup for LabelTable {
    fn resolve(&self, doc: DocId, name: &Name) -> LabelResolution {
        if name.is_global() {
            match self.global.get(&name.text) {
                Some(pc) => LabelResolution::Resolved(*pc),
                None => LabelResolution::Undefined,
            }
        } else {
            match self.local.get(&(doc, name.text.clone(), name.dotted)) {
                Some(pc) => LabelResolution::Resolved(*pc),
                None => {
                    if self.local.contains_key(&(doc, name.text.clone(), !name.dotted)) {
                        LabelResolution::DottedMismatch
                    } else {
                        LabelResolution::Undefined
                    }
                }
            }
        }
    }
}

/// Runs the PC-assignment / variable-push-sizing fixpoint (C6). A push
/// instruction's committed size only ever grows between passes — this is
/// what guarantees convergence, since a growing push can only push labels
/// further away, never closer, so sizes form a monotonically non-decreasing
/// sequence bounded by 32 bytes.
pub fn layout<'e>(
    prog: &'e ExpandedProgram,
    fork: Fork,
    assemble: Option<&'e dyn Fn(&str, &mut ErrorList) -> Result<Vec<u8>, Abort>>,
    errors: &mut ErrorList,
) -> Result<Layout, Abort> {
    let n = prog.instrs.len();
    let mut committed = vec![0usize; n];
    let mut pcs = vec![0i64; n];
    let mut converged = false;

    for _ in 0..MAX_FIXPOINT_ITERATIONS {
        let mut pc: i64 = 0;
        for (i, size) in committed.iter().enumerate() {
            pcs[i] = pc;
            pc += *size as i64;
        }

        let mut table = LabelTable { local: HashMap::new(), global: HashMap::new() };
        for (i, instr) in prog.instrs.iter().enumerate() {
            if let Instr::Label { name, doc, .. } = instr {
                if name.is_global() {
                    table.global.insert(name.text.clone(), pcs[i]);
                } else {
                    table.local.insert((*doc, name.text.clone(), name.dotted), pcs[i]);
                }
            }
        }

        let reached = RefCell::new(HashSet::new());
        let active_expr_macros = RefCell::new(HashSet::new());
        let mut changed = false;
        for (i, instr) in prog.instrs.iter().enumerate() {
            let needed = instruction_size(instr, prog, &table, &reached, &active_expr_macros, fork, assemble, errors)?;
            if needed > committed[i] {
                committed[i] = needed;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
    }

    if !converged {
        errors.warning(
            crate::asm::error::Position::new(std::rc::Rc::from("<layout>"), 0),
            "variable-width push layout did not converge within the iteration budget",
        );
    }

    // One final pass to make sure `pcs` reflects the fully-committed sizes.
    let mut pc: i64 = 0;
    for (i, size) in committed.iter().enumerate() {
        pcs[i] = pc;
        pc += *size as i64;
    }

    Ok(Layout { pcs, sizes: committed })
}

#[allow(clippy::too_many_arguments)]
fn instruction_size(
    instr: &Instr,
    prog: &ExpandedProgram,
    table: &LabelTable,
    reached: &RefCell<HashSet<(DocId, String, bool)>>,
    active_expr_macros: &RefCell<HashSet<usize>>,
    fork: Fork,
    assemble: Option<&dyn Fn(&str, &mut ErrorList) -> Result<Vec<u8>, Abort>>,
    errors: &mut ErrorList,
) -> Result<usize, Abort> {
    match instr {
        Instr::Label { .. } => Ok(0),
        Instr::Op { immediates, .. } => Ok(1 + immediates.len()),
        Instr::Push { value, doc, frame, pos } => {
            let env = Environment {
                doc: *doc,
                locals: &prog.locals,
                global: &prog.global,
                frame: frame.clone(),
                labels: table,
                reached,
                active_expr_macros,
                assemble,
            };
            let v = env.eval(value, errors)?;
            if v.is_negative() {
                errors.error(pos.clone(), "cannot push a negative value")?;
                return Ok(1);
            }
            if v.to_int() == num_bigint::BigInt::from(0) && fork.supports_push0() {
                return Ok(1);
            }
            let blen = match v.byte_len() {
                Ok(n) => n,
                Err(e) => {
                    errors.error(pos.clone(), e.to_string())?;
                    0
                }
            };
            if blen > 32 {
                errors.error(pos.clone(), "value is too large to push (more than 32 bytes)")?;
                return Ok(33);
            }
            Ok(1 + blen.max(1))
        }
        Instr::PushExplicit { size, value, doc, frame, pos } => {
            let env = Environment {
                doc: *doc,
                locals: &prog.locals,
                global: &prog.global,
                frame: frame.clone(),
                labels: table,
                reached,
                active_expr_macros,
                assemble,
            };
            let v = env.eval(value, errors)?;
            if v.is_negative() {
                errors.error(pos.clone(), "cannot push a negative value")?;
                return Ok(1 + *size as usize);
            }
            let blen = match v.byte_len() {
                Ok(n) => n,
                Err(e) => {
                    errors.error(pos.clone(), e.to_string())?;
                    0
                }
            };
            if blen > *size as usize {
                errors.error(pos.clone(), format!("value does not fit in {} byte(s) of 'push{}'", size, size))?;
            }
            Ok(1 + *size as usize)
        }
        Instr::Bytes { value, doc, frame, pos } => {
            let env = Environment {
                doc: *doc,
                locals: &prog.locals,
                global: &prog.global,
                frame: frame.clone(),
                labels: table,
                reached,
                active_expr_macros,
                assemble,
            };
            let v = env.eval(value, errors)?;
            match v.byte_len() {
                Ok(n) => Ok(n),
                Err(e) => {
                    errors.error(pos.clone(), e.to_string())?;
                    Ok(0)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::expander::expand;
    use crate::asm::fs::MemoryFileSystem;
    use crate::asm::loader::Loader;

    fn build(src: &str) -> (Layout, ErrorList) {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", src);
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let loaded = loader.load("a.easm", &mut errors).unwrap();
        let prog = expand(loaded, &fs, 16, &mut errors).unwrap();
        let out = layout(&prog, Fork::SHANGHAI, None, &mut errors).unwrap();
        (out, errors)
    }

    #[test]
    fn fixed_opcodes_are_one_byte() {
        let (l, errors) = build("add\nsub\n");
        assert!(!errors.failed());
        assert_eq!(l.sizes, vec![1, 1]);
        assert_eq!(l.pcs, vec![0, 1]);
    }

    #[test]
    fn small_push_is_two_bytes() {
        let (l, errors) = build("push 1\n");
        assert!(!errors.failed());
        assert_eq!(l.sizes, vec![2]);
    }

    #[test]
    fn push_zero_uses_push0_on_shanghai() {
        let (l, errors) = build("push 0\n");
        assert!(!errors.failed());
        assert_eq!(l.sizes, vec![1]);
    }

    #[test]
    fn forward_label_reference_converges() {
        let (l, errors) = build("push @end\nadd\nend:\n  stop\n");
        assert!(!errors.failed());
        // push(2) + add(1) = pc 3 at `end`.
        assert_eq!(l.pcs[2], 3);
    }

    #[test]
    fn label_marker_contributes_zero_size() {
        let (l, _) = build("start:\n  add\n");
        assert_eq!(l.sizes[0], 0);
    }
}
