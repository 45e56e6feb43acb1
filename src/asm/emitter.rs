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

use crate::asm::error::{Abort, ErrorList};
use crate::asm::evaluator::Environment;
use crate::asm::expander::{ExpandedProgram, Instr};
use crate::asm::layout::{label_table, Layout};
use crate::fork::Fork;
use crate::instruction_set::InstructionSet;

/// Emits final bytes from a converged [`Layout`] (C7). Re-evaluates every
/// expression exactly once more against the now-stable label table; since
/// layout already converged, every push's size matches what was committed
/// and this pass cannot disagree with it.
pub fn emit(
    prog: &ExpandedProgram,
    layout: &Layout,
    instructions: &dyn InstructionSet,
    fork: Fork,
    assemble: Option<&dyn Fn(&str, &mut ErrorList) -> Result<Vec<u8>, Abort>>,
    errors: &mut ErrorList,
) -> Result<Vec<u8>, Abort> {
    let table = label_table(prog, layout);
    let reached = RefCell::new(HashSet::new());
    let active_expr_macros = RefCell::new(HashSet::new());
    let mut out = Vec::with_capacity(layout.pcs.last().map(|pc| *pc as usize + 1).unwrap_or(0));

    for (i, instr) in prog.instrs.iter().enumerate() {
        let before = out.len();
        match instr {
            Instr::Label { .. } => {}
            Instr::Op { name, immediates, doc, frame, pos } => {
                let opcode = match instructions.encode(name) {
                    Some(b) => b,
                    None => {
                        errors.error(pos.clone(), format!("unknown or fork-gated opcode '{}'", name))?;
                        0
                    }
                };
                out.push(opcode);
                let env = Environment {
                    doc: *doc,
                    locals: &prog.locals,
                    global: &prog.global,
                    frame: frame.clone(),
                    labels: &table,
                    reached: &reached,
                    active_expr_macros: &active_expr_macros,
                    assemble,
                };
                for imm in immediates {
                    use num_traits::ToPrimitive;
                    let v = env.eval(imm, errors)?;
                    let byte = (v.to_int() & num_bigint::BigInt::from(0xff)).to_u8().unwrap_or(0);
                    out.push(byte);
                }
            }
            Instr::Push { value, doc, frame, pos } => {
                let env = Environment {
                    doc: *doc,
                    locals: &prog.locals,
                    global: &prog.global,
                    frame: frame.clone(),
                    labels: &table,
                    reached: &reached,
                    active_expr_macros: &active_expr_macros,
                    assemble,
                };
                let v = env.eval(value, errors)?;
                if v.is_negative() {
                    errors.error(pos.clone(), "cannot push a negative value")?;
                    continue;
                }
                if v.to_int() == num_bigint::BigInt::from(0) && fork.supports_push0() {
                    out.push(crate::evm::opcode::PUSH0);
                } else {
                    let bytes = match v.to_bytes() {
                        Ok(b) => b,
                        Err(e) => {
                            errors.error(pos.clone(), e.to_string())?;
                            Vec::new()
                        }
                    };
                    let width = bytes.len().max(1);
                    out.push(crate::evm::opcode::PUSH1 + (width as u8 - 1));
                    let pad = width - bytes.len();
                    out.extend(std::iter::repeat(0u8).take(pad));
                    out.extend(bytes);
                }
            }
            Instr::PushExplicit { size, value, doc, frame, pos } => {
                let env = Environment {
                    doc: *doc,
                    locals: &prog.locals,
                    global: &prog.global,
                    frame: frame.clone(),
                    labels: &table,
                    reached: &reached,
                    active_expr_macros: &active_expr_macros,
                    assemble,
                };
                let v = env.eval(value, errors)?;
                out.push(crate::evm::opcode::PUSH1 + (*size - 1));
                if v.is_negative() {
                    errors.error(pos.clone(), "cannot push a negative value")?;
                    out.extend(std::iter::repeat(0u8).take(*size as usize));
                    continue;
                }
                let bytes = match v.to_bytes() {
                    Ok(b) => b,
                    Err(e) => {
                        errors.error(pos.clone(), e.to_string())?;
                        Vec::new()
                    }
                };
                let size = *size as usize;
                if bytes.len() > size {
                    errors.error(pos.clone(), format!("value does not fit in {} byte(s) of 'push{}'", size, size))?;
                    out.extend_from_slice(&bytes[bytes.len() - size..]);
                } else {
                    out.extend(std::iter::repeat(0u8).take(size - bytes.len()));
                    out.extend(bytes);
                }
            }
            Instr::Bytes { value, doc, frame, pos } => {
                let env = Environment {
                    doc: *doc,
                    locals: &prog.locals,
                    global: &prog.global,
                    frame: frame.clone(),
                    labels: &table,
                    reached: &reached,
                    active_expr_macros: &active_expr_macros,
                    assemble,
                };
                let v = env.eval(value, errors)?;
                match v.to_bytes() {
                    Ok(b) => out.extend(b),
                    Err(e) => {
                        errors.error(pos.clone(), e.to_string())?;
                    }
                }
            }
        }
        let emitted = out.len() - before;
        if emitted != layout.sizes[i] {
            errors.error(
                instr.pos().clone(),
                format!("internal error: layout committed {} byte(s) but emission produced {}", layout.sizes[i], emitted),
            )?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::expander::expand;
    use crate::asm::fs::MemoryFileSystem;
    use crate::asm::layout::layout;
    use crate::asm::loader::Loader;
    use crate::instruction_set::DefaultInstructionSet;

    fn build(src: &str) -> (Vec<u8>, ErrorList) {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", src);
        let mut errors = ErrorList::new(32);
        let loader = Loader::new(&fs, 16);
        let loaded = loader.load("a.easm", &mut errors).unwrap();
        let prog = expand(loaded, &fs, 16, &mut errors).unwrap();
        let l = layout(&prog, Fork::SHANGHAI, None, &mut errors).unwrap();
        let instructions = DefaultInstructionSet::new(Fork::SHANGHAI);
        let bytes = emit(&prog, &l, &instructions, Fork::SHANGHAI, None, &mut errors).unwrap();
        (bytes, errors)
    }

    #[test]
    fn emits_add_sub() {
        let (bytes, errors) = build("add\nsub\n");
        assert!(!errors.failed());
        assert_eq!(bytes, vec![crate::evm::opcode::ADD, crate::evm::opcode::SUB]);
    }

    #[test]
    fn emits_push1_with_value() {
        let (bytes, errors) = build("push 5\n");
        assert!(!errors.failed());
        assert_eq!(bytes, vec![crate::evm::opcode::PUSH1, 5]);
    }

    #[test]
    fn emits_push0_for_literal_zero() {
        let (bytes, errors) = build("push 0\n");
        assert!(!errors.failed());
        assert_eq!(bytes, vec![crate::evm::opcode::PUSH0]);
    }

    #[test]
    fn label_produces_no_bytes_but_resolves_to_correct_pc() {
        let (bytes, errors) = build("push @end\nend:\n  stop\n");
        assert!(!errors.failed());
        assert_eq!(bytes, vec![crate::evm::opcode::PUSH1, 2, crate::evm::opcode::STOP]);
    }

    #[test]
    fn explicit_push_keeps_its_declared_size_even_when_the_value_is_small() {
        let (bytes, errors) = build("push2 1\n");
        assert!(!errors.failed());
        assert_eq!(bytes, vec![crate::evm::opcode::PUSH2, 0, 1]);
    }

    #[test]
    fn explicit_push_preserves_a_leading_zero_hex_literal() {
        let (bytes, errors) = build("push4 0x00ff\n");
        assert!(!errors.failed());
        assert_eq!(bytes, vec![crate::evm::opcode::PUSH4, 0, 0, 0, 0xff]);
    }

    #[test]
    fn explicit_push_overflow_is_reported() {
        let (_, errors) = build("push1 0x1234\n");
        assert!(errors.failed());
    }
}
