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
use crate::asm::analysis::analyze;
use crate::asm::emitter::emit;
use crate::asm::error::{Abort, ErrorList};
use crate::asm::expander::expand;
use crate::asm::fs::{FileSystem, MemoryFileSystem};
use crate::asm::layout::layout;
use crate::asm::loader::{apply_global_overrides, Loader};
use crate::asm::token::lex;
use crate::fork::Fork;
use crate::instruction_set::DefaultInstructionSet;
use crate::numeric::Value;

/// Public entry point (C10): drives the loader, expander, layout fixpoint,
/// emitter and analysis passes over a single entry file, returning the
/// emitted bytecode plus every diagnostic collected along the way. Mirrors
/// the teacher's CLI-facing `Assembly`/`Compiler` split, except the whole
/// pipeline lives behind one type since the macro/include/layout stages
/// aren't independently useful to a caller.
pub struct Compiler {
    fork: Fork,
    max_errors: usize,
    max_include_depth: usize,
    debug_lex: bool,
    globals: Vec<(String, Value)>,
}

/// The result of a (possibly partially-failed) compilation: the bytes
/// produced so far, plus every error and warning collected. `bytes` may be
/// incomplete or empty if compilation aborted early.
pub struct CompileOutput {
    pub bytes: Vec<u8>,
    pub errors: ErrorList,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler { fork: Fork::default(), max_errors: 100, max_include_depth: 64, debug_lex: false, globals: Vec::new() }
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fork(mut self, fork: Fork) -> Self {
        self.fork = fork;
        self
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn with_include_depth_limit(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Trace the token stream of every file read by the lexer via
    /// `log::trace!`, for CLI-driven debugging.
    pub fn with_debug_lex(mut self, debug_lex: bool) -> Self {
        self.debug_lex = debug_lex;
        self
    }

    /// Install a global value override for an uppercase name, replacing any
    /// same-named global expression macro with a zero-parameter literal.
    /// May be called repeatedly to install several overrides.
    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.push((name.into(), value));
        self
    }

    /// Compile `entry_path` as resolved through `fs`, following every
    /// `#include`/`#assemble` it reaches.
    pub fn compile(&self, fs: &dyn FileSystem, entry_path: &str) -> CompileOutput {
        let mut errors = ErrorList::new(self.max_errors);
        if self.debug_lex {
            trace_lex(fs, entry_path);
        }
        let bytes = compile_entry(fs, entry_path, self.fork, self.max_include_depth, self.max_errors, &self.globals, &mut errors)
            .unwrap_or_default();
        CompileOutput { bytes, errors }
    }

    /// Compile a self-contained in-memory source string. An `#include` or
    /// `#assemble` inside `source` is resolved relative to `name` against
    /// an otherwise-empty filesystem, so it only resolves if `name` names
    /// the entry itself (no other files are reachable).
    pub fn compile_string(&self, name: &str, source: &str) -> CompileOutput {
        let mut fs = MemoryFileSystem::new();
        fs.add(name, source);
        self.compile(&fs, name)
    }

    /// Compile a file from the real filesystem, following includes
    /// relative to it.
    pub fn compile_file(&self, path: &str) -> CompileOutput {
        self.compile(&crate::asm::fs::NativeFileSystem, path)
    }
}

/// Runs the full pipeline once and returns its bytes, recursing into itself
/// (through the `assemble` callback passed to [`layout`] and [`emit`]) for
/// every `#assemble "path"` directive encountered. Kept as a free function,
/// rather than a method, so the callback closure can name it directly
/// instead of capturing `self` through a trait object.
fn compile_entry(
    fs: &dyn FileSystem,
    entry_path: &str,
    fork: Fork,
    max_include_depth: usize,
    max_errors: usize,
    globals: &[(String, Value)],
    errors: &mut ErrorList,
) -> Result<Vec<u8>, Abort> {
    let loader = Loader::new(fs, max_include_depth);
    let mut loaded = loader.load(entry_path, errors)?;
    apply_global_overrides(&mut loaded.global, globals, errors);
    let prog = expand(loaded, fs, max_include_depth, errors)?;

    // A root-unit `#pragma target "name"` overrides the configured fork for
    // this document's own layout/emission, but not for nested `#assemble`
    // sub-compilations, which keep using the fork passed in from outside.
    let effective_fork = match &prog.pragma_target {
        Some((name, pos)) => match Fork::by_name(name) {
            Some(f) => f,
            None => {
                errors.error(pos.clone(), format!("unknown fork '{}' named by '#pragma target'", name))?;
                fork
            }
        },
        None => fork,
    };

    let assemble = |path: &str, errors: &mut ErrorList| -> Result<Vec<u8>, Abort> {
        compile_entry(fs, path, fork, max_include_depth, max_errors, globals, errors)
    };

    let computed_layout = layout(&prog, effective_fork, Some(&assemble), errors)?;
    let instructions = DefaultInstructionSet::new(effective_fork);
    let bytes = emit(&prog, &computed_layout, &instructions, effective_fork, Some(&assemble), errors)?;
    analyze(&prog, &computed_layout, &instructions, errors);
    Ok(bytes)
}

/// Emits the raw token stream of `entry_path` (and, best-effort, every
/// file it can read) via `log::trace!`, for `--debug-lex`-style CLI
/// debugging. Lexing is cheap and stateless, so this simply re-lexes
/// independently of the real parse that follows.
fn trace_lex(fs: &dyn FileSystem, entry_path: &str) {
    if let Ok(source) = fs.read(entry_path) {
        for lexeme in lex(&source) {
            log::trace!("{}:{:?}", entry_path, lexeme.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_program() {
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI);
        let out = compiler.compile_string("a.easm", "push 1\npush 2\nadd\n");
        assert!(!out.errors.failed());
        assert_eq!(out.bytes, vec![crate::evm::opcode::PUSH1, 1, crate::evm::opcode::PUSH1, 2, crate::evm::opcode::ADD]);
    }

    #[test]
    fn nested_assemble_embeds_sub_module_bytes() {
        let mut fs = MemoryFileSystem::new();
        fs.add("lib.easm", "add\n");
        fs.add("main.easm", "#assemble \"lib.easm\"\nstop\n");
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI);
        let out = compiler.compile(&fs, "main.easm");
        assert!(!out.errors.failed());
        assert_eq!(out.bytes, vec![crate::evm::opcode::ADD, crate::evm::opcode::STOP]);
    }

    #[test]
    fn unresolvable_include_does_not_panic() {
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI);
        let out = compiler.compile_string("a.easm", "#include \"missing.easm\"\n");
        assert!(out.errors.failed());
    }

    #[test]
    fn global_override_replaces_a_zero_arity_macro() {
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI).with_global("Fee", Value::from_i64(7));
        let out = compiler.compile_string("a.easm", "#define Fee() = 1\npush Fee()\n");
        assert!(!out.errors.failed());
        assert_eq!(out.bytes, vec![crate::evm::opcode::PUSH1, 7]);
    }

    #[test]
    fn global_override_of_a_parameterized_macro_warns() {
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI).with_global("Fee", Value::from_i64(7));
        let out = compiler.compile_string("a.easm", "#define Fee($x) = $x\npush 1\n");
        assert!(out.errors.warnings().count() >= 1);
    }

    #[test]
    fn pragma_target_overrides_the_configured_fork() {
        // Berlin predates PUSH0 (EIP-3855), so `push 0` must fall back to a
        // regular PUSH1 encoding even though the compiler defaults to Shanghai.
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI);
        let out = compiler.compile_string("a.easm", "#pragma target \"berlin\"\npush 0\n");
        assert!(!out.errors.failed());
        assert_eq!(out.bytes, vec![crate::evm::opcode::PUSH1, 0]);
    }

    #[test]
    fn unknown_pragma_target_fork_is_an_error() {
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI);
        let out = compiler.compile_string("a.easm", "#pragma target \"not_a_fork\"\npush 0\n");
        assert!(out.errors.failed());
    }

    #[test]
    fn jump_to_a_literal_label_synthesizes_the_implicit_push() {
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI);
        let out = compiler.compile_string("a.easm", "jump @dest\ndest:\n  jumpdest\n");
        assert!(!out.errors.failed());
        assert_eq!(
            out.bytes,
            vec![crate::evm::opcode::PUSH1, 3, crate::evm::opcode::JUMP, crate::evm::opcode::JUMPDEST]
        );
    }

    #[test]
    fn explicit_push2_pads_a_small_value_to_its_declared_size() {
        let compiler = Compiler::new().with_fork(Fork::SHANGHAI);
        let out = compiler.compile_string("a.easm", "push2 1\n");
        assert!(!out.errors.failed());
        assert_eq!(out.bytes, vec![crate::evm::opcode::PUSH2, 0, 1]);
    }
}
