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
use evmasm::asm::{Compiler, MemoryFileSystem};
use evmasm::evm::opcode;
use evmasm::fork::Fork;

fn compile(src: &str) -> Vec<u8> {
    let out = Compiler::new().with_fork(Fork::SHANGHAI).compile_string("t.easm", src);
    assert!(!out.errors.failed(), "unexpected errors: {:?}", out.errors.errors().collect::<Vec<_>>());
    out.bytes
}

#[test]
fn forward_jump_label_resolves_through_the_layout_fixpoint() {
    let bytes = compile("push @End\njump\nEnd:\njumpdest\nstop\n");
    assert_eq!(
        bytes,
        vec![
            opcode::PUSH1, 3,
            opcode::JUMP,
            opcode::JUMPDEST,
            opcode::STOP,
        ]
    );
}

#[test]
fn instruction_macro_expands_inline_at_each_call_site() {
    let src = "#define %double($x) { push $x\npush $x\nadd\n}\n%double(3)\n%double(3)\n";
    let bytes = compile(src);
    assert_eq!(
        bytes,
        vec![
            opcode::PUSH1, 3, opcode::PUSH1, 3, opcode::ADD,
            opcode::PUSH1, 3, opcode::PUSH1, 3, opcode::ADD,
        ]
    );
}

#[test]
fn expression_macro_is_substituted_before_evaluation() {
    let bytes = compile("#define size() = 32\npush size()\n");
    assert_eq!(bytes, vec![opcode::PUSH1, 32]);
}

#[test]
fn keccak256_builtin_feeds_a_push_immediate() {
    let bytes = compile("push keccak256(\"\")\n");
    assert_eq!(bytes[0], opcode::PUSH1);
    assert_eq!(bytes[1], 0xc5);
}

#[test]
fn include_pulls_in_a_second_file_inline() {
    let mut fs = MemoryFileSystem::new();
    fs.add("lib.easm", "Shared:\njumpdest\n");
    fs.add("main.easm", "#include \"lib.easm\"\npush @Shared\njump\n");
    let out = Compiler::new().with_fork(Fork::SHANGHAI).compile(&fs, "main.easm");
    assert!(!out.errors.failed());
    assert_eq!(out.bytes, vec![opcode::JUMPDEST, opcode::PUSH1, 0, opcode::JUMP]);
}

#[test]
fn nested_assemble_directive_embeds_sub_module_bytes_at_the_call_site() {
    let mut fs = MemoryFileSystem::new();
    fs.add("lib.easm", "push 1\npush 2\nadd\n");
    fs.add("main.easm", "stop\n#assemble \"lib.easm\"\n");
    let out = Compiler::new().with_fork(Fork::SHANGHAI).compile(&fs, "main.easm");
    assert!(!out.errors.failed());
    assert_eq!(out.bytes, vec![opcode::STOP, opcode::PUSH1, 1, opcode::PUSH1, 2, opcode::ADD]);
}

#[test]
fn second_invocation_of_a_macro_defining_a_global_label_is_a_duplicate() {
    let src = "#define %once() { Start:\njumpdest\n}\n%once()\n%once()\n";
    let out = Compiler::new().with_fork(Fork::SHANGHAI).compile_string("t.easm", src);
    assert!(out.errors.failed());
}

#[test]
fn unreferenced_label_is_reported_as_a_warning_not_an_error() {
    let out = Compiler::new()
        .with_fork(Fork::SHANGHAI)
        .compile_string("t.easm", "push 1\nDead:\njumpdest\nstop\n");
    assert!(!out.errors.failed());
    assert!(out.errors.warnings().count() >= 1);
}

#[test]
fn push0_is_only_available_from_shanghai_onward() {
    let berlin = Compiler::new().with_fork(Fork::BERLIN).compile_string("t.easm", "push0\n");
    assert!(berlin.errors.failed());

    let shanghai = Compiler::new().with_fork(Fork::SHANGHAI).compile_string("t.easm", "push0\n");
    assert!(!shanghai.errors.failed());
    assert_eq!(shanghai.bytes, vec![opcode::PUSH0]);
}

#[test]
fn missing_include_aborts_with_a_diagnostic_instead_of_panicking() {
    let out = Compiler::new().with_fork(Fork::SHANGHAI).compile_string("t.easm", "#include \"nope.easm\"\n");
    assert!(out.errors.failed());
}
