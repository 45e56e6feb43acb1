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

/// An assembler for EVM bytecode: lexer, parser, macro/include expansion,
/// PC-assignment and variable-push layout, evaluator and byte emitter.
pub mod asm;
/// The EVM opcode byte constants ([`evm::opcode`]) the assembler's emitter
/// and `InstructionSet` table are built on.
pub mod evm;
/// Functionality related to distinguishing different forks of the EVM.
/// This includes mechanisms for identifying what EIPs are active for a
/// given target fork, used to gate opcode availability during assembly.
pub mod fork;
/// Table-driven [`InstructionSet`](instruction_set::InstructionSet)
/// implementation consumed by the assembler's emitter, decoupled from any
/// one opcode table so callers can substitute their own.
pub mod instruction_set;
/// Arbitrary-precision assembler literal values which remember the
/// textual form (decimal, hex, leading zeroes) they were written in until
/// the first arithmetic operation discards it.
pub mod numeric;
