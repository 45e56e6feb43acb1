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

//! An assembler for EVM bytecode with labels, includes and macros.
//!
//! The pipeline runs in stages, each its own module:
//!
//! - [`token`] / [`parser`]: lex and parse one file into an [`ast::Statement`] list (C1/C2).
//! - [`loader`]: follows `#include`s eagerly reachable from the entry file, building the
//!   document forest and registering file-local/global names (C3).
//! - [`expander`]: inlines instruction-macro calls and macro-reached includes, flattening
//!   the forest into one linear instruction list (C4).
//! - [`evaluator`] / [`builtins`]: evaluate expressions against a label table (C5).
//! - [`layout`]: the PC-assignment / variable-push-width fixpoint (C6).
//! - [`emitter`]: the final byte-emission pass against a converged layout (C7).
//! - [`analysis`]: post-emission unused-label / unreachable-code warnings (C8).
//! - [`compiler`]: wires the whole pipeline behind one [`compiler::Compiler`] entry point.

pub mod analysis;
pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod emitter;
pub mod error;
pub mod evaluator;
pub mod expander;
pub mod fs;
pub mod layout;
pub mod loader;
pub mod parser;
pub mod token;

pub use compiler::{CompileOutput, Compiler};
pub use error::{Abort, Diagnostic, ErrorList, Position};
pub use fs::{FileSystem, MemoryFileSystem, NativeFileSystem};
