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
use std::fmt;
use std::rc::Rc;

/// A position within a source file, attached to every statement, every
/// expression and every diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub file: Rc<str>,
    pub line: usize,
}

impl Position {
    pub fn new(file: Rc<str>, line: usize) -> Self {
        Position { file, line }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A single diagnostic: an error or a warning, always attached to a
/// position, per §6's `file:line: message` / `file:line: warning: message`
/// format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub pos: Position,
    pub warning: bool,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.warning {
            write!(f, "{}: warning: {}", self.pos, self.message)
        } else {
            write!(f, "{}: {}", self.pos, self.message)
        }
    }
}

/// Signals that compilation should unwind immediately: either the
/// `max_errors` bound was exceeded, or a genuinely fatal structural
/// failure occurred (include depth exceeded, a fixed-size push overflow,
/// etc). Mirrors the teacher parsers' `throwError`-style non-local exit,
/// implemented here as an ordinary `Result` rather than a panic/unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort;

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "compilation aborted")
    }
}

impl std::error::Error for Abort {}

/// Ordered accumulator of diagnostics (C9). Errors beyond `max_errors`
/// abort compilation; warnings never count against the bound and never
/// block emission.
pub struct ErrorList {
    diagnostics: Vec<Diagnostic>,
    max_errors: usize,
    error_count: usize,
}

impl ErrorList {
    pub fn new(max_errors: usize) -> Self {
        ErrorList { diagnostics: Vec::new(), max_errors, error_count: 0 }
    }

    /// Record an error. Returns `Err(Abort)` once `max_errors` has been
    /// exceeded, so callers can propagate with `?` from phases that are
    /// structured as a statement-at-a-time loop.
    pub fn error(&mut self, pos: Position, message: impl Into<String>) -> Result<(), Abort> {
        self.diagnostics.push(Diagnostic { pos, warning: false, message: message.into() });
        self.error_count += 1;
        if self.error_count > self.max_errors {
            Err(Abort)
        } else {
            Ok(())
        }
    }

    /// Record a warning. Warnings never abort compilation.
    pub fn warning(&mut self, pos: Position, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic { pos, warning: true, message: message.into() });
    }

    /// True iff at least one non-warning error has been recorded.
    pub fn failed(&self) -> bool {
        self.error_count > 0
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.warning)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.warning)
    }

    pub fn all(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn reset(&mut self) {
        self.diagnostics.clear();
        self.error_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: usize) -> Position {
        Position::new(Rc::from("test.easm"), line)
    }

    #[test]
    fn aborts_once_max_errors_exceeded() {
        let mut errs = ErrorList::new(2);
        assert!(errs.error(pos(1), "e1").is_ok());
        assert!(errs.error(pos(2), "e2").is_ok());
        assert!(errs.error(pos(3), "e3").is_err());
    }

    #[test]
    fn warnings_never_abort_or_count() {
        let mut errs = ErrorList::new(0);
        errs.warning(pos(1), "w1");
        errs.warning(pos(2), "w2");
        assert!(!errs.failed());
    }

    #[test]
    fn failed_tracks_only_errors() {
        let mut errs = ErrorList::new(10);
        errs.warning(pos(1), "w1");
        assert!(!errs.failed());
        let _ = errs.error(pos(2), "e1");
        assert!(errs.failed());
    }

    #[test]
    fn display_format_matches_spec() {
        let d = Diagnostic { pos: pos(4), warning: false, message: "bad thing".into() };
        assert_eq!(d.to_string(), "test.easm:4: bad thing");
        let w = Diagnostic { pos: pos(4), warning: true, message: "meh".into() };
        assert_eq!(w.to_string(), "test.easm:4: warning: meh");
    }
}
