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
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Abstraction over reading source files, so `#include`/`#assemble`
/// resolution does not have to touch the real filesystem in tests. Mirrors
/// the teacher's preference for small trait-object collaborators at the
/// edges of the library (see `InstructionSet`).
pub trait FileSystem {
    fn read(&self, path: &str) -> std::io::Result<String>;
}

/// The default, real-filesystem-backed implementation used by the CLI.
pub struct NativeFileSystem;

impl FileSystem for NativeFileSystem {
    fn read(&self, path: &str) -> std::io::Result<String> {
        fs::read_to_string(path)
    }
}

/// An in-memory filesystem for tests and for embedding the assembler in a
/// host that doesn't want disk access.
#[derive(Default)]
pub struct MemoryFileSystem {
    files: HashMap<String, String>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        MemoryFileSystem { files: HashMap::new() }
    }

    pub fn add(&mut self, path: impl Into<String>, contents: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &str) -> std::io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
    }
}

/// Resolve an `#include`/`#assemble` path relative to the directory of the
/// including file, rejecting attempts to escape above it with `..`
/// components — the same defensive resolution a build tool applies to
/// untrusted include paths.
pub fn resolve_include(including_file: &str, target: &str) -> Option<String> {
    if Path::new(target).components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return None;
    }
    let base = Path::new(including_file).parent().unwrap_or_else(|| Path::new(""));
    let joined: PathBuf = base.join(target);
    Some(joined.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_fs_round_trips() {
        let mut fs = MemoryFileSystem::new();
        fs.add("a.easm", "add\n");
        assert_eq!(fs.read("a.easm").unwrap(), "add\n");
    }

    #[test]
    fn resolve_rejects_parent_escape() {
        assert!(resolve_include("lib/a.easm", "../../etc/passwd").is_none());
    }

    #[test]
    fn resolve_is_relative_to_including_file() {
        assert_eq!(resolve_include("lib/a.easm", "b.easm").unwrap(), "lib/b.easm");
    }
}
