//! Layer 3: compile setup persisted across runs.
//!
//! The setup is the compatibility gate: if anything here differs from
//! the stored run (compiler version, options, classpath hashes,
//! compile order), the previous analysis cannot be trusted and the
//! driver starts from empty.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where compiled class files land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Single(PathBuf),
    Multiple(Vec<OutputGroup>),
}

impl Output {
    /// Is `file` under one of the declared output directories?
    pub fn contains(&self, file: &std::path::Path) -> bool {
        match self {
            Output::Single(dir) => file.starts_with(dir),
            Output::Multiple(groups) => {
                groups.iter().any(|group| file.starts_with(&group.target_dir))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputGroup {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
}

/// Content hash of one classpath entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHash {
    pub file: PathBuf,
    pub hash: i64,
}

/// Declared ordering between the two compiled languages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileOrder {
    #[default]
    Mixed,
    JavaThenScala,
    ScalaThenJava,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetupOptions {
    pub classpath_hash: Vec<FileHash>,
    pub scalac_options: Vec<String>,
    pub javac_options: Vec<String>,
}

/// Everything that must match between runs for the previous analysis
/// to be reusable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileSetup {
    pub output: Output,
    pub options: SetupOptions,
    pub compiler_version: String,
    pub compile_order: CompileOrder,
    pub store_apis: bool,
    pub extra: Vec<(String, String)>,
}

impl CompileSetup {
    /// Whether an analysis produced under `previous` is reusable for a
    /// run under `self`. Classpath hashes compare as sets: reordering
    /// entries with identical contents is not a change.
    pub fn compatible_with(&self, previous: &CompileSetup) -> bool {
        if self.compiler_version != previous.compiler_version
            || self.compile_order != previous.compile_order
            || self.options.scalac_options != previous.options.scalac_options
            || self.options.javac_options != previous.options.javac_options
        {
            return false;
        }
        let mut ours: Vec<_> = self.options.classpath_hash.iter().collect();
        let mut theirs: Vec<_> = previous.options.classpath_hash.iter().collect();
        ours.sort_by(|a, b| a.file.cmp(&b.file).then(a.hash.cmp(&b.hash)));
        theirs.sort_by(|a, b| a.file.cmp(&b.file).then(a.hash.cmp(&b.hash)));
        ours == theirs
    }
}

/// One compile step's provenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compilation {
    pub start_time_ms: i64,
    pub output: Output,
}
