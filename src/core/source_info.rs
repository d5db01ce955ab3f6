//! Layer 3: per-source compile results.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::api::Name;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Position of a reported problem. Offsets the compiler did not supply
/// are encoded with sentinels: `i32::MIN` for integers, `""` for the
/// source path, matching the persisted form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub line: i32,
    pub offset: i32,
    pub pointer: i32,
    pub line_content: String,
    pub source_path: String,
}

impl Position {
    pub const MISSING: i32 = i32::MIN;

    pub fn unknown() -> Self {
        Self {
            line: Self::MISSING,
            offset: Self::MISSING,
            pointer: Self::MISSING,
            line_content: String::new(),
            source_path: String::new(),
        }
    }

    pub fn has_line(&self) -> bool {
        self.line != Self::MISSING
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    pub category: String,
    pub severity: Severity,
    pub message: String,
    pub position: Position,
}

/// Problems and entry points recorded for one source file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceInfo {
    /// Problems shown to the user during the compile.
    pub reported_problems: Vec<Problem>,
    /// Problems suppressed at the time (e.g. under promoted warnings)
    /// but kept for replay.
    pub unreported_problems: Vec<Problem>,
    pub main_classes: Vec<Name>,
}

impl SourceInfo {
    pub fn has_errors(&self) -> bool {
        self.reported_problems
            .iter()
            .chain(self.unreported_problems.iter())
            .any(|problem| problem.severity == Severity::Error)
    }
}

pub type SourceInfos = BTreeMap<PathBuf, SourceInfo>;
