use std::path::Path;

use indexmap::IndexMap;
use tracing::debug;

use crate::dependency::{Dependency, DependencyKey};

/// Where a dependency came from; later origins win over earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DependencyOrigin {
    /// `requirements.txt` found in the source, or dependencies already on record.
    Detected,
    /// `--with` values.
    Explicit,
    /// The copied source tree added as a path dependency.
    SourcePackage,
}

/// Order-stable merge of dependency lists keyed by `(name, extras)`.
#[derive(Debug, Default)]
pub struct DependencyMerger {
    entries: IndexMap<DependencyKey, (Dependency, DependencyOrigin)>,
}

impl DependencyMerger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_detected<I: IntoIterator<Item = Dependency>>(&mut self, deps: I) {
        for dep in deps {
            self.insert(dep, DependencyOrigin::Detected);
        }
    }

    /// Explicit entries replace detected entries with the same name, whatever their extras.
    pub fn extend_explicit<I: IntoIterator<Item = Dependency>>(&mut self, deps: I) {
        for dep in deps {
            self.drop_name_below(&dep.name, DependencyOrigin::Explicit);
            self.insert(dep, DependencyOrigin::Explicit);
        }
    }

    /// Path dependencies on the copied tree are always kept, displacing registry entries of the same name.
    pub fn add_source_package(&mut self, dep: Dependency) {
        self.drop_name_below(&dep.name, DependencyOrigin::SourcePackage);
        self.insert(dep, DependencyOrigin::SourcePackage);
    }

    fn drop_name_below(&mut self, name: &str, origin: DependencyOrigin) {
        self.entries.retain(|key, (existing, existing_origin)| {
            let replaced = key.name == name && *existing_origin < origin;
            if replaced {
                debug!(
                    dependency = %existing.requirement_line(),
                    "dropping dependency overridden by a later source"
                );
            }
            !replaced
        });
    }

    fn insert(&mut self, dep: Dependency, origin: DependencyOrigin) {
        let key = dep.key();
        match self.entries.get_mut(&key) {
            Some(slot) if slot.1 > origin => {
                debug!(dependency = %dep.requirement_line(), "ignoring dependency shadowed by a stronger source");
            }
            Some(slot) => *slot = (dep, origin),
            None => {
                self.entries.insert(key, (dep, origin));
            }
        }
    }

    #[must_use]
    pub fn finish(self) -> Vec<Dependency> {
        self.entries.into_values().map(|(dep, _)| dep).collect()
    }
}

/// Merges the three dependency origins into one deduplicated list.
#[must_use]
pub fn merge_dependencies(
    detected: Vec<Dependency>,
    explicit: Vec<Dependency>,
    source_package: Option<Dependency>,
) -> Vec<Dependency> {
    let mut merger = DependencyMerger::new();
    merger.extend_detected(detected);
    merger.extend_explicit(explicit);
    if let Some(dep) = source_package {
        merger.add_source_package(dep);
    }
    merger.finish()
}

/// How a `--with` value should be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithValue {
    File(std::path::PathBuf),
    Inline(Vec<String>),
}

/// Classifies a `--with` value as a requirements file or an inline comma-separated list.
///
/// Relative file paths are tried against each of `search_dirs` in order.
#[must_use]
pub fn classify_with_value(value: &str, search_dirs: &[&Path]) -> WithValue {
    let trimmed = value.trim();
    let candidate = Path::new(trimmed);
    if candidate.is_absolute() && candidate.is_file() {
        return WithValue::File(candidate.to_path_buf());
    }
    if !candidate.is_absolute() {
        for dir in search_dirs {
            let joined = dir.join(candidate);
            if joined.is_file() {
                return WithValue::File(joined);
            }
        }
    }
    if trimmed.ends_with(".txt") && !trimmed.contains(',') {
        let base = search_dirs.first().map_or_else(|| candidate.to_path_buf(), |dir| dir.join(candidate));
        return WithValue::File(base);
    }
    WithValue::Inline(split_inline_list(trimmed))
}

/// Splits `a>=1,<2,b` into `["a>=1,<2", "b"]`: a comma only starts a new entry
/// when the next piece does not begin with a version operator.
#[must_use]
pub fn split_inline_list(value: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in value.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    items.push(current);

    let mut merged: Vec<String> = Vec::new();
    for item in items {
        let piece = item.trim();
        if piece.is_empty() {
            continue;
        }
        let continues_constraint = piece.starts_with(['<', '>', '=', '!', '~']);
        match merged.last_mut() {
            Some(previous) if continues_constraint => {
                previous.push(',');
                previous.push_str(piece);
            }
            _ => merged.push(piece.to_string()),
        }
    }
    merged
}
