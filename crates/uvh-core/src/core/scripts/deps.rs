//! Collects dependency inputs for the merger.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, warn};
use uvh_domain::{
    classify_with_value, merge_dependencies, parse_requirements, read_requirements, Dependency,
    ParseMode, ParsedRequirements, SourceSpec, WithValue,
};

pub(crate) const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Dependencies the caller asked for, plus line errors that were skipped.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExplicitDeps {
    pub(crate) dependencies: Vec<Dependency>,
    /// A `--with` requirements file was given; it stands in for the detected one.
    pub(crate) replaces_detection: bool,
    pub(crate) warnings: Vec<String>,
}

/// Reads `--with` values (files or inline lists) and exact requirement lines.
///
/// Relative requirements files are looked up in `source_root` first, then `cwd`.
pub(crate) fn explicit_dependencies(
    cwd: &Path,
    source_root: Option<&Path>,
    with: &[String],
    requirements: &[String],
) -> Result<ExplicitDeps> {
    let search: Vec<&Path> = source_root.into_iter().chain([cwd]).collect();
    let mut explicit = ExplicitDeps::default();
    for value in with.iter().filter(|value| !value.trim().is_empty()) {
        let parsed = match classify_with_value(value, &search) {
            WithValue::File(path) => {
                debug!(path = %path.display(), "reading --with requirements file");
                explicit.replaces_detection = true;
                read_requirements(&path, ParseMode::Lenient)?
            }
            WithValue::Inline(items) => {
                parse_requirements(&items.join("\n"), &cwd.join("--with"), ParseMode::Lenient)?
            }
        };
        explicit.absorb(parsed);
    }
    if !requirements.is_empty() {
        let parsed = parse_requirements(
            &requirements.join("\n"),
            &cwd.join("import"),
            ParseMode::Lenient,
        )?;
        explicit.absorb(parsed);
    }
    Ok(explicit)
}

impl ExplicitDeps {
    fn absorb(&mut self, parsed: ParsedRequirements) {
        self.dependencies.extend(parsed.dependencies);
        self.warnings
            .extend(parsed.errors.iter().map(ToString::to_string));
    }
}

/// Parses `requirements.txt` at the root of a source tree, if present.
pub(crate) fn detect_dependencies(root: &Path) -> Result<(Vec<Dependency>, Vec<String>)> {
    let path = root.join(REQUIREMENTS_FILE);
    if !path.is_file() {
        return Ok((Vec::new(), Vec::new()));
    }
    let parsed = read_requirements(&path, ParseMode::Lenient)?;
    let warnings: Vec<String> = parsed.errors.iter().map(ToString::to_string).collect();
    for warning in &warnings {
        warn!(%warning, "skipping malformed requirement");
    }
    debug!(path = %path.display(), count = parsed.dependencies.len(), "detected requirements");
    Ok((parsed.dependencies, warnings))
}

/// Path dependency on the managed copy of the source tree.
pub(crate) fn source_package_dependency(
    spec: &SourceSpec,
    name: Option<&str>,
    repo_path: &Path,
) -> Dependency {
    let name = name
        .map(ToString::to_string)
        .unwrap_or_else(|| default_package_name(spec));
    Dependency::local_package(&name, repo_path)
}

fn default_package_name(spec: &SourceSpec) -> String {
    match spec {
        SourceSpec::Local { path } => path
            .file_name()
            .map_or_else(|| "source".to_string(), |name| name.to_string_lossy().to_string()),
        SourceSpec::Git { url, .. } => url
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .map(|segment| segment.trim_end_matches(".git").to_string())
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| "source".to_string()),
    }
}

/// Where `requirements.txt` is looked up: the managed checkout for Git, the source for local.
pub(crate) fn detection_root<'a>(spec: &'a SourceSpec, repo_path: &'a Path) -> &'a Path {
    match spec {
        SourceSpec::Local { path } => path,
        SourceSpec::Git { .. } => repo_path,
    }
}

/// Detected, explicit, and source-package dependencies merged into one list.
pub(crate) fn resolve_dependencies(
    spec: &SourceSpec,
    repo_path: &Path,
    explicit: &ExplicitDeps,
    source_package: Option<&str>,
    with_source_package: bool,
) -> Result<(Vec<Dependency>, Vec<String>)> {
    let (detected, warnings) = if explicit.replaces_detection {
        (Vec::new(), Vec::new())
    } else {
        detect_dependencies(detection_root(spec, repo_path))?
    };
    let package = with_source_package
        .then(|| source_package_dependency(spec, source_package, repo_path));
    Ok((
        merge_dependencies(detected, explicit.dependencies.clone(), package),
        warnings,
    ))
}
