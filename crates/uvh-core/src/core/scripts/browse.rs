use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::json;
use tracing::debug;
use uvh_domain::SourceSpec;
use walkdir::{DirEntry, WalkDir};

use super::backend::backend_for;
use super::materialize::{InstallOverrides, MaterializeSettings};
use crate::core::config::context::CommandContext;
use crate::core::tooling::outcome::ExecutionOutcome;

const EXCLUDED_FILES: [&str; 6] = [
    "__init__.py",
    "__main__.py",
    "setup.py",
    "conftest.py",
    "noxfile.py",
    "fabfile.py",
];
const EXCLUDED_DIRS: [&str; 4] = ["__pycache__", "venv", ".venv", "node_modules"];
/// Browsing only needs the tip of the ref.
const BROWSE_DEPTH: u32 = 1;

#[derive(Debug, Clone, Default)]
pub struct BrowseRequest {
    pub source: String,
    /// List every Python file, not just likely entry points.
    pub all: bool,
}

/// Lists the Python scripts a source offers for `uvh install`.
///
/// # Errors
/// Returns an error when the source cannot be parsed or cloned.
pub fn browse_source(ctx: &CommandContext, request: &BrowseRequest) -> Result<ExecutionOutcome> {
    let home = ctx.home();
    let spec = SourceSpec::resolve(&request.source, ctx.cwd(), home.as_deref())?;
    let root = source_tree(ctx, &spec)?;
    let files = python_files(&root);
    let listed: Vec<&String> = files
        .iter()
        .filter(|path| request.all || is_install_candidate(path))
        .collect();

    let kind = if request.all { "Python file" } else { "candidate script" };
    let message = match listed.len() {
        0 => format!("no {kind}s found in {spec}"),
        1 => format!("1 {kind} in {spec}"),
        count => format!("{count} {kind}s in {spec}"),
    };
    let mut details = json!({
        "source": spec.to_string(),
        "root": root.display().to_string(),
        "all": request.all,
        "scripts": listed,
    });
    let suggestion = listed
        .iter()
        .filter(|path| is_install_candidate(path))
        .min_by_key(|path| suggestion_rank(path));
    details["hint"] = match suggestion {
        Some(script) => json!(format!("install with: uvh install {} {script}", request.source)),
        None if request.all => json!("none of these look like entry points; drop --all to focus on them"),
        None => json!("try --all to include __init__.py, setup.py, and test files"),
    };
    Ok(ExecutionOutcome::success(message, details))
}

/// Candidate scripts of `spec`, sorted, for an install that named none.
pub(crate) fn discover_candidates(ctx: &CommandContext, spec: &SourceSpec) -> Result<Vec<String>> {
    let root = source_tree(ctx, spec)?;
    Ok(python_files(&root)
        .into_iter()
        .filter(|path| is_install_candidate(path))
        .collect())
}

/// Local sources are read in place; Git sources go through a shallow cache
/// under `<repo_dir>/.browse` that later browses fetch into.
fn source_tree(ctx: &CommandContext, spec: &SourceSpec) -> Result<PathBuf> {
    match spec {
        SourceSpec::Local { path } => {
            backend_for(spec, path.clone(), BROWSE_DEPTH, false).resolve(ctx)?;
            Ok(path.clone())
        }
        SourceSpec::Git { .. } => {
            let settings = MaterializeSettings::resolve(ctx.config(), &InstallOverrides::default());
            let cache = settings.repo_dir.join(".browse").join(spec.repo_key());
            let checkout = backend_for(spec, cache, BROWSE_DEPTH, false).materialize(ctx, &[])?;
            debug!(repo = %checkout.repo_path.display(), commit = ?checkout.commit, "browsing checkout");
            Ok(checkout.repo_path)
        }
    }
}

/// Every `.py` file under `root` as a `/`-separated relative path, skipping
/// hidden and environment directories.
fn python_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !skipped_dir(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let parts: Vec<String> = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .filter(|path| path.ends_with(".py"))
        .collect();
    files.sort();
    files
}

fn skipped_dir(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && EXCLUDED_DIRS.contains(&&*name))
}

/// Likely entry points: no packaging, test, or private modules.
pub(crate) fn is_install_candidate(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.ends_with(".py")
        && !EXCLUDED_FILES.contains(&name)
        && !name.starts_with("test_")
        && !name.starts_with('_')
        && !name.ends_with("_test.py")
}

/// Lower sorts first: top-level and `scripts/` files with conventional entry
/// names win, anything under docs, tests, or examples loses.
fn suggestion_rank(path: &str) -> (i32, usize, String) {
    let lowered = path.to_lowercase();
    let parts: Vec<&str> = lowered.split('/').collect();
    let name = parts.last().copied().unwrap_or_default();
    let parents = &parts[..parts.len().saturating_sub(1)];
    let mut score: i32 = if parents.is_empty() {
        -20
    } else {
        i32::try_from(parts.len() * 2).unwrap_or(i32::MAX)
    };
    if parents.first().is_some_and(|first| matches!(*first, "scripts" | "bin")) {
        score -= 8;
    }
    if parents.iter().any(|part| {
        matches!(
            *part,
            "docs" | "doc" | "tests" | "test" | "examples" | "example" | "samples" | "sample"
        )
    }) {
        score += 60;
    }
    if matches!(
        name,
        "main.py" | "cli.py" | "run.py" | "app.py" | "tool.py" | "server.py" | "manage.py"
    ) {
        score -= 30;
    }
    (score, parts.len(), lowered)
}
