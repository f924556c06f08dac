//! Consistency checks between the state store, managed checkouts, and links.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uvh_domain::{InstalledScript, SourceType};

use crate::core::config::context::CommandContext;
use crate::core::scripts::materialize::{link_script, unlink};
use crate::core::store::quarantine;
use crate::core::tooling::errors::StateCorruptionError;
use crate::core::tooling::outcome::ExecutionOutcome;

#[derive(Debug, Clone, Default)]
pub struct DoctorRequest {
    pub repair: bool,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProblemKind {
    CorruptState,
    MissingScript,
    MissingSymlink,
    WrongSymlink,
    MissingSource,
    DanglingSymlink,
}

#[derive(Clone, Debug, Serialize)]
pub struct Problem {
    pub kind: ProblemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    pub path: String,
    pub detail: String,
    pub repaired: bool,
}

impl Problem {
    fn new(kind: ProblemKind, script: Option<&str>, path: &Path, detail: impl Into<String>) -> Self {
        Self {
            kind,
            script: script.map(ToString::to_string),
            path: path.display().to_string(),
            detail: detail.into(),
            repaired: false,
        }
    }
}

/// Checks the environment and every record; `--repair` fixes what it safely can.
///
/// # Errors
/// Returns an error only when a repair step itself fails unexpectedly.
pub fn run_doctor(ctx: &CommandContext, request: &DoctorRequest) -> Result<ExecutionOutcome> {
    let paths = ctx.config().paths().clone();
    let mut warnings = Vec::new();
    let on_path = ctx
        .path_entries()
        .iter()
        .any(|entry| entry == &paths.install_dir);
    if !on_path {
        warnings.push(format!(
            "{} is not on PATH; installed scripts will not be found by name",
            paths.install_dir.display()
        ));
    }
    let tools = json!({
        "git": tool_path(ctx, "git", &mut warnings),
        "uv": tool_path(ctx, "uv", &mut warnings),
    });

    let mut problems = Vec::new();
    let mut store_info = json!(null);
    match ctx.store() {
        Ok(store) => {
            store_info = json!({
                "schema_version": store.schema_version(),
                "scripts": store.records().count(),
                "migrations_applied": store.applied_migrations(),
                "backup": store.backup_path().map(|path| path.display().to_string()),
            });
        }
        Err(err) => {
            let corrupt = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<StateCorruptionError>())
                .map(|corrupt| (corrupt.path.clone(), corrupt.reason.clone()));
            let Some((path, reason)) = corrupt else {
                return Err(err);
            };
            let mut problem = Problem::new(ProblemKind::CorruptState, None, &path, reason.clone());
            if request.repair && path.exists() {
                let moved = quarantine(&path)?;
                problem.detail = format!("{reason}; moved to {}", moved.display());
                problem.repaired = true;
            }
            problems.push(problem);
        }
    }

    if problems.is_empty() {
        let records: Vec<InstalledScript> = ctx.store()?.records().cloned().collect();
        for record in &records {
            check_record(ctx, request, record, &mut problems)?;
        }
        check_stray_links(ctx, request, &paths.install_dir, &paths.repo_dir, &records, &mut problems)?;
    }

    let outstanding = problems.iter().filter(|problem| !problem.repaired).count();
    let repaired = problems.len() - outstanding;
    let mut details = json!({
        "config": {
            "file": ctx.config().source().path().map(|path| path.display().to_string()),
            "repo_dir": paths.repo_dir.display().to_string(),
            "install_dir": paths.install_dir.display().to_string(),
            "state_file": paths.state_file.display().to_string(),
        },
        "install_dir_on_path": on_path,
        "tools": tools,
        "store": store_info,
        "problems": problems,
    });
    if !warnings.is_empty() {
        details["warnings"] = json!(warnings);
    }
    if outstanding > 0 {
        details["reason"] = json!("doctor_issues");
        details["hint"] = json!(if request.repair {
            "restore missing local sources or remove the affected scripts"
        } else {
            "run `uvh doctor --repair` to fix what can be fixed automatically"
        });
        return Ok(ExecutionOutcome::user_error(
            format!("{outstanding} problem(s) found"),
            details,
        ));
    }
    let message = if repaired > 0 {
        format!("repaired {repaired} problem(s)")
    } else {
        "no problems found".to_string()
    };
    Ok(ExecutionOutcome::success(message, details))
}

fn tool_path(ctx: &CommandContext, program: &str, warnings: &mut Vec<String>) -> Option<String> {
    let found = ctx.runner().find_on_path(program).into_iter().next();
    if found.is_none() {
        warnings.push(format!("`{program}` was not found on PATH"));
    }
    found.map(|path| path.display().to_string())
}

fn check_record(
    ctx: &CommandContext,
    request: &DoctorRequest,
    record: &InstalledScript,
    problems: &mut Vec<Problem>,
) -> Result<()> {
    let name = Some(record.name.as_str());
    if record.source_type == SourceType::Local && !Path::new(&record.source_location).is_dir() {
        problems.push(Problem::new(
            ProblemKind::MissingSource,
            name,
            Path::new(&record.source_location),
            "local source directory is gone; updates will report it unreachable",
        ));
    }

    if !record.install_path.is_file() {
        let mut problem = Problem::new(
            ProblemKind::MissingScript,
            name,
            &record.install_path,
            "installed script file is missing",
        );
        if request.repair {
            if let Some(link) = &record.symlink_path {
                unlink(ctx, link)?;
            }
            ctx.store()?.delete(&record.name)?;
            info!(script = %record.name, "dropped record for missing script");
            problem.repaired = true;
        }
        problems.push(problem);
        return Ok(());
    }

    let Some(link) = &record.symlink_path else {
        return Ok(());
    };
    let kind = if !ctx.fs().is_symlink(link) {
        ProblemKind::MissingSymlink
    } else if ctx.fs().read_link(link).ok().as_deref() != Some(record.install_path.as_path()) {
        ProblemKind::WrongSymlink
    } else {
        return Ok(());
    };
    let detail = match kind {
        ProblemKind::MissingSymlink => "link is missing",
        _ => "link points somewhere else",
    };
    let mut problem = Problem::new(kind, name, link, detail);
    if request.repair {
        let install_dir = link.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        match link_script(ctx, &install_dir, record.link_name(), &record.install_path) {
            Ok(_) => problem.repaired = true,
            Err(err) => {
                warn!(link = %link.display(), error = %err, "cannot recreate link");
                problem.detail = format!("{detail}; {err}");
            }
        }
    }
    problems.push(problem);
    Ok(())
}

/// Links in the install directory that point into managed checkouts at nothing.
fn check_stray_links(
    ctx: &CommandContext,
    request: &DoctorRequest,
    install_dir: &Path,
    repo_dir: &Path,
    records: &[InstalledScript],
    problems: &mut Vec<Problem>,
) -> Result<()> {
    let Ok(entries) = std::fs::read_dir(install_dir) else {
        debug!(dir = %install_dir.display(), "install directory not readable; skipping link scan");
        return Ok(());
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !ctx.fs().is_symlink(&path) || path.exists() {
            continue;
        }
        let Ok(target) = ctx.fs().read_link(&path) else {
            continue;
        };
        let owned = records
            .iter()
            .any(|record| record.symlink_path.as_deref() == Some(path.as_path()));
        if owned || !target.starts_with(repo_dir) {
            continue;
        }
        let mut problem = Problem::new(
            ProblemKind::DanglingSymlink,
            None,
            &path,
            format!("points at missing {}", target.display()),
        );
        if request.repair {
            ctx.fs().remove_file(&path)?;
            problem.repaired = true;
        }
        problems.push(problem);
    }
    Ok(())
}
