//! Portable export and import of installed scripts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uvh_domain::{InstalledScript, RefKind, SourceType};

use super::install::{install_batch, InstallRequest};
use super::materialize::InstallOverrides;
use super::{batch_outcome, ItemReport};
use crate::core::config::context::CommandContext;
use crate::core::runtime::UVH_VERSION;
use crate::core::store::timestamp;
use crate::core::tooling::outcome::{ExecutionOutcome, InstallUserError};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: u32,
    #[serde(default)]
    pub exported_at: String,
    /// Version of the tool that wrote the document.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uvh_version: String,
    #[serde(default)]
    pub scripts: Vec<ExportEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub name: String,
    pub source_type: SourceType,
    pub source: String,
    /// Script path inside the source when it is not at the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub ref_kind: RefKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub copy_parent_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_package: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ExportEntry {
    fn from_record(record: &InstalledScript) -> Self {
        let script = record.relative_script().to_string_lossy().to_string();
        Self {
            name: record.name.clone(),
            source_type: record.source_type,
            source: record.source_location.clone(),
            script: (script != record.name).then_some(script),
            git_ref: record.git_ref.clone(),
            ref_kind: record.ref_kind,
            alias: record.alias.clone(),
            copy_parent_dir: record.copy_parent_dir,
            source_package: record.source_package.clone(),
            // The source package is re-derived from the new managed copy on import.
            dependencies: record
                .dependencies
                .iter()
                .filter(|dep| {
                    !(dep.is_path() && record.source_package.as_deref() == Some(dep.name.as_str()))
                })
                .map(uvh_domain::Dependency::requirement_line)
                .collect(),
        }
    }

    /// The source string install expects, ref suffix included.
    fn install_source(&self) -> String {
        match (&self.git_ref, self.source_type) {
            (Some(reference), SourceType::Git) => {
                let kind = match self.ref_kind {
                    RefKind::Default => RefKind::infer(Some(reference)),
                    kind => kind,
                };
                format!("{}{}", self.source, kind.suffix(reference))
            }
            _ => self.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    /// Destination file; the document is returned in `details` when absent.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub file: PathBuf,
    pub force: bool,
    pub dry_run: bool,
    pub overrides: InstallOverrides,
}

/// Serializes every record into a portable document.
///
/// # Errors
/// Returns an error when the store cannot be read or the output cannot be written.
pub fn export_scripts(ctx: &CommandContext, request: &ExportRequest) -> Result<ExecutionOutcome> {
    let document = {
        let store = ctx.store()?;
        ExportDocument {
            version: EXPORT_VERSION,
            exported_at: timestamp(),
            uvh_version: UVH_VERSION.to_string(),
            scripts: store.records().map(ExportEntry::from_record).collect(),
        }
    };
    let count = document.scripts.len();
    match &request.output {
        Some(path) => {
            write_document(ctx, path, &document)?;
            info!(path = %path.display(), count, "exported scripts");
            Ok(ExecutionOutcome::success(
                format!("exported {count} script(s) to {}", path.display()),
                json!({ "path": path.display().to_string(), "count": count }),
            ))
        }
        None => Ok(ExecutionOutcome::success(
            format!("exported {count} script(s)"),
            json!({ "count": count, "document": document }),
        )),
    }
}

fn write_document(ctx: &CommandContext, path: &Path, document: &ExportDocument) -> Result<()> {
    let fs = ctx.fs();
    let mut contents = serde_json::to_vec_pretty(document).context("serializing export")?;
    contents.push(b'\n');
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs.create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs.write(&tmp, &contents)?;
    fs.rename(&tmp, path)
}

/// Reinstalls every entry of an export document.
///
/// # Errors
/// Returns a user error for unreadable or unsupported documents; per-entry
/// failures are reported as failed items.
pub fn import_scripts(ctx: &CommandContext, request: &ImportRequest) -> Result<ExecutionOutcome> {
    let document = read_document(ctx, &request.file)?;
    let mut items = Vec::with_capacity(document.scripts.len());
    let mut warnings = Vec::new();
    for entry in &document.scripts {
        debug!(script = %entry.name, source = %entry.source, "importing");
        let install = InstallRequest {
            source: entry.install_source(),
            scripts: vec![entry.script.clone().unwrap_or_else(|| entry.name.clone())],
            requirements: entry.dependencies.clone(),
            exact_dependencies: true,
            alias: entry.alias.clone(),
            force: request.force,
            dry_run: request.dry_run,
            copy_parent_dir: entry.copy_parent_dir,
            add_source_package: entry.source_package.clone().map(Some),
            overrides: request.overrides.clone(),
            ..InstallRequest::default()
        };
        match install_batch(ctx, &install) {
            Ok((entry_items, entry_warnings)) => {
                items.extend(entry_items);
                warnings.extend(entry_warnings);
            }
            Err(err) => {
                warn!(script = %entry.name, error = %format!("{err:#}"), "import entry failed");
                items.push(ItemReport::failed(entry.name.clone(), &err).with_source(entry.install_source()));
            }
        }
    }
    let verb = if request.dry_run { "plan" } else { "import" };
    let mut outcome = batch_outcome(verb, &items, &warnings);
    if request.dry_run {
        outcome = outcome.with_detail("dry_run", json!(true));
    }
    Ok(outcome)
}

fn read_document(ctx: &CommandContext, path: &Path) -> Result<ExportDocument> {
    let contents = ctx.fs().read_to_string(path).map_err(|err| {
        InstallUserError::new(
            format!("cannot read {}", path.display()),
            json!({ "reason": "import_unreadable", "error": format!("{err:#}") }),
        )
    })?;
    let raw: serde_json::Value = serde_json::from_str(&contents).map_err(|err| {
        InstallUserError::new(
            format!("{} is not valid JSON", path.display()),
            json!({ "reason": "invalid_export", "error": err.to_string() }),
        )
    })?;
    let version = raw.get("version").and_then(serde_json::Value::as_u64);
    if version != Some(u64::from(EXPORT_VERSION)) {
        return Err(InstallUserError::new(
            format!(
                "unsupported export version {}",
                version.map_or_else(|| "(missing)".to_string(), |version| version.to_string())
            ),
            json!({
                "reason": "unsupported_export_version",
                "expected": EXPORT_VERSION,
                "hint": "re-export the scripts with this version of uvh",
            }),
        )
        .into());
    }
    serde_json::from_value(raw).map_err(|err| {
        InstallUserError::new(
            format!("{} is not an export document", path.display()),
            json!({ "reason": "invalid_export", "error": err.to_string() }),
        )
        .into()
    })
}
