use anyhow::Result;
use serde_json::{json, Value};
use uvh_domain::{ChangeReport, InstalledScript, ScriptFilter};

use super::changes::ChangeCache;
use crate::core::config::context::CommandContext;
use crate::core::tooling::outcome::ExecutionOutcome;

#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub filter: ScriptFilter,
}

/// Lists installed scripts matching the filter, sorted by name.
///
/// # Errors
/// Returns an error when the store cannot be opened.
pub fn list_scripts(ctx: &CommandContext, request: &ListRequest) -> Result<ExecutionOutcome> {
    let store = ctx.store()?;
    let mut changes = ChangeCache::default();
    let scripts: Vec<Value> = store
        .list(&request.filter)
        .into_iter()
        .map(|record| {
            let report = changes.report(ctx, store.records(), record);
            summary(record, report.as_ref())
        })
        .collect();
    let attention: Vec<&str> = scripts
        .iter()
        .filter(|script| script["local_changes"] == "needs-attention")
        .filter_map(|script| script["name"].as_str())
        .collect();
    let message = match scripts.len() {
        0 if store.is_empty() => "no scripts installed".to_string(),
        0 => "no scripts match the filters".to_string(),
        1 => "1 script".to_string(),
        count => format!("{count} scripts"),
    };
    let mut details = json!({
        "scripts": scripts,
        "state_file": store.path().display().to_string(),
    });
    if let Some(first) = attention.first() {
        details["hint"] = json!(format!(
            "{} script(s) need attention; see `uvh show {first}`",
            attention.len()
        ));
    }
    Ok(ExecutionOutcome::success(message, details))
}

fn summary(record: &InstalledScript, changes: Option<&ChangeReport>) -> Value {
    json!({
        "name": record.name,
        "alias": record.alias,
        "source_type": record.source_type,
        "source": record.source_location,
        "ref": record.ref_label(),
        "pinned": record.is_pinned(),
        "commit": record.resolved_commit,
        "dependencies": record.dependencies.len(),
        "link": record.symlink_path.as_ref().map(|path| path.display().to_string()),
        "updated_at": record.updated_at,
        "local_changes": changes.map(|report| report.state),
    })
}

/// Full record for one script, with on-disk health.
///
/// # Errors
/// Returns `ScriptNotFoundError` when nothing answers to `key`.
pub fn show_script(ctx: &CommandContext, key: &str) -> Result<ExecutionOutcome> {
    let store = ctx.store()?;
    let record = store.resolve(key)?;
    let mut details = serde_json::to_value(record)?;
    let link_ok = record.symlink_path.as_ref().map(|link| {
        ctx.fs()
            .read_link(link)
            .is_ok_and(|target| target == record.install_path)
    });
    details["source_display"] = json!(record.source_display());
    details["pinned"] = json!(record.is_pinned());
    details["requirements"] = json!(record
        .dependencies
        .iter()
        .map(uvh_domain::Dependency::requirement_line)
        .collect::<Vec<_>>());
    details["script_present"] = json!(record.install_path.is_file());
    if let Some(report) = ChangeCache::default().report(ctx, store.records(), record) {
        details["local_changes"] = json!(report.state);
        details["local_changes_detail"] = json!(report.detail);
    }
    details["link_ok"] = json!(link_ok);
    Ok(ExecutionOutcome::success(
        format!("{} from {}", record.name, record.source_display()),
        details,
    ))
}
