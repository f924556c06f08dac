//! Install, update, and remove reconciliation for managed scripts.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Serialize, Serializer};
use serde_json::json;

use crate::core::tooling::errors::LocalChangesError;
use crate::core::tooling::outcome::ExecutionOutcome;

pub(crate) mod backend;
pub(crate) mod browse;
pub(crate) mod changes;
pub(crate) mod deps;
pub(crate) mod install;
pub(crate) mod list;
pub(crate) mod materialize;
pub(crate) mod remove;
pub(crate) mod transfer;
pub(crate) mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use browse::{browse_source, BrowseRequest};
pub use install::{install_scripts, InstallRequest};
pub use list::{list_scripts, show_script, ListRequest};
pub use materialize::InstallOverrides;
pub use remove::{remove_scripts, RemoveRequest};
pub use transfer::{export_scripts, import_scripts, ExportRequest, ImportRequest};
pub use update::{update_scripts, UpdateRequest};

/// Per-script result inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Installed,
    Updated,
    UpToDate,
    Refreshed,
    WouldInstall,
    WouldUpdate,
    Pinned(String),
    LocalOnly,
    Unreachable,
    Removed,
    WouldRemove,
    /// The managed checkout has user edits; nothing was fetched.
    NeedsAttention,
    Failed,
}

impl ItemStatus {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, ItemStatus::Failed | ItemStatus::NeedsAttention)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Installed => f.write_str("installed"),
            ItemStatus::Updated => f.write_str("updated"),
            ItemStatus::UpToDate => f.write_str("up-to-date"),
            ItemStatus::Refreshed => f.write_str("refreshed"),
            ItemStatus::WouldInstall => f.write_str("would install"),
            ItemStatus::WouldUpdate => f.write_str("would update"),
            ItemStatus::Pinned(reference) => write!(f, "pinned ({reference})"),
            ItemStatus::LocalOnly => f.write_str("local-only"),
            ItemStatus::Unreachable => f.write_str("unreachable"),
            ItemStatus::Removed => f.write_str("removed"),
            ItemStatus::WouldRemove => f.write_str("would remove"),
            ItemStatus::NeedsAttention => f.write_str("needs-attention"),
            ItemStatus::Failed => f.write_str("failed"),
        }
    }
}

impl Serialize for ItemStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub name: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Managed tree removed (or slated for removal) alongside the script.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ItemReport {
    pub(crate) fn new(name: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            name: name.into(),
            status,
            source: None,
            commit: None,
            link: None,
            repo: None,
            reason: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn failed(name: impl Into<String>, err: &anyhow::Error) -> Self {
        let reason = err
            .chain()
            .find_map(|cause| {
                cause
                    .downcast_ref::<crate::core::tooling::errors::MaterializationError>()
                    .map(|failure| failure.reason().to_string())
            })
            .unwrap_or_else(|| "internal_error".to_string());
        let mut report = Self::new(name, ItemStatus::Failed);
        report.reason = Some(reason);
        report.error = Some(format!("{err:#}"));
        report
    }

    pub(crate) fn needs_attention(name: impl Into<String>, err: &LocalChangesError) -> Self {
        let mut report = Self::new(name, ItemStatus::NeedsAttention);
        report.reason = Some("local_changes".to_string());
        report.repo = Some(err.repo.display().to_string());
        report.error = Some(err.to_string());
        report
    }

    pub(crate) fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn with_commit(mut self, commit: Option<&str>) -> Self {
        self.commit = commit.map(ToString::to_string);
        self
    }

    pub(crate) fn with_link(mut self, link: Option<&Path>) -> Self {
        self.link = link.map(|path| path.display().to_string());
        self
    }

    pub(crate) fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Folds per-item reports into one outcome; any failed item fails the batch.
pub(crate) fn batch_outcome(
    verb: &str,
    items: &[ItemReport],
    warnings: &[String],
) -> ExecutionOutcome {
    let failed = items.iter().filter(|item| item.status.is_failure()).count();
    let mut details = json!({ "scripts": items });
    let mut seen = HashSet::new();
    let warnings: Vec<&String> = warnings.iter().filter(|warning| seen.insert(*warning)).collect();
    if !warnings.is_empty() {
        details["warnings"] = json!(warnings);
    }
    if failed > 0 {
        let blocked = items.iter().any(|item| item.status == ItemStatus::NeedsAttention);
        details["hint"] = if blocked {
            json!("commit or discard the edits in the managed checkout, or rerun with --force to overwrite them")
        } else {
            json!("rerun with -v for details, or fix the failing scripts and retry")
        };
        return ExecutionOutcome::failure(
            format!("{failed} of {} script(s) failed to {verb}", items.len()),
            details,
        );
    }
    ExecutionOutcome::success(summarize(items), details)
}

fn summarize(items: &[ItemReport]) -> String {
    match items {
        [] => "nothing to do".to_string(),
        [item] => format!("{} {}", item.name, item.status),
        _ => {
            let mut counts: Vec<(String, usize)> = Vec::new();
            for item in items {
                let label = match &item.status {
                    ItemStatus::Pinned(_) => "pinned".to_string(),
                    other => other.to_string(),
                };
                match counts.iter_mut().find(|(existing, _)| *existing == label) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((label, 1)),
                }
            }
            counts
                .into_iter()
                .map(|(label, count)| format!("{count} {label}"))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tooling::outcome::CommandStatus;

    #[test]
    fn statuses_render_for_humans_and_json() {
        assert_eq!(ItemStatus::Pinned("v1.0".into()).to_string(), "pinned (v1.0)");
        let report = ItemReport::new("tool.py", ItemStatus::UpToDate);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "up-to-date");
        assert!(value.get("warnings").is_none());
    }

    #[test]
    fn one_failure_fails_the_batch() {
        let items = vec![
            ItemReport::new("a.py", ItemStatus::Updated),
            ItemReport::failed("b.py", &anyhow::anyhow!("boom")),
        ];
        let outcome = batch_outcome("update", &items, &[]);
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.details["scripts"][1]["reason"], "internal_error");

        let ok = batch_outcome("update", &items[..1], &["x".into(), "x".into()]);
        assert_eq!(ok.details["warnings"], json!(["x"]));
        assert_eq!(ok.status, CommandStatus::Ok);
        assert_eq!(ok.message, "a.py updated");
    }

    #[test]
    fn summaries_group_statuses() {
        let items = vec![
            ItemReport::new("a.py", ItemStatus::Updated),
            ItemReport::new("b.py", ItemStatus::Pinned("v1".into())),
            ItemReport::new("c.py", ItemStatus::Updated),
        ];
        assert_eq!(summarize(&items), "2 updated, 1 pinned");
    }
}
