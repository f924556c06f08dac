//! Classifies uncommitted edits in a managed Git checkout.
//!
//! Installing rewrites the shebang and metadata block of each script, so a
//! checkout with only those edits is still safe to fetch over. Anything else is
//! a user edit that an update must not throw away.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::script_block::find_block;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocalChanges {
    Clean,
    /// Only the header edits made at install time.
    Managed,
    NeedsAttention,
    /// Git could not be asked.
    Unknown,
}

impl LocalChanges {
    /// Whether fetching over the checkout would lose user work.
    #[must_use]
    pub fn blocks_update(self) -> bool {
        self == LocalChanges::NeedsAttention
    }
}

impl fmt::Display for LocalChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalChanges::Clean => f.write_str("clean"),
            LocalChanges::Managed => f.write_str("managed"),
            LocalChanges::NeedsAttention => f.write_str("needs-attention"),
            LocalChanges::Unknown => f.write_str("unknown"),
        }
    }
}

/// Paths reported by `git diff`, `git diff --cached`, and `git ls-files --others`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSets {
    pub unstaged: Vec<String>,
    pub staged: Vec<String>,
    pub untracked: Vec<String>,
}

impl ChangeSets {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unstaged.is_empty() && self.staged.is_empty() && self.untracked.is_empty()
    }
}

/// State plus a short explanation when it is not clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub state: LocalChanges,
    pub detail: Option<String>,
}

impl ChangeReport {
    #[must_use]
    pub fn unknown(detail: impl Into<String>) -> Self {
        Self {
            state: LocalChanges::Unknown,
            detail: Some(detail.into()),
        }
    }
}

/// Classifies `changes` given the scripts installed from this checkout.
///
/// `managed_edit` answers whether one changed script differs from `HEAD` only
/// by its managed header.
pub fn classify(
    changes: &ChangeSets,
    scripts: &[String],
    mut managed_edit: impl FnMut(&str) -> bool,
) -> ChangeReport {
    if changes.is_empty() {
        return ChangeReport {
            state: LocalChanges::Clean,
            detail: None,
        };
    }
    let attention = |detail: String| ChangeReport {
        state: LocalChanges::NeedsAttention,
        detail: Some(detail),
    };
    if !changes.staged.is_empty() {
        return attention(preview("staged changes present", &changes.staged));
    }
    if !changes.untracked.is_empty() {
        return attention(preview("untracked files present", &changes.untracked));
    }
    let foreign: Vec<String> = changes
        .unstaged
        .iter()
        .filter(|path| !scripts.contains(path))
        .cloned()
        .collect();
    if !foreign.is_empty() {
        return attention(preview("uncommitted changes in other files", &foreign));
    }
    if let Some(edited) = changes.unstaged.iter().find(|path| !managed_edit(path.as_str())) {
        return attention(format!("script `{edited}` has custom uncommitted edits"));
    }
    ChangeReport {
        state: LocalChanges::Managed,
        detail: Some("only uv-managed shebang and metadata changes".to_string()),
    }
}

/// True when `working` equals `head` once the shebang line and the metadata
/// block are dropped from both.
#[must_use]
pub fn is_managed_edit(head: &str, working: &str) -> bool {
    strip_managed_header(head) == strip_managed_header(working)
}

fn strip_managed_header(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.lines().collect();
    if let Ok(Some(block)) = find_block(content) {
        let mut end = block.end + 1;
        // A block inserted at install time is followed by one blank line.
        if lines.get(end).is_some_and(|line| line.trim().is_empty()) {
            end += 1;
        }
        lines.drain(block.start..end.min(lines.len()));
    }
    if lines.first().is_some_and(|line| line.starts_with("#!")) {
        lines.remove(0);
    }
    lines
}

fn preview(prefix: &str, paths: &[String]) -> String {
    let mut sorted = paths.to_vec();
    sorted.sort();
    let shown = sorted.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    match sorted.len().saturating_sub(3) {
        0 => format!("{prefix}: {shown}"),
        more => format!("{prefix}: {shown}, +{more} more"),
    }
}
