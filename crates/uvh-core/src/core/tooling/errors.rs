use std::path::PathBuf;

use serde_json::json;
use uvh_domain::{InvalidSourceError, MigrationError, RequirementsError};

use super::outcome::{ExecutionOutcome, InstallUserError};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("no installed script named `{key}`")]
pub struct ScriptNotFoundError {
    pub key: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("`{alias}` is already used by `{owner}`")]
pub struct AliasCollisionError {
    pub alias: String,
    pub owner: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("state file {} is unusable: {reason}", .path.display())]
pub struct StateCorruptionError {
    pub path: PathBuf,
    pub reason: String,
}

/// A managed checkout holds edits that fetching would discard.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{} has local changes: {detail}", .repo.display())]
pub struct LocalChangesError {
    pub repo: PathBuf,
    pub detail: String,
}

/// Failures while producing the on-disk script. State is never touched when one is raised.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterializationError {
    #[error("cloning {url} failed: {reason}")]
    Clone { url: String, reason: String },
    #[error("checking out `{reference}` failed: {reason}")]
    Checkout { reference: String, reason: String },
    #[error("copying {} failed: {reason}", .path.display())]
    Copy { path: PathBuf, reason: String },
    #[error("script `{script}` not found in {}", .repo.display())]
    MissingScript { script: String, repo: PathBuf },
    #[error("`{script}` is not valid Python: {reason}")]
    InvalidSyntax { script: String, reason: String },
    #[error("cannot update metadata in `{script}`: {reason}")]
    Metadata { script: String, reason: String },
    #[error("cannot link {}: {reason}", .link.display())]
    Link { link: PathBuf, reason: String },
    #[error("source {location} is no longer available")]
    SourceUnavailable { location: String },
}

impl MaterializationError {
    /// Short reason code used in per-item details.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            MaterializationError::Clone { .. } => "clone_failed",
            MaterializationError::Checkout { .. } => "checkout_failed",
            MaterializationError::Copy { .. } => "copy_failed",
            MaterializationError::MissingScript { .. } => "missing_script",
            MaterializationError::InvalidSyntax { .. } => "invalid_syntax",
            MaterializationError::Metadata { .. } => "invalid_metadata",
            MaterializationError::Link { .. } => "link_failed",
            MaterializationError::SourceUnavailable { .. } => "source_unavailable",
        }
    }

    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            MaterializationError::Clone { .. } | MaterializationError::Checkout { .. } => {
                Some("check the URL and ref, and that git can reach the remote")
            }
            MaterializationError::Link { .. } => {
                Some("remove the conflicting file or pick another name with --alias")
            }
            MaterializationError::InvalidSyntax { .. } => {
                Some("fix the script in its source, then rerun with --force")
            }
            _ => None,
        }
    }
}

/// Maps known error types anywhere in the chain to a shaped outcome.
#[must_use]
pub fn error_outcome(err: &anyhow::Error) -> Option<ExecutionOutcome> {
    for cause in err.chain() {
        if let Some(user) = cause.downcast_ref::<InstallUserError>() {
            return Some(ExecutionOutcome::user_error(
                user.message().to_string(),
                user.details().clone(),
            ));
        }
        if let Some(invalid) = cause.downcast_ref::<InvalidSourceError>() {
            return Some(ExecutionOutcome::user_error(
                invalid.to_string(),
                json!({
                    "reason": "invalid_source",
                    "source": invalid.input,
                    "hint": "pass an existing directory or a Git URL, optionally ending in #branch or @tag",
                }),
            ));
        }
        if let Some(requirements) = cause.downcast_ref::<RequirementsError>() {
            let reason = match requirements {
                RequirementsError::CircularInclude { .. } => "circular_include",
                _ => "invalid_requirements",
            };
            return Some(ExecutionOutcome::user_error(
                requirements.to_string(),
                json!({
                    "reason": reason,
                    "hint": "fix the requirements file and rerun the command",
                }),
            ));
        }
        if let Some(missing) = cause.downcast_ref::<ScriptNotFoundError>() {
            return Some(ExecutionOutcome::user_error(
                missing.to_string(),
                json!({
                    "reason": "script_not_found",
                    "script": missing.key,
                    "hint": "run `uvh list` to see installed scripts",
                }),
            ));
        }
        if let Some(collision) = cause.downcast_ref::<AliasCollisionError>() {
            return Some(ExecutionOutcome::user_error(
                collision.to_string(),
                json!({
                    "reason": "alias_collision",
                    "alias": collision.alias,
                    "owner": collision.owner,
                    "hint": "choose a different name with --alias",
                }),
            ));
        }
        if let Some(corrupt) = cause.downcast_ref::<StateCorruptionError>() {
            return Some(ExecutionOutcome::failure(
                corrupt.to_string(),
                json!({
                    "reason": "state_corrupt",
                    "state_file": corrupt.path.display().to_string(),
                    "hint": "run `uvh doctor --repair` to set the state file aside and start fresh",
                }),
            ));
        }
        if let Some(migration) = cause.downcast_ref::<MigrationError>() {
            return Some(ExecutionOutcome::failure(
                migration.to_string(),
                json!({
                    "reason": "migration_failed",
                    "version": migration.version,
                    "record": migration.record,
                    "hint": "the state file was left as it was before the failing step; a backup sits next to it",
                }),
            ));
        }
        if let Some(materialize) = cause.downcast_ref::<MaterializationError>() {
            let mut details = json!({ "reason": materialize.reason() });
            if let Some(hint) = materialize.hint() {
                details["hint"] = json!(hint);
            }
            return Some(ExecutionOutcome::failure(materialize.to_string(), details));
        }
    }
    None
}
