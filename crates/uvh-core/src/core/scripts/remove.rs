use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};
use uvh_domain::InstalledScript;

use super::materialize::unlink;
use super::{batch_outcome, ItemReport, ItemStatus};
use crate::core::config::context::CommandContext;
use crate::core::tooling::outcome::{ExecutionOutcome, InstallUserError};

#[derive(Debug, Clone, Default)]
pub struct RemoveRequest {
    /// Names or aliases.
    pub targets: Vec<String>,
    /// Also delete the managed checkout once nothing else uses it.
    pub clean_repo: bool,
    pub dry_run: bool,
}

/// Removes scripts, their links, and optionally their managed checkouts.
///
/// # Errors
/// Returns an error when no target is given or a target is unknown; nothing is
/// removed in that case.
pub fn remove_scripts(ctx: &CommandContext, request: &RemoveRequest) -> Result<ExecutionOutcome> {
    if request.targets.is_empty() {
        return Err(InstallUserError::new(
            "no scripts given",
            json!({ "reason": "missing_scripts", "hint": "name the scripts to remove" }),
        )
        .into());
    }
    let records: Vec<InstalledScript> = {
        let store = ctx.store()?;
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(request.targets.len());
        for target in &request.targets {
            let record = store.resolve(target)?;
            if seen.insert(record.name.clone()) {
                records.push(record.clone());
            }
        }
        records
    };

    let removing: HashSet<String> = records.iter().map(|record| record.name.clone()).collect();
    let mut cleaned = HashSet::new();
    let mut items = Vec::with_capacity(records.len());
    for record in &records {
        let item = match remove_one(ctx, request, record, &removing, &mut cleaned) {
            Ok(item) => item,
            Err(err) => {
                warn!(script = %record.name, error = %format!("{err:#}"), "remove failed");
                ItemReport::failed(record.name.clone(), &err)
            }
        };
        items.push(item.with_source(record.source_display()));
    }

    let verb = if request.dry_run { "plan" } else { "remove" };
    let mut outcome = batch_outcome(verb, &items, &[]);
    if request.dry_run {
        outcome = outcome.with_detail("dry_run", json!(true));
    }
    Ok(outcome)
}

fn remove_one(
    ctx: &CommandContext,
    request: &RemoveRequest,
    record: &InstalledScript,
    removing: &HashSet<String>,
    cleaned: &mut HashSet<PathBuf>,
) -> Result<ItemReport> {
    let status = if request.dry_run {
        ItemStatus::WouldRemove
    } else {
        ItemStatus::Removed
    };
    let mut item = ItemReport::new(record.name.clone(), status).with_link(record.symlink_path.as_deref());

    let clean = request.clean_repo && repo_released(ctx, record, removing)?;
    if request.clean_repo && !clean {
        debug!(script = %record.name, repo = %record.repo_path.display(), "checkout still in use");
        item.reason = Some("repo_shared".to_string());
    }
    let repo_dir = ctx.config().paths().repo_dir.clone();
    let deletable = clean && managed_path(&repo_dir, &record.repo_path);
    if clean && !deletable {
        warn!(repo = %record.repo_path.display(), "not deleting a checkout outside the repository directory");
        item.reason = Some("repo_unmanaged".to_string());
    }
    if deletable && !cleaned.contains(&record.repo_path) {
        item.repo = Some(record.repo_path.display().to_string());
    }

    if request.dry_run {
        return Ok(item);
    }
    if let Some(link) = &record.symlink_path {
        if unlink(ctx, link)? {
            debug!(link = %link.display(), "removed link");
        }
    }
    ctx.store()?
        .delete(&record.name)
        .with_context(|| format!("forgetting {}", record.name))?;
    if deletable && cleaned.insert(record.repo_path.clone()) && record.repo_path.exists() {
        ctx.fs().remove_dir_all(&record.repo_path)?;
        info!(repo = %record.repo_path.display(), "removed managed checkout");
    }
    info!(script = %record.name, "script removed");
    Ok(item)
}

/// True when every record sharing the checkout or source is part of this removal;
/// records deleted earlier in the batch are already gone from the store.
fn repo_released(
    ctx: &CommandContext,
    record: &InstalledScript,
    removing: &HashSet<String>,
) -> Result<bool> {
    let store = ctx.store()?;
    Ok(store
        .referencing(&record.source_location, &record.repo_path)
        .iter()
        .all(|other| other.name == record.name || removing.contains(&other.name)))
}

/// Only trees under the configured repository directory are ever deleted.
fn managed_path(repo_dir: &Path, path: &Path) -> bool {
    path != repo_dir && path.starts_with(repo_dir)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::scripts::install::{install_scripts, InstallRequest};
    use crate::core::scripts::testing::TestEnv;
    use crate::core::tooling::errors::ScriptNotFoundError;
    use crate::core::tooling::outcome::CommandStatus;

    fn install(env: &TestEnv, source: &str, script: &str, alias: Option<&str>) {
        let outcome = install_scripts(
            &env.context(),
            &InstallRequest {
                source: source.to_string(),
                scripts: vec![script.to_string()],
                alias: alias.map(ToString::to_string),
                ..InstallRequest::default()
            },
        )
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok, "{:?}", outcome.details);
    }

    fn remove(env: &TestEnv, targets: &[&str], clean_repo: bool) -> ExecutionOutcome {
        remove_scripts(
            &env.context(),
            &RemoveRequest {
                targets: targets.iter().map(ToString::to_string).collect(),
                clean_repo,
                dry_run: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn shared_checkout_survives_until_the_last_script() {
        let env = TestEnv::new();
        let url = env.git_remote(
            "acme/tools",
            &[("a.py", "print('a')\n"), ("b.py", "print('b')\n")],
            "aaaa1111",
        );
        install(&env, &url, "a.py", None);
        install(&env, &url, "b.py", Some("bee"));
        let repo = env.context().store().unwrap().get("a.py").unwrap().repo_path.clone();

        let first = remove(&env, &["a.py"], true);
        assert_eq!(first.details["scripts"][0]["reason"], "repo_shared");
        assert!(repo.exists());
        assert!(!env.install_dir().join("a.py").exists());

        let last = remove(&env, &["bee"], true);
        assert_eq!(last.details["scripts"][0]["status"], "removed");
        assert!(!repo.exists());
        assert!(!env.install_dir().join("bee").exists());
        assert!(env.context().store().unwrap().is_empty());
    }

    #[test]
    fn removing_every_sharer_at_once_cleans_the_checkout() {
        let env = TestEnv::new();
        let url = env.git_remote(
            "acme/tools",
            &[("a.py", "print('a')\n"), ("b.py", "print('b')\n")],
            "aaaa1111",
        );
        install(&env, &url, "a.py", None);
        install(&env, &url, "b.py", None);
        let repo = env.context().store().unwrap().get("a.py").unwrap().repo_path.clone();

        let outcome = remove(&env, &["a.py", "b.py"], true);
        assert_eq!(outcome.message, "2 removed");
        assert!(!repo.exists());
    }

    #[test]
    fn dry_run_keeps_everything() {
        let env = TestEnv::new();
        let source = env.source_dir("tools", &[("tool.py", "print(1)\n")]);
        install(&env, &source.display().to_string(), "tool.py", None);
        let outcome = remove_scripts(
            &env.context(),
            &RemoveRequest {
                targets: vec!["tool.py".into()],
                clean_repo: true,
                dry_run: true,
            },
        )
        .unwrap();
        assert_eq!(outcome.details["scripts"][0]["status"], "would remove");
        assert!(outcome.details["scripts"][0]["repo"].is_string());
        assert!(env.context().store().unwrap().get("tool.py").is_some());
        assert!(env.install_dir().join("tool.py").exists());
    }

    #[test]
    fn unknown_target_removes_nothing() {
        let env = TestEnv::new();
        let source = env.source_dir("tools", &[("tool.py", "print(1)\n")]);
        install(&env, &source.display().to_string(), "tool.py", None);
        let err = remove_scripts(
            &env.context(),
            &RemoveRequest {
                targets: vec!["tool.py".into(), "ghost".into()],
                ..RemoveRequest::default()
            },
        )
        .unwrap_err();
        assert!(err.downcast_ref::<ScriptNotFoundError>().is_some());
        assert!(env.context().store().unwrap().get("tool.py").is_some());
    }

    #[test]
    fn only_trees_under_the_repo_dir_are_managed() {
        let root = Path::new("/data/repos");
        assert!(managed_path(root, Path::new("/data/repos/acme-tools")));
        assert!(!managed_path(root, root));
        assert!(!managed_path(root, Path::new("/home/me/tools")));
    }
}
