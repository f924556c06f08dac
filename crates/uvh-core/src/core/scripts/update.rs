use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};
use uvh_domain::{merge_dependencies, same_dependency_set, Dependency, InstalledScript, SourceType};

use super::backend::{backend_for, Checkout};
use super::changes::{checkout_scripts, ensure_no_user_edits};
use super::deps::{detection_root, explicit_dependencies, resolve_dependencies};
use super::install::refresh_siblings;
use super::materialize::{finalize_script, FinalizeRequest, InstallOverrides, MaterializeSettings};
use super::{batch_outcome, ItemReport, ItemStatus};
use crate::core::config::context::CommandContext;
use crate::core::store::timestamp;
use crate::core::tooling::errors::LocalChangesError;
use crate::core::tooling::outcome::{ExecutionOutcome, InstallUserError};

#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct UpdateRequest {
    /// Script name or alias; `None` together with `all`.
    pub target: Option<String>,
    pub all: bool,
    pub force: bool,
    pub refresh_deps: bool,
    pub dry_run: bool,
    pub with: Vec<String>,
    pub overrides: InstallOverrides,
}

/// Checkouts already refreshed during this batch, keyed by managed path.
type Refreshed = HashMap<PathBuf, Checkout>;

/// Updates one script or every installed script.
///
/// # Errors
/// Returns an error when no target is given, the target is unknown, or the store
/// cannot be read; per-script failures are reported as failed items.
pub fn update_scripts(ctx: &CommandContext, request: &UpdateRequest) -> Result<ExecutionOutcome> {
    let (targets, records): (Vec<InstalledScript>, Vec<InstalledScript>) = {
        let store = ctx.store()?;
        let targets = match (&request.target, request.all) {
            (Some(target), _) => vec![store.resolve(target)?.clone()],
            (None, true) => store.records().cloned().collect(),
            (None, false) => {
                return Err(InstallUserError::new(
                    "nothing to update",
                    json!({
                        "reason": "missing_update_target",
                        "hint": "name a script or pass --all",
                    }),
                )
                .into())
            }
        };
        (targets, store.records().cloned().collect())
    };
    if targets.is_empty() {
        return Ok(ExecutionOutcome::success(
            "no scripts installed",
            json!({ "scripts": [] }),
        ));
    }

    let settings = MaterializeSettings::resolve(ctx.config(), &request.overrides);
    let names: HashSet<String> = targets.iter().map(|record| record.name.clone()).collect();
    let mut refreshed = Refreshed::new();
    let mut warnings = Vec::new();
    let mut items = Vec::with_capacity(targets.len());

    for record in &targets {
        let item = match update_one(ctx, &settings, request, &records, record, &mut refreshed) {
            Ok((item, found)) => {
                warnings.extend(found);
                item
            }
            Err(err) => {
                if let Some(local) = err.downcast_ref::<LocalChangesError>() {
                    warn!(script = %record.name, detail = %local.detail, "checkout has local changes");
                    items.push(
                        ItemReport::needs_attention(record.name.clone(), local)
                            .with_source(record.source_display()),
                    );
                    continue;
                }
                warn!(script = %record.name, error = %format!("{err:#}"), "update failed");
                ItemReport::failed(record.name.clone(), &err)
            }
        };
        items.push(item.with_source(record.source_display()));
    }

    let mut moved: Vec<&Checkout> = refreshed.values().filter(|checkout| checkout.replaced).collect();
    moved.sort_by(|a, b| a.repo_path.cmp(&b.repo_path));
    for checkout in moved {
        items.extend(refresh_siblings(ctx, &settings, checkout, &names));
    }

    let verb = if request.dry_run { "plan" } else { "update" };
    let mut outcome = batch_outcome(verb, &items, &warnings);
    if request.dry_run {
        outcome = outcome.with_detail("dry_run", json!(true));
    }
    Ok(outcome)
}

fn update_one(
    ctx: &CommandContext,
    settings: &MaterializeSettings,
    request: &UpdateRequest,
    records: &[InstalledScript],
    record: &InstalledScript,
    refreshed: &mut Refreshed,
) -> Result<(ItemReport, Vec<String>)> {
    let name = record.name.clone();
    let local = record.source_type == SourceType::Local;
    if local && request.all {
        debug!(script = %name, "skipping local source in batch update");
        return Ok((ItemReport::new(name, ItemStatus::LocalOnly), Vec::new()));
    }
    if local && !Path::new(&record.source_location).is_dir() {
        let mut item = ItemReport::new(name, ItemStatus::Unreachable);
        item.reason = Some("source_unavailable".to_string());
        return Ok((item, Vec::new()));
    }
    let pinned = record.is_pinned();
    if pinned && !request.force && !request.refresh_deps {
        let reference = record.git_ref.clone().unwrap_or_default();
        return Ok((
            ItemReport::new(name, ItemStatus::Pinned(reference))
                .with_commit(record.resolved_commit.as_deref()),
            Vec::new(),
        ));
    }
    // Pinned plus --refresh-deps without --force: dependencies only, the checkout stays put.
    let deps_only = pinned && !request.force;

    if request.dry_run {
        return plan_one(ctx, settings, request, records, record, deps_only);
    }

    let checkout = if deps_only {
        Checkout {
            repo_path: record.repo_path.clone(),
            commit: record.resolved_commit.clone(),
            replaced: false,
        }
    } else {
        refresh_checkout(ctx, settings, request, records, record, refreshed)?
    };

    let (dependencies, warnings) = desired_dependencies(ctx, request, record, &checkout.repo_path)?;
    let commit_moved = checkout.commit != record.resolved_commit;
    let deps_changed = !same_dependency_set(&record.dependencies, &dependencies);
    if deps_only && !deps_changed {
        return Ok((
            ItemReport::new(name, ItemStatus::UpToDate).with_commit(record.resolved_commit.as_deref()),
            warnings,
        ));
    }

    // Fetching or re-copying resets the file, so it is always finalized again.
    let finalized = finalize_script(
        ctx,
        settings,
        &FinalizeRequest {
            script_path: &record.install_path,
            name: &record.name,
            link_name: record.link_name(),
            dependencies: &dependencies,
        },
    )?;
    let mut all_warnings = warnings;
    all_warnings.extend(finalized.warnings);

    let changed = request.force || local || commit_moved || deps_changed;
    let status = if changed {
        let mut updated = record.clone();
        updated.resolved_commit = checkout.commit.clone();
        updated.dependencies = dependencies;
        updated.symlink_path = finalized.symlink_path.clone().or_else(|| record.symlink_path.clone());
        updated.updated_at = timestamp();
        ctx.store()?
            .upsert(updated)
            .with_context(|| format!("recording {name}"))?;
        info!(script = %name, commit = ?checkout.commit, "script updated");
        ItemStatus::Updated
    } else {
        debug!(script = %name, "already at the latest commit");
        ItemStatus::UpToDate
    };
    Ok((
        ItemReport::new(name, status)
            .with_commit(checkout.commit.as_deref())
            .with_link(finalized.symlink_path.as_deref())
            .with_warnings(all_warnings),
        Vec::new(),
    ))
}

/// Reports what an update would do without fetching or writing.
fn plan_one(
    ctx: &CommandContext,
    settings: &MaterializeSettings,
    request: &UpdateRequest,
    records: &[InstalledScript],
    record: &InstalledScript,
    deps_only: bool,
) -> Result<(ItemReport, Vec<String>)> {
    let name = record.name.clone();
    let (dependencies, warnings) = desired_dependencies(ctx, request, record, &record.repo_path)?;
    let deps_changed = !same_dependency_set(&record.dependencies, &dependencies);
    if deps_only {
        let status = if deps_changed {
            ItemStatus::WouldUpdate
        } else {
            ItemStatus::UpToDate
        };
        return Ok((ItemReport::new(name, status), warnings));
    }
    if record.source_type == SourceType::Local {
        return Ok((ItemReport::new(name, ItemStatus::WouldUpdate), warnings));
    }
    if !request.force {
        let scripts = checkout_scripts(records, &record.repo_path);
        if let Err(local) = ensure_no_user_edits(ctx, &record.repo_path, &scripts) {
            return Ok((ItemReport::needs_attention(name, &local), warnings));
        }
    }

    let backend = backend_for(
        &record.source_spec(),
        record.repo_path.clone(),
        settings.depth,
        record.copy_parent_dir,
    );
    let item = match backend.resolve(ctx) {
        Err(err) => {
            debug!(script = %name, error = %err, "remote not reachable");
            let mut item = ItemReport::new(name, ItemStatus::Unreachable);
            item.reason = Some(err.reason().to_string());
            item.error = Some(err.to_string());
            item
        }
        Ok(remote) => {
            let moves = remote.is_some() && remote != record.resolved_commit;
            let status = if moves || deps_changed || request.force {
                ItemStatus::WouldUpdate
            } else {
                ItemStatus::UpToDate
            };
            ItemReport::new(name, status).with_commit(remote.as_deref())
        }
    };
    Ok((item, warnings))
}

/// Fetches or re-copies the record's managed tree once per batch when it is shared.
///
/// A Git checkout with user edits is left untouched unless the update is forced.
fn refresh_checkout(
    ctx: &CommandContext,
    settings: &MaterializeSettings,
    request: &UpdateRequest,
    records: &[InstalledScript],
    record: &InstalledScript,
    refreshed: &mut Refreshed,
) -> Result<Checkout> {
    let shared = record.source_type == SourceType::Git || record.copy_parent_dir;
    if shared {
        if let Some(checkout) = refreshed.get(&record.repo_path) {
            debug!(repo = %record.repo_path.display(), "checkout already refreshed in this batch");
            return Ok(checkout.clone());
        }
    }
    if record.source_type == SourceType::Git && !request.force {
        ensure_no_user_edits(ctx, &record.repo_path, &checkout_scripts(records, &record.repo_path))?;
    }
    let backend = backend_for(
        &record.source_spec(),
        record.repo_path.clone(),
        settings.depth,
        record.copy_parent_dir,
    );
    let script = record.relative_script().to_string_lossy().to_string();
    let checkout = backend.refresh(ctx, &[script])?;
    if shared {
        refreshed.insert(record.repo_path.clone(), checkout.clone());
    }
    Ok(checkout)
}

/// Re-detected dependencies with `--refresh-deps`, otherwise the stored set plus `--with`.
fn desired_dependencies(
    ctx: &CommandContext,
    request: &UpdateRequest,
    record: &InstalledScript,
    repo_path: &Path,
) -> Result<(Vec<Dependency>, Vec<String>)> {
    let spec = record.source_spec();
    let explicit = explicit_dependencies(
        ctx.cwd(),
        Some(detection_root(&spec, repo_path)),
        &request.with,
        &[],
    )?;
    let mut warnings = explicit.warnings.clone();
    if request.refresh_deps {
        let (dependencies, found) = resolve_dependencies(
            &spec,
            repo_path,
            &explicit,
            record.source_package.as_deref(),
            record.source_package.is_some(),
        )?;
        warnings.extend(found);
        return Ok((dependencies, warnings));
    }
    Ok((
        merge_dependencies(record.dependencies.clone(), explicit.dependencies, None),
        warnings,
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::scripts::install::{install_scripts, InstallRequest};
    use crate::core::scripts::testing::TestEnv;
    use crate::core::tooling::errors::ScriptNotFoundError;
    use crate::core::tooling::outcome::CommandStatus;

    fn install_git(env: &TestEnv, url: &str, scripts: &[&str]) {
        let outcome = install_scripts(
            &env.context(),
            &InstallRequest {
                source: url.to_string(),
                scripts: scripts.iter().map(ToString::to_string).collect(),
                ..InstallRequest::default()
            },
        )
        .unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok, "{:?}", outcome.details);
    }

    fn update(env: &TestEnv, request: UpdateRequest) -> ExecutionOutcome {
        update_scripts(&env.context(), &request).unwrap()
    }

    fn record(env: &TestEnv, name: &str) -> InstalledScript {
        env.context().store().unwrap().get(name).unwrap().clone()
    }

    #[test]
    fn update_moves_a_branch_checkout() {
        let env = TestEnv::new();
        let url = env.git_remote("acme/tools", &[("tool.py", "print(1)\n")], "aaaa1111");
        install_git(&env, &url, &["tool.py"]);

        env.git.set_commit(&url, "bbbb2222");
        env.write_remote_file("acme/tools", "tool.py", "print(2)\n");
        let outcome = update(
            &env,
            UpdateRequest {
                target: Some("tool.py".into()),
                ..UpdateRequest::default()
            },
        );
        assert_eq!(outcome.message, "tool.py updated");
        let after = record(&env, "tool.py");
        assert_eq!(after.resolved_commit.as_deref(), Some("bbbb2222"));
        let text = fs::read_to_string(&after.install_path).unwrap();
        assert!(text.starts_with("#!/usr/bin/env -S uv run"));
        assert!(text.contains("print(2)"));

        let again = update(
            &env,
            UpdateRequest {
                target: Some("tool.py".into()),
                ..UpdateRequest::default()
            },
        );
        assert_eq!(again.details["scripts"][0]["status"], "up-to-date");
        assert_eq!(record(&env, "tool.py").updated_at, after.updated_at);
    }

    #[test]
    fn pinned_tag_is_left_alone() {
        let env = TestEnv::new();
        let url = env.git_remote("acme/tools", &[("tool.py", "print(1)\n")], "aaaa1111");
        env.git.set_ref(&url, "v1.0.0", "cccc3333");
        install_git(&env, &format!("{url}@v1.0.0"), &["tool.py"]);
        let before = record(&env, "tool.py");
        let calls = env.git.calls().len();

        env.git.set_ref(&url, "v1.0.0", "dddd4444");
        let outcome = update(
            &env,
            UpdateRequest {
                all: true,
                ..UpdateRequest::default()
            },
        );
        assert_eq!(outcome.details["scripts"][0]["status"], "pinned (v1.0.0)");
        assert_eq!(record(&env, "tool.py"), before);
        assert_eq!(env.git.calls().len(), calls);
    }

    #[test]
    fn user_edits_in_the_checkout_stop_the_update() {
        let env = TestEnv::new();
        let url = env.git_remote("acme/tools", &[("tool.py", "print(1)\n")], "aaaa1111");
        install_git(&env, &url, &["tool.py"]);
        let before = record(&env, "tool.py");
        let edited = fs::read_to_string(&before.install_path)
            .unwrap()
            .replace("print(1)", "print('patched')");
        fs::write(&before.install_path, &edited).unwrap();
        env.git.set_commit(&url, "bbbb2222");
        let calls = env.git.calls().len();

        let request = UpdateRequest {
            target: Some("tool.py".into()),
            ..UpdateRequest::default()
        };
        let planned = update(
            &env,
            UpdateRequest {
                dry_run: true,
                ..request.clone()
            },
        );
        assert_eq!(planned.details["scripts"][0]["status"], "needs-attention");

        let outcome = update(&env, request.clone());
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.details["scripts"][0]["status"], "needs-attention");
        assert_eq!(outcome.details["scripts"][0]["reason"], "local_changes");
        assert!(outcome.details["hint"].as_str().unwrap().contains("--force"));
        assert_eq!(env.git.calls().len(), calls);
        assert_eq!(fs::read_to_string(&before.install_path).unwrap(), edited);
        assert_eq!(record(&env, "tool.py"), before);

        let forced = update(
            &env,
            UpdateRequest {
                force: true,
                ..request
            },
        );
        assert_eq!(forced.details["scripts"][0]["status"], "updated");
        assert_eq!(record(&env, "tool.py").resolved_commit.as_deref(), Some("bbbb2222"));
    }

    #[test]
    fn refresh_deps_on_a_pinned_ref_keeps_the_commit() {
        let env = TestEnv::new();
        let url = env.git_remote("acme/tools", &[("tool.py", "print(1)\n")], "aaaa1111");
        env.git.set_ref(&url, "v1.0.0", "cccc3333");
        install_git(&env, &format!("{url}@v1.0.0"), &["tool.py"]);
        let before = record(&env, "tool.py");
        fs::write(before.repo_path.join("requirements.txt"), "rich>=13\n").unwrap();
        let calls = env.git.calls().len();

        let outcome = update(
            &env,
            UpdateRequest {
                target: Some("tool.py".into()),
                refresh_deps: true,
                ..UpdateRequest::default()
            },
        );
        assert_eq!(outcome.details["scripts"][0]["status"], "updated");
        let after = record(&env, "tool.py");
        assert_eq!(after.resolved_commit, before.resolved_commit);
        assert_eq!(after.git_ref, before.git_ref);
        assert_eq!(after.dependencies[0].name, "rich");
        assert_eq!(env.git.calls().len(), calls);
        assert!(fs::read_to_string(&after.install_path).unwrap().contains("rich>=13"));
    }

    #[test]
    fn batch_update_skips_local_and_isolates_failures() {
        let env = TestEnv::new();
        let source = env.source_dir("tools", &[("local.py", "print(1)\n")]);
        install_scripts(
            &env.context(),
            &InstallRequest {
                source: source.display().to_string(),
                scripts: vec!["local.py".into()],
                ..InstallRequest::default()
            },
        )
        .unwrap();
        let url = env.git_remote("acme/tools", &[("a.py", "print('a')\n")], "aaaa1111");
        install_git(&env, &url, &["a.py"]);
        env.write_remote_file("acme/tools", "a.py", "x = (\n");
        env.git.set_commit(&url, "bbbb2222");

        let outcome = update(
            &env,
            UpdateRequest {
                all: true,
                ..UpdateRequest::default()
            },
        );
        assert_eq!(outcome.status, CommandStatus::Failure);
        let scripts = outcome.details["scripts"].as_array().unwrap();
        let status_of = |name: &str| {
            scripts
                .iter()
                .find(|item| item["name"] == name)
                .map(|item| item["status"].as_str().unwrap().to_string())
                .unwrap()
        };
        assert_eq!(status_of("local.py"), "local-only");
        assert_eq!(status_of("a.py"), "failed");
        assert_eq!(record(&env, "a.py").resolved_commit.as_deref(), Some("aaaa1111"));
    }

    #[test]
    fn missing_local_source_is_unreachable() {
        let env = TestEnv::new();
        let source = env.source_dir("gone", &[("tool.py", "print(1)\n")]);
        install_scripts(
            &env.context(),
            &InstallRequest {
                source: source.display().to_string(),
                scripts: vec!["tool.py".into()],
                ..InstallRequest::default()
            },
        )
        .unwrap();
        fs::remove_dir_all(&source).unwrap();
        let outcome = update(
            &env,
            UpdateRequest {
                target: Some("tool.py".into()),
                ..UpdateRequest::default()
            },
        );
        assert_eq!(outcome.status, CommandStatus::Ok);
        assert_eq!(outcome.details["scripts"][0]["status"], "unreachable");
    }

    #[test]
    fn dry_run_plans_against_the_remote() {
        let env = TestEnv::new();
        let url = env.git_remote("acme/tools", &[("tool.py", "print(1)\n")], "aaaa1111");
        install_git(&env, &url, &["tool.py"]);
        env.git.set_commit(&url, "bbbb2222");
        let before = record(&env, "tool.py");

        let outcome = update(
            &env,
            UpdateRequest {
                target: Some("tool.py".into()),
                dry_run: true,
                ..UpdateRequest::default()
            },
        );
        assert_eq!(outcome.details["scripts"][0]["status"], "would update");
        assert_eq!(outcome.details["dry_run"], true);
        assert_eq!(record(&env, "tool.py"), before);
    }

    #[test]
    fn unknown_target_and_missing_target_are_user_errors() {
        let env = TestEnv::new();
        let err = update_scripts(
            &env.context(),
            &UpdateRequest {
                target: Some("ghost".into()),
                ..UpdateRequest::default()
            },
        )
        .unwrap_err();
        assert!(err.downcast_ref::<ScriptNotFoundError>().is_some());

        let err = update_scripts(&env.context(), &UpdateRequest::default()).unwrap_err();
        assert!(err.downcast_ref::<InstallUserError>().is_some());
    }
}
