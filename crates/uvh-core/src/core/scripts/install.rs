use std::collections::HashSet;
use std::path::{Component, Path};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};
use uvh_domain::{same_dependency_set, Dependency, InstalledScript, SourceSpec};

use super::backend::{backend_for, Checkout};
use super::browse::discover_candidates;
use super::changes::{checkout_scripts, ensure_no_user_edits};
use super::deps::{
    detection_root, explicit_dependencies, resolve_dependencies, source_package_dependency,
};
use super::materialize::{finalize_script, unlink, FinalizeRequest, InstallOverrides, MaterializeSettings};
use super::{batch_outcome, ItemReport, ItemStatus};
use crate::core::config::context::CommandContext;
use crate::core::store::timestamp;
use crate::core::tooling::outcome::{ExecutionOutcome, InstallUserError};

#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct InstallRequest {
    pub source: String,
    pub scripts: Vec<String>,
    /// `--with` values: requirements files or comma-separated lists.
    pub with: Vec<String>,
    /// Exact requirement lines, as carried by an export file.
    pub requirements: Vec<String>,
    /// Skip `requirements.txt` detection; the dependency set is exactly
    /// `requirements` plus `with`.
    pub exact_dependencies: bool,
    pub alias: Option<String>,
    pub force: bool,
    pub dry_run: bool,
    pub copy_parent_dir: bool,
    /// `Some(None)` adds the source under its default package name.
    pub add_source_package: Option<Option<String>>,
    pub no_deps: bool,
    pub overrides: InstallOverrides,
}

/// What install does for one script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Fresh,
    Update,
    NoOp,
}

/// Inputs shared by every script of one install batch.
struct Batch<'a> {
    settings: MaterializeSettings,
    spec: SourceSpec,
    request: &'a InstallRequest,
    source_package: Option<String>,
}

struct Planned {
    script: String,
    name: String,
    alias: Option<String>,
    existing: Option<InstalledScript>,
    decision: Decision,
}

/// Installs scripts from one source.
///
/// # Errors
/// Returns an error for unusable requests (bad source, alias collision, unreadable
/// requirements); per-script materialization failures are reported as failed items.
pub fn install_scripts(ctx: &CommandContext, request: &InstallRequest) -> Result<ExecutionOutcome> {
    let (items, warnings) = install_batch(ctx, request)?;
    let verb = if request.dry_run { "plan" } else { "install" };
    let mut outcome = batch_outcome(verb, &items, &warnings);
    if request.dry_run {
        outcome = outcome.with_detail("dry_run", json!(true));
    }
    Ok(outcome)
}

pub(crate) fn install_batch(
    ctx: &CommandContext,
    request: &InstallRequest,
) -> Result<(Vec<ItemReport>, Vec<String>)> {
    let home = ctx.home();
    let spec = SourceSpec::resolve(&request.source, ctx.cwd(), home.as_deref())?;
    if request.scripts.is_empty() {
        return Err(missing_scripts(ctx, &spec, request));
    }
    validate_request(&spec, request)?;

    let settings = MaterializeSettings::resolve(ctx.config(), &request.overrides);
    let backend = backend_for(
        &spec,
        settings.repo_dir.join(spec.repo_key()),
        settings.depth,
        request.copy_parent_dir,
    );
    let mut warnings = Vec::new();
    let source_package = request.add_source_package.as_ref().map(Option::as_deref);
    let batch = Batch {
        source_package: source_package
            .filter(|_| !request.no_deps)
            .map(|name| source_package_dependency(&spec, name, backend.repo_path()).name),
        settings,
        spec,
        request,
    };
    let spec = &batch.spec;

    let (mut plans, shared_scripts) = {
        let store = ctx.store()?;
        let shared_scripts = checkout_scripts(store.records(), backend.repo_path());
        let mut plans = Vec::with_capacity(request.scripts.len());
        for script in &request.scripts {
            let name = script_name(script)?;
            let existing = store.get(&name).filter(|record| record.name == name).cloned();
            let alias = request
                .alias
                .clone()
                .or_else(|| existing.as_ref().and_then(|record| record.alias.clone()))
                .filter(|alias| *alias != name);
            store.check_alias(&name, alias.as_deref())?;
            plans.push(Planned {
                script: script.clone(),
                name,
                alias,
                existing,
                decision: Decision::Fresh,
            });
        }
        (plans, shared_scripts)
    };

    let mut desired_for_existing = None;
    for plan in &mut plans {
        plan.decision = match &plan.existing {
            None => Decision::Fresh,
            Some(_) if request.force => Decision::Update,
            Some(existing) => {
                if desired_for_existing.is_none() && backend.repo_path().exists() {
                    let (deps, found) =
                        desired_dependencies(ctx, spec, backend.repo_path(), request, source_package)?;
                    warnings.extend(found);
                    desired_for_existing = Some(deps);
                }
                if is_unchanged(
                    existing,
                    &batch,
                    backend.repo_path(),
                    plan.alias.as_deref(),
                    desired_for_existing.as_deref(),
                ) {
                    Decision::NoOp
                } else {
                    Decision::Update
                }
            }
        };
        debug!(script = %plan.name, decision = ?plan.decision, "install decision");
    }

    if request.dry_run {
        let items = plans
            .iter()
            .map(|plan| {
                let status = match plan.decision {
                    Decision::Fresh => ItemStatus::WouldInstall,
                    Decision::Update => ItemStatus::WouldUpdate,
                    Decision::NoOp => ItemStatus::UpToDate,
                };
                ItemReport::new(plan.name.clone(), status).with_source(spec.to_string())
            })
            .collect();
        return Ok((items, warnings));
    }

    let pending: Vec<String> = plans
        .iter()
        .filter(|plan| plan.decision != Decision::NoOp)
        .map(|plan| plan.script.clone())
        .collect();
    let mut items = Vec::with_capacity(plans.len());
    if pending.is_empty() {
        items.extend(plans.iter().map(|plan| {
            ItemReport::new(plan.name.clone(), ItemStatus::UpToDate)
                .with_source(spec.to_string())
                .with_commit(plan.existing.as_ref().and_then(|record| record.resolved_commit.as_deref()))
        }));
        return Ok((items, warnings));
    }

    let guarded = matches!(spec, SourceSpec::Git { .. }) && !request.force && !shared_scripts.is_empty();
    if guarded {
        if let Err(local) = ensure_no_user_edits(ctx, backend.repo_path(), &shared_scripts) {
            warn!(source = %spec, detail = %local.detail, "checkout has local changes");
            items.extend(plans.iter().map(|plan| match plan.decision {
                Decision::NoOp => ItemReport::new(plan.name.clone(), ItemStatus::UpToDate),
                _ => ItemReport::needs_attention(plan.name.clone(), &local),
            }));
            return Ok((items, warnings));
        }
    }

    let checkout = match backend.materialize(ctx, &pending) {
        Ok(checkout) => checkout,
        Err(err) => {
            let err = anyhow::Error::new(err);
            warn!(source = %spec, error = %format!("{err:#}"), "materialization failed");
            items.extend(plans.iter().map(|plan| match plan.decision {
                Decision::NoOp => ItemReport::new(plan.name.clone(), ItemStatus::UpToDate),
                _ => ItemReport::failed(plan.name.clone(), &err),
            }));
            return Ok((items, warnings));
        }
    };

    let (dependencies, found) =
        desired_dependencies(ctx, spec, &checkout.repo_path, request, source_package)?;
    warnings.extend(found);

    let mut finished = HashSet::new();
    for plan in &plans {
        if plan.decision == Decision::NoOp {
            items.push(
                ItemReport::new(plan.name.clone(), ItemStatus::UpToDate)
                    .with_source(spec.to_string())
                    .with_commit(plan.existing.as_ref().and_then(|record| record.resolved_commit.as_deref())),
            );
            continue;
        }
        let item = match install_one(ctx, &batch, &checkout, plan, &dependencies) {
            Ok(item) => {
                finished.insert(plan.name.clone());
                item
            }
            Err(err) => {
                warn!(script = %plan.name, error = %format!("{err:#}"), "install failed");
                ItemReport::failed(plan.name.clone(), &err)
            }
        };
        items.push(item);
    }

    if checkout.replaced {
        items.extend(refresh_siblings(ctx, &batch.settings, &checkout, &finished));
    }
    Ok((items, warnings))
}

/// The error for an install that named no scripts, listing what the source offers.
fn missing_scripts(ctx: &CommandContext, spec: &SourceSpec, request: &InstallRequest) -> anyhow::Error {
    let candidates = match discover_candidates(ctx, spec) {
        Ok(candidates) => candidates,
        Err(err) => return err.context("no scripts given; listing the source failed"),
    };
    let hint = match candidates.first() {
        Some(first) => format!("name the scripts to install, e.g. `uvh install {} {first}`", request.source),
        None => format!("no candidate scripts found; try `uvh browse {} --all`", request.source),
    };
    InstallUserError::new(
        "no scripts given",
        json!({ "reason": "missing_scripts", "candidates": candidates, "hint": hint }),
    )
    .into()
}

fn validate_request(spec: &SourceSpec, request: &InstallRequest) -> Result<()> {
    if request.alias.is_some() && request.scripts.len() > 1 {
        return Err(InstallUserError::new(
            "--alias can only be used when installing a single script",
            json!({ "reason": "alias_needs_single_script" }),
        )
        .into());
    }
    for script in &request.scripts {
        check_script_path(script)?;
    }
    let local = matches!(spec, SourceSpec::Local { .. });
    if request.copy_parent_dir && !local {
        return Err(InstallUserError::new(
            "--copy-parent-dir only applies to local sources",
            json!({ "reason": "copy_parent_dir_requires_local" }),
        )
        .into());
    }
    if local && request.add_source_package.is_some() && !request.copy_parent_dir {
        return Err(InstallUserError::new(
            "--add-source-package needs --copy-parent-dir for local sources",
            json!({
                "reason": "source_package_requires_copy",
                "hint": "rerun with --copy-parent-dir so the package points at a managed copy",
            }),
        )
        .into());
    }
    Ok(())
}

/// Script arguments are relative paths that stay inside the source tree.
fn check_script_path(script: &str) -> Result<()> {
    let escapes = Path::new(script.trim()).components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(InstallUserError::new(
            format!("invalid script name `{script}`: it must be a path inside the source"),
            json!({
                "reason": "invalid_script_name",
                "script": script,
                "hint": "name scripts relative to the source root, without `..` or a leading `/`",
            }),
        )
        .into());
    }
    Ok(())
}

/// Lexical containment; `starts_with` alone accepts `root/../x`.
fn stays_inside(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root).is_ok_and(|rest| {
        rest.components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
    })
}

fn script_name(script: &str) -> Result<String> {
    let name = Path::new(script.trim())
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty());
    name.ok_or_else(|| {
        InstallUserError::new(
            format!("`{script}` is not a script path"),
            json!({ "reason": "invalid_script_name" }),
        )
        .into()
    })
}

/// `--with` files are read from the materialized tree, so this runs once it exists.
fn desired_dependencies(
    ctx: &CommandContext,
    spec: &SourceSpec,
    repo_path: &Path,
    request: &InstallRequest,
    source_package: Option<Option<&str>>,
) -> Result<(Vec<Dependency>, Vec<String>)> {
    if request.no_deps {
        return Ok((Vec::new(), Vec::new()));
    }
    let mut explicit = explicit_dependencies(
        ctx.cwd(),
        Some(detection_root(spec, repo_path)),
        &request.with,
        &request.requirements,
    )?;
    explicit.replaces_detection |= request.exact_dependencies;
    let (dependencies, found) = resolve_dependencies(
        spec,
        repo_path,
        &explicit,
        source_package.flatten(),
        source_package.is_some(),
    )?;
    let mut warnings = explicit.warnings;
    warnings.extend(found);
    Ok((dependencies, warnings))
}

/// An existing record matches the request when source, ref, layout, alias, and the
/// resolved dependency set are all identical and its artifact is still on disk.
fn is_unchanged(
    existing: &InstalledScript,
    batch: &Batch<'_>,
    repo_path: &Path,
    alias: Option<&str>,
    desired: Option<&[Dependency]>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let spec = &batch.spec;
    existing.source_location == spec.location()
        && existing.git_ref.as_deref() == spec.reference().map(|reference| reference.name.as_str())
        && existing.copy_parent_dir == batch.request.copy_parent_dir
        && existing.source_package == batch.source_package
        && existing.repo_path == repo_path
        && existing.alias.as_deref() == alias
        && existing.install_path.is_file()
        && same_dependency_set(&existing.dependencies, desired)
}

fn install_one(
    ctx: &CommandContext,
    batch: &Batch<'_>,
    checkout: &Checkout,
    plan: &Planned,
    dependencies: &[Dependency],
) -> Result<ItemReport> {
    let spec = &batch.spec;
    let install_path = checkout.repo_path.join(&plan.script);
    if !stays_inside(&checkout.repo_path, &install_path) {
        anyhow::bail!(
            "{} resolves outside {}",
            plan.script,
            checkout.repo_path.display()
        );
    }
    let link_name = plan.alias.as_deref().unwrap_or(&plan.name);
    let finalized = finalize_script(
        ctx,
        &batch.settings,
        &FinalizeRequest {
            script_path: &install_path,
            name: &plan.name,
            link_name,
            dependencies,
        },
    )?;

    if let Some(previous) = plan.existing.as_ref().and_then(|record| record.symlink_path.as_ref()) {
        if finalized.symlink_path.as_ref() != Some(previous) && unlink(ctx, previous)? {
            debug!(link = %previous.display(), "removed stale link");
        }
    }

    let now = timestamp();
    let record = InstalledScript {
        name: plan.name.clone(),
        alias: plan.alias.clone(),
        source_type: spec.source_type(),
        source_location: spec.location(),
        git_ref: spec.reference().map(|reference| reference.name.clone()),
        ref_kind: spec.reference().map(|reference| reference.kind).unwrap_or_default(),
        resolved_commit: checkout.commit.clone(),
        dependencies: dependencies.to_vec(),
        source_package: batch.source_package.clone(),
        copy_parent_dir: batch.request.copy_parent_dir,
        repo_path: checkout.repo_path.clone(),
        install_path: install_path.clone(),
        symlink_path: finalized.symlink_path.clone(),
        installed_at: plan
            .existing
            .as_ref()
            .map_or_else(|| now.clone(), |record| record.installed_at.clone()),
        updated_at: now,
        schema_version: uvh_domain::STORE_SCHEMA_VERSION,
    };
    ctx.store()?
        .upsert(record)
        .with_context(|| format!("recording {}", plan.name))?;

    let status = if plan.existing.is_some() {
        ItemStatus::Updated
    } else {
        ItemStatus::Installed
    };
    info!(script = %plan.name, %status, "script installed");
    Ok(ItemReport::new(plan.name.clone(), status)
        .with_source(spec.to_string())
        .with_commit(checkout.commit.as_deref())
        .with_link(finalized.symlink_path.as_deref())
        .with_warnings(finalized.warnings))
}

/// Re-finalizes records sharing a checkout that was just overwritten.
pub(crate) fn refresh_siblings(
    ctx: &CommandContext,
    settings: &MaterializeSettings,
    checkout: &Checkout,
    skip: &HashSet<String>,
) -> Vec<ItemReport> {
    let siblings: Vec<InstalledScript> = match ctx.store() {
        Ok(store) => store
            .records()
            .filter(|record| record.repo_path == checkout.repo_path && !skip.contains(&record.name))
            .cloned()
            .collect(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "cannot list sibling scripts");
            return Vec::new();
        }
    };
    siblings
        .into_iter()
        .map(|record| match refresh_sibling(ctx, settings, checkout, &record) {
            Ok(item) => item,
            Err(err) => {
                warn!(script = %record.name, error = %format!("{err:#}"), "sibling refresh failed");
                ItemReport::failed(record.name.clone(), &err)
            }
        })
        .collect()
}

fn refresh_sibling(
    ctx: &CommandContext,
    settings: &MaterializeSettings,
    checkout: &Checkout,
    record: &InstalledScript,
) -> Result<ItemReport> {
    let finalized = finalize_script(
        ctx,
        settings,
        &FinalizeRequest {
            script_path: &record.install_path,
            name: &record.name,
            link_name: record.link_name(),
            dependencies: &record.dependencies,
        },
    )?;
    let mut updated = record.clone();
    updated.symlink_path = finalized.symlink_path.clone().or_else(|| record.symlink_path.clone());
    if updated.resolved_commit != checkout.commit {
        updated.resolved_commit = checkout.commit.clone();
        updated.updated_at = timestamp();
    }
    if updated != *record {
        ctx.store()?.upsert(updated)?;
    }
    debug!(script = %record.name, "refreshed sibling in shared checkout");
    Ok(ItemReport::new(record.name.clone(), ItemStatus::Refreshed)
        .with_source(record.source_display())
        .with_commit(checkout.commit.as_deref())
        .with_warnings(finalized.warnings))
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::scripts::testing::TestEnv;
    use crate::core::tooling::outcome::CommandStatus;

    fn local_request(source: &Path, scripts: &[&str]) -> InstallRequest {
        InstallRequest {
            source: source.display().to_string(),
            scripts: scripts.iter().map(ToString::to_string).collect(),
            ..InstallRequest::default()
        }
    }

    #[test]
    fn fresh_install_records_and_links() {
        let env = TestEnv::new();
        let source = env.source_dir(
            "tools",
            &[("tool.py", "print('hi')\n"), ("requirements.txt", "requests>=2.0\n")],
        );
        let ctx = env.context();
        let outcome = install_scripts(&ctx, &local_request(&source, &["tool.py"])).unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok, "{:?}", outcome.details);
        assert_eq!(outcome.details["scripts"][0]["status"], "installed");

        let store = ctx.store().unwrap();
        let record = store.get("tool.py").unwrap();
        assert_eq!(record.dependencies.len(), 1);
        assert_eq!(record.symlink_path.as_deref(), Some(env.install_dir().join("tool.py").as_path()));
        assert!(record.install_path.starts_with(env.repo_dir()));
        let text = fs::read_to_string(&record.install_path).unwrap();
        assert!(text.contains("requests>=2.0"));
    }

    #[test]
    fn with_file_is_read_from_the_source_tree() {
        let env = TestEnv::new();
        let url = env.git_remote(
            "acme/tools",
            &[("tool.py", "print(1)\n"), ("requirements-dev.txt", "pytest>=8\n")],
            "aaaa1111",
        );
        let request = InstallRequest {
            source: url,
            scripts: vec!["tool.py".to_string()],
            with: vec!["requirements-dev.txt".to_string()],
            ..InstallRequest::default()
        };
        let outcome = install_scripts(&env.context(), &request).unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok, "{:?}", outcome.details);
        let ctx = env.context();
        let store = ctx.store().unwrap();
        let record = store.get("tool.py").unwrap();
        let names: Vec<&str> = record.dependencies.iter().map(|dep| dep.name.as_str()).collect();
        assert_eq!(names, ["pytest"]);
    }

    #[test]
    fn second_identical_install_is_a_noop() {
        let env = TestEnv::new();
        let url = env.git_remote("acme/tools", &[("tool.py", "print('hi')\n")], "aaaa1111");
        let request = InstallRequest {
            source: url,
            scripts: vec!["tool.py".to_string()],
            with: vec!["click".to_string()],
            ..InstallRequest::default()
        };
        install_scripts(&env.context(), &request).unwrap();
        let before = env.context().store().unwrap().get("tool.py").unwrap().clone();
        let calls = env.git.calls().len();
        let checks = env.runner.syntax_checks();

        let outcome = install_scripts(&env.context(), &request).unwrap();
        assert_eq!(outcome.details["scripts"][0]["status"], "up-to-date");
        let after = env.context().store().unwrap().get("tool.py").unwrap().clone();
        assert_eq!(before.updated_at, after.updated_at);
        assert_eq!(env.git.calls().len(), calls);
        assert_eq!(env.runner.syntax_checks(), checks);
    }

    #[test]
    fn changed_dependencies_update_and_keep_alias() {
        let env = TestEnv::new();
        let source = env.source_dir("tools", &[("tool.py", "print('hi')\n")]);
        let mut request = local_request(&source, &["tool.py"]);
        request.alias = Some("t".to_string());
        install_scripts(&env.context(), &request).unwrap();

        let mut again = local_request(&source, &["tool.py"]);
        again.with = vec!["rich".to_string()];
        let outcome = install_scripts(&env.context(), &again).unwrap();
        assert_eq!(outcome.details["scripts"][0]["status"], "updated");
        let store = env.context().store().unwrap().get("t").unwrap().clone();
        assert_eq!(store.alias.as_deref(), Some("t"));
        assert_eq!(store.dependencies[0].name, "rich");
        assert!(env.install_dir().join("t").exists());
    }

    #[test]
    fn alias_collision_is_refused_before_materializing() {
        let env = TestEnv::new();
        let source = env.source_dir("tools", &[("a.py", "print(1)\n"), ("b.py", "print(2)\n")]);
        let mut first = local_request(&source, &["a.py"]);
        first.alias = Some("tool".to_string());
        install_scripts(&env.context(), &first).unwrap();

        let mut second = local_request(&source, &["b.py"]);
        second.alias = Some("tool".to_string());
        let err = install_scripts(&env.context(), &second).unwrap_err();
        assert!(err
            .downcast_ref::<crate::core::tooling::errors::AliasCollisionError>()
            .is_some());
        assert!(env.context().store().unwrap().get("b.py").is_none());
    }

    #[test]
    fn invalid_script_fails_without_state() {
        let env = TestEnv::new();
        let source = env.source_dir("tools", &[("ok.py", "print(1)\n"), ("bad.py", "x = (\n")]);
        let outcome =
            install_scripts(&env.context(), &local_request(&source, &["ok.py", "bad.py"])).unwrap();
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.details["scripts"][1]["reason"], "invalid_syntax");
        let ctx = env.context();
        let store = ctx.store().unwrap();
        assert!(store.get("ok.py").is_some());
        assert!(store.get("bad.py").is_none());
    }

    #[test]
    fn source_package_requires_parent_copy() {
        let env = TestEnv::new();
        let source = env.source_dir("pkg", &[("run.py", "print(1)\n")]);
        let mut request = local_request(&source, &["run.py"]);
        request.add_source_package = Some(None);
        let err = install_scripts(&env.context(), &request).unwrap_err();
        assert!(err.to_string().contains("--copy-parent-dir"));

        request.copy_parent_dir = true;
        let outcome = install_scripts(&env.context(), &request).unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok);
        let ctx = env.context();
        let store = ctx.store().unwrap();
        let record = store.get("run.py").unwrap();
        assert_eq!(record.source_package.as_deref(), Some("pkg"));
        let text = fs::read_to_string(&record.install_path).unwrap();
        assert!(text.contains("[tool.uv.sources]"));
    }

    #[test]
    fn script_paths_outside_the_source_are_refused() {
        let env = TestEnv::new();
        let source = env.source_dir("tools", &[("tool.py", "print(1)\n")]);
        fs::write(env.temp.path().join("src").join("outside.py"), "print(2)\n").unwrap();

        for script in ["../outside.py", "/etc/passwd", "nested/../../outside.py"] {
            let err = install_scripts(&env.context(), &local_request(&source, &[script])).unwrap_err();
            let user = err.downcast_ref::<InstallUserError>().expect("user error");
            assert_eq!(user.details()["reason"], "invalid_script_name", "{script}");
        }
        assert!(!env.repo_dir().join("outside.py").exists());
        assert!(!env.state_file().exists());

        let outcome =
            install_scripts(&env.context(), &local_request(&source, &["./tool.py"])).unwrap();
        assert_eq!(outcome.status, CommandStatus::Ok, "{:?}", outcome.details);
    }

    #[test]
    fn containment_is_lexical() {
        let root = Path::new("/repos/tools");
        assert!(stays_inside(root, Path::new("/repos/tools/bin/a.py")));
        assert!(stays_inside(root, Path::new("/repos/tools/./a.py")));
        assert!(!stays_inside(root, Path::new("/repos/tools/../a.py")));
        assert!(!stays_inside(root, Path::new("/repos/other/a.py")));
    }

    #[test]
    fn installing_into_an_edited_checkout_needs_attention() {
        let env = TestEnv::new();
        let url = env.git_remote(
            "acme/tools",
            &[("a.py", "print('a')\n"), ("b.py", "print('b')\n")],
            "aaaa1111",
        );
        let request = |script: &str, force: bool| InstallRequest {
            source: url.clone(),
            scripts: vec![script.to_string()],
            force,
            ..InstallRequest::default()
        };
        install_scripts(&env.context(), &request("a.py", false)).unwrap();
        let a = env.context().store().unwrap().get("a.py").unwrap().clone();
        fs::write(a.repo_path.join("scratch.py"), "print('mine')\n").unwrap();

        let outcome = install_scripts(&env.context(), &request("b.py", false)).unwrap();
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.details["scripts"][0]["status"], "needs-attention");
        assert!(env.context().store().unwrap().get("b.py").is_none());
        assert!(a.repo_path.join("scratch.py").exists());

        let forced = install_scripts(&env.context(), &request("b.py", true)).unwrap();
        assert_eq!(forced.details["scripts"][0]["status"], "installed");
    }

    #[test]
    fn dry_run_touches_nothing() {
        let env = TestEnv::new();
        let url = env.git_remote("acme/tools", &[("tool.py", "print(1)\n")], "aaaa1111");
        let request = InstallRequest {
            source: url,
            scripts: vec!["tool.py".to_string()],
            dry_run: true,
            ..InstallRequest::default()
        };
        let outcome = install_scripts(&env.context(), &request).unwrap();
        assert_eq!(outcome.details["scripts"][0]["status"], "would install");
        assert!(env.git.calls().is_empty());
        assert!(!env.state_file().exists());
    }

    #[test]
    fn moving_a_shared_checkout_refreshes_siblings() {
        let env = TestEnv::new();
        let url = env.git_remote(
            "acme/tools",
            &[("a.py", "print('a')\n"), ("b.py", "print('b')\n")],
            "aaaa1111",
        );
        let request = |script: &str, force: bool| InstallRequest {
            source: url.clone(),
            scripts: vec![script.to_string()],
            force,
            ..InstallRequest::default()
        };
        install_scripts(&env.context(), &request("a.py", false)).unwrap();
        env.git.set_commit(&url, "bbbb2222");
        let outcome = install_scripts(&env.context(), &request("b.py", false)).unwrap();
        let statuses: Vec<&str> = outcome.details["scripts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, ["installed", "refreshed"]);

        let ctx = env.context();
        let store = ctx.store().unwrap();
        let a = store.get("a.py").unwrap();
        assert_eq!(a.resolved_commit.as_deref(), Some("bbbb2222"));
        let text = fs::read_to_string(&a.install_path).unwrap();
        assert!(text.starts_with("#!/usr/bin/env -S uv run"));
    }

    #[test]
    fn install_without_scripts_lists_candidates() {
        let env = TestEnv::new();
        let source = env.source_dir(
            "tools",
            &[("sync.py", "print(1)\n"), ("setup.py", ""), ("tests/test_sync.py", "")],
        );
        let err = install_scripts(&env.context(), &local_request(&source, &[])).unwrap_err();
        let user = err.downcast_ref::<InstallUserError>().expect("user error");
        assert_eq!(user.details()["reason"], "missing_scripts");
        assert_eq!(user.details()["candidates"], json!(["sync.py"]));
        assert!(user.details()["hint"].as_str().unwrap().ends_with("sync.py`"));
        assert!(!env.state_file().exists());

        let url = env.git_remote("acme/empty", &[("pkg/__init__.py", "")], "aaaa1111");
        let err = install_scripts(
            &env.context(),
            &InstallRequest {
                source: url,
                ..InstallRequest::default()
            },
        )
        .unwrap_err();
        let user = err.downcast_ref::<InstallUserError>().expect("user error");
        assert_eq!(user.details()["candidates"], json!([]));
        assert!(user.details()["hint"].as_str().unwrap().contains("--all"));
    }
}
