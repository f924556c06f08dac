use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use uvh_domain::{classify, is_managed_edit, ChangeReport, InstalledScript, SourceType};

use crate::core::config::context::CommandContext;
use crate::core::tooling::errors::LocalChangesError;

/// Classifies uncommitted edits in `repo_path`, given the scripts installed from it.
pub(crate) fn local_change_state(
    ctx: &CommandContext,
    repo_path: &Path,
    scripts: &[String],
) -> ChangeReport {
    if !repo_path.join(".git").is_dir() {
        return ChangeReport::unknown("managed checkout is missing");
    }
    let git = ctx.git();
    let changes = match git.change_sets(repo_path) {
        Ok(changes) => changes,
        Err(err) => {
            debug!(repo = %repo_path.display(), error = %format!("{err:#}"), "git status failed");
            return ChangeReport::unknown("cannot inspect git status for this checkout");
        }
    };
    classify(&changes, scripts, |path| {
        let Ok(working) = ctx.fs().read_to_string(&repo_path.join(path)) else {
            return false;
        };
        git.head_contents(repo_path, path)
            .is_ok_and(|head| is_managed_edit(&head, &working))
    })
}

/// Refuses to fetch over a checkout whose edits go beyond the managed headers.
pub(crate) fn ensure_no_user_edits(
    ctx: &CommandContext,
    repo_path: &Path,
    scripts: &[String],
) -> Result<(), LocalChangesError> {
    let report = local_change_state(ctx, repo_path, scripts);
    if report.state.blocks_update() {
        return Err(LocalChangesError {
            repo: repo_path.to_path_buf(),
            detail: report.detail.unwrap_or_default(),
        });
    }
    Ok(())
}

/// Script paths, relative to `repo_path`, of every record sharing that checkout.
pub(crate) fn checkout_scripts<'a>(
    records: impl IntoIterator<Item = &'a InstalledScript>,
    repo_path: &Path,
) -> Vec<String> {
    records
        .into_iter()
        .filter(|record| record.repo_path == repo_path)
        .map(|record| record.relative_script().to_string_lossy().to_string())
        .collect()
}

/// Reports per checkout so scripts sharing one are inspected once.
#[derive(Default)]
pub(crate) struct ChangeCache {
    reports: HashMap<PathBuf, ChangeReport>,
}

impl ChangeCache {
    /// `None` for local sources, which have no Git checkout.
    pub(crate) fn report<'a>(
        &mut self,
        ctx: &CommandContext,
        records: impl IntoIterator<Item = &'a InstalledScript>,
        record: &InstalledScript,
    ) -> Option<ChangeReport> {
        if record.source_type != SourceType::Git {
            return None;
        }
        let report = self
            .reports
            .entry(record.repo_path.clone())
            .or_insert_with(|| {
                let scripts = checkout_scripts(records, &record.repo_path);
                local_change_state(ctx, &record.repo_path, &scripts)
            });
        Some(report.clone())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use uvh_domain::LocalChanges;

    use super::*;
    use crate::core::scripts::install::{install_scripts, InstallRequest};
    use crate::core::scripts::testing::TestEnv;

    #[test]
    fn install_edits_are_managed_and_user_edits_are_not() {
        let env = TestEnv::new();
        let url = env.git_remote(
            "acme/tools",
            &[("a.py", "print('a')\n"), ("b.py", "print('b')\n")],
            "aaaa1111",
        );
        install_scripts(
            &env.context(),
            &InstallRequest {
                source: url,
                scripts: vec!["a.py".into(), "b.py".into()],
                with: vec!["rich".into()],
                ..InstallRequest::default()
            },
        )
        .unwrap();
        let ctx = env.context();
        let record = ctx.store().unwrap().get("a.py").unwrap().clone();
        let scripts = checkout_scripts(ctx.store().unwrap().records(), &record.repo_path);
        assert_eq!(scripts.len(), 2);

        let report = local_change_state(&ctx, &record.repo_path, &scripts);
        assert_eq!(report.state, LocalChanges::Managed, "{report:?}");

        let text = fs::read_to_string(&record.install_path).unwrap();
        fs::write(&record.install_path, text.replace("print('a')", "print('mine')")).unwrap();
        let edited = local_change_state(&ctx, &record.repo_path, &scripts);
        assert_eq!(edited.state, LocalChanges::NeedsAttention);
        assert_eq!(
            edited.detail.as_deref(),
            Some("script `a.py` has custom uncommitted edits")
        );

        fs::write(record.repo_path.join("notes.txt"), "todo\n").unwrap();
        let untracked = local_change_state(&ctx, &record.repo_path, &scripts);
        assert_eq!(
            untracked.detail.as_deref(),
            Some("untracked files present: notes.txt")
        );
    }

    #[test]
    fn missing_checkout_is_unknown() {
        let env = TestEnv::new();
        let report = local_change_state(&env.context(), &env.repo_dir().join("gone"), &[]);
        assert_eq!(report.state, LocalChanges::Unknown);
    }
}
