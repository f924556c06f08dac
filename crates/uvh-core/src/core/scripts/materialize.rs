use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uvh_domain::{check_python_source, materialize_text, validate_link_name, Dependency};

use crate::core::config::context::CommandContext;
use crate::core::config::Config;
use crate::core::runtime::effects::SyntaxCheck;
use crate::core::tooling::errors::MaterializationError;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-invocation overrides of the `[install]` and `[git]` configuration.
#[derive(Debug, Clone, Default)]
pub struct InstallOverrides {
    pub install_dir: Option<PathBuf>,
    pub exact: Option<bool>,
    pub no_symlink: bool,
    pub depth: Option<u32>,
}

/// Effective install behavior after applying overrides to the configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct MaterializeSettings {
    pub(crate) repo_dir: PathBuf,
    pub(crate) install_dir: PathBuf,
    pub(crate) depth: u32,
    pub(crate) exact: bool,
    pub(crate) symlink: bool,
    pub(crate) chmod: bool,
    pub(crate) verify: bool,
}

impl MaterializeSettings {
    pub(crate) fn resolve(config: &Config, overrides: &InstallOverrides) -> Self {
        let install = config.install();
        Self {
            repo_dir: config.paths().repo_dir.clone(),
            install_dir: overrides
                .install_dir
                .clone()
                .unwrap_or_else(|| config.paths().install_dir.clone()),
            depth: overrides.depth.unwrap_or(config.git().clone_depth).max(1),
            exact: overrides.exact.unwrap_or(install.use_exact_flag),
            symlink: install.auto_symlink && !overrides.no_symlink,
            chmod: install.auto_chmod,
            verify: install.verify_after_install,
        }
    }
}

pub(crate) struct FinalizeRequest<'a> {
    pub(crate) script_path: &'a Path,
    pub(crate) name: &'a str,
    pub(crate) link_name: &'a str,
    pub(crate) dependencies: &'a [Dependency],
}

#[derive(Debug, Default)]
pub(crate) struct Finalized {
    pub(crate) symlink_path: Option<PathBuf>,
    pub(crate) warnings: Vec<String>,
}

/// Turns a copied script into the installed artifact: validated, shebang and metadata
/// rewritten, made executable, and linked. Never touches state.
pub(crate) fn finalize_script(
    ctx: &CommandContext,
    settings: &MaterializeSettings,
    request: &FinalizeRequest<'_>,
) -> Result<Finalized, MaterializationError> {
    let script = request.script_path;
    if !script.is_file() {
        return Err(MaterializationError::MissingScript {
            script: request.name.to_string(),
            repo: script
                .parent()
                .map_or_else(PathBuf::new, Path::to_path_buf),
        });
    }
    let fs = ctx.fs();
    let metadata_error = |reason: String| MaterializationError::Metadata {
        script: request.name.to_string(),
        reason,
    };

    let content = fs
        .read_to_string(script)
        .map_err(|err| metadata_error(format!("{err:#}")))?;
    check_syntax(ctx, script, &content).map_err(|reason| MaterializationError::InvalidSyntax {
        script: request.name.to_string(),
        reason,
    })?;

    let rendered = materialize_text(&content, request.dependencies, settings.exact)
        .map_err(|err| metadata_error(err.to_string()))?;
    if rendered != content {
        fs.write(script, rendered.as_bytes())
            .map_err(|err| metadata_error(format!("{err:#}")))?;
    }
    if settings.chmod {
        fs.set_executable(script)
            .map_err(|err| metadata_error(format!("{err:#}")))?;
    }

    let mut finalized = Finalized::default();
    if settings.symlink {
        let link = link_script(ctx, &settings.install_dir, request.link_name, script)?;
        let shadows: Vec<PathBuf> = ctx
            .runner()
            .find_on_path(request.link_name)
            .into_iter()
            .filter(|found| found != &link)
            .collect();
        for shadow in shadows {
            let message = format!(
                "`{}` also resolves to {} on PATH",
                request.link_name,
                shadow.display()
            );
            warn!(%message);
            finalized.warnings.push(message);
        }
        finalized.symlink_path = Some(link);
    }

    if settings.verify {
        match ctx.runner().verify(script, VERIFY_TIMEOUT) {
            Ok(output) if output.success() => debug!(script = %script.display(), "verified"),
            Ok(output) => {
                let message = format!("`{} --help` failed: {}", request.name, output.summary());
                warn!(%message);
                finalized.warnings.push(message);
            }
            Err(err) => {
                let message = format!("could not verify `{}`: {err:#}", request.name);
                warn!(%message);
                finalized.warnings.push(message);
            }
        }
    }
    Ok(finalized)
}

fn check_syntax(ctx: &CommandContext, script: &Path, content: &str) -> Result<(), String> {
    match ctx.runner().check_syntax(script) {
        Ok(SyntaxCheck::Valid) => Ok(()),
        Ok(SyntaxCheck::Invalid(reason)) => Err(reason),
        Err(err) => {
            debug!(error = %format!("{err:#}"), "syntax checker unavailable; using the lexical check");
            check_python_source(content).map_err(|issue| issue.to_string())
        }
    }
}

/// Points `install_dir/link_name` at `target`, replacing an existing symlink.
pub(crate) fn link_script(
    ctx: &CommandContext,
    install_dir: &Path,
    link_name: &str,
    target: &Path,
) -> Result<PathBuf, MaterializationError> {
    let link = install_dir.join(link_name);
    let link_error = |reason: String| MaterializationError::Link {
        link: link.clone(),
        reason,
    };
    validate_link_name(link_name).map_err(link_error)?;
    let fs = ctx.fs();
    fs.create_dir_all(install_dir)
        .map_err(|err| link_error(format!("{err:#}")))?;
    if fs.is_symlink(&link) {
        fs.remove_file(&link)
            .map_err(|err| link_error(format!("{err:#}")))?;
    } else if link.exists() {
        return Err(link_error("a file that is not a symlink is in the way".to_string()));
    }
    fs.symlink(target, &link)
        .map_err(|err| link_error(format!("{err:#}")))?;
    debug!(link = %link.display(), target = %target.display(), "linked script");
    Ok(link)
}

/// Removes `link` when it is a symlink; reports whether anything was removed.
pub(crate) fn unlink(ctx: &CommandContext, link: &Path) -> anyhow::Result<bool> {
    if ctx.fs().is_symlink(link) {
        ctx.fs().remove_file(link)?;
        return Ok(true);
    }
    Ok(false)
}
