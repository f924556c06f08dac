use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uvh_domain::{GitRef, SourceSpec};

use crate::core::config::context::CommandContext;
use crate::core::tooling::errors::MaterializationError;

/// A materialized source tree and the commit it sits at (Git only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Checkout {
    pub(crate) repo_path: PathBuf,
    pub(crate) commit: Option<String>,
    /// The managed tree existed before and was overwritten.
    pub(crate) replaced: bool,
}

pub(crate) trait SourceBackend {
    fn repo_path(&self) -> &Path;

    /// Checks the source without touching disk; returns the commit a refresh would land on.
    fn resolve(&self, ctx: &CommandContext) -> Result<Option<String>, MaterializationError>;

    /// Produces the managed tree holding `scripts`.
    fn materialize(
        &self,
        ctx: &CommandContext,
        scripts: &[String],
    ) -> Result<Checkout, MaterializationError>;

    /// Brings an existing managed tree up to date with its source.
    fn refresh(
        &self,
        ctx: &CommandContext,
        scripts: &[String],
    ) -> Result<Checkout, MaterializationError> {
        self.materialize(ctx, scripts)
    }
}

/// Picks the backend for `spec`, materializing into `repo_path`.
pub(crate) fn backend_for(
    spec: &SourceSpec,
    repo_path: PathBuf,
    depth: u32,
    copy_parent_dir: bool,
) -> Box<dyn SourceBackend> {
    match spec {
        SourceSpec::Git { url, reference } => Box::new(GitBackend {
            url: url.clone(),
            reference: reference.clone(),
            depth,
            repo_path,
        }),
        SourceSpec::Local { path } => Box::new(LocalBackend {
            source: path.clone(),
            copy_parent_dir,
            repo_path,
        }),
    }
}

struct GitBackend {
    url: String,
    reference: Option<GitRef>,
    depth: u32,
    repo_path: PathBuf,
}

impl GitBackend {
    fn reference_name(&self) -> Option<&str> {
        self.reference.as_ref().map(|reference| reference.name.as_str())
    }

    fn checkout_error(&self, err: &anyhow::Error) -> MaterializationError {
        MaterializationError::Checkout {
            reference: self.reference_name().unwrap_or("HEAD").to_string(),
            reason: format!("{err:#}"),
        }
    }
}

impl SourceBackend for GitBackend {
    fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn resolve(&self, ctx: &CommandContext) -> Result<Option<String>, MaterializationError> {
        ctx.git()
            .remote_commit(&self.url, self.reference_name())
            .map_err(|err| MaterializationError::Clone {
                url: self.url.clone(),
                reason: format!("{err:#}"),
            })
    }

    fn materialize(
        &self,
        ctx: &CommandContext,
        _scripts: &[String],
    ) -> Result<Checkout, MaterializationError> {
        let git = ctx.git();
        let existing = self.repo_path.join(".git").is_dir();
        let commit = if existing {
            debug!(repo = %self.repo_path.display(), "updating existing checkout");
            git.fetch_and_checkout(&self.repo_path, self.reference_name(), self.depth)
                .map_err(|err| self.checkout_error(&err))?
        } else {
            if self.repo_path.exists() {
                ctx.fs()
                    .remove_dir_all(&self.repo_path)
                    .map_err(|err| MaterializationError::Clone {
                        url: self.url.clone(),
                        reason: format!("{err:#}"),
                    })?;
            }
            info!(url = %self.url, dest = %self.repo_path.display(), "cloning");
            git.clone_repo(&self.url, &self.repo_path, self.depth)
                .map_err(|err| MaterializationError::Clone {
                    url: self.url.clone(),
                    reason: format!("{err:#}"),
                })?;
            match self.reference_name() {
                Some(reference) => git
                    .fetch_and_checkout(&self.repo_path, Some(reference), self.depth)
                    .map_err(|err| self.checkout_error(&err))?,
                None => git
                    .current_commit(&self.repo_path)
                    .map_err(|err| self.checkout_error(&err))?,
            }
        };
        Ok(Checkout {
            repo_path: self.repo_path.clone(),
            commit: Some(commit),
            replaced: existing,
        })
    }
}

struct LocalBackend {
    source: PathBuf,
    copy_parent_dir: bool,
    repo_path: PathBuf,
}

impl LocalBackend {
    fn copy_error(&self, err: &anyhow::Error) -> MaterializationError {
        MaterializationError::Copy {
            path: self.source.clone(),
            reason: format!("{err:#}"),
        }
    }
}

impl SourceBackend for LocalBackend {
    fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn resolve(&self, _ctx: &CommandContext) -> Result<Option<String>, MaterializationError> {
        if self.source.is_dir() {
            Ok(None)
        } else {
            Err(MaterializationError::SourceUnavailable {
                location: self.source.display().to_string(),
            })
        }
    }

    fn materialize(
        &self,
        ctx: &CommandContext,
        scripts: &[String],
    ) -> Result<Checkout, MaterializationError> {
        self.resolve(ctx)?;
        let fs = ctx.fs();
        let existing = self.repo_path.exists();
        if self.copy_parent_dir {
            if existing {
                fs.remove_dir_all(&self.repo_path)
                    .map_err(|err| self.copy_error(&err))?;
            }
            debug!(from = %self.source.display(), to = %self.repo_path.display(), "copying source tree");
            fs.copy_dir(&self.source, &self.repo_path)
                .map_err(|err| self.copy_error(&err))?;
        } else {
            for script in scripts {
                let from = self.source.join(script);
                if !from.is_file() {
                    return Err(MaterializationError::MissingScript {
                        script: script.clone(),
                        repo: self.source.clone(),
                    });
                }
                let to = self.repo_path.join(script);
                if let Some(parent) = to.parent() {
                    fs.create_dir_all(parent)
                        .map_err(|err| self.copy_error(&err))?;
                }
                debug!(from = %from.display(), to = %to.display(), "copying script");
                fs.copy(&from, &to).map_err(|err| self.copy_error(&err))?;
            }
        }
        Ok(Checkout {
            repo_path: self.repo_path.clone(),
            commit: None,
            replaced: existing && self.copy_parent_dir,
        })
    }
}
