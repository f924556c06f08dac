use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;
use uvh_domain::ChangeSets;
use walkdir::WalkDir;

use super::process::{run_command, run_command_with_timeout, RunOutput};

/// Short commit length recorded in state.
pub const SHORT_COMMIT_LEN: usize = 8;

const PYTHON_CANDIDATES: [&str; 2] = ["python3", "python"];
const AST_CHECK: &str = "import ast, sys\nsrc = open(sys.argv[1], 'rb').read()\nast.parse(src, sys.argv[1])";

pub trait GitClient: Send + Sync {
    /// Clones `url` into `dest` with the given history depth, on the default branch.
    fn clone_repo(&self, url: &str, dest: &Path, depth: u32) -> Result<PathBuf>;
    /// Fetches `reference` (or the remote `HEAD`) and force-checks it out; returns the short commit.
    fn fetch_and_checkout(&self, repo: &Path, reference: Option<&str>, depth: u32) -> Result<String>;
    fn current_commit(&self, repo: &Path) -> Result<String>;
    /// Commit `reference` points at on the remote, without touching any checkout.
    fn remote_commit(&self, url: &str, reference: Option<&str>) -> Result<Option<String>>;
    /// Unstaged, staged, and untracked paths, relative to the checkout root.
    fn change_sets(&self, repo: &Path) -> Result<ChangeSets>;
    /// Contents of `path` at `HEAD`.
    fn head_contents(&self, repo: &Path, path: &str) -> Result<String>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn copy(&self, src: &Path, dest: &Path) -> Result<()>;
    /// Recursively copies a directory tree, skipping `.git`.
    fn copy_dir(&self, src: &Path, dest: &Path) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;
    fn read_link(&self, link: &Path) -> Result<PathBuf>;
    /// True when `path` itself is a symlink (dangling or not).
    fn is_symlink(&self, path: &Path) -> bool;
    fn set_executable(&self, path: &Path) -> Result<()>;
}

/// Outcome of a syntax check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxCheck {
    Valid,
    Invalid(String),
}

pub trait ScriptRunner: Send + Sync {
    fn check_syntax(&self, script: &Path) -> Result<SyntaxCheck>;
    /// Runs `script --help` to confirm it starts.
    fn verify(&self, script: &Path, timeout: Duration) -> Result<RunOutput>;
    /// Every executable named `program` on `PATH`, in lookup order.
    fn find_on_path(&self, program: &str) -> Vec<PathBuf>;
}

pub trait Effects: Send + Sync {
    fn git(&self) -> &dyn GitClient;
    fn fs(&self) -> &dyn FileSystem;
    fn runner(&self) -> &dyn ScriptRunner;
}

pub struct SystemEffects {
    git: Arc<SystemGit>,
    fs: Arc<SystemFileSystem>,
    runner: Arc<SystemScriptRunner>,
}

impl SystemEffects {
    #[must_use]
    pub fn new() -> Self {
        Self {
            git: Arc::new(SystemGit),
            fs: Arc::new(SystemFileSystem),
            runner: Arc::new(SystemScriptRunner),
        }
    }
}

impl Default for SystemEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl Effects for SystemEffects {
    fn git(&self) -> &dyn GitClient {
        self.git.as_ref()
    }

    fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    fn runner(&self) -> &dyn ScriptRunner {
        self.runner.as_ref()
    }
}

pub type SharedEffects = Arc<dyn Effects>;

struct SystemGit;

impl SystemGit {
    fn git(args: &[&str], cwd: &Path) -> Result<RunOutput> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        let env = [("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];
        let output = run_command("git", &args, &env, cwd)?;
        if !output.success() {
            bail!("git {} failed: {}", args.join(" "), output.summary());
        }
        Ok(output)
    }

    fn paths(args: &[&str], repo: &Path) -> Result<Vec<String>> {
        let output = Self::git(args, repo)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }
}

impl GitClient for SystemGit {
    fn clone_repo(&self, url: &str, dest: &Path, depth: u32) -> Result<PathBuf> {
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", dest.display()))?;
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        let depth = depth.to_string();
        let dest_text = dest.display().to_string();
        debug!(url, dest = %dest_text, "cloning repository");
        Self::git(&["clone", "--depth", &depth, url, &dest_text], parent)?;
        Ok(dest.to_path_buf())
    }

    fn fetch_and_checkout(&self, repo: &Path, reference: Option<&str>, depth: u32) -> Result<String> {
        let depth = depth.to_string();
        let target = reference.unwrap_or("HEAD");
        debug!(repo = %repo.display(), target, "fetching");
        Self::git(&["fetch", "--depth", &depth, "origin", target], repo)?;
        Self::git(&["checkout", "--force", "FETCH_HEAD"], repo)?;
        self.current_commit(repo)
    }

    fn current_commit(&self, repo: &Path) -> Result<String> {
        let output = Self::git(&["rev-parse", "HEAD"], repo)?;
        let full = output.stdout.trim();
        if full.len() < SHORT_COMMIT_LEN {
            bail!("unexpected commit id `{full}` in {}", repo.display());
        }
        Ok(full[..SHORT_COMMIT_LEN].to_string())
    }

    fn remote_commit(&self, url: &str, reference: Option<&str>) -> Result<Option<String>> {
        let target = reference.unwrap_or("HEAD");
        let cwd = std::env::temp_dir();
        let output = Self::git(&["ls-remote", url, target], &cwd)?;
        let commit = output
            .stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .find(|sha| sha.len() >= SHORT_COMMIT_LEN)
            .map(|sha| sha[..SHORT_COMMIT_LEN].to_string());
        if commit.is_none() && reference.is_some_and(uvh_domain::source::looks_like_commit) {
            // ls-remote only lists refs; a commit pin is its own answer
            return Ok(reference.map(|sha| sha.chars().take(SHORT_COMMIT_LEN).collect()));
        }
        Ok(commit)
    }

    fn change_sets(&self, repo: &Path) -> Result<ChangeSets> {
        Ok(ChangeSets {
            unstaged: Self::paths(&["diff", "--name-only"], repo)?,
            staged: Self::paths(&["diff", "--name-only", "--cached"], repo)?,
            untracked: Self::paths(&["ls-files", "--others", "--exclude-standard"], repo)?,
        })
    }

    fn head_contents(&self, repo: &Path, path: &str) -> Result<String> {
        let spec = format!("HEAD:{path}");
        Ok(Self::git(&["show", &spec], repo)?.stdout)
    }
}

pub(crate) struct SystemFileSystem;

impl FileSystem for SystemFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).with_context(|| format!("removing file {}", path.display()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path).with_context(|| format!("removing dir {}", path.display()))
    }

    fn copy(&self, src: &Path, dest: &Path) -> Result<()> {
        std::fs::copy(src, dest)
            .map(|_| ())
            .with_context(|| format!("copying {} to {}", src.display(), dest.display()))
    }

    fn copy_dir(&self, src: &Path, dest: &Path) -> Result<()> {
        let walker = WalkDir::new(src)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git");
        for entry in walker {
            let entry = entry.with_context(|| format!("walking {}", src.display()))?;
            let relative = entry
                .path()
                .strip_prefix(src)
                .with_context(|| format!("{} is outside {}", entry.path().display(), src.display()))?;
            let target = dest.join(relative);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.create_dir_all(&target)?;
            } else if file_type.is_symlink() {
                let link_target = self.read_link(entry.path())?;
                self.symlink(&link_target, &target)?;
            } else {
                self.copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to)
            .with_context(|| format!("renaming {} to {}", from.display(), to.display()))
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, link)
                .with_context(|| format!("linking {} -> {}", link.display(), target.display()))
        }
        #[cfg(windows)]
        {
            std::os::windows::fs::symlink_file(target, link)
                .with_context(|| format!("linking {} -> {}", link.display(), target.display()))
        }
    }

    fn read_link(&self, link: &Path) -> Result<PathBuf> {
        std::fs::read_link(link).with_context(|| format!("reading link {}", link.display()))
    }

    fn is_symlink(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
    }

    fn set_executable(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata =
                std::fs::metadata(path).with_context(|| format!("metadata for {}", path.display()))?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(permissions.mode() | 0o111);
            std::fs::set_permissions(path, permissions)
                .with_context(|| format!("setting permissions on {}", path.display()))
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            Ok(())
        }
    }
}

struct SystemScriptRunner;

impl SystemScriptRunner {
    fn interpreter() -> Option<PathBuf> {
        PYTHON_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
    }
}

impl ScriptRunner for SystemScriptRunner {
    fn check_syntax(&self, script: &Path) -> Result<SyntaxCheck> {
        let cwd = script.parent().unwrap_or_else(|| Path::new("."));
        if let Some(python) = Self::interpreter() {
            let python = python.display().to_string();
            let args = vec![
                "-c".to_string(),
                AST_CHECK.to_string(),
                script.display().to_string(),
            ];
            let output = run_command(&python, &args, &[], cwd)?;
            return Ok(if output.success() {
                SyntaxCheck::Valid
            } else {
                SyntaxCheck::Invalid(output.summary())
            });
        }
        debug!("no python interpreter on PATH; using the lexical check");
        let source = std::fs::read_to_string(script)
            .with_context(|| format!("reading {}", script.display()))?;
        Ok(match uvh_domain::check_python_source(&source) {
            Ok(()) => SyntaxCheck::Valid,
            Err(issue) => SyntaxCheck::Invalid(issue.to_string()),
        })
    }

    fn verify(&self, script: &Path, timeout: Duration) -> Result<RunOutput> {
        let cwd = script.parent().unwrap_or_else(|| Path::new("."));
        let program = script.display().to_string();
        run_command_with_timeout(&program, &["--help".to_string()], &[], cwd, timeout)
    }

    fn find_on_path(&self, program: &str) -> Vec<PathBuf> {
        which::which_all(program)
            .map(Iterator::collect)
            .unwrap_or_default()
    }
}
