//! In-process fakes for git and the script runner, plus a scratch environment.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tempfile::TempDir;
use uvh_domain::ChangeSets;
use walkdir::WalkDir;

use crate::core::config::context::CommandContext;
use crate::core::config::{
    Config, ConfigSource, EnvSnapshot, GitConfig, GlobalOptions, InstallConfig, PathsConfig,
};
use crate::core::runtime::effects::{
    Effects, FileSystem, GitClient, ScriptRunner, SyntaxCheck, SystemFileSystem,
};
use crate::core::runtime::process::RunOutput;

struct Remote {
    template: PathBuf,
    head: String,
    refs: HashMap<String, String>,
}

#[derive(Default)]
pub(crate) struct FakeGit {
    remotes: Mutex<HashMap<String, Remote>>,
    checkouts: Mutex<HashMap<PathBuf, (String, String)>>,
    /// Tree each checkout had at its last clone or fetch, by relative path.
    heads: Mutex<HashMap<PathBuf, HashMap<String, String>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGit {
    pub(crate) fn add_remote(&self, url: &str, template: &Path, head: &str) {
        self.remotes.lock().unwrap().insert(
            url.to_string(),
            Remote {
                template: template.to_path_buf(),
                head: head.to_string(),
                refs: HashMap::new(),
            },
        );
    }

    pub(crate) fn set_commit(&self, url: &str, head: &str) {
        if let Some(remote) = self.remotes.lock().unwrap().get_mut(url) {
            remote.head = head.to_string();
        }
    }

    pub(crate) fn set_ref(&self, url: &str, reference: &str, commit: &str) {
        if let Some(remote) = self.remotes.lock().unwrap().get_mut(url) {
            remote.refs.insert(reference.to_string(), commit.to_string());
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn commit_for(&self, url: &str, reference: Option<&str>) -> Result<(PathBuf, String)> {
        let remotes = self.remotes.lock().unwrap();
        let remote = remotes
            .get(url)
            .ok_or_else(|| anyhow!("repository {url} not found"))?;
        let commit = match reference {
            Some(reference) => remote
                .refs
                .get(reference)
                .cloned()
                .ok_or_else(|| anyhow!("couldn't find remote ref {reference}"))?,
            None => remote.head.clone(),
        };
        Ok((remote.template.clone(), commit))
    }

    fn record_head(&self, repo: &Path) {
        let files = tree_files(repo).into_iter().collect();
        self.heads.lock().unwrap().insert(repo.to_path_buf(), files);
    }
}

/// Regular files under `root` outside `.git`, keyed by relative path.
fn tree_files(root: &Path) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?.to_string_lossy().to_string();
            let contents = fs::read_to_string(entry.path()).ok()?;
            Some((relative, contents))
        })
        .collect();
    files.sort();
    files
}

impl GitClient for FakeGit {
    fn clone_repo(&self, url: &str, dest: &Path, _depth: u32) -> Result<PathBuf> {
        self.calls.lock().unwrap().push(format!("clone {url}"));
        let (template, head) = self.commit_for(url, None)?;
        SystemFileSystem.copy_dir(&template, dest)?;
        fs::create_dir_all(dest.join(".git"))?;
        self.checkouts
            .lock()
            .unwrap()
            .insert(dest.to_path_buf(), (url.to_string(), head));
        self.record_head(dest);
        Ok(dest.to_path_buf())
    }

    fn fetch_and_checkout(&self, repo: &Path, reference: Option<&str>, _depth: u32) -> Result<String> {
        let url = self
            .checkouts
            .lock()
            .unwrap()
            .get(repo)
            .map(|(url, _)| url.clone())
            .ok_or_else(|| anyhow!("{} is not a checkout", repo.display()))?;
        self.calls
            .lock()
            .unwrap()
            .push(format!("fetch {url} {}", reference.unwrap_or("HEAD")));
        let (template, commit) = self.commit_for(&url, reference)?;
        SystemFileSystem.copy_dir(&template, repo)?;
        self.checkouts
            .lock()
            .unwrap()
            .insert(repo.to_path_buf(), (url, commit.clone()));
        self.record_head(repo);
        Ok(commit)
    }

    fn current_commit(&self, repo: &Path) -> Result<String> {
        self.checkouts
            .lock()
            .unwrap()
            .get(repo)
            .map(|(_, commit)| commit.clone())
            .ok_or_else(|| anyhow!("{} is not a checkout", repo.display()))
    }

    fn remote_commit(&self, url: &str, reference: Option<&str>) -> Result<Option<String>> {
        self.calls.lock().unwrap().push(format!("ls-remote {url}"));
        self.commit_for(url, reference).map(|(_, commit)| Some(commit))
    }

    fn change_sets(&self, repo: &Path) -> Result<ChangeSets> {
        let heads = self.heads.lock().unwrap();
        let head = heads
            .get(repo)
            .ok_or_else(|| anyhow!("{} is not a checkout", repo.display()))?;
        let mut changes = ChangeSets::default();
        for (path, contents) in tree_files(repo) {
            match head.get(&path) {
                Some(original) if *original == contents => {}
                Some(_) => changes.unstaged.push(path),
                None => changes.untracked.push(path),
            }
        }
        Ok(changes)
    }

    fn head_contents(&self, repo: &Path, path: &str) -> Result<String> {
        self.heads
            .lock()
            .unwrap()
            .get(repo)
            .and_then(|files| files.get(path).cloned())
            .ok_or_else(|| anyhow!("{path} is not tracked in {}", repo.display()))
    }
}

#[derive(Default)]
pub(crate) struct FakeRunner {
    shadows: Mutex<Vec<PathBuf>>,
    pub(crate) syntax_checks: AtomicUsize,
}

impl FakeRunner {
    pub(crate) fn shadow(&self, path: &str) {
        self.shadows.lock().unwrap().push(PathBuf::from(path));
    }

    pub(crate) fn syntax_checks(&self) -> usize {
        self.syntax_checks.load(Ordering::SeqCst)
    }
}

impl ScriptRunner for FakeRunner {
    fn check_syntax(&self, script: &Path) -> Result<SyntaxCheck> {
        self.syntax_checks.fetch_add(1, Ordering::SeqCst);
        let source = fs::read_to_string(script)?;
        Ok(match uvh_domain::check_python_source(&source) {
            Ok(()) => SyntaxCheck::Valid,
            Err(issue) => SyntaxCheck::Invalid(issue.to_string()),
        })
    }

    fn verify(&self, _script: &Path, _timeout: Duration) -> Result<RunOutput> {
        Ok(RunOutput {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    fn find_on_path(&self, program: &str) -> Vec<PathBuf> {
        self.shadows
            .lock()
            .unwrap()
            .iter()
            .filter(|path| path.file_name().is_some_and(|name| name == program))
            .cloned()
            .collect()
    }
}

struct FakeEffects {
    git: Arc<FakeGit>,
    fs: SystemFileSystem,
    runner: Arc<FakeRunner>,
}

impl Effects for FakeEffects {
    fn git(&self) -> &dyn GitClient {
        self.git.as_ref()
    }

    fn fs(&self) -> &dyn FileSystem {
        &self.fs
    }

    fn runner(&self) -> &dyn ScriptRunner {
        self.runner.as_ref()
    }
}

/// Scratch directories, a config pointing into them, and shared fakes.
pub(crate) struct TestEnv {
    pub(crate) temp: TempDir,
    pub(crate) git: Arc<FakeGit>,
    pub(crate) runner: Arc<FakeRunner>,
    pub(crate) config: Config,
    global: GlobalOptions,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        let config = Config {
            paths: PathsConfig {
                repo_dir: root.join("repos"),
                install_dir: root.join("bin"),
                state_file: root.join("state").join("state.json"),
            },
            git: GitConfig { clone_depth: 1 },
            install: InstallConfig {
                verify_after_install: false,
                ..InstallConfig::default()
            },
            source: ConfigSource::BuiltIn,
        };
        fs::create_dir_all(root.join("work")).unwrap();
        Self {
            temp,
            git: Arc::new(FakeGit::default()),
            runner: Arc::new(FakeRunner::default()),
            config,
            global: GlobalOptions::default(),
        }
    }

    pub(crate) fn context(&self) -> CommandContext<'_> {
        let home = self.temp.path().display().to_string();
        let effects = Arc::new(FakeEffects {
            git: Arc::clone(&self.git),
            fs: SystemFileSystem,
            runner: Arc::clone(&self.runner),
        });
        CommandContext::from_parts(
            &self.global,
            EnvSnapshot::testing(&[("HOME", home.as_str())]),
            self.config.clone(),
            self.temp.path().join("work"),
            effects,
        )
    }

    pub(crate) fn repo_dir(&self) -> PathBuf {
        self.config.paths.repo_dir.clone()
    }

    pub(crate) fn install_dir(&self) -> PathBuf {
        self.config.paths.install_dir.clone()
    }

    pub(crate) fn state_file(&self) -> PathBuf {
        self.config.paths.state_file.clone()
    }

    pub(crate) fn work_dir(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    /// Creates `src/<name>` holding `files` (relative path, contents).
    pub(crate) fn source_dir(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.temp.path().join("src").join(name);
        write_files(&dir, files);
        dir
    }

    /// Registers a fake remote at `https://example.com/<slug>` whose HEAD is `head`.
    pub(crate) fn git_remote(&self, slug: &str, files: &[(&str, &str)], head: &str) -> String {
        let template = self.temp.path().join("remotes").join(slug);
        write_files(&template, files);
        let url = format!("https://example.com/{slug}");
        self.git.add_remote(&url, &template, head);
        url
    }

    /// Rewrites a file in a fake remote's tree.
    pub(crate) fn write_remote_file(&self, slug: &str, path: &str, contents: &str) {
        let template = self.temp.path().join("remotes").join(slug);
        write_files(&template, &[(path, contents)]);
    }
}

fn write_files(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    for (path, contents) in files {
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(target, contents).unwrap();
    }
}
