use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use toml_edit::{DocumentMut, Item, Table};
use tracing::debug;

pub const CONFIG_ENV: &str = "UVH_CONFIG";
pub const REPO_DIR_ENV: &str = "UVH_REPO_DIR";
pub const INSTALL_DIR_ENV: &str = "UVH_INSTALL_DIR";
pub const STATE_FILE_ENV: &str = "UVH_STATE_FILE";

const LEGACY_SECTIONS: [&str; 3] = ["paths", "git", "install"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub debug: bool,
    pub json: bool,
    pub config: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn home(&self) -> Option<PathBuf> {
        self.var("HOME").map(PathBuf::from).or_else(dirs_next::home_dir)
    }

    pub(crate) fn path_entries(&self) -> Vec<PathBuf> {
        self.var("PATH")
            .map(|value| env::split_paths(value).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Where the configuration was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Flag(PathBuf),
    Env(PathBuf),
    DefaultFile(PathBuf),
    BuiltIn,
}

impl ConfigSource {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Flag(path) | ConfigSource::Env(path) | ConfigSource::DefaultFile(path) => {
                Some(path)
            }
            ConfigSource::BuiltIn => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    pub repo_dir: PathBuf,
    pub install_dir: PathBuf,
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitConfig {
    pub clone_depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct InstallConfig {
    pub auto_symlink: bool,
    pub verify_after_install: bool,
    pub auto_chmod: bool,
    pub use_exact_flag: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            auto_symlink: true,
            verify_after_install: true,
            auto_chmod: true,
            use_exact_flag: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) paths: PathsConfig,
    pub(crate) git: GitConfig,
    pub(crate) install: InstallConfig,
    pub(crate) source: ConfigSource,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    global: RawGlobal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGlobal {
    paths: RawPaths,
    git: RawGit,
    install: RawInstall,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPaths {
    repo_dir: Option<String>,
    install_dir: Option<String>,
    state_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGit {
    clone_depth: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawInstall {
    auto_symlink: Option<bool>,
    verify_after_install: Option<bool>,
    auto_chmod: Option<bool>,
    use_exact_flag: Option<bool>,
}

impl Config {
    /// Loads configuration for this process.
    ///
    /// # Errors
    /// Returns an error when an explicitly named config file is missing or any config file is invalid.
    pub fn load(global: &GlobalOptions) -> Result<Self> {
        let snapshot = EnvSnapshot::capture();
        Self::from_snapshot(&snapshot, global.config.as_deref())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot, flag: Option<&str>) -> Result<Self> {
        let home = snapshot.home();
        let source = select_source(snapshot, flag, home.as_deref());
        let raw = match &source {
            ConfigSource::BuiltIn => RawConfig::default(),
            ConfigSource::DefaultFile(path) if !path.exists() => RawConfig::default(),
            ConfigSource::Flag(path) | ConfigSource::Env(path) if !path.exists() => {
                bail!("config file {} does not exist", path.display());
            }
            ConfigSource::Flag(path) | ConfigSource::Env(path) | ConfigSource::DefaultFile(path) => {
                read_raw_config(path)?
            }
        };
        debug!(source = ?source, "loaded configuration");

        let defaults = default_paths(home.as_deref())?;
        let path_value = |env_key: &str, file_value: Option<&String>, fallback: PathBuf| {
            snapshot
                .var(env_key)
                .map(|value| expand_path(value, snapshot, home.as_deref()))
                .or_else(|| file_value.map(|value| expand_path(value, snapshot, home.as_deref())))
                .unwrap_or(fallback)
        };
        let paths = PathsConfig {
            repo_dir: path_value(REPO_DIR_ENV, raw.global.paths.repo_dir.as_ref(), defaults.repo_dir),
            install_dir: path_value(
                INSTALL_DIR_ENV,
                raw.global.paths.install_dir.as_ref(),
                defaults.install_dir,
            ),
            state_file: path_value(
                STATE_FILE_ENV,
                raw.global.paths.state_file.as_ref(),
                defaults.state_file,
            ),
        };

        let clone_depth = match raw.global.git.clone_depth {
            None => 1,
            Some(depth) if depth >= 1 => u32::try_from(depth).unwrap_or(u32::MAX),
            Some(depth) => bail!("git.clone_depth must be at least 1 (got {depth})"),
        };

        let defaults = InstallConfig::default();
        let install = InstallConfig {
            auto_symlink: raw.global.install.auto_symlink.unwrap_or(defaults.auto_symlink),
            verify_after_install: raw
                .global
                .install
                .verify_after_install
                .unwrap_or(defaults.verify_after_install),
            auto_chmod: raw.global.install.auto_chmod.unwrap_or(defaults.auto_chmod),
            use_exact_flag: raw.global.install.use_exact_flag.unwrap_or(defaults.use_exact_flag),
        };

        Ok(Self {
            paths,
            git: GitConfig { clone_depth },
            install,
            source,
        })
    }

    #[must_use]
    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    #[must_use]
    pub fn git(&self) -> GitConfig {
        self.git
    }

    #[must_use]
    pub fn install(&self) -> InstallConfig {
        self.install
    }

    #[must_use]
    pub fn source(&self) -> &ConfigSource {
        &self.source
    }
}

fn select_source(snapshot: &EnvSnapshot, flag: Option<&str>, home: Option<&Path>) -> ConfigSource {
    if let Some(flag) = flag.filter(|value| !value.trim().is_empty()) {
        return ConfigSource::Flag(expand_path(flag, snapshot, home));
    }
    if let Some(value) = snapshot.var(CONFIG_ENV) {
        return ConfigSource::Env(expand_path(value, snapshot, home));
    }
    match dirs_next::config_dir() {
        Some(dir) => ConfigSource::DefaultFile(dir.join("uvh").join("config.toml")),
        None => ConfigSource::BuiltIn,
    }
}

struct DefaultPaths {
    repo_dir: PathBuf,
    install_dir: PathBuf,
    state_file: PathBuf,
}

fn default_paths(home: Option<&Path>) -> Result<DefaultPaths> {
    let data_dir = dirs_next::data_dir()
        .or_else(|| home.map(|home| home.join(".local").join("share")))
        .ok_or_else(|| anyhow!("cannot determine a data directory; set {REPO_DIR_ENV} and {STATE_FILE_ENV}"))?;
    let install_dir = home
        .map(|home| home.join(".local").join("bin"))
        .ok_or_else(|| anyhow!("cannot determine the home directory; set {INSTALL_DIR_ENV}"))?;
    let root = data_dir.join("uvh");
    Ok(DefaultPaths {
        repo_dir: root.join("repos"),
        install_dir,
        state_file: root.join("state.json"),
    })
}

fn read_raw_config(path: &Path) -> Result<RawConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut doc = contents
        .parse::<DocumentMut>()
        .with_context(|| format!("{} is not valid TOML", path.display()))?;
    if migrate_flat_layout(&mut doc) {
        debug!(path = %path.display(), "read legacy flat config layout");
    }
    toml_edit::de::from_str(&doc.to_string())
        .with_context(|| format!("{} has invalid settings", path.display()))
}

/// Moves top-level `[paths]`, `[git]`, and `[install]` tables under `[global]`.
fn migrate_flat_layout(doc: &mut DocumentMut) -> bool {
    if doc.contains_key("global") {
        return false;
    }
    let mut global = Table::new();
    let mut moved = false;
    for section in LEGACY_SECTIONS {
        if let Some(item) = doc.remove(section) {
            global.insert(section, item);
            moved = true;
        }
    }
    if moved {
        doc.insert("global", Item::Table(global));
    }
    moved
}

/// Expands `~` and `$VAR` / `${VAR}` against the captured environment.
pub(crate) fn expand_path(raw: &str, snapshot: &EnvSnapshot, home: Option<&Path>) -> PathBuf {
    let trimmed = raw.trim();
    let tilde_expanded = match (trimmed.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{rest}", home.display())
        }
        _ => trimmed.to_string(),
    };
    PathBuf::from(expand_vars(&tilde_expanded, snapshot))
}

fn expand_vars(input: &str, snapshot: &EnvSnapshot) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        if name.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }
        match snapshot.var(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
