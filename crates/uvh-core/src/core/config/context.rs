use std::cell::{OnceCell, RefCell, RefMut};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::core::config::{Config, EnvSnapshot, GlobalOptions};
use crate::core::runtime::effects::{self, Effects, SharedEffects};
use crate::core::runtime::CommandGroup;
use crate::core::store::StateStore;

#[derive(Clone, Copy, Debug)]
pub struct CommandInfo {
    pub group: CommandGroup,
    pub name: &'static str,
}

impl CommandInfo {
    #[must_use]
    pub const fn new(group: CommandGroup, name: &'static str) -> Self {
        Self { group, name }
    }
}

/// Everything a command needs, built once per invocation.
pub struct CommandContext<'a> {
    pub global: &'a GlobalOptions,
    env: EnvSnapshot,
    config: Config,
    cwd: PathBuf,
    effects: SharedEffects,
    store: OnceCell<RefCell<StateStore>>,
}

impl<'a> CommandContext<'a> {
    /// Creates a context from the process environment.
    ///
    /// # Errors
    /// Returns an error if configuration cannot be loaded or the working directory is unknown.
    pub fn new(global: &'a GlobalOptions, effects: SharedEffects) -> Result<Self> {
        let env = EnvSnapshot::capture();
        let config = Config::from_snapshot(&env, global.config.as_deref())?;
        let cwd = std::env::current_dir().context("reading the current directory")?;
        Ok(Self::from_parts(global, env, config, cwd, effects))
    }

    pub(crate) fn from_parts(
        global: &'a GlobalOptions,
        env: EnvSnapshot,
        config: Config,
        cwd: PathBuf,
        effects: SharedEffects,
    ) -> Self {
        Self {
            global,
            env,
            config,
            cwd,
            effects,
            store: OnceCell::new(),
        }
    }

    pub fn effects(&self) -> &dyn Effects {
        self.effects.as_ref()
    }

    pub fn fs(&self) -> &dyn effects::FileSystem {
        self.effects.fs()
    }

    pub fn git(&self) -> &dyn effects::GitClient {
        self.effects.git()
    }

    pub fn runner(&self) -> &dyn effects::ScriptRunner {
        self.effects.runner()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub(crate) fn home(&self) -> Option<PathBuf> {
        self.env.home()
    }

    pub(crate) fn path_entries(&self) -> Vec<PathBuf> {
        self.env.path_entries()
    }

    /// Opens (and migrates) the state store on first use.
    ///
    /// # Errors
    /// Returns the store's open or migration error, or an error if the store is already borrowed.
    pub fn store(&self) -> Result<RefMut<'_, StateStore>> {
        if self.store.get().is_none() {
            let store = StateStore::open(&self.config.paths().state_file)?;
            let _ = self.store.set(RefCell::new(store));
        }
        let cell = self
            .store
            .get()
            .ok_or_else(|| anyhow!("state store was not initialized"))?;
        cell.try_borrow_mut()
            .map_err(|_| anyhow!("state store is already in use by this command"))
    }
}
