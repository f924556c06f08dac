#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// An isolated home: config, managed checkouts, links, and state all live
/// under one temp directory.
pub struct Sandbox {
    _tmp: TempDir,
    root: PathBuf,
}

impl Sandbox {
    pub fn new(prefix: &str) -> Self {
        let tmp = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .expect("tempdir");
        let root = tmp.path().to_path_buf();
        let sandbox = Self { _tmp: tmp, root };
        fs::create_dir_all(sandbox.home()).expect("home dir");
        sandbox.write_config(&sandbox.config_path());
        sandbox
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home(&self) -> PathBuf {
        self.root.join("home")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root.join("data").join("repos")
    }

    pub fn install_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("data").join("state.json")
    }

    fn write_config(&self, path: &Path) {
        let contents = format!(
            "[global.paths]\nrepo_dir = {:?}\ninstall_dir = {:?}\nstate_file = {:?}\n\n\
             [global.install]\nverify_after_install = false\n",
            self.repo_dir().display().to_string(),
            self.install_dir().display().to_string(),
            self.state_file().display().to_string(),
        );
        fs::write(path, contents).expect("write config");
    }

    /// A local source directory with the given files.
    pub fn source(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.root.join("sources").join(name);
        for (relative, contents) in files {
            let path = dir.join(relative);
            fs::create_dir_all(path.parent().expect("parent")).expect("source dir");
            fs::write(&path, contents).expect("write source file");
        }
        fs::create_dir_all(&dir).expect("source dir");
        dir
    }

    pub fn uvh(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("uvh");
        cmd.current_dir(&self.root)
            .env("HOME", self.home())
            .env("UVH_CONFIG", self.config_path())
            .env_remove("UVH_REPO_DIR")
            .env_remove("UVH_INSTALL_DIR")
            .env_remove("UVH_STATE_FILE")
            .env("NO_COLOR", "1");
        cmd
    }

    /// Runs `uvh --json <args>` and returns the exit code with the envelope.
    pub fn json(&self, args: &[&str]) -> (i32, Value) {
        let assert = self.uvh().arg("--json").args(args).assert();
        let code = assert.get_output().status.code().expect("exit code");
        (code, parse_json(&assert))
    }
}

pub fn parse_json(assert: &Assert) -> Value {
    let output = assert.get_output();
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "invalid json ({err}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

pub const HELLO: &str = "\
# /// script
# requires-python = \">=3.9\"
# dependencies = [\"rich\"]
# ///
print('hello')
";

pub const PLAIN: &str = "import sys\n\nprint(sys.argv)\n";
