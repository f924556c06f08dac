use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::naming::sanitize_key;

const GIT_SCHEMES: [&str; 5] = ["https", "http", "ssh", "git", "file"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Git,
    Local,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Git => f.write_str("git"),
            SourceType::Local => f.write_str("local"),
        }
    }
}

/// What a Git ref names. Tags and commits are pinned and never move on a plain update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
    Commit,
    #[default]
    Default,
}

impl RefKind {
    #[must_use]
    pub fn is_pinned(self) -> bool {
        matches!(self, RefKind::Tag | RefKind::Commit)
    }

    /// Guesses the kind of a ref that arrived without a suffix.
    #[must_use]
    pub fn infer(reference: Option<&str>) -> Self {
        let Some(value) = reference.map(str::trim).filter(|value| !value.is_empty()) else {
            return RefKind::Default;
        };
        if looks_like_commit(value) {
            return RefKind::Commit;
        }
        let mut chars = value.chars();
        let first = chars.next();
        let second = chars.next();
        match (first, second) {
            (Some('v' | 'V'), Some(digit)) if digit.is_ascii_digit() => RefKind::Tag,
            (Some(digit), _) if digit.is_ascii_digit() => RefKind::Tag,
            _ => RefKind::Branch,
        }
    }

    /// Renders the source suffix for a ref (`#branch`, `@tag`, `@commit`).
    #[must_use]
    pub fn suffix(self, reference: &str) -> String {
        match self {
            RefKind::Branch => format!("#{reference}"),
            RefKind::Tag | RefKind::Commit => format!("@{reference}"),
            RefKind::Default => String::new(),
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefKind::Branch => "branch",
            RefKind::Tag => "tag",
            RefKind::Commit => "commit",
            RefKind::Default => "default",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    pub name: String,
    pub kind: RefKind,
}

impl GitRef {
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.kind.is_pinned()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid source `{input}`: {reason}")]
pub struct InvalidSourceError {
    pub input: String,
    pub reason: String,
}

impl InvalidSourceError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A classified install source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Git {
        url: String,
        reference: Option<GitRef>,
    },
    Local {
        path: PathBuf,
    },
}

impl SourceSpec {
    /// Classifies `raw` as an existing local directory or a Git URL with an optional ref.
    ///
    /// # Errors
    /// Returns [`InvalidSourceError`] when `raw` is neither.
    pub fn resolve(raw: &str, cwd: &Path, home: Option<&Path>) -> Result<Self, InvalidSourceError> {
        Self::resolve_with(raw, cwd, home, |path| path.exists(), Path::is_dir)
    }

    /// Same as [`SourceSpec::resolve`] with injectable filesystem checks.
    ///
    /// # Errors
    /// Returns [`InvalidSourceError`] when `raw` is neither a directory nor a Git URL.
    pub fn resolve_with(
        raw: &str,
        cwd: &Path,
        home: Option<&Path>,
        exists: impl Fn(&Path) -> bool,
        is_dir: impl Fn(&Path) -> bool,
    ) -> Result<Self, InvalidSourceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidSourceError::new(raw, "source is empty"));
        }

        let candidate = expand_local(trimmed, cwd, home);
        if exists(&candidate) {
            if !is_dir(&candidate) {
                return Err(InvalidSourceError::new(
                    raw,
                    "local sources must be directories; pass the directory and the script name",
                ));
            }
            let path = lexical_normalize(&candidate);
            debug!(path = %path.display(), "classified source as local");
            return Ok(SourceSpec::Local { path });
        }
        if looks_like_path(trimmed) {
            return Err(InvalidSourceError::new(raw, "local path does not exist"));
        }

        let (base, reference) = split_ref(trimmed).map_err(|reason| InvalidSourceError::new(raw, reason))?;
        validate_git_url(base).map_err(|reason| InvalidSourceError::new(raw, reason))?;
        let url = base.trim_end_matches('/').to_string();
        debug!(%url, reference = ?reference, "classified source as git");
        Ok(SourceSpec::Git { url, reference })
    }

    #[must_use]
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceSpec::Git { .. } => SourceType::Git,
            SourceSpec::Local { .. } => SourceType::Local,
        }
    }

    /// The `source_location` recorded in state.
    #[must_use]
    pub fn location(&self) -> String {
        match self {
            SourceSpec::Git { url, .. } => url.clone(),
            SourceSpec::Local { path } => path.display().to_string(),
        }
    }

    #[must_use]
    pub fn reference(&self) -> Option<&GitRef> {
        match self {
            SourceSpec::Git { reference, .. } => reference.as_ref(),
            SourceSpec::Local { .. } => None,
        }
    }

    /// Directory name under `repo_dir` where this source is materialized.
    #[must_use]
    pub fn repo_key(&self) -> String {
        match self {
            SourceSpec::Git { url, reference } => {
                let base = git_repo_key(url);
                match reference {
                    Some(reference) => format!("{base}@{}", sanitize_key(&reference.name)),
                    None => base,
                }
            }
            SourceSpec::Local { path } => local_repo_key(path),
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Git { url, reference } => match reference {
                Some(reference) => write!(f, "{url}{}", reference.kind.suffix(&reference.name)),
                None => f.write_str(url),
            },
            SourceSpec::Local { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Splits a trailing `#branch` or `@tag`/`@commit` suffix from a Git source.
///
/// # Errors
/// Returns a reason when a suffix marker is present but empty.
pub fn split_ref(raw: &str) -> Result<(&str, Option<GitRef>), String> {
    if let Some((base, reference)) = raw.rsplit_once('#') {
        if reference.trim().is_empty() {
            return Err("empty branch after `#`".to_string());
        }
        return Ok((
            base,
            Some(GitRef {
                name: reference.trim().to_string(),
                kind: RefKind::Branch,
            }),
        ));
    }
    if let Some(at) = raw.rfind('@') {
        let boundary = raw.rfind(['/', ':']).unwrap_or(0);
        if at > boundary {
            let reference = raw[at + 1..].trim();
            if reference.is_empty() {
                return Err("empty ref after `@`".to_string());
            }
            let kind = if looks_like_commit(reference) {
                RefKind::Commit
            } else {
                RefKind::Tag
            };
            return Ok((
                &raw[..at],
                Some(GitRef {
                    name: reference.to_string(),
                    kind,
                }),
            ));
        }
    }
    Ok((raw, None))
}

#[must_use]
pub fn looks_like_commit(value: &str) -> bool {
    (7..=40).contains(&value.len()) && value.chars().all(|ch| ch.is_ascii_hexdigit())
}

fn validate_git_url(base: &str) -> Result<(), String> {
    if is_scp_like(base) {
        return Ok(());
    }
    let parsed = Url::parse(base).map_err(|err| format!("not an existing path or a valid URL ({err})"))?;
    if !GIT_SCHEMES.contains(&parsed.scheme()) {
        return Err(format!("unsupported URL scheme `{}`", parsed.scheme()));
    }
    if parsed.scheme() != "file" && parsed.host_str().is_none_or(str::is_empty) {
        return Err("URL has no host".to_string());
    }
    if parsed.path().trim_matches('/').is_empty() {
        return Err("URL has no repository path".to_string());
    }
    Ok(())
}

/// `user@host:owner/repo` style remotes.
fn is_scp_like(value: &str) -> bool {
    if value.contains("://") {
        return false;
    }
    let Some((user_host, path)) = value.split_once(':') else {
        return false;
    };
    let Some((user, host)) = user_host.split_once('@') else {
        return false;
    };
    !user.is_empty()
        && !host.is_empty()
        && !host.contains('/')
        && !path.trim_matches('/').is_empty()
        && !path.starts_with('/')
}

fn git_repo_key(url: &str) -> String {
    let path = if is_scp_like(url) {
        url.split_once(':').map_or(url, |(_, path)| path).to_string()
    } else {
        Url::parse(url).map_or_else(|_| url.to_string(), |parsed| parsed.path().to_string())
    };
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    let repo = segments
        .last()
        .map(|name| name.trim_end_matches(".git"))
        .unwrap_or("repo");
    match segments.len() {
        0 | 1 => sanitize_key(repo),
        n => sanitize_key(&format!("{}-{repo}", segments[n - 2])),
    }
}

fn local_repo_key(path: &Path) -> String {
    let name = path
        .file_name()
        .map_or_else(|| "root".to_string(), |name| name.to_string_lossy().to_string());
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let short = hex::encode(digest);
    format!("local-{}-{}", sanitize_key(&name), &short[..8])
}

fn looks_like_path(raw: &str) -> bool {
    raw.starts_with('/')
        || raw.starts_with("./")
        || raw.starts_with("../")
        || raw.starts_with('~')
        || raw == "."
        || raw == ".."
}

fn expand_local(raw: &str, cwd: &Path, home: Option<&Path>) -> PathBuf {
    if raw == "~" {
        if let Some(home) = home {
            return home.to_path_buf();
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home {
            return home.join(rest);
        }
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Removes `.` and `..` components without touching the filesystem.
#[must_use]
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
