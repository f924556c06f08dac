//! `requirements.txt` reading with recursive includes.
//!
//! Parsing is lazy: [`RequirementsIter`] yields one dependency (or one line error) at a
//! time and only opens an included file when the `-r` line is reached.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::dependency::Dependency;
use crate::source::lexical_normalize;

/// Options that apply to the whole file and carry no dependency.
const IGNORED_OPTIONS: [&str; 17] = [
    "-i",
    "--index-url",
    "--extra-index-url",
    "-f",
    "--find-links",
    "--no-index",
    "--pre",
    "--trusted-host",
    "--prefer-binary",
    "--require-hashes",
    "--only-binary",
    "--no-binary",
    "-c",
    "--constraint",
    "--use-feature",
    "--no-deps",
    "--config-settings",
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}:{line}: {reason} (`{text}`)", .file.display())]
pub struct DependencyParseError {
    pub file: PathBuf,
    pub line: usize,
    pub text: String,
    pub reason: String,
}

#[derive(thiserror::Error, Debug)]
pub enum RequirementsError {
    #[error("circular requirements include: {}", format_chain(.chain))]
    CircularInclude { chain: Vec<PathBuf> },
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Parse(DependencyParseError),
    #[error("{} invalid requirement(s):{}", .0.len(), format_errors(.0))]
    Invalid(Vec<DependencyParseError>),
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_errors(errors: &[DependencyParseError]) -> String {
    let mut out = String::new();
    for error in errors {
        let _ = write!(out, "\n  {error}");
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Collect line errors and keep going.
    #[default]
    Lenient,
    /// Stop at the first malformed line.
    Strict,
}

#[derive(Debug, Default)]
pub struct ParsedRequirements {
    pub dependencies: Vec<Dependency>,
    pub errors: Vec<DependencyParseError>,
}

impl ParsedRequirements {
    /// Turns collected line errors into a single aggregated error.
    ///
    /// # Errors
    /// Returns [`RequirementsError::Invalid`] when any line failed to parse.
    pub fn into_result(self) -> Result<Vec<Dependency>, RequirementsError> {
        if self.errors.is_empty() {
            Ok(self.dependencies)
        } else {
            Err(RequirementsError::Invalid(self.errors))
        }
    }
}

struct Frame {
    label: PathBuf,
    canonical: PathBuf,
    dir: PathBuf,
    lines: Vec<(usize, String)>,
    pos: usize,
    loaded: bool,
}

impl Frame {
    fn from_text(text: &str, label: &Path, canonical: PathBuf) -> Self {
        let dir = label
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            label: label.to_path_buf(),
            canonical,
            dir,
            lines: logical_lines(text),
            pos: 0,
            loaded: true,
        }
    }

    fn pending(path: &Path) -> Self {
        Self {
            label: path.to_path_buf(),
            canonical: canonical_path(path),
            dir: path
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
            lines: Vec::new(),
            pos: 0,
            loaded: false,
        }
    }

    fn next_line(&mut self) -> Option<(usize, String)> {
        let item = self.lines.get(self.pos).cloned();
        self.pos += 1;
        item
    }
}

/// Lazily yields dependencies from a requirements document and everything it includes.
pub struct RequirementsIter {
    stack: Vec<Frame>,
    completed: HashSet<PathBuf>,
}

impl RequirementsIter {
    /// Parses `text` as if it were read from `origin` (used for relative includes and errors).
    #[must_use]
    pub fn from_text(text: &str, origin: &Path) -> Self {
        Self {
            stack: vec![Frame::from_text(text, origin, canonical_path(origin))],
            completed: HashSet::new(),
        }
    }

    /// Opens `path` on the first call to `next`.
    #[must_use]
    pub fn from_file(path: &Path) -> Self {
        Self {
            stack: vec![Frame::pending(path)],
            completed: HashSet::new(),
        }
    }

    fn line_error(file: &Path, line: usize, text: &str, reason: impl Into<String>) -> RequirementsError {
        RequirementsError::Parse(DependencyParseError {
            file: file.to_path_buf(),
            line,
            text: text.to_string(),
            reason: reason.into(),
        })
    }

    fn include(&mut self, line: usize, text: &str, target: &str) -> Option<RequirementsError> {
        let (dir, label) = self
            .stack
            .last()
            .map(|frame| (frame.dir.clone(), frame.label.clone()))?;
        let path = if Path::new(target).is_absolute() {
            PathBuf::from(target)
        } else {
            dir.join(target)
        };
        let canonical = canonical_path(&path);
        if self.stack.iter().any(|open| open.canonical == canonical) {
            let mut chain: Vec<PathBuf> = self.stack.iter().map(|open| open.label.clone()).collect();
            chain.push(path);
            return Some(RequirementsError::CircularInclude { chain });
        }
        if self.completed.contains(&canonical) {
            debug!(path = %path.display(), "requirements file already read; skipping repeat include");
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(contents) => {
                trace!(path = %path.display(), "entering requirements include");
                self.stack.push(Frame::from_text(&contents, &path, canonical));
                None
            }
            Err(err) => Some(Self::line_error(
                &label,
                line,
                text,
                format!("cannot read included file {}: {err}", path.display()),
            )),
        }
    }
}

impl Iterator for RequirementsIter {
    type Item = Result<Dependency, RequirementsError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            if !frame.loaded {
                match fs::read_to_string(&frame.label) {
                    Ok(contents) => {
                        frame.lines = logical_lines(&contents);
                        frame.loaded = true;
                    }
                    Err(source) => {
                        let path = frame.label.clone();
                        self.stack.clear();
                        return Some(Err(RequirementsError::Io { path, source }));
                    }
                }
            }

            let Some((number, text)) = frame.next_line() else {
                if let Some(done) = self.stack.pop() {
                    self.completed.insert(done.canonical);
                }
                continue;
            };

            match classify(&text) {
                LineKind::Include(target) => {
                    if let Some(err) = self.include(number, &text, &target) {
                        return Some(Err(err));
                    }
                }
                LineKind::Ignored(option) => {
                    debug!(option = %option, line = number, "ignoring requirements option");
                }
                LineKind::Unsupported(option) => {
                    let frame = self.stack.last()?;
                    return Some(Err(Self::line_error(
                        &frame.label,
                        number,
                        &text,
                        format!("unsupported option `{option}`"),
                    )));
                }
                LineKind::Requirement(spec) => {
                    let frame = self.stack.last()?;
                    return Some(
                        Dependency::parse(&spec, &frame.dir)
                            .map_err(|reason| Self::line_error(&frame.label, number, &text, reason)),
                    );
                }
            }
        }
    }
}

enum LineKind {
    Include(String),
    Ignored(String),
    Unsupported(String),
    Requirement(String),
}

fn classify(line: &str) -> LineKind {
    for prefix in ["--requirement", "-r"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            let target = rest.trim_start_matches([' ', '=', '\t']).trim();
            if !target.is_empty() && (rest.starts_with([' ', '=', '\t']) || prefix == "-r") {
                return LineKind::Include(target.to_string());
            }
        }
    }
    if line.starts_with("-e") || line.starts_with("--editable") {
        return LineKind::Requirement(line.to_string());
    }
    if line.starts_with('-') {
        let option = line
            .split(|ch: char| ch.is_whitespace() || ch == '=')
            .next()
            .unwrap_or(line)
            .to_string();
        return if IGNORED_OPTIONS.contains(&option.as_str()) {
            LineKind::Ignored(option)
        } else {
            LineKind::Unsupported(option)
        };
    }
    let spec = line.find(" --").map_or(line, |idx| &line[..idx]).trim();
    LineKind::Requirement(spec.to_string())
}

/// Strips comments, joins `\` continuations, and drops blank lines.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in text.lines().enumerate() {
        let number = idx + 1;
        let stripped = strip_comment(raw);
        let (content, continues) = match stripped.trim_end().strip_suffix('\\') {
            Some(head) => (head.to_string(), true),
            None => (stripped.to_string(), false),
        };
        let entry = pending.get_or_insert_with(|| (number, String::new()));
        if !entry.1.is_empty() && !content.trim().is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(content.trim());
        if !continues {
            if let Some((start, line)) = pending.take() {
                if !line.trim().is_empty() {
                    out.push((start, line));
                }
            }
        }
    }
    if let Some((start, line)) = pending.take() {
        if !line.trim().is_empty() {
            out.push((start, line));
        }
    }
    out
}

fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return "";
    }
    let mut prev_ws = false;
    for (idx, ch) in line.char_indices() {
        if ch == '#' && prev_ws {
            return &line[..idx];
        }
        prev_ws = ch.is_whitespace();
    }
    line
}

fn canonical_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| lexical_normalize(path))
}

/// Drains `iter`. Circular includes and unreadable root files are always fatal.
///
/// # Errors
/// Returns the first fatal error, or the first line error in strict mode.
pub fn collect_requirements(
    iter: RequirementsIter,
    mode: ParseMode,
) -> Result<ParsedRequirements, RequirementsError> {
    let mut parsed = ParsedRequirements::default();
    for item in iter {
        match item {
            Ok(dep) => parsed.dependencies.push(dep),
            Err(RequirementsError::Parse(err)) if mode == ParseMode::Lenient => {
                debug!(%err, "collected requirements error");
                parsed.errors.push(err);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(parsed)
}

/// Parses requirements text read from `origin`.
///
/// # Errors
/// See [`collect_requirements`].
pub fn parse_requirements(
    text: &str,
    origin: &Path,
    mode: ParseMode,
) -> Result<ParsedRequirements, RequirementsError> {
    collect_requirements(RequirementsIter::from_text(text, origin), mode)
}

/// Reads and parses a requirements file.
///
/// # Errors
/// See [`collect_requirements`].
pub fn read_requirements(path: &Path, mode: ParseMode) -> Result<ParsedRequirements, RequirementsError> {
    collect_requirements(RequirementsIter::from_file(path), mode)
}

/// Serializes dependencies back to `requirements.txt` text.
#[must_use]
pub fn render_requirements(deps: &[Dependency]) -> String {
    let mut out = String::new();
    for dep in deps {
        out.push_str(&dep.requirement_line());
        out.push('\n');
    }
    out
}
