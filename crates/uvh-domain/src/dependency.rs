use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pep440_rs::VersionSpecifiers;
use pep508_rs::{Requirement as PepRequirement, VersionOrUrl};
use serde::{Deserialize, Serialize};

use crate::naming::{canonical_extras, dependency_name, normalize_package_name};
use crate::source::lexical_normalize;

const ARCHIVE_SUFFIXES: [&str; 6] = [".whl", ".tar.gz", ".tgz", ".tar.bz2", ".zip", ".tar"];

/// One normalized dependency specifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url_or_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub editable: bool,
    /// Text as originally written.
    pub specifier: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Merge key: canonical name plus sorted extras.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyKey {
    pub name: String,
    pub extras: Vec<String>,
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extras.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.extras.join(","))
        }
    }
}

impl Dependency {
    /// Parses a single requirement (`name[extras]spec`, `-e target`, a URL, or a local path).
    ///
    /// Relative paths resolve against `base_dir`.
    ///
    /// # Errors
    /// Returns the reason the text is not a usable requirement.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err("empty requirement".to_string());
        }
        if let Some(target) = editable_target(trimmed) {
            return parse_editable(trimmed, target, base_dir);
        }
        if is_bare_url(trimmed) {
            return parse_direct_url(trimmed);
        }
        if is_local_path(trimmed) {
            return parse_local_path(trimmed, trimmed, base_dir, false);
        }
        parse_pep508(trimmed)
    }

    /// A path dependency on a copied source tree.
    #[must_use]
    pub fn local_package(name: &str, path: &Path) -> Self {
        let mut dep = Self {
            name: normalize_package_name(name),
            extras: Vec::new(),
            version_constraint: None,
            source_url_or_path: Some(path.display().to_string()),
            marker: None,
            editable: false,
            specifier: String::new(),
        };
        dep.specifier = dep.requirement_line();
        dep
    }

    /// Builds a best-effort entry for text that no longer parses.
    #[must_use]
    pub fn opaque(text: &str) -> Self {
        let name = dependency_name(text);
        Self {
            name,
            extras: Vec::new(),
            version_constraint: None,
            source_url_or_path: None,
            marker: None,
            editable: false,
            specifier: text.trim().to_string(),
        }
    }

    #[must_use]
    pub fn key(&self) -> DependencyKey {
        DependencyKey {
            name: self.name.clone(),
            extras: self.extras.clone(),
        }
    }

    /// True when the source is a filesystem path rather than a URL or registry name.
    #[must_use]
    pub fn is_path(&self) -> bool {
        self.source_url_or_path
            .as_deref()
            .is_some_and(|source| !is_url(source))
    }

    #[must_use]
    pub fn is_url(&self) -> bool {
        self.source_url_or_path.as_deref().is_some_and(is_url)
    }

    /// Renders the normalized form as a `requirements.txt` line.
    #[must_use]
    pub fn requirement_line(&self) -> String {
        let mut line = match &self.source_url_or_path {
            Some(source) if self.is_path() => self.path_reference(source),
            Some(source) if self.editable => source.clone(),
            Some(source) => format!("{} @ {source}", self.name_with_extras()),
            None => {
                let mut line = self.name_with_extras();
                if let Some(constraint) = &self.version_constraint {
                    line.push_str(constraint);
                }
                line
            }
        };
        if self.editable {
            line.insert_str(0, "-e ");
        }
        self.push_marker(&mut line);
        line
    }

    /// Renders the entry for an inline script metadata `dependencies` array.
    ///
    /// Path and editable sources are expressed through `[tool.uv.sources]`, so only
    /// the name is emitted for them.
    #[must_use]
    pub fn script_requirement(&self) -> String {
        let mut line = self.name_with_extras();
        if self.is_url() {
            if let Some(source) = &self.source_url_or_path {
                line.push_str(" @ ");
                line.push_str(strip_egg_fragment(source));
            }
        } else if !self.is_path() {
            if let Some(constraint) = &self.version_constraint {
                line.push_str(constraint);
            }
        }
        self.push_marker(&mut line);
        line
    }

    /// Compares everything except the original text, normalizing version constraints.
    #[must_use]
    pub fn same_requirement(&self, other: &Self) -> bool {
        self.name == other.name
            && self.extras == other.extras
            && self.source_url_or_path == other.source_url_or_path
            && self.marker == other.marker
            && self.editable == other.editable
            && normalized_constraint(self.version_constraint.as_deref())
                == normalized_constraint(other.version_constraint.as_deref())
    }

    /// A path, tagged with `#egg=` when the name cannot be derived from it.
    fn path_reference(&self, source: &str) -> String {
        let derived = name_from_location(source);
        if derived.as_deref() == Some(self.name.as_str()) && self.extras.is_empty() {
            source.to_string()
        } else {
            format!("{source}#egg={}", self.name_with_extras())
        }
    }

    fn name_with_extras(&self) -> String {
        if self.extras.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, self.extras.join(","))
        }
    }

    fn push_marker(&self, line: &mut String) {
        if let Some(marker) = &self.marker {
            line.push_str(" ; ");
            line.push_str(marker);
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.requirement_line())
    }
}

/// Order-insensitive comparison of two dependency lists.
#[must_use]
pub fn same_dependency_set(left: &[Dependency], right: &[Dependency]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|dep| right.iter().any(|other| dep.same_requirement(other)))
}

fn normalized_constraint(constraint: Option<&str>) -> Option<String> {
    let constraint = constraint?.trim();
    if constraint.is_empty() {
        return None;
    }
    Some(
        VersionSpecifiers::from_str(constraint)
            .map_or_else(|_| constraint.replace(' ', ""), |specs| specs.to_string()),
    )
}

fn parse_pep508(text: &str) -> Result<Dependency, String> {
    let req = PepRequirement::from_str(text).map_err(|err| err.to_string())?;
    let name = normalize_package_name(&req.name.to_string());
    let extras = canonical_extras(req.extras.iter().map(ToString::to_string));
    let (version_constraint, source) = match &req.version_or_url {
        Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
            let rendered = specifiers.to_string();
            ((!rendered.is_empty()).then_some(rendered), None)
        }
        Some(VersionOrUrl::Url(url)) => (None, Some(url.to_string())),
        None => (None, None),
    };
    let marker = req.marker.as_ref().map(ToString::to_string);
    Ok(Dependency {
        name,
        extras,
        version_constraint,
        source_url_or_path: source,
        marker,
        editable: false,
        specifier: text.to_string(),
    })
}

fn parse_editable(original: &str, target: &str, base_dir: &Path) -> Result<Dependency, String> {
    if target.is_empty() {
        return Err("editable requirement has no target".to_string());
    }
    if is_url(target) {
        let mut dep = parse_direct_url(target)?;
        dep.editable = true;
        dep.specifier = original.to_string();
        return Ok(dep);
    }
    parse_local_path(original, target, base_dir, true)
}

fn parse_direct_url(text: &str) -> Result<Dependency, String> {
    let (url, marker) = split_marker(text);
    let (egg_name, egg_extras) = egg_fragment(url);
    let name = egg_name
        .or_else(|| name_from_location(url))
        .ok_or_else(|| format!("cannot determine a package name from `{url}`; add #egg=<name>"))?;
    Ok(Dependency {
        name,
        extras: egg_extras,
        version_constraint: None,
        source_url_or_path: Some(url.to_string()),
        marker,
        editable: false,
        specifier: text.to_string(),
    })
}

fn parse_local_path(
    original: &str,
    target: &str,
    base_dir: &Path,
    editable: bool,
) -> Result<Dependency, String> {
    let (target, marker) = split_marker(target);
    let (egg_name, egg_extras) = egg_fragment(target);
    let without_fragment = target.split_once('#').map_or(target, |(path, _)| path);
    let (path_text, extras) = match split_trailing_extras(without_fragment) {
        Some((path, extras)) => (path, extras),
        None => (without_fragment, egg_extras),
    };
    if path_text.is_empty() {
        return Err("path requirement is empty".to_string());
    }
    let path = Path::new(path_text);
    let resolved: PathBuf = if path.is_absolute() {
        lexical_normalize(path)
    } else {
        lexical_normalize(&base_dir.join(path))
    };
    let name = egg_name
        .or_else(|| name_from_location(&resolved.to_string_lossy()))
        .ok_or_else(|| format!("cannot determine a package name from `{path_text}`"))?;
    Ok(Dependency {
        name,
        extras,
        version_constraint: None,
        source_url_or_path: Some(resolved.display().to_string()),
        marker,
        editable,
        specifier: original.to_string(),
    })
}

fn editable_target(text: &str) -> Option<&str> {
    if let Some(rest) = text.strip_prefix("--editable") {
        if rest.starts_with([' ', '=', '\t']) {
            return Some(rest.trim_start_matches([' ', '=', '\t']).trim());
        }
    }
    text.strip_prefix("-e")
        .filter(|rest| rest.is_empty() || rest.starts_with([' ', '\t']))
        .map(str::trim)
}

/// A URL whose text starts directly with a scheme (`https://`, `git+ssh://`).
fn is_bare_url(text: &str) -> bool {
    let Some((scheme, _)) = text.split_once("://") else {
        return false;
    };
    !scheme.is_empty()
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}

fn is_url(text: &str) -> bool {
    is_bare_url(text)
}

fn is_local_path(text: &str) -> bool {
    if text.starts_with("./")
        || text.starts_with("../")
        || text.starts_with('/')
        || text.starts_with("~/")
        || text == "."
        || text.starts_with(".[")
    {
        return true;
    }
    let lowered = text.to_ascii_lowercase();
    !text.contains(['<', '>', '=', '!', '~', ' ', '@'])
        && ARCHIVE_SUFFIXES.iter().any(|suffix| lowered.ends_with(suffix))
}

fn split_marker(text: &str) -> (&str, Option<String>) {
    match text.split_once(';') {
        Some((head, marker)) if !marker.trim().is_empty() => {
            (head.trim(), Some(marker.trim().to_string()))
        }
        Some((head, _)) => (head.trim(), None),
        None => (text.trim(), None),
    }
}

fn split_trailing_extras(text: &str) -> Option<(&str, Vec<String>)> {
    let stripped = text.strip_suffix(']')?;
    let (path, extras) = stripped.rsplit_once('[')?;
    Some((path, canonical_extras(extras.split(','))))
}

fn egg_fragment(location: &str) -> (Option<String>, Vec<String>) {
    let Some((_, fragment)) = location.split_once('#') else {
        return (None, Vec::new());
    };
    for part in fragment.split('&') {
        if let Some(egg) = part.strip_prefix("egg=") {
            let (name, extras) = match split_trailing_extras(egg) {
                Some((name, extras)) => (name, extras),
                None => (egg, Vec::new()),
            };
            let name = normalize_package_name(name);
            if !name.is_empty() {
                return (Some(name), extras);
            }
        }
    }
    (None, Vec::new())
}

fn strip_egg_fragment(location: &str) -> &str {
    match location.split_once('#') {
        Some((base, fragment)) if fragment.starts_with("egg=") => base,
        _ => location,
    }
}

/// Derives a distribution name from an archive file name or a directory/repository name.
fn name_from_location(location: &str) -> Option<String> {
    let base = location
        .split(['#', '?'])
        .next()
        .unwrap_or(location)
        .trim_end_matches('/');
    let segment = base.rsplit(['/', '\\']).next().unwrap_or(base);
    let lowered = segment.to_ascii_lowercase();
    let stem = if lowered.ends_with(".whl") {
        segment.split('-').next().unwrap_or(segment).to_string()
    } else if let Some(suffix) = ARCHIVE_SUFFIXES
        .iter()
        .find(|suffix| lowered.ends_with(*suffix))
    {
        let without = &segment[..segment.len() - suffix.len()];
        without
            .split('-')
            .take_while(|part| !part.starts_with(|ch: char| ch.is_ascii_digit()))
            .collect::<Vec<_>>()
            .join("-")
    } else {
        segment.trim_end_matches(".git").to_string()
    };
    let name = normalize_package_name(&stem);
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Dependency {
        Dependency::parse(text, Path::new("/work/repo")).unwrap()
    }

    #[test]
    fn splits_name_extras_and_constraint() {
        let dep = parse("Requests[Socks,security] >= 2.0 ; python_version >= '3.8'");
        assert_eq!(dep.name, "requests");
        assert_eq!(dep.extras, vec!["security", "socks"]);
        assert_eq!(dep.version_constraint.as_deref(), Some(">=2.0"));
        assert!(dep.marker.is_some());
        assert_eq!(
            dep.specifier,
            "Requests[Socks,security] >= 2.0 ; python_version >= '3.8'"
        );
    }

    #[test]
    fn editable_path_keeps_reference_and_resolves_path() {
        let dep = parse("-e ./libs/helper");
        assert!(dep.editable);
        assert_eq!(dep.name, "helper");
        assert_eq!(
            dep.source_url_or_path.as_deref(),
            Some("/work/repo/libs/helper")
        );
        assert_eq!(dep.specifier, "-e ./libs/helper");
        assert!(dep.is_path());
    }

    #[test]
    fn editable_vcs_url_uses_egg_name() {
        let dep = parse("-e git+https://github.com/acme/lib.git#egg=acme-lib");
        assert!(dep.editable);
        assert_eq!(dep.name, "acme-lib");
        assert!(dep.is_url());
        assert_eq!(
            dep.script_requirement(),
            "acme-lib @ git+https://github.com/acme/lib.git"
        );
    }

    #[test]
    fn bare_wheel_url_derives_name() {
        let dep = parse("https://files.example.com/pkgs/my_pkg-1.2.0-py3-none-any.whl");
        assert_eq!(dep.name, "my-pkg");
        assert!(dep.is_url());
        assert_eq!(dep.version_constraint, None);
    }

    #[test]
    fn sdist_url_strips_version() {
        let dep = parse("https://example.com/dl/fancy-tool-0.4.1.tar.gz");
        assert_eq!(dep.name, "fancy-tool");
    }

    #[test]
    fn pep508_direct_reference() {
        let dep = parse("pkg @ https://example.com/pkg-1.0.zip");
        assert_eq!(dep.name, "pkg");
        assert_eq!(
            dep.source_url_or_path.as_deref(),
            Some("https://example.com/pkg-1.0.zip")
        );
        assert_eq!(dep.requirement_line(), "pkg @ https://example.com/pkg-1.0.zip");
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(Dependency::parse("requests >>= 2", Path::new("/")).is_err());
        assert!(Dependency::parse("   ", Path::new("/")).is_err());
        assert!(Dependency::parse("-e", Path::new("/")).is_err());
    }

    #[test]
    fn script_requirement_omits_path_sources() {
        let dep = Dependency::local_package("My_Tools", Path::new("/repos/local-tools"));
        assert_eq!(dep.name, "my-tools");
        assert_eq!(dep.script_requirement(), "my-tools");
        assert!(dep.is_path());
    }

    #[test]
    fn same_requirement_ignores_spacing_in_constraints() {
        let left = parse("click>=8.0,<9");
        let mut right = parse("click >= 8.0, < 9");
        assert!(left.same_requirement(&right));
        right.version_constraint = Some(">=8.1".into());
        assert!(!left.same_requirement(&right));
    }

    #[test]
    fn requirement_line_reparses_to_same_requirement() {
        for text in [
            "rich",
            "httpx[http2]~=0.27",
            "-e ../shared",
            "https://example.com/wheels/foo-1.0-py3-none-any.whl",
            "colorama; sys_platform == 'win32'",
        ] {
            let dep = parse(text);
            let again = Dependency::parse(&dep.requirement_line(), Path::new("/elsewhere")).unwrap();
            assert!(dep.same_requirement(&again), "{text} -> {}", dep.requirement_line());
        }
    }
}
