use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::source::{GitRef, RefKind, SourceSpec, SourceType};

/// Record and document layout version written by this build.
pub const STORE_SCHEMA_VERSION: u32 = 4;

/// One managed script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledScript {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub source_type: SourceType,
    pub source_location: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub ref_kind: RefKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_commit: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Package name injected with `--add-source-package`, re-added on dependency refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_package: Option<String>,
    #[serde(default)]
    pub copy_parent_dir: bool,
    /// Managed checkout or copy the script lives in.
    pub repo_path: PathBuf,
    pub install_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_path: Option<PathBuf>,
    pub installed_at: String,
    pub updated_at: String,
    pub schema_version: u32,
}

impl InstalledScript {
    /// The name exposed on the install path.
    #[must_use]
    pub fn link_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.git_ref.is_some() && self.ref_kind.is_pinned()
    }

    /// True when `key` is this record's name or alias.
    #[must_use]
    pub fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.alias.as_deref() == Some(key)
    }

    /// Script path relative to the managed repository.
    #[must_use]
    pub fn relative_script(&self) -> PathBuf {
        self.install_path
            .strip_prefix(&self.repo_path)
            .map_or_else(|_| PathBuf::from(&self.name), Path::to_path_buf)
    }

    /// Rebuilds the source descriptor this record was installed from.
    #[must_use]
    pub fn source_spec(&self) -> SourceSpec {
        match self.source_type {
            SourceType::Git => SourceSpec::Git {
                url: self.source_location.clone(),
                reference: self.git_ref.as_ref().map(|name| GitRef {
                    name: name.clone(),
                    kind: self.ref_kind,
                }),
            },
            SourceType::Local => SourceSpec::Local {
                path: PathBuf::from(&self.source_location),
            },
        }
    }

    /// Source with its ref suffix, as a user would type it.
    #[must_use]
    pub fn source_display(&self) -> String {
        self.source_spec().to_string()
    }

    /// Ref column text for listings.
    #[must_use]
    pub fn ref_label(&self) -> String {
        match (&self.git_ref, self.source_type) {
            (Some(reference), _) if self.is_pinned() => format!("{reference} ({})", self.ref_kind),
            (Some(reference), _) => reference.clone(),
            (None, SourceType::Local) => "local".to_string(),
            (None, SourceType::Git) => "default".to_string(),
        }
    }
}

/// Persisted form of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub schema_version: u32,
    #[serde(default)]
    pub scripts: BTreeMap<String, InstalledScript>,
}

impl StoreDocument {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            scripts: BTreeMap::new(),
        }
    }
}

/// Filters for `list`; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ScriptFilter {
    pub source_contains: Option<String>,
    pub source_type: Option<SourceType>,
    pub git_ref: Option<String>,
    pub pinned: Option<bool>,
}

impl ScriptFilter {
    #[must_use]
    pub fn matches(&self, script: &InstalledScript) -> bool {
        if let Some(needle) = &self.source_contains {
            if !script.source_location.contains(needle.as_str()) {
                return false;
            }
        }
        if self.source_type.is_some_and(|kind| kind != script.source_type) {
            return false;
        }
        if let Some(reference) = &self.git_ref {
            if script.git_ref.as_deref() != Some(reference.as_str()) {
                return false;
            }
        }
        if self.pinned.is_some_and(|pinned| pinned != script.is_pinned()) {
            return false;
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn git_script(name: &str, url: &str, reference: Option<(&str, RefKind)>) -> InstalledScript {
        let repo = PathBuf::from("/repos/acme-tools");
        InstalledScript {
            name: name.to_string(),
            alias: None,
            source_type: SourceType::Git,
            source_location: url.to_string(),
            git_ref: reference.map(|(name, _)| name.to_string()),
            ref_kind: reference.map_or(RefKind::Default, |(_, kind)| kind),
            resolved_commit: Some("0123abcd".to_string()),
            dependencies: Vec::new(),
            source_package: None,
            copy_parent_dir: false,
            install_path: repo.join(name),
            repo_path: repo,
            symlink_path: None,
            installed_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            schema_version: STORE_SCHEMA_VERSION,
        }
    }
}
