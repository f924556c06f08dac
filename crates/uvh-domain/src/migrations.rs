//! Forward-only state migrations.
//!
//! Each step is a pure function over one record's JSON object. A record carries its own
//! `schema_version`; a step only runs on records older than the step, so re-running the
//! whole list over an already migrated document changes nothing.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::dependency::Dependency;
use crate::record::STORE_SCHEMA_VERSION;
use crate::source::RefKind;

pub type RecordMap = Map<String, Value>;

pub struct MigrationStep {
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(RecordMap) -> Result<RecordMap, String>,
}

pub const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        version: 1,
        description: "add source_type to records",
        apply: add_source_type,
    },
    MigrationStep {
        version: 2,
        description: "add copy_parent_dir to records",
        apply: add_copy_parent_dir,
    },
    MigrationStep {
        version: 3,
        description: "record the kind of each git ref",
        apply: add_ref_kind,
    },
    MigrationStep {
        version: 4,
        description: "normalize record layout",
        apply: normalize_record_layout,
    },
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("state migration {version} failed for `{record}`: {reason}")]
pub struct MigrationError {
    pub version: u32,
    pub record: String,
    pub reason: String,
}

impl MigrationError {
    fn document(reason: impl Into<String>) -> Self {
        Self {
            version: 0,
            record: "<document>".to_string(),
            reason: reason.into(),
        }
    }
}

/// Version marker of a raw state document, whichever layout it uses.
#[must_use]
pub fn document_version(doc: &Value) -> u32 {
    if let Some(version) = doc.get("schema_version").and_then(Value::as_u64) {
        return u32::try_from(version).unwrap_or(u32::MAX);
    }
    legacy_metadata_version(doc).unwrap_or(0)
}

/// True when the document or any record is older than [`STORE_SCHEMA_VERSION`].
#[must_use]
pub fn needs_migration(doc: &Value) -> bool {
    if document_version(doc) < STORE_SCHEMA_VERSION || doc.get("metadata").is_some() {
        return true;
    }
    doc.get("scripts")
        .and_then(Value::as_object)
        .is_some_and(|scripts| {
            scripts
                .values()
                .any(|record| record_version(record) < STORE_SCHEMA_VERSION)
        })
}

fn legacy_metadata_version(doc: &Value) -> Option<u32> {
    let metadata = doc.get("metadata")?.as_object()?;
    metadata
        .values()
        .filter_map(|entry| entry.get("schema_version").and_then(Value::as_u64))
        .max()
        .and_then(|version| u32::try_from(version).ok())
}

fn record_version(record: &Value) -> u32 {
    record
        .get("schema_version")
        .and_then(Value::as_u64)
        .and_then(|version| u32::try_from(version).ok())
        .unwrap_or(0)
}

/// Rewrites any accepted layout into `{"schema_version": N, "scripts": {name: record}}`.
///
/// Legacy documents keep records under numeric row ids next to a `metadata` table; they are
/// re-keyed by name. Records without a version are stamped 0 so every step visits them.
///
/// # Errors
/// Returns [`MigrationError`] when the document is not an object or a record has no name.
pub fn normalize_document(doc: Value) -> Result<RecordMap, MigrationError> {
    let version = document_version(&doc);
    let Value::Object(mut root) = doc else {
        return Err(MigrationError::document("state file is not a JSON object"));
    };
    let legacy = root.remove("metadata").is_some();
    let scripts = match root.remove("scripts") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(scripts)) => scripts,
        Some(_) => return Err(MigrationError::document("`scripts` is not an object")),
    };

    let mut keyed = Map::new();
    for (key, record) in scripts {
        let Value::Object(mut record) = record else {
            return Err(MigrationError::document(format!("record `{key}` is not an object")));
        };
        let name = match record.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ if !legacy => key.clone(),
            _ => {
                return Err(MigrationError::document(format!("legacy record `{key}` has no name")));
            }
        };
        record.entry("name").or_insert_with(|| Value::String(name.clone()));
        record.entry("schema_version").or_insert(Value::from(0));
        if keyed.contains_key(&name) {
            debug!(%name, "duplicate legacy record; keeping the later row");
        }
        keyed.insert(name, Value::Object(record));
    }

    let mut out = Map::new();
    out.insert("schema_version".to_string(), Value::from(version));
    out.insert("scripts".to_string(), Value::Object(keyed));
    Ok(out)
}

/// Applies one step to every record older than it and bumps the document marker.
///
/// Returns whether any record changed. `doc` is only modified when every record migrates.
///
/// # Errors
/// Returns [`MigrationError`] naming the first record the step rejects.
pub fn apply_step(doc: &mut RecordMap, step: &MigrationStep) -> Result<bool, MigrationError> {
    let scripts = match doc.get("scripts") {
        Some(Value::Object(scripts)) => scripts.clone(),
        _ => Map::new(),
    };
    let mut migrated = Map::new();
    let mut changed = false;
    for (name, record) in scripts {
        if record_version(&record) >= step.version {
            migrated.insert(name, record);
            continue;
        }
        let Value::Object(fields) = record else {
            return Err(MigrationError {
                version: step.version,
                record: name,
                reason: "record is not an object".to_string(),
            });
        };
        let mut fields = (step.apply)(fields).map_err(|reason| MigrationError {
            version: step.version,
            record: name.clone(),
            reason,
        })?;
        fields.insert("schema_version".to_string(), Value::from(step.version));
        migrated.insert(name, Value::Object(fields));
        changed = true;
    }
    doc.insert("scripts".to_string(), Value::Object(migrated));
    let current = doc.get("schema_version").and_then(Value::as_u64).unwrap_or(0);
    if current < u64::from(step.version) {
        doc.insert("schema_version".to_string(), Value::from(step.version));
        changed = true;
    }
    Ok(changed)
}

fn add_source_type(mut record: RecordMap) -> Result<RecordMap, String> {
    record
        .entry("source_type")
        .or_insert_with(|| Value::String("git".to_string()));
    Ok(record)
}

fn add_copy_parent_dir(mut record: RecordMap) -> Result<RecordMap, String> {
    record.entry("copy_parent_dir").or_insert(Value::Bool(false));
    Ok(record)
}

fn add_ref_kind(mut record: RecordMap) -> Result<RecordMap, String> {
    if record.contains_key("ref_kind") {
        record.remove("ref_type");
        return Ok(record);
    }
    let kind = match record.remove("ref_type") {
        Some(Value::String(kind)) if is_ref_kind(&kind) => kind,
        _ => {
            let reference = record.get("ref").and_then(Value::as_str);
            RefKind::infer(reference).to_string()
        }
    };
    record.insert("ref_kind".to_string(), Value::String(kind));
    Ok(record)
}

fn is_ref_kind(value: &str) -> bool {
    matches!(value, "branch" | "tag" | "commit" | "default")
}

fn normalize_record_layout(mut record: RecordMap) -> Result<RecordMap, String> {
    let name = record
        .get("name")
        .and_then(Value::as_str)
        .ok_or("record has no name")?
        .to_string();

    let source_url = take_string(&mut record, "source_url");
    let source_path = take_string(&mut record, "source_path");
    if !record.contains_key("source_location") {
        let is_local = record.get("source_type").and_then(Value::as_str) == Some("local");
        let location = if is_local {
            source_path.or(source_url)
        } else {
            source_url.or(source_path)
        }
        .ok_or("record has neither source_url nor source_path")?;
        record.insert("source_location".to_string(), Value::String(location));
    }

    if let Some(commit) = take_string(&mut record, "commit_hash") {
        record
            .entry("resolved_commit")
            .or_insert_with(|| Value::String(commit.chars().take(8).collect()));
    }
    if let Some(Value::String(commit)) = record.get_mut("resolved_commit") {
        commit.truncate(8);
    }

    let repo_path = record
        .get("repo_path")
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or("record has no repo_path")?;
    if !record.contains_key("install_path") {
        let install = repo_path.join(&name);
        record.insert(
            "install_path".to_string(),
            Value::String(install.display().to_string()),
        );
    }

    let dependencies = match record.remove("dependencies") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| upgrade_dependency(item, &repo_path))
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err("`dependencies` is not a list".to_string()),
    };
    record.insert("dependencies".to_string(), Value::Array(dependencies));

    if !record.contains_key("updated_at") {
        let installed = record
            .get("installed_at")
            .cloned()
            .ok_or("record has no installed_at")?;
        record.insert("updated_at".to_string(), installed);
    }

    if !record.contains_key("alias") {
        let link = record
            .get("symlink_path")
            .and_then(Value::as_str)
            .and_then(|path| Path::new(path).file_name())
            .map(|file| file.to_string_lossy().to_string());
        if let Some(link) = link.filter(|link| *link != name) {
            record.insert("alias".to_string(), Value::String(link));
        }
    }
    Ok(record)
}

fn take_string(record: &mut RecordMap, key: &str) -> Option<String> {
    match record.remove(key) {
        Some(Value::String(value)) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn upgrade_dependency(item: Value, base_dir: &Path) -> Result<Value, String> {
    match item {
        Value::String(text) => {
            let dep = Dependency::parse(&text, base_dir).unwrap_or_else(|reason| {
                debug!(%text, %reason, "keeping unparsable legacy dependency verbatim");
                Dependency::opaque(&text)
            });
            serde_json::to_value(dep).map_err(|err| err.to_string())
        }
        Value::Object(_) => Ok(item),
        other => Err(format!("unsupported dependency entry `{other}`")),
    }
}
