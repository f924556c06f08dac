//! Persistent record of installed scripts.
//!
//! The store is read once per invocation, migrated forward when older than
//! [`STORE_SCHEMA_VERSION`], and rewritten atomically after every mutation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info};
use uvh_domain::{
    apply_step, document_version, needs_migration, normalize_document, InstalledScript,
    ScriptFilter, StoreDocument, MIGRATIONS, STORE_SCHEMA_VERSION,
};

use crate::core::tooling::errors::{AliasCollisionError, ScriptNotFoundError, StateCorruptionError};

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    doc: StoreDocument,
    applied: Vec<u32>,
    backup: Option<PathBuf>,
}

impl StateStore {
    /// Loads the store at `path`, migrating it first when needed. A missing or empty file
    /// is an empty store.
    ///
    /// # Errors
    /// Returns [`StateCorruptionError`] for unreadable content and `MigrationError` when a
    /// step fails.
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self {
            path: path.to_path_buf(),
            doc: StoreDocument::empty(),
            applied: Vec::new(),
            backup: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Re-reads the backing file and applies any pending migration steps.
    ///
    /// Returns the versions of the steps that changed something.
    ///
    /// # Errors
    /// Same as [`StateStore::open`].
    pub fn migrate(&mut self) -> Result<Vec<u32>> {
        let Some(raw) = read_raw(&self.path)? else {
            self.doc = StoreDocument::empty();
            return Ok(Vec::new());
        };
        let value: Value = serde_json::from_str(&raw).map_err(|err| self.corrupt(err.to_string()))?;
        if !value.is_object() {
            return Err(self.corrupt("expected a JSON object").into());
        }
        let version = document_version(&value);
        if version > STORE_SCHEMA_VERSION {
            return Err(self
                .corrupt(format!(
                    "schema version {version} is newer than this uvh understands ({STORE_SCHEMA_VERSION})"
                ))
                .into());
        }

        let mut applied = Vec::new();
        let value = if needs_migration(&value) {
            let backup = backup_path(&self.path);
            fs::write(&backup, raw.as_bytes())
                .with_context(|| format!("writing backup {}", backup.display()))?;
            info!(from = version, to = STORE_SCHEMA_VERSION, backup = %backup.display(), "migrating state file");
            self.backup = Some(backup);

            let mut doc = normalize_document(value)?;
            for step in MIGRATIONS {
                if apply_step(&mut doc, step)? {
                    write_atomic(&self.path, &Value::Object(doc.clone()))?;
                    debug!(version = step.version, step = step.description, "applied state migration");
                    applied.push(step.version);
                }
            }
            Value::Object(doc)
        } else {
            value
        };

        let doc: StoreDocument =
            serde_json::from_value(value).map_err(|err| self.corrupt(err.to_string()))?;
        self.doc = doc;
        if !applied.is_empty() {
            self.flush()?;
        }
        self.applied.extend(applied.iter().copied());
        Ok(applied)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.doc.schema_version
    }

    /// Migration steps applied since this store was opened.
    #[must_use]
    pub fn applied_migrations(&self) -> &[u32] {
        &self.applied
    }

    #[must_use]
    pub fn backup_path(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Looks a record up by name, then by alias.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&InstalledScript> {
        self.doc
            .scripts
            .get(key)
            .or_else(|| self.doc.scripts.values().find(|record| record.answers_to(key)))
    }

    /// Like [`StateStore::get`], failing with [`ScriptNotFoundError`].
    ///
    /// # Errors
    /// Returns [`ScriptNotFoundError`] when nothing answers to `key`.
    pub fn resolve(&self, key: &str) -> Result<&InstalledScript, ScriptNotFoundError> {
        self.get(key).ok_or_else(|| ScriptNotFoundError {
            key: key.to_string(),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = &InstalledScript> {
        self.doc.scripts.values()
    }

    #[must_use]
    pub fn list(&self, filter: &ScriptFilter) -> Vec<&InstalledScript> {
        self.records().filter(|record| filter.matches(record)).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.scripts.is_empty()
    }

    /// Checks that `name` exposed as `alias` shares no key with another record.
    ///
    /// # Errors
    /// Returns [`AliasCollisionError`] naming the record that already owns the key.
    pub fn check_alias(&self, name: &str, alias: Option<&str>) -> Result<(), AliasCollisionError> {
        let link = alias.unwrap_or(name);
        let owner = self.records().filter(|other| other.name != name).find(|other| {
            other.answers_to(link) || other.alias.as_deref() == Some(name)
        });
        match owner {
            Some(owner) => Err(AliasCollisionError {
                alias: link.to_string(),
                owner: owner.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Inserts or replaces the record keyed by its name and flushes.
    ///
    /// # Errors
    /// Returns [`AliasCollisionError`] or an I/O error from the flush.
    pub fn upsert(&mut self, mut record: InstalledScript) -> Result<()> {
        self.check_alias(&record.name, record.alias.as_deref())?;
        record.schema_version = STORE_SCHEMA_VERSION;
        debug!(name = %record.name, "recording script");
        self.doc.scripts.insert(record.name.clone(), record);
        self.doc.schema_version = STORE_SCHEMA_VERSION;
        self.flush()
    }

    /// Removes the record named `name` and flushes.
    ///
    /// # Errors
    /// Returns an I/O error from the flush.
    pub fn delete(&mut self, name: &str) -> Result<Option<InstalledScript>> {
        let removed = self.doc.scripts.remove(name);
        if removed.is_some() {
            debug!(%name, "forgetting script");
            self.flush()?;
        }
        Ok(removed)
    }

    /// Records that share the source location or the managed checkout.
    #[must_use]
    pub fn referencing(&self, location: &str, repo_path: &Path) -> Vec<&InstalledScript> {
        self.records()
            .filter(|record| record.source_location == location || record.repo_path == repo_path)
            .collect()
    }

    fn flush(&self) -> Result<()> {
        let value = serde_json::to_value(&self.doc).context("serializing state")?;
        write_atomic(&self.path, &value)
    }

    fn corrupt(&self, reason: impl Into<String>) -> StateCorruptionError {
        StateCorruptionError {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

fn read_raw(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(None),
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

fn write_atomic(path: &Path, value: &Value) -> Result<()> {
    let mut contents = serde_json::to_vec_pretty(value)?;
    contents.push(b'\n');
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &contents).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map_or_else(|| "state".to_string(), |stem| stem.to_string_lossy().to_string());
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_backup_{}{suffix}", file_stamp()))
}

/// Sets an unreadable state file aside as `<name>.corrupt-<stamp>`; returns the new path.
///
/// # Errors
/// Returns an error when the rename fails.
pub fn quarantine(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .map_or_else(|| "state.json".to_string(), |name| name.to_string_lossy().to_string());
    let target = path.with_file_name(format!("{name}.corrupt-{}", file_stamp()));
    fs::rename(path, &target)
        .with_context(|| format!("moving {} to {}", path.display(), target.display()))?;
    info!(from = %path.display(), to = %target.display(), "quarantined state file");
    Ok(target)
}

/// RFC 3339 timestamp for record fields.
pub(crate) fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

fn file_stamp() -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use uvh_domain::{RefKind, SourceType};

    fn record(name: &str, alias: Option<&str>, repo: &str) -> InstalledScript {
        InstalledScript {
            name: name.to_string(),
            alias: alias.map(ToString::to_string),
            source_type: SourceType::Git,
            source_location: format!("https://example.com/acme/{repo}"),
            git_ref: None,
            ref_kind: RefKind::Default,
            resolved_commit: Some("0123abcd".to_string()),
            dependencies: Vec::new(),
            source_package: None,
            copy_parent_dir: false,
            repo_path: PathBuf::from(format!("/repos/acme-{repo}")),
            install_path: PathBuf::from(format!("/repos/acme-{repo}/{name}")),
            symlink_path: None,
            installed_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            schema_version: STORE_SCHEMA_VERSION,
        }
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(&temp.path().join("state.json")).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.schema_version(), STORE_SCHEMA_VERSION);
    }

    #[test]
    fn alias_and_name_resolve_to_the_same_record() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        let mut store = StateStore::open(&path).unwrap();
        store
            .upsert(record("long_script_name.py", Some("short"), "tools"))
            .unwrap();

        let reopened = StateStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("short").map(|r| r.name.as_str()),
            Some("long_script_name.py")
        );
        assert_eq!(
            reopened.resolve("long_script_name.py").unwrap().alias.as_deref(),
            Some("short")
        );
        assert!(reopened.resolve("missing").is_err());
    }

    #[test]
    fn alias_collisions_are_rejected() {
        let temp = tempdir().unwrap();
        let mut store = StateStore::open(&temp.path().join("state.json")).unwrap();
        store.upsert(record("a.py", Some("tool"), "one")).unwrap();

        let err = store.upsert(record("b.py", Some("tool"), "two")).unwrap_err();
        let collision = err.downcast_ref::<AliasCollisionError>().unwrap();
        assert_eq!(collision.owner, "a.py");

        assert!(store.upsert(record("c.py", Some("a.py"), "two")).is_err());
        assert!(store.upsert(record("tool", None, "two")).is_err());
        store.upsert(record("a.py", Some("tool"), "one")).unwrap();
    }

    #[test]
    fn corrupt_file_reports_its_path() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let err = StateStore::open(&path).unwrap_err();
        let corrupt = err.downcast_ref::<StateCorruptionError>().unwrap();
        assert_eq!(corrupt.path, path);

        let moved = quarantine(&path).unwrap();
        assert!(!path.exists());
        assert!(moved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("state.json.corrupt-"));
    }

    #[test]
    fn newer_schema_is_refused() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, r#"{"schema_version": 99, "scripts": {}}"#).unwrap();
        assert!(StateStore::open(&path).is_err());
    }

    #[test]
    fn legacy_file_is_migrated_with_backup() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        let legacy = json!({
            "scripts": {
                "1": {
                    "name": "tool.py",
                    "installed_at": "2023-05-01T10:00:00",
                    "repo_path": "/repos/acme-tools",
                    "symlink_path": "/bin/tool",
                    "dependencies": ["requests>=2.0"],
                    "source_url": "https://github.com/acme/tools",
                    "ref": "v1.2.0",
                    "commit_hash": "0123456789abcdef"
                }
            },
            "metadata": {"1": {"schema_version": 2, "migrations": {}}}
        });
        fs::write(&path, serde_json::to_string(&legacy).unwrap()).unwrap();

        let store = StateStore::open(&path).unwrap();
        assert!(!store.applied_migrations().is_empty());
        let backup = store.backup_path().unwrap().to_path_buf();
        assert!(backup.exists());
        let record = store.get("tool").unwrap();
        assert_eq!(record.name, "tool.py");
        assert_eq!(record.ref_kind, RefKind::Tag);
        assert_eq!(record.resolved_commit.as_deref(), Some("01234567"));
        assert_eq!(record.dependencies[0].name, "requests");

        let persisted: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(persisted["schema_version"], STORE_SCHEMA_VERSION);

        let again = StateStore::open(&path).unwrap();
        assert!(again.applied_migrations().is_empty());
        assert_eq!(again.get("tool.py"), store.get("tool.py"));
    }

    #[test]
    fn shared_checkouts_are_tracked() {
        let temp = tempdir().unwrap();
        let mut store = StateStore::open(&temp.path().join("state.json")).unwrap();
        store.upsert(record("a.py", None, "tools")).unwrap();
        store.upsert(record("b.py", None, "tools")).unwrap();
        let a = store.get("a.py").unwrap().clone();
        assert_eq!(store.referencing(&a.source_location, &a.repo_path).len(), 2);

        store.delete("b.py").unwrap();
        assert_eq!(store.referencing(&a.source_location, &a.repo_path).len(), 1);
    }
}
