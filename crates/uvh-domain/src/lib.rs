#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod dependency;
pub mod local_changes;
pub mod merge;
pub mod migrations;
pub mod naming;
pub mod record;
pub mod requirements;
pub mod script_block;
pub mod source;
pub mod syntax;

pub use dependency::{same_dependency_set, Dependency, DependencyKey};
pub use local_changes::{classify, is_managed_edit, ChangeReport, ChangeSets, LocalChanges};
pub use merge::{
    classify_with_value, merge_dependencies, split_inline_list, DependencyMerger,
    DependencyOrigin, WithValue,
};
pub use migrations::{
    apply_step, document_version, needs_migration, normalize_document, MigrationError,
    MigrationStep, MIGRATIONS,
};
pub use naming::{normalize_package_name, sanitize_key, validate_link_name};
pub use record::{InstalledScript, ScriptFilter, StoreDocument, STORE_SCHEMA_VERSION};
pub use requirements::{
    collect_requirements, parse_requirements, read_requirements, render_requirements,
    DependencyParseError, ParseMode, ParsedRequirements, RequirementsError, RequirementsIter,
};
pub use script_block::{
    embed_dependencies, find_block, materialize_text, rewrite_shebang, shebang,
    ScriptBlockError,
};
pub use source::{GitRef, InvalidSourceError, RefKind, SourceSpec, SourceType};
pub use syntax::{check_python_source, SyntaxIssue};
