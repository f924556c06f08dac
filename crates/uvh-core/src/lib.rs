#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

mod core;

pub use crate::core::config::context::{CommandContext, CommandInfo};
pub use crate::core::config::{
    Config, ConfigSource, GitConfig, GlobalOptions, InstallConfig, PathsConfig,
};
pub use crate::core::doctor::{run_doctor, DoctorRequest, Problem, ProblemKind};
pub use crate::core::runtime::effects::{SharedEffects, SystemEffects};
pub use crate::core::runtime::process::RunOutput;
pub use crate::core::runtime::{format_status_message, to_json_response, CommandGroup};
pub use crate::core::scripts::{
    browse_source, export_scripts, import_scripts, install_scripts, list_scripts, remove_scripts,
    show_script, update_scripts, BrowseRequest, ExportRequest, ImportRequest, InstallOverrides,
    InstallRequest, ItemReport, ItemStatus, ListRequest, RemoveRequest, UpdateRequest,
};
pub use crate::core::store::{quarantine, StateStore};
pub use crate::core::tooling::errors::{
    error_outcome, AliasCollisionError, LocalChangesError, MaterializationError, ScriptNotFoundError,
    StateCorruptionError,
};
pub use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome, InstallUserError};

pub use uvh_domain::{ScriptFilter, SourceType};
