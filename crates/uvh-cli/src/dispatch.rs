use std::sync::Arc;

use clap::CommandFactory;
use clap_complete::Shell;
use serde_json::json;
use uvh_core::{
    BrowseRequest, CommandContext, CommandGroup, CommandInfo, DoctorRequest, ExecutionOutcome, ExportRequest,
    GlobalOptions, ImportRequest, InstallOverrides, InstallRequest, ListRequest, RemoveRequest,
    ScriptFilter, SourceType, SystemEffects, UpdateRequest,
};

use crate::cli::{CommandGroupCli, InstallOverrideArgs, ListArgs, SourceTypeArg, UvhCli};

/// Runs one parsed command and shapes any error into an outcome.
pub fn dispatch_command(
    global: &GlobalOptions,
    command: &CommandGroupCli,
) -> (CommandInfo, ExecutionOutcome) {
    let info = command_info(command);
    if let CommandGroupCli::Completion(args) = command {
        return (info, completion_outcome(args.shell));
    }
    let ctx = match CommandContext::new(global, Arc::new(SystemEffects::new())) {
        Ok(ctx) => ctx,
        Err(err) => return (info, config_outcome(global, &err)),
    };

    let outcome = match command {
        CommandGroupCli::Install(args) => {
            let request = InstallRequest {
                source: args.source.clone(),
                scripts: args.scripts.clone(),
                with: args.with.clone(),
                requirements: Vec::new(),
                exact_dependencies: false,
                alias: args.alias.clone(),
                force: args.force,
                dry_run: args.dry_run,
                copy_parent_dir: args.copy_parent_dir,
                add_source_package: args.add_source_package.clone(),
                no_deps: args.no_deps,
                overrides: install_overrides(&args.overrides),
            };
            core_call(global, || uvh_core::install_scripts(&ctx, &request))
        }
        CommandGroupCli::Update(args) => {
            let request = UpdateRequest {
                target: args.name.clone(),
                all: args.all,
                force: args.force,
                refresh_deps: args.refresh_deps,
                dry_run: args.dry_run,
                with: args.with.clone(),
                overrides: install_overrides(&args.overrides),
            };
            core_call(global, || uvh_core::update_scripts(&ctx, &request))
        }
        CommandGroupCli::Remove(args) => {
            let request = RemoveRequest {
                targets: args.names.clone(),
                clean_repo: args.clean_repo,
                dry_run: args.dry_run,
            };
            core_call(global, || uvh_core::remove_scripts(&ctx, &request))
        }
        CommandGroupCli::List(args) => {
            let request = ListRequest {
                filter: list_filter(args),
            };
            core_call(global, || uvh_core::list_scripts(&ctx, &request))
        }
        CommandGroupCli::Show(args) => {
            core_call(global, || uvh_core::show_script(&ctx, &args.name))
        }
        CommandGroupCli::Export(args) => {
            let request = ExportRequest {
                output: args.output.clone(),
            };
            core_call(global, || uvh_core::export_scripts(&ctx, &request))
        }
        CommandGroupCli::Import(args) => {
            let request = ImportRequest {
                file: args.file.clone(),
                force: args.force,
                dry_run: args.dry_run,
                overrides: install_overrides(&args.overrides),
            };
            core_call(global, || uvh_core::import_scripts(&ctx, &request))
        }
        CommandGroupCli::Doctor(args) => {
            let request = DoctorRequest {
                repair: args.repair,
            };
            core_call(global, || uvh_core::run_doctor(&ctx, &request))
        }
        CommandGroupCli::Browse(args) => {
            let request = BrowseRequest {
                source: args.source.clone(),
                all: args.all,
            };
            core_call(global, || uvh_core::browse_source(&ctx, &request))
        }
        CommandGroupCli::Completion(args) => completion_outcome(args.shell),
    };
    (info, outcome)
}

fn command_info(command: &CommandGroupCli) -> CommandInfo {
    match command {
        CommandGroupCli::Install(_) => CommandInfo::new(CommandGroup::Install, "install"),
        CommandGroupCli::Update(_) => CommandInfo::new(CommandGroup::Update, "update"),
        CommandGroupCli::Remove(_) => CommandInfo::new(CommandGroup::Remove, "remove"),
        CommandGroupCli::List(_) => CommandInfo::new(CommandGroup::List, "list"),
        CommandGroupCli::Show(_) => CommandInfo::new(CommandGroup::Show, "show"),
        CommandGroupCli::Export(_) => CommandInfo::new(CommandGroup::Export, "export"),
        CommandGroupCli::Import(_) => CommandInfo::new(CommandGroup::Import, "import"),
        CommandGroupCli::Doctor(_) => CommandInfo::new(CommandGroup::Doctor, "doctor"),
        CommandGroupCli::Browse(_) => CommandInfo::new(CommandGroup::Browse, "browse"),
        CommandGroupCli::Completion(_) => CommandInfo::new(CommandGroup::Completion, "completion"),
    }
}

fn install_overrides(args: &InstallOverrideArgs) -> InstallOverrides {
    let exact = match (args.exact, args.no_exact) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    InstallOverrides {
        install_dir: args.install_dir.clone(),
        exact,
        no_symlink: args.no_symlink,
        depth: args.depth,
    }
}

fn list_filter(args: &ListArgs) -> ScriptFilter {
    let pinned = match (args.pinned, args.unpinned) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    ScriptFilter {
        source_contains: args.source.clone(),
        source_type: args.source_type.map(|kind| match kind {
            SourceTypeArg::Git => SourceType::Git,
            SourceTypeArg::Local => SourceType::Local,
        }),
        git_ref: args.git_ref.clone(),
        pinned,
    }
}

fn completion_outcome(shell: Shell) -> ExecutionOutcome {
    let mut buffer = Vec::new();
    clap_complete::generate(shell, &mut UvhCli::command(), "uvh", &mut buffer);
    ExecutionOutcome::success(
        String::from_utf8_lossy(&buffer).into_owned(),
        json!({ "passthrough": true, "shell": shell.to_string() }),
    )
}

fn config_outcome(global: &GlobalOptions, err: &anyhow::Error) -> ExecutionOutcome {
    if global.debug {
        tracing::error!("{err:?}");
    }
    let issues: Vec<String> = err.chain().map(ToString::to_string).collect();
    ExecutionOutcome::user_error(
        format!("{err:#}"),
        json!({
            "reason": "invalid_config",
            "issues": issues,
            "hint": "check the file named by --config or UVH_CONFIG",
        }),
    )
}

fn core_call<F>(global: &GlobalOptions, action: F) -> ExecutionOutcome
where
    F: FnOnce() -> anyhow::Result<ExecutionOutcome>,
{
    match action() {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(outcome) = uvh_core::error_outcome(&err) {
                return outcome;
            }
            if global.debug {
                tracing::error!("{err:?}");
            }
            let issues: Vec<String> = err.chain().map(ToString::to_string).collect();
            ExecutionOutcome::failure(
                err.to_string(),
                json!({
                    "reason": "internal_error",
                    "error": format!("{err:#}"),
                    "issues": issues,
                    "hint": "Re-run with `--debug` for more detail, or open an issue if this persists.",
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn exact_flags_map_to_an_override() {
        let cli = UvhCli::parse_from([
            "uvh", "install", "./tools", "a.py", "--no-exact", "--depth", "3",
        ]);
        let CommandGroupCli::Install(args) = cli.command else {
            panic!("expected install");
        };
        let overrides = install_overrides(&args.overrides);
        assert_eq!(overrides.exact, Some(false));
        assert_eq!(overrides.depth, Some(3));
        assert!(!overrides.no_symlink);
    }

    #[test]
    fn list_flags_build_a_filter() {
        let cli = UvhCli::parse_from([
            "uvh",
            "list",
            "--source-type",
            "git",
            "--unpinned",
            "--ref",
            "main",
        ]);
        let CommandGroupCli::List(args) = cli.command else {
            panic!("expected list");
        };
        let filter = list_filter(&args);
        assert_eq!(filter.source_type, Some(SourceType::Git));
        assert_eq!(filter.pinned, Some(false));
        assert_eq!(filter.git_ref.as_deref(), Some("main"));
    }

    #[test]
    fn unknown_errors_become_failures_with_the_chain() {
        let outcome = core_call(&GlobalOptions::default(), || {
            Err(anyhow::anyhow!("disk on fire").context("writing state"))
        });
        assert_eq!(outcome.status, uvh_core::CommandStatus::Failure);
        assert_eq!(outcome.details["reason"], "internal_error");
        assert_eq!(outcome.details["issues"][1], "disk on fire");
    }

    #[test]
    fn completion_is_passed_through() {
        let outcome = completion_outcome(Shell::Bash);
        assert_eq!(outcome.details["passthrough"], true);
        assert!(outcome.message.contains("uvh"));
    }
}
