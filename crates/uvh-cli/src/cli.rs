use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

pub const UVH_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const UVH_BEFORE_HELP: &str = concat!(
    "uvh ",
    env!("CARGO_PKG_VERSION"),
    " – Standalone uv-run Python scripts from Git or local directories\n\n",
    "\x1b[1;36mLifecycle\x1b[0m\n",
    "  install          Materialize scripts from a source and link them onto PATH.\n",
    "  update           Move scripts to the latest commit of their ref (pins are kept).\n",
    "  remove           Unlink scripts and forget them; --clean-repo drops the checkout.\n\n",
    "\x1b[1;36mInspect\x1b[0m\n",
    "  list             Show installed scripts, optionally filtered.\n",
    "  show             Print the full record for one script.\n",
    "  browse           List the scripts a Git URL or directory offers (--all for every .py).\n",
    "  doctor           Check links, files, and the state file (--repair fixes them).\n\n",
    "\x1b[1;36mMove between machines\x1b[0m\n",
    "  export           Write every record to a portable JSON document.\n",
    "  import           Reinstall everything listed in an export document.\n",
    "  completion       Print a shell completion script.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "uvh",
    author,
    version,
    disable_help_subcommand = true,
    before_help = UVH_BEFORE_HELP,
    help_template = UVH_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct UvhCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still set the exit code)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-v info, -vv debug)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(long, help = "Include the full error chain in failures", global = true)]
    pub debug: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        long,
        value_name = "PATH",
        help = "Read configuration from PATH instead of UVH_CONFIG or the default file",
        global = true
    )]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(
        about = "Install scripts from a Git URL or local directory.",
        override_usage = "uvh install <SOURCE> [SCRIPT]... [--with REQ] [--alias NAME]"
    )]
    Install(InstallArgs),
    #[command(
        about = "Update one script or all of them; pinned tags and commits stay put.",
        override_usage = "uvh update [NAME | --all] [--force] [--refresh-deps]"
    )]
    Update(UpdateArgs),
    #[command(
        about = "Remove scripts, their links, and optionally their managed checkout.",
        override_usage = "uvh remove <NAME>... [--clean-repo]"
    )]
    Remove(RemoveArgs),
    #[command(about = "List installed scripts.", override_usage = "uvh list [FILTERS]")]
    List(ListArgs),
    #[command(
        about = "Show everything recorded about one script.",
        override_usage = "uvh show <NAME>"
    )]
    Show(ShowArgs),
    #[command(
        about = "Export installed scripts to JSON (stdout unless --output is given).",
        override_usage = "uvh export [--output FILE]"
    )]
    Export(ExportArgs),
    #[command(
        about = "Reinstall scripts from an export document.",
        override_usage = "uvh import <FILE> [--force] [--dry-run]"
    )]
    Import(ImportArgs),
    #[command(
        about = "Check installed scripts, links, and the state file.",
        override_usage = "uvh doctor [--repair]"
    )]
    Doctor(DoctorArgs),
    #[command(
        about = "List the scripts a source offers before installing.",
        override_usage = "uvh browse <SOURCE> [--all]"
    )]
    Browse(BrowseArgs),
    #[command(
        about = "Print a completion script for your shell.",
        override_usage = "uvh completion <SHELL>"
    )]
    Completion(CompletionArgs),
}

/// Flags that adjust how a script lands on disk for this invocation only.
#[derive(Args, Debug, Clone, Default)]
pub struct InstallOverrideArgs {
    #[arg(long, value_name = "DIR", help = "Link scripts into DIR instead of the configured install_dir")]
    pub install_dir: Option<PathBuf>,
    #[arg(
        long,
        help = "Write `uv run --exact` into the shebang",
        conflicts_with = "no_exact"
    )]
    pub exact: bool,
    #[arg(long, help = "Write a plain `uv run` shebang", conflicts_with = "exact")]
    pub no_exact: bool,
    #[arg(long, help = "Do not create a link in the install directory")]
    pub no_symlink: bool,
    #[arg(long, value_name = "N", help = "Git clone/fetch depth (at least 1)")]
    pub depth: Option<u32>,
}

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct InstallArgs {
    #[arg(
        value_name = "SOURCE",
        help = "Git URL (optionally ending in #branch or @tag/commit) or a local directory"
    )]
    pub source: String,
    #[arg(
        value_name = "SCRIPT",
        help = "Script paths relative to the source (omit to list candidates)"
    )]
    pub scripts: Vec<String>,
    #[arg(
        long,
        value_name = "REQ",
        help = "Extra requirements: a requirements file or a comma-separated list (repeatable)"
    )]
    pub with: Vec<String>,
    #[arg(long, value_name = "NAME", help = "Link the script under NAME (single script only)")]
    pub alias: Option<String>,
    #[arg(long, help = "Reinstall even when the script is already present")]
    pub force: bool,
    #[arg(long, help = "Show what would be installed without touching disk")]
    pub dry_run: bool,
    #[arg(long, help = "Copy the whole parent directory of local scripts")]
    pub copy_parent_dir: bool,
    #[arg(
        long,
        value_name = "NAME",
        num_args = 0..=1,
        help = "Add the local source as a path dependency (requires --copy-parent-dir)"
    )]
    pub add_source_package: Option<Option<String>>,
    #[arg(long, help = "Skip dependency discovery and keep the metadata block empty")]
    pub no_deps: bool,
    #[command(flatten)]
    pub overrides: InstallOverrideArgs,
}

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct UpdateArgs {
    #[arg(value_name = "NAME", conflicts_with = "all", help = "Script name or alias")]
    pub name: Option<String>,
    #[arg(long, help = "Update every installed script")]
    pub all: bool,
    #[arg(long, help = "Re-materialize even when nothing moved; also moves pinned refs")]
    pub force: bool,
    #[arg(long, help = "Re-resolve dependencies from the checkout")]
    pub refresh_deps: bool,
    #[arg(long, help = "Check remotes and report what would change")]
    pub dry_run: bool,
    #[arg(long, value_name = "REQ", help = "Extra requirements merged into the stored set")]
    pub with: Vec<String>,
    #[command(flatten)]
    pub overrides: InstallOverrideArgs,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[arg(value_name = "NAME", required = true, help = "Script names or aliases")]
    pub names: Vec<String>,
    #[arg(long, help = "Delete the managed checkout once no other script uses it")]
    pub clean_repo: bool,
    #[arg(long, help = "Show what would be removed")]
    pub dry_run: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SourceTypeArg {
    Git,
    Local,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, value_name = "TEXT", help = "Only scripts whose source contains TEXT")]
    pub source: Option<String>,
    #[arg(long, value_enum, value_name = "TYPE", help = "Only git or local scripts")]
    pub source_type: Option<SourceTypeArg>,
    #[arg(long = "ref", value_name = "REF", help = "Only scripts tracking REF")]
    pub git_ref: Option<String>,
    #[arg(long, help = "Only pinned scripts", conflicts_with = "unpinned")]
    pub pinned: bool,
    #[arg(long, help = "Only scripts that follow a branch", conflicts_with = "pinned")]
    pub unpinned: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(value_name = "NAME", help = "Script name or alias")]
    pub name: String,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(short, long, value_name = "FILE", help = "Write the document to FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    #[arg(value_name = "FILE", help = "Export document to read")]
    pub file: PathBuf,
    #[arg(long, help = "Reinstall scripts that are already present")]
    pub force: bool,
    #[arg(long, help = "Show what would be installed")]
    pub dry_run: bool,
    #[command(flatten)]
    pub overrides: InstallOverrideArgs,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    #[arg(long, help = "Fix broken links, orphaned records, and a corrupt state file")]
    pub repair: bool,
}

#[derive(Args, Debug)]
pub struct BrowseArgs {
    #[arg(value_name = "SOURCE", help = "Git URL (optionally with #branch or @tag) or a local directory")]
    pub source: String,
    #[arg(long, help = "Show every .py file, including __init__.py, setup.py, and tests")]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct CompletionArgs {
    #[arg(value_enum, value_name = "SHELL")]
    pub shell: Shell,
}
