#![deny(clippy::all)]

use clap::Parser;
use color_eyre::Result;
use uvh_core::GlobalOptions;

mod cli;
mod dispatch;
mod output;
mod style;

use cli::UvhCli;
use dispatch::dispatch_command;
use output::{emit_output, OutputOptions};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = UvhCli::parse();
    init_tracing(cli.trace, cli.debug, cli.verbose);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        debug: cli.debug,
        json: cli.json,
        config: cli
            .config
            .as_ref()
            .map(|path| path.to_string_lossy().to_string()),
    };

    let (info, outcome) = dispatch_command(&global, &cli.command);
    let opts = OutputOptions {
        quiet: cli.quiet,
        json: cli.json,
        no_color: cli.no_color,
    };
    let code = emit_output(&opts, info, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, debug: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else if debug {
        "debug"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("uvh={level},uvh_core={level},uvh_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
