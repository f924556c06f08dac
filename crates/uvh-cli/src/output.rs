use atty::Stream;
use color_eyre::Result;
use serde_json::Value;
use uvh_core::{CommandGroup, CommandInfo, CommandStatus, ExecutionOutcome};

use crate::style::Style;

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
}

/// Prints the outcome and returns the process exit code.
pub fn emit_output(
    opts: &OutputOptions,
    info: CommandInfo,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = exit_code(outcome.status);
    let style = Style::new(opts.no_color, atty::is(Stream::Stdout));

    if is_passthrough(&outcome.details) {
        print!("{}", outcome.message);
        return Ok(code);
    }
    if opts.json {
        let payload = uvh_core::to_json_response(info, outcome, code);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }
    // A bare `uvh export` writes the document itself so it can be redirected.
    if info.group == CommandGroup::Export && outcome.status == CommandStatus::Ok {
        if let Some(document) = outcome.details.get("document") {
            println!("{}", serde_json::to_string_pretty(document)?);
            return Ok(code);
        }
    }
    if opts.quiet {
        return Ok(code);
    }

    let message = uvh_core::format_status_message(info, &outcome.message);
    println!("{}", style.status(outcome.status, &message));
    if let Some(table) = render_table(&style, info, &outcome.details) {
        println!("{table}");
    }
    for warning in warnings_from_details(&outcome.details) {
        println!("{}", style.warning(&format!("warning: {warning}")));
    }
    if let Some(hint) = hint_from_details(&outcome.details) {
        println!("{}", style.info(&format!("Hint: {hint}")));
    }
    Ok(code)
}

pub fn exit_code(status: CommandStatus) -> i32 {
    match status {
        CommandStatus::Ok => 0,
        CommandStatus::UserError => 1,
        CommandStatus::Failure => 2,
    }
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details.get("hint").and_then(Value::as_str)
}

fn is_passthrough(details: &Value) -> bool {
    details
        .get("passthrough")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Batch-level warnings followed by per-script ones.
fn warnings_from_details(details: &Value) -> Vec<String> {
    let mut warnings: Vec<String> = details
        .get("warnings")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(items) = details.get("scripts").and_then(Value::as_array) {
        for item in items {
            let name = text(item, "name");
            if let Some(list) = item.get("warnings").and_then(Value::as_array) {
                warnings.extend(
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(|warning| format!("{name}: {warning}")),
                );
            }
        }
    }
    warnings
}

fn render_table(style: &Style, info: CommandInfo, details: &Value) -> Option<String> {
    match info.group {
        CommandGroup::List => render_list(style, details),
        CommandGroup::Show => render_show(details),
        CommandGroup::Doctor => render_problems(style, details),
        CommandGroup::Browse => render_browse(details),
        CommandGroup::Install | CommandGroup::Update | CommandGroup::Remove | CommandGroup::Import => {
            render_items(style, details)
        }
        CommandGroup::Export | CommandGroup::Completion => None,
    }
}

fn render_list(style: &Style, details: &Value) -> Option<String> {
    let scripts = details.get("scripts")?.as_array()?;
    if scripts.is_empty() {
        return None;
    }
    let rows: Vec<Vec<String>> = scripts
        .iter()
        .map(|script| {
            let name = match script.get("alias").and_then(Value::as_str) {
                Some(alias) => format!("{} ({alias})", text(script, "name")),
                None => text(script, "name"),
            };
            vec![
                name,
                text(script, "source"),
                text(script, "ref"),
                text(script, "commit"),
                text(script, "local_changes"),
                text(script, "updated_at"),
            ]
        })
        .collect();
    Some(format_table(
        style,
        &["Script", "Source", "Ref", "Commit", "Changes", "Updated"],
        &rows,
        Some(4),
    ))
}

fn render_items(style: &Style, details: &Value) -> Option<String> {
    let items = details.get("scripts")?.as_array()?;
    if items.len() < 2 && !items.iter().any(|item| item.get("error").is_some()) {
        return None;
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|item| {
            let detail = ["error", "reason", "repo", "link"]
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            vec![
                text(item, "name"),
                text(item, "status"),
                text(item, "commit"),
                detail,
            ]
        })
        .collect();
    Some(format_table(
        style,
        &["Script", "Status", "Commit", "Detail"],
        &rows,
        Some(1),
    ))
}

fn render_problems(style: &Style, details: &Value) -> Option<String> {
    let problems = details.get("problems")?.as_array()?;
    if problems.is_empty() {
        return None;
    }
    let rows: Vec<Vec<String>> = problems
        .iter()
        .map(|problem| {
            let state = if problem.get("repaired").and_then(Value::as_bool) == Some(true) {
                "repaired"
            } else {
                "failed"
            };
            vec![
                text(problem, "kind"),
                text(problem, "script"),
                text(problem, "path"),
                state.to_string(),
            ]
        })
        .collect();
    Some(format_table(
        style,
        &["Problem", "Script", "Path", "State"],
        &rows,
        Some(3),
    ))
}

fn render_show(details: &Value) -> Option<String> {
    let fields = [
        ("alias", "Alias"),
        ("source_display", "Source"),
        ("resolved_commit", "Commit"),
        ("install_path", "Script"),
        ("symlink_path", "Link"),
        ("repo_path", "Checkout"),
        ("local_changes", "Changes"),
        ("local_changes_detail", "Detail"),
        ("installed_at", "Installed"),
        ("updated_at", "Updated"),
    ];
    let mut lines: Vec<String> = fields
        .iter()
        .filter_map(|(key, label)| {
            details
                .get(*key)
                .and_then(Value::as_str)
                .map(|value| format!("  {label:<10} {value}"))
        })
        .collect();
    if let Some(requirements) = details.get("requirements").and_then(Value::as_array) {
        for requirement in requirements.iter().filter_map(Value::as_str) {
            lines.push(format!("  {:<10} {requirement}", "Requires"));
        }
    }
    if details.get("link_ok").and_then(Value::as_bool) == Some(false) {
        lines.push("  link does not point at the script; run `uvh doctor --repair`".to_string());
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Scripts grouped under their directory, top-level files first.
fn render_browse(details: &Value) -> Option<String> {
    let scripts: Vec<&str> = details
        .get("scripts")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    if scripts.is_empty() {
        return None;
    }
    let mut lines = Vec::new();
    let mut current: Option<&str> = None;
    for script in scripts {
        let (dir, name) = script.rsplit_once('/').unwrap_or(("", script));
        if dir.is_empty() {
            lines.push(format!("  {name}"));
            continue;
        }
        if current != Some(dir) {
            lines.push(format!("  {dir}/"));
            current = Some(dir);
        }
        lines.push(format!("    {name}"));
    }
    Some(lines.join("\n"))
}

fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Left-aligned columns with a bold header and a dashed rule; `status_column`
/// is colored by item status after padding.
fn format_table(
    style: &Style,
    headers: &[&str],
    rows: &[Vec<String>],
    status_column: Option<usize>,
) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let join = |cells: Vec<String>| cells.join("  ").trim_end().to_string();
    let header_line = join(
        headers
            .iter()
            .zip(&widths)
            .map(|(header, &width)| format!("{header:<width$}"))
            .collect(),
    );
    let mut lines = vec![
        style.table_header(&header_line),
        join(widths.iter().map(|width| "-".repeat(*width)).collect()),
    ];
    for row in rows {
        let cells = row
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(index, (cell, &width))| {
                if status_column == Some(index) {
                    let pad = width.saturating_sub(cell.chars().count());
                    format!("{}{}", style.item_status(cell), " ".repeat(pad))
                } else {
                    format!("{cell:<width$}")
                }
            })
            .collect();
        lines.push(join(cells));
    }
    lines.join("\n")
}
