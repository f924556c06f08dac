use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::config::context::CommandInfo;
use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandGroup {
    Install,
    Update,
    Remove,
    List,
    Show,
    Export,
    Import,
    Doctor,
    Browse,
    Completion,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandGroup::Install => "install",
            CommandGroup::Update => "update",
            CommandGroup::Remove => "remove",
            CommandGroup::List => "list",
            CommandGroup::Show => "show",
            CommandGroup::Export => "export",
            CommandGroup::Import => "import",
            CommandGroup::Doctor => "doctor",
            CommandGroup::Browse => "browse",
            CommandGroup::Completion => "completion",
        };
        f.write_str(name)
    }
}

#[must_use]
pub fn to_json_response(info: CommandInfo, outcome: &ExecutionOutcome, _code: i32) -> Value {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    };
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": status,
        "message": format_status_message(info, &outcome.message),
        "details": details,
    })
}

/// Prefixes `message` with the command that produced it, e.g. `uvh install: ...`.
#[must_use]
pub fn format_status_message(info: CommandInfo, message: &str) -> String {
    let group_name = info.group.to_string();
    let prefix = if group_name == info.name {
        format!("uvh {}", info.name)
    } else {
        format!("uvh {} {}", group_name, info.name)
    };
    if message.is_empty() {
        prefix
    } else if message.starts_with(&prefix) {
        message.to_string()
    } else {
        format!("{prefix}: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_message_uses_single_prefix() {
        let info = CommandInfo::new(CommandGroup::Install, "install");
        assert_eq!(format_status_message(info, ""), "uvh install");
        assert_eq!(
            format_status_message(info, "installed 2 scripts"),
            "uvh install: installed 2 scripts"
        );
        assert_eq!(
            format_status_message(info, "uvh install: done"),
            "uvh install: done"
        );
    }

    #[test]
    fn json_response_wraps_scalar_details() {
        let info = CommandInfo::new(CommandGroup::List, "list");
        let outcome = ExecutionOutcome::success("0 scripts", json!(3));
        let response = to_json_response(info, &outcome, 0);
        assert_eq!(response["status"], "ok");
        assert_eq!(response["details"]["value"], 3);

        let failed = ExecutionOutcome::user_error("nope", Value::Null);
        let response = to_json_response(info, &failed, 1);
        assert_eq!(response["status"], "user-error");
        assert!(response["details"].as_object().unwrap().is_empty());
    }
}
