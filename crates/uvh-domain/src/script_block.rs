//! Inline script metadata (`# /// script` blocks) and shebang rewriting.

use toml_edit::{value, Array, DocumentMut, InlineTable, Item, Table};

use crate::dependency::Dependency;

pub const BLOCK_START: &str = "# /// script";
pub const BLOCK_END: &str = "# ///";
pub const SHEBANG_EXACT: &str = "#!/usr/bin/env -S uv run --exact --script";
pub const SHEBANG: &str = "#!/usr/bin/env -S uv run --script";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptBlockError {
    #[error("script metadata block starting on line {0} is never closed")]
    Unterminated(usize),
    #[error("script metadata block is not valid TOML: {0}")]
    InvalidToml(String),
}

/// Location and TOML payload of an existing metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBlock {
    /// Zero-based index of the `# /// script` line.
    pub start: usize,
    /// Zero-based index of the closing `# ///` line.
    pub end: usize,
    pub toml: String,
}

/// Finds the first `script` metadata block.
///
/// # Errors
/// Returns [`ScriptBlockError::Unterminated`] when the opening marker has no closing marker.
pub fn find_block(content: &str) -> Result<Option<ScriptBlock>, ScriptBlockError> {
    let lines: Vec<&str> = content.lines().collect();
    let Some(start) = lines.iter().position(|line| line.trim_end() == BLOCK_START) else {
        return Ok(None);
    };
    let mut toml = String::new();
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        let line = line.trim_end();
        if line == BLOCK_END {
            return Ok(Some(ScriptBlock {
                start,
                end: start + 1 + offset,
                toml,
            }));
        }
        let body = if let Some(rest) = line.strip_prefix("# ") {
            rest
        } else if line == "#" {
            ""
        } else {
            return Err(ScriptBlockError::Unterminated(start + 1));
        };
        toml.push_str(body);
        toml.push('\n');
    }
    Err(ScriptBlockError::Unterminated(start + 1))
}

/// Builds the TOML for a metadata block, preserving unrelated keys from `existing`.
///
/// # Errors
/// Returns [`ScriptBlockError::InvalidToml`] when `existing` cannot be parsed.
pub fn render_block_toml(existing: Option<&str>, deps: &[Dependency]) -> Result<String, ScriptBlockError> {
    let mut doc = match existing {
        Some(text) => text
            .parse::<DocumentMut>()
            .map_err(|err| ScriptBlockError::InvalidToml(err.to_string()))?,
        None => DocumentMut::new(),
    };

    let mut array = Array::new();
    for dep in deps {
        array.push(dep.script_requirement());
    }
    if !array.is_empty() {
        for item in array.iter_mut() {
            item.decor_mut().set_prefix("\n    ");
        }
        array.set_trailing("\n");
        array.set_trailing_comma(true);
    }
    doc["dependencies"] = value(array);

    let sourced: Vec<&Dependency> = deps.iter().filter(|dep| dep.is_path()).collect();
    sync_uv_sources(&mut doc, &sourced);
    Ok(doc.to_string())
}

fn sync_uv_sources(doc: &mut DocumentMut, sourced: &[&Dependency]) {
    let names: Vec<&str> = sourced.iter().map(|dep| dep.name.as_str()).collect();
    let has_sources = doc
        .get("tool")
        .and_then(|tool| tool.get("uv"))
        .and_then(|uv| uv.get("sources"))
        .is_some();
    if sourced.is_empty() && !has_sources {
        return;
    }

    let tool = doc
        .entry("tool")
        .or_insert_with(implicit_table)
        .as_table_mut();
    let Some(tool) = tool else { return };
    let uv = tool
        .entry("uv")
        .or_insert_with(implicit_table)
        .as_table_mut();
    let Some(uv) = uv else { return };
    let sources = uv
        .entry("sources")
        .or_insert_with(|| Item::Table(Table::new()))
        .as_table_mut();
    let Some(sources) = sources else { return };

    let stale: Vec<String> = sources
        .iter()
        .filter(|(key, entry)| is_path_source(entry) && !names.contains(key))
        .map(|(key, _)| key.to_string())
        .collect();
    for key in stale {
        sources.remove(&key);
    }

    for dep in sourced {
        let Some(path) = dep.source_url_or_path.as_deref() else {
            continue;
        };
        let mut entry = InlineTable::new();
        entry.insert("path", path.into());
        if dep.editable {
            entry.insert("editable", true.into());
        }
        sources.insert(&dep.name, value(entry));
    }

    if sources.is_empty() {
        uv.remove("sources");
    }
}

fn implicit_table() -> Item {
    let mut table = Table::new();
    table.set_implicit(true);
    Item::Table(table)
}

fn is_path_source(entry: &Item) -> bool {
    entry.get("path").is_some()
}

fn comment_block(toml: &str) -> Vec<String> {
    let mut lines = vec![BLOCK_START.to_string()];
    for line in toml.trim_end().lines() {
        if line.is_empty() {
            lines.push("#".to_string());
        } else {
            lines.push(format!("# {line}"));
        }
    }
    lines.push(BLOCK_END.to_string());
    lines
}

/// Writes `deps` into the script's metadata block, replacing any existing block.
///
/// # Errors
/// Returns an error when an existing block is unterminated or not valid TOML.
pub fn embed_dependencies(content: &str, deps: &[Dependency]) -> Result<String, ScriptBlockError> {
    let existing = find_block(content)?;
    let toml = render_block_toml(existing.as_ref().map(|block| block.toml.as_str()), deps)?;
    let block_lines = comment_block(&toml);

    let mut lines: Vec<String> = content.lines().map(ToString::to_string).collect();
    match existing {
        Some(block) => {
            lines.splice(block.start..=block.end, block_lines);
        }
        None => {
            let at = usize::from(lines.first().is_some_and(|line| line.starts_with("#!")));
            let mut insert = block_lines;
            insert.push(String::new());
            lines.splice(at..at, insert);
        }
    }
    Ok(join_lines(&lines, content))
}

#[must_use]
pub fn shebang(exact: bool) -> &'static str {
    if exact {
        SHEBANG_EXACT
    } else {
        SHEBANG
    }
}

/// Replaces an existing `#!` line or inserts one at the top.
#[must_use]
pub fn rewrite_shebang(content: &str, exact: bool) -> String {
    let mut lines: Vec<String> = content.lines().map(ToString::to_string).collect();
    let line = shebang(exact).to_string();
    match lines.first_mut() {
        Some(first) if first.starts_with("#!") => *first = line,
        _ => lines.insert(0, line),
    }
    join_lines(&lines, content)
}

/// Produces the final script text: dependencies embedded and shebang rewritten.
///
/// # Errors
/// See [`embed_dependencies`].
pub fn materialize_text(content: &str, deps: &[Dependency], exact: bool) -> Result<String, ScriptBlockError> {
    let with_shebang = rewrite_shebang(content, exact);
    embed_dependencies(&with_shebang, deps)
}

fn join_lines(lines: &[String], original: &str) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') || original.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn deps(items: &[&str]) -> Vec<Dependency> {
        items
            .iter()
            .map(|item| Dependency::parse(item, Path::new("/src")).unwrap())
            .collect()
    }

    #[test]
    fn inserts_block_after_shebang() {
        let script = "#!/usr/bin/env python3\nprint('hi')\n";
        let out = materialize_text(script, &deps(&["requests>=2"]), true).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], SHEBANG_EXACT);
        assert_eq!(lines[1], BLOCK_START);
        assert!(out.contains("#     \"requests>=2\","));
        assert!(out.ends_with("print('hi')\n"));
    }

    #[test]
    fn replaces_existing_block_instead_of_appending() {
        let script = "\
#!/usr/bin/env -S uv run --script
# /// script
# requires-python = \">=3.11\"
# dependencies = [\"old-dep\"]
# ///
import sys
";
        let once = materialize_text(script, &deps(&["httpx"]), false).unwrap();
        let twice = materialize_text(&once, &deps(&["httpx"]), false).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.matches(BLOCK_START).count(), 1);
        assert!(once.contains("requires-python = \">=3.11\""));
        assert!(!once.contains("old-dep"));
        assert!(once.starts_with(SHEBANG));
    }

    #[test]
    fn path_dependencies_land_in_uv_sources() {
        let mut list = deps(&["rich"]);
        list.push(Dependency::local_package("toolkit", Path::new("/repos/local-toolkit")));
        let out = embed_dependencies("print(1)\n", &list).unwrap();
        let block = find_block(&out).unwrap().unwrap();
        let doc: DocumentMut = block.toml.parse().unwrap();
        assert_eq!(
            doc["tool"]["uv"]["sources"]["toolkit"]["path"].as_str(),
            Some("/repos/local-toolkit")
        );
        let names: Vec<_> = doc["dependencies"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(names, ["rich", "toolkit"]);
    }

    #[test]
    fn stale_path_sources_are_removed() {
        let script = "\
# /// script
# dependencies = [\"gone\"]
#
# [tool.uv.sources]
# gone = { path = \"/old\" }
# ///
";
        let out = embed_dependencies(script, &deps(&["rich"])).unwrap();
        assert!(!out.contains("/old"));
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let script = "# /// script\n# dependencies = []\nprint(1)\n";
        assert_eq!(
            embed_dependencies(script, &[]),
            Err(ScriptBlockError::Unterminated(1))
        );
    }

    #[test]
    fn shebang_inserted_when_missing() {
        assert_eq!(rewrite_shebang("print(1)\n", false), format!("{SHEBANG}\nprint(1)\n"));
        assert_eq!(
            rewrite_shebang("#!/usr/bin/python\nprint(1)", true),
            format!("{SHEBANG_EXACT}\nprint(1)")
        );
    }
}
