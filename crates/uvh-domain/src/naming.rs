//! Name normalization shared by requirements, repository keys, and links.

/// Canonicalizes a Python distribution name per PEP 503 (`Foo_Bar.baz` -> `foo-bar-baz`).
#[must_use]
pub fn normalize_package_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.push(ch.to_ascii_lowercase());
    }
    out
}

/// Lowercases, sorts, and dedups an extras list.
#[must_use]
pub fn canonical_extras<I, S>(extras: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut values: Vec<String> = extras
        .into_iter()
        .map(|extra| normalize_package_name(extra.as_ref()))
        .filter(|extra| !extra.is_empty())
        .collect();
    values.sort();
    values.dedup();
    values
}

/// Reduces arbitrary text to a filesystem-safe directory key.
#[must_use]
pub fn sanitize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "source".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Checks that a symlink name cannot escape the install directory.
///
/// # Errors
/// Returns a human readable reason when the name is unusable.
pub fn validate_link_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name is empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("`{name}` is not a valid file name"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(format!("`{name}` must not contain path separators"));
    }
    if name.contains('\0') {
        return Err("name contains a NUL byte".to_string());
    }
    Ok(())
}

/// Extracts the leading requirement name from loosely formatted text, canonicalized.
#[must_use]
pub fn dependency_name(spec: &str) -> String {
    let trimmed = strip_wrapping_quotes(spec.trim());
    let mut end = trimmed.len();
    for (idx, ch) in trimmed.char_indices() {
        if ch.is_whitespace() || matches!(ch, '<' | '>' | '=' | '!' | '~' | ';' | '@') {
            end = idx;
            break;
        }
    }
    let head = &trimmed[..end];
    let base = head.split_once('[').map_or(head, |(name, _)| name);
    normalize_package_name(base)
}

fn strip_wrapping_quotes(input: &str) -> &str {
    if input.len() >= 2 {
        let bytes = input.as_bytes();
        let first = bytes[0];
        let last = bytes[input.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &input[1..input.len() - 1];
        }
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_case() {
        assert_eq!(normalize_package_name("Foo_Bar.baz"), "foo-bar-baz");
        assert_eq!(normalize_package_name("requests"), "requests");
        assert_eq!(normalize_package_name("a--b__c"), "a-b-c");
    }

    #[test]
    fn extras_are_sorted_and_deduped() {
        assert_eq!(
            canonical_extras(["Socks", "security", "socks"]),
            vec!["security".to_string(), "socks".to_string()]
        );
    }

    #[test]
    fn dependency_name_cuts_at_operators_and_extras() {
        assert_eq!(dependency_name("Requests[socks]>=2.0"), "requests");
        assert_eq!(dependency_name("'click ==8.1'"), "click");
        assert_eq!(dependency_name("rich; python_version > '3.8'"), "rich");
        assert_eq!(dependency_name("pkg @ https://example.com/pkg.whl"), "pkg");
    }

    #[test]
    fn sanitize_key_collapses_noise() {
        assert_eq!(sanitize_key("owner/repo name"), "owner-repo-name");
        assert_eq!(sanitize_key("v1.2.0"), "v1.2.0");
        assert_eq!(sanitize_key("///"), "source");
    }

    #[test]
    fn link_names_reject_traversal() {
        assert!(validate_link_name("tool").is_ok());
        assert!(validate_link_name("..").is_err());
        assert!(validate_link_name("a/b").is_err());
        assert!(validate_link_name("  ").is_err());
    }
}
