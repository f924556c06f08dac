//! Interpreter-free sanity check for Python source.
//!
//! Used when no Python interpreter is available to run `ast.parse`. It only catches
//! structural damage (binary content, unbalanced brackets, unterminated strings).

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxIssue {
    #[error("file is empty")]
    Empty,
    #[error("file contains NUL bytes")]
    Binary,
    #[error("line {line}: unexpected `{found}`")]
    UnexpectedClose { line: usize, found: char },
    #[error("line {line}: `{open}` is never closed")]
    Unclosed { line: usize, open: char },
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },
}

/// Runs the lexical check over `source`.
///
/// # Errors
/// Returns the first structural problem found.
pub fn check_python_source(source: &str) -> Result<(), SyntaxIssue> {
    if source.trim().is_empty() {
        return Err(SyntaxIssue::Empty);
    }
    if source.contains('\0') {
        return Err(SyntaxIssue::Binary);
    }

    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut idx = 0usize;
    while idx < chars.len() {
        let ch = chars[idx];
        match ch {
            '\n' => line += 1,
            '#' => {
                while idx < chars.len() && chars[idx] != '\n' {
                    idx += 1;
                }
                continue;
            }
            '\\' => {
                // explicit line continuation
                if chars.get(idx + 1) == Some(&'\n') {
                    line += 1;
                    idx += 2;
                    continue;
                }
            }
            '\'' | '"' => {
                idx = skip_string(&chars, idx, &mut line)?;
                continue;
            }
            '(' | '[' | '{' => stack.push((ch, line)),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Err(SyntaxIssue::UnexpectedClose { line, found: ch }),
                }
            }
            _ => {}
        }
        idx += 1;
    }
    match stack.pop() {
        Some((open, line)) => Err(SyntaxIssue::Unclosed { line, open }),
        None => Ok(()),
    }
}

/// Skips a string literal starting at `start`, returning the index after it.
fn skip_string(chars: &[char], start: usize, line: &mut usize) -> Result<usize, SyntaxIssue> {
    let quote = chars[start];
    let opened_on = *line;
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let raw = is_raw_prefix(chars, start);
    let mut idx = if triple { start + 3 } else { start + 1 };
    while idx < chars.len() {
        let ch = chars[idx];
        if ch == '\\' && !raw {
            if chars.get(idx + 1) == Some(&'\n') {
                *line += 1;
            }
            idx += 2;
            continue;
        }
        if ch == '\\' && raw {
            // `\"` does not close a raw string
            idx += if chars.get(idx + 1) == Some(&quote) { 2 } else { 1 };
            continue;
        }
        if ch == '\n' {
            if !triple {
                return Err(SyntaxIssue::UnterminatedString { line: opened_on });
            }
            *line += 1;
        }
        if ch == quote {
            if !triple {
                return Ok(idx + 1);
            }
            if chars.get(idx + 1) == Some(&quote) && chars.get(idx + 2) == Some(&quote) {
                return Ok(idx + 3);
            }
        }
        idx += 1;
    }
    Err(SyntaxIssue::UnterminatedString { line: opened_on })
}

fn is_raw_prefix(chars: &[char], quote_at: usize) -> bool {
    let mut idx = quote_at;
    while idx > 0 {
        let prev = chars[idx - 1];
        if !prev.is_ascii_alphabetic() {
            break;
        }
        if matches!(prev, 'r' | 'R') {
            return true;
        }
        idx -= 1;
    }
    false
}
