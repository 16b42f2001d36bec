//! Splitting SQL scripts into statements.

use crate::flavor::Dialect;

/// Split a script into statements, each trimmed and terminated by `;`.
///
/// Semicolons inside quoted strings, quoted identifiers, dollar-quoted bodies
/// and comments do not end a statement. Comments are removed; fragments that
/// hold nothing but whitespace are dropped. Quotes are escaped only by
/// doubling them, as in standard SQL.
pub fn split_statements(script: &str) -> Vec<String> {
    split(script, false)
}

/// Split a script written for `dialect`.
///
/// MySQL also escapes characters inside quoted strings with a backslash.
pub fn split_statements_for(dialect: Dialect, script: &str) -> Vec<String> {
    split(script, dialect == Dialect::MySql)
}

fn split(script: &str, backslash_escapes: bool) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = script.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                current.push(c);
                // Doubled quote characters escape themselves.
                while let Some((_, q)) = chars.next() {
                    current.push(q);
                    if backslash_escapes && q == '\\' && c != '`' {
                        if let Some((_, escaped)) = chars.next() {
                            current.push(escaped);
                        }
                    } else if q == c {
                        if matches!(chars.peek(), Some((_, n)) if *n == c) {
                            if let Some((_, n)) = chars.next() {
                                current.push(n);
                            }
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                for (_, n) in chars.by_ref() {
                    if n == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                for (_, n) in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                current.push(' ');
            }
            '$' => match dollar_tag(&script[i..]) {
                Some(tag) => {
                    let body_start = i + tag.len();
                    let end = script[body_start..]
                        .find(tag)
                        .map(|pos| body_start + pos + tag.len())
                        .unwrap_or(script.len());
                    current.push_str(&script[i..end]);
                    while matches!(chars.peek(), Some((j, _)) if *j < end) {
                        chars.next();
                    }
                }
                None => current.push(c),
            },
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &current);

    statements
}

/// Whether a script contains no statements at all.
pub fn is_effectively_empty(script: &str) -> bool {
    split_statements(script).is_empty()
}

fn push_statement(statements: &mut Vec<String>, fragment: &str) {
    let trimmed = fragment.trim();
    if !trimmed.is_empty() {
        statements.push(format!("{};", trimmed));
    }
}

/// Recognize a PostgreSQL dollar-quote opener such as `$$` or `$body$`.
fn dollar_tag(s: &str) -> Option<&str> {
    let rest = s.get(1..)?;
    let close = rest.find('$')?;
    let tag = &rest[..close];
    let valid = tag
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    valid.then(|| &s[..close + 2])
}
