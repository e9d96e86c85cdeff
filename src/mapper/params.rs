//! Turns a `Command` into the SQL text and positional values a connection runs.

use crate::error::{PgMapError, Result};
use crate::types::{Command, CommandType, Parameters, SqlValue};

/// What the prepared statement will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Purpose {
    Query,
    Execute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuoted,
    /// `E'...'`, where a backslash escapes the next byte.
    EscapeQuoted,
    DoubleQuoted,
    DollarQuoted(String),
    LineComment,
    BlockComment(usize),
}

/// Produces `$n`-style SQL and its bound values for `command`.
pub(crate) fn prepare(command: &Command, purpose: Purpose) -> Result<(String, Vec<SqlValue>)> {
    match command.command_type {
        CommandType::Text => {
            let sql = replace_literals(&command.params, &command.sql)?;
            match &command.params {
                Parameters::None => Ok((sql, Vec::new())),
                Parameters::Positional(values) => Ok((sql, values.clone())),
                Parameters::Named(_) => bind_named(&sql, &command.params),
            }
        }
        CommandType::StoredProcedure => Ok(routine_call(command, purpose)),
        CommandType::TableDirect => {
            if !command.params.is_empty() {
                return Err(PgMapError::Unsupported(
                    "parameters on a table-direct command".to_string(),
                ));
            }
            Ok((format!("SELECT * FROM {}", command.sql.trim()), Vec::new()))
        }
    }
}

/// Replaces every `{=name}` token with the SQL literal of the named parameter.
pub(crate) fn replace_literals(params: &Parameters, sql: &str) -> Result<String> {
    if !sql.contains("{=") {
        return Ok(sql.to_string());
    }

    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(open) = rest.find("{=") {
        let after = &rest[open + 2..];
        let ident_len = ident_len(after.as_bytes(), 0);
        if ident_len == 0 || !after[ident_len..].starts_with('}') {
            out.push_str(&rest[..open + 2]);
            rest = after;
            continue;
        }
        let name = &after[..ident_len];
        let value = params
            .get(name)
            .ok_or_else(|| PgMapError::MissingParameter(name.to_string()))?;
        out.push_str(&rest[..open]);
        out.push_str(&value.to_sql_literal());
        rest = &after[ident_len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Rewrites `@name` / `:name` placeholders outside quotes and comments to `$n`.
/// Names are numbered by first use; parameters the SQL never mentions are not bound.
/// `:` inside `[...]` or directly after an identifier is an array slice, not a prefix.
fn bind_named(sql: &str, params: &Parameters) -> Result<(String, Vec<SqlValue>)> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut names: Vec<String> = Vec::new();
    let mut values = Vec::new();
    let mut state = State::Normal;
    let mut brackets = 0usize;
    let mut copied = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        let next = bytes.get(idx + 1).copied();
        match state {
            State::Normal => match b {
                b'\'' => {
                    state = if starts_escape_string(bytes, idx) {
                        State::EscapeQuoted
                    } else {
                        State::SingleQuoted
                    };
                }
                b'"' => state = State::DoubleQuoted,
                b'$' => {
                    if let Some((tag, close)) = dollar_quote_tag(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = close;
                    }
                }
                b'-' if next == Some(b'-') => {
                    state = State::LineComment;
                    idx += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'[' => brackets += 1,
                b']' => brackets = brackets.saturating_sub(1),
                // `::type` cast
                b':' if next == Some(b':') => idx += 1,
                b':' if brackets > 0 || follows_operand(bytes, idx) => {}
                b'@' | b':' => {
                    let len = ident_len(bytes, idx + 1);
                    if len > 0 {
                        let end = idx + 1 + len;
                        let name = &sql[idx + 1..end];
                        let position = match names.iter().position(|n| n.eq_ignore_ascii_case(name)) {
                            Some(p) => p + 1,
                            None => {
                                let value = params
                                    .get(name)
                                    .ok_or_else(|| PgMapError::MissingParameter(name.to_string()))?;
                                names.push(name.to_string());
                                values.push(value.clone());
                                names.len()
                            }
                        };
                        out.push_str(&sql[copied..idx]);
                        out.push('$');
                        out.push_str(&position.to_string());
                        copied = end;
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if next == Some(b'\'') {
                        idx += 1; // escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::EscapeQuoted => match b {
                b'\\' => idx += 1,
                b'\'' if next == Some(b'\'') => idx += 1,
                b'\'' => state = State::Normal,
                _ => {}
            },
            State::DoubleQuoted => {
                if b == b'"' {
                    state = State::Normal;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && closes_dollar_quote(bytes, idx, tag) {
                    idx += tag.len() + 1;
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if b == b'*' && next == Some(b'/') {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                } else if b == b'/' && next == Some(b'*') {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    out.push_str(&sql[copied..]);
    Ok((out, values))
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True when the quote at `quote` is preceded by a standalone `E` or `e`.
fn starts_escape_string(bytes: &[u8], quote: usize) -> bool {
    match quote.checked_sub(1).map(|i| (i, bytes[i])) {
        Some((i, b'E' | b'e')) => i == 0 || !is_ident_byte(bytes[i - 1]),
        _ => false,
    }
}

/// True when the byte before `idx` ends an identifier, number, `]` or `)`.
fn follows_operand(bytes: &[u8], idx: usize) -> bool {
    idx.checked_sub(1)
        .map(|i| bytes[i])
        .is_some_and(|b| is_ident_byte(b) || b == b']' || b == b')')
}

/// Parses an opening `$tag$` at `start`; returns the tag and the index of its closing `$`.
fn dollar_quote_tag(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    // `$1` is a positional parameter, and `a$b` is part of an identifier.
    if start > 0 && is_ident_byte(bytes[start - 1]) {
        return None;
    }
    if bytes.get(start + 1).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let len = bytes[start + 1..]
        .iter()
        .take_while(|b| is_ident_byte(**b))
        .count();
    let close = start + 1 + len;
    if bytes.get(close) != Some(&b'$') {
        return None;
    }
    let tag = std::str::from_utf8(&bytes[start + 1..close]).ok()?;
    Some((tag.to_string(), close))
}

fn closes_dollar_quote(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    bytes.get(idx + 1..end) == Some(tag.as_bytes()) && bytes.get(end) == Some(&b'$')
}

/// Builds `SELECT * FROM name(args)` or `CALL name(args)`.
fn routine_call(command: &Command, purpose: Purpose) -> (String, Vec<SqlValue>) {
    let (args, values): (Vec<String>, Vec<SqlValue>) = match &command.params {
        Parameters::None => (Vec::new(), Vec::new()),
        Parameters::Positional(values) => (
            (1..=values.len()).map(|i| format!("${i}")).collect(),
            values.clone(),
        ),
        Parameters::Named(named) => named
            .iter()
            .enumerate()
            .map(|(i, (name, value))| {
                let name = name.trim_start_matches(['@', ':']);
                (format!("{name} => ${}", i + 1), value.clone())
            })
            .unzip(),
    };

    let name = command.sql.trim();
    let args = args.join(", ");
    let sql = match purpose {
        Purpose::Query => format!("SELECT * FROM {name}({args})"),
        Purpose::Execute => format!("CALL {name}({args})"),
    };
    (sql, values)
}

/// Length of the identifier starting at `start`, or 0 if none starts there.
fn ident_len(bytes: &[u8], start: usize) -> usize {
    match bytes.get(start) {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return 0,
    }
    bytes[start..].iter().take_while(|b| is_ident_byte(**b)).count()
}
