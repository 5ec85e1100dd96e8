//! Parameter marker resolution
//!
//! Generated SQL carries `@N` markers resolved against the final flattened
//! argument list. Source text may reference arguments by position (`@0`,
//! `@1`) or by name (`@id`); each occurrence is rebound to the next slot of
//! the output list, so fragments compose without index collisions. An
//! `Array` argument expands to one marker per element in place, and `@@`
//! escapes to a literal `@`.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::types::Value;

/// Matches an escaped marker or a marker token. The escape arm is first so
/// `@@` never half-matches as a named token.
static MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@@|@(\w+)").unwrap());

/// Resolve every marker in `sql` against `positional`/`named` arguments,
/// appending the bound values to `out` and returning the rewritten text.
pub fn process(
    sql: &str,
    positional: &[Value],
    named: &[(String, Value)],
    out: &mut Vec<Value>,
) -> Result<String> {
    let mut rewritten = String::with_capacity(sql.len());
    let mut last_end = 0;

    for found in MARKER_REGEX.find_iter(sql) {
        rewritten.push_str(&sql[last_end..found.start()]);
        last_end = found.end();

        let matched = found.as_str();
        if matched == "@@" {
            rewritten.push('@');
            continue;
        }

        let value = lookup(&matched[1..], positional, named, sql)?;
        match value {
            Value::Array(items) => {
                // Expand enumerable arguments to one marker per element.
                let mut first = true;
                for item in items {
                    if !first {
                        rewritten.push(',');
                    }
                    first = false;
                    rewritten.push('@');
                    rewritten.push_str(&out.len().to_string());
                    out.push(item);
                }
            }
            single => {
                rewritten.push('@');
                rewritten.push_str(&out.len().to_string());
                out.push(single);
            }
        }
    }

    rewritten.push_str(&sql[last_end..]);
    Ok(rewritten)
}

fn lookup(
    token: &str,
    positional: &[Value],
    named: &[(String, Value)],
    sql: &str,
) -> Result<Value> {
    if let Ok(index) = token.parse::<usize>() {
        return positional.get(index).cloned().ok_or_else(|| {
            Error::parameter(format!(
                "parameter '@{token}' specified but only {} supplied (in `{sql}`)",
                positional.len()
            ))
        });
    }

    named
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(token))
        .map(|(_, v)| v.clone())
        .ok_or_else(|| {
            Error::parameter(format!(
                "parameter '@{token}' specified but no argument carries that name (in `{sql}`)"
            ))
        })
}
