//! Text commands typed on the host's stdin, turned into inlet messages.
//!
//! ```text
//! bang            float 3.5        symbol hello
//! list 1 two 3    42               set 1 2
//! @1 bang         # comment
//! ```
//!
//! A leading `@<n>` selects inlet `n` (default 0). A leading number is a float,
//! or a list when more atoms follow.

use pdnode::{Atom, HostRequest};

use crate::error::{HostError, Result};

/// Parse one line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<HostRequest>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = line.split_whitespace().peekable();
    let mut inlet = 0;
    if let Some(prefix) = tokens.peek().and_then(|t| t.strip_prefix('@')) {
        inlet = prefix
            .parse()
            .map_err(|_| HostError::InvalidCommand(format!("bad inlet `@{prefix}`")))?;
        tokens.next();
    }

    let Some(head) = tokens.next() else {
        return Err(HostError::InvalidCommand(
            "missing selector after inlet".to_string(),
        ));
    };
    let rest: Vec<&str> = tokens.collect();

    let (selector, args) = match head {
        "bang" => ("bang", Vec::new()),
        "float" => match rest.as_slice() {
            [value] => match number(value) {
                Some(f) => ("float", vec![Atom::Float(f)]),
                None => {
                    return Err(HostError::InvalidCommand(format!(
                        "float expects a number, got `{value}`"
                    )));
                }
            },
            _ => {
                return Err(HostError::InvalidCommand(
                    "float expects exactly one argument".to_string(),
                ));
            }
        },
        "symbol" => match rest.as_slice() {
            [value] => ("symbol", vec![Atom::from(*value)]),
            _ => {
                return Err(HostError::InvalidCommand(
                    "symbol expects exactly one argument".to_string(),
                ));
            }
        },
        "list" => ("list", atoms(&rest)),
        head => match number(head) {
            Some(f) if rest.is_empty() => ("float", vec![Atom::Float(f)]),
            Some(_) => {
                let mut all = vec![head];
                all.extend(&rest);
                ("list", atoms(&all))
            }
            None => (head, atoms(&rest)),
        },
    };

    Ok(Some(HostRequest::message(inlet, selector, args)))
}

/// Finite numbers only; `inf`/`nan` stay symbols.
fn number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn atoms(tokens: &[&str]) -> Vec<Atom> {
    tokens
        .iter()
        .map(|t| match number(t) {
            Some(f) => Atom::Float(f),
            None => Atom::from(*t),
        })
        .collect()
}
