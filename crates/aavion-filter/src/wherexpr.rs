//! `where` expression parsing and evaluation for `[query …]` lookups.
//!
//! An expression is a list of ANDed conditions separated by `;`:
//!
//! ```text
//! status = "active"; payload.level >= 3; tags contains "ace"; name ~ "^A"
//! ```
//!
//! Operators: `=`, `!=`, `>`, `<`, `>=`, `<=`, `contains`, `!contains`,
//! `in (…)`, `not in (…)`, `~` (regex). Values may be quoted strings,
//! numbers, JSON arrays, or parenthesized comma lists.

use serde_json::Value;

use aavion_utils::error::AavionError;

use crate::{lookup_path, value_contains, value_to_text, values_equal};

/// One parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    NotContains,
    In,
    NotIn,
    Matches,
}

/// A parsed, reusable `where` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereExpr {
    pub conditions: Vec<Condition>,
}

impl WhereExpr {
    /// Parse the `;`-separated condition list. Empty input matches
    /// everything.
    pub fn parse(input: &str) -> Result<Self, AavionError> {
        let mut conditions = Vec::new();
        for part in split_conditions(input) {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            conditions.push(parse_condition(trimmed)?);
        }
        Ok(Self { conditions })
    }

    /// Evaluate against a record; fields are dot-paths into it.
    pub fn matches(&self, record: &Value) -> Result<bool, AavionError> {
        for condition in &self.conditions {
            if !condition.matches(record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Condition {
    fn matches(&self, record: &Value) -> Result<bool, AavionError> {
        let found = lookup_path(record, &self.field);
        Ok(match self.op {
            Op::Eq => found.is_some_and(|f| values_equal(f, &self.value)),
            Op::Ne => !found.is_some_and(|f| values_equal(f, &self.value)),
            Op::Gt | Op::Lt | Op::Ge | Op::Le => {
                let Some(found) = found else { return Ok(false) };
                let Some(ordering) = compare(found, &self.value) else {
                    return Ok(false);
                };
                match self.op {
                    Op::Gt => ordering.is_gt(),
                    Op::Lt => ordering.is_lt(),
                    Op::Ge => ordering.is_ge(),
                    Op::Le => ordering.is_le(),
                    _ => unreachable!(),
                }
            }
            Op::Contains => found.is_some_and(|f| value_contains(f, &self.value)),
            Op::NotContains => !found.is_some_and(|f| value_contains(f, &self.value)),
            Op::In => {
                let Some(found) = found else { return Ok(false) };
                self.value
                    .as_array()
                    .is_some_and(|items| items.iter().any(|i| values_equal(found, i)))
            }
            Op::NotIn => {
                let Some(found) = found else { return Ok(true) };
                !self
                    .value
                    .as_array()
                    .is_some_and(|items| items.iter().any(|i| values_equal(found, i)))
            }
            Op::Matches => {
                let pattern = self.value.as_str().ok_or_else(|| {
                    AavionError::InvalidParameter {
                        name: "where".to_string(),
                        reason: "regex operand must be a string".to_string(),
                    }
                })?;
                let re =
                    regex::Regex::new(pattern).map_err(|e| AavionError::InvalidParameter {
                        name: "where".to_string(),
                        reason: e.to_string(),
                    })?;
                found.is_some_and(|f| re.is_match(&value_to_text(f)))
            }
        })
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Split on `;`, respecting quotes and brackets.
fn split_conditions(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '(' | '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' | ']' => {
                    depth -= 1;
                    current.push(ch);
                }
                ';' if depth == 0 => parts.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_condition(input: &str) -> Result<Condition, AavionError> {
    let bad = |reason: &str| AavionError::InvalidParameter {
        name: "where".to_string(),
        reason: format!("{reason}: '{input}'"),
    };

    let (field, rest) = input
        .split_once(char::is_whitespace)
        .map(|(f, r)| (f, r.trim_start()))
        .or_else(|| {
            // Compact form like `level>=3`.
            let idx = input.find(|c| "=!<>~".contains(c))?;
            Some((&input[..idx], input[idx..].trim_start()))
        })
        .ok_or_else(|| bad("missing operator"))?;

    let (op, value_text) = if let Some(rest) = rest.strip_prefix("not in") {
        (Op::NotIn, rest)
    } else if let Some(rest) = rest.strip_prefix("!contains") {
        (Op::NotContains, rest)
    } else if let Some(rest) = rest.strip_prefix("contains") {
        (Op::Contains, rest)
    } else if let Some(rest) = rest.strip_prefix("in") {
        (Op::In, rest)
    } else if let Some(rest) = rest.strip_prefix(">=") {
        (Op::Ge, rest)
    } else if let Some(rest) = rest.strip_prefix("<=") {
        (Op::Le, rest)
    } else if let Some(rest) = rest.strip_prefix("!=") {
        (Op::Ne, rest)
    } else if let Some(rest) = rest.strip_prefix('~') {
        (Op::Matches, rest)
    } else if let Some(rest) = rest.strip_prefix('=') {
        (Op::Eq, rest)
    } else if let Some(rest) = rest.strip_prefix('>') {
        (Op::Gt, rest)
    } else if let Some(rest) = rest.strip_prefix('<') {
        (Op::Lt, rest)
    } else {
        return Err(bad("unknown operator"));
    };

    let value = parse_value(value_text.trim()).ok_or_else(|| bad("unparsable value"))?;
    if matches!(op, Op::In | Op::NotIn) && !value.is_array() {
        return Err(bad("membership operand must be a list"));
    }
    Ok(Condition {
        field: field.to_string(),
        op,
        value,
    })
}

fn parse_value(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    // Parenthesized comma list → array.
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        let items = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_value(s).unwrap_or_else(|| Value::String(s.to_string())))
            .collect();
        return Some(Value::Array(items));
    }
    // Quoted string.
    for q in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(q)
            .and_then(|t| t.strip_suffix(q))
        {
            return Some(Value::String(inner.to_string()));
        }
    }
    // JSON literal (number, array, bool, null).
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    Some(Value::String(text.to_string()))
}
