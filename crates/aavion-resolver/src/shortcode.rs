//! Shortcode instruction parsing.
//!
//! `[ref TARGET|FIELD|option=value|…]` — TARGET is
//! `@project.entity[@version|#commit]` with path fragments separated by
//! `.` and array indices as `[N]`; a missing `@project.` prefix defaults
//! to the caller's project. Bare segments after the target extend the
//! field path; `key=value` segments are options.
//!
//! `[query option=value|…]` — pipe-separated options only.

use aavion_filter::WhereExpr;
use aavion_utils::error::AavionError;

/// Revision selector inside a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Version(u64),
    Commit(String),
}

/// Parsed `[ref …]` instruction.
#[derive(Debug, Clone)]
pub struct RefSpec {
    pub project: Option<String>,
    pub entity: String,
    pub selector: Option<Selector>,
    pub field_path: Vec<String>,
    pub format: String,
    pub separator: String,
    pub template: Option<String>,
}

/// Parsed `[query …]` instruction.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub projects: Vec<String>,
    pub where_expr: Option<WhereExpr>,
    pub select: String,
    pub sort: Option<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub format: String,
    pub separator: String,
    pub template: Option<String>,
    /// Original option body, used for cycle tuples.
    pub raw: String,
}

/// Either shortcode kind.
#[derive(Debug, Clone)]
pub enum Shortcode {
    Ref(RefSpec),
    Query(QuerySpec),
}

/// Find the closing bracket of an instruction starting at `start`
/// (which must point at its `[`), tracking nested `[N]` index brackets.
/// Returns the index of the matching `]`.
#[must_use]
pub fn instruction_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a full instruction including brackets, e.g. `[ref hero|name]`.
pub fn parse_shortcode(instruction: &str) -> Result<Shortcode, AavionError> {
    let inner = instruction
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| bad(instruction, "not bracketed"))?;

    if let Some(body) = inner.strip_prefix("ref ") {
        parse_ref(body.trim()).map(Shortcode::Ref)
    } else if let Some(body) = inner.strip_prefix("query ") {
        parse_query(body.trim()).map(Shortcode::Query)
    } else {
        Err(bad(instruction, "unknown shortcode kind"))
    }
}

fn parse_ref(body: &str) -> Result<RefSpec, AavionError> {
    let mut segments = split_pipes(body);
    if segments.is_empty() {
        return Err(bad(body, "missing target"));
    }
    let target = segments.remove(0);
    let (project, entity, selector, mut field_path) = parse_target(&target)?;

    let mut spec = RefSpec {
        project,
        entity,
        selector,
        field_path: Vec::new(),
        format: "json".to_string(),
        separator: "\n".to_string(),
        template: None,
    };

    for segment in segments {
        match segment.split_once('=') {
            Some(("format", v)) => spec.format = unquote(v),
            Some(("separator", v)) => spec.separator = unquote(v),
            Some(("template", v)) => spec.template = Some(unquote(v)),
            Some((other, _)) => {
                return Err(bad(body, &format!("unknown ref option '{other}'")));
            }
            // Bare |FIELD segments extend the dot-path.
            None => field_path.extend(split_fragments(&segment)),
        }
    }
    spec.field_path = field_path;
    Ok(spec)
}

fn parse_query(body: &str) -> Result<QuerySpec, AavionError> {
    let mut spec = QuerySpec {
        projects: Vec::new(),
        where_expr: None,
        select: "payload".to_string(),
        sort: None,
        limit: None,
        offset: None,
        format: "json".to_string(),
        separator: "\n".to_string(),
        template: None,
        raw: body.to_string(),
    };

    for segment in split_pipes(body) {
        let Some((key, value)) = segment.split_once('=') else {
            return Err(bad(body, &format!("query segment '{segment}' is not key=value")));
        };
        let value = unquote(value);
        match key {
            "project" => spec.projects = vec![value],
            "projects" => {
                spec.projects = value
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
            }
            "where" => spec.where_expr = Some(WhereExpr::parse(&value)?),
            "select" => spec.select = value,
            "sort" => {
                let mut parts = value.split_whitespace();
                let field = parts
                    .next()
                    .ok_or_else(|| bad(body, "empty sort"))?
                    .to_string();
                let descending = parts.next() == Some("desc");
                spec.sort = Some((field, descending));
            }
            "limit" => {
                spec.limit = Some(value.parse().map_err(|_| bad(body, "limit must be a number"))?);
            }
            "offset" => {
                spec.offset =
                    Some(value.parse().map_err(|_| bad(body, "offset must be a number"))?);
            }
            "format" => spec.format = value,
            "separator" => spec.separator = value,
            "template" => spec.template = Some(value),
            other => return Err(bad(body, &format!("unknown query option '{other}'"))),
        }
    }
    Ok(spec)
}

type Target = (Option<String>, String, Option<Selector>, Vec<String>);

/// `@project.entity@2.stats.agility` → project, entity, selector, path.
fn parse_target(target: &str) -> Result<Target, AavionError> {
    let (explicit_project, rest) = match target.strip_prefix('@') {
        Some(stripped) => {
            let (project, remainder) = stripped
                .split_once('.')
                .ok_or_else(|| bad(target, "expected '@project.entity'"))?;
            (Some(project.to_string()), remainder)
        }
        None => (None, target),
    };

    let mut fragments = split_fragments(rest).into_iter();
    let entity_fragment = fragments
        .next()
        .ok_or_else(|| bad(target, "missing entity"))?;
    let (entity, selector) = parse_entity_selector(&entity_fragment)?;
    let field_path: Vec<String> = fragments.collect();
    if entity.is_empty() {
        return Err(bad(target, "missing entity"));
    }
    Ok((explicit_project, entity, selector, field_path))
}

/// `hero@2` / `hero#hash` / `hero` → (entity, selector).
fn parse_entity_selector(fragment: &str) -> Result<(String, Option<Selector>), AavionError> {
    if let Some((entity, version)) = fragment.split_once('@') {
        let number = version
            .parse()
            .map_err(|_| bad(fragment, "version selector must be numeric"))?;
        return Ok((entity.to_string(), Some(Selector::Version(number))));
    }
    if let Some((entity, commit)) = fragment.split_once('#') {
        return Ok((entity.to_string(), Some(Selector::Commit(commit.to_string()))));
    }
    Ok((fragment.to_string(), None))
}

/// Split a dot-path, expanding `[N]` indices into their own segments:
/// `crew[0].name` → `["crew", "0", "name"]`.
fn split_fragments(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        let mut rest = part;
        while let Some(open) = rest.find('[') {
            if open > 0 {
                out.push(rest[..open].to_string());
            }
            let Some(close) = rest.find(']') else {
                out.push(rest[open..].to_string());
                rest = "";
                break;
            };
            out.push(rest[open + 1..close].to_string());
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            out.push(rest.to_string());
        }
    }
    out
}

/// Split on `|`, respecting double/single quotes.
fn split_pipes(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in body.chars() {
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
                '|' => parts.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            },
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    for q in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner.to_string();
        }
    }
    value.to_string()
}

fn bad(input: &str, reason: &str) -> AavionError {
    AavionError::InvalidReference {
        reference: input.to_string(),
        reason: reason.to_string(),
    }
}
