//! Quote-aware statement parsing.
//!
//! A statement like
//!
//! ```text
//! entity save demo hero --merge=false {"name":"Aria"}
//! ```
//!
//! is tokenized with quote awareness (double- and single-quoted substrings
//! stay single tokens; `\"`, `\\`, `\'` escape), a trailing `{…}`/`[…]`
//! JSON fragment becomes the payload, and `--key=value`, `--flag`, and
//! bare `key=value` tokens become parameters. Registered parser handlers
//! then rewrite the context before dispatch.

use serde_json::{Map, Value, json};

use aavion_utils::error::AavionError;

/// Mutable parse state handed to parser handlers.
#[derive(Debug, Clone, Default)]
pub struct ParserContext {
    /// Action to dispatch; handlers typically extend the leading verb.
    pub action: String,
    /// Remaining positional tokens (flags already consumed).
    pub tokens: Vec<String>,
    /// Named parameters collected from flags and handlers.
    pub parameters: Map<String, Value>,
    /// Trailing JSON fragment, if any.
    pub payload: Option<Value>,
}

/// Tokenize a statement into (tokens, payload).
pub fn tokenize(statement: &str) -> Result<(Vec<String>, Option<Value>), AavionError> {
    let (head, payload) = split_payload(statement)?;
    let tokens = split_tokens(head)?;
    Ok((tokens, payload))
}

/// Split off a trailing JSON object/array fragment. The fragment is the
/// earliest `{` or `[` whose substring-to-end parses as JSON.
fn split_payload(statement: &str) -> Result<(&str, Option<Value>), AavionError> {
    let trimmed = statement.trim_end();
    if !(trimmed.ends_with('}') || trimmed.ends_with(']')) {
        return Ok((statement, None));
    }
    for (idx, ch) in trimmed.char_indices() {
        if ch == '{' || ch == '[' {
            let candidate = &trimmed[idx..];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Ok((&trimmed[..idx], Some(value)));
            }
        }
    }
    // Ends like JSON but never parses: surface it instead of treating the
    // fragment as tokens.
    Err(AavionError::InvalidJson {
        reason: "trailing payload fragment is not valid JSON".to_string(),
    })
}

fn split_tokens(input: &str) -> Result<Vec<String>, AavionError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;
    let mut started = false;

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == '\\' {
                    match chars.next() {
                        Some(escaped @ ('"' | '\'' | '\\')) => current.push(escaped),
                        Some(other) => {
                            current.push('\\');
                            current.push(other);
                        }
                        None => current.push('\\'),
                    }
                } else if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                    started = true;
                } else if ch.is_whitespace() {
                    if started || !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                        started = false;
                    }
                } else {
                    current.push(ch);
                    started = true;
                }
            }
        }
    }
    if quote.is_some() {
        return Err(AavionError::InvalidParameter {
            name: "statement".to_string(),
            reason: "unterminated quote".to_string(),
        });
    }
    if started || !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

impl ParserContext {
    /// Build the initial context from a raw statement: first token is the
    /// action, flag tokens become parameters, the rest stay positional.
    pub fn from_statement(statement: &str) -> Result<Self, AavionError> {
        let (raw_tokens, payload) = tokenize(statement)?;
        let mut ctx = Self {
            payload,
            ..Self::default()
        };
        let mut positional = Vec::new();
        for token in raw_tokens {
            if let Some(stripped) = token.strip_prefix("--") {
                match stripped.split_once('=') {
                    Some((key, value)) => {
                        ctx.parameters
                            .insert(key.to_string(), coerce_value(value));
                    }
                    None => {
                        ctx.parameters.insert(stripped.to_string(), json!(true));
                    }
                }
            } else if let Some((key, value)) = bareword_pair(&token) {
                ctx.parameters.insert(key.to_string(), coerce_value(value));
            } else {
                positional.push(token);
            }
        }
        if positional.is_empty() {
            return Err(AavionError::InvalidParameter {
                name: "statement".to_string(),
                reason: "empty statement".to_string(),
            });
        }
        ctx.action = positional.remove(0).to_lowercase();
        ctx.tokens = positional;
        Ok(ctx)
    }

    /// Pop the next positional token into the action (verb → "verb sub").
    pub fn consume_subaction(&mut self) -> Option<String> {
        if self.tokens.is_empty() {
            return None;
        }
        let sub = self.tokens.remove(0).to_lowercase();
        self.action = format!("{} {}", self.action, sub);
        Some(sub)
    }

    /// Map remaining positional tokens onto named parameters in order.
    /// Existing parameters win over positionals.
    pub fn bind_positional(&mut self, names: &[&str]) {
        for name in names {
            if self.tokens.is_empty() {
                break;
            }
            if self.parameters.contains_key(*name) {
                continue;
            }
            let value = self.tokens.remove(0);
            self.parameters.insert((*name).to_string(), json!(value));
        }
    }
}

/// `key=value` bareword, but not inside quoted tokens that contained `=`
/// legitimately. A key must look like an identifier.
fn bareword_pair(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once('=')?;
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return None;
    }
    Some((key, value))
}

/// Flags keep their textual form except for obvious bool/number literals.
fn coerce_value(raw: &str) -> Value {
    match raw {
        "true" => json!(true),
        "false" => json!(false),
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                json!(n)
            } else {
                json!(raw)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_words_and_quotes() {
        let (tokens, payload) =
            tokenize(r#"project create demo title="Demo World" 'single quoted'"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                "project",
                "create",
                "demo",
                "title=Demo World",
                "single quoted"
            ]
        );
        assert!(payload.is_none());
    }

    #[test]
    fn escape_sequences_inside_quotes() {
        let (tokens, _) = tokenize(r#"say "a \"quoted\" word" 'don\'t'"#).unwrap();
        assert_eq!(tokens, vec!["say", r#"a "quoted" word"#, "don't"]);
    }

    #[test]
    fn trailing_json_payload_extracted() {
        let ctx =
            ParserContext::from_statement(r#"entity save demo hero {"name":"Aria","role":"Pilot"}"#)
                .unwrap();
        assert_eq!(ctx.action, "entity");
        assert_eq!(ctx.tokens, vec!["save", "demo", "hero"]);
        assert_eq!(ctx.payload, Some(json!({"name":"Aria","role":"Pilot"})));
    }

    #[test]
    fn trailing_array_payload_extracted() {
        let ctx = ParserContext::from_statement(r#"demo run [1, 2, 3]"#).unwrap();
        assert_eq!(ctx.payload, Some(json!([1, 2, 3])));
    }

    #[test]
    fn malformed_trailing_json_is_an_error() {
        assert!(matches!(
            ParserContext::from_statement(r#"entity save demo hero {"name": }"#),
            Err(AavionError::InvalidJson { .. })
        ));
    }

    #[test]
    fn flags_and_barewords_become_parameters() {
        let ctx = ParserContext::from_statement(
            "entity save demo hero --merge=false --force keep=3 label=nightly",
        )
        .unwrap();
        assert_eq!(ctx.parameters["merge"], json!(false));
        assert_eq!(ctx.parameters["force"], json!(true));
        assert_eq!(ctx.parameters["keep"], json!(3));
        assert_eq!(ctx.parameters["label"], json!("nightly"));
        assert_eq!(ctx.tokens, vec!["save", "demo", "hero"]);
    }

    #[test]
    fn consume_subaction_extends_action() {
        let mut ctx = ParserContext::from_statement("entity save demo hero").unwrap();
        assert_eq!(ctx.consume_subaction().as_deref(), Some("save"));
        assert_eq!(ctx.action, "entity save");
        ctx.bind_positional(&["project", "entity"]);
        assert_eq!(ctx.parameters["project"], json!("demo"));
        assert_eq!(ctx.parameters["entity"], json!("hero"));
        assert!(ctx.tokens.is_empty());
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(tokenize(r#"project create "unfinished"#).is_err());
    }
}
