//! The save-side strip pass.
//!
//! Stored payloads must contain shortcodes only in their instruction form.
//! Stripping removes every `<resolved>[/kind]` tail (including nested
//! resolved content) so a save of previously resolved output hashes
//! identically to a save of the raw instruction form.

use serde_json::{Map, Value};

/// Strip resolved tails from every string leaf of a payload.
#[must_use]
pub fn strip_resolved(payload: &Value) -> Value {
    match payload {
        Value::String(s) => Value::String(strip_resolved_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(strip_resolved).collect()),
        Value::Object(map) => {
            let out: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), strip_resolved(v)))
                .collect();
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
    /// End of the opener's instruction (the `]` position + 1); 0 for closers.
    instr_end: usize,
    open: bool,
}

/// Strip resolved tails from one string.
///
/// Openers and closers are matched with a stack; for every top-level
/// matched pair the region between the instruction's `]` and the end of
/// the closer is removed. Unmatched openers (instruction-only form) stay
/// untouched; dangling closers are dropped.
#[must_use]
pub fn strip_resolved_text(text: &str) -> String {
    let tokens = scan_tokens(text);
    if tokens.is_empty() {
        return text.to_string();
    }

    // (instruction_end, region_end) per top-level resolved region, plus
    // dangling closers to drop.
    let mut regions: Vec<(usize, usize)> = Vec::new();
    let mut dangling: Vec<(usize, usize)> = Vec::new();
    let mut stack: Vec<Token> = Vec::new();
    for token in &tokens {
        if token.open {
            stack.push(*token);
        } else {
            match stack.pop() {
                Some(opener) => {
                    if stack.is_empty() {
                        regions.push((opener.instr_end, token.end));
                    }
                }
                None => dangling.push((token.start, token.end)),
            }
        }
    }

    let mut cuts: Vec<(usize, usize)> = regions;
    cuts.extend(dangling);
    cuts.sort_unstable();

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in cuts {
        if start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn scan_tokens(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut idx = 0;
    while idx < text.len() {
        let rest = &text[idx..];
        let candidates = [
            ("[ref ", true),
            ("[query ", true),
            ("[/ref]", false),
            ("[/query]", false),
        ];
        let mut best: Option<(usize, &str, bool)> = None;
        for (tag, open) in candidates {
            if let Some(pos) = rest.find(tag) {
                if best.is_none_or(|(b, _, _)| pos < b) {
                    best = Some((pos, tag, open));
                }
            }
        }
        let Some((rel, tag, open)) = best else { break };
        let start = idx + rel;
        if open {
            // The instruction runs to its matching bracket (array indices
            // nest); without one the fragment is plain text.
            match crate::shortcode::instruction_end(text, start) {
                Some(close) => {
                    let instr_end = close + 1;
                    tokens.push(Token {
                        start,
                        end: instr_end,
                        instr_end,
                        open: true,
                    });
                    idx = instr_end;
                }
                None => break,
            }
        } else {
            let end = start + tag.len();
            tokens.push(Token {
                start,
                end,
                instr_end: 0,
                open: false,
            });
            idx = end;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_single_resolved_ref() {
        assert_eq!(
            strip_resolved_text("Serves on [ref ship|name]Vanguard[/ref]."),
            "Serves on [ref ship|name]."
        );
    }

    #[test]
    fn strips_query_and_ref_mixed() {
        let input = "[query project=demo|select=entity]a\nb[/query] and [ref hero|name]Aria[/ref]";
        assert_eq!(
            strip_resolved_text(input),
            "[query project=demo|select=entity] and [ref hero|name]"
        );
    }

    #[test]
    fn strips_nested_resolved_content_whole() {
        let input = "[ref a|text][ref b|name]deep[/ref][/ref]";
        assert_eq!(strip_resolved_text(input), "[ref a|text]");
    }

    #[test]
    fn instruction_only_form_is_untouched() {
        let input = "keep [ref ship|name] as-is";
        assert_eq!(strip_resolved_text(input), input);
    }

    #[test]
    fn depth_exhausted_output_strips_clean() {
        // Depth exhaustion resolves the inner shortcode to empty, so the
        // emitted text stays balanced.
        let input = "[ref a|text][ref b|name][/ref][/ref]";
        assert_eq!(strip_resolved_text(input), "[ref a|text]");
    }

    #[test]
    fn resolved_region_with_pre_and_post_text() {
        let input = "[ref a|text] pre [ref b|name]inner[/ref] post [/ref]";
        assert_eq!(strip_resolved_text(input), "[ref a|text]");
    }

    #[test]
    fn dangling_closer_is_dropped() {
        assert_eq!(strip_resolved_text("orphan [/ref] tag"), "orphan  tag");
    }

    #[test]
    fn strip_walks_whole_payload() {
        let payload = json!({
            "bio": "[ref ship|name]Vanguard[/ref]",
            "notes": ["[query project=d|select=entity]x[/query]", 42],
            "nested": {"deep": "[ref a|b]c[/ref]"}
        });
        let stripped = strip_resolved(&payload);
        assert_eq!(
            stripped,
            json!({
                "bio": "[ref ship|name]",
                "notes": ["[query project=d|select=entity]", 42],
                "nested": {"deep": "[ref a|b]"}
            })
        );
    }

    #[test]
    fn idempotent_on_already_stripped() {
        let once = strip_resolved_text("x [ref a|b]resolved[/ref] y");
        assert_eq!(strip_resolved_text(&once), once);
    }
}
