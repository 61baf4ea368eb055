//! Incremental JSON assessment and repair for argument fragments that
//! arrive split at arbitrary byte offsets.
//!
//! All heuristics live here so the stream state machine never has to
//! guess about text validity itself.

use serde_json::Value;

/// Tri-state verdict for a JSON fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonAssessment {
    /// The text parses as-is.
    Complete(Value),
    /// The text is a plausible prefix of a JSON document.
    Incomplete,
    /// The text can never become valid JSON by appending more bytes.
    Invalid,
}

pub fn assess(text: &str) -> JsonAssessment {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return JsonAssessment::Incomplete;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => JsonAssessment::Complete(value),
        Err(_) => match scan(trimmed) {
            Some(_) => JsonAssessment::Incomplete,
            None => JsonAssessment::Invalid,
        },
    }
}

/// Best-effort parse of a JSON prefix: closes open strings and
/// containers, then parses. Returns `None` when the prefix is not
/// structurally sound.
pub fn parse_prefix(text: &str) -> Option<Value> {
    let mut owned = text.trim_end().to_string();
    let mut state = scan(&owned)?;
    if state.escaped {
        // a trailing lone backslash cannot be completed; drop it
        owned.pop();
        state.escaped = false;
    }
    if !state.in_string {
        match owned.trim_end().chars().last() {
            Some(',') => {
                let end = owned.trim_end().len();
                owned.truncate(end - 1);
            }
            Some(':') => owned.push_str("null"),
            _ => {}
        }
    }
    if state.in_string {
        owned.push('"');
    }
    for closer in state.stack.iter().rev() {
        owned.push(*closer);
    }
    serde_json::from_str(&owned).ok()
}

/// Full repair pipeline for a tool-call argument buffer at forced close.
/// Returns the parsed object when any heuristic lands, `None` otherwise.
pub fn repair_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }
    if let Some(value) = parse_object(&format!("{trimmed}}}")) {
        return Some(value);
    }
    // key/value text missing its opening brace
    if trimmed.starts_with('"') {
        let wrapped = format!("{{{trimmed}");
        if let Some(value) = parse_object(&wrapped) {
            return Some(value);
        }
        if let Some(value) = parse_object(&format!("{wrapped}}}")) {
            return Some(value);
        }
    }
    let fixed = fix_terminator_escapes(trimmed);
    if fixed != trimmed {
        if let Some(value) = parse_object(&fixed) {
            return Some(value);
        }
        if let Some(value) = parse_object(&format!("{fixed}}}")) {
            return Some(value);
        }
    }
    if let Some(stripped) = strip_doubled_quote(&fixed) {
        if let Some(value) = parse_object(&stripped) {
            return Some(value);
        }
    }
    if let Some(value) = balanced_object(&fixed) {
        return Some(value);
    }
    parse_prefix(&fixed).filter(Value::is_object)
}

/// Rewrites `\"` into `"` when the escape sits directly before a value
/// terminator. Upstream edits occasionally re-escape the closing quote
/// of a string that was already closed.
pub fn fix_terminator_escapes(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'"') {
            let next = bytes.get(i + 2);
            if matches!(next, None | Some(b'}') | Some(b']') | Some(b',')) {
                out.push(b'"');
                i += 2;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| text.to_string())
}

/// Parses the first balanced `{...}` run in the text, ignoring anything
/// after it.
pub fn balanced_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return serde_json::from_str(&text[start..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}

fn strip_doubled_quote(text: &str) -> Option<String> {
    let prefix = text.strip_suffix("\"\"}")?;
    if prefix.ends_with('\\') {
        return None;
    }
    Some(format!("{prefix}\"}}"))
}

struct ScanState {
    stack: Vec<char>,
    in_string: bool,
    escaped: bool,
}

/// Walks the text tracking container nesting. Returns `None` on a hard
/// structural error (mismatched close), the final state otherwise.
fn scan(text: &str) -> Option<ScanState> {
    let mut state = ScanState {
        stack: Vec::new(),
        in_string: false,
        escaped: false,
    };
    for ch in text.chars() {
        if state.in_string {
            if state.escaped {
                state.escaped = false;
            } else if ch == '\\' {
                state.escaped = true;
            } else if ch == '"' {
                state.in_string = false;
            }
            continue;
        }
        match ch {
            '"' => state.in_string = true,
            '{' => state.stack.push('}'),
            '[' => state.stack.push(']'),
            '}' | ']' => {
                if state.stack.pop() != Some(ch) {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_object_is_recognized() {
        match assess(r#"{"url":"https://a.com"}"#) {
            JsonAssessment::Complete(value) => {
                assert_eq!(value, json!({"url": "https://a.com"}));
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn open_string_is_incomplete_not_invalid() {
        assert_eq!(assess(r#"{"url":"https://a."#), JsonAssessment::Incomplete);
    }

    #[test]
    fn mismatched_close_is_invalid() {
        assert_eq!(assess(r#"{"a":1]"#), JsonAssessment::Invalid);
    }

    #[test]
    fn prefix_parse_closes_open_structures() {
        let value = parse_prefix(r#"{"id":"call_1","name":"fetch","arguments":"{\"url\":\"https://a."#)
            .unwrap();
        assert_eq!(value["id"], "call_1");
        assert_eq!(value["arguments"], "{\"url\":\"https://a.");
    }

    #[test]
    fn prefix_parse_drops_dangling_comma_and_colon() {
        assert_eq!(parse_prefix(r#"{"a":1,"#).unwrap(), json!({"a": 1}));
        assert_eq!(parse_prefix(r#"{"a":"#).unwrap(), json!({"a": null}));
    }

    #[test]
    fn repairs_over_escaped_closing_quote() {
        let value = repair_object(r#"{"url":"https://bilibili.com\"}"#).unwrap();
        assert_eq!(value, json!({"url": "https://bilibili.com"}));
    }

    #[test]
    fn repairs_missing_opening_brace() {
        let value = repair_object(r#""url":"https://example.com"}"#).unwrap();
        assert_eq!(value, json!({"url": "https://example.com"}));
    }

    #[test]
    fn repairs_doubled_trailing_quote() {
        let value = repair_object(r#"{"query":"rust streams""}"#).unwrap();
        assert_eq!(value, json!({"query": "rust streams"}));
    }

    #[test]
    fn repairs_unterminated_object() {
        let value = repair_object(r#"{"url":"https://a.com""#).unwrap();
        assert_eq!(value, json!({"url": "https://a.com"}));
    }

    #[test]
    fn balanced_prefix_ignores_trailing_garbage() {
        let value = balanced_object(r#"{"url":"https://a.com"}"}}}</junk>"#).unwrap();
        assert_eq!(value, json!({"url": "https://a.com"}));
    }

    #[test]
    fn hopeless_text_yields_none() {
        assert!(repair_object("</glm_block>").is_none());
        assert!(repair_object("").is_none());
    }
}
