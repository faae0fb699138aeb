//! Tolerant parsing for LLM-produced JSON.
//!
//! Every artifact parsed out of an LLM response goes through the same
//! ladder: strict parse → lightweight repair → first balanced JSON value
//! extracted by scan → caller-supplied typed fallback. On structurally
//! valid input the ladder returns exactly what a strict parse would.

use serde_json::Value;

/// Run the full ladder. Returns `None` only when no stage produced valid
/// JSON; the caller then applies its typed fallback.
pub fn parse_tolerant(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let repaired = repair(trimmed);
    if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
        return Some(value);
    }

    let extracted = extract_first_json(trimmed)?;
    if let Ok(value) = serde_json::from_str::<Value>(&extracted) {
        return Some(value);
    }
    serde_json::from_str::<Value>(&repair(&extracted)).ok()
}

/// Parse a JSON array of strings, tolerating the usual LLM damage.
pub fn parse_string_array(raw: &str) -> Option<Vec<String>> {
    let value = parse_tolerant(raw)?;
    match value {
        Value::Array(items) => {
            let strings: Vec<String> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    other => other.as_str().map(str::to_string),
                })
                .filter(|s| !s.trim().is_empty())
                .collect();
            if strings.is_empty() {
                None
            } else {
                Some(strings)
            }
        }
        _ => None,
    }
}

/// Lightweight structural repair: markdown fences, Python literals,
/// single-quoted strings, trailing commas. Deliberately conservative;
/// anything it cannot fix falls through to the extraction stage.
pub fn repair(raw: &str) -> String {
    let mut text = strip_code_fences(raw).to_string();

    // Python literals that models sometimes emit verbatim.
    text = replace_outside_strings(&text, "True", "true");
    text = replace_outside_strings(&text, "False", "false");
    text = replace_outside_strings(&text, "None", "null");

    text = normalize_quotes(&text);
    text = strip_trailing_commas(&text);
    text.trim().to_string()
}

/// Scan for the first balanced `{…}` or `[…]`, respecting string literals
/// and escapes, so prose around the JSON does not defeat the parse.
pub fn extract_first_json(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let start = raw.find(|c| c == '{' || c == '[')?;
    let open = bytes[start] as char;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + offset + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "javascript", …) on the fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end_matches('`').trim()
}

fn replace_outside_strings(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;

    'outer: while !rest.is_empty() {
        if !in_string && rest.starts_with(from) {
            // Only replace full words: the next char must not be alphanumeric.
            let boundary = rest[from.len()..]
                .chars()
                .next()
                .map(|c| !c.is_alphanumeric() && c != '_')
                .unwrap_or(true);
            let prev_ok = out
                .chars()
                .last()
                .map(|c| !c.is_alphanumeric() && c != '_')
                .unwrap_or(true);
            if boundary && prev_ok {
                out.push_str(to);
                rest = &rest[from.len()..];
                continue 'outer;
            }
        }
        let c = rest.chars().next().unwrap();
        if escaped {
            escaped = false;
        } else {
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                _ => {}
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Convert single-quoted strings to double-quoted, leaving apostrophes
/// inside double-quoted strings alone.
fn normalize_quotes(text: &str) -> String {
    if text.contains('"') {
        // Mixed quoting is ambiguous; trust the double quotes already there.
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '\'' => {
                in_string = !in_string;
                out.push('"');
            }
            '"' if in_string => {
                out.push_str("\\\"");
            }
            _ => out.push(c),
        }
    }
    out
}

fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' if in_string => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            ',' if !in_string => {
                let next_significant = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next_significant, Some('}') | Some(']')) {
                    continue; // drop the trailing comma
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_parses_identically() {
        let raw = r#"{"server": "researcher", "scores": [1, 2.5, null], "nested": {"a": "b,}"}}"#;
        let tolerant = parse_tolerant(raw).unwrap();
        let strict: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(tolerant, strict);
    }

    #[test]
    fn repairs_code_fences() {
        let raw = "```json\n[\"one\", \"two\", \"three\"]\n```";
        assert_eq!(
            parse_string_array(raw).unwrap(),
            vec!["one", "two", "three"]
        );
    }

    #[test]
    fn repairs_trailing_commas_and_python_literals() {
        let raw = r#"{"enabled": True, "missing": None, "items": [1, 2,],}"#;
        let value = parse_tolerant(raw).unwrap();
        assert_eq!(value, json!({"enabled": true, "missing": null, "items": [1, 2]}));
    }

    #[test]
    fn repairs_single_quotes() {
        let raw = "{'server': 'researcher'}";
        let value = parse_tolerant(raw).unwrap();
        assert_eq!(value["server"], "researcher");
    }

    #[test]
    fn extracts_object_from_prose() {
        let raw = "Sure! Here is the selection:\n{\"selected_tools\": [{\"index\": 0}]}\nLet me know.";
        let value = parse_tolerant(raw).unwrap();
        assert_eq!(value["selected_tools"][0]["index"], 0);
    }

    #[test]
    fn extraction_respects_braces_in_strings() {
        let raw = "noise {\"key\": \"a } b\", \"n\": 1} trailing";
        let extracted = extract_first_json(raw).unwrap();
        let value: Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn garbage_returns_none() {
        assert!(parse_tolerant("not-json").is_none());
        assert!(parse_string_array("not-json").is_none());
        assert!(parse_tolerant("").is_none());
    }
}
