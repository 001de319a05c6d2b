//! Lenient JSON parsing for user-edited and streamed text.

use serde_json::Value as JsonValue;

const LITERALS: [&str; 3] = ["true", "false", "null"];

/// Parse `text` as JSON, completing it first if it was cut off.
///
/// Strict parsing is tried first. Otherwise open strings are closed,
/// unfinished literals completed, dangling commas and keys dropped and
/// open brackets closed. Returns `None` when nothing sensible remains.
pub fn try_parse_partial_json(text: &str) -> Option<JsonValue> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let mut candidate = trimmed.to_string();
    loop {
        let scan = Scan::of(&candidate);
        let completed = scan.complete(&candidate);
        if let Ok(value) = serde_json::from_str(&completed) {
            log::debug!("Completed partial JSON ({} bytes)", trimmed.len());
            return Some(value);
        }

        // Drop the last member or element and retry.
        let cut = match (scan.last_comma, scan.last_opener) {
            (Some(comma), Some(opener)) if comma > opener => comma,
            (_, Some(opener)) if opener + 1 < candidate.len() => opener + 1,
            (Some(comma), None) => comma,
            _ => return None,
        };
        candidate.truncate(cut);
    }
}

/// Structural state at the end of a (possibly truncated) JSON text
#[derive(Debug, Default)]
struct Scan {
    closers: Vec<char>,
    in_string: bool,
    escaped: bool,
    last_comma: Option<usize>,
    last_opener: Option<usize>,
}

impl Scan {
    fn of(text: &str) -> Self {
        let mut scan = Self::default();
        for (i, c) in text.char_indices() {
            if scan.in_string {
                match (scan.escaped, c) {
                    (true, _) => scan.escaped = false,
                    (false, '\\') => scan.escaped = true,
                    (false, '"') => scan.in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => scan.in_string = true,
                '{' => {
                    scan.closers.push('}');
                    scan.last_opener = Some(i);
                }
                '[' => {
                    scan.closers.push(']');
                    scan.last_opener = Some(i);
                }
                '}' | ']' => {
                    scan.closers.pop();
                }
                ',' => scan.last_comma = Some(i),
                _ => {}
            }
        }
        scan
    }

    fn complete(&self, text: &str) -> String {
        let mut out = text.to_string();
        if self.in_string {
            if self.escaped {
                out.pop();
            }
            out.push('"');
        } else {
            let trimmed_len = out.trim_end().len();
            out.truncate(trimmed_len);
            complete_scalar_tail(&mut out);
            let trimmed_len = out.trim_end().len();
            out.truncate(trimmed_len);
            if out.ends_with(',') {
                out.pop();
            }
        }
        out.extend(self.closers.iter().rev());
        out
    }
}

/// Finish a literal or number the text was cut off in.
fn complete_scalar_tail(out: &mut String) {
    let word_start = out
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map_or(0, |(i, c)| i + c.len_utf8());
    let word = &out[word_start..];
    if !word.is_empty() {
        if let Some(literal) = LITERALS.iter().find(|l| l.starts_with(word)) {
            let rest = &literal[word.len()..];
            out.push_str(rest);
            return;
        }
    }
    while out.ends_with(['-', '+', '.', 'e', 'E']) {
        let prev = out[..out.len() - 1].chars().last();
        if !prev.is_some_and(|c| c.is_ascii_digit() || "-+.eE".contains(c)) {
            break;
        }
        out.pop();
    }
    if out.ends_with('-') {
        out.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_parses_strictly() {
        assert_eq!(try_parse_partial_json(r#"{"a": [1, 2]}"#), Some(json!({"a": [1, 2]})));
        assert_eq!(try_parse_partial_json(" 42 "), Some(json!(42)));
    }

    #[test]
    fn test_empty_text_is_none() {
        assert_eq!(try_parse_partial_json(""), None);
        assert_eq!(try_parse_partial_json("   "), None);
    }

    #[test]
    fn test_open_string_and_brackets_are_closed() {
        assert_eq!(
            try_parse_partial_json(r#"{"name": "get_weat"#),
            Some(json!({"name": "get_weat"}))
        );
        assert_eq!(
            try_parse_partial_json(r#"{"a": {"b": [1, 2"#),
            Some(json!({"a": {"b": [1, 2]}}))
        );
    }

    #[test]
    fn test_dangling_comma_and_key_are_dropped() {
        assert_eq!(try_parse_partial_json(r#"[1, 2,"#), Some(json!([1, 2])));
        assert_eq!(
            try_parse_partial_json(r#"{"a": 1, "b":"#),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            try_parse_partial_json(r#"{"a": 1, "b""#),
            Some(json!({"a": 1}))
        );
    }

    #[test]
    fn test_literals_and_numbers_are_finished() {
        assert_eq!(try_parse_partial_json(r#"{"ok": tr"#), Some(json!({"ok": true})));
        assert_eq!(try_parse_partial_json(r#"[nu"#), Some(json!([null])));
        assert_eq!(try_parse_partial_json(r#"{"t": 0."#), Some(json!({"t": 0})));
        assert_eq!(try_parse_partial_json(r#"[1, -"#), Some(json!([1])));
    }

    #[test]
    fn test_escape_at_cut_is_dropped() {
        assert_eq!(
            try_parse_partial_json(r#"{"s": "a\"#),
            Some(json!({"s": "a"}))
        );
    }

    #[test]
    fn test_non_ascii_tail_outside_string() {
        assert_eq!(try_parse_partial_json("[1, é"), Some(json!([1])));
        assert_eq!(
            try_parse_partial_json(r#"{"type": "function", ü"#),
            Some(json!({"type": "function"}))
        );
        assert_eq!(try_parse_partial_json(r#"{"name": "café"#), Some(json!({"name": "café"})));
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(try_parse_partial_json("not json"), None);
    }
}
