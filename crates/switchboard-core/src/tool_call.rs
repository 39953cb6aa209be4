//! Parser for inline tool calls of the form `@tool.name({"json": "args"})`
//!
//! Agents request tools by writing the call directly into their reply text.
//! Every place that extracts tool calls goes through [`parse_tool_calls`].

use serde_json::Value;
use tracing::warn;

use crate::types::ToolCall;

/// One `@name(...)` occurrence found in a reply
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedToolCall {
    /// Well-formed call; `raw` is the exact source text, used as the placeholder
    Call {
        name: String,
        arguments: Value,
        raw: String,
    },
    /// Looked like a call but the arguments were not a JSON value
    Malformed { raw: String, reason: String },
}

/// A successfully parsed call paired with the text it replaces
#[derive(Debug, Clone)]
pub struct ExtractedCall {
    pub call: ToolCall,
    pub placeholder: String,
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-'
}

/// Index of the `)` closing the `(` at `open`, skipping over JSON strings
fn find_closing_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Scan text for every `@name(args)` occurrence, in order of appearance.
///
/// `@name` not followed by `(` is a plain mention and is ignored, as is an
/// `@` glued to a preceding word (e-mail addresses). Empty parentheses parse
/// as an empty argument object.
pub fn parse_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'@' || (i > 0 && is_name_char(bytes[i - 1])) {
            i += 1;
            continue;
        }

        let name_start = i + 1;
        if name_start >= bytes.len() || !is_name_start(bytes[name_start]) {
            i += 1;
            continue;
        }
        let mut name_end = name_start;
        while name_end < bytes.len() && is_name_char(bytes[name_end]) {
            name_end += 1;
        }
        // trailing dots belong to the sentence, not the name
        while name_end > name_start && bytes[name_end - 1] == b'.' {
            name_end -= 1;
        }

        if name_end >= bytes.len() || bytes[name_end] != b'(' {
            i = name_end.max(i + 1);
            continue;
        }

        let name = &text[name_start..name_end];
        let Some(close) = find_closing_paren(bytes, name_end) else {
            let raw = text[i..].lines().next().unwrap_or_default().to_string();
            found.push(ParsedToolCall::Malformed {
                raw,
                reason: format!("unterminated argument list for '{}'", name),
            });
            break;
        };

        let raw = text[i..=close].to_string();
        let args_text = text[name_end + 1..close].trim();
        if args_text.is_empty() {
            found.push(ParsedToolCall::Call {
                name: name.to_string(),
                arguments: Value::Object(serde_json::Map::new()),
                raw,
            });
        } else {
            match serde_json::from_str::<Value>(args_text) {
                Ok(arguments) => found.push(ParsedToolCall::Call {
                    name: name.to_string(),
                    arguments,
                    raw,
                }),
                Err(e) => found.push(ParsedToolCall::Malformed {
                    raw,
                    reason: e.to_string(),
                }),
            }
        }
        i = close + 1;
    }

    found
}

/// Well-formed calls only; malformed occurrences are logged and dropped
pub fn extract_tool_calls(text: &str) -> Vec<ExtractedCall> {
    parse_tool_calls(text)
        .into_iter()
        .filter_map(|parsed| match parsed {
            ParsedToolCall::Call {
                name,
                arguments,
                raw,
            } => Some(ExtractedCall {
                call: ToolCall::new(name, arguments),
                placeholder: raw,
            }),
            ParsedToolCall::Malformed { raw, reason } => {
                warn!("Dropping malformed tool call '{}': {}", raw, reason);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(text: &str) -> Vec<String> {
        extract_tool_calls(text)
            .into_iter()
            .map(|c| c.call.name)
            .collect()
    }

    #[test]
    fn test_single_call() {
        let parsed = parse_tool_calls(r#"Let me check. @math.calculate({"expression": "2+2"}) done"#);
        assert_eq!(parsed.len(), 1);
        match &parsed[0] {
            ParsedToolCall::Call {
                name,
                arguments,
                raw,
            } => {
                assert_eq!(name, "math.calculate");
                assert_eq!(arguments["expression"], "2+2");
                assert_eq!(raw, r#"@math.calculate({"expression": "2+2"})"#);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parentheses_inside_json_strings() {
        let parsed = parse_tool_calls(r#"@math.calculate({"expression": "(1 + 2) * 3)"})"#);
        match &parsed[0] {
            ParsedToolCall::Call { arguments, .. } => {
                assert_eq!(arguments["expression"], "(1 + 2) * 3)");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_calls_in_order() {
        let text = r#"@rag.search({"query": "rust"}) and then @fs.read_file({"path": "/tmp/a"})"#;
        assert_eq!(names(text), vec!["rag.search", "fs.read_file"]);
    }

    #[test]
    fn test_empty_arguments() {
        let parsed = parse_tool_calls("@clock.now()");
        assert!(matches!(
            &parsed[0],
            ParsedToolCall::Call { arguments, .. } if arguments.as_object().map(|o| o.is_empty()).unwrap_or(false)
        ));
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let parsed = parse_tool_calls("@math.calculate({expression: 2+2})");
        assert!(matches!(&parsed[0], ParsedToolCall::Malformed { raw, .. } if raw == "@math.calculate({expression: 2+2})"));
        assert!(extract_tool_calls("@math.calculate({expression: 2+2})").is_empty());
    }

    #[test]
    fn test_unterminated_call() {
        let parsed = parse_tool_calls("@math.calculate({\"expression\": \"1\"}\nnext line");
        assert_eq!(parsed.len(), 1);
        assert!(matches!(&parsed[0], ParsedToolCall::Malformed { raw, .. } if !raw.contains("next line")));
    }

    #[test]
    fn test_mentions_and_emails_ignored() {
        assert!(parse_tool_calls("Ask @alice about it.").is_empty());
        assert!(parse_tool_calls("mail bob@example.com(work)").is_empty());
        assert!(parse_tool_calls("a lone @ sign").is_empty());
    }

    #[test]
    fn test_malformed_does_not_hide_later_calls() {
        let text = r#"@bad({oops}) then @math.calculate({"expression": "1"})"#;
        let parsed = parse_tool_calls(text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(names(text), vec!["math.calculate"]);
    }
}
