use regex::Regex;
use std::sync::OnceLock;

use crate::message::{Message, Role};

fn retry_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"CRITICAL JSON ERROR",
            r"Your previous response was not valid JSON",
            r"(?s)URGENT.*JSON PARSING FAILED",
            r"You returned a JSON schema definition instead of data",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static retry pattern is valid"))
        .collect()
    })
}

fn is_retry_prompt(content: &str) -> bool {
    retry_patterns().iter().any(|re| re.is_match(content))
}

/// Drop `(user, assistant)` pairs where the user turn is a known
/// invalid-JSON-retry prompt, then strip any trailing JSON block from the
/// last remaining assistant message so a child session doesn't inherit the
/// parent check's schema shape.
pub fn sanitize_history(history: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(history.len());
    let mut i = 0;
    while i < history.len() {
        let msg = &history[i];
        if msg.role == Role::User && is_retry_prompt(&msg.content) {
            // Drop this prompt and the assistant reply immediately following it.
            if history.get(i + 1).map(|m| m.role) == Some(Role::Assistant) {
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        out.push(msg.clone());
        i += 1;
    }

    if let Some(last) = out.last_mut() {
        if last.role == Role::Assistant {
            last.content = strip_trailing_json(&last.content);
        }
    }

    out
}

/// Strips a trailing fenced ```json ...``` block, or a trailing balanced
/// `{...}`/`[...]` value, from the end of `content`.
fn strip_trailing_json(content: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*\n?.*?```\s*$").expect("static fence pattern is valid")
    });
    if let Some(m) = fence.find(content) {
        return content[..m.start()].trim_end().to_string();
    }

    let trimmed = content.trim_end();
    let Some(close) = trimmed.chars().last() else {
        return content.to_string();
    };
    let open = match close {
        '}' => '{',
        ']' => '[',
        _ => return content.to_string(),
    };

    match find_matching_open(trimmed, open, close) {
        Some(start) => trimmed[..start].trim_end().to_string(),
        None => content.to_string(),
    }
}

/// Scans backward from the end of `text` (which ends in `close`) to find the
/// byte offset of the `open` that balances it, treating the tail as a single
/// JSON value. Returns `None` if the tail isn't a well-formed balanced value.
fn find_matching_open(text: &str, open: char, close: char) -> Option<usize> {
    let bytes: Vec<char> = text.chars().collect();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = None;

    for (idx, &c) in bytes.iter().enumerate().rev() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == close => depth += 1,
            c if c == open => {
                depth -= 1;
                if depth == 0 {
                    start = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }

    start.map(|char_idx| bytes[..char_idx].iter().collect::<String>().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message::new(role, content)
    }

    #[test]
    fn drops_retry_prompt_and_its_reply() {
        let history = vec![
            msg(Role::User, "do the review"),
            msg(Role::Assistant, "here is the review"),
            msg(Role::User, "CRITICAL JSON ERROR: please retry"),
            msg(Role::Assistant, "sorry, retrying"),
            msg(Role::User, "second real question"),
            msg(Role::Assistant, "final answer {\"ok\": true}"),
        ];
        let cleaned = sanitize_history(&history);
        assert_eq!(cleaned.len(), 4);
        assert!(!cleaned.iter().any(|m| m.content.contains("CRITICAL JSON ERROR")));
        assert!(!cleaned.iter().any(|m| m.content.contains("sorry, retrying")));
    }

    #[test]
    fn strips_trailing_fenced_json_block() {
        let history = vec![msg(
            Role::Assistant,
            "Summary text.\n```json\n{\"issues\": []}\n```",
        )];
        let cleaned = sanitize_history(&history);
        assert_eq!(cleaned[0].content, "Summary text.");
    }

    #[test]
    fn strips_trailing_unfenced_json_object() {
        let history = vec![msg(Role::Assistant, "Done. {\"status\": \"ok\"}")];
        let cleaned = sanitize_history(&history);
        assert_eq!(cleaned[0].content, "Done.");
    }

    #[test]
    fn leaves_plain_prose_untouched() {
        let history = vec![msg(Role::Assistant, "No JSON here at all.")];
        let cleaned = sanitize_history(&history);
        assert_eq!(cleaned[0].content, "No JSON here at all.");
    }
}
