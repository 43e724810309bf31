use serde_json::Value;

/// Flattened view of a codex-family event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedResult {
    pub message: String,
    pub reasoning: Option<String>,
}

/// Fold a streamed event log into a single answer/reasoning pair.
///
/// Each chunk optionally carries a text payload of newline-separated JSON
/// events. Lines that fail to parse contribute nothing; only `item.completed`
/// events are considered, and only `agent_message` and `reasoning` items are
/// accumulated. The fold is tolerant: malformed or irrelevant lines never
/// abort it.
pub fn normalize_codex_output(content: &[Value]) -> NormalizedResult {
    let mut messages: Vec<String> = Vec::new();
    let mut reasoning: Vec<String> = Vec::new();

    for chunk in content {
        let Some(text) = chunk.get("text").and_then(Value::as_str) else {
            continue;
        };

        for line in text.lines() {
            let Ok(event) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if event.get("type").and_then(Value::as_str) != Some("item.completed") {
                continue;
            }
            let Some(item) = event.get("item") else {
                continue;
            };
            let item_text = item
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match item.get("type").and_then(Value::as_str) {
                Some("agent_message") => messages.push(item_text),
                Some("reasoning") => reasoning.push(item_text),
                _ => {}
            }
        }
    }

    let message = messages.join("\n\n").trim().to_string();
    let reasoning = {
        let joined = reasoning.join("\n\n");
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    };

    NormalizedResult { message, reasoning }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_chunk(text: &str) -> Value {
        json!({ "type": "text", "text": text })
    }

    #[test]
    fn extracts_message_and_reasoning() {
        let stream = vec![text_chunk(concat!(
            r#"{"type":"item.completed","item":{"type":"reasoning","text":"Thinking"}}"#,
            "\n",
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"Hello world"}}"#,
        ))];

        let result = normalize_codex_output(&stream);
        assert_eq!(result.message, "Hello world");
        assert_eq!(result.reasoning.as_deref(), Some("Thinking"));
    }

    #[test]
    fn tolerates_noise_and_unmatched_events() {
        let stream = vec![text_chunk(concat!(
            "this line is not JSON\n",
            r#"{"type":"item.started","item":{"type":"agent_message","text":"early"}}"#,
            "\n",
            r#"{"type":"item.completed","item":{"type":"command_output","text":"ls"}}"#,
        ))];

        let result = normalize_codex_output(&stream);
        assert_eq!(result.message, "");
        assert_eq!(result.reasoning, None);
    }

    #[test]
    fn skips_chunks_without_text_payload() {
        let stream = vec![
            json!({ "type": "image", "data": "..." }),
            text_chunk(r#"{"type":"item.completed","item":{"type":"agent_message","text":"ok"}}"#),
        ];

        let result = normalize_codex_output(&stream);
        assert_eq!(result.message, "ok");
    }

    #[test]
    fn joins_multiple_messages_with_blank_lines() {
        let stream = vec![
            text_chunk(r#"{"type":"item.completed","item":{"type":"agent_message","text":"first"}}"#),
            text_chunk(r#"{"type":"item.completed","item":{"type":"agent_message","text":"second"}}"#),
        ];

        let result = normalize_codex_output(&stream);
        assert_eq!(result.message, "first\n\nsecond");
        assert_eq!(result.reasoning, None);
    }

    #[test]
    fn empty_stream_yields_empty_result() {
        let result = normalize_codex_output(&[]);
        assert_eq!(result.message, "");
        assert_eq!(result.reasoning, None);
    }
}
