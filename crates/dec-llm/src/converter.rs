use serde_json::{json, Value};

use dec_core::context::{LlmContext, SystemBlock};
use dec_core::messages::{ContentPart, PromptMessage, Role};
use dec_core::provider::StreamOptions;

pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Convert an LlmContext into the Messages API request body.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": true,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });

    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    if !options.stop_sequences.is_empty() {
        body["stop_sequences"] = json!(options.stop_sequences);
    }

    let system = convert_system_blocks(&context.system_blocks);
    if !system.is_empty() {
        body["system"] = json!(system);
    }

    body["messages"] = json!(context
        .messages
        .iter()
        .map(convert_message)
        .collect::<Vec<_>>());

    body
}

fn convert_system_blocks(blocks: &[SystemBlock]) -> Vec<Value> {
    blocks
        .iter()
        .filter(|b| !b.content.trim().is_empty())
        .map(|b| json!({"type": "text", "text": b.content}))
        .collect()
}

/// Stands in for a turn whose text cleaned to nothing, e.g. a reply made only
/// of commands. The API rejects empty text blocks and empty content.
pub const EMPTY_ASSISTANT_TEXT: &str = "(changes applied)";
pub const EMPTY_USER_TEXT: &str = "(no text)";

fn convert_message(msg: &PromptMessage) -> Value {
    let (role, placeholder) = match msg.role {
        Role::User => ("user", EMPTY_USER_TEXT),
        Role::Assistant => ("assistant", EMPTY_ASSISTANT_TEXT),
    };
    let mut content: Vec<Value> = msg
        .content
        .iter()
        .filter(|part| !matches!(part, ContentPart::Text { text } if text.trim().is_empty()))
        .map(convert_part)
        .collect();
    if content.is_empty() {
        content.push(json!({"type": "text", "text": placeholder}));
    }
    json!({
        "role": role,
        "content": content,
    })
}

fn convert_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::Image { media_type, data } => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        ContentPart::Document {
            media_type,
            data,
            name,
        } => json!({
            "type": "document",
            "source": {"type": "base64", "media_type": media_type, "data": data},
            "title": name,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dec_core::context::SystemBlockLabel;

    #[test]
    fn user_text_converts() {
        let v = convert_message(&PromptMessage::user_text("hi"));
        assert_eq!(v, json!({"role": "user", "content": [{"type": "text", "text": "hi"}]}));
    }

    #[test]
    fn empty_assistant_text_gets_placeholder() {
        let v = convert_message(&PromptMessage::assistant_text(""));
        assert_eq!(
            v,
            json!({"role": "assistant", "content": [{"type": "text", "text": EMPTY_ASSISTANT_TEXT}]})
        );
        let v = convert_message(&PromptMessage::assistant_text(" \n "));
        assert_eq!(v["content"][0]["text"], EMPTY_ASSISTANT_TEXT);
    }

    #[test]
    fn blank_text_beside_attachment_is_dropped() {
        let msg = PromptMessage {
            role: Role::User,
            content: vec![
                ContentPart::Text { text: String::new() },
                ContentPart::Image {
                    media_type: "image/png".into(),
                    data: "AAAA".into(),
                },
            ],
        };
        let v = convert_message(&msg);
        let content = v["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "image");
    }

    #[test]
    fn history_never_carries_empty_text_blocks() {
        let ctx = LlmContext {
            system_blocks: vec![],
            messages: vec![
                PromptMessage::user_text("make a"),
                PromptMessage::assistant_text(""),
                PromptMessage::user_text("now b"),
            ],
        };
        let body = build_request_body(&ctx, &StreamOptions::default(), "m");
        for message in body["messages"].as_array().unwrap() {
            for part in message["content"].as_array().unwrap() {
                if part["type"] == "text" {
                    assert!(!part["text"].as_str().unwrap().trim().is_empty());
                }
            }
        }
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn attachments_convert_to_base64_sources() {
        let msg = PromptMessage {
            role: Role::User,
            content: vec![
                ContentPart::Text { text: "look".into() },
                ContentPart::Image {
                    media_type: "image/png".into(),
                    data: "AAAA".into(),
                },
                ContentPart::Document {
                    media_type: "application/pdf".into(),
                    data: "BBBB".into(),
                    name: "spec.pdf".into(),
                },
            ],
        };
        let v = convert_message(&msg);
        let content = v["content"].as_array().unwrap();
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["source"]["media_type"], "image/png");
        assert_eq!(content[2]["type"], "document");
        assert_eq!(content[2]["title"], "spec.pdf");
        assert_eq!(content[2]["source"]["data"], "BBBB");
    }

    #[test]
    fn full_request_body() {
        let ctx = LlmContext {
            system_blocks: vec![
                SystemBlock::new(SystemBlockLabel::Instructions, "be helpful"),
                SystemBlock::new(SystemBlockLabel::ProjectSnapshot, "  "),
            ],
            messages: vec![
                PromptMessage::user_text("hello"),
                PromptMessage::assistant_text("hi"),
            ],
        };
        let opts = StreamOptions {
            max_tokens: Some(1000),
            temperature: Some(0.2),
            stop_sequences: vec![],
        };
        let body = build_request_body(&ctx, &opts, "claude-sonnet-4-5");
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["temperature"], 0.2);
        assert!(body.get("stop_sequences").is_none());
        assert_eq!(body["system"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][1]["role"], "assistant");
    }

    #[test]
    fn defaults_and_empty_system() {
        let body = build_request_body(&LlmContext::empty(), &StreamOptions::default(), "m");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("system").is_none());
        assert_eq!(body["messages"], json!([]));
    }
}
