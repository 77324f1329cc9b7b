use serde::Deserialize;

use dec_core::errors::GatewayError;
use dec_core::stream::{StopReason, StreamEvent};

/// State machine for parsing Messages API SSE events into text stream events.
#[derive(Default)]
pub struct SseParser {
    text: String,
    stop_reason: Option<StopReason>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parse one SSE event and return zero or more StreamEvents.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        match event_type {
            "message_start" => events.push(StreamEvent::Start),

            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<ContentBlockDeltaEvent>(data) {
                    if delta.delta.delta_type == "text_delta" {
                        let text = delta.delta.text.unwrap_or_default();
                        self.text.push_str(&text);
                        events.push(StreamEvent::TextDelta { delta: text });
                    }
                }
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDeltaEvent>(data) {
                    self.stop_reason = delta.delta.stop_reason.as_deref().map(parse_stop_reason);
                }
            }

            "message_stop" => events.push(StreamEvent::Done {
                text: self.text.clone(),
                stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
            }),

            "error" => {
                let error = match serde_json::from_str::<ErrorEvent>(data) {
                    Ok(err) => classify_error(&err.error),
                    Err(_) => GatewayError::StreamInterrupted(format!("malformed error event: {data}")),
                };
                events.push(StreamEvent::Error { error });
            }

            // ping, content_block_start/stop
            _ => {}
        }

        events
    }
}

fn parse_stop_reason(raw: &str) -> StopReason {
    match raw {
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn classify_error(err: &ErrorPayload) -> GatewayError {
    match err.error_type.as_str() {
        "overloaded_error" => GatewayError::ProviderOverloaded,
        "rate_limit_error" => GatewayError::RateLimited { retry_after: None },
        "authentication_error" => GatewayError::AuthenticationFailed(err.message.clone()),
        "invalid_request_error" => GatewayError::InvalidRequest(err.message.clone()),
        _ => GatewayError::ServerError {
            status: 500,
            body: err.message.clone(),
        },
    }
}

/// Parse raw SSE text into (event_type, data) pairs.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            current_event = event.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            if !current_data.is_empty() {
                current_data.push('\n');
            }
            current_data.push_str(data.strip_prefix(' ').unwrap_or(data));
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((
                std::mem::take(&mut current_event),
                std::mem::take(&mut current_data),
            ));
        }
    }

    // Trailing event without blank line
    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }

    events
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    delta: TextDeltaPayload,
}

#[derive(Deserialize)]
struct TextDeltaPayload {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDeltaPayload,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_text_stream() {
        let mut parser = SseParser::new();

        let events = parser.parse_event(
            "message_start",
            r#"{"type":"message_start","message":{"id":"msg_1","role":"assistant","content":[]}}"#,
        );
        assert!(matches!(events[..], [StreamEvent::Start]));

        let events = parser.parse_event(
            "content_block_start",
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        );
        assert!(events.is_empty());

        for chunk in ["Hello", " world!"] {
            let data = format!(
                r#"{{"type":"content_block_delta","index":0,"delta":{{"type":"text_delta","text":"{chunk}"}}}}"#
            );
            let events = parser.parse_event("content_block_delta", &data);
            assert!(matches!(&events[..], [StreamEvent::TextDelta { delta }] if delta == chunk));
        }

        parser.parse_event(
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":5}}"#,
        );
        let events = parser.parse_event("message_stop", r#"{"type":"message_stop"}"#);
        match &events[..] {
            [StreamEvent::Done { text, stop_reason }] => {
                assert_eq!(text, "Hello world!");
                assert_eq!(*stop_reason, StopReason::MaxTokens);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn non_text_deltas_ignored() {
        let mut parser = SseParser::new();
        let events = parser.parse_event(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#,
        );
        assert!(events.is_empty());
        assert_eq!(parser.text(), "");
    }

    #[test]
    fn error_event_classified() {
        let mut parser = SseParser::new();
        let events = parser.parse_event(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert!(matches!(
            events[..],
            [StreamEvent::Error {
                error: GatewayError::ProviderOverloaded
            }]
        ));

        let events = parser.parse_event("error", "not json");
        assert!(matches!(
            events[..],
            [StreamEvent::Error {
                error: GatewayError::StreamInterrupted(_)
            }]
        ));
    }

    #[test]
    fn sse_lines_split_events() {
        let raw = "event: ping\ndata: {}\n\nevent: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";
        let events = parse_sse_lines(raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ("ping".to_string(), "{}".to_string()));
        assert_eq!(events[1].0, "message_stop");
    }

    #[test]
    fn sse_lines_trailing_event_without_blank_line() {
        let events = parse_sse_lines("event: message_stop\ndata: {}");
        assert_eq!(events, vec![("message_stop".to_string(), "{}".to_string())]);
    }

    #[test]
    fn data_without_event_is_ignored() {
        assert!(parse_sse_lines("data: ping\n\n").is_empty());
    }
}
