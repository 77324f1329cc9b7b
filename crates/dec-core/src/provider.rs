use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::stream::StreamEvent;

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Options controlling generation.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

/// Minimal request/stream contract a language-model provider must satisfy.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError>;

    /// Buffered call: drains `stream` and returns the full text.
    async fn complete(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<String, GatewayError> {
        let mut stream = self.stream(context, options).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta { delta } => text.push_str(&delta),
                StreamEvent::Done { text: full, .. } => {
                    if text.is_empty() {
                        text = full;
                    }
                    return Ok(text);
                }
                StreamEvent::Error { error } => return Err(error),
                StreamEvent::Start => {}
            }
        }
        Err(GatewayError::StreamInterrupted("stream ended without Done event".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StopReason;

    struct Scripted(Vec<StreamEvent>);

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn stream(
            &self,
            _context: &LlmContext,
            _options: &StreamOptions,
        ) -> Result<EventStream, GatewayError> {
            Ok(Box::pin(futures::stream::iter(self.0.clone())))
        }
    }

    #[tokio::test]
    async fn complete_accumulates_deltas() {
        let p = Scripted(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: "hel".into() },
            StreamEvent::TextDelta { delta: "lo".into() },
            StreamEvent::Done { text: "hello".into(), stop_reason: StopReason::EndTurn },
        ]);
        let text = p.complete(&LlmContext::empty(), &StreamOptions::default()).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn complete_uses_done_text_without_deltas() {
        let p = Scripted(vec![StreamEvent::Done {
            text: "whole".into(),
            stop_reason: StopReason::EndTurn,
        }]);
        let text = p.complete(&LlmContext::empty(), &StreamOptions::default()).await.unwrap();
        assert_eq!(text, "whole");
    }

    #[tokio::test]
    async fn complete_surfaces_stream_errors() {
        let p = Scripted(vec![
            StreamEvent::Start,
            StreamEvent::Error { error: GatewayError::ProviderOverloaded },
        ]);
        let err = p.complete(&LlmContext::empty(), &StreamOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderOverloaded));
    }

    #[tokio::test]
    async fn complete_rejects_truncated_stream() {
        let p = Scripted(vec![StreamEvent::Start, StreamEvent::TextDelta { delta: "x".into() }]);
        let err = p.complete(&LlmContext::empty(), &StreamOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::StreamInterrupted(_)));
    }
}
