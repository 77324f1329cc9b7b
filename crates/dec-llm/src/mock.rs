use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use dec_core::context::LlmContext;
use dec_core::errors::GatewayError;
use dec_core::provider::{EventStream, LlmProvider, StreamOptions};
use dec_core::stream::{StopReason, StreamEvent};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Yield the events, then never finish.
    Stall(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A complete text response delivered as one delta.
    pub fn stream_text(text: &str) -> Self {
        Self::stream_chunks(&[text])
    }

    /// A complete text response delivered as one delta per chunk.
    pub fn stream_chunks(chunks: &[&str]) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta {
            delta: c.to_string(),
        }));
        events.push(StreamEvent::Done {
            text: chunks.concat(),
            stop_reason: StopReason::EndTurn,
        });
        Self::Stream(events)
    }

    /// A stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    /// Deltas that arrive and then a stream that hangs.
    pub fn stalled(chunks: &[&str]) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta {
            delta: c.to_string(),
        }));
        Self::Stall(events)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every context it was called with.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<LlmContext>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Contexts received so far, in call order.
    pub fn requests(&self) -> Vec<LlmContext> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        self.requests.lock().push(context.clone());
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let response = self.responses.get(idx).cloned().ok_or_else(|| {
            GatewayError::InvalidRequest(format!("MockProvider: no response configured for call {idx}"))
        })?;
        resolve_response(response).await
    }
}

/// Unrolls nested delays iteratively.
async fn resolve_response(response: MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Stall(events) => {
                return Ok(Box::pin(stream::iter(events).chain(stream::pending())))
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dec_core::messages::PromptMessage;

    async fn collect(mock: &MockProvider) -> Vec<StreamEvent> {
        mock.stream(&LlmContext::empty(), &StreamOptions::default())
            .await
            .unwrap()
            .collect()
            .await
    }

    #[tokio::test]
    async fn text_response() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("hello world")]);
        let events = collect(&mock).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamEvent::Start));
        assert!(matches!(&events[1], StreamEvent::TextDelta { delta } if delta == "hello world"));
        assert!(matches!(&events[2], StreamEvent::Done { text, .. } if text == "hello world"));
    }

    #[tokio::test]
    async fn chunked_response_done_has_full_text() {
        let mock = MockProvider::new(vec![MockResponse::stream_chunks(&["a", "b"])]);
        let events = collect(&mock).await;
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[3], StreamEvent::Done { text, .. } if text == "ab"));
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(
            GatewayError::AuthenticationFailed("bad".into()),
        )]);
        let result = mock.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn sequential_responses_and_exhaustion() {
        let mock = MockProvider::new(vec![
            MockResponse::stream_text("first"),
            MockResponse::stream_text("second"),
        ]);
        let ctx = LlmContext::empty();
        assert_eq!(mock.complete(&ctx, &StreamOptions::default()).await.unwrap(), "first");
        assert_eq!(mock.complete(&ctx, &StreamOptions::default()).await.unwrap(), "second");
        assert!(mock.stream(&ctx, &StreamOptions::default()).await.is_err());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn records_requests() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("ok")]);
        let ctx = LlmContext {
            system_blocks: Vec::new(),
            messages: vec![PromptMessage::user_text("question")],
        };
        mock.complete(&ctx, &StreamOptions::default()).await.unwrap();
        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].text_content(), "question");
    }

    #[tokio::test]
    async fn delayed_response() {
        tokio::time::pause();
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(50),
            MockResponse::stream_text("after delay"),
        )]);
        let start = tokio::time::Instant::now();
        let events = collect(&mock).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn stalled_stream_yields_then_hangs() {
        let mock = MockProvider::new(vec![MockResponse::stalled(&["partial"])]);
        let mut stream = mock
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(StreamEvent::Start)));
        assert!(matches!(stream.next().await, Some(StreamEvent::TextDelta { .. })));
        let next = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(next.is_err());
    }
}
