use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use dec_core::context::LlmContext;
use dec_core::errors::GatewayError;
use dec_core::provider::{EventStream, LlmProvider, StreamOptions};
use dec_core::stream::StreamEvent;

use crate::converter;
use crate::sse::{self, SseParser};

pub const API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// API key credential. Never logged.
#[derive(Clone)]
pub struct ApiKey(pub SecretString);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

pub struct AnthropicProvider {
    client: Client,
    api_key: ApiKey,
    model: String,
    api_url: String,
    idle_timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(api_key: ApiKey, model: Option<&str>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            api_url: API_URL.to_string(),
            idle_timeout: SSE_IDLE_TIMEOUT,
        })
    }

    /// Point at a different endpoint (proxies, tests).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    fn build_request(&self, context: &LlmContext, options: &StreamOptions) -> reqwest::RequestBuilder {
        let body = converter::build_request_body(context, options, &self.model);
        self.client
            .post(&self.api_url)
            .header("x-api-key", self.api_key.0.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .json(&body)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, context, options), fields(model = %self.model))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let resp = self
            .build_request(context, options)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            debug!(status, "provider returned error status");
            return Err(GatewayError::from_status(status, body));
        }

        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.idle_timeout,
        )))
    }
}

/// Wraps a byte stream and yields StreamEvents. If no data arrives within
/// the idle window, emits a `StreamInterrupted` error.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: String,
    pending: Vec<StreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: String::new(),
            pending: Vec::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
        }
    }

    fn drain_events(&mut self, raw: &str) {
        for (event_type, data) in sse::parse_sse_lines(raw) {
            let events = self.parser.parse_event(&event_type, &data);
            self.pending.extend(events);
        }
    }
}

impl Stream for SseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.pending.is_empty() {
            return Poll::Ready(Some(self.pending.remove(0)));
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);

                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = self.buffer.find("\n\n") {
                        let chunk: String = self.buffer.drain(..pos + 2).collect();
                        self.drain_events(&chunk);
                    }

                    if !self.pending.is_empty() {
                        return Poll::Ready(Some(self.pending.remove(0)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(StreamEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    }));
                }
                Poll::Ready(None) => {
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        self.drain_events(&remaining);
                        if !self.pending.is_empty() {
                            return Poll::Ready(Some(self.pending.remove(0)));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        return Poll::Ready(Some(StreamEvent::Error {
                            error: GatewayError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dec_core::context::{SystemBlock, SystemBlockLabel};
    use dec_core::messages::PromptMessage;
    use futures::StreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(chunks: &[&str]) -> String {
        let mut body = String::from("event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n");
        for chunk in chunks {
            body.push_str(&format!(
                "event: content_block_delta\ndata: {{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"{chunk}\"}}}}\n\n"
            ));
        }
        body.push_str("event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n");
        body.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
        body
    }

    fn context() -> LlmContext {
        LlmContext {
            system_blocks: vec![SystemBlock::new(SystemBlockLabel::Instructions, "be brief")],
            messages: vec![PromptMessage::user_text("hi")],
        }
    }

    async fn provider_for(server: &MockServer) -> AnthropicProvider {
        AnthropicProvider::new(ApiKey::new("test-key"), Some("claude-test"))
            .unwrap()
            .with_api_url(format!("{}/v1/messages", server.uri()))
    }

    #[test]
    fn provider_properties() {
        let provider = AnthropicProvider::new(ApiKey::new("k"), None).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), DEFAULT_MODEL);
    }

    #[test]
    fn api_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", ApiKey::new("sk-secret")), "ApiKey(***)");
    }

    #[tokio::test]
    async fn streams_text_from_sse() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["Hel", "lo"])),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let mut stream = provider
            .stream(&context(), &StreamOptions::default())
            .await
            .unwrap();
        let mut deltas = Vec::new();
        let mut done = None;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta { delta } => deltas.push(delta),
                StreamEvent::Done { text, .. } => done = Some(text),
                _ => {}
            }
        }
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert_eq!(done.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn complete_collects_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["a", "b", "c"])))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let text = provider
            .complete(&context(), &StreamOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "abc");
    }

    #[tokio::test]
    async fn error_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let result = provider.stream(&context(), &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed(body)) if body == "bad key"));
    }

    #[tokio::test]
    async fn sse_stream_idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Result<bytes::Bytes, reqwest::Error>>();
        let mut stream = Box::pin(SseStream::with_idle_timeout(byte_stream, Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;

        let event = stream.next().await;
        assert!(
            matches!(&event, Some(StreamEvent::Error { error: GatewayError::StreamInterrupted(msg) }) if msg.contains("idle timeout")),
            "expected idle timeout error, got: {event:?}"
        );
    }

    #[tokio::test]
    async fn sse_stream_handles_split_chunks() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, reqwest::Error>>(16);
        let stream = Box::pin(SseStream::with_idle_timeout(
            tokio_stream::wrappers::ReceiverStream::new(rx),
            Duration::from_secs(5),
        ));

        let body = sse_body(&["split"]);
        let (a, b) = body.split_at(body.len() / 2);
        tx.send(Ok(bytes::Bytes::from(a.to_string()))).await.unwrap();
        tx.send(Ok(bytes::Bytes::from(b.to_string()))).await.unwrap();
        drop(tx);

        let events: Vec<_> = stream.collect().await;
        assert!(matches!(events.first(), Some(StreamEvent::Start)));
        assert!(matches!(events.last(), Some(StreamEvent::Done { text, .. }) if text == "split"));
    }
}
