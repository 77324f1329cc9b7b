//! One user turn, end to end.
//!
//! ```text
//! ingest → contextualize → phase 1 → tool-call check
//!        → [load documents → phase 2] → commands → finalize
//! ```
//!
//! Each phase gets its own immutable `AssembledPrompt`; phase 2 only ever
//! reads phase 1's finished text. The session's turn lock is held from
//! ingest to finalize, so turns on one session never interleave.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::try_stream;
use dec_context::{AssembledPrompt, ContextSelector, PromptRenderer, RenderOptions};
use dec_core::context::{LlmContext, SystemBlock, SystemBlockLabel};
use dec_core::documents::DocumentStore;
use dec_core::errors::GatewayError;
use dec_core::ids::{EnvironmentId, SessionId};
use dec_core::messages::{Attachment, ChatMessage, PromptMessage};
use dec_core::provider::{LlmProvider, StreamOptions};
use dec_core::sandbox::{Sandbox, SandboxError};
use dec_core::stream::StreamEvent;
use dec_protocol::commands::parse_response;
use dec_protocol::tool_calls::{self, combined_content, parse_tool_calls, strip_tool_calls};
use dec_protocol::{ToolCall, ToolResult};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::events::TurnEvent;
use crate::executor::{CommandExecutor, ExecutionReport};
use crate::session::{SessionHandle, SessionStore};

pub const FALLBACK_INSTRUCTIONS: &str = include_str!("../prompts/fallback.md");

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub stream_options: StreamOptions,
    /// Render the sandbox project into the system prompt.
    pub include_snapshot: bool,
    pub fallback_instructions: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stream_options: StreamOptions::default(),
            include_snapshot: true,
            fallback_instructions: FALLBACK_INSTRUCTIONS.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub env_id: EnvironmentId,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl TurnRequest {
    pub fn new(env_id: EnvironmentId, text: impl Into<String>) -> Self {
        Self {
            env_id,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnOutput {
    pub session_id: SessionId,
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
    pub tool_calls: Vec<ToolCall>,
    pub execution: ExecutionReport,
}

/// State for one in-flight turn. Dropping it releases the session.
struct PreparedTurn {
    handle: Arc<SessionHandle>,
    _guard: OwnedMutexGuard<()>,
    user_message: ChatMessage,
    /// Prior turns followed by the current user message.
    history: Vec<PromptMessage>,
    prompt: AssembledPrompt,
    extra_blocks: Vec<SystemBlock>,
}

impl PreparedTurn {
    fn context(&self, prompt: &AssembledPrompt, partial_reply: Option<String>) -> LlmContext {
        let mut system_blocks = vec![SystemBlock::new(SystemBlockLabel::Instructions, prompt.as_str())];
        system_blocks.extend(self.extra_blocks.iter().cloned());
        let mut messages = self.history.clone();
        messages.extend(partial_reply.map(PromptMessage::assistant_text));
        LlmContext {
            system_blocks,
            messages,
        }
    }

    fn phase_one_context(&self) -> LlmContext {
        self.context(&self.prompt, None)
    }

    /// Context for the augmented call, or `None` when nothing was loaded.
    fn phase_two_context(&self, round: &ToolRound, first_reply: &str) -> Option<LlmContext> {
        if round.content.trim().is_empty() {
            debug!("tool calls loaded no content, skipping second phase");
            return None;
        }
        let enhanced = self.prompt.with_loaded_documents(&round.content);
        let partial = strip_tool_calls(first_reply);
        Some(self.context(&enhanced, (!partial.is_empty()).then_some(partial)))
    }
}

struct ToolRound {
    calls: Vec<ToolCall>,
    content: String,
}

enum PhaseEvent {
    /// Cumulative text so far.
    Progress(String),
    Finished(String),
}

#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    sessions: Arc<SessionStore>,
    selector: Arc<ContextSelector>,
    renderer: Arc<PromptRenderer>,
    sandbox: Arc<dyn Sandbox>,
    executor: CommandExecutor,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        documents: Arc<dyn DocumentStore>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self {
            provider,
            sessions: Arc::new(SessionStore::new()),
            selector: Arc::new(ContextSelector::default()),
            renderer: Arc::new(PromptRenderer::new(documents)),
            executor: CommandExecutor::new(Arc::clone(&sandbox)),
            sandbox,
            config: Arc::new(OrchestratorConfig::default()),
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_selector(mut self, selector: ContextSelector) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        let store = Arc::clone(self.renderer.store());
        self.renderer = Arc::new(PromptRenderer::with_options(store, options));
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Buffered turn.
    #[instrument(skip_all, fields(env_id = %request.env_id))]
    pub async fn send(&self, request: TurnRequest, cancel: &CancellationToken) -> Result<TurnOutput, EngineError> {
        let turn = self.prepare(request, cancel).await?;

        info!(session_id = %turn.handle.id(), "phase 1");
        let mut text = self.complete_phase(&turn.phase_one_context(), cancel).await?;
        let mut tool_calls = Vec::new();

        if let Some(round) = self.tool_round(&text) {
            tool_calls = round.calls.clone();
            if let Some(ctx) = turn.phase_two_context(&round, &text) {
                info!(session_id = %turn.handle.id(), calls = round.calls.len(), "phase 2");
                match self.complete_phase(&ctx, cancel).await {
                    Ok(second) if !second.trim().is_empty() => text = second,
                    Ok(_) => warn!("second phase returned no content, keeping first reply"),
                    Err(EngineError::Aborted) => return Err(EngineError::Aborted),
                    Err(e) => warn!(error = %e, "second phase failed, keeping first reply"),
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }
        self.clone().finalize_detached(turn, text, tool_calls).await
    }

    /// Streamed turn. Dropping the stream cancels the turn.
    pub fn send_streaming(&self, request: TurnRequest) -> TurnStream {
        let cancel = CancellationToken::new();
        let inner = self.clone().turn_events(request, cancel.clone());
        TurnStream {
            inner: Box::pin(inner),
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        }
    }

    fn turn_events(
        self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<TurnEvent, EngineError>> + Send + 'static {
        try_stream! {
            let turn = self.prepare(request, &cancel).await?;
            let session_id = turn.handle.id().clone();
            yield TurnEvent::User { message: turn.user_message.clone() };

            info!(session_id = %session_id, "phase 1");
            let mut text = String::new();
            let phase = self.stream_phase(turn.phase_one_context(), cancel.clone());
            futures::pin_mut!(phase);
            while let Some(event) = phase.next().await {
                match event? {
                    PhaseEvent::Progress(so_far) => yield TurnEvent::Assistant { text: so_far },
                    PhaseEvent::Finished(full) => text = full,
                }
            }

            let mut tool_calls = Vec::new();
            if let Some(round) = self.tool_round(&text) {
                tool_calls = round.calls.clone();
                if let Some(ctx) = turn.phase_two_context(&round, &text) {
                    yield TurnEvent::ToolProcessing { tool_calls: round.calls.clone() };
                    info!(session_id = %session_id, calls = round.calls.len(), "phase 2");
                    let mut second = String::new();
                    let phase = self.stream_phase(ctx, cancel.clone());
                    futures::pin_mut!(phase);
                    while let Some(event) = phase.next().await {
                        match event {
                            Ok(PhaseEvent::Progress(so_far)) => yield TurnEvent::Assistant { text: so_far },
                            Ok(PhaseEvent::Finished(full)) => second = full,
                            Err(EngineError::Aborted) => Err(EngineError::Aborted)?,
                            Err(e) => {
                                warn!(error = %e, "second phase failed, keeping first reply");
                                break;
                            }
                        }
                    }
                    if second.trim().is_empty() {
                        warn!("second phase returned no content, keeping first reply");
                    } else {
                        text = second;
                    }
                }
            }

            if cancel.is_cancelled() {
                Err::<(), _>(EngineError::Aborted)?;
            }
            let output = self.clone().finalize_detached(turn, text, tool_calls).await?;
            yield TurnEvent::Done {
                message: output.assistant_message,
                execution: output.execution,
            };
        }
    }

    /// Ingest and contextualize.
    async fn prepare(&self, request: TurnRequest, cancel: &CancellationToken) -> Result<PreparedTurn, EngineError> {
        let (handle, guard) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Aborted),
            acquired = self.sessions.acquire_turn(&request.env_id) => acquired,
        };

        let mut history = handle.prompt_history();
        let now = self.sessions.now();
        let user_message = ChatMessage::user(request.text, request.attachments, now);
        handle.append(user_message.clone(), now);
        history.push(PromptMessage::from(&user_message));
        debug!(session_id = %handle.id(), history = history.len(), "user message appended");

        let (prompt, extra_blocks) = self.contextualize(&request.env_id, &user_message.content).await;
        Ok(PreparedTurn {
            handle,
            _guard: guard,
            user_message,
            history,
            prompt,
            extra_blocks,
        })
    }

    async fn contextualize(&self, env: &EnvironmentId, utterance: &str) -> (AssembledPrompt, Vec<SystemBlock>) {
        let mut blocks = Vec::new();
        if self.config.include_snapshot {
            match self.sandbox.snapshot(env).await {
                Ok(snapshot) => {
                    if let Some(rendered) = self.renderer.render_snapshot(&snapshot) {
                        blocks.push(SystemBlock::new(SystemBlockLabel::ProjectSnapshot, rendered));
                    }
                }
                Err(SandboxError::EnvironmentNotFound(_)) => {
                    debug!(env_id = %env, "no project yet, skipping snapshot");
                }
                Err(e) => warn!(env_id = %env, error = %e, "snapshot failed, continuing without it"),
            }
        }
        if let Some(catalog) = self.renderer.render_catalog() {
            blocks.push(SystemBlock::new(SystemBlockLabel::DocumentCatalog, catalog));
        }

        let selection = self.selector.select(utterance);
        let mut prompt = self.renderer.render_selection(&selection);
        if prompt.is_empty() {
            warn!("no instructions available, using fallback");
            prompt = AssembledPrompt::new(self.config.fallback_instructions.as_str());
        }
        (prompt, blocks)
    }

    async fn complete_phase(&self, ctx: &LlmContext, cancel: &CancellationToken) -> Result<String, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Aborted),
            result = self.provider.complete(ctx, &self.config.stream_options) => Ok(result?),
        }
    }

    fn stream_phase(
        &self,
        ctx: LlmContext,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<PhaseEvent, EngineError>> + Send + 'static {
        let provider = Arc::clone(&self.provider);
        let options = self.config.stream_options.clone();
        try_stream! {
            let started = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = provider.stream(&ctx, &options) => Some(result),
            };
            let mut events = match started {
                Some(result) => result?,
                None => Err(EngineError::Aborted)?,
            };

            let mut text = String::new();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    event = events.next() => Some(event),
                };
                match next {
                    None => Err(EngineError::Aborted)?,
                    Some(Some(StreamEvent::TextDelta { delta })) => {
                        text.push_str(&delta);
                        yield PhaseEvent::Progress(text.clone());
                    }
                    Some(Some(StreamEvent::Done { text: full, .. })) => {
                        if text.is_empty() && !full.is_empty() {
                            text = full;
                            yield PhaseEvent::Progress(text.clone());
                        }
                        break;
                    }
                    Some(Some(StreamEvent::Error { error })) => Err(EngineError::Gateway(error))?,
                    Some(Some(StreamEvent::Start)) => {}
                    Some(None) => Err(GatewayError::StreamInterrupted(
                        "stream ended without Done event".into(),
                    ))?,
                }
            }
            yield PhaseEvent::Finished(text);
        }
    }

    fn tool_round(&self, text: &str) -> Option<ToolRound> {
        let calls = parse_tool_calls(text);
        if calls.is_empty() {
            return None;
        }
        let store = self.renderer.store();
        let results: Vec<ToolResult> = calls
            .iter()
            .map(|call| {
                let result = tool_calls::execute(call, &**store);
                if let Some(error) = &result.error {
                    warn!(examples = ?call.examples, error = %error, "load_examples failed");
                }
                result
            })
            .collect();
        info!(calls = calls.len(), "tool calls resolved");
        Some(ToolRound {
            content: combined_content(&results),
            calls,
        })
    }

    /// Finalize on its own task. Once commands start, the turn runs to
    /// completion and is recorded even if the caller stops polling.
    async fn finalize_detached(
        self,
        turn: PreparedTurn,
        text: String,
        tool_calls: Vec<ToolCall>,
    ) -> Result<TurnOutput, EngineError> {
        tokio::spawn(async move { self.finalize(turn, &text, tool_calls).await })
            .await
            .map_err(|e| EngineError::Internal(format!("finalize task failed: {e}")))
    }

    /// Commands, cleaning, and the assistant message.
    async fn finalize(&self, turn: PreparedTurn, text: &str, tool_calls: Vec<ToolCall>) -> TurnOutput {
        let parsed = parse_response(&strip_tool_calls(text));
        let execution = if parsed.has_commands {
            self.executor
                .execute_all(turn.handle.env_id(), &parsed.commands)
                .await
        } else {
            ExecutionReport::empty()
        };

        let content = if execution.success {
            parsed.cleaned
        } else {
            with_error_note(parsed.cleaned, &execution.errors)
        };

        let now = self.sessions.now();
        let assistant_message = ChatMessage::assistant(content, now);
        turn.handle.append(assistant_message.clone(), now);
        info!(
            session_id = %turn.handle.id(),
            commands = parsed.commands.len(),
            failed = execution.errors.len(),
            "turn finalized"
        );

        TurnOutput {
            session_id: turn.handle.id().clone(),
            user_message: turn.user_message,
            assistant_message,
            tool_calls,
            execution,
        }
    }
}

fn with_error_note(reply: String, errors: &[String]) -> String {
    let mut note = String::from("Some changes could not be applied:");
    for error in errors {
        note.push_str("\n- ");
        note.push_str(error);
    }
    if reply.is_empty() {
        note
    } else {
        format!("{reply}\n\n{note}")
    }
}

/// Events of one streamed turn.
pub struct TurnStream {
    inner: Pin<Box<dyn Stream<Item = Result<TurnEvent, EngineError>> + Send>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl TurnStream {
    /// Token that aborts the turn at the next suspension point.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for TurnStream {
    type Item = Result<TurnEvent, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_note_appended() {
        let out = with_error_note("Done.".into(), &["delete a.ts: delete is not implemented".into()]);
        assert_eq!(
            out,
            "Done.\n\nSome changes could not be applied:\n- delete a.ts: delete is not implemented"
        );
        assert!(with_error_note(String::new(), &["x".into()]).starts_with("Some changes"));
    }

    #[test]
    fn fallback_instructions_embedded() {
        assert!(FALLBACK_INSTRUCTIONS.contains("<dec-write"));
        assert!(OrchestratorConfig::default().include_snapshot);
    }
}
