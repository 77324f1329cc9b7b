use dec_core::messages::ChatMessage;
use dec_protocol::ToolCall;
use serde::Serialize;

use crate::executor::ExecutionReport;

/// Events yielded by a streamed turn, always in this order:
///
/// User → Assistant* → [ToolProcessing → Assistant*] → Done
///
/// `ToolProcessing` is only sent when loaded documents trigger a second
/// model call; tool calls that load nothing end the turn on the first reply.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    User {
        message: ChatMessage,
    },
    /// Cumulative text of the current model call.
    Assistant {
        text: String,
    },
    ToolProcessing {
        tool_calls: Vec<ToolCall>,
    },
    Done {
        message: ChatMessage,
        execution: ExecutionReport,
    },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolProcessing { .. } => "tool_processing",
            Self::Done { .. } => "done",
        }
    }
}
