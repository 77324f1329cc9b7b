use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// Events emitted during model streaming. Ordering contract:
///
/// Start → TextDelta* → Done
///
/// Error can appear at any point and is terminal.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    Done { text: String, stop_reason: StopReason },
    Error { error: GatewayError },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
