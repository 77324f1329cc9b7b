//! The tag languages embedded in model output.
//!
//! - [`commands`]: file/dependency mutations plus display wrappers, extracted
//!   from the final reply.
//! - [`tool_calls`]: `load_examples` requests, resolved mid-turn before the
//!   reply is final.
//!
//! Both are built on the same hand-written [`scanner`].

pub mod commands;
pub mod scanner;
pub mod tool_calls;

pub use commands::{parse_response, Command, ParsedResponse};
pub use tool_calls::{parse_tool_calls, strip_tool_calls, ToolCall, ToolCallKind, ToolResult};
