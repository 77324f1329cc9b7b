//! Shared types for the dec agent: identifiers, messages, the model-provider
//! contract, and the capability traits the engine consumes (documents, sandbox).

pub mod context;
pub mod documents;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod sandbox;
pub mod stream;
