pub mod error;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod sandbox;
pub mod session;

pub use error::EngineError;
pub use events::TurnEvent;
pub use executor::{CommandExecutor, CommandOutcome, ExecutionError, ExecutionReport};
pub use orchestrator::{Orchestrator, OrchestratorConfig, TurnOutput, TurnRequest, TurnStream};
pub use sandbox::{LocalSandbox, MemorySandbox};
pub use session::{
    Clock, EvictionPolicy, IdleTimeout, ManualClock, NeverEvict, Session, SessionHandle,
    SessionStore, SystemClock,
};
