//! Agent session orchestration.

pub mod events;
pub mod prompt;
pub mod session;

pub use events::{BlockCoalescer, EventSink, NullSink};
pub use prompt::{build_system_prompt, default_system_prompt};
pub use session::{AgentSession, SessionConfig, TurnOutcome, TurnState};
