//! Core logic of the data agent: tool registry and invocation, the
//! conversation, the orchestration loop, display routing and the session
//! worker.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
pub mod display;
mod error;
mod model_client;
mod orchestrator;
mod sink;
#[cfg(test)]
mod testing;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentConfig, DEFAULT_MAX_ITERATIONS};
pub use error::{BuildError, TurnError};
pub use orchestrator::{OrchestrationLoop, TurnOutcome, TurnStatus};
pub use sink::ChatSink;
