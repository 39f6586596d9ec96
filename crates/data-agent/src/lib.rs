//! A conversational data-analysis agent over a SQL database.
//!
//! The agent answers questions by querying the database and draws charts
//! of the results. The crate includes a CLI tool for using in the terminal,
//! and you can also use it as a library to bring the agent into your own
//! host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod artifacts;
pub mod db;
mod session;
pub mod tools;

pub use artifacts::ArtifactStore;
pub use session::{
    Session, SessionBuilder, SessionConfig, SessionError,
    TABLE_INFO_PLACEHOLDER, render_system_prompt,
};

/// Re-exports of [`data_agent_core`] crate.
pub mod core {
    pub use data_agent_core::*;
}
