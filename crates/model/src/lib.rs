//! A vendor-neutral protocol for tool-calling language models.
//!
//! This crate establishes an unified protocol for the agent to interact
//! with various supported LLMs, so that the orchestration loop can switch
//! between them without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod opaque;
mod provider;
mod request;
mod response;

pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;
