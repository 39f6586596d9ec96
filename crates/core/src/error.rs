use data_agent_model::{ErrorKind, ModelProviderError};

use crate::conversation::ConversationError;
use crate::tool::RegistryError;

/// Why a turn could not finish.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The model provider failed.
    #[error("model provider failed: {0}")]
    Provider(Box<dyn ModelProviderError>),
    /// A message could not be appended to the conversation.
    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

impl TurnError {
    /// Returns the provider error kind, if the provider failed.
    #[inline]
    pub fn provider_kind(&self) -> Option<ErrorKind> {
        match self {
            TurnError::Provider(err) => Some(err.kind()),
            TurnError::Conversation(_) => None,
        }
    }
}

/// Why an agent configuration could not be built.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The tool registry is invalid.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// `max_iterations` must allow at least one tool round.
    #[error("max iterations must be at least 1")]
    ZeroIterations,
}
