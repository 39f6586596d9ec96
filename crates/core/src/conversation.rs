//! Conversation-related types.

use std::collections::HashSet;

use data_agent_model::{
    AssistantMessage, ModelMessage, ToolCallRequest, ToolCallResult,
};

/// Why a message could not be appended.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConversationError {
    /// The system prompt is only set on an empty conversation.
    #[error("the system prompt can only be set on an empty conversation")]
    SystemAlreadySet,
    /// Tool calls are still waiting for their results.
    #[error("{0} tool call(s) are still waiting for results")]
    PendingToolCalls(usize),
    /// Tool results were appended while no tool call was pending.
    #[error("no tool call is waiting for results")]
    NoPendingToolCalls,
    /// A result answers no pending tool call.
    #[error("tool result `{0}` does not answer a pending tool call")]
    UnexpectedToolResult(String),
    /// Two results answer the same tool call.
    #[error("tool call `{0}` is answered more than once")]
    DuplicateToolResult(String),
    /// A pending tool call got no result.
    #[error("tool call `{0}` has no result")]
    MissingToolResult(String),
}

/// Represents a conversation.
///
/// The conversation is the transcript sent to the model on every request.
/// It only grows, except through [`Conversation::rollback`]. Tool results
/// are appended a whole batch at a time, so a conversation is either
/// consistent or waiting on exactly the tool calls of its last assistant
/// message.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    items: Vec<Item>,
}

/// An item in the conversation.
#[derive(Clone, Debug)]
pub struct Item {
    pub(crate) msg: ModelMessage,
    pub(crate) transcript: String,
}

impl Item {
    /// Returns the message sent to the model.
    #[inline]
    pub fn message(&self) -> &ModelMessage {
        &self.msg
    }

    /// Returns the transcript of this item.
    ///
    /// The transcript is a string representation of the message item,
    /// which can be exported later. But transcript alone is not enough
    /// to reconstruct the message item.
    #[inline]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// A position in a conversation to roll back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint(usize);

impl Conversation {
    /// Creates a conversation starting with a system prompt.
    pub fn with_system_prompt<S: Into<String>>(prompt: S) -> Self {
        let prompt = prompt.into();
        Self {
            items: vec![Item {
                msg: ModelMessage::System(prompt.clone()),
                transcript: prompt,
            }],
        }
    }

    /// Sets the system prompt; only allowed while the conversation is empty.
    pub fn set_system<S: Into<String>>(
        &mut self,
        prompt: S,
    ) -> Result<(), ConversationError> {
        if !self.items.is_empty() {
            return Err(ConversationError::SystemAlreadySet);
        }
        let prompt = prompt.into();
        self.items.push(Item {
            msg: ModelMessage::System(prompt.clone()),
            transcript: prompt,
        });
        Ok(())
    }

    /// Appends a user message.
    pub fn push_user<S: Into<String>>(
        &mut self,
        text: S,
    ) -> Result<(), ConversationError> {
        self.ensure_consistent()?;
        let text = text.into();
        self.items.push(Item {
            msg: ModelMessage::User(text.clone()),
            transcript: text,
        });
        Ok(())
    }

    /// Appends an assistant message along with any tool calls it makes.
    pub fn push_assistant(
        &mut self,
        msg: AssistantMessage,
    ) -> Result<(), ConversationError> {
        self.ensure_consistent()?;
        let transcript = msg.content.clone();
        self.items.push(Item {
            msg: ModelMessage::Assistant(msg),
            transcript,
        });
        Ok(())
    }

    /// Appends the results of the pending tool calls as one batch.
    ///
    /// The batch must answer every pending call exactly once, otherwise
    /// nothing is appended.
    pub fn push_tool_results<I>(
        &mut self,
        results: I,
    ) -> Result<(), ConversationError>
    where
        I: IntoIterator<Item = ToolCallResult>,
    {
        let results: Vec<_> = results.into_iter().collect();
        let pending = self.pending_tool_calls();
        if pending.is_empty() {
            return Err(ConversationError::NoPendingToolCalls);
        }

        let pending_ids: HashSet<&str> =
            pending.iter().map(|req| req.id.as_str()).collect();
        let mut answered = HashSet::with_capacity(results.len());
        for result in &results {
            if !pending_ids.contains(result.id.as_str()) {
                return Err(ConversationError::UnexpectedToolResult(
                    result.id.clone(),
                ));
            }
            if !answered.insert(result.id.as_str()) {
                return Err(ConversationError::DuplicateToolResult(
                    result.id.clone(),
                ));
            }
        }
        if let Some(missing) =
            pending.iter().find(|req| !answered.contains(req.id.as_str()))
        {
            return Err(ConversationError::MissingToolResult(missing.id.clone()));
        }

        self.items.extend(results.into_iter().map(|result| Item {
            transcript: format!("[{}] {}", result.name, result.content),
            msg: ModelMessage::Tool(result),
        }));
        Ok(())
    }

    /// Returns the tool calls still waiting for results.
    pub fn pending_tool_calls(&self) -> &[ToolCallRequest] {
        match self.items.last().map(|item| &item.msg) {
            Some(ModelMessage::Assistant(msg)) => &msg.tool_calls,
            _ => &[],
        }
    }

    /// Returns `true` unless tool calls are waiting for results.
    ///
    /// Only a consistent conversation can be sent to the model.
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.pending_tool_calls().is_empty()
    }

    /// Marks the current position.
    #[inline]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.items.len())
    }

    /// Drops everything appended after `checkpoint`.
    #[inline]
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.items.truncate(checkpoint.0);
    }

    /// Drops a trailing assistant message whose tool calls were never
    /// answered. Returns `true` if anything was removed.
    pub fn rollback_to_consistent(&mut self) -> bool {
        if self.is_consistent() {
            return false;
        }
        self.items.pop();
        true
    }

    /// Returns the number of tool-role messages.
    pub fn tool_message_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.msg, ModelMessage::Tool(_)))
            .count()
    }

    /// Returns the messages in order.
    pub fn messages(&self) -> impl Iterator<Item = &ModelMessage> {
        self.items.iter().map(|item| &item.msg)
    }

    /// Returns the items in order.
    #[inline]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the conversation has no message.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn ensure_consistent(&self) -> Result<(), ConversationError> {
        match self.pending_tool_calls().len() {
            0 => Ok(()),
            n => Err(ConversationError::PendingToolCalls(n)),
        }
    }
}
