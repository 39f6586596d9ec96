use std::sync::Arc;
use std::time::Duration;

use data_agent_core::conversation::Conversation;
use data_agent_core::tool::{ExecutionMode, ToolRegistry};
use data_agent_core::{Agent, AgentBuilder, AgentConfig, BuildError, ChatSink};
use data_agent_model::ModelProvider;

use crate::db::{Database, DatabaseError};
use crate::tools::*;

/// Where the table DDL goes in a system prompt template.
pub const TABLE_INFO_PLACEHOLDER: &str = "{{TABLE_INFO}}";

const DEFAULT_PROMPT_TEMPLATE: &str = include_str!("./system_prompt.md");

/// Error type for [`SessionBuilder::build`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No database was configured.
    #[error("no database configured")]
    MissingDatabase,
    /// The schema could not be read.
    #[error("cannot read the database schema: {0}")]
    Schema(#[from] DatabaseError),
    /// The agent configuration is invalid.
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    database: Option<Arc<dyn Database>>,
    prompt_template: String,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self {
            agent_builder,
            database: None,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_owned(),
        }
    }

    /// Sets the database the agent analyzes.
    #[inline]
    pub fn with_database<D: Database>(mut self, database: D) -> Self {
        self.database = Some(Arc::new(database));
        self
    }

    /// Replaces the system prompt template.
    ///
    /// Every occurrence of [`TABLE_INFO_PLACEHOLDER`] is replaced with the
    /// database schema.
    #[inline]
    pub fn with_prompt_template<S: Into<String>>(mut self, template: S) -> Self {
        self.prompt_template = template.into();
        self
    }

    /// Sets how many tool rounds a single turn may run.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.agent_builder =
            self.agent_builder.with_max_iterations(max_iterations);
        self
    }

    /// Sets whether the tool calls of one model reply run concurrently.
    #[inline]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.agent_builder = self.agent_builder.with_execution_mode(mode);
        self
    }

    /// Sets how many times a transient model failure is retried.
    #[inline]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.agent_builder = self.agent_builder.with_max_retries(max_retries);
        self
    }

    /// Sets the delay before the first retry.
    #[inline]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.agent_builder = self.agent_builder.with_retry_interval(interval);
        self
    }

    /// Reads the database schema and assembles the tools and the system
    /// prompt.
    ///
    /// The result can start any number of sessions.
    pub async fn build(self) -> Result<SessionConfig, SessionError> {
        let database = self.database.ok_or(SessionError::MissingDatabase)?;
        let table_info = database.table_info().await?;
        debug!("schema has {} lines", table_info.lines().count());

        let tools = ToolRegistry::builder()
            .with_tool(QueryDbTool::new(Arc::clone(&database)))
            .with_tool(PlotChartTool::new())
            .exclude_from_summary("plot_chart");
        let config = self
            .agent_builder
            .with_tools(tools)
            .with_system_prompt(render_system_prompt(
                &self.prompt_template,
                &table_info,
            ))
            .build()?;

        Ok(SessionConfig { config })
    }
}

/// Fills the schema into a system prompt template.
pub fn render_system_prompt(template: &str, table_info: &str) -> String {
    template.replace(TABLE_INFO_PLACEHOLDER, table_info.trim())
}

/// A fully assembled agent configuration, shared by the sessions it starts.
#[derive(Clone)]
pub struct SessionConfig {
    config: Arc<AgentConfig>,
}

impl SessionConfig {
    /// Returns the system prompt every session starts with.
    #[inline]
    pub fn system_prompt(&self) -> Option<&str> {
        self.config.system_prompt()
    }

    /// Starts a session that reports to `sink`.
    #[inline]
    pub fn start(&self, sink: Arc<dyn ChatSink>) -> Session {
        Session {
            agent: Agent::spawn(Arc::clone(&self.config), sink),
        }
    }

    /// Starts a session whose `on_idle` callback fires when it has handled
    /// every message sent so far.
    #[inline]
    pub fn start_with_idle(
        &self,
        sink: Arc<dyn ChatSink>,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Session {
        Session {
            agent: Agent::spawn_with_idle(Arc::clone(&self.config), sink, on_idle),
        }
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
}

impl Session {
    /// Sends a message to the session.
    #[inline]
    pub fn send_message(&self, message: &str) {
        self.agent.enqueue_user_input(message);
    }

    /// Cancels the answer in progress.
    #[inline]
    pub fn cancel(&self) {
        self.agent.cancel_turn();
    }

    /// Returns the conversation so far, once queued messages are handled.
    #[inline]
    pub async fn conversation(&self) -> Option<Conversation> {
        self.agent.conversation().await
    }

    /// Ends the session.
    #[inline]
    pub async fn close(self) {
        self.agent.shutdown().await;
    }
}
