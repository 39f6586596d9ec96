use std::sync::Arc;
use std::time::Duration;

use data_agent_model::ModelProvider;

use crate::error::BuildError;
use crate::model_client::{ModelClient, RetryPolicy};
use crate::tool::{ExecutionMode, ToolInvoker, ToolRegistry, ToolRegistryBuilder};

/// The default bound on tool rounds per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

type ClientFactory = Box<dyn FnOnce(RetryPolicy) -> ModelClient + Send>;

enum Tools {
    Shared(Arc<ToolRegistry>),
    Builder(ToolRegistryBuilder),
}

/// Process-wide, read-only configuration shared by every session.
///
/// Build it once with [`AgentBuilder`] and hand the same `Arc` to each
/// [`Agent`](crate::Agent) or [`OrchestrationLoop`](crate::OrchestrationLoop).
pub struct AgentConfig {
    pub(crate) model_client: ModelClient,
    pub(crate) invoker: ToolInvoker,
    pub(crate) max_iterations: usize,
    pub(crate) system_prompt: Option<String>,
}

impl AgentConfig {
    /// Returns the tool registry.
    #[inline]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.invoker.registry()
    }

    /// Returns the maximum number of tool rounds per turn.
    #[inline]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Returns the system prompt new conversations start with.
    #[inline]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Returns the model provider's name.
    #[inline]
    pub fn model_name(&self) -> &str {
        self.model_client.name()
    }
}

/// [`AgentConfig`] builder.
pub struct AgentBuilder {
    client_factory: ClientFactory,
    tools: Tools,
    system_prompt: Option<String>,
    max_iterations: usize,
    mode: ExecutionMode,
    retry: RetryPolicy,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            client_factory: Box::new(move |policy| {
                ModelClient::new(provider, policy)
            }),
            tools: Tools::Builder(ToolRegistry::builder()),
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            mode: ExecutionMode::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Uses the tools from `builder`, validated when the config is built.
    #[inline]
    pub fn with_tools(mut self, builder: ToolRegistryBuilder) -> Self {
        self.tools = Tools::Builder(builder);
        self
    }

    /// Uses an already built, possibly shared, registry.
    #[inline]
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tools = Tools::Shared(registry);
        self
    }

    /// Sets the system prompt every conversation starts with.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the maximum number of tool rounds per turn.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets how a batch of tool calls is executed.
    #[inline]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets how many times a transient provider failure is retried.
    #[inline]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    #[inline]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry.initial_interval = interval;
        self
    }

    /// Builds the shared configuration.
    pub fn build(self) -> Result<Arc<AgentConfig>, BuildError> {
        if self.max_iterations == 0 {
            return Err(BuildError::ZeroIterations);
        }
        let registry = match self.tools {
            Tools::Shared(registry) => registry,
            Tools::Builder(builder) => Arc::new(builder.build()?),
        };
        let model_client = (self.client_factory)(self.retry);
        info!(
            "agent configured: model {}, {} tools, max {} iterations, {:?} execution",
            model_client.name(),
            registry.len(),
            self.max_iterations,
            self.mode
        );

        Ok(Arc::new(AgentConfig {
            model_client,
            invoker: ToolInvoker::new(registry).with_mode(self.mode),
            max_iterations: self.max_iterations,
            system_prompt: self.system_prompt,
        }))
    }
}
