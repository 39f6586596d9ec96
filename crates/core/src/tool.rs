//! Tool call supports.

mod error;
mod invoker;
mod output;
mod registry;
pub mod schema;

use std::pin::Pin;

use data_agent_model::{ModelTool, ToolCallResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use error::{Error, ErrorKind};
pub use invoker::{ExecutionMode, ToolInvoker};
pub use output::{Artifact, Table, ToolOutput};
pub use registry::{RegistryError, ToolRegistry, ToolRegistryBuilder};

use crate::display;

/// What a tool call produced: a payload, or a failure to report back to the
/// model as text.
pub type ToolOutcome = Result<ToolOutput, Error>;

/// A boxed future resolving to a [`ToolOutcome`].
pub type BoxToolFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as a database handle. To do this,
/// make the context an immutable state of the tool, which can be set during
/// initialization, and clone it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolOutcome> + Send + 'static;
}

/// The static description of a tool, advertised to the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolSpec {
    /// Creates a spec.
    #[inline]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    #[inline]
    pub(crate) fn to_model_tool(&self) -> ModelTool {
        ModelTool {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// A type-erased, executable capability.
///
/// Arguments reaching a handler have already been validated against the
/// tool's parameter schema.
pub trait ToolHandler: Send + Sync + 'static {
    /// Runs the tool with raw arguments.
    fn call(&self, arguments: Value) -> BoxToolFuture;
}

pub(crate) struct TypedHandler<T: Tool>(pub T);

impl<T: Tool> ToolHandler for TypedHandler<T> {
    fn call(&self, arguments: Value) -> BoxToolFuture {
        let input: T::Input = match serde_json::from_value(arguments) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(ToolOutcome::Err(
                    Error::invalid_input().with_reason(reason),
                )));
            }
        };
        Box::pin(self.0.execute(input))
    }
}

pub(crate) struct FnHandler<F>(pub F);

impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolOutcome> + Send + 'static,
{
    #[inline]
    fn call(&self, arguments: Value) -> BoxToolFuture {
        Box::pin((self.0)(arguments))
    }
}

/// The result of one tool call, as produced by [`ToolInvoker`].
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    /// Id of the request this result answers.
    pub tool_call_id: String,
    /// Name of the requested tool.
    pub name: String,
    /// What the call produced.
    pub outcome: ToolOutcome,
    /// Whether the tool's artifacts are shown to the user instead of being
    /// summarized to the model.
    pub is_visible: bool,
}

impl ToolResult {
    /// Returns `true` if the call failed.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Renders the content the model will read for this result.
    pub fn to_model_text(&self) -> String {
        match &self.outcome {
            Ok(ToolOutput::Artifact(artifact)) if self.is_visible => {
                display::placeholder(artifact)
            }
            Ok(output) => output.to_model_text(),
            Err(err) => err.to_string(),
        }
    }

    /// Converts this result into its tool-role message body.
    #[inline]
    pub fn to_call_result(&self) -> ToolCallResult {
        ToolCallResult {
            id: self.tool_call_id.clone(),
            name: self.name.clone(),
            content: self.to_model_text(),
        }
    }
}
