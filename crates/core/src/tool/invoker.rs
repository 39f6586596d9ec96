use std::sync::Arc;

use data_agent_model::ToolCallRequest;
use futures_util::future::join_all;
use tracing::Instrument;

use super::{Error, ToolOutcome, ToolOutput, ToolRegistry, ToolResult, schema};

/// How a batch of tool calls is executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One call after another, in request order.
    #[default]
    Sequential,
    /// All calls at once; results still come back in request order.
    Concurrent,
}

/// Executes tool call requests against a [`ToolRegistry`].
///
/// Every request yields exactly one [`ToolResult`]. Unknown tools, bad
/// arguments and handler failures all become error results, so a failing
/// call never aborts its siblings.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    mode: ExecutionMode,
}

impl ToolInvoker {
    /// Creates an invoker running calls sequentially.
    #[inline]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            mode: ExecutionMode::default(),
        }
    }

    /// Sets the execution mode.
    #[inline]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the registry this invoker dispatches to.
    #[inline]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Runs a batch of requests, returning results in request order.
    pub async fn invoke(&self, requests: &[ToolCallRequest]) -> Vec<ToolResult> {
        let span = debug_span!("tool invoker", batch = requests.len());
        async {
            match self.mode {
                ExecutionMode::Sequential => {
                    let mut results = Vec::with_capacity(requests.len());
                    for req in requests {
                        results.push(self.invoke_one(req).await);
                    }
                    results
                }
                ExecutionMode::Concurrent => {
                    join_all(requests.iter().map(|req| self.invoke_one(req)))
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn invoke_one(&self, req: &ToolCallRequest) -> ToolResult {
        info!(
            "calling tool `{}` ({}) with arguments: {}",
            req.name, req.id, req.arguments
        );

        let outcome = self
            .run(req)
            .instrument(debug_span!("tool execute", name = %req.name))
            .await;
        match &outcome {
            Ok(output) => info!(
                "tool `{}` ({}) succeeded: {}",
                req.name,
                req.id,
                summarize(output)
            ),
            Err(err) => warn!("tool `{}` ({}) failed: {err}", req.name, req.id),
        }

        ToolResult {
            tool_call_id: req.id.clone(),
            name: req.name.clone(),
            outcome,
            is_visible: self.registry.is_excluded(&req.name),
        }
    }

    async fn run(&self, req: &ToolCallRequest) -> ToolOutcome {
        let handler = self.registry.resolve(&req.name)?;
        if let Some(spec) = self.registry.spec(&req.name) {
            schema::validate(&spec.parameters, &req.arguments)
                .map_err(|reason| Error::invalid_input().with_reason(reason))?;
        }
        handler.call(req.arguments.clone()).await
    }
}

fn summarize(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Text(text) => format!("{} chars of text", text.len()),
        ToolOutput::Table(table) => format!(
            "{} rows x {} columns",
            table.rows.len(),
            table.columns.len()
        ),
        ToolOutput::Artifact(artifact) => {
            format!("artifact \"{}\"", artifact.title())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::{ErrorKind, Table, Tool, ToolSpec};

    struct LookupTool {
        schema: Value,
    }

    #[derive(Deserialize)]
    struct LookupInput {
        sql_query: String,
    }

    impl Tool for LookupTool {
        type Input = LookupInput;

        fn name(&self) -> &str {
            "query_db"
        }

        fn description(&self) -> &str {
            "Runs a query"
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolOutcome> + Send + 'static {
            async move {
                if input.sql_query.contains("FROM nowhere") {
                    return Err(Error::execution_error()
                        .with_reason("no such table: nowhere"));
                }
                Ok(Table {
                    columns: vec!["n".to_owned()],
                    rows: vec![vec![json!(1)]],
                    truncated_rows: 0,
                }
                .into())
            }
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let lookup = LookupTool {
            schema: json!({
                "type": "object",
                "properties": { "sql_query": { "type": "string" } },
                "required": ["sql_query"]
            }),
        };
        let slow = ToolSpec::new(
            "slow",
            "Sleeps, then echoes",
            json!({ "type": "object", "properties": { "ms": { "type": "integer" } } }),
        );
        let registry = ToolRegistry::builder()
            .with_tool(lookup)
            .register(slow, |args: Value| async move {
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ToolOutput::Text(format!("slept {ms}")))
            })
            .build()
            .unwrap();
        Arc::new(registry)
    }

    fn request(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_one_result_per_request() {
        let invoker = ToolInvoker::new(registry());
        let requests = [
            request("1", "query_db", json!({ "sql_query": "SELECT 1" })),
            request("2", "delete_everything", json!({})),
            request("3", "query_db", json!({ "query": "SELECT 1" })),
            request("4", "query_db", json!({ "sql_query": "SELECT * FROM nowhere" })),
            request("5", "query_db", Value::String("{oops".to_owned())),
            request("6", "query_db", json!({ "sql_query": "SELECT 2" })),
        ];

        let results = invoker.invoke(&requests).await;
        let ids: Vec<_> =
            results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3", "4", "5", "6"]);

        let kinds: Vec<_> = results
            .iter()
            .map(|r| r.outcome.as_ref().err().map(Error::kind))
            .collect();
        assert_eq!(
            kinds,
            [
                None,
                Some(ErrorKind::UnknownTool),
                Some(ErrorKind::InvalidInput),
                Some(ErrorKind::ExecutionError),
                Some(ErrorKind::InvalidInput),
                None,
            ]
        );
        assert_eq!(
            results[1].to_model_text(),
            "Error: Unknown tool: no tool named `delete_everything` is available"
        );
        assert_eq!(
            results[2].to_model_text(),
            "Error: Invalid arguments: arguments: missing required property `sql_query`"
        );
        assert_eq!(results[0].to_model_text(), "| n |\n| --- |\n| 1 |\n");
    }

    #[tokio::test]
    async fn test_concurrent_preserves_order() {
        let invoker =
            ToolInvoker::new(registry()).with_mode(ExecutionMode::Concurrent);
        let requests = [
            request("a", "slow", json!({ "ms": 30 })),
            request("b", "slow", json!({ "ms": 1 })),
            request("c", "slow", json!({ "ms": 10 })),
        ];

        let results = invoker.invoke(&requests).await;
        let texts: Vec<_> = results.iter().map(|r| r.to_model_text()).collect();
        assert_eq!(texts, ["slept 30", "slept 1", "slept 10"]);
    }

    #[tokio::test]
    async fn test_sequential_runs_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let spec = ToolSpec::new("record", "Records calls", json!({}));
        let registry = ToolRegistry::builder()
            .register(spec, {
                let order = Arc::clone(&order);
                move |args: Value| {
                    let order = Arc::clone(&order);
                    async move {
                        let ms = args["ms"].as_u64().unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        order.lock().unwrap().push(ms);
                        Ok(ToolOutput::Text(String::new()))
                    }
                }
            })
            .build()
            .unwrap();

        let invoker = ToolInvoker::new(Arc::new(registry));
        invoker
            .invoke(&[
                request("a", "record", json!({ "ms": 20 })),
                request("b", "record", json!({ "ms": 1 })),
            ])
            .await;
        assert_eq!(*order.lock().unwrap(), [20, 1]);
    }
}
