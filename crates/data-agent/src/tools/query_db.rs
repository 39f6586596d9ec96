use std::sync::Arc;

use data_agent_core::tool::{Error as ToolError, Tool, ToolOutcome, ToolOutput};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use crate::db::Database;

#[derive(Deserialize, JsonSchema)]
pub struct QueryDbParameters {
    #[schemars(
        description = "Complete and correct SQL query to fulfill the user request."
    )]
    sql_query: String,
}

/// A tool for running SQL against the session's database.
pub struct QueryDbTool {
    database: Arc<dyn Database>,
    parameter_schema: Value,
}

impl QueryDbTool {
    /// Creates a query tool over `database`.
    #[inline]
    pub fn new(database: Arc<dyn Database>) -> Self {
        QueryDbTool {
            database,
            parameter_schema: schema_for!(QueryDbParameters).to_value(),
        }
    }
}

impl Tool for QueryDbTool {
    type Input = QueryDbParameters;

    fn name(&self) -> &str {
        "query_db"
    }

    fn description(&self) -> &str {
        "Fetches data from the database by running a SQL query. \
         The result is returned as a table."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: QueryDbParameters,
    ) -> impl Future<Output = ToolOutcome> + Send + 'static {
        let database = Arc::clone(&self.database);
        async move {
            match database.query(&input.sql_query).await {
                Ok(table) => Ok(ToolOutput::Table(table)),
                Err(err) => Err(ToolError::execution_error().with_reason(
                    format!("Error while executing the query: {err}"),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use data_agent_core::tool::ToolRegistry;
    use rusqlite::Connection;

    use super::*;
    use crate::db::SqliteDatabase;

    fn tool() -> (tempfile::TempDir, QueryDbTool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factory.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE production (month TEXT, units INTEGER);
                 INSERT INTO production VALUES ('2024-01', 120);",
            )
            .unwrap();
        (dir, QueryDbTool::new(Arc::new(SqliteDatabase::open(path))))
    }

    #[test]
    fn test_parameter_schema() {
        let (_dir, tool) = tool();
        let schema = tool.parameter_schema();
        assert_eq!(schema["required"], serde_json::json!(["sql_query"]));
        assert_eq!(schema["properties"]["sql_query"]["type"], "string");
    }

    #[tokio::test]
    async fn test_query_result_is_markdown() {
        let (_dir, tool) = tool();
        let output = tool
            .execute(QueryDbParameters {
                sql_query: "SELECT * FROM production".to_owned(),
            })
            .await
            .unwrap();
        assert_eq!(
            output.to_model_text(),
            "| month | units |\n| --- | --- |\n| 2024-01 | 120 |\n"
        );
    }

    #[tokio::test]
    async fn test_query_error_is_reported() {
        let (_dir, tool) = tool();
        let err = tool
            .execute(QueryDbParameters {
                sql_query: "SELECT * FROM missing_table".to_owned(),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error: Execution error: Error while executing the query: \
             no such table: missing_table"
        );
    }

    #[test]
    fn test_registers_with_schema() {
        let (_dir, tool) = tool();
        let registry = ToolRegistry::builder().with_tool(tool).build().unwrap();
        let spec = registry.spec("query_db").unwrap();
        assert!(spec.description.contains("SQL"));
    }
}
