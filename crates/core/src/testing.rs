//! Collaborator doubles shared by the scenario tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::sink::ChatSink;
use crate::tool::{
    Artifact, Error, Table, ToolOutput, ToolRegistry, ToolRegistryBuilder,
    ToolSpec,
};

#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Send(String),
    Update(String),
    Artifact { caption: String, artifact: Artifact },
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Send(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn artifacts(&self) -> Vec<(String, Artifact)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Artifact { caption, artifact } => {
                    Some((caption, artifact))
                }
                _ => None,
            })
            .collect()
    }
}

impl ChatSink for RecordingSink {
    fn send(&self, text: &str) {
        self.events.lock().unwrap().push(SinkEvent::Send(text.to_owned()));
    }

    fn update(&self, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Update(text.to_owned()));
    }

    fn send_artifact(&self, artifact: &Artifact, caption: &str) {
        self.events.lock().unwrap().push(SinkEvent::Artifact {
            caption: caption.to_owned(),
            artifact: artifact.clone(),
        });
    }
}

/// Tools backed by a stub database: `query_db` answers every query with
/// monthly production, unless it mentions `missing_table`. `plot_chart`
/// returns a figure, `slow_query` sleeps for the given seconds.
pub fn data_tools() -> ToolRegistryBuilder {
    let query_db = ToolSpec::new(
        "query_db",
        "Runs a SQL query",
        json!({
            "type": "object",
            "properties": { "sql_query": { "type": "string" } },
            "required": ["sql_query"]
        }),
    );
    let plot_chart = ToolSpec::new(
        "plot_chart",
        "Plots a chart",
        json!({
            "type": "object",
            "properties": {
                "plot_title": { "type": "string" },
                "x_values": { "type": "array", "items": { "type": "string" } },
                "y_values": { "type": "array", "items": { "type": "number" } }
            },
            "required": ["plot_title", "x_values", "y_values"]
        }),
    );
    let slow_query = ToolSpec::new(
        "slow_query",
        "Runs a slow query",
        json!({ "type": "object", "properties": { "secs": { "type": "integer" } } }),
    );

    ToolRegistry::builder()
        .register(query_db, |args: Value| async move {
            let sql = args["sql_query"].as_str().unwrap_or_default();
            if sql.contains("missing_table") {
                return Err(Error::execution_error().with_reason(
                    "Error while executing the query: no such table: missing_table",
                ));
            }
            Ok(Table {
                columns: vec!["month".to_owned(), "units".to_owned()],
                rows: vec![
                    vec![json!("2024-01"), json!(120)],
                    vec![json!("2024-02"), json!(95)],
                ],
                truncated_rows: 0,
            }
            .into())
        })
        .register(plot_chart, |args: Value| async move {
            Ok(ToolOutput::Artifact(Artifact::Figure {
                title: args["plot_title"].as_str().unwrap_or_default().to_owned(),
                figure: json!({
                    "data": [{
                        "type": "bar",
                        "x": args["x_values"],
                        "y": args["y_values"]
                    }]
                }),
            }))
        })
        .register(slow_query, |args: Value| async move {
            let secs = args["secs"].as_u64().unwrap_or(60);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(ToolOutput::Text("done".to_owned()))
        })
        .exclude_from_summary("plot_chart")
}

pub fn recording_sink() -> (Arc<RecordingSink>, Arc<dyn ChatSink>) {
    let sink = Arc::new(RecordingSink::default());
    let erased: Arc<dyn ChatSink> = sink.clone();
    (sink, erased)
}
