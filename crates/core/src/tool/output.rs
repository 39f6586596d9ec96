use bytes::Bytes;
use mime::Mime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A successful tool payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    /// Plain text.
    Text(String),
    /// Tabular data, typically a query result.
    Table(Table),
    /// A renderable artifact such as a chart.
    Artifact(Artifact),
}

impl ToolOutput {
    /// Renders the payload as the text the model will read.
    pub fn to_model_text(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Table(table) => table.to_markdown(),
            ToolOutput::Artifact(Artifact::Figure { figure, .. }) => {
                figure.to_string()
            }
            ToolOutput::Artifact(Artifact::Image { title, mime, .. }) => {
                format!("[{mime} image \"{title}\" omitted]")
            }
        }
    }

    /// Returns the artifact if this payload is renderable.
    #[inline]
    pub fn as_artifact(&self) -> Option<&Artifact> {
        match self {
            ToolOutput::Artifact(artifact) => Some(artifact),
            _ => None,
        }
    }
}

impl From<String> for ToolOutput {
    #[inline]
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<Table> for ToolOutput {
    #[inline]
    fn from(table: Table) -> Self {
        ToolOutput::Table(table)
    }
}

impl From<Artifact> for ToolOutput {
    #[inline]
    fn from(artifact: Artifact) -> Self {
        ToolOutput::Artifact(artifact)
    }
}

/// Rows with named columns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows of cell values, one per column.
    pub rows: Vec<Vec<Value>>,
    /// Rows left out after `rows`, when the result was capped.
    #[serde(default)]
    pub truncated_rows: usize,
}

impl Table {
    /// Renders the table in GitHub-flavored Markdown.
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return "(no columns)".to_owned();
        }

        let mut out = String::new();
        push_row(&mut out, self.columns.iter().map(|c| escape_cell(c)));
        push_row(&mut out, self.columns.iter().map(|_| "---".to_owned()));
        for row in &self.rows {
            push_row(&mut out, row.iter().map(format_cell));
        }
        if self.truncated_rows > 0 {
            out.push_str(&format!(
                "({} more rows truncated)\n",
                self.truncated_rows
            ));
        } else if self.rows.is_empty() {
            out.push_str("(0 rows)\n");
        }
        out
    }
}

fn push_row(out: &mut String, cells: impl Iterator<Item = String>) {
    out.push('|');
    for cell in cells {
        out.push(' ');
        out.push_str(&cell);
        out.push_str(" |");
    }
    out.push('\n');
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::String(s) => escape_cell(s),
        other => escape_cell(&other.to_string()),
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

/// Something the user should see rather than the model read.
#[derive(Clone, Debug, PartialEq)]
pub enum Artifact {
    /// A declarative figure, e.g. a Plotly figure object.
    Figure {
        /// Chart title.
        title: String,
        /// The figure document.
        figure: Value,
    },
    /// An encoded image.
    Image {
        /// Image title.
        title: String,
        /// Encoding of `data`.
        mime: Mime,
        /// Encoded image bytes.
        data: Bytes,
    },
}

impl Artifact {
    /// Returns the human-readable title.
    #[inline]
    pub fn title(&self) -> &str {
        match self {
            Artifact::Figure { title, .. } | Artifact::Image { title, .. } => {
                title
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_markdown_table() {
        let table = Table {
            columns: vec!["month".to_owned(), "units".to_owned()],
            rows: vec![
                vec![json!("2024-01"), json!(120)],
                vec![json!("a|b"), Value::Null],
            ],
            truncated_rows: 0,
        };
        assert_eq!(
            table.to_markdown(),
            "| month | units |\n| --- | --- |\n| 2024-01 | 120 |\n| a\\|b | NULL |\n"
        );

        let empty = Table {
            columns: vec!["id".to_owned()],
            rows: vec![],
            truncated_rows: 0,
        };
        assert!(empty.to_markdown().ends_with("(0 rows)\n"));

        let capped = Table {
            columns: vec!["id".to_owned()],
            rows: vec![vec![json!(1)], vec![json!(2)]],
            truncated_rows: 98,
        };
        assert_eq!(
            capped.to_markdown(),
            "| id |\n| --- |\n| 1 |\n| 2 |\n(98 more rows truncated)\n"
        );
    }

    #[test]
    fn test_image_not_inlined() {
        let output = ToolOutput::Artifact(Artifact::Image {
            title: "Sales".to_owned(),
            mime: mime::IMAGE_PNG,
            data: Bytes::from_static(b"\x89PNG"),
        });
        assert_eq!(output.to_model_text(), "[image/png image \"Sales\" omitted]");
    }
}
