use data_agent_core::tool::{
    Artifact, Error as ToolError, Tool, ToolOutcome, ToolOutput,
};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Map, Value, json};

const BAR_COLOR: &str = "#24C8BF";
const LINE_COLOR: &str = "#ff9900";
const SCATTER_COLOR: &str = "#df84ff";
const BACKGROUND: &str = "#f8f8f8";

/// The kinds of chart [`PlotChartTool`] can draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlotType {
    /// Vertical bars.
    Bar,
    /// Lines with markers.
    Line,
    /// Markers only.
    Scatter,
    /// Filled area under the line.
    Area,
    /// Pie chart of `y_values` labelled by `x_values`.
    Pie,
    /// Pie chart with a hole.
    Donut,
    /// Bars of `y_values` and `y2_values` stacked.
    StackedBar,
    /// Areas of `y_values` and `y2_values` stacked.
    StackedArea,
    /// A gauge showing the first value.
    Gauge,
    /// Markers sized by `y2_values`, or by `y_values` without it.
    Bubble,
    /// Bars for `y_values` with a line for `y2_values`.
    Combo,
}

impl PlotType {
    fn label(self) -> &'static str {
        match self {
            PlotType::Bar => "Bar",
            PlotType::Line => "Line",
            PlotType::Scatter => "Scatter",
            PlotType::Area => "Area",
            PlotType::Pie => "Pie",
            PlotType::Donut => "Donut",
            PlotType::StackedBar => "Stacked bar",
            PlotType::StackedArea => "Stacked area",
            PlotType::Gauge => "Gauge",
            PlotType::Bubble => "Bubble",
            PlotType::Combo => "Combo",
        }
    }

    fn is_stacked(self) -> bool {
        matches!(self, PlotType::StackedBar | PlotType::StackedArea)
    }

    fn has_axes(self) -> bool {
        !matches!(self, PlotType::Pie | PlotType::Donut | PlotType::Gauge)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlotChartParameters {
    #[schemars(description = "Plot type: bar, line, scatter, etc.")]
    plot_type: PlotType,
    #[schemars(description = "List of x-values for plotting.")]
    x_values: Vec<String>,
    #[schemars(description = "List of y-axis values for plotting.")]
    y_values: Vec<f64>,
    #[schemars(
        description = "Second series, same length as x_values. Required for combo charts."
    )]
    #[serde(default)]
    y2_values: Option<Vec<f64>>,
    #[schemars(description = "Descriptive title for the plot.")]
    plot_title: String,
    #[schemars(description = "Label for the x-axis.")]
    x_label: String,
    #[schemars(description = "Label for the y-axis.")]
    y_label: String,
}

/// A tool for visualizing query results as a Plotly figure.
///
/// The figure goes to the user; the model only learns that it was shown.
pub struct PlotChartTool {
    parameter_schema: Value,
}

impl PlotChartTool {
    /// Creates a new chart tool.
    #[inline]
    pub fn new() -> Self {
        PlotChartTool {
            parameter_schema: schema_for!(PlotChartParameters).to_value(),
        }
    }
}

impl Default for PlotChartTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for PlotChartTool {
    type Input = PlotChartParameters;

    fn name(&self) -> &str {
        "plot_chart"
    }

    fn description(&self) -> &str {
        "Plots a chart to visualize the result of a SQL query. \
         Supported types: bar, line, scatter, area, pie, donut, stacked_bar, \
         stacked_area, gauge, bubble and combo (bars for y_values, a line \
         for y2_values)."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: PlotChartParameters,
    ) -> impl Future<Output = ToolOutcome> + Send + 'static {
        async move {
            let figure = build_figure(&input)?;
            Ok(ToolOutput::Artifact(Artifact::Figure {
                title: input.plot_title,
                figure,
            }))
        }
    }
}

fn invalid(reason: &str) -> ToolError {
    ToolError::invalid_input().with_reason(reason)
}

fn build_figure(input: &PlotChartParameters) -> Result<Value, ToolError> {
    let x = &input.x_values;
    let y = &input.y_values;
    if x.is_empty() {
        return Err(invalid("`x_values` must not be empty"));
    }
    if x.len() != y.len() {
        return Err(invalid(
            "Lengths of x_values and y_values must be the same.",
        ));
    }
    let y2 = match &input.y2_values {
        Some(y2) if y2.len() != x.len() => {
            return Err(invalid(
                "Lengths of x_values and y2_values must be the same.",
            ));
        }
        y2 => y2.as_deref(),
    };

    let data = match input.plot_type {
        PlotType::Bar => vec![bar(x, y, &input.y_label)],
        PlotType::Line => vec![json!({
            "type": "scatter",
            "mode": "lines+markers",
            "x": x,
            "y": y,
            "marker": { "color": LINE_COLOR, "size": 8 },
            "line": { "color": LINE_COLOR, "width": 2 },
        })],
        PlotType::Scatter => vec![json!({
            "type": "scatter",
            "mode": "markers",
            "x": x,
            "y": y,
            "marker": { "color": SCATTER_COLOR, "size": 10, "opacity": 0.7 },
        })],
        PlotType::Area => vec![json!({
            "type": "scatter",
            "mode": "none",
            "fill": "tozeroy",
            "fillcolor": "rgba(0,100,80,0.2)",
            "x": x,
            "y": y,
        })],
        PlotType::Pie => vec![pie(x, y, 0.0)],
        PlotType::Donut => vec![pie(x, y, 0.4)],
        PlotType::StackedBar => {
            let mut data = vec![bar(x, y, &input.y_label)];
            if let Some(y2) = y2 {
                data.push(json!({ "type": "bar", "x": x, "y": y2 }));
            }
            data
        }
        PlotType::StackedArea => [Some(y.as_slice()), y2]
            .into_iter()
            .flatten()
            .map(|series| {
                json!({
                    "type": "scatter",
                    "mode": "lines",
                    "stackgroup": "one",
                    "x": x,
                    "y": series,
                })
            })
            .collect(),
        PlotType::Gauge => {
            let max = y2
                .and_then(|y2| y2.first().copied())
                .unwrap_or_else(|| y.iter().copied().fold(f64::MIN, f64::max));
            vec![json!({
                "type": "indicator",
                "mode": "gauge+number",
                "value": y[0],
                "title": { "text": x[0] },
                "gauge": { "axis": { "range": [0, max] } },
            })]
        }
        PlotType::Bubble => {
            let sizes: Vec<f64> =
                y2.unwrap_or(y.as_slice()).iter().map(|v| v * 10.0).collect();
            vec![json!({
                "type": "scatter",
                "mode": "markers",
                "x": x,
                "y": y,
                "marker": { "size": sizes, "sizemode": "area" },
            })]
        }
        PlotType::Combo => {
            let Some(y2) = y2 else {
                return Err(invalid(
                    "For combo charts, provide y2_values of the same length as x_values.",
                ));
            };
            vec![
                bar(x, y, "Bar Data"),
                json!({
                    "type": "scatter",
                    "mode": "lines",
                    "name": "Line Data",
                    "x": x,
                    "y": y2,
                    "line": { "color": LINE_COLOR, "width": 2 },
                }),
            ]
        }
    };

    Ok(json!({ "data": data, "layout": layout(input) }))
}

fn bar(x: &[String], y: &[f64], name: &str) -> Value {
    json!({
        "type": "bar",
        "name": name,
        "x": x,
        "y": y,
        "marker": { "color": BAR_COLOR, "line": { "width": 1 } },
    })
}

fn pie(labels: &[String], values: &[f64], hole: f64) -> Value {
    json!({ "type": "pie", "labels": labels, "values": values, "hole": hole })
}

fn layout(input: &PlotChartParameters) -> Value {
    let mut layout = Map::new();
    layout.insert(
        "title".to_owned(),
        json!({
            "text": format!("{} {} Chart", input.plot_title, input.plot_type.label()),
            "font": { "size": 20, "family": "Arial", "color": "#333" },
        }),
    );
    if input.plot_type.has_axes() {
        layout.insert("xaxis".to_owned(), axis(&input.x_label));
        layout.insert("yaxis".to_owned(), axis(&input.y_label));
    }
    if input.plot_type.is_stacked() {
        layout.insert("barmode".to_owned(), json!("stack"));
    }
    layout.insert("margin".to_owned(), json!({ "l": 60, "r": 60, "t": 80, "b": 60 }));
    layout.insert("plot_bgcolor".to_owned(), json!(BACKGROUND));
    layout.insert("paper_bgcolor".to_owned(), json!(BACKGROUND));
    Value::Object(layout)
}

fn axis(title: &str) -> Value {
    json!({
        "title": { "text": title, "font": { "size": 18 } },
        "tickfont": { "size": 14 },
        "gridcolor": "#f0f0f0",
    })
}

#[cfg(test)]
mod tests {
    use data_agent_core::tool::ErrorKind;

    use super::*;

    fn params(plot_type: PlotType) -> PlotChartParameters {
        PlotChartParameters {
            plot_type,
            x_values: vec!["2024-01".to_owned(), "2024-02".to_owned()],
            y_values: vec![120.0, 95.0],
            y2_values: None,
            plot_title: "Production by month".to_owned(),
            x_label: "Month".to_owned(),
            y_label: "Units".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_bar_chart() {
        let output = PlotChartTool::new()
            .execute(params(PlotType::Bar))
            .await
            .unwrap();
        let ToolOutput::Artifact(Artifact::Figure { title, figure }) = output
        else {
            panic!("expected a figure");
        };
        assert_eq!(title, "Production by month");
        assert_eq!(figure["data"][0]["type"], "bar");
        assert_eq!(figure["data"][0]["x"], json!(["2024-01", "2024-02"]));
        assert_eq!(figure["data"][0]["y"], json!([120.0, 95.0]));
        assert_eq!(
            figure["layout"]["title"]["text"],
            "Production by month Bar Chart"
        );
        assert_eq!(figure["layout"]["xaxis"]["title"]["text"], "Month");
    }

    #[test]
    fn test_mismatched_lengths() {
        let mut input = params(PlotType::Line);
        input.y_values.pop();
        let err = build_figure(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.reason().contains("must be the same"));
    }

    #[test]
    fn test_combo_requires_second_series() {
        let err = build_figure(&params(PlotType::Combo)).unwrap_err();
        assert!(err.reason().contains("y2_values"));

        let mut input = params(PlotType::Combo);
        input.y2_values = Some(vec![0.9, 0.8]);
        let figure = build_figure(&input).unwrap();
        assert_eq!(figure["data"][0]["type"], "bar");
        assert_eq!(figure["data"][1]["y"], json!([0.9, 0.8]));
    }

    #[test]
    fn test_stacked_and_pie_layouts() {
        let mut input = params(PlotType::StackedArea);
        input.y2_values = Some(vec![10.0, 20.0]);
        let figure = build_figure(&input).unwrap();
        assert_eq!(figure["data"].as_array().unwrap().len(), 2);
        assert_eq!(figure["data"][1]["stackgroup"], "one");
        assert_eq!(figure["layout"]["barmode"], "stack");

        let figure = build_figure(&params(PlotType::Donut)).unwrap();
        assert_eq!(figure["data"][0]["hole"], 0.4);
        assert!(figure["layout"].get("xaxis").is_none());
    }

    #[test]
    fn test_gauge_range() {
        let figure = build_figure(&params(PlotType::Gauge)).unwrap();
        assert_eq!(figure["data"][0]["value"], 120.0);
        assert_eq!(figure["data"][0]["gauge"]["axis"]["range"], json!([0, 120.0]));
    }

    #[test]
    fn test_schema_lists_plot_types() {
        let tool = PlotChartTool::new();
        let schema = tool.parameter_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("x_values")));
        assert!(!required.contains(&json!("y2_values")));
        let plot_type = serde_json::to_string(schema).unwrap();
        assert!(plot_type.contains("stacked_bar"));
    }
}
