//! The tools the model uses to analyze data.

mod plot_chart;
mod query_db;

pub use plot_chart::{PlotChartTool, PlotType};
pub use query_db::QueryDbTool;
