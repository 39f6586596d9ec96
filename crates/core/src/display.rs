//! Routing of user-visible tool artifacts.

use std::collections::BTreeSet;

use crate::tool::{Artifact, ToolOutput, ToolResult};

/// An artifact to show to the user, with its caption.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayArtifact {
    /// Id of the tool call that produced the artifact.
    pub tool_call_id: String,
    /// The artifact itself.
    pub artifact: Artifact,
    /// Short caption to show next to it.
    pub caption: String,
}

/// Decides which tool results are shown to the user as artifacts.
///
/// Only tools in the exclusion set are routed; their artifacts never reach
/// the model, which gets a short placeholder instead.
#[derive(Clone, Debug, Default)]
pub struct DisplayRouter {
    excluded: BTreeSet<String>,
}

impl DisplayRouter {
    /// Creates a router for the given excluded tool names.
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns whether `name` is excluded from summarization.
    #[inline]
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// Returns the excluded tool names.
    #[inline]
    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    /// Picks the results to show to the user, in input order.
    pub fn route(&self, results: &[ToolResult]) -> Vec<DisplayArtifact> {
        results
            .iter()
            .filter(|result| self.is_excluded(&result.name))
            .filter_map(|result| match &result.outcome {
                Ok(ToolOutput::Artifact(artifact)) => Some(DisplayArtifact {
                    tool_call_id: result.tool_call_id.clone(),
                    artifact: artifact.clone(),
                    caption: caption(artifact, &result.name),
                }),
                _ => None,
            })
            .collect()
    }
}

fn caption(artifact: &Artifact, tool_name: &str) -> String {
    match artifact.title() {
        "" => format!("Output of {tool_name}"),
        title => title.to_owned(),
    }
}

/// The text the model receives in place of a routed artifact.
pub fn placeholder(artifact: &Artifact) -> String {
    let (kind, verb) = match artifact {
        Artifact::Figure { .. } => ("Chart", "rendered and shown"),
        Artifact::Image { .. } => ("Image", "shown"),
    };
    match artifact.title() {
        "" => format!("{kind} has been {verb} to the user."),
        title => format!("{kind} \"{title}\" has been {verb} to the user."),
    }
}
