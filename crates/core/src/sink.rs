use crate::tool::Artifact;

/// The user-facing side of a session.
///
/// Calls are fire-and-forget: nothing they return is consumed, so an
/// implementation reports its own failures.
pub trait ChatSink: Send + Sync {
    /// Shows a complete message.
    fn send(&self, text: &str);

    /// Replaces the in-progress message, e.g. while text is streaming in.
    fn update(&self, text: &str);

    /// Shows an artifact with its caption.
    fn send_artifact(&self, artifact: &Artifact, caption: &str);
}
