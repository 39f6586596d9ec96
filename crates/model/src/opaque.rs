use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// A provider-native assistant message carried through the transcript
/// untouched.
///
/// Providers often need the exact message they produced (reasoning text,
/// vendor-specific tool call envelopes) to be echoed back on the next
/// request. The orchestration core never looks inside; it only stores the
/// handle next to the neutral [`crate::AssistantMessage`] fields and hands it
/// back when the transcript is re-submitted.
///
/// Equality is decided by the `id` alone, so the `id` must be unique across
/// the conversation.
#[derive(Clone)]
pub struct OpaqueMessage {
    id: Arc<str>,
    value: Arc<dyn Any + Send + Sync>,
}

impl OpaqueMessage {
    /// Wraps a provider-native value under the given id.
    #[inline]
    pub fn new<ID: Into<String>, T: Send + Sync + 'static>(
        id: ID,
        value: T,
    ) -> Self {
        Self {
            id: Arc::from(id.into()),
            value: Arc::new(value),
        }
    }

    /// Returns the id this message was created with.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Borrows the native value, if it has type `T`.
    #[inline]
    pub fn to_raw<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

impl Debug for OpaqueMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueMessage")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for OpaqueMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OpaqueMessage {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct NativeAssistant {
        reasoning: String,
    }

    #[test]
    fn test_downcast() {
        let native = NativeAssistant {
            reasoning: "the user wants monthly totals".to_string(),
        };
        let opaque = OpaqueMessage::new("chatcmpl-1", native);
        assert_eq!(opaque.id(), "chatcmpl-1");
        let back = opaque.to_raw::<NativeAssistant>().unwrap();
        assert_eq!(back.reasoning, "the user wants monthly totals");
        assert!(opaque.to_raw::<String>().is_none());
    }

    #[test]
    fn test_equality_by_id() {
        let a = OpaqueMessage::new("chatcmpl-1", 1u8);
        let b = OpaqueMessage::new("chatcmpl-1", 2u8);
        let c = OpaqueMessage::new("chatcmpl-2", 1u8);
        assert_eq!(a, a.clone());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
