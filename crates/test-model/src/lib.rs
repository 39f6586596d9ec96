//! A local scripted model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use data_agent_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    OpaqueMessage,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    preset: PresetResponse,
    step_idx: usize,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        let Some(timer) = &mut this.sleep else {
            this.sleep = Some(Box::pin(sleep(this.delay)));
            return Pin::new(this).poll_next_event(cx);
        };
        ready!(timer.as_mut().poll(cx));
        this.sleep = None;

        let events = &this.preset.events;
        let event = if this.event_idx < events.len() {
            match &events[this.event_idx] {
                PresetEvent::MessageDelta(msg) => {
                    ModelResponseEvent::MessageDelta(msg.clone())
                }
                PresetEvent::ToolCall(req) => {
                    ModelResponseEvent::ToolCall(req.clone())
                }
                PresetEvent::Fail(kind) => {
                    // Nothing is emitted after a broken stream.
                    this.event_idx = usize::MAX;
                    return Poll::Ready(Err(Error {
                        message: "injected stream failure",
                        kind: *kind,
                    }));
                }
            }
        } else if this.event_idx == events.len() {
            let reason = this.preset.finish_reason.unwrap_or(
                if this.preset.has_tool_call() {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                },
            );
            ModelResponseEvent::Completed(reason)
        } else {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        };
        this.event_idx += 1;
        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        let id = format!("msg:{}", self.step_idx);
        Some(OpaqueMessage::new(id.clone(), id))
    }
}

#[derive(Default)]
struct Recorder {
    requests: Vec<ModelRequest>,
    attempts: HashMap<usize, u64>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, set up the script: one [`PresetResponse`] per
/// model call. The step answering a request is chosen by the number of
/// assistant messages already in its transcript, so the N-th call of a
/// conversation always gets the N-th step, and a retried request gets the
/// same step again. If the script has no step for a request, an error is
/// returned.
///
/// Clones share the same request log.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Vec<PresetResponse>,
    delay: Option<Duration>,
    recorder: Arc<Mutex<Recorder>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.script.push(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns how many requests have been sent so far, failed ones
    /// included.
    pub fn request_count(&self) -> usize {
        self.recorder.lock().unwrap().requests.len()
    }

    /// Returns a copy of every request sent so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.recorder.lock().unwrap().requests.clone()
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let step_idx = req
            .messages
            .iter()
            .filter(|msg| matches!(msg, ModelMessage::Assistant(_)))
            .count();

        let mut recorder = self.recorder.lock().unwrap();
        recorder.requests.push(req.clone());

        let result = 'blk: {
            let Some(preset) = self.script.get(step_idx) else {
                break 'blk Err(Error {
                    message: "no enough steps",
                    kind: ErrorKind::Other,
                });
            };

            if let Some(failures) = preset.failures {
                let attempts = recorder.attempts.entry(step_idx).or_default();
                *attempts += 1;
                if failures == 0 || *attempts <= failures {
                    break 'blk Err(Error {
                        message: "injected failure",
                        kind: preset.failure_kind.unwrap_or(ErrorKind::Other),
                    });
                }
            }

            Ok(TestModelResponse {
                preset: preset.clone(),
                step_idx,
                event_idx: 0,
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                sleep: None,
            })
        };
        ready(result)
    }

    fn name(&self) -> &str {
        "test-model"
    }
}
