use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use data_agent_model::{
    AssistantMessage, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
    ToolCallRequest, next_event,
};
use tracing::Instrument;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type TranscriptFn = Arc<dyn Fn(&str) + Send + Sync>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, TranscriptFn) -> BoxedSendRequestFuture + Send + Sync
>;

/// How failed model requests are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry, growing exponentially afterwards.
    pub initial_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_interval: Duration::from_millis(500),
        }
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    name: Arc<str>,
}

impl ModelClient {
    pub fn new<P: ModelProvider + 'static>(
        provider: P,
        policy: RetryPolicy,
    ) -> Self {
        let name = Arc::from(provider.name());
        let provider = Arc::new(provider);
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_transcript| {
            let provider = Arc::clone(&provider);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    send_with_retry(&*provider, &req, policy, on_transcript)
                        .await
                }
                .instrument(debug_span!("model client req")),
            )
        });
        Self { handler_fn, name }
    }

    /// Returns the provider's name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends a request and returns the response.
    ///
    /// Every text delta is passed to `on_transcript` as it arrives.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_transcript: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<ModelClientResponse, Box<dyn ModelProviderError>> {
        (self.handler_fn)(req, Arc::new(on_transcript)).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    pub transcript: String,
    pub opaque_msg: Option<OpaqueMessage>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

impl ModelClientResponse {
    /// Whether the model stopped because it hit its output token limit.
    #[inline]
    pub fn is_cut_off(&self) -> bool {
        self.finish_reason == Some(ModelFinishReason::Length)
    }

    #[inline]
    pub fn into_assistant_message(self) -> AssistantMessage {
        AssistantMessage {
            content: self.transcript,
            tool_calls: self.tool_calls,
            opaque: self.opaque_msg,
        }
    }
}

struct Failure {
    error: Box<dyn ModelProviderError>,
    streamed: bool,
}

async fn send_with_retry<P: ModelProvider>(
    provider: &P,
    req: &ModelRequest,
    policy: RetryPolicy,
    on_transcript: TranscriptFn,
) -> SendRequestResult {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_elapsed_time(None)
        .build();
    let mut retries = 0;

    loop {
        let resp_or_err = provider.send_request(req).await;
        let Failure { error, streamed } =
            match handle_response::<P>(resp_or_err, &on_transcript).await {
                Ok(resp) => return Ok(resp),
                Err(failure) => failure,
            };

        // Once text reached the user, a retry would show it twice.
        if streamed || !error.kind().is_transient() {
            return Err(error);
        }
        if retries >= policy.max_retries {
            warn!("giving up after {retries} retries: {error}");
            return Err(error);
        }
        let Some(delay) = backoff.next_backoff() else {
            return Err(error);
        };
        retries += 1;
        warn!(
            "request failed ({error}), retrying in {delay:?} ({retries}/{})",
            policy.max_retries
        );
        tokio::time::sleep(delay).await;
    }
}

async fn handle_response<P: ModelProvider>(
    resp_or_err: Result<P::Response, P::Error>,
    on_transcript: &TranscriptFn,
) -> Result<ModelClientResponse, Failure> {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Failure {
                error: Box::new(err),
                streamed: false,
            });
        }
    };

    let mut transcript = String::new();
    let opaque_msg;
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event = match next_event(pinned_resp.as_mut()).await {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Failure {
                    error: Box::new(err),
                    streamed: !transcript.is_empty(),
                });
            }
        };

        let Some(event) = event else {
            // The request has been handled gracefully without errors,
            // now try getting the opaque message for this response.
            opaque_msg = pinned_resp.make_opaque_message();
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                transcript.push_str(&delta);
                on_transcript(&delta);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        opaque_msg,
        tool_calls,
        finish_reason,
    })
}
