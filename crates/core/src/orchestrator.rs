//! The tool-call orchestration loop.


use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use data_agent_model::{
    AssistantMessage, ModelRequest, ModelTool, ToolCallResult,
};
use tracing::Instrument;

use crate::agent::AgentConfig;
use crate::conversation::Conversation;
use crate::error::TurnError;
use crate::sink::ChatSink;
use crate::tool::{self, ToolResult};

/// How a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model answered without requesting more tools.
    Completed,
    /// The model still wanted tools when the iteration budget ran out.
    IterationBudgetExceeded,
}

/// The result of a finished turn.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    /// The last assistant message of the turn.
    pub message: AssistantMessage,
    /// How the turn ended.
    pub status: TurnStatus,
    /// Number of model requests made.
    pub model_calls: usize,
    /// Number of tool batches executed.
    pub tool_rounds: usize,
}

/// Drives one conversation: model calls, tool rounds and display routing.
///
/// Each loop owns its conversation. Turns run one at a time since
/// [`OrchestrationLoop::run_turn`] borrows the loop mutably.
pub struct OrchestrationLoop {
    config: Arc<AgentConfig>,
    conversation: Conversation,
    sink: Arc<dyn ChatSink>,
}

impl OrchestrationLoop {
    /// Creates a loop with a fresh conversation.
    pub fn new(config: Arc<AgentConfig>, sink: Arc<dyn ChatSink>) -> Self {
        let conversation = match config.system_prompt() {
            Some(prompt) => Conversation::with_system_prompt(prompt),
            None => Conversation::default(),
        };
        Self {
            config,
            conversation,
            sink,
        }
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Runs one user turn to completion.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future before it completes leaves the
    /// conversation at its last consistent state: an assistant message
    /// whose tool calls have no results yet is removed.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let Self {
            config,
            conversation,
            sink,
        } = self;
        let conversation = ConsistencyGuard(conversation);
        run_turn(&**config, conversation, &*sink, user_text)
            .instrument(info_span!("turn"))
            .await
    }
}

async fn run_turn(
    config: &AgentConfig,
    mut conversation: ConsistencyGuard<'_>,
    sink: &Arc<dyn ChatSink>,
    user_text: &str,
) -> Result<TurnOutcome, TurnError> {
    let registry = config.registry();
    let router = registry.display_router();
    let tools = registry.definitions();

    info!("user: {user_text}");
    conversation.push_user(user_text)?;

    let mut response = complete(config, &conversation, &tools, sink).await?;
    let mut model_calls = 1;
    let mut tool_rounds = 0;
    conversation.push_assistant(response.clone())?;

    while response.has_tool_calls() && tool_rounds < config.max_iterations {
        let results = config.invoker.invoke(&response.tool_calls).await;
        conversation
            .push_tool_results(results.iter().map(ToolResult::to_call_result))?;
        tool_rounds += 1;
        for shown in router.route(&results) {
            sink.send_artifact(&shown.artifact, &shown.caption);
        }

        response = complete(config, &conversation, &tools, sink).await?;
        model_calls += 1;
        conversation.push_assistant(response.clone())?;
    }

    let status = if response.has_tool_calls() {
        warn!(
            "tool-call limit of {} rounds reached, skipping {} pending call(s)",
            config.max_iterations,
            response.tool_calls.len()
        );
        let skipped = response.tool_calls.iter().map(|req| ToolCallResult {
            id: req.id.clone(),
            name: req.name.clone(),
            content: tool::Error::execution_error()
                .with_reason("not executed: tool-call limit reached")
                .to_string(),
        });
        conversation.push_tool_results(skipped)?;
        sink.send(&format!(
            "(reached tool-call limit: stopped after {tool_rounds} tool rounds, \
             the answer may be incomplete)"
        ));
        TurnStatus::IterationBudgetExceeded
    } else {
        TurnStatus::Completed
    };

    debug!(
        "turn finished ({status:?}) after {model_calls} model calls and \
         {tool_rounds} tool rounds"
    );
    Ok(TurnOutcome {
        message: response,
        status,
        model_calls,
        tool_rounds,
    })
}

async fn complete(
    config: &AgentConfig,
    conversation: &Conversation,
    tools: &[ModelTool],
    sink: &Arc<dyn ChatSink>,
) -> Result<AssistantMessage, TurnError> {
    let req = ModelRequest {
        messages: conversation.messages().cloned().collect(),
        tools: tools.to_vec(),
    };

    let streamed = Mutex::new(String::new());
    let on_transcript = {
        let sink = Arc::clone(sink);
        move |delta: &str| {
            if let Ok(mut text) = streamed.lock() {
                text.push_str(delta);
                sink.update(&text);
            }
        }
    };

    let resp = config
        .model_client
        .send_request(req, on_transcript)
        .await
        .map_err(TurnError::Provider)?;
    let cut_off = resp.is_cut_off();
    let mut message = resp.into_assistant_message();
    surface(sink, &message);
    if cut_off {
        warn!("response was cut off by the token limit");
        sink.send("(the answer was cut off by the model's output limit)");
    }
    if assign_unique_call_ids(&mut message) {
        warn!("model reused or omitted tool call ids, renamed them");
    }
    Ok(message)
}

/// Renames empty and repeated tool call ids, so every call of a reply can
/// be answered exactly once. Returns whether anything was renamed.
///
/// A renamed message drops its opaque form, which still has the old ids.
fn assign_unique_call_ids(message: &mut AssistantMessage) -> bool {
    let taken: HashSet<String> =
        message.tool_calls.iter().map(|req| req.id.clone()).collect();
    let mut seen = HashSet::new();
    let mut next = 0;
    let mut renamed = false;

    for req in &mut message.tool_calls {
        if !req.id.is_empty() && seen.insert(req.id.clone()) {
            continue;
        }
        let id = loop {
            let id = format!("call_{next}");
            next += 1;
            if !taken.contains(&id) && !seen.contains(&id) {
                break id;
            }
        };
        seen.insert(id.clone());
        req.id = id;
        renamed = true;
    }

    if renamed {
        message.opaque = None;
    }
    renamed
}

fn surface(sink: &Arc<dyn ChatSink>, response: &AssistantMessage) {
    if response.content.is_empty() {
        return;
    }
    info!("assistant: {}", response.content);
    sink.send(&response.content);
}

/// Rolls dangling tool calls back when a turn ends early.
struct ConsistencyGuard<'a>(&'a mut Conversation);

impl Deref for ConsistencyGuard<'_> {
    type Target = Conversation;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl DerefMut for ConsistencyGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}

impl Drop for ConsistencyGuard<'_> {
    fn drop(&mut self) {
        if self.0.rollback_to_consistent() {
            warn!("turn ended with unanswered tool calls, rolled them back");
        }
    }
}
