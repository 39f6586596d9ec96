mod builder;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::conversation::Conversation;
use crate::error::TurnError;
use crate::orchestrator::{OrchestrationLoop, TurnOutcome, TurnStatus};
use crate::sink::ChatSink;
pub use builder::{AgentBuilder, AgentConfig, DEFAULT_MAX_ITERATIONS};

type IdleFn = Box<dyn Fn() + Send + Sync>;

enum Command {
    Input(String),
    Snapshot(oneshot::Sender<Conversation>),
}

/// A chat session, running its turns on a background task.
///
/// Inputs are queued and handled one turn at a time, in order. Methods of
/// this type return immediately; what the agent says goes to the session's
/// [`ChatSink`].
pub struct Agent {
    command_tx: mpsc::UnboundedSender<Command>,
    cancel_tx: watch::Sender<u64>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Agent {
    /// Spawns a session on the current tokio runtime.
    #[inline]
    pub fn spawn(config: Arc<AgentConfig>, sink: Arc<dyn ChatSink>) -> Self {
        Self::spawn_inner(config, sink, None)
    }

    /// Spawns a session whose `on_idle` callback fires every time the input
    /// queue drains.
    #[inline]
    pub fn spawn_with_idle(
        config: Arc<AgentConfig>,
        sink: Arc<dyn ChatSink>,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self::spawn_inner(config, sink, Some(Box::new(on_idle)))
    }

    fn spawn_inner(
        config: Arc<AgentConfig>,
        sink: Arc<dyn ChatSink>,
        on_idle: Option<IdleFn>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(0);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            orchestrator: OrchestrationLoop::new(config, Arc::clone(&sink)),
            sink,
            command_rx,
            cancel_rx,
            shutdown_rx,
            on_idle,
        };
        let task = tokio::spawn(worker.run().instrument(info_span!("agent")));
        Self {
            command_tx,
            cancel_tx,
            shutdown_tx,
            task,
        }
    }

    /// Enqueues a user input for processing.
    pub fn enqueue_user_input<S: Into<String>>(&self, input: S) {
        if self.command_tx.send(Command::Input(input.into())).is_err() {
            warn!("agent has stopped, input dropped");
        }
    }

    /// Cancels the turn in progress, if any.
    ///
    /// The conversation is rolled back to its last consistent state and the
    /// next queued input, if any, is handled normally.
    pub fn cancel_turn(&self) {
        self.cancel_tx.send_modify(|generation| *generation += 1);
    }

    /// Returns a copy of the conversation once every input queued before
    /// this call has been handled, or `None` if the agent has stopped.
    pub async fn conversation(&self) -> Option<Conversation> {
        let (tx, rx) = oneshot::channel();
        self.command_tx.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Stops the agent, cancelling the turn in progress, and waits for its
    /// task to finish. Queued inputs are discarded.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(err) = self.task.await {
            error!("agent task failed: {err}");
        }
    }
}

struct Worker {
    orchestrator: OrchestrationLoop,
    sink: Arc<dyn ChatSink>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    cancel_rx: watch::Receiver<u64>,
    shutdown_rx: watch::Receiver<bool>,
    on_idle: Option<IdleFn>,
}

impl Worker {
    async fn run(mut self) {
        let mut busy = false;
        loop {
            let command = match self.command_rx.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    if busy {
                        busy = false;
                        if let Some(on_idle) = &self.on_idle {
                            on_idle();
                        }
                    }
                    tokio::select! {
                        command = self.command_rx.recv() => match command {
                            Some(command) => command,
                            None => break,
                        },
                        _ = self.shutdown_rx.changed() => break,
                    }
                }
            };
            if *self.shutdown_rx.borrow() {
                break;
            }

            match command {
                Command::Snapshot(tx) => {
                    tx.send(self.orchestrator.conversation().clone()).ok();
                }
                Command::Input(input) => {
                    busy = true;
                    if !self.handle_input(&input).await {
                        break;
                    }
                }
            }
        }
        debug!("agent stopped");
    }

    /// Runs one turn; returns `false` if the agent should stop.
    async fn handle_input(&mut self, input: &str) -> bool {
        let Self {
            orchestrator,
            sink,
            cancel_rx,
            shutdown_rx,
            ..
        } = self;
        // Only cancellations requested during this turn count.
        cancel_rx.mark_unchanged();

        tokio::select! {
            result = orchestrator.run_turn(input) => {
                report(sink.as_ref(), result);
                true
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() {
                    // The handle is gone.
                    return false;
                }
                info!("turn cancelled");
                sink.send("(cancelled)");
                true
            }
            _ = shutdown_rx.changed() => {
                info!("turn interrupted by shutdown");
                false
            }
        }
    }
}

fn report(
    sink: &dyn ChatSink,
    result: Result<TurnOutcome, TurnError>,
) {
    match result {
        Ok(outcome) => {
            if outcome.status == TurnStatus::IterationBudgetExceeded {
                debug!("turn stopped at the tool-call limit");
            }
        }
        Err(TurnError::Provider(err)) => {
            error!("model provider failed: {err}");
            sink.send(&format!(
                "Sorry, I couldn't get an answer from the language model \
                 ({}). Please try again.",
                err.kind()
            ));
        }
        Err(err @ TurnError::Conversation(_)) => {
            error!("turn failed: {err}");
            sink.send("Sorry, something went wrong. Please try again.");
        }
    }
}
