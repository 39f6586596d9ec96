use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use data_agent_model::{ErrorKind, ModelMessage};
use data_agent_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::testing::{data_tools, recording_sink};
use crate::{Agent, AgentBuilder};

fn config(provider: &TestModelProvider) -> Arc<crate::AgentConfig> {
    AgentBuilder::with_model_provider(provider.clone())
        .with_tools(data_tools())
        .with_system_prompt("You are an expert in data analysis.")
        .with_max_retries(0)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_simple_message() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi, ".to_owned()),
        PresetEvent::MessageDelta("what can I do for you?".to_owned()),
    ]));

    let (idle_tx, mut idle_rx) = watch::channel::<bool>(false);
    let (recorder, sink) = recording_sink();
    let agent = Agent::spawn_with_idle(config(&provider), sink, move || {
        idle_tx.send(true).unwrap();
    });
    agent.enqueue_user_input("Hello");

    timeout(Duration::from_millis(500), idle_rx.wait_for(|v| *v))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recorder.sent(), ["Hi, what can I do for you?"]);
    agent.shutdown().await;
}

#[tokio::test]
async fn test_inputs_are_not_interleaved() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "query_db", json!({ "sql_query": "SELECT 1" })),
    ]));
    provider.add_assistant_response_step(PresetResponse::text("first answer"));
    provider.add_assistant_response_step(PresetResponse::text("second answer"));

    let idle_count = Arc::new(AtomicUsize::new(0));
    let (recorder, sink) = recording_sink();
    let agent = Agent::spawn_with_idle(config(&provider), sink, {
        let idle_count = Arc::clone(&idle_count);
        move || {
            idle_count.fetch_add(1, Ordering::SeqCst);
        }
    });
    agent.enqueue_user_input("first");
    agent.enqueue_user_input("second");

    let conversation = agent.conversation().await.unwrap();
    let roles: Vec<_> = conversation.messages().map(ModelMessage::role).collect();
    assert_eq!(
        roles,
        ["system", "user", "assistant", "tool", "assistant", "user", "assistant"]
    );
    assert_eq!(recorder.sent(), ["first answer", "second answer"]);
    // Both inputs were queued before the first turn ended.
    assert_eq!(idle_count.load(Ordering::SeqCst), 1);
    agent.shutdown().await;
}

#[tokio::test]
async fn test_provider_error_apologizes() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_response_step(
        PresetResponse::text("unreachable")
            .with_failures(1)
            .with_failure_kind(ErrorKind::RateLimitExceeded),
    );

    let (recorder, sink) = recording_sink();
    let agent = Agent::spawn(config(&provider), sink);
    agent.enqueue_user_input("Hello");
    agent.enqueue_user_input("Hello again");

    let conversation = agent.conversation().await.unwrap();
    let sent = recorder.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].starts_with("Sorry, I couldn't get an answer"));
    assert!(sent[0].contains("rate limit exceeded"));
    // The session stays usable once the provider recovers.
    assert_eq!(sent[1], "unreachable");
    assert!(conversation.is_consistent());
    agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_turn() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "slow_query", json!({ "secs": 3600 })),
    ]));

    let (recorder, sink) = recording_sink();
    let agent = Agent::spawn(config(&provider), sink);
    agent.enqueue_user_input("run the slow report");

    // Let the turn reach the slow tool.
    tokio::time::sleep(Duration::from_secs(1)).await;
    agent.cancel_turn();

    let conversation = agent.conversation().await.unwrap();
    assert!(conversation.is_consistent());
    let roles: Vec<_> = conversation.messages().map(ModelMessage::role).collect();
    assert_eq!(roles, ["system", "user"]);
    assert_eq!(recorder.sent(), ["(cancelled)"]);
    agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_turn() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "slow_query", json!({ "secs": 3600 })),
    ]));

    let (_recorder, sink) = recording_sink();
    let agent = Agent::spawn(config(&provider), sink);
    agent.enqueue_user_input("run the slow report");
    tokio::time::sleep(Duration::from_secs(1)).await;

    timeout(Duration::from_secs(5), agent.shutdown())
        .await
        .unwrap();
}
