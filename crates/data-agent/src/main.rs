//! A terminal chat with the data agent.
//!
//! Settings come from the environment, or a `.env` file in the working
//! directory. Charts are saved as Plotly JSON files in the output directory.

#[macro_use]
extern crate tracing;

mod config;

use std::error::Error as StdError;
use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use data_agent::core::ChatSink;
use data_agent::core::tool::Artifact;
use data_agent::db::SqliteDatabase;
use data_agent::{ArtifactStore, SessionBuilder};
use data_agent_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::Config;

enum SessionEvent {
    Idle,
    Message(String),
    Status(String),
    Artifact(Artifact, String),
}

/// Forwards what the agent says to the input loop.
struct ChannelSink {
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChatSink for ChannelSink {
    fn send(&self, text: &str) {
        self.event_tx.send(SessionEvent::Message(text.to_owned())).ok();
    }

    fn update(&self, text: &str) {
        self.event_tx.send(SessionEvent::Status(text.to_owned())).ok();
    }

    fn send_artifact(&self, artifact: &Artifact, caption: &str) {
        self.event_tx
            .send(SessionEvent::Artifact(artifact.clone(), caption.to_owned()))
            .ok();
    }
}

const BAR_CHAR: &str = "▎";
const STATUS_WIDTH: usize = 72;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("cannot load .env file: {err}");
            return ExitCode::FAILURE;
        }
    }
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn StdError>> {
    let mut provider_config = OpenAIConfigBuilder::with_api_key(config.api_key);
    if let Some(base_url) = config.base_url {
        provider_config = provider_config.with_base_url(base_url);
    }
    if let Some(model) = config.model {
        provider_config = provider_config.with_model(model);
    }
    let model_provider = OpenAIProvider::new(provider_config.build())?;

    let session_config = SessionBuilder::with_model_provider(model_provider)
        .with_database(SqliteDatabase::open(&config.database))
        .with_max_iterations(config.max_iterations)
        .with_execution_mode(config.execution_mode)
        .build()
        .await?;
    info!("session ready, database: {}", config.database.display());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn ChatSink> = Arc::new(ChannelSink {
        event_tx: event_tx.clone(),
    });
    let session = session_config.start_with_idle(sink, move || {
        event_tx.send(SessionEvent::Idle).ok();
    });
    let artifacts = ArtifactStore::new(config.output_dir);

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

    'outer: loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            _ => session.send_message(line),
        }

        let mut progress_bar = None;

        loop {
            // Create a new progress bar if it has been finished.
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("🤔 Thinking...");
                    progress_bar
                })
                .inc(1);

            let sleep = sleep(Duration::from_millis(100));
            let event = select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = sleep => {
                    continue;
                }
            };

            if let SessionEvent::Status(text) = &event {
                if let Some(progress_bar) = &progress_bar {
                    progress_bar.set_message(status_line(text));
                }
                continue;
            }

            // Finish the progress bar before printing anything else.
            if let Some(progress_bar) = progress_bar.take() {
                progress_bar.finish_and_clear();
            }

            match event {
                SessionEvent::Message(text) => {
                    println!(
                        "{}🤖 {}",
                        BAR_CHAR.bright_cyan(),
                        text.bright_white()
                    );
                }
                SessionEvent::Artifact(artifact, caption) => {
                    let bar = BAR_CHAR.bright_green();
                    match artifacts.save(&artifact).await {
                        Ok(path) => {
                            println!("{bar}📊 {}", caption.bold());
                            println!("{bar}   saved to {}", path.display());
                        }
                        Err(err) => {
                            error!("cannot save chart: {err}");
                            println!("{bar}📊 {caption} (not saved: {err})");
                        }
                    }
                }
                SessionEvent::Status(_) => {}
                SessionEvent::Idle => {
                    break;
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Shortens streamed text to its last line, fitting the spinner.
fn status_line(text: &str) -> String {
    let line = text.lines().last().unwrap_or_default().trim();
    let count = line.chars().count();
    if count <= STATUS_WIDTH {
        return format!("✍️  {line}");
    }
    let tail: String = line.chars().skip(count - STATUS_WIDTH).collect();
    format!("✍️  …{tail}")
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
