//! tollgate binary: configuration, logging bootstrap, and wiring.

mod config;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent::{AgentRuntime, LlmProvider, OpenAiProvider, TranscriptStore};
use channels::{ConsoleOperator, TurnFn, WebOperator};
use clap::{Parser, Subcommand};
use gateway::{ApprovalGate, PromptQueue, TurnDispatcher};
use providers::ProviderRegistry;
use proto::{ScheduledPrompt, SessionId, ToolBroker};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Session key for turns the console REPL owns.
const CONSOLE_SESSION: &str = "console:local";
/// Session key scheduled turns run under (shared with default web clients).
const SCHEDULED_SESSION: &str = "web:default";

#[derive(Parser)]
#[command(name = "tollgate", about = "Consent-gated tool orchestration agent")]
struct Cli {
    /// Configuration file path.
    #[arg(long, default_value = "tollgate.toml")]
    config: PathBuf,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web operator server (default).
    Serve,
    /// Run the console REPL operator.
    Console,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);

    // Console mode keeps stdout for the REPL; logs go to the file only.
    let log_to_stdout = matches!(command, Command::Serve);
    let _log_guard = init_tracing(&cli.log_level, log_to_stdout);

    let config = Config::load(&cli.config);

    match command {
        Command::Serve => serve(config).await,
        Command::Console => console(config).await,
    }
}

/// Layered tracing: optional stdout fmt layer plus a daily rolling file.
fn init_tracing(default_level: &str, stdout: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "tollgate.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::new("info"));

    let stdout_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if stdout {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(fmt::layer().with_filter(stdout_filter))
            .init();
    } else {
        tracing_subscriber::registry().with(file_layer).init();
    }
    guard
}

/// Opens the store, fans out provider connections, and builds the runtime.
async fn build_runtime(
    config: &Config,
) -> anyhow::Result<(Arc<AgentRuntime>, Arc<ProviderRegistry>)> {
    let store = Arc::new(TranscriptStore::open(&config.agent.db_path).await?);

    let registry = Arc::new(ProviderRegistry::new());
    let launches = config.provider_launches();
    if launches.is_empty() {
        warn!("No tool providers configured; running with an empty catalog");
    } else {
        info!("Connecting {} tool providers...", launches.len());
        registry.connect_all(launches).await;
        info!("Providers ready: {:?}", registry.provider_names());
    }

    let llm: Arc<dyn LlmProvider> = match &config.agent.base_url {
        Some(base_url) => Arc::new(OpenAiProvider::with_base_url(
            &config.agent.api_key,
            base_url,
        )),
        None => Arc::new(OpenAiProvider::new(&config.agent.api_key)),
    };

    let mut runtime = AgentRuntime::new(
        llm,
        Arc::clone(&registry) as Arc<dyn ToolBroker>,
        store,
        &config.agent.model,
        config.agent.max_iterations,
        config.agent.history_window,
    );
    if let Some(prompt) = &config.agent.system_prompt {
        runtime = runtime.with_system_prompt(prompt);
    }

    Ok((Arc::new(runtime), registry))
}

/// Builds the turn handler: per-conversation serialization around the loop.
fn make_turn(
    runtime: Arc<AgentRuntime>,
    dispatcher: Arc<TurnDispatcher>,
    channel: &'static str,
) -> TurnFn {
    Arc::new(move |session_id, text, approval, progress| {
        let runtime = Arc::clone(&runtime);
        let dispatcher = Arc::clone(&dispatcher);
        Box::pin(async move {
            dispatcher
                .run_turn(
                    &session_id,
                    runtime.run_user_turn(&session_id, channel, &text, &approval, Some(progress)),
                )
                .await
        })
    })
}

/// Starts the scheduled-prompt watcher; replies go through `on_reply`.
fn spawn_prompt_watcher<F>(
    config: &Config,
    runtime: Arc<AgentRuntime>,
    dispatcher: Arc<TurnDispatcher>,
    on_reply: F,
) -> Arc<PromptQueue>
where
    F: Fn(ScheduledPrompt, String) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
        + Send
        + Sync
        + 'static,
{
    let queue = PromptQueue::new(&config.scheduler.queue_path);
    let poll = Duration::from_millis(config.scheduler.poll_interval_ms);
    let on_reply = Arc::new(on_reply);

    tokio::spawn(Arc::clone(&queue).watch(poll, move |prompt: ScheduledPrompt| {
        let runtime = Arc::clone(&runtime);
        let dispatcher = Arc::clone(&dispatcher);
        let on_reply = Arc::clone(&on_reply);
        async move {
            let session_id = SessionId::from(SCHEDULED_SESSION);
            let outcome = dispatcher
                .run_turn(
                    &session_id,
                    runtime.run_scheduled_turn(&session_id, "scheduler", &prompt),
                )
                .await;
            match outcome {
                Ok(reply) => on_reply(prompt, reply).await,
                Err(e) => warn!("Scheduled turn failed: {e}"),
            }
        }
    }));

    queue
}

/// Web operator mode: HTTP + WebSocket server with scheduled broadcasts.
async fn serve(config: Config) -> anyhow::Result<()> {
    let (runtime, _registry) = build_runtime(&config).await?;
    let gate = Arc::new(ApprovalGate::new());
    let dispatcher = Arc::new(TurnDispatcher::new());

    let turn = make_turn(Arc::clone(&runtime), Arc::clone(&dispatcher), "web");
    let web = WebOperator::new(
        config.web.port,
        &config.web.static_dir,
        Arc::clone(runtime.store()),
        gate,
        turn,
    );

    let broadcast_target = web.clone();
    let _queue = spawn_prompt_watcher(
        &config,
        Arc::clone(&runtime),
        Arc::clone(&dispatcher),
        move |prompt, reply| {
            let web = broadcast_target.clone();
            Box::pin(async move {
                info!("Scheduled reply broadcast to {} operators", web.connection_count());
                web.broadcast_scheduled(&prompt.text, &reply).await;
            })
        },
    );

    tokio::select! {
        result = web.serve() => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

/// Console REPL mode: the degenerate single-operator channel.
async fn console(config: Config) -> anyhow::Result<()> {
    let (runtime, _registry) = build_runtime(&config).await?;
    let dispatcher = Arc::new(TurnDispatcher::new());

    let _queue = spawn_prompt_watcher(
        &config,
        Arc::clone(&runtime),
        Arc::clone(&dispatcher),
        |prompt, reply| {
            Box::pin(async move {
                println!("\nSystem trigger: {}", prompt.text);
                println!("\nAssistant: {reply}\n");
            })
        },
    );

    let turn = make_turn(runtime, dispatcher, "console");
    let console = ConsoleOperator::new(turn, SessionId::from(CONSOLE_SESSION));
    console.run().await.map_err(Into::into)
}
