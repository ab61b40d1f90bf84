//! CLI entry point for Proctor.
//!
//! This binary provides the `proctor` command with subcommands for running
//! an interactive interview session, evaluating a finished workspace, and
//! checking local configuration.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use proctor_agent::{
    AbortHandle, AgentEvent, AgentLoop, AnthropicClient, AnthropicConfig, FastEvaluationLoop,
    HelpfulnessLevel, RetryingClient, SessionConfig, SessionRegistry, StreamingAgentLoop,
    TestResults, ToolExecutor, ToolRegistry, parse_test_counts,
};
use proctor_sandbox::{LocalSandbox, Sandbox};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Proctor — an LLM assistant runtime for timed coding interviews.
#[derive(Parser)]
#[command(
    name = "proctor",
    version,
    about = "Proctor — interview assistant runtime",
    long_about = "Runs an LLM coding assistant against a sandboxed candidate workspace, \
                  with tool access scoped by helpfulness level."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session against a workspace directory.
    Chat {
        /// Directory holding session workspaces.
        #[arg(long, default_value = "data/workspaces")]
        workspace_dir: PathBuf,

        /// Candidate identifier.
        #[arg(long, default_value = "local")]
        candidate: String,

        /// How much the assistant may do on the candidate's behalf.
        #[arg(long, value_enum, default_value = "pair-programming")]
        level: LevelArg,

        /// Problem statement shown to the assistant.
        #[arg(long)]
        problem: Option<String>,

        /// Command the run_tests tool executes.
        #[arg(long)]
        test_command: Option<String>,

        /// Model identifier.
        #[arg(long)]
        model: Option<String>,

        /// Stream assistant text as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Evaluate the solution in an existing session workspace.
    Evaluate {
        /// Directory holding session workspaces.
        #[arg(long, default_value = "data/workspaces")]
        workspace_dir: PathBuf,

        /// Session to evaluate.
        #[arg(long)]
        session: String,

        /// Command that runs the test suite (used as the scoring fallback).
        #[arg(long)]
        test_command: String,
    },

    /// Show local configuration status.
    Status,
}

/// Clap-facing mirror of [`HelpfulnessLevel`].
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LevelArg {
    Consultant,
    PairProgramming,
    FullCopilot,
}

impl From<LevelArg> for HelpfulnessLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Consultant => Self::Consultant,
            LevelArg::PairProgramming => Self::PairProgramming,
            LevelArg::FullCopilot => Self::FullCopilot,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            workspace_dir,
            candidate,
            level,
            problem,
            test_command,
            model,
            stream,
        } => {
            cmd_chat(
                workspace_dir,
                candidate,
                level.into(),
                problem,
                test_command,
                model,
                stream,
            )
            .await
        }
        Commands::Evaluate {
            workspace_dir,
            session,
            test_command,
        } => cmd_evaluate(workspace_dir, session, test_command).await,
        Commands::Status => cmd_status(),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn cmd_chat(
    workspace_dir: PathBuf,
    candidate: String,
    level: HelpfulnessLevel,
    problem: Option<String>,
    test_command: Option<String>,
    model: Option<String>,
    stream: bool,
) -> Result<()> {
    init_tracing("info");

    let client = build_client()?;

    std::fs::create_dir_all(&workspace_dir)
        .context("failed to create workspace directory")?;
    let sandbox: Arc<dyn Sandbox> = Arc::new(LocalSandbox::new(&workspace_dir, "/workspace"));

    let mut config = SessionConfig::generate(candidate).with_helpfulness(level);
    if let Some(problem) = problem {
        config = config.with_problem_statement(problem);
    }
    if let Some(test_command) = test_command {
        config = config.with_test_command(test_command);
    }
    if let Some(model) = model {
        config = config.with_model(model);
    }
    info!(session = %config.session_id, level = %config.helpfulness, "session started");

    let executor = Arc::new(ToolExecutor::new(
        sandbox,
        ToolRegistry::for_level(level),
        config.clone(),
    ));

    println!();
    println!("  Proctor v{} — session {}", env!("CARGO_PKG_VERSION"), config.session_id);
    println!("  Helpfulness level: {}. Type a message, or 'quit' to exit.", config.helpfulness);
    println!();

    if stream {
        chat_streaming(client, executor, config).await
    } else {
        chat_blocking(client, executor, config).await
    }
}

async fn chat_blocking(
    client: RetryingClient<AnthropicClient>,
    executor: Arc<ToolExecutor>,
    config: SessionConfig,
) -> Result<()> {
    let registry = SessionRegistry::new();
    let metrics = registry.metrics(&config.session_id);
    let session_id = config.session_id.clone();
    let mut agent = AgentLoop::new(client, executor, config);

    for line in read_lines() {
        let line = line?;
        let Some(input) = repl_input(&line) else {
            continue;
        };
        let Some(input) = input else { break };

        match agent.handle_message(input).await {
            Ok(response) => {
                metrics.record_message();
                metrics.record_usage(&response.metadata.usage);
                metrics.record_tool_calls(response.tools_used.len() as u64);

                println!("{}", response.text);
                if !response.tools_used.is_empty() {
                    println!("  [tools: {}]", response.tools_used.join(", "));
                }
                println!();
            }
            Err(e) => {
                metrics.record_model_error();
                tracing::error!(error = %e, "turn failed");
                println!("  Error: {e}");
            }
        }
    }

    if let Some(snapshot) = registry.snapshot(&session_id) {
        info!(
            messages = snapshot.messages,
            tool_calls = snapshot.tool_calls,
            input_tokens = snapshot.input_tokens,
            output_tokens = snapshot.output_tokens,
            "session ended"
        );
    }
    Ok(())
}

async fn chat_streaming(
    client: RetryingClient<AnthropicClient>,
    executor: Arc<ToolExecutor>,
    config: SessionConfig,
) -> Result<()> {
    let mut agent = StreamingAgentLoop::new(client, executor, config);

    for line in read_lines() {
        let line = line?;
        let Some(input) = repl_input(&line) else {
            continue;
        };
        let Some(input) = input else { break };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::TextDelta { text } => {
                        print!("{text}");
                        let _ = io::stdout().flush();
                    }
                    AgentEvent::ToolUseStart { name, .. } => {
                        println!("\n  [running {name}...]");
                    }
                    AgentEvent::Error { message } => {
                        println!("\n  Error: {message}");
                    }
                    _ => {}
                }
            }
        });

        let abort = AbortHandle::new();
        let result = agent.handle_message(input, &tx, &abort).await;
        drop(tx);
        printer.await.ok();
        println!();

        if let Err(e) = result {
            tracing::error!(error = %e, "turn failed");
        }
    }

    info!("session ended");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: evaluate
// ---------------------------------------------------------------------------

async fn cmd_evaluate(
    workspace_dir: PathBuf,
    session: String,
    test_command: String,
) -> Result<()> {
    init_tracing("info");

    let client = build_client()?;
    let sandbox: Arc<dyn Sandbox> = Arc::new(LocalSandbox::new(&workspace_dir, "/workspace"));

    let config = SessionConfig::new(session, "evaluator");
    let executor = Arc::new(ToolExecutor::new(
        Arc::clone(&sandbox),
        ToolRegistry::for_evaluation(),
        config.clone(),
    ));

    // Run the suite up front so the loop has a fallback score if the model
    // never submits a verdict.
    let mut eval = FastEvaluationLoop::new(client, executor, config.clone());
    match sandbox.run_command(&config.session_id, &test_command).await {
        Ok(output) => {
            let combined = format!("{}\n{}", output.stdout, output.stderr);
            let (passed, failed) = parse_test_counts(&combined);
            eval = eval.with_test_results(TestResults {
                passed,
                total: passed + failed,
            });
        }
        Err(e) => tracing::warn!(error = %e, "test command failed; evaluating without test results"),
    }

    let result = eval.evaluate().await.context("evaluation failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

fn cmd_status() -> Result<()> {
    init_tracing("warn");

    println!();
    println!("  Proctor Status");
    println!("  ==============");
    println!();

    match std::env::var("ANTHROPIC_API_KEY") {
        Ok(_) => println!("  Anthropic API:    CONFIGURED"),
        Err(_) => {
            println!("  Anthropic API:    NOT SET");
            println!("      export ANTHROPIC_API_KEY=sk-ant-...");
        }
    }

    let workspace_dir = std::path::Path::new("data/workspaces");
    if workspace_dir.exists() {
        println!("  Workspace dir:    OK ({})", workspace_dir.display());
    } else {
        println!("  Workspace dir:    MISSING (created on first chat)");
    }

    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_client() -> Result<RetryingClient<AnthropicClient>> {
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .context("ANTHROPIC_API_KEY is not set; export it or add it to .env")?;
    let client = AnthropicClient::new(AnthropicConfig::new(api_key))
        .context("failed to build model client")?;
    Ok(RetryingClient::new(client))
}

fn read_lines() -> impl Iterator<Item = io::Result<String>> {
    let stdin = io::stdin();
    stdin.lock().lines()
}

/// Interpret one REPL line: `None` to skip, `Some(None)` to quit,
/// `Some(Some(input))` to handle.
fn repl_input(line: &str) -> Option<Option<&str>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed == "quit" || trimmed == "exit" {
        return Some(None);
    }
    Some(Some(trimmed))
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
