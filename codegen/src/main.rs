//! `codegen`: run code-generation turns against a generation service.
//!
//! `codegen init` writes a default `codegen.toml`. `codegen turn` runs one
//! Prepare → Generate round trip for a message and prints a JSON summary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use codegen::core::types::WorkspaceRoot;
use codegen::error::SessionError;
use codegen::exit_codes;
use codegen::io::apply::{ApplySummary, apply_changes};
use codegen::io::config::{EngineConfig, load_config, write_config};
use codegen::io::http::HttpGenerationService;
use codegen::io::service::GenerationService;
use codegen::logging;
use codegen::session::{PrepareState, SessionConfig, SessionEngine, TurnInput};

#[derive(Parser)]
#[command(
    name = "codegen",
    version,
    about = "Iterative code generation against a remote service"
)]
struct Cli {
    /// Config file.
    #[arg(long, global = true, default_value = "codegen.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one turn: upload the workspace, generate, and print the result.
    Turn {
        /// Request text sent to the service.
        #[arg(short, long)]
        message: String,
        /// Workspace root; repeat for multi-root workspaces.
        #[arg(long = "root", required = true)]
        roots: Vec<PathBuf>,
        /// Continue an existing conversation instead of starting one.
        #[arg(long)]
        conversation: Option<String>,
        /// Originating tab recorded in the upload history.
        #[arg(long)]
        tab: Option<String>,
        /// Override `service.endpoint`.
        #[arg(long)]
        endpoint: Option<String>,
        /// Write generated files and remove deleted ones.
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Serialize)]
struct TurnSummary {
    conversation_id: String,
    generation_id: Option<String>,
    cancelled: bool,
    iteration: u32,
    remaining_iterations: Option<u32>,
    total_iterations: Option<u32>,
    new_files: Vec<String>,
    deleted_files: Vec<String>,
    references: usize,
    applied: Option<ApplySummary>,
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            match err.downcast_ref::<SessionError>() {
                Some(session_err) => exit_codes::for_error(session_err),
                None => exit_codes::INVALID,
            }
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Turn {
            message,
            roots,
            conversation,
            tab,
            endpoint,
            apply,
        } => {
            let mut cfg = load_config(&cli.config)?;
            if let Some(endpoint) = endpoint {
                cfg.service.endpoint = endpoint;
                cfg.validate()?;
            }
            let input = TurnInput {
                tab_id: tab,
                ..TurnInput::new(message)
            };
            cmd_turn(&cfg, roots, conversation, input, apply).await
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &EngineConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

async fn cmd_turn(
    cfg: &EngineConfig,
    roots: Vec<PathBuf>,
    conversation: Option<String>,
    input: TurnInput,
    apply: bool,
) -> Result<i32> {
    let paths = roots
        .into_iter()
        .map(|root| {
            root.canonicalize()
                .with_context(|| format!("workspace root {}", root.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let roots = WorkspaceRoot::from_paths(paths);
    let service: Arc<dyn GenerationService> =
        Arc::new(HttpGenerationService::from_config(&cfg.service)?);
    let engine = SessionEngine::from_config(cfg)
        .with_progress(Arc::new(|message: &str| eprintln!("{message}")));

    let state = match conversation {
        Some(conversation_id) => {
            PrepareState::initial(SessionConfig::new(conversation_id, roots, service))
        }
        None => engine.start_conversation(service, roots).await?,
    };

    spawn_ctrl_c(input.cancel.clone());
    let next = engine.run_turn(&state, &input).await?;
    let cancelled = input.cancel.is_cancelled()
        && next.config.last_generation_id == state.config.last_generation_id;

    let applied = if apply && !cancelled {
        Some(apply_changes(
            &next.accumulated.new_files,
            &next.accumulated.deleted_files,
        )?)
    } else {
        None
    };

    let accumulated = &next.accumulated;
    let summary = TurnSummary {
        conversation_id: next.config.conversation_id.clone(),
        generation_id: next.config.last_generation_id.clone(),
        cancelled,
        iteration: accumulated.iteration,
        remaining_iterations: accumulated.counts.remaining,
        total_iterations: accumulated.counts.total,
        new_files: accumulated.new_files.iter().map(|file| file.uri()).collect(),
        deleted_files: accumulated
            .deleted_files
            .iter()
            .map(|file| file.path.display().to_string())
            .collect(),
        references: accumulated.references.len(),
        applied,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("serialize summary")?
    );

    Ok(if cancelled {
        exit_codes::CANCELLED
    } else {
        exit_codes::OK
    })
}

/// Cancel the turn on the first Ctrl-C.
fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            cancel.cancel();
        }
    });
}
