use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use quest::checkpoint::{Checkpoint, CheckpointManager, CheckpointResponse, FileStore};
use quest::core::PlanDraft;
use quest::{log, CheckpointId, Config, Error, Result, SessionId};

/// Quest - inspect research sessions and answer their checkpoints
#[derive(Parser, Debug)]
#[command(name = "quest")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    QUEST_DEBUG=1   Enable debug logging (alternative to --debug)\n    QUEST_LOG=...   Full tracing filter directive")]
pub struct Cli {
    /// Checkpoint store directory (default: ~/.quest/store)
    #[arg(short = 's', long, global = true)]
    pub store: Option<PathBuf>,

    /// Enable debug logging (writes to ~/.quest/quest.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Parse and validate a plan file, then print its execution order
    Validate {
        /// Path to a JSON plan draft
        plan: PathBuf,
    },

    /// Show a stored checkpoint and its options
    Show {
        checkpoint_id: String,
    },

    /// Show a stored session document
    Session {
        session_id: String,
    },

    /// Record a response to a pending checkpoint
    Respond {
        checkpoint_id: String,
        /// One of the checkpoint's option action ids
        action_id: String,
        /// Free-text feedback carried into the final report
        #[arg(long, short = 'f')]
        feedback: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = log::init(cli.debug) {
        eprintln!("warning: logging disabled: {}", e);
    }

    if let Command::Validate { plan } = &cli.command {
        return run_validate(plan);
    }

    let config = Config::load()?;
    let store_dir = match &cli.store {
        Some(dir) => dir.clone(),
        None => config.store_dir()?,
    };
    tracing::debug!(store = %store_dir.display(), command = ?cli.command, "dispatching");
    let manager = CheckpointManager::new(Arc::new(FileStore::new(store_dir)));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Command::Validate { .. } => Ok(()),
            Command::Show { checkpoint_id } => run_show(&manager, &checkpoint_id).await,
            Command::Session { session_id } => run_session(&manager, &session_id).await,
            Command::Respond {
                checkpoint_id,
                action_id,
                feedback,
            } => run_respond(&manager, &checkpoint_id, &action_id, feedback.as_deref()).await,
        }
    })
}

fn run_validate(path: &Path) -> Result<()> {
    tracing::info!(path = %path.display(), "validating plan");
    let text = fs::read_to_string(path)?;
    let plan = PlanDraft::parse(&text)?.into_plan("")?;

    println!("Plan is valid: {} task(s)", plan.len());
    if !plan.goal().is_empty() {
        println!("  Goal: {}", plan.goal());
    }
    if let Some(id) = plan.checkpoint_after() {
        println!("  Review after: {}", id);
    }
    println!();
    println!("Execution order:");
    for (n, task) in plan.topological_order().iter().enumerate() {
        let deps = if task.depends_on.is_empty() {
            String::new()
        } else {
            let ids: Vec<&str> = task.depends_on.iter().map(|d| d.as_str()).collect();
            format!(" (after {})", ids.join(", "))
        };
        println!("  {}. {} [{}]{}", n + 1, task.id, task.source, deps);
    }
    Ok(())
}

async fn load_checkpoint(manager: &CheckpointManager, id: &str) -> Result<Checkpoint> {
    let id = CheckpointId::from(id);
    manager
        .load(&id)
        .await?
        .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))
}

async fn run_show(manager: &CheckpointManager, id: &str) -> Result<()> {
    let checkpoint = load_checkpoint(manager, id).await?;
    print!("{}", format_checkpoint(&checkpoint));
    Ok(())
}

fn format_checkpoint(checkpoint: &Checkpoint) -> String {
    let mut out = String::new();
    out.push_str(&format!("Checkpoint {}\n", checkpoint.id));
    out.push_str(&format!("  Session:  {}\n", checkpoint.session_id().short()));
    out.push_str(&format!("  Goal:     {}\n", checkpoint.state_snapshot.goal));
    out.push_str(&format!("  Reason:   {}\n", checkpoint.reason));
    out.push_str(&format!(
        "  Created:  {}\n",
        checkpoint.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if !checkpoint.conflicts.is_empty() {
        out.push_str("\nConflicts:\n");
        for conflict in &checkpoint.conflicts {
            out.push_str(&format!("  - [{}] {}\n", conflict.kind, conflict.description));
            out.push_str(&format!("    -> {}\n", conflict.recommendation));
        }
    }

    out.push_str("\nOptions:\n");
    for option in &checkpoint.options {
        out.push_str(&format!(
            "  {:<16} {} ({})\n",
            option.action_id, option.label, option.effect_description
        ));
    }

    if let Some(response) = &checkpoint.response {
        out.push_str(&format!("\nAnswered: {}\n", response.action_id));
        if let Some(feedback) = &response.feedback {
            out.push_str(&format!("  Feedback: {}\n", feedback));
        }
    }
    out
}

async fn run_session(manager: &CheckpointManager, id: &str) -> Result<()> {
    let session_id: SessionId = id
        .parse()
        .map_err(|_| Error::SessionNotFound(id.to_string()))?;
    let doc = manager
        .session_document(session_id)
        .await?
        .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

async fn run_respond(
    manager: &CheckpointManager,
    id: &str,
    action_id: &str,
    feedback: Option<&str>,
) -> Result<()> {
    let mut response = CheckpointResponse::new(action_id);
    if let Some(feedback) = feedback {
        response = response.with_feedback(feedback);
    }
    let checkpoint = manager
        .record_response(&CheckpointId::from(id), response)
        .await?;
    tracing::info!(checkpoint = %checkpoint.id, action = action_id, "response recorded");
    println!("Recorded '{}' for checkpoint {}", action_id, checkpoint.id);
    Ok(())
}
