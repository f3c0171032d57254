use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use sluice::models::Point;
use sluice::runtime::engine::stream_edge;
use sluice::runtime::task::{Dbrp, ExecutingTask, Task, TaskType};
use sluice::services::Services;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and link a task definition without running it
    Check {
        /// Path to the task definition YAML file
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Print the task pipeline as a Graphviz document
    Dot {
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Run a stream task, feeding it JSON points from stdin (one per
    /// line) until EOF
    Run {
        #[arg(long, short)]
        file: PathBuf,
    },
}

/// On-disk task definition record.
#[derive(Debug, Deserialize)]
struct TaskDefinition {
    name: String,
    script: String,
    #[serde(rename = "type")]
    task_type: TaskType,
    #[serde(default)]
    dbrps: Vec<Dbrp>,
    #[serde(default)]
    snapshot_interval: Option<String>,
}

fn load_task(path: &PathBuf) -> Result<Task> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read task definition {}", path.display()))?;
    let def: TaskDefinition = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse task definition {}", path.display()))?;
    let snapshot_interval = match &def.snapshot_interval {
        Some(s) => sluice::dsl::lexer::parse_duration(s)?
            .to_std()
            .map_err(|_| anyhow!("snapshot_interval must be positive"))?,
        None => Duration::ZERO,
    };
    let pipeline = sluice::dsl::parse_script(&def.script, def.task_type)?;
    Ok(Task {
        name: def.name,
        pipeline,
        task_type: def.task_type,
        dbrps: def.dbrps,
        snapshot_interval,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { file } => {
            let task = load_task(&file)?;
            let name = task.name.clone();
            let et = ExecutingTask::new(Arc::new(Services::default()), task)?;
            drop(et);
            info!(task = %name, "task definition is valid");
        }

        Commands::Dot { file } => {
            let task = load_task(&file)?;
            println!("{}", task.dot());
        }

        Commands::Run { file } => {
            let task = load_task(&file)?;
            if task.task_type != TaskType::Stream {
                return Err(anyhow!("run only supports stream tasks"));
            }
            let name = task.name.clone();
            let mut et = ExecutingTask::new(Arc::new(Services::default()), task)?;
            let (tx, rx) = stream_edge();
            et.start(vec![rx], None)?;

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut lines = stdin.lines();
            let mut count = 0u64;
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Point>(&line) {
                    Ok(point) => {
                        tx.send_point(point).await?;
                        count += 1;
                    }
                    Err(e) => error!(error = %e, "skipping malformed point"),
                }
            }
            drop(tx);
            et.wait().await;
            info!(task = %name, points = count, "input closed, task finished");
            println!("{}", et.edot());
            et.err()?;
        }
    }

    Ok(())
}
