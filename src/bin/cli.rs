use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use series_flow::models::Point;
use series_flow::schema::TaskDefinition;
use series_flow::stream_engine::{EdgeSender, InEdge, OutEdge};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a task over a stream of JSON-lines points
    Run {
        /// Path to the task definition (YAML, JSON or TOML)
        #[arg(short, long)]
        task: PathBuf,
        /// Points to feed, one JSON object per line (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Build a task definition without running it
    Check {
        /// Path to the task definition (YAML, JSON or TOML)
        #[arg(short, long)]
        task: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run { task, input } => run(task, input).await,
        Commands::Check { task } => {
            let definition = TaskDefinition::load(&task)?;
            definition.to_executor()?;
            tracing::info!(
                nodes = definition.nodes.len(),
                edges = definition.edges.len(),
                "task {} is valid",
                task.display()
            );
            Ok(())
        }
    }
}

async fn run(task: PathBuf, input: Option<PathBuf>) -> Result<()> {
    let definition = TaskDefinition::load(&task)?;
    let mut executor = definition.to_executor()?;

    let sources: Vec<EdgeSender> = definition
        .roots()
        .into_iter()
        .map(|id| executor.input_for(id))
        .collect();

    let mut printers = JoinSet::new();
    for id in definition.leaves() {
        let mut sink = executor.output_from(id);
        printers.spawn(async move {
            while let Some(point) = sink.next_point().await {
                println!("{}", serde_json::to_string(&point)?);
            }
            Ok::<(), anyhow::Error>(())
        });
    }

    let stats = executor.stats();
    let running = tokio::spawn(executor.run());

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    feed(reader, &sources).await?;
    drop(sources);

    let outcome = running.await?;
    while let Some(printed) = printers.join_next().await {
        printed??;
    }
    tracing::info!("{}", stats.report());
    outcome
}

/// Pushes every parsed line to every source. Returns early once the task
/// stops accepting points; the task's own error is reported by the caller.
async fn feed(reader: Box<dyn AsyncBufRead + Unpin + Send>, sources: &[EdgeSender]) -> Result<()> {
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let point: Point = match serde_json::from_str(&line) {
            Ok(point) => point,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "skipping malformed point");
                continue;
            }
        };
        for source in sources {
            if source.collect_point(point.clone()).await.is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}
