use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use redraft_agent::graph::EventBusObserver;
use redraft_agent::{ResearchPipeline, ResearchRequest};
use redraft_core::config::AppConfig;
use redraft_core::event::EventBus;
use redraft_core::types::WorkflowEvent;

#[derive(Parser)]
#[command(name = "redraft", version, about = "Plan, research, write, and review reports with an LLM")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "redraft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a topic and write a report
    Run {
        /// The topic to research
        #[arg(trailing_var_arg = true, required = true)]
        topic: Vec<String>,
        /// Revise-then-review cycles allowed after the first review
        #[arg(long, short = 'r')]
        max_revisions: Option<u32>,
        /// Where to save the Markdown report
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Do not save the report
        #[arg(long)]
        no_save: bool,
        /// Print each stage's output as it completes
        #[arg(long)]
        show_updates: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("redraft=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "redraft", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
            Ok(())
        }
        Commands::Run {
            topic,
            max_revisions,
            output,
            no_save,
            show_updates,
        } => {
            let request = ResearchRequest::new(
                topic.join(" "),
                max_revisions.unwrap_or(config.workflow.max_revisions),
            );
            let output = (!no_save)
                .then(|| output.unwrap_or_else(|| PathBuf::from(&config.workflow.output_file)));
            run_research(&config, request, output, show_updates).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}

/// Explicit path, then `~/.redraft/config.toml`, then the environment.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = AppConfig::home_config_path().filter(|p| p.exists()) {
        info!(path = %home.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&home)?);
    }
    if std::env::var("OPENAI_API_KEY").is_err() {
        warn!("No config file and no OPENAI_API_KEY; using local Ollama");
    }
    Ok(AppConfig::from_env())
}

async fn run_research(
    config: &AppConfig,
    request: ResearchRequest,
    output: Option<PathBuf>,
    show_updates: bool,
) -> anyhow::Result<()> {
    let llm = redraft_llm::client_from_config(config);
    let pipeline = ResearchPipeline::new(llm, config)?;

    let event_bus = Arc::new(EventBus::default());
    let observer = EventBusObserver::new(event_bus.clone());
    let rx = event_bus.subscribe();

    let printer = tokio::spawn(print_progress(rx, show_updates, io::stderr()));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        eprintln!("\n[cancelling]");
        ctrl_c.cancel();
    });

    let outcome = pipeline.run(&request, &observer, &cancel).await;
    // Closing the bus lets the printer drain and exit even if the run never started.
    drop(observer);
    drop(event_bus);
    printer.await.ok();

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Research run failed");
            if e.is_retryable_run() {
                eprintln!("The failure may be transient; try running again.");
            }
            return Err(e.into());
        }
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", report.draft.trim_end())?;
    stdout.flush()?;

    if let Some(path) = output {
        std::fs::write(&path, report.to_markdown())?;
        eprintln!("Report saved to {}", path.display());
    }
    Ok(())
}

/// Print run progress until the run ends or the bus closes. Events dropped
/// because the printer fell behind are skipped, not treated as the end.
async fn print_progress<W: Write>(
    mut rx: broadcast::Receiver<WorkflowEvent>,
    show_updates: bool,
    mut out: W,
) -> W {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                debug!(skipped = n, "Progress printer lagged, skipped events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let done = matches!(
            event,
            WorkflowEvent::RunComplete { .. } | WorkflowEvent::RunError { .. }
        );
        let _ = write_event(&mut out, &event, show_updates);
        if done {
            break;
        }
    }
    out
}

fn write_event(out: &mut impl Write, event: &WorkflowEvent, show_updates: bool) -> io::Result<()> {
    match event {
        WorkflowEvent::RunStarted { run_id, .. } => writeln!(out, "[run {}]", run_id),
        WorkflowEvent::NodeComplete {
            node,
            update,
            elapsed_ms,
            ..
        } => {
            writeln!(out, "✓ {} ({:.1}s)", node, *elapsed_ms as f64 / 1000.0)?;
            if show_updates {
                let pretty = serde_json::to_string_pretty(update).unwrap_or_default();
                writeln!(out, "{}", truncate(&pretty, 600))?;
            }
            Ok(())
        }
        WorkflowEvent::RunComplete {
            steps, elapsed_ms, ..
        } => writeln!(
            out,
            "[done: {} steps in {:.1}s]",
            steps,
            *elapsed_ms as f64 / 1000.0
        ),
        WorkflowEvent::RunError { error, .. } => writeln!(out, "[error: {}]", error),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
