//! Tribunal - adversarial document analysis CLI
//!
//! The `tribunal` command runs the skeptic, validator and synthesis stages
//! over a set of document summaries and prints the resulting memo.
//!
//! ## Commands
//!
//! - `run`: Submit objectives plus a context file, stream progress, print the memo
//! - `heuristics`: Print the default extractor heuristics as TOML

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use tribunal_core::{
    AnalysisContext, ExtractorConfig, FindingExtractor, PipelineConfig, StatusEvent,
    ValidationReport, ValidationRequest, ValidationService, TOTAL_BUDGET,
};
use tribunal_llm::{AnthropicClient, TextGenerator};
use tribunal_state::{AnalysisStore, MemoryAnalysisStore, SurrealAnalysisStore};

#[derive(Parser)]
#[command(name = "tribunal")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Adversarial three-stage document analysis", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "TRIBUNAL_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a deal: skeptic, then validator, then synthesis
    Run {
        /// Analysis objective (repeatable)
        #[arg(short, long = "objective", required = true)]
        objectives: Vec<String>,

        /// JSON file with document summaries and key data points
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// Print the full report as JSON instead of the memo
        #[arg(long)]
        json: bool,

        /// TOML file overriding the extraction heuristics
        #[arg(long, env = "TRIBUNAL_HEURISTICS")]
        heuristics: Option<PathBuf>,

        /// Where runs, findings and status events are recorded
        #[arg(long, value_enum, default_value_t = StoreKind::Memory, env = "TRIBUNAL_STORE")]
        store: StoreKind,

        /// Also write the JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Do not stream status events to stderr
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print the default extraction heuristics as TOML
    Heuristics {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Process-local; nothing survives the command
    Memory,
    /// SurrealDB via `SURREALDB_URL`, else an embedded database under `.tribunal/db`
    Surreal,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tribunal_core::telemetry::init_tracing(cli.log_json, level);

    match cli.command {
        Commands::Run {
            objectives,
            context,
            json,
            heuristics,
            store,
            report,
            quiet,
        } => {
            let request = load_request(objectives, context.as_deref())?;
            let extractor = load_extractor(heuristics.as_deref())?;
            let generator: Arc<dyn TextGenerator> = Arc::new(
                AnthropicClient::from_env().context("Failed to configure the model client")?,
            );
            let store = open_store(store).await?;
            let service =
                ValidationService::new(generator, store, extractor, PipelineConfig::from_env());

            let outcome = cmd_run(&service, request, !quiet, cli.verbose).await;
            service.shutdown().await;
            tribunal_core::METRICS.flush();
            let report_data = outcome?;

            if let Some(path) = report {
                write_report(&path, &report_data)?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&report_data)?);
            } else {
                print!("{}", render_memo(&report_data));
            }
            Ok(())
        }
        Commands::Heuristics { output } => cmd_heuristics(output.as_deref()),
    }
}

/// Submit the request, stream its status events, and wait for the report.
async fn cmd_run(
    service: &ValidationService,
    request: ValidationRequest,
    show_progress: bool,
    show_heartbeats: bool,
) -> Result<ValidationReport> {
    let run_id = service
        .start_run(request)
        .context("Request rejected")?;
    info!(run_id = %run_id, "run submitted");

    if show_progress {
        let mut subscription = service
            .subscribe(&run_id)
            .context("Failed to subscribe to run status")?;
        while let Some(event) = subscription.next().await {
            if event.is_heartbeat() && !show_heartbeats {
                continue;
            }
            eprintln!("{}", render_event(&event));
        }
    }

    service
        .wait(&run_id)
        .await
        .with_context(|| format!("Run {} did not complete", run_id))
}

fn cmd_heuristics(output: Option<&Path>) -> Result<()> {
    let rendered = ExtractorConfig::default()
        .to_toml_string()
        .context("Failed to render default heuristics")?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write heuristics to {:?}", path))?;
            println!("Wrote default heuristics to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn load_request(objectives: Vec<String>, context: Option<&Path>) -> Result<ValidationRequest> {
    let context = match context {
        Some(path) => read_json_file::<AnalysisContext>(path)?,
        None => AnalysisContext::default(),
    };
    let request = ValidationRequest::new(objectives, context);
    request.validate().context("Invalid request")?;
    Ok(request)
}

fn load_extractor(heuristics: Option<&Path>) -> Result<FindingExtractor> {
    let Some(path) = heuristics else {
        return Ok(FindingExtractor::default());
    };
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read heuristics file: {:?}", path))?;
    let config = ExtractorConfig::from_toml_str(&source)
        .with_context(|| format!("Invalid heuristics in {:?}", path))?;
    Ok(FindingExtractor::new(config))
}

async fn open_store(kind: StoreKind) -> Result<Arc<dyn AnalysisStore>> {
    Ok(match kind {
        StoreKind::Memory => Arc::new(MemoryAnalysisStore::new()),
        StoreKind::Surreal => Arc::new(
            SurrealAnalysisStore::from_env()
                .await
                .context("Failed to connect to the analysis store")?,
        ),
    })
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read context file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

fn write_report(path: &Path, report: &ValidationReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write report to {:?}", path))
}

fn render_event(event: &StatusEvent) -> String {
    let mut line = format!(
        "[{:>3}%] {:<9} {:<10} {}",
        event.progress,
        event.scope.name(),
        event.status.name(),
        event.current_task
    );
    if event.is_heartbeat() {
        line.push_str(" (still working)");
    }
    if let Some(quality) = &event.quality {
        let _ = write!(
            line,
            " [quality {:.2}{}]",
            quality.score,
            if quality.standard_met { "" } else { ", below standard" }
        );
    }
    line
}

/// Plain-text decision memo.
fn render_memo(report: &ValidationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Tribunal memo for run {}", report.run_id);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Recommendation: {} (confidence {:.0}%)",
        report.recommendation.as_str().to_uppercase(),
        report.overall_confidence * 100.0
    );
    if report.standard_met {
        let _ = writeln!(out, "Quality: {:.2} (standard met)", report.quality.aggregate);
    } else {
        let (weakest, score) = report.quality.weakest();
        let _ = writeln!(
            out,
            "Quality: {:.2} (below standard; weakest: {} {:.2})",
            report.quality.aggregate, weakest, score
        );
    }
    let _ = writeln!(
        out,
        "Tokens: {} of {} ({}ms)",
        report.tokens_used(),
        TOTAL_BUDGET,
        report.duration_ms()
    );

    let _ = writeln!(out, "\nExecutive summary\n-----------------");
    let _ = writeln!(out, "{}", report.executive_summary);

    let _ = writeln!(out, "\nStages\n------");
    for stage in &report.stages {
        let _ = writeln!(
            out,
            "{:<9} {} findings ({} critical), quality {:.2}, {} tokens, {} retries",
            stage.stage.name(),
            stage.findings,
            stage.critical_findings,
            stage.quality_score,
            stage.tokens_consumed,
            stage.retry_count
        );
    }

    let _ = writeln!(out, "\nFindings\n--------");
    for (i, (stage, finding)) in report.findings.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{}] [{}/{}] {}",
            i + 1,
            stage.name(),
            finding.severity.name(),
            finding.category.name(),
            finding.title
        );
        let _ = writeln!(out, "   {}", finding.description);
        if !finding.evidence_references.is_empty() {
            let _ = writeln!(out, "   Evidence: {}", finding.evidence_references.join("; "));
        }
        for action in &finding.recommended_actions {
            let _ = writeln!(out, "   Action: {}", action);
        }
    }
    out
}
