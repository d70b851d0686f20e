#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use signal_fusion::artifacts::{
    DEFAULT_FEEDBACK_FILE, DEFAULT_FUSED_FILE, DEFAULT_LOGS_FILE, DEFAULT_RESULTS_FILE,
};
use signal_fusion::config::{BackendKind, RunConfig};
use signal_fusion::evaluation::Qualitative;
use signal_fusion::fusion::Alignment;
use signal_fusion::pipeline::{self, ClassifyPaths, EvaluatePaths, ReportFormat};
use signal_fusion::report::{render_metrics_table, text_preview, RunReport, TEXT_PREVIEW_CHARS};
use signal_fusion::BatchSummary;

const DEFAULT_LOG_FILTER: &str = "sigfuse=info,signal_fusion=info";

#[derive(Parser)]
#[command(
    name = "sigfuse",
    version,
    about = "Classify citizen feedback with a local LLM and fuse it with deployment-failure predictions"
)]
struct Cli {
    /// JSON run configuration (all keys optional)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Commands,
}

/// Flags applied on top of the config file and environment.
#[derive(Args)]
struct Overrides {
    #[arg(long, global = true)]
    model: Option<String>,
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,
    #[arg(long, global = true)]
    ollama_url: Option<String>,
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    /// Pause after every model call
    #[arg(long, global = true)]
    delay_ms: Option<u64>,
    /// Model calls in flight (1 = sequential)
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Prompt template slug
    #[arg(long, global = true)]
    prompt: Option<String>,
    /// Weight of the log probability; the feedback weight becomes 1 - this
    #[arg(long, global = true)]
    log_weight: Option<f64>,
    #[arg(long, global = true)]
    threshold: Option<f64>,
    #[arg(long, global = true, value_enum)]
    alignment: Option<AlignmentArg>,
    /// Ground-truth-positive rows to show
    #[arg(long, global = true)]
    examples: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Label every feedback message YES / NO / UNCERTAIN / ERROR
    Classify {
        #[arg(long, default_value = DEFAULT_FEEDBACK_FILE)]
        feedback: PathBuf,
        #[arg(long, default_value = DEFAULT_RESULTS_FILE)]
        out: PathBuf,
        /// JSONL file receiving one trace event per message
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Fuse classification results with the log table and evaluate
    Evaluate {
        #[arg(long, default_value = DEFAULT_LOGS_FILE)]
        logs: PathBuf,
        #[arg(long, default_value = DEFAULT_RESULTS_FILE)]
        results: PathBuf,
        #[arg(long, default_value = DEFAULT_FUSED_FILE)]
        out: PathBuf,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = FormatArg::Md)]
        format: FormatArg,
    },
    /// Classify, then evaluate
    Run {
        #[arg(long, default_value = DEFAULT_FEEDBACK_FILE)]
        feedback: PathBuf,
        #[arg(long, default_value = DEFAULT_LOGS_FILE)]
        logs: PathBuf,
        #[arg(long, default_value = DEFAULT_RESULTS_FILE)]
        results: PathBuf,
        #[arg(long, default_value = DEFAULT_FUSED_FILE)]
        out: PathBuf,
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = FormatArg::Md)]
        format: FormatArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Subprocess,
    Http,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlignmentArg {
    Positional,
    Keyed,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Md,
    Json,
}

impl From<FormatArg> for ReportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Md => ReportFormat::Markdown,
            FormatArg::Json => ReportFormat::Json,
        }
    }
}

impl Overrides {
    fn apply(self, cfg: &mut RunConfig) {
        if let Some(model) = self.model {
            cfg.model = model;
        }
        if let Some(backend) = self.backend {
            cfg.backend = match backend {
                BackendArg::Subprocess => BackendKind::Subprocess,
                BackendArg::Http => BackendKind::Http,
            };
        }
        if let Some(url) = self.ollama_url {
            cfg.ollama_url = url;
        }
        if let Some(secs) = self.timeout_secs {
            cfg.timeout_secs = secs;
        }
        if let Some(ms) = self.delay_ms {
            cfg.delay_ms = ms;
        }
        if let Some(n) = self.concurrency {
            cfg.concurrency = n;
        }
        if let Some(slug) = self.prompt {
            cfg.prompt = slug;
        }
        if let Some(w) = self.log_weight {
            cfg.log_weight = w;
            cfg.feedback_weight = 1.0 - w;
        }
        if let Some(t) = self.threshold {
            cfg.threshold = t;
        }
        if let Some(a) = self.alignment {
            cfg.alignment = match a {
                AlignmentArg::Positional => Alignment::Positional,
                AlignmentArg::Keyed => Alignment::Keyed,
            };
        }
        if let Some(n) = self.examples {
            cfg.qualitative_examples = n;
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "Classified {} messages: {} YES, {} NO, {} UNCERTAIN, {} ERROR",
        summary.total, summary.yes, summary.no, summary.uncertain, summary.error
    );
}

fn print_evaluation(report: &RunReport) {
    let eval = &report.evaluation;
    println!("=== Logs-only model ===");
    print!("{}", render_metrics_table(&eval.log_only));
    println!();
    println!("=== Fused model (logs + LLM feedback) ===");
    print!("{}", render_metrics_table(&eval.fused));
    println!();

    let pos_log = eval.log_only.positive();
    let pos_fused = eval.fused.positive();
    println!(
        "Failure class F1: logs-only {:.3}, fused {:.3} ({:+.3})",
        pos_log.f1,
        pos_fused.f1,
        pos_fused.f1 - pos_log.f1
    );
    println!();

    println!("=== Qualitative examples ===");
    match &eval.qualitative {
        Qualitative::Examples(examples) => {
            for ex in examples {
                println!(
                    "[{}] \"{}\" -> LLM: {}",
                    ex.language,
                    text_preview(&ex.text, TEXT_PREVIEW_CHARS),
                    ex.label
                );
                println!(
                    "    Log prob: {:.2} | Fused risk: {:.2}",
                    ex.log_prob, ex.fused_risk
                );
            }
        }
        Qualitative::NoPositiveExamples => println!("{}", Qualitative::NO_POSITIVES_MESSAGE),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    cfg.apply_env()?;
    cli.overrides.apply(&mut cfg);
    cfg.validate()?;

    match cli.command {
        Commands::Classify {
            feedback,
            out,
            trace,
        } => {
            let paths = ClassifyPaths {
                feedback,
                out,
                trace,
            };
            let summary = pipeline::run_classification(&cfg, &paths).await?;
            print_summary(&summary);
            println!("Results saved to {}", paths.out.display());
        }
        Commands::Evaluate {
            logs,
            results,
            out,
            report,
            format,
        } => {
            let paths = EvaluatePaths {
                logs,
                results,
                out,
                report,
                format: format.into(),
            };
            let report = pipeline::run_evaluation(&cfg, &paths, None)?;
            print_evaluation(&report);
            println!();
            println!("Fused results saved to {}", paths.out.display());
        }
        Commands::Run {
            feedback,
            logs,
            results,
            out,
            trace,
            report,
            format,
        } => {
            let classify = ClassifyPaths {
                feedback,
                out: results.clone(),
                trace,
            };
            let evaluate = EvaluatePaths {
                logs,
                results,
                out,
                report,
                format: format.into(),
            };
            let report = pipeline::run_all(&cfg, &classify, &evaluate).await?;
            if let Some(summary) = &report.batch {
                print_summary(summary);
                println!();
            }
            print_evaluation(&report);
            println!();
            println!("Fused results saved to {}", evaluate.out.display());
        }
    }

    Ok(())
}
