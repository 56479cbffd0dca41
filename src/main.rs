use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use captcha_solver::{
    bot::{BotConfig, CaptchaBot},
    browser::WebDriverBrowser,
    CaptchaSolver, CaptchaSolverBuilder, DetectorOptions, FilterOptions,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Debug, Parser)]
#[command(version, about = "Solves character CAPTCHAs with a detector and a glyph classifier")]
struct Cli {
    #[command(flatten)]
    models: ModelArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ModelArgs {
    /// ONNX character detector.
    #[arg(long, env = "CAPTCHA_DETECTOR", default_value = "models/detector.onnx")]
    detector: PathBuf,
    /// ONNX glyph classifier.
    #[arg(long, env = "CAPTCHA_CLASSIFIER", default_value = "models/classifier.onnx")]
    classifier: PathBuf,
    /// Class labels, one per line in class-index order.
    #[arg(long, env = "CAPTCHA_LABELS", default_value = "models/labels.txt")]
    labels: PathBuf,
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Minimum detector confidence.
    #[arg(long, default_value_t = 0.25)]
    confidence: f32,
    /// Position whose detection goes through the noise filter.
    #[arg(long, default_value_t = 8)]
    filtered_position: usize,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Predict the answer for image files.
    Solve { images: Vec<PathBuf> },
    /// Solve challenges on a live page through WebDriver.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, env = "CAPTCHA_URL", default_value = "http://localhost:5000")]
    url: String,
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:9515")]
    webdriver: String,
    #[arg(short = 'n', long, default_value_t = 10)]
    attempts: usize,
    #[arg(long)]
    headless: bool,
    /// Directory for captures and failure screenshots.
    #[arg(long, default_value = ".")]
    artifact_dir: PathBuf,
    /// Seconds to wait for page elements.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let solver = match build_solver(&cli.models) {
        Ok(solver) => solver,
        Err(err) => {
            tracing::error!(error = %err, "failed to load models");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Solve { images } => solve_files(&solver, &images),
        Command::Run(args) => run_bot(solver, args),
    }
}

fn build_solver(models: &ModelArgs) -> captcha_solver::Result<CaptchaSolver> {
    CaptchaSolverBuilder::new()
        .det_model(&models.detector)
        .cls_model(&models.classifier, &models.labels)
        .threads(models.threads)
        .detector_options(DetectorOptions {
            confidence_threshold: models.confidence,
            ..DetectorOptions::default()
        })
        .filter_options(FilterOptions {
            filtered_position: models.filtered_position,
            ..FilterOptions::default()
        })
        .build()
}

fn solve_files(solver: &CaptchaSolver, images: &[PathBuf]) -> ExitCode {
    let mut status = ExitCode::SUCCESS;
    for path in images {
        match solver.solve_path(path) {
            Ok(answer) => println!("{}\t{}", path.display(), answer),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "prediction failed");
                status = ExitCode::FAILURE;
            }
        }
    }
    status
}

fn run_bot(solver: CaptchaSolver, args: RunArgs) -> ExitCode {
    let browser = match WebDriverBrowser::connect(&args.webdriver, args.headless) {
        Ok(browser) => browser,
        Err(err) => {
            tracing::error!(error = %err, webdriver = %args.webdriver, "failed to start browser");
            return ExitCode::FAILURE;
        }
    };
    let config = BotConfig {
        url: args.url,
        attempts: args.attempts,
        element_timeout: Duration::from_secs(args.timeout),
        artifact_dir: args.artifact_dir,
        ..BotConfig::default()
    };

    match CaptchaBot::new(Arc::new(solver), browser, config).run() {
        Ok(report) => {
            println!(
                "{} attempts: {} solved, {} rejected, {} failed ({:.0}% success)",
                report.total(),
                report.solved(),
                report.rejected(),
                report.failed(),
                report.success_rate() * 100.0
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "run aborted");
            ExitCode::FAILURE
        }
    }
}
