//! Command line runner.
//!
//! ```bash
//! agd-eval --config run.json sample
//! agd-eval --config run.json run
//! agd-eval --config run.json retry --model ministral-3b-latest
//! agd-eval --config run.json analyze
//! ```
//!
//! `RUST_LOG` controls verbosity; the default is `info`.

mod config;

use std::path::PathBuf;

use agd_eval::{
    Evaluation, EvaluationReport, FamilyCorpus, Model, ModelOutcome, RunMode, Sample,
};
use agd_eval_providers::{Credentials, build_model};
use clap::{Parser, Subcommand};

use crate::config::RunConfig;

#[derive(Parser)]
#[command(
    name = "agd-eval",
    version,
    about = "Zero-shot AGD classification benchmark for language models"
)]
struct Cli {
    /// Run configuration file.
    #[arg(long, short, default_value = "agd-eval.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Draw the experiment sample and save it with the composed prompt.
    Sample,
    /// Classify the whole sample with each model.
    Run {
        /// Only this model.
        #[arg(long)]
        model: Option<String>,
    },
    /// Re-dispatch domains that still have no verdict.
    Retry {
        /// Only this model.
        #[arg(long)]
        model: Option<String>,
    },
    /// Compute metrics from the verdict logs.
    Analyze {
        /// Only this model.
        #[arg(long)]
        model: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = RunConfig::load(&cli.config)?;
    log::debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Sample => sample(&config),
        Command::Run { model } => run(&config, RunMode::Fresh, model.as_deref()),
        Command::Retry { model } => run(&config, RunMode::Retry, model.as_deref()),
        Command::Analyze { model } => analyze(&config, model.as_deref()),
    }
}

fn evaluation(config: &RunConfig, mode: RunMode) -> Result<Evaluation, Box<dyn std::error::Error>> {
    let spec = config.experiment_spec(mode)?;
    Ok(Evaluation::new(spec, config.evaluation_paths())?
        .with_dispatch_config(config.dispatch_config())
        .with_reconcile_config(config.reconcile_config()))
}

fn sample(config: &RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let eval = evaluation(config, RunMode::Fresh)?;
    let sample = prepare(config, &eval)?;
    println!(
        "Experiment {}: {} domains in {}",
        sample.experiment,
        sample.len(),
        eval.paths().sample_file(sample.experiment).display()
    );
    Ok(())
}

fn prepare(config: &RunConfig, eval: &Evaluation) -> Result<Sample, Box<dyn std::error::Error>> {
    let corpus = FamilyCorpus::load(&config.corpus.families_dir, &config.corpus.legitimate_file)?;
    log::info!(
        "Corpus: {} families, {} legitimate domains",
        corpus.family_names().count(),
        corpus.legitimate_count()
    );
    Ok(eval.prepare_sample(&corpus)?)
}

fn run(
    config: &RunConfig,
    mode: RunMode,
    only: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let eval = evaluation(config, mode)?;
    let sample = match mode {
        RunMode::Fresh => prepare(config, &eval)?,
        RunMode::Retry => eval.load_sample()?,
    };

    let credentials = Credentials::load(&config.secrets_file.0)?;
    let models = config
        .selected_models(only)?
        .into_iter()
        .map(|spec| build_model(spec, &credentials, config.request_timeout()))
        .collect::<Result<Vec<Box<dyn Model>>, _>>()?;

    let outcomes = eval.run_all(&models, &sample);
    println!("=== Experiment {} ({:?}) ===", eval.spec().id, mode);
    let mut aborted = 0;
    for outcome in &outcomes {
        match outcome {
            ModelOutcome::Finished(run) => {
                let status = run
                    .status
                    .map_or_else(|| "dispatched".to_string(), |s| s.to_string());
                println!(
                    "  {}: {status} after {} pass(es), {} of {} domains missing",
                    run.model,
                    run.passes,
                    run.missing.len(),
                    sample.len()
                );
            }
            ModelOutcome::Aborted { model, error } => {
                aborted += 1;
                println!("  {model}: aborted: {error}");
            }
        }
    }

    if aborted > 0 {
        return Err(format!("{aborted} model(s) aborted").into());
    }
    Ok(())
}

fn analyze(config: &RunConfig, only: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let eval = evaluation(config, RunMode::Fresh)?;
    let sample = eval.load_sample()?;
    let names: Vec<&str> = config
        .selected_models(only)?
        .into_iter()
        .map(|spec| spec.model.as_str())
        .collect();

    let report = eval.analyze(&names, &sample)?;
    print_summary(&report);
    println!(
        "\nResults written to: {}",
        eval.paths().metrics_report(eval.spec().id).display()
    );
    Ok(())
}

fn print_summary(report: &EvaluationReport) {
    println!("=== Experiment {} metrics ===", report.experiment);
    println!(
        "{:<28} {:>8} {:>9} {:>8} {:>8} {:>8} {:>8} {:>8} {:>12}",
        "model", "accuracy", "precision", "recall", "f1", "fpr", "mcc", "kappa", "unclassified"
    );
    for model in &report.models {
        let overall = &model.metrics.overall;
        println!(
            "{:<28} {:>8} {:>9} {:>8} {:>8} {:>8} {:>8} {:>8} {:>12}",
            model.model,
            overall.accuracy.to_string(),
            overall.precision.to_string(),
            overall.recall.to_string(),
            overall.f1_score.to_string(),
            overall.fpr.to_string(),
            overall.mcc.to_string(),
            overall.kappa.to_string(),
            overall.unclassified
        );
    }
}
