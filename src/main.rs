//! # Class-Incremental Learning CLI
//!
//! Runs complete incremental sessions on synthetic class-clustered images.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use class_incremental::prelude::*;

/// Class-incremental learning with distillation and herding exemplars
#[derive(Parser)]
#[command(name = "class-incremental")]
#[command(version)]
#[command(about = "Class-incremental learning on synthetic images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an incremental session
    Run {
        /// Method preset: FINETUNING, LWF, ICARL, anything else selects variation
        #[arg(short, long, default_value = "ICARL")]
        method: String,

        /// Total number of classes
        #[arg(long, default_value = "10")]
        classes: usize,

        /// Number of class groups (incremental steps)
        #[arg(long, default_value = "5")]
        groups: usize,

        /// Training samples per class
        #[arg(long, default_value = "40")]
        samples_per_class: usize,

        /// Test samples per class
        #[arg(long, default_value = "20")]
        test_samples_per_class: usize,

        /// Epochs per training pass
        #[arg(short, long, default_value = "10")]
        epochs: usize,

        /// Mini-batch size
        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Base learning rate
        #[arg(long, default_value = "0.5")]
        lr: f64,

        /// Use a cosine classification head
        #[arg(long)]
        cosine: bool,

        /// Exemplar selection policy (herding or random)
        #[arg(long, default_value = "herding")]
        selection: String,

        /// Total exemplar capacity
        #[arg(long)]
        exemplars: Option<usize>,

        /// Seed for initialisation, shuffling and data generation
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Load the session configuration from a JSON file instead
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Print the canonical configuration of a method as JSON
    Params {
        /// Method preset
        #[arg(short, long, default_value = "ICARL")]
        method: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            method,
            classes,
            groups,
            samples_per_class,
            test_samples_per_class,
            epochs,
            batch_size,
            lr,
            cosine,
            selection,
            exemplars,
            seed,
            config,
        } => {
            let config = match config {
                Some(path) => LearnerConfig::load(&path)
                    .with_context(|| format!("loading configuration from {}", path))?,
                None => {
                    let mut config = LearnerConfig::for_method(&method, classes, groups);
                    config.seed = Some(seed);
                    config.splitter_seed = seed;
                    config.backbone = BackboneConfig::small([1, 4, 4]);
                    config.train = TrainParams {
                        learning_rate: lr,
                        num_epochs: epochs,
                        batch_size,
                        step_milestones: vec![epochs * 7 / 10, epochs * 9 / 10],
                        ..TrainParams::quick()
                    };
                    config.approach.use_cosine = cosine;
                    config.approach.exemplars_selection = SelectionPolicy::from(selection.as_str());
                    if let Some(capacity) = exemplars {
                        config.approach.n_exemplars = capacity;
                    }
                    config
                }
            };
            run_session(config, samples_per_class, test_samples_per_class, seed)?;
        }
        Commands::Params { method, output } => {
            let config = LearnerConfig::for_method(&method, 100, 10);
            match output {
                Some(path) => {
                    config.save(&path)?;
                    println!("Configuration for {} written to {}", Method::from(method.as_str()), path);
                }
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
    }

    Ok(())
}

fn run_session(
    config: LearnerConfig,
    samples_per_class: usize,
    test_samples_per_class: usize,
    seed: u64,
) -> Result<()> {
    if samples_per_class == 0 || test_samples_per_class == 0 {
        bail!("samples per class must be > 0");
    }

    let [c, h, w] = config.backbone.input_shape;
    let generator = SyntheticImages::new(config.num_classes, [c, h, w], 0.15, seed);
    let train = generator.generate(samples_per_class, 0)?;
    let test = generator.generate(test_samples_per_class, 1)?;
    info!(train = train.len(), test = test.len(), "Generated synthetic data");

    let mut learner = IncrementalLearner::new(config)?;

    println!("\n=== Class-Incremental Session ===");
    println!(
        "{:>5} {:>7} {:>10} {:>10} {:>10} {:>10}",
        "step", "known", "loss", "accuracy", "nme", "exemplars"
    );
    for _ in 0..learner.num_groups() {
        let report = learner.run_step(&train, &test)?;
        println!(
            "{:>5} {:>7} {:>10.4} {:>9.2}% {:>10} {:>10}",
            report.step,
            report.n_known_classes,
            report.training.final_loss().unwrap_or(f64::NAN),
            report.accuracy * 100.0,
            report
                .nme_accuracy
                .map_or_else(|| "-".to_string(), |a| format!("{:.2}%", a * 100.0)),
            report.num_exemplars
        );
    }

    Ok(())
}
