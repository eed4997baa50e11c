//! Neuroscope command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Features from explicit inputs
//! neuroscope features --bold bold.nii.gz --confounds confounds.tsv --atlas power264.csv
//!
//! # Features from a preprocessed directory, saving the processed volume
//! neuroscope features --input-dir preproc_clean --atlas power264.csv --save-processed out/
//!
//! # Preprocess a BIDS dataset with fMRIPrep, then extract features
//! neuroscope preprocess --bids-dir bids --work-dir work --license license.txt --atlas power264.csv
//!
//! # Score a feature table with an external classifier
//! neuroscope predict --features entropy_features.csv --model scz.json --target scz --scorer ./score.py
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use neuroscope::external::{locate_preprocessed, CommandScorer, FmriprepDocker, PreprocessedInputs, Preprocessor};
use neuroscope::selection::predict;
use neuroscope::{Atlas, DiseaseTarget, FeatureVector, ModelBundle, OutputOptions, Pipeline, PipelineConfig};

/// fMRI entropy feature pipeline
#[derive(Parser, Debug)]
#[command(name = "neuroscope")]
#[command(author, version, about = "fMRI signal conditioning and entropy features", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that runs the pipeline
#[derive(Args, Debug)]
struct PipelineArgs {
    /// Atlas seed table (.csv or .tsv with x, y, z columns)
    #[arg(long)]
    atlas: PathBuf,

    /// Pipeline configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Feature table to write
    #[arg(short, long, default_value = "entropy_features.csv")]
    output: PathBuf,

    /// Also write the fully processed volume (file or directory)
    #[arg(long)]
    save_processed: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute entropy features from a preprocessed run
    Features {
        /// Preprocessed BOLD volume
        #[arg(long, requires = "confounds", conflicts_with = "input_dir")]
        bold: Option<PathBuf>,

        /// Confound table matching the BOLD volume
        #[arg(long, requires = "bold")]
        confounds: Option<PathBuf>,

        /// Directory holding *preproc_bold.nii.gz and *confounds_timeseries.tsv
        #[arg(long, required_unless_present = "bold")]
        input_dir: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Run fMRIPrep on a BIDS dataset, then compute features
    Preprocess {
        /// BIDS dataset root
        #[arg(long)]
        bids_dir: PathBuf,

        /// Working directory for fMRIPrep output
        #[arg(long)]
        work_dir: PathBuf,

        /// FreeSurfer license file
        #[arg(long)]
        license: PathBuf,

        /// Participant label without the sub- prefix
        #[arg(long, default_value = "01")]
        subject: String,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Score a feature table with an external classifier
    Predict {
        /// Feature table written by the features command
        #[arg(long)]
        features: PathBuf,

        /// Model bundle (JSON)
        #[arg(long)]
        model: PathBuf,

        /// Disease target selecting the default feature list: scz, adhd or bpd
        #[arg(long)]
        target: Option<DiseaseTarget>,

        /// Scorer program followed by its arguments
        #[arg(long, num_args = 1.., required = true, allow_hyphen_values = true)]
        scorer: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Neuroscope v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Features { bold, confounds, input_dir, pipeline } => {
            let inputs = match (bold, confounds, input_dir) {
                (Some(bold), Some(confounds), _) => PreprocessedInputs { bold, confounds },
                (_, _, Some(dir)) => locate_preprocessed(&dir)
                    .with_context(|| format!("Failed to find inputs in {}", dir.display()))?,
                _ => anyhow::bail!("Either --bold/--confounds or --input-dir is required"),
            };
            run_features(&inputs, &pipeline)?;
        }
        Commands::Preprocess { bids_dir, work_dir, license, subject, pipeline } => {
            let runner = FmriprepDocker::new(license, subject);
            let inputs = runner.preprocess(&bids_dir, &work_dir)
                .context("fMRIPrep preprocessing failed")?;
            run_features(&inputs, &pipeline)?;
        }
        Commands::Predict { features, model, target, scorer } => {
            run_predict(&features, &model, target, &scorer)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_features(inputs: &PreprocessedInputs, args: &PipelineArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let atlas = Atlas::from_path(&args.atlas)
        .with_context(|| format!("Failed to load atlas from {}", args.atlas.display()))?;
    info!("Atlas: {} regions", atlas.len());

    let pipeline = Pipeline::new(config, Arc::new(atlas)).context("Failed to set up pipeline")?;
    let options = OutputOptions {
        features_csv: Some(args.output.clone()),
        processed_volume: args.save_processed.clone(),
    };
    let features = pipeline.run_files(&inputs.bold, &inputs.confounds, &options)
        .with_context(|| format!("Pipeline failed on {}", inputs.bold.display()))?;

    info!("{} features written to {}", features.len(), args.output.display());
    Ok(())
}

fn run_predict(features: &Path, model: &Path, target: Option<DiseaseTarget>, scorer: &[String]) -> Result<()> {
    let fv = FeatureVector::read_csv(features)
        .with_context(|| format!("Failed to read features from {}", features.display()))?;
    let bundle = ModelBundle::from_path(model)
        .with_context(|| format!("Failed to load model bundle {}", model.display()))?;

    let (program, args) = scorer.split_first().context("Scorer command is empty")?;
    let scorer = CommandScorer::new(program.clone(), args.to_vec());

    let prediction = predict(&bundle, &fv, target, &scorer).context("Prediction failed")?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}
