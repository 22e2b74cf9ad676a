use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use segnet::{
    burn_backend_types::{InferenceDevice, NAME},
    training::{run_evaluation, run_training, TrainingCliArgs},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "segnet")]
#[command(about = "SegNet: encoder/decoder networks for semantic segmentation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a network
    Train {
        /// Training configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Override the number of epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Override the learning rate
        #[arg(long)]
        learning_rate: Option<f64>,

        /// Override the batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// torchvision VGG16 checkpoint used to initialize the encoder
        #[arg(short, long)]
        pretrained: Option<PathBuf>,
    },

    /// Score a checkpoint on the validation split
    Eval {
        /// Training configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Checkpoint directory written during training
        #[arg(long, default_value = "artifacts")]
        checkpoint: PathBuf,
    },

    /// Show backend information
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            epochs,
            learning_rate,
            batch_size,
            pretrained,
        } => run_training(TrainingCliArgs {
            config_path: config,
            epochs,
            learning_rate,
            batch_size,
            pretrained,
        }),

        Commands::Eval { config, checkpoint } => {
            let scores = run_evaluation(&config, &checkpoint)?;
            println!("{}", serde_json::to_string_pretty(&scores)?);
            Ok(())
        }

        Commands::Info => {
            println!("SegNet Information:");
            println!("  Backend: {NAME}");
            println!("  Device: {:?}", InferenceDevice::default());
            Ok(())
        }
    }
}
