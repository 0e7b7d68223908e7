use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use presence_core::{DetectorConfig, Thresholds};
use presence_session::{load_thresholds, Config, HttpBackend, LivelinessContext, VoterIdSuffix};
use tracing_subscriber::EnvFilter;

mod replay;

#[derive(Parser, Debug)]
#[command(name = "presence")]
#[command(author, version, about = "Attendance liveliness tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded landmark trace through the liveliness checks
    Replay {
        /// JSON Lines trace file
        trace: PathBuf,

        /// TOML file overriding detector tuning
        #[arg(long)]
        tuning: Option<PathBuf>,

        /// Blinks required for verification
        #[arg(long, default_value_t = 2)]
        blink_required: u32,

        /// Movement events required for verification
        #[arg(long, default_value_t = 5)]
        movement_required: u32,

        /// Bypass the liveliness checks
        #[arg(long)]
        liveliness_disabled: bool,

        /// Print events and summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective liveliness thresholds from the backend
    Thresholds {
        #[arg(long, value_enum, default_value_t = ContextArg::Attendance)]
        context: ContextArg,
    },
    /// Check a voter ID suffix the way a session would
    CheckVoterId {
        digits: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ContextArg {
    Attendance,
    FaceRegistration,
    CitizenLogin,
}

impl From<ContextArg> for LivelinessContext {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::Attendance => Self::Attendance,
            ContextArg::FaceRegistration => Self::FaceRegistration,
            ContextArg::CitizenLogin => Self::CitizenLogin,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            trace,
            tuning,
            blink_required,
            movement_required,
            liveliness_disabled,
            json,
        } => {
            let thresholds =
                Thresholds::new(blink_required, movement_required, !liveliness_disabled)?;
            let tuning = match tuning {
                Some(path) => replay::load_tuning(&path)?,
                None => DetectorConfig::default(),
            };
            let file = File::open(&trace)
                .with_context(|| format!("failed to open trace {}", trace.display()))?;
            let result = replay::replay(BufReader::new(file), thresholds, tuning)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for event in &result.events {
                    println!("{event}");
                }
                let s = &result.summary;
                println!(
                    "{} frames ({} with a face): blink {}/{}, movement {}/{}, {}",
                    s.frames,
                    s.face_frames,
                    s.state.blink.count,
                    thresholds.blink_required,
                    s.state.movement.count,
                    thresholds.movement_required,
                    if s.satisfied { "verified" } else { "not verified" }
                );
            }
        }
        Command::Thresholds { context } => {
            let config = Config::from_env();
            let backend = HttpBackend::from_config(&config);
            tracing::debug!(api = %config.api_url, "querying liveliness configuration");
            let thresholds = load_thresholds(&backend, context.into());
            println!("{}", serde_json::to_string_pretty(&thresholds)?);
        }
        Command::CheckVoterId { digits } => {
            let suffix = VoterIdSuffix::parse(&digits)?;
            println!("{suffix}: ok");
        }
    }

    Ok(())
}
