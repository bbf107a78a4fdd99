use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "acq",
    about = "Inspect, generate, and convert acqstore image exports",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with datastore settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the summary, axes, and image count of an export
    Info(InfoArgs),
    /// List the coordinates stored in an export
    Ls(LsArgs),
    /// Write a synthetic dataset, for trying out formats
    Generate(GenerateArgs),
    /// Re-export a dataset in another format
    Convert(ConvertArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct InfoArgs {
    pub path: PathBuf,
    /// Export format (`stack` or `series`); detected when omitted
    #[arg(long)]
    pub mode: Option<String>,
}

#[derive(Args)]
pub struct LsArgs {
    pub path: PathBuf,
    #[arg(long)]
    pub mode: Option<String>,
    /// Only list coordinates matching this partial coordinate, e.g. `z=3`
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Args)]
pub struct GenerateArgs {
    pub path: PathBuf,
    #[arg(long, default_value = "stack")]
    pub mode: String,
    #[arg(long, default_value_t = 2)]
    pub time: u32,
    #[arg(long, default_value_t = 3)]
    pub z: u32,
    #[arg(long, default_value_t = 1)]
    pub channels: u32,
    #[arg(long, default_value_t = 1)]
    pub positions: u32,
    #[arg(long, default_value_t = 64)]
    pub width: u32,
    #[arg(long, default_value_t = 64)]
    pub height: u32,
}

#[derive(Args)]
pub struct ConvertArgs {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Format of the source; detected when omitted
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub to: String,
}
