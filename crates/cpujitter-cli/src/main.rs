//! CLI for cpujitter — true random bytes from CPU execution-time jitter.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cpujitter")]
#[command(about = "cpujitter — true random bytes from CPU execution-time jitter")]
#[command(version = cpujitter_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that this host's timer can support jitter collection
    Check {
        /// Emit the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Collect entropy and write it to stdout (hex) or a file (raw)
    Fetch {
        /// Number of bytes to collect
        #[arg(long, default_value = "32")]
        bytes: usize,

        /// Write raw bytes to this file instead of hex to stdout
        #[arg(long)]
        output: Option<String>,

        /// Oversampling rate: multiplies the measurements per output block
        #[arg(long, default_value = "1")]
        osr: u32,

        /// Disable the memory-access noise source
        #[arg(long)]
        no_memory_access: bool,

        /// Disable pool stirring between blocks
        #[arg(long)]
        no_stir: bool,

        /// Disable Von Neumann debiasing
        #[arg(long)]
        no_unbias: bool,
    },

    /// Collect a sample and report its statistical quality
    Quality {
        /// Sample size in bytes (minimum 64)
        #[arg(long, default_value = "4096")]
        bytes: usize,

        /// Oversampling rate: multiplies the measurements per output block
        #[arg(long, default_value = "1")]
        osr: u32,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Check { json } => commands::check::run(json),
        Commands::Fetch {
            bytes,
            output,
            osr,
            no_memory_access,
            no_stir,
            no_unbias,
        } => commands::fetch::run(
            bytes,
            output.as_deref(),
            commands::collector_config(osr, no_memory_access, no_stir, no_unbias),
        ),
        Commands::Quality { bytes, osr, json } => {
            commands::quality::run(bytes, json, commands::collector_config(osr, false, false, false))
        }
    };
    std::process::exit(code);
}
