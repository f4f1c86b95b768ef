//! ICR CLI - Offline label recognition for graded card slabs.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use icr_core::LabelRegion;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  65  Data error (undecodable image, invalid catalog or OCR fixture)
  66  Input file not found or unreadable
  69  OCR provider unavailable
  74  Cannot write output file";

#[derive(Parser)]
#[command(name = "icr")]
#[command(author, version, about = "Graded card label recognition", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Show debug logs on stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print command results, no summaries
    #[arg(short, long, global = true)]
    quiet: bool,

    /// When to use colored output
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

/// Output format for command results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 content hash of each image
    Hash {
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Crop the label out of a slab photo
    Extract {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output PNG (defaults to <FILE stem>.label.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Relative crop region as x,y,width,height
        #[arg(long, value_name = "X,Y,W,H")]
        region: Option<LabelRegion>,
    },

    /// Extract labels from slab photos and stitch them into one composite
    Stitch {
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Output PNG for the composite
        #[arg(short, long)]
        output: PathBuf,

        /// Inputs are already cropped labels
        #[arg(long)]
        labels: bool,

        /// Relative crop region as x,y,width,height
        #[arg(long, value_name = "X,Y,W,H", conflicts_with = "labels")]
        region: Option<LabelRegion>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Parse PSA label text into structured fields
    Parse {
        /// Text file with one label line per line (reads stdin when omitted)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Run the full pipeline on slab photos and match them against a catalog
    Scan {
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Card catalog (JSON array of cards)
        #[arg(long)]
        catalog: PathBuf,

        /// Replay a recorded OCR response instead of calling Google Vision
        #[arg(long, value_name = "JSON")]
        mock_ocr: Option<PathBuf>,

        /// Batch identifier recorded on every scan
        #[arg(long)]
        batch_id: Option<String>,

        /// Relative crop region as x,y,width,height
        #[arg(long, value_name = "X,Y,W,H")]
        region: Option<LabelRegion>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("icr={level},icr_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(command: Commands, quiet: bool) -> Result<()> {
    match command {
        Commands::Hash { files, format } => commands::hash::execute(files, format),
        Commands::Extract {
            file,
            output,
            region,
        } => commands::extract::execute(file, output, region, quiet),
        Commands::Stitch {
            files,
            output,
            labels,
            region,
            format,
        } => commands::stitch::execute(files, output, labels, region, format, quiet),
        Commands::Parse { file, format } => commands::parse::execute(file, format),
        Commands::Scan {
            files,
            catalog,
            mock_ocr,
            batch_id,
            region,
            format,
        } => {
            let options = commands::scan::ScanOptions {
                catalog,
                mock_ocr,
                batch_id,
                region,
                format,
                quiet,
            };
            commands::scan::execute(files, options).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.color {
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
        ColorChoice::Auto => {}
    }
    init_tracing(cli.verbose, cli.quiet);

    if let Err(err) = run(cli.command, cli.quiet).await {
        let exit = exit_codes::ExitCode::from_anyhow(&err);
        eprintln!("{} {}", "Error:".red().bold(), exit.message);
        std::process::exit(exit.code);
    }
}
