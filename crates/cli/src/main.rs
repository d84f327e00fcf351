// bgtcheck - BOR/BGT overlap reconciliation, headless

mod exit_codes;
mod recon;
mod sources;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use exit_codes::EXIT_SUCCESS;
use recon::RunArgs;
use sources::Overrides;

#[derive(Parser)]
#[command(name = "bgtcheck")]
#[command(about = "Reconcile BOR asset layers against the BGT topography")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match, classify and write all enabled outputs
    #[command(after_help = "\
Examples:
  bgtcheck run bgtcheck.toml
  bgtcheck run bgtcheck.toml --area Centrum --area Haven
  bgtcheck run bgtcheck.toml --area Centrum --negate --exclude-guids
  BGTCHECK_CONFIG=bgtcheck.toml bgtcheck run --output-dir /tmp/out --strict")]
    Run {
        #[command(flatten)]
        select: Selection,

        /// Exit non-zero when the output validator reports problems
        #[arg(long)]
        strict: bool,

        /// Print meta, summary and output problems as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Check config and reference data without matching
    #[command(after_help = "\
Examples:
  bgtcheck validate bgtcheck.toml
  bgtcheck validate bgtcheck.toml --area Centrum")]
    Validate {
        #[command(flatten)]
        select: Selection,
    },

    /// Re-run matching in memory and check an existing output directory
    #[command(after_help = "\
Examples:
  bgtcheck check-output bgtcheck.toml
  bgtcheck check-output bgtcheck.toml --output-dir uit --strict")]
    CheckOutput {
        #[command(flatten)]
        select: Selection,

        /// Exit non-zero when problems are found
        #[arg(long)]
        strict: bool,
    },
}

/// Config path and `[run]` / `[output]` overrides shared by all subcommands.
#[derive(Args)]
struct Selection {
    /// Path to the TOML config file
    #[arg(env = "BGTCHECK_CONFIG")]
    config: PathBuf,

    /// District to process (repeatable); replaces `run.areas`
    #[arg(long = "area", value_name = "NAME")]
    areas: Vec<String>,

    /// Process everything outside the selected districts
    #[arg(long)]
    negate: bool,

    /// Skip BOR objects listed in the exclusion folder
    #[arg(long)]
    exclude_guids: bool,

    /// Output directory; replaces `output.directory`
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
}

impl Selection {
    fn split(self) -> (PathBuf, Overrides) {
        let overrides = Overrides {
            areas: self.areas,
            negate: self.negate,
            exclude_guids: self.exclude_guids,
            output_dir: self.output_dir,
        };
        (self.config, overrides)
    }
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  bgtcheck-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

/// Logs go to stderr; `RUST_LOG` overrides the default `bgtcheck=info`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bgtcheck=info,bgtcheck_recon=info,bgtcheck_io=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Run { select, strict, json } => {
            let (config, overrides) = select.split();
            recon::cmd_run(RunArgs { config, overrides, strict, json })
        }
        Commands::Validate { select } => {
            let (config, overrides) = select.split();
            recon::cmd_validate(config, overrides)
        }
        Commands::CheckOutput { select, strict } => {
            let (config, overrides) = select.split();
            recon::cmd_check_output(config, overrides, strict)
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}
