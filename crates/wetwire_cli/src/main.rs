//! WETWIRE CLI
//!
//! Static analysis for workflow declaration scripts: resource listing,
//! dependency graphs, style lint with auto-fix, and policy checks over
//! resolved workflows.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use commands::{Context, GraphFormat, OutputFormat};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use wetwire_core::Severity;

#[derive(Parser)]
#[command(name = "wetwire")]
#[command(about = "WETWIRE - static analysis for workflow declaration scripts", long_about = None)]
struct Cli {
    /// Project root holding wetwire.toml
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Bypass the discovery cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List declared workflows and jobs
    List {
        /// File or directory, relative to the root
        path: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Render the dependency graph
    Graph {
        /// File or directory, relative to the root
        path: Option<PathBuf>,
        /// Diagram format
        #[arg(long, value_enum, default_value_t = GraphFormat::Mermaid)]
        format: GraphFormat,
    },
    /// Run style rules
    Lint {
        /// File or directory, relative to the root
        path: Option<PathBuf>,
        /// Rewrite files with every available fix
        #[arg(long)]
        fix: bool,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Run policy and security rules on a resolved workflow document
    Policy {
        /// Resolved workflow (JSON)
        file: PathBuf,
        /// Preset overriding the configured one
        #[arg(long)]
        preset: Option<String>,
        /// Lowest severity that fails the check
        #[arg(long)]
        fail_on: Option<Severity>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Check job dependencies and triggers of a resolved workflow document
    Validate {
        /// Resolved workflow (JSON)
        file: PathBuf,
    },
    /// List reusable workflows and their declared interface
    Reusable {
        /// File or directory, relative to the root
        path: Option<PathBuf>,
    },
    /// Remove every discovery cache entry
    ClearCache,
}

fn init_tracing(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let ctx = Context::load(&cli.root, !cli.no_cache)?;
    let mut out = std::io::stdout().lock();

    let ok = match cli.command {
        Commands::List { path, format } => commands::list(&ctx, path.as_deref(), format, &mut out)?,
        Commands::Graph { path, format } => commands::graph(&ctx, path.as_deref(), format, &mut out)?,
        Commands::Lint { path, fix, format } => {
            commands::lint(&ctx, path.as_deref(), fix, format, &mut out)?
        }
        Commands::Policy {
            file,
            preset,
            fail_on,
            format,
        } => commands::policy(&ctx, &file, preset, fail_on, format, &mut out)?,
        Commands::Validate { file } => commands::validate(&ctx, &file, &mut out)?,
        Commands::Reusable { path } => commands::reusable(&ctx, path.as_deref(), &mut out)?,
        Commands::ClearCache => commands::clear_cache(&ctx, &mut out)?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
