//! xtmf - model system runner
//!
//! Usage:
//!   xtmf submit ms.json --cwd out --start start1 → run one model system
//!   xtmf client                                  → client over stdin/stdout
//!   xtmf run                                     → run process over stdin/stdout
//!   xtmf config                                  → print default configuration
//!   xtmf version                                 → show version

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use xtmf::{client_launcher, init_logging, read_model_system, ConsoleEvents, Submission};
use xtmf_bus::{BusExit, Duplex, RunStatus};
use xtmf_core::XtmfConfig;

#[derive(Parser)]
#[command(
    name = "xtmf",
    about = "Model system runner: host, client and run process roles",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a client, execute one model system and report its outcome
    Submit {
        /// Model system file (JSON)
        model_system: PathBuf,
        /// Working directory for the run
        #[arg(long)]
        cwd: PathBuf,
        /// Dotted path of the start to invoke
        #[arg(long)]
        start: String,
        /// Client executable (default: this executable)
        #[arg(long)]
        client_exe: Option<PathBuf>,
    },
    /// Serve a host over stdin/stdout
    Client,
    /// Execute a single run sent over stdin/stdout
    Run,
    /// Print the default configuration
    Config,
    /// Show version
    Version,
}

/// Exit code of a run process whose run was killed.
const KILLED_EXIT_CODE: u8 = 137;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    };
    // A killed run leaves its module on a blocking thread, and stdin is read
    // on one too. Neither may hold the process open.
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Config => {
            print!("{}", XtmfConfig::default().to_toml());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Version => {
            println!("xtmf v{}", env!("CARGO_PKG_VERSION"));
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let _guard = init_logging(cli.log_file.as_deref())?;
    let config = match cli.config.clone().or_else(XtmfConfig::default_path) {
        Some(path) => XtmfConfig::load(&path),
        None => XtmfConfig::default(),
    };

    match cli.command {
        Commands::Submit {
            model_system,
            cwd,
            start,
            client_exe,
        } => {
            let submission = Submission {
                model_system: read_model_system(&model_system)?,
                cwd: std::env::current_dir()?.join(cwd),
                start_path: start,
            };
            let launcher = client_launcher(&config, client_exe.as_ref(), cli.config.as_deref())?;
            let record =
                xtmf::submit(&launcher, submission, Arc::new(ConsoleEvents), &config).await?;
            Ok(match record.status {
                RunStatus::Completed => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }
        Commands::Client => {
            let exit = xtmf::run_client(&config, Duplex::stdio()).await?;
            tracing::info!("client exited: {:?}", exit);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run => Ok(match xtmf::run_process(&config, Duplex::stdio()).await? {
            BusExit::Killed => ExitCode::from(KILLED_EXIT_CODE),
            _ => ExitCode::SUCCESS,
        }),
        Commands::Config | Commands::Version => Ok(ExitCode::SUCCESS),
    }
}
