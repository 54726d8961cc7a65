// dd-configure - Datadog agent host configuration
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dd_configure::document::DocumentSource;
use dd_configure::error::ConfigureError;
use dd_configure::host;
use dd_configure::reconcile::Reconciler;
use dd_configure::settings::Settings;
use dd_configure::version::build_info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Exit code for runs that stopped before touching the host
const EXIT_FATAL: u8 = 1;

/// Exit code for runs that completed with failures
const EXIT_DEGRADED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "dd-configure")]
#[command(author, about, long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
    /// Desired-state document: file path, http(s) URL, or '-' for stdin
    #[arg(short, long, value_name = "SOURCE")]
    config: Option<String>,

    /// Secrets backend archive (tar.gz on Linux, zip on Windows)
    #[arg(long, alias = "secrets_backend", value_name = "ARCHIVE")]
    secrets_backend: Option<PathBuf>,

    /// What to do with the agent configuration
    #[arg(long, value_enum, default_value_t = Action::Install)]
    action: Action,

    /// Tool settings file
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Log file (appended to)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Show version information
    #[arg(short = 'V', long)]
    version: bool,

    /// Show detailed build information
    #[arg(long)]
    build_info: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    Install,
    Update,
    Uninstall,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Handle version flag
    if cli.version {
        println!("{}", build_info().format_detailed());
        return Ok(ExitCode::SUCCESS);
    }

    // Handle build info flag
    if cli.build_info {
        println!("{}", build_info().format_display());
        println!("\n{}", build_info().format_build_info());
        return Ok(ExitCode::SUCCESS);
    }

    let mut settings = Settings::load(cli.settings.clone()).context("Failed to load settings")?;
    if let Some(log_file) = &cli.log_file {
        settings.log_file = log_file.clone();
    }

    init_logging(&settings.log_file, cli.debug)?;
    tracing::info!(action = ?cli.action, "dd-configure {} starting", build_info().version);

    let code = match run(&cli, settings).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("dd-configure: {}", e);
            ExitCode::from(failure_code(&e))
        }
    };

    Ok(code)
}

/// Exit code for an error that ended the run early
fn failure_code(err: &ConfigureError) -> u8 {
    if err.is_fatal() {
        EXIT_FATAL
    } else {
        EXIT_DEGRADED
    }
}

/// Append-only log file, plain text
fn init_logging(log_file: &Path, debug: bool) -> Result<()> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false) // Disable ANSI colors in log file
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Dispatch the action. `Err` means nothing was changed on the host.
async fn run(cli: &Cli, settings: Settings) -> std::result::Result<ExitCode, ConfigureError> {
    match cli.action {
        Action::Install | Action::Update => {}
        Action::Uninstall => return Err(ConfigureError::Unimplemented("uninstall".to_string())),
    }

    let source_id = cli
        .config
        .as_deref()
        .ok_or_else(|| ConfigureError::Config("--config is required".to_string()))?;
    let source = DocumentSource::parse(source_id);

    tracing::info!(source = %source.id(), "Fetching desired state");
    let desired = source.fetch(settings.fetch_timeout()).await?;

    let host = host::detect(&settings);
    let reconciler = Reconciler::new(host, settings);
    let report = reconciler.run(&desired, cli.secrets_backend.as_deref()).await;

    println!("{}", report);
    Ok(report.exit_code())
}
