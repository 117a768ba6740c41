//! slotclaim: entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use slotclaim::{Clock, Deadline, RetryOrchestrator, SystemClock};
use slotclaim_cli::captcha::ConfiguredSolver;
use slotclaim_cli::config::{split_list, AppConfig, Overrides};
use slotclaim_cli::driver::chromium::ChromiumBrowser;
use slotclaim_cli::logging::{self, DEFAULT_LOG_FILE};
use slotclaim_cli::report;

#[derive(Parser)]
#[command(
    name = "slotclaim",
    about = "Claim a reservation slot the moment booking opens",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file (default: ./.env if present).
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Also write logs to a file.
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = DEFAULT_LOG_FILE)]
    log_file: Option<PathBuf>,

    #[command(flatten)]
    booking: BookingArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Default)]
struct BookingArgs {
    /// Account name.
    #[arg(long, global = true)]
    username: Option<String>,

    /// Account password.
    #[arg(long, global = true)]
    password: Option<String>,

    /// Campus name to select.
    #[arg(long, global = true)]
    campus: Option<String>,

    /// Facility name to select.
    #[arg(long, global = true)]
    facility: Option<String>,

    /// Date label to book, e.g. 9-17.
    #[arg(long, global = true)]
    date: Option<String>,

    /// Preferred time slots, comma-separated.
    #[arg(long, global = true)]
    time_slots: Option<String>,

    /// Release instant: RFC 3339, or "YYYY-MM-DD HH:MM:SS" in --utc-offset.
    #[arg(long, global = true)]
    release_at: Option<String>,

    /// Minutes past the release instant during which attempts continue.
    #[arg(long, global = true)]
    grace_minutes: Option<u64>,

    /// Offset for naive release instants, e.g. +08:00.
    #[arg(long, global = true)]
    utc_offset: Option<String>,

    /// OCR service endpoint. Without one the captcha is read from the terminal.
    #[arg(long, global = true)]
    ocr_endpoint: Option<String>,

    /// Save a screenshot when the run does not succeed.
    #[arg(long, global = true)]
    debug: bool,

    /// Show the browser window.
    #[arg(long, global = true)]
    headed: bool,
}

impl BookingArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            username: self.username.clone(),
            password: self.password.clone(),
            campus: self.campus.clone(),
            facility: self.facility.clone(),
            date: self.date.clone(),
            time_slots: self.time_slots.as_deref().map(split_list).unwrap_or_default(),
            release_at: self.release_at.clone(),
            grace_minutes: self.grace_minutes,
            utc_offset: self.utc_offset.clone(),
            ocr_endpoint: self.ocr_endpoint.clone(),
            debug: self.debug,
            headed: self.headed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a booking session (default).
    Run,

    /// Print the resolved configuration and check it.
    CheckConfig,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   slotclaim completions bash > ~/.local/share/bash-completion/completions/slotclaim
    ///   slotclaim completions zsh > ~/.zfunc/_slotclaim
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "slotclaim", &mut std::io::stdout());
            Ok(())
        }
        Some(Commands::CheckConfig) => {
            logging::init(&cli.log_level, cli.log_file.as_deref())?;
            let config = AppConfig::load(
                cli.config.as_deref(),
                cli.env_file.as_deref(),
                &cli.booking.overrides(),
            )?;
            let code = check_config(&config)?;
            std::process::exit(code);
        }
        Some(Commands::Run) | None => {
            logging::init(&cli.log_level, cli.log_file.as_deref())?;
            let config = AppConfig::load(
                cli.config.as_deref(),
                cli.env_file.as_deref(),
                &cli.booking.overrides(),
            )?;
            let code = run(config).await?;
            std::process::exit(code);
        }
    }
}

fn check_config(config: &AppConfig) -> anyhow::Result<i32> {
    let mut shown = config.clone();
    shown.booking = shown.booking.redacted();
    println!("{}", serde_json::to_string_pretty(&shown)?);

    let deadline = Deadline::from_release(config.booking.release_at, config.booking.grace_window());
    match (config.booking.release_at, deadline.at()) {
        (Some(release), Some(at)) => {
            let offset = config.booking.offset();
            println!("Release:  {}", release.with_timezone(&offset));
            println!("Deadline: {}", at.with_timezone(&offset));
            if deadline.has_expired(SystemClock.now()) {
                println!("Deadline has already passed.");
            }
        }
        _ => println!("No release instant: starting immediately, no deadline."),
    }

    match config.booking.validate() {
        Ok(()) => {
            println!("Configuration OK");
            Ok(0)
        }
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            Ok(1)
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<i32> {
    config.booking.validate().context("configuration rejected")?;
    tracing::info!("Configuration: {:?}", config.booking);

    let solver = ConfiguredSolver::select(config.ocr_endpoint.as_deref(), "captcha.png")?;
    let browser = ChromiumBrowser::launch(config.headed).await?;
    let page = browser.new_page().await?;

    let (tx, rx) = slotclaim::events::channel();
    let logger = report::spawn_event_logger(rx);

    let run_report = {
        let mut orchestrator =
            RetryOrchestrator::new(config.booking.clone(), &page, solver)?.with_events(tx);
        orchestrator.run().await
    };
    report::finish_event_logger(logger).await;
    match report::to_json(&run_report) {
        Ok(json) => tracing::debug!("Run report: {json}"),
        Err(e) => tracing::debug!("Could not serialize run report: {e}"),
    }

    if run_report.outcome.is_success() {
        tracing::info!("{}", report::summary(&run_report));
    } else {
        tracing::error!("{}", report::summary(&run_report));
        if config.booking.debug {
            if let Err(e) = report::save_debug_screenshot(&page, &config.error_screenshot).await {
                tracing::warn!("Could not save debug screenshot: {e:#}");
            }
        }
    }

    drop(page);
    if let Err(e) = browser.close().await {
        tracing::debug!("Browser shutdown: {e:#}");
    }
    Ok(report::exit_code(&run_report.outcome))
}
