//! tagrace command-line entry point.
//!
//! Reads newline-delimited JSON events from stdin or a file, tracks the
//! given hashtags and optionally draws a live leaderboard on stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use tracing::{error, info};

use tagrace::config::DEFAULT_STORE_PATH;
use tagrace::logging::{self, LogConfig, DEFAULT_LOG_FILE};
use tagrace::{
    render, ConfigurationError, Interrupt, LineSource, RaceError, RaceResult, Session,
    SessionConfig, SessionReport, StopReason, StoreConfig, TerminalRenderer,
};

#[derive(Debug, Parser)]
#[command(name = "tagrace")]
#[command(about = "Count tracked hashtags in a live event stream", long_about = None)]
struct Cli {
    /// Hashtags to track, in display order
    #[arg(long, required = true, num_args = 1..)]
    hashtags: Vec<String>,

    /// Counter store directory
    #[arg(long, short, default_value = DEFAULT_STORE_PATH)]
    db: PathBuf,

    /// Draw the live leaderboard on stderr
    #[arg(long, short)]
    verbose: bool,

    /// Newline-delimited JSON events; `-` reads stdin
    #[arg(long, short, default_value = "-")]
    input: PathBuf,

    /// Log file
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Reload counts from the store before streaming
    #[arg(long)]
    resume: bool,

    /// Plain leaderboard without colors
    #[arg(long)]
    no_color: bool,

    /// Publish every match as JSON on stdout under a fresh channel id
    #[arg(long)]
    publish: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log = match logging::init(&LogConfig::at(&cli.log_file)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    match run(&cli) {
        Ok(report) => {
            match &report.reason {
                StopReason::Interrupted => {
                    eprintln!("\nStopped. Counts are saved in {}.", cli.db.display());
                }
                StopReason::Failed(message) => eprintln!("error: stream failed: {message}"),
                StopReason::Completed => {}
            }
            ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1))
        }
        Err(e) => {
            error!(error = %e, "Unhandled failure");
            eprintln!("error: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

fn run(cli: &Cli) -> RaceResult<SessionReport> {
    let interrupt = Interrupt::ctrl_c()?;
    let source = if cli.input.as_os_str() == "-" {
        LineSource::stdin(interrupt)
    } else {
        LineSource::open(&cli.input, interrupt).map_err(|e| ConfigurationError::InvalidInput {
            path: cli.input.display().to_string(),
            reason: e.to_string(),
        })?
    };

    let config = SessionConfig::new(cli.hashtags.iter().cloned(), StoreConfig::at(&cli.db))
        .with_resume(cli.resume)
        .with_publish(cli.publish);

    let mut session = Session::new(config, source);
    if cli.verbose {
        session = session.with_sink(Box::new(TerminalRenderer::stderr(!cli.no_color)));
    }

    let printer = if cli.publish {
        let subscription = session.subscribe();
        let handle = thread::Builder::new()
            .name("tagrace-publish".to_string())
            .spawn(move || {
                while let Some(msg) = subscription.recv() {
                    println!("{} {}", msg.channel, msg.payload);
                }
            })
            .map_err(|e| RaceError::internal(format!("cannot spawn publisher: {e}")))?;
        Some(handle)
    } else {
        None
    };

    let report = session.start();
    drop(session);
    if let Some(handle) = printer {
        let _ = handle.join();
    }
    let report = report?;

    if !cli.verbose {
        eprint!("{}", render(&report.tally, !cli.no_color));
    }
    info!(winner = ?report.winner(), "Final standings");
    Ok(report)
}
