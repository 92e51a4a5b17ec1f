//! `dsg` - replay recorded debug sessions through the suggestion tracker
//!
//! # Input (file or stdin)
//! JSON lines, one timestamped session event per line (see `trace`)
//!
//! # Output (via stdout)
//! One DAP `suggestDiagnosticTool` event per line, as the host would receive it
//!
//! Logs go to stderr and are silent unless `RUST_LOG` is set.

use clap::Parser;
use colored::Colorize;
use diagnostic_suggester::trace::{self, Replayer, SessionReport};
use diagnostic_suggester::{
    JsonLinesChannel, OutputChannel, QualificationCounter, SuggesterConfig, SuggesterError,
};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Trace file to replay (reads stdin when omitted)
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Config file (defaults to the user config dir, then built-in values)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a per-session report to stderr
    #[arg(long)]
    summary: bool,
}

fn main() {
    // Initialize tracing if RUST_LOG is set
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("Error: {}", e);
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), SuggesterError> {
    let config = SuggesterConfig::load(args.config.as_deref())?;
    debug!("Using config: {:?}", config);

    let entries = match &args.trace {
        Some(path) => {
            let file = File::open(path)?;
            trace::parse_trace(BufReader::new(file))?
        }
        None => trace::parse_trace(io::stdin().lock())?,
    };
    info!("Replaying {} trace entries", entries.len());

    // Paused clock: recorded delays elapse instantly, in trace order
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .map_err(SuggesterError::Runtime)?;

    let channel: Arc<dyn OutputChannel> = Arc::new(JsonLinesChannel::new(io::stdout()));
    let reports = runtime.block_on(async {
        Replayer::new(channel, QualificationCounter::global(), config)
            .run(&entries)
            .await
    });

    if args.summary {
        print_summary(&reports);
    }
    Ok(())
}

fn print_summary(reports: &[SessionReport]) {
    eprintln!(
        "{} {} session(s) replayed at {}",
        "dsg".bold(),
        reports.len(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    for report in reports {
        let verdict = if report.outcome.qualified {
            "QUALIFIED".yellow()
        } else if report.outcome.currently_qualifying {
            "TOO SHORT".white()
        } else {
            "CLEAN".green()
        };
        let suggestion = if report.suggested > 0 {
            format!(" -> suggested x{}", report.suggested)
                .as_str()
                .red()
                .bold()
        } else {
            "".normal()
        };
        eprintln!(
            "  #{} [{}ms..{}ms] {} streak={}{}",
            report.index,
            report.started_at_ms,
            report.ended_at_ms,
            verdict,
            report.outcome.counter_after,
            suggestion
        );
    }
}
