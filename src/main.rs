#[macro_use]
extern crate log;

use std::error::Error;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{ArgAction, Parser};
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use chunkstat::pipeline::{self, RunPreferences};
use chunkstat::worker::DEFAULT_BUFFER_SIZE;
use chunkstat::Aggregate;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    #[arg(default_value = "measurements.txt")]
    path: PathBuf,

    /// Defaults to the available hardware parallelism
    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Log every planned byte range
    #[arg(long)]
    show_boundaries: bool,

    #[arg(long)]
    progress: bool,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Skip the per-key listing
    #[arg(short, long)]
    quiet: bool,
}

fn level_filter(verbose: u8) -> simplelog::LevelFilter {
    match verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    }
}

fn print_stats(aggregate: &Aggregate) -> io::Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for (key, stat) in &aggregate.stats {
        writeln!(out, "{};{:.1};{}", key, stat.mean, stat.count)?;
    }
    out.flush()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    let level = level_filter(args.verbose);
    let logger = simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), logger).try_init()?;

    let prefs = RunPreferences {
        path: args.path,
        workers: args.workers.unwrap_or_else(pipeline::default_worker_count),
        buffer_size: args.buffer_size,
        show_boundaries: args.show_boundaries,
    };

    let started = Instant::now();
    let aggregate = pipeline::run(prefs, args.progress.then_some(multi)).await?;
    let elapsed = started.elapsed();

    if !args.quiet {
        print_stats(&aggregate)?;
    }
    info!(
        "{} keys, {} records, time taken: {:?}",
        aggregate.stats.len(),
        aggregate.records,
        elapsed
    );

    Ok(())
}
