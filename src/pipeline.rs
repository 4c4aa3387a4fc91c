use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::MultiProgress;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::aggregator::spawn_aggregator;
use crate::planner::{self, PlanError};
use crate::progress_reporter::ProgressReporter;
use crate::shared_types::{Aggregate, ByteCount, ByteRange, WorkerOutput};
use crate::worker::{self, ScanError};

const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("worker task panicked or was cancelled: {0}")]
    WorkerPanicked(#[from] JoinError),
}

#[derive(Debug, Clone)]
pub struct RunPreferences {
    pub path: PathBuf,
    pub workers: usize,
    pub buffer_size: usize,
    /// Log every planned range at info level instead of debug.
    pub show_boundaries: bool,
}

impl RunPreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workers: default_worker_count(),
            buffer_size: worker::DEFAULT_BUFFER_SIZE,
            show_boundaries: false,
        }
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn log_boundaries(ranges: &[ByteRange], verbose: bool) {
    let level = if verbose {
        log::Level::Info
    } else {
        log::Level::Debug
    };
    for (i, range) in ranges.iter().enumerate() {
        log!(level, "worker {i}: {range} ({} bytes)", range.len());
    }
    let total: ByteCount = ranges.iter().map(ByteRange::len).sum();
    log!(level, "total bytes planned: {total}");
}

/// Waits for every worker; the first error or panic aborts the rest.
async fn join_workers(workers: &mut JoinSet<Result<(), ScanError>>) -> Result<(), RunError> {
    while let Some(joined) = workers.join_next().await {
        let failure = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => RunError::from(e),
            Err(e) => RunError::from(e),
        };
        error!("aborting run: {failure}");
        workers.abort_all();
        return Err(failure);
    }
    Ok(())
}

/// Plans, scans and merges the file described by `prefs`.
///
/// The first failing worker aborts the others; no partial aggregate is
/// returned in that case. A progress bar is drawn when `multi` is given.
pub async fn run(prefs: RunPreferences, multi: Option<MultiProgress>) -> Result<Aggregate, RunError> {
    if prefs.buffer_size == 0 {
        return Err(PlanError::ZeroBufferSize.into());
    }

    let file_size = tokio::fs::metadata(&prefs.path)
        .await
        .map_err(|source| RunError::Stat {
            path: prefs.path.display().to_string(),
            source,
        })?
        .len();
    info!(
        "file size: {}, workers: {}, read buffer per worker: {}",
        file_size, prefs.workers, prefs.buffer_size
    );

    let ranges = planner::plan(&prefs.path, file_size, prefs.workers).await?;
    log_boundaries(&ranges, prefs.show_boundaries);

    let (s_outputs, r_outputs) = mpsc::channel::<WorkerOutput>(ranges.len());
    let aggregator = spawn_aggregator(r_outputs);

    let (s_progress, reporter) = match multi {
        Some(multi) => {
            let (tx, rx) = mpsc::channel::<ByteCount>(PROGRESS_CHANNEL_CAPACITY);
            (Some(tx), Some(ProgressReporter::new(rx, file_size, multi).spawn()))
        }
        None => (None, None),
    };

    let path = Arc::new(prefs.path);
    let buffer_size = prefs.buffer_size;
    let mut workers = JoinSet::new();
    for range in ranges {
        let path = path.clone();
        let s_outputs = s_outputs.clone();
        let s_progress = s_progress.clone();
        workers.spawn(async move {
            let output = worker::scan_range(&path, range, buffer_size, s_progress).await?;
            // the aggregator outlives every sender
            s_outputs.send(output).await.ok();
            Ok::<(), ScanError>(())
        });
    }
    drop(s_outputs);
    drop(s_progress);

    if let Err(failure) = join_workers(&mut workers).await {
        aggregator.abort();
        return Err(failure);
    }

    let aggregate = aggregator.await?;
    if let Some(reporter) = reporter {
        reporter.await?;
    }
    debug!(
        "run complete: {} keys from {} records",
        aggregate.stats.len(),
        aggregate.records
    );
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use std::future;

    use super::*;

    #[tokio::test]
    async fn panicking_worker_aborts_its_siblings() {
        let mut workers = JoinSet::new();
        workers.spawn(async {
            future::pending::<()>().await;
            Ok::<(), ScanError>(())
        });
        workers.spawn(async {
            if true {
                panic!("worker blew up");
            }
            Ok(())
        });

        let err = join_workers(&mut workers).await.unwrap_err();
        assert!(matches!(&err, RunError::WorkerPanicked(e) if e.is_panic()));

        let sibling = workers.join_next().await.unwrap().unwrap_err();
        assert!(sibling.is_cancelled());
        assert!(workers.is_empty());
    }

    #[tokio::test]
    async fn failing_worker_surfaces_its_error() {
        let mut workers = JoinSet::new();
        workers.spawn(async { Ok::<(), ScanError>(()) });
        workers.spawn(async {
            Err(ScanError::ZeroBufferSize {
                range: ByteRange::new(0, 4),
            })
        });

        let err = join_workers(&mut workers).await.unwrap_err();
        assert!(matches!(err, RunError::Scan(ScanError::ZeroBufferSize { .. })));
    }

    #[tokio::test]
    async fn clean_workers_join_without_error() {
        let mut workers = JoinSet::new();
        for _ in 0..4 {
            workers.spawn(async { Ok::<(), ScanError>(()) });
        }
        join_workers(&mut workers).await.unwrap();
    }
}
