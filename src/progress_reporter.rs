use std::time::Duration;

use circular_buffer::CircularBuffer;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use tokio::time::{self, Instant};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::shared_types::ByteCount;

const RATE_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
const RATE_WINDOW: usize = 50;

/// Recent `(bytes so far, when)` samples used for a rolling scan rate.
pub struct ThroughputWindow {
    samples: CircularBuffer<RATE_WINDOW, (ByteCount, Instant)>,
}

impl ThroughputWindow {
    pub fn new() -> Self {
        Self {
            samples: CircularBuffer::new(),
        }
    }

    pub fn record(&mut self, total: ByteCount, at: Instant) {
        self.samples.push_back((total, at));
    }

    /// Bytes per second between the oldest and newest sample.
    pub fn rate(&self) -> Option<f64> {
        let (latest_bytes, latest_at) = self.samples.back()?;
        let (oldest_bytes, oldest_at) = self.samples.front()?;
        let elapsed = latest_at.duration_since(*oldest_at).as_secs_f64();
        if latest_bytes == oldest_bytes || elapsed == 0.0 {
            return None;
        }
        Some((latest_bytes - oldest_bytes) as f64 / elapsed)
    }
}

impl Default for ThroughputWindow {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_rate(bytes_per_sec: f64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes_per_sec >= MB {
        format!("{:.1} MB/s", bytes_per_sec / MB)
    } else {
        format!("{:.1} kB/s", bytes_per_sec / 1024.0)
    }
}

const SCAN_TEMPLATE: &str =
    "{prefix:.bold} {elapsed:>4} {wide_bar:.green/white} {percent:>3}% {bytes}/{total_bytes} eta {eta} {msg}";

fn scan_style() -> ProgressStyle {
    ProgressStyle::with_template(SCAN_TEMPLATE)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

pub struct ProgressReporter {
    rx_progress: mpsc::Receiver<ByteCount>,
    total_size: ByteCount,
    multi_progress: MultiProgress,
}

impl ProgressReporter {
    pub fn new(
        rx_progress: mpsc::Receiver<ByteCount>,
        total_size: ByteCount,
        multi_progress: MultiProgress,
    ) -> Self {
        Self {
            rx_progress,
            total_size,
            multi_progress,
        }
    }

    /// Runs until every progress sender has been dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        let Self {
            mut rx_progress,
            total_size,
            multi_progress,
        } = self;

        tokio::spawn(async move {
            let pb = multi_progress.add(ProgressBar::new(total_size));
            pb.set_style(scan_style());
            pb.set_prefix("scanning");

            let mut scanned: ByteCount = 0;
            let mut window = ThroughputWindow::new();
            let mut ticker = time::interval(RATE_UPDATE_INTERVAL);

            loop {
                tokio::select! {
                    update = rx_progress.recv() => match update {
                        Some(bytes) => {
                            scanned += bytes;
                            pb.set_position(scanned);
                            window.record(scanned, Instant::now());
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        if let Some(rate) = window.rate() {
                            pb.set_message(format_rate(rate));
                        }
                    }
                }
            }

            let overall = scanned as f64 / pb.elapsed().as_secs_f64().max(f64::EPSILON);
            pb.finish_with_message(format_rate(overall));
        })
    }
}
