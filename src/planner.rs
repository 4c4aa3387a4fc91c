use std::io::SeekFrom;
use std::path::Path;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncSeek, AsyncSeekExt, BufReader};

use crate::shared_types::{ByteCount, ByteRange};

/// Alignment scans only ever walk over a single record.
const ALIGN_SCAN_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("read buffer size must be at least 1 byte")]
    ZeroBufferSize,
    #[error("I/O error while aligning chunk boundaries: {0}")]
    Io(#[from] std::io::Error),
}

/// Splits `file_size` bytes into `worker_count` nominal ranges; the last one
/// absorbs the remainder.
pub fn even_split(file_size: ByteCount, worker_count: usize) -> Result<Vec<ByteRange>, PlanError> {
    if worker_count == 0 {
        return Err(PlanError::ZeroWorkers);
    }
    let chunk_size = file_size / worker_count as u64;
    Ok((0..worker_count as u64)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i + 1 == worker_count as u64 {
                file_size
            } else {
                start + chunk_size
            };
            ByteRange::new(start, end)
        })
        .collect())
}

/// Slides every internal boundary forward so that it falls right after a
/// line terminator.
///
/// A range whose nominal end was already swallowed by its predecessor comes
/// out empty, as do all ranges after a scan that ran into EOF.
pub async fn align_boundaries<R>(
    source: R,
    nominal: &[ByteRange],
    file_size: ByteCount,
) -> Result<Vec<ByteRange>, PlanError>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut reader = BufReader::with_capacity(ALIGN_SCAN_CAPACITY, source);
    let mut scratch = Vec::with_capacity(ALIGN_SCAN_CAPACITY);
    let mut aligned = Vec::with_capacity(nominal.len());
    let mut start = 0;

    for (i, range) in nominal.iter().enumerate() {
        if i + 1 == nominal.len() {
            aligned.push(ByteRange::new(start, file_size));
            break;
        }
        if range.end <= start {
            aligned.push(ByteRange::new(start, start));
            continue;
        }

        // the last byte of the nominal range may already be the terminator
        let scan_from = range.end - 1;
        reader.seek(SeekFrom::Start(scan_from)).await?;
        scratch.clear();
        let scanned = reader.read_until(b'\n', &mut scratch).await? as u64;
        let end = if scratch.last() == Some(&b'\n') {
            scan_from + scanned
        } else {
            file_size
        };
        trace!("boundary {} moved from {} to {}", i, range.end, end);

        aligned.push(ByteRange::new(start, end));
        start = end;
    }

    Ok(aligned)
}

/// Computes line-aligned byte ranges for `worker_count` workers over the file
/// at `path`, whose size the caller has already determined.
pub async fn plan(
    path: &Path,
    file_size: ByteCount,
    worker_count: usize,
) -> Result<Vec<ByteRange>, PlanError> {
    let nominal = even_split(file_size, worker_count)?;
    let file = File::open(path).await?;
    align_boundaries(file, &nominal, file_size).await
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const SAMPLE: &[u8] = b"Hamburg;12.0\nBulawayo;8.9\nPalembang;38.8\nSt. John's;15.2\nCracow;-12.6\nBridgetown;26.9\nIstanbul;6.2\nRoseau;34.4\nConakry;31.2\nIstanbul;23.0";

    async fn aligned(data: &[u8], workers: usize) -> Vec<ByteRange> {
        let nominal = even_split(data.len() as u64, workers).unwrap();
        align_boundaries(Cursor::new(data.to_vec()), &nominal, data.len() as u64)
            .await
            .unwrap()
    }

    fn assert_partition(data: &[u8], ranges: &[ByteRange]) {
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(data.len() as u64));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap in {ranges:?}");
        }
        for range in &ranges[..ranges.len() - 1] {
            assert!(range.start <= range.end);
            let boundary = range.end as usize;
            if boundary != 0 && boundary != data.len() {
                assert_eq!(data[boundary - 1], b'\n', "boundary {boundary} splits a record");
            }
        }
    }

    #[test]
    fn even_split_covers_the_file() {
        let ranges = even_split(10, 3).unwrap();
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, 3),
                ByteRange::new(3, 6),
                ByteRange::new(6, 10)
            ]
        );
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(even_split(10, 0), Err(PlanError::ZeroWorkers)));
    }

    #[tokio::test]
    async fn boundaries_land_after_terminators() {
        for workers in 1..=SAMPLE.len() + 3 {
            let ranges = aligned(SAMPLE, workers).await;
            assert_eq!(ranges.len(), workers);
            assert_partition(SAMPLE, &ranges);
        }
    }

    #[tokio::test]
    async fn boundary_already_on_terminator_stays_put() {
        let data = b"A;1.0\nB;2.0\n";
        let ranges = aligned(data, 2).await;
        assert_eq!(ranges, vec![ByteRange::new(0, 6), ByteRange::new(6, 12)]);
    }

    #[tokio::test]
    async fn more_workers_than_bytes_leaves_empty_ranges() {
        let data = b"A;1.0\nB;2.0\nA;3.0\n";
        let ranges = aligned(data, 40).await;
        assert_partition(data, &ranges);
        assert!(ranges.iter().filter(|r| r.is_empty()).count() > 0);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<u64>(), data.len() as u64);
    }

    #[tokio::test]
    async fn scan_into_unterminated_tail_reaches_eof() {
        let data = b"A;1.0\nBBBBBBBBBBBBBBBBBBBB;2.0";
        let len = data.len() as u64;
        let ranges = aligned(data, 3).await;
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, len),
                ByteRange::new(len, len),
                ByteRange::new(len, len),
            ]
        );
    }

    #[tokio::test]
    async fn empty_file_yields_empty_ranges() {
        let ranges = aligned(b"", 4).await;
        assert_eq!(ranges, vec![ByteRange::new(0, 0); 4]);
    }

    #[tokio::test]
    async fn plan_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("measurements.txt");
        std::fs::write(&path, SAMPLE).unwrap();

        let ranges = plan(&path, SAMPLE.len() as u64, 4).await.unwrap();
        assert_partition(SAMPLE, &ranges);
    }

    #[tokio::test]
    async fn plan_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = plan(&dir.path().join("absent.txt"), 100, 2).await;
        assert!(matches!(result, Err(PlanError::Io(_))));
    }
}
