use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::Path;

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures::{pin_mut, Stream, TryStreamExt};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

use crate::parser::{parse_record, MalformedRecord};
use crate::shared_types::{ByteCount, ByteRange, PartialStat, PartialTable, WorkerOutput};

const MB_TO_BYTES: usize = 1024 * 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 10 * MB_TO_BYTES;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("I/O error in range {range}: {source}")]
    Io {
        range: ByteRange,
        #[source]
        source: io::Error,
    },
    #[error("malformed record in range {range}: {source}")]
    Malformed {
        range: ByteRange,
        #[source]
        source: MalformedRecord,
    },
    #[error("key {key:?} in range {range} is not valid UTF-8")]
    NonUtf8Key { range: ByteRange, key: String },
    #[error("read buffer for range {range} must be at least 1 byte")]
    ZeroBufferSize { range: ByteRange },
}

/// Turns a byte source into batches of whole records.
///
/// Each read pulls at most `buffer_size` bytes. Everything up to the last
/// `\n` seen so far is yielded as one batch; the tail is carried over and
/// prefixed to the next read. Whatever is left at EOF is yielded as the
/// final record, which may lack its terminator.
pub fn record_batches<R>(
    mut reader: R,
    buffer_size: usize,
) -> impl Stream<Item = Result<Bytes, io::Error>>
where
    R: AsyncRead + Unpin,
{
    try_stream! {
        // a zero-length read would be indistinguishable from EOF
        if buffer_size == 0 {
            Err::<(), _>(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read buffer size must be at least 1 byte",
            ))?;
        }
        let mut buffer = vec![0u8; buffer_size];
        let mut leftover = BytesMut::new();

        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            let carried = leftover.len();
            leftover.extend_from_slice(&buffer[..read]);

            // the carried bytes never contain a terminator
            if let Some(last_newline) = buffer[..read].iter().rposition(|&b| b == b'\n') {
                yield leftover.split_to(carried + last_newline + 1).freeze();
            }
        }

        if !leftover.is_empty() {
            yield leftover.freeze();
        }
    }
}

/// Worker-private accumulation table, keyed by raw key bytes.
#[derive(Debug, Default)]
struct KeyTable {
    stats: HashMap<Vec<u8>, PartialStat>,
    records: u64,
}

impl KeyTable {
    fn ingest(&mut self, batch: &[u8]) -> Result<(), MalformedRecord> {
        for line in batch.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let (key, tenths) = parse_record(line)?;
            match self.stats.get_mut(key) {
                Some(stat) => stat.add(tenths),
                None => {
                    self.stats.insert(key.to_vec(), PartialStat::new(tenths));
                }
            }
            self.records += 1;
        }
        Ok(())
    }

    fn into_output(self, range: ByteRange) -> Result<WorkerOutput, ScanError> {
        let mut table = PartialTable::with_capacity(self.stats.len());
        for (key, stat) in self.stats {
            let key = String::from_utf8(key).map_err(|e| ScanError::NonUtf8Key {
                range,
                key: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            })?;
            table.insert(key, stat);
        }
        Ok(WorkerOutput {
            range,
            table,
            records: self.records,
        })
    }
}

/// Drains `reader`, which must yield exactly the bytes of `range`.
pub async fn scan_reader<R>(
    reader: R,
    range: ByteRange,
    buffer_size: usize,
    progress: Option<mpsc::Sender<ByteCount>>,
) -> Result<WorkerOutput, ScanError>
where
    R: AsyncRead + Unpin,
{
    if buffer_size == 0 {
        return Err(ScanError::ZeroBufferSize { range });
    }
    let batches = record_batches(reader, buffer_size);
    pin_mut!(batches);

    let mut table = KeyTable::default();
    while let Some(batch) = batches
        .try_next()
        .await
        .map_err(|source| ScanError::Io { range, source })?
    {
        trace!("range {}: batch of {} bytes", range, batch.len());
        table
            .ingest(&batch)
            .map_err(|source| ScanError::Malformed { range, source })?;
        if let Some(tx) = &progress {
            tx.try_send(batch.len() as ByteCount).ok();
        }
    }

    table.into_output(range)
}

/// Scans one range of the file at `path` through a handle of its own.
pub async fn scan_range(
    path: &Path,
    range: ByteRange,
    buffer_size: usize,
    progress: Option<mpsc::Sender<ByteCount>>,
) -> Result<WorkerOutput, ScanError> {
    if buffer_size == 0 {
        return Err(ScanError::ZeroBufferSize { range });
    }
    if range.is_empty() {
        debug!("range {} is empty, nothing to scan", range);
        return Ok(WorkerOutput {
            range,
            ..Default::default()
        });
    }

    let io_err = |source: io::Error| ScanError::Io { range, source };
    let mut file = File::open(path).await.map_err(io_err)?;
    file.seek(SeekFrom::Start(range.start)).await.map_err(io_err)?;

    debug!("scanning range {} ({} bytes)", range, range.len());
    let output = scan_reader(file.take(range.len()), range, buffer_size, progress).await?;
    debug!(
        "range {} done: {} records, {} keys",
        range,
        output.records,
        output.table.len()
    );
    Ok(output)
}
