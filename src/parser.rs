//! Fixed-grammar record parser.
//!
//! A record is `<key>;<value>` where the value is one of `D.D`, `-D.D`,
//! `DD.D` or `-DD.D`. The separator is located by looking backwards from
//! the end of the line, so the key may contain anything except a `;` inside
//! the last few bytes. This is a format assumption about the input, not a
//! general CSV reader.

use thiserror::Error;

/// Shortest possible record: an empty key followed by `;D.D`.
const MIN_RECORD_LEN: usize = 4;

/// Offsets from the end of the line that may hold the separator.
const NEAREST_SEPARATOR: usize = 4;
const FARTHEST_SEPARATOR: usize = 6;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("record too short: {line:?}")]
    TooShort { line: String },
    #[error("no ';' separator near the end of record: {line:?}")]
    MissingSeparator { line: String },
    #[error("expected a digit at byte {position} of record: {line:?}")]
    InvalidDigit { line: String, position: usize },
    #[error("value is not of the form -?D?D.D in record: {line:?}")]
    InvalidValue { line: String },
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

/// Splits one record into its key and its value in tenths.
///
/// `line` must not include the trailing `\n`.
pub fn parse_record(line: &[u8]) -> Result<(&[u8], i64), MalformedRecord> {
    let end = line.len();
    if end < MIN_RECORD_LEN {
        return Err(MalformedRecord::TooShort { line: lossy(line) });
    }

    let mut separator = None;
    let mut negative = false;
    for i in (end.saturating_sub(FARTHEST_SEPARATOR)..=end - NEAREST_SEPARATOR).rev() {
        match line[i] {
            b'-' => negative = true,
            b';' => {
                separator = Some(i);
                break;
            }
            _ => {}
        }
    }
    let separator = separator.ok_or_else(|| MalformedRecord::MissingSeparator { line: lossy(line) })?;

    if line[end - 2] != b'.' {
        return Err(MalformedRecord::InvalidValue { line: lossy(line) });
    }

    let digit = |position: usize| -> Result<i64, MalformedRecord> {
        let byte = line[position];
        if byte.is_ascii_digit() {
            Ok((byte - b'0') as i64)
        } else {
            Err(MalformedRecord::InvalidDigit {
                line: lossy(line),
                position,
            })
        }
    };

    let mut tenths = digit(end - 1)? + 10 * digit(end - 3)?;
    let mut value_start = end - 3;
    if end - 4 > separator && line[end - 4].is_ascii_digit() {
        tenths += 100 * digit(end - 4)?;
        value_start = end - 4;
    }

    // only an optional sign may sit between the separator and the digits
    match &line[separator + 1..value_start] {
        [] if !negative => {}
        [b'-'] if negative => tenths = -tenths,
        _ => return Err(MalformedRecord::InvalidValue { line: lossy(line) }),
    }

    Ok((&line[..separator], tenths))
}
