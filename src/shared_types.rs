use std::collections::{BTreeMap, HashMap};

pub type ByteCount = u64;

/// Half-open byte interval `[start, end)` of the input file owned by one worker.
///
/// `end` sits one past the range's trailing line terminator, so every
/// boundary other than the file's first and last byte follows a `\n`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range {start}..{end} is inverted");
        Self { start, end }
    }

    pub fn len(&self) -> ByteCount {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Running sum (in tenths) and count for one key, private to a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartialStat {
    pub sum: i64,
    pub count: u64,
}

impl PartialStat {
    pub fn new(tenths: i64) -> Self {
        Self {
            sum: tenths,
            count: 1,
        }
    }

    pub fn add(&mut self, tenths: i64) {
        self.sum += tenths;
        self.count += 1;
    }

    pub fn combine(&mut self, other: &PartialStat) {
        self.sum += other.sum;
        self.count += other.count;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FinalStat {
    pub sum: i64,
    pub count: u64,
    pub mean: f64,
}

impl From<PartialStat> for FinalStat {
    fn from(stat: PartialStat) -> Self {
        // a key only exists once a record for it was parsed
        debug_assert!(stat.count > 0);
        Self {
            sum: stat.sum,
            count: stat.count,
            mean: stat.sum as f64 / (10.0 * stat.count as f64),
        }
    }
}

pub type PartialTable = HashMap<String, PartialStat>;

/// What a worker hands to the aggregator once its range is consumed.
#[derive(Debug, Default)]
pub struct WorkerOutput {
    pub range: ByteRange,
    pub table: PartialTable,
    pub records: u64,
}

/// Terminal result of a run.
#[derive(Debug, Default, PartialEq)]
pub struct Aggregate {
    pub stats: BTreeMap<String, FinalStat>,
    pub records: u64,
}
