//! Per-key sum/count/mean over large `<key>;<value>` files.
//!
//! The file is cut into line-aligned byte ranges ([`planner`]), each range is
//! scanned by its own task through its own file handle ([`worker`]), and the
//! worker tables are merged once they are handed off ([`aggregator`]).
//! [`pipeline::run`] wires the three together.

#[macro_use]
extern crate log;

pub mod aggregator;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod progress_reporter;
pub mod shared_types;
pub mod worker;

pub use pipeline::{run, RunError, RunPreferences};
pub use shared_types::{Aggregate, ByteRange, FinalStat, PartialStat, WorkerOutput};
