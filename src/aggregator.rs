use tokio::{sync::mpsc, task::JoinHandle};

use crate::shared_types::{Aggregate, FinalStat, PartialTable, WorkerOutput};

/// Merge target for worker tables. Owned by a single task, so it needs no lock.
#[derive(Debug, Default)]
pub struct Aggregator {
    table: PartialTable,
    records: u64,
    workers: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, output: WorkerOutput) {
        for (key, stat) in output.table {
            match self.table.get_mut(&key) {
                Some(existing) => existing.combine(&stat),
                None => {
                    self.table.insert(key, stat);
                }
            }
        }
        self.records += output.records;
        self.workers += 1;
    }

    pub fn finish(self) -> Aggregate {
        debug!(
            "merged {} worker tables: {} keys, {} records",
            self.workers,
            self.table.len(),
            self.records
        );
        Aggregate {
            stats: self
                .table
                .into_iter()
                .map(|(key, stat)| (key, FinalStat::from(stat)))
                .collect(),
            records: self.records,
        }
    }
}

pub fn merge(outputs: impl IntoIterator<Item = WorkerOutput>) -> Aggregate {
    let mut aggregator = Aggregator::new();
    for output in outputs {
        aggregator.absorb(output);
    }
    aggregator.finish()
}

/// Absorbs worker outputs as they arrive; resolves once every sender is gone.
pub fn spawn_aggregator(mut rx_outputs: mpsc::Receiver<WorkerOutput>) -> JoinHandle<Aggregate> {
    tokio::spawn(async move {
        let mut aggregator = Aggregator::new();
        while let Some(output) = rx_outputs.recv().await {
            debug!("absorbing table of range {}", output.range);
            aggregator.absorb(output);
        }
        aggregator.finish()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_types::{ByteRange, PartialStat};

    fn output(entries: &[(&str, i64, u64)]) -> WorkerOutput {
        WorkerOutput {
            range: ByteRange::default(),
            table: entries
                .iter()
                .map(|&(key, sum, count)| (key.to_string(), PartialStat { sum, count }))
                .collect(),
            records: entries.iter().map(|&(_, _, count)| count).sum(),
        }
    }

    fn outputs() -> Vec<WorkerOutput> {
        vec![
            output(&[("A", 10, 1), ("B", 20, 1)]),
            output(&[("A", 30, 1)]),
            output(&[("C", -45, 3), ("B", 5, 2)]),
        ]
    }

    #[test]
    fn sums_and_counts_are_added_per_key() {
        let aggregate = merge(outputs());
        assert_eq!(aggregate.records, 8);
        assert_eq!(
            aggregate.stats["A"],
            FinalStat {
                sum: 40,
                count: 2,
                mean: 2.0
            }
        );
        assert_eq!(aggregate.stats["B"].sum, 25);
        assert_eq!(aggregate.stats["B"].count, 3);
        assert!((aggregate.stats["C"].mean - -1.5).abs() < 1e-9);
    }

    #[test]
    fn merge_order_is_irrelevant() {
        let expected = merge(outputs());
        for order in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
            let mut pool: Vec<Option<WorkerOutput>> = outputs().into_iter().map(Some).collect();
            let permuted = order.iter().map(|&i| pool[i].take().unwrap());
            assert_eq!(merge(permuted), expected, "order {order:?}");
        }
    }

    #[test]
    fn empty_tables_contribute_nothing() {
        let aggregate = merge(vec![WorkerOutput::default(), output(&[("A", 1, 1)])]);
        assert_eq!(aggregate.stats.len(), 1);
        assert_eq!(aggregate.records, 1);
        assert!(merge(Vec::new()).stats.is_empty());
    }

    #[tokio::test]
    async fn aggregator_task_drains_the_channel() {
        let (tx, rx) = mpsc::channel(1);
        let handle = spawn_aggregator(rx);
        for output in outputs() {
            tx.send(output).await.unwrap();
        }
        drop(tx);
        assert_eq!(handle.await.unwrap(), merge(outputs()));
    }
}
