//! Bounded router-to-worker hand-off
use crate::config::BackpressureMode;
use crate::error::PipelineError;
use std::sync::atomic::{AtomicU64, Ordering};
use stream_knn_core::{PartitionId, RoutedPartitionBatch};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Counters for batches handed to workers.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub dispatched: AtomicU64,
    pub rejected: AtomicU64,
}

/// Routes partition batches onto a fixed set of bounded worker queues.
///
/// A partition always maps to the same worker (`partition_id % workers`), so
/// the batches of one partition are processed in slide order. When a queue is
/// full the dispatcher either waits or refuses the batch, depending on the
/// configured [`BackpressureMode`]. Nothing is ever buffered beyond the queue
/// capacity.
#[derive(Debug)]
pub struct BatchDispatcher {
    senders: Vec<mpsc::Sender<RoutedPartitionBatch>>,
    mode: BackpressureMode,
    stats: DispatchStats,
}

impl BatchDispatcher {
    /// Creates `workers` queues of `capacity` batches each and returns the
    /// receiving ends, indexed by worker.
    pub fn new(
        workers: usize,
        capacity: usize,
        mode: BackpressureMode,
    ) -> (Self, Vec<mpsc::Receiver<RoutedPartitionBatch>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..workers.max(1))
            .map(|_| mpsc::channel(capacity.max(1)))
            .unzip();
        (
            Self {
                senders,
                mode,
                stats: DispatchStats::default(),
            },
            receivers,
        )
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Worker responsible for `partition_id`.
    pub fn worker_for(&self, partition_id: PartitionId) -> usize {
        partition_id as usize % self.senders.len()
    }

    /// Hands `batch` to its worker.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::Busy`] in reject mode when the worker queue is full
    /// * [`PipelineError::ChannelClosed`] when the worker has stopped
    pub async fn dispatch(&self, batch: RoutedPartitionBatch) -> Result<(), PipelineError> {
        let partition_id = batch.partition_id;
        let worker = self.worker_for(partition_id);
        let sender = &self.senders[worker];

        let sent = match self.mode {
            BackpressureMode::Block => sender.send(batch).await.map_err(|_| {
                PipelineError::ChannelClosed(format!("worker {worker} queue"))
            }),
            BackpressureMode::Reject => sender.try_send(batch).map_err(|e| match e {
                TrySendError::Full(_) => PipelineError::Busy { partition_id },
                TrySendError::Closed(_) => {
                    PipelineError::ChannelClosed(format!("worker {worker} queue"))
                }
            }),
        };

        match &sent {
            Ok(()) => {
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!("Partition {} batch queued on worker {}", partition_id, worker);
            }
            Err(PipelineError::Busy { .. }) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        sent
    }

    pub fn dispatched(&self) -> u64 {
        self.stats.dispatched.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.stats.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(partition_id: PartitionId) -> RoutedPartitionBatch {
        RoutedPartitionBatch::new(0, partition_id)
    }

    #[tokio::test]
    async fn test_partitions_map_to_stable_workers() {
        let (dispatcher, mut receivers) = BatchDispatcher::new(3, 4, BackpressureMode::Block);
        assert_eq!(dispatcher.worker_count(), 3);

        for id in [0, 1, 2, 3, 4, 7] {
            dispatcher.dispatch(batch(id)).await.unwrap();
        }
        assert_eq!(dispatcher.dispatched(), 6);

        let mut on_first = Vec::new();
        while let Ok(b) = receivers[0].try_recv() {
            on_first.push(b.partition_id);
        }
        assert_eq!(on_first, vec![0, 3]);

        let mut on_second = Vec::new();
        while let Ok(b) = receivers[1].try_recv() {
            on_second.push(b.partition_id);
        }
        assert_eq!(on_second, vec![1, 4, 7]);
    }

    #[tokio::test]
    async fn test_reject_mode_signals_busy() {
        let (dispatcher, mut receivers) = BatchDispatcher::new(1, 2, BackpressureMode::Reject);
        dispatcher.dispatch(batch(0)).await.unwrap();
        dispatcher.dispatch(batch(1)).await.unwrap();

        let err = dispatcher.dispatch(batch(5)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Busy { partition_id: 5 }));
        assert_eq!(dispatcher.rejected(), 1);

        receivers[0].recv().await.unwrap();
        assert!(dispatcher.dispatch(batch(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_block_mode_waits_for_room() {
        let (dispatcher, mut receivers) = BatchDispatcher::new(1, 1, BackpressureMode::Block);
        dispatcher.dispatch(batch(0)).await.unwrap();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            dispatcher.dispatch(batch(1)),
        )
        .await;
        assert!(pending.is_err(), "full queue should block the sender");

        receivers[0].recv().await.unwrap();
        dispatcher.dispatch(batch(1)).await.unwrap();
        assert_eq!(receivers[0].recv().await.unwrap().partition_id, 1);
    }

    #[tokio::test]
    async fn test_closed_worker_is_reported() {
        let (dispatcher, receivers) = BatchDispatcher::new(1, 1, BackpressureMode::Block);
        drop(receivers);
        assert!(matches!(
            dispatcher.dispatch(batch(0)).await,
            Err(PipelineError::ChannelClosed(_))
        ));
    }
}
