use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::state::ids::PlayerId;

/// Totals waiting to be written to the persistent leaderboard.
pub type MirrorBatch = Vec<(PlayerId, i64)>;

/// FIFO of score batches drained by a single writer task.
///
/// Batches are written in the order they were pushed, so an older total can never
/// overwrite a newer one in the store.
pub struct MirrorQueue {
    tx: mpsc::UnboundedSender<MirrorBatch>,
    // Handed to the writer task the first time a batch is pushed.
    rx: Mutex<Option<mpsc::UnboundedReceiver<MirrorBatch>>>,
}

impl MirrorQueue {
    /// Create an empty queue with no writer attached yet.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Take the receiving end. Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<MirrorBatch>> {
        match self.rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Queue a batch. Returns `false` once the writer is gone.
    pub fn push(&self, batch: MirrorBatch) -> bool {
        self.tx.send(batch).is_ok()
    }
}

impl Default for MirrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batches_come_out_in_push_order() {
        let queue = MirrorQueue::new();
        let mut rx = queue.take_receiver().unwrap();
        assert!(queue.take_receiver().is_none());

        assert!(queue.push(vec![(PlayerId::from("b"), 300)]));
        assert!(queue.push(vec![(PlayerId::from("b"), 100)]));

        assert_eq!(rx.recv().await, Some(vec![(PlayerId::from("b"), 300)]));
        assert_eq!(rx.recv().await, Some(vec![(PlayerId::from("b"), 100)]));
    }
}
