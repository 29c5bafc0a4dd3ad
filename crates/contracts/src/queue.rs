//! Inbound queue
//!
//! Bounded MPMC channel between input readers and the dispatcher. Sending
//! suspends while the queue is full, so a slow dispatcher pushes back on
//! every reader. Each record is stamped with a global sequence number on
//! its way in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::Record;

/// The inbound queue no longer accepts records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("inbound queue closed")]
pub struct QueueClosed;

/// Create an inbound queue holding at most `capacity` records
pub fn inbound_queue(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    let next_seq = Arc::new(AtomicU64::new(0));
    (
        RecordSender {
            tx,
            next_seq: next_seq.clone(),
        },
        RecordReceiver { rx, next_seq },
    )
}

/// Producer side, cloned into every reader
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: async_channel::Sender<Record>,
    next_seq: Arc<AtomicU64>,
}

impl RecordSender {
    /// Enqueue one payload, waiting for room when the queue is full
    ///
    /// Returns the sequence number assigned to the record.
    pub async fn send(&self, payload: Bytes) -> Result<u64, QueueClosed> {
        if self.tx.is_closed() {
            return Err(QueueClosed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
        self.tx
            .send(Record::new(seq, payload))
            .await
            .map_err(|_| QueueClosed)?;
        Ok(seq)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Records currently waiting in the queue
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer side, owned by the dispatcher
#[derive(Debug, Clone)]
pub struct RecordReceiver {
    rx: async_channel::Receiver<Record>,
    next_seq: Arc<AtomicU64>,
}

impl RecordReceiver {
    /// Next record in arrival order; `None` once closed and empty
    pub async fn recv(&self) -> Option<Record> {
        self.rx.recv().await.ok()
    }

    pub fn try_recv(&self) -> Option<Record> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new records; queued records stay receivable
    pub fn close(&self) -> bool {
        self.rx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }

    /// Sequence number the next enqueued record will receive
    ///
    /// Every record with a lower sequence was enqueued before this call.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.rx.capacity()
    }
}
