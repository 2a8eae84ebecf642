use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::time::Instant;

use chrono::{DateTime, Local};

use crate::types::Record;

/// A decoded record plus the host instants at which its line arrived.
#[derive(Clone, Debug)]
pub struct Received {
    pub record: Record,
    pub at: Instant,
    pub wall: DateTime<Local>,
}

impl Received {
    pub fn now(record: Record) -> Self {
        Self {
            record,
            at: Instant::now(),
            wall: Local::now(),
        }
    }
}

/// Returned by [`IngestSender::push`] once the consumer side is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerGone;

/// Producer half of the ingestion channel. Owned by the reader.
pub struct IngestSender {
    tx: SyncSender<Received>,
}

impl IngestSender {
    /// Blocks while the queue is full. Records are never dropped here.
    pub fn push(&self, item: Received) -> Result<(), ConsumerGone> {
        self.tx.send(item).map_err(|_| ConsumerGone)
    }
}

/// Consumer half of the ingestion channel. Owned by the aggregator tick.
pub struct IngestReceiver {
    rx: Receiver<Received>,
}

/// Result of one non-blocking drain.
#[derive(Debug, Default)]
pub struct Drained {
    pub items: Vec<Received>,
    /// The producer has hung up and nothing more will arrive.
    pub producer_gone: bool,
}

impl IngestReceiver {
    /// Pulls everything currently queued, in arrival order, without waiting.
    pub fn drain(&self) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.rx.try_recv() {
                Ok(item) => drained.items.push(item),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drained.producer_gone = true;
                    break;
                }
            }
        }
        drained
    }
}

/// Bounded single-producer / single-consumer hand-off.
pub fn ingestion_channel(capacity: usize) -> (IngestSender, IngestReceiver) {
    let (tx, rx) = sync_channel(capacity.max(1));
    (IngestSender { tx }, IngestReceiver { rx })
}
