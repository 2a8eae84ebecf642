// src/drivers/mod.rs
pub mod aggregator;
pub mod buffer;
pub mod channel;
pub mod clock;
pub mod decoder;
pub mod error;
pub mod histogram;
pub mod source;

pub use aggregator::{RunningStats, SessionAggregator};
pub use buffer::{RateWindow, RingBuffer};
pub use channel::{ingestion_channel, ConsumerGone, Drained, IngestReceiver, IngestSender, Received};
pub use clock::{ClockReconciler, Reconciled};
pub use decoder::{decode_line, try_decode};
pub use error::{ConfigError, DecodeError, LogError, SessionError};
pub use histogram::RunningHistogram;
pub use source::{
    list_ports, DeviceLink, DeviceOpener, LineReader, ManualOpener, ScriptEnd, SerialOpener,
    SimulatedOpener,
};
