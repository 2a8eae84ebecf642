//! Ingestion, clock reconciliation and running statistics for a scintillator
//! event detector streaming newline-delimited JSON over a serial link.
pub mod config;
pub mod drivers;
pub mod engine;
pub mod environment;
pub mod recorder;
pub mod types;
pub mod visualizer;

pub use config::LoggerConfig;
pub use engine::{ReaderExit, RecordCallback, SessionController};
pub use types::{AcceptedRecord, ConnectionMode, Record, Snapshot};
