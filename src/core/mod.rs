pub mod big_file_gate;
pub mod business;
pub mod cipher;
pub mod controller;
pub mod encryption_lock;
pub mod engine;
pub mod models;
pub mod progress;
pub mod registry;
mod runner;
pub mod scan;
pub mod state_file;
pub mod strategy;
pub mod transfer_log;

pub use big_file_gate::BigFileGate;
pub use business::{BusinessSoftwareGate, GateWait, ProcessProbe, SysinfoProbe};
pub use cipher::XorCipher;
pub use controller::{ControlState, JobController};
pub use encryption_lock::EncryptionLock;
pub use engine::{Engine, EngineResources, EngineSettings, RunHandle, SaveOutcome};
pub use models::{
    BackupJob, BackupType, JobStatus, JobUpdate, LogRecord, RunOutcome, RunReport, StateSnapshot,
};
pub use progress::{ObserverSet, ProgressObserver, ProgressTracker};
pub use registry::JobRegistry;
pub use state_file::StateFileObserver;
pub use strategy::BackupStrategy;
pub use transfer_log::{DailyJsonLog, MemoryTransferLog, TransferLog};
