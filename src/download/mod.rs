//! Download module
//!
//! The piece scheduler, the manager that wires tracker, pool, scheduler and
//! storage together, and the statistics surfaced to progress callbacks.

pub mod manager;
pub mod scheduler;
pub mod stats;

pub use manager::{DownloadConfig, DownloadHooks, DownloadManager};
pub use scheduler::{BlockOutcome, PieceScheduler, PieceStrategy};
pub use stats::{DownloadState, DownloadStats};
