//! hexdist-core: wire framing, task model, and configuration.
//! All other hexdist crates depend on this one.

pub mod config;
pub mod task;
pub mod wire;

pub use task::{AnalyzeGameInput, AnalyzeMoveInput, AnalyzeMoveOutput, JobResult, WorkerTask};
pub use wire::{Frame, FrameKind, PeerMessage, WireError};
