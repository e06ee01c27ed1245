//! Typed events the pipeline emits outward.
//!
//! Stages emit, observers consume; nothing outside the pipeline calls back
//! into stage internals.

use std::time::Duration;

use uuid::Uuid;

use crate::state::StateChange;

/// Session-wide status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Uploading,
    Paused,
    /// Neither host nor backend reachable; the probe loop owns recovery.
    NoConnectivity,
    Error,
}

/// Aggregate view of the session for UIs and logs.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    pub speed: Option<f64>,
    pub eta: Option<Duration>,
    pub file_count: usize,
    /// Files found by the scanner but not yet entered into the pipeline.
    pub pending_scan: usize,
}

impl SessionSnapshot {
    pub fn remaining_bytes(&self) -> u64 {
        self.bytes_total.saturating_sub(self.bytes_uploaded)
    }
}

/// Event stream observers subscribe to.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// One file-state transition.
    FileChanged(StateChange),
    /// A file's record was confirmed persisted; its state is gone.
    FileSaved { file_id: Uuid },
    /// Session status flipped.
    StatusChanged(SessionStatus),
    /// Progress/speed/ETA moved.
    Progress(SessionSnapshot),
    /// The persistence circuit breaker tripped and paused the session.
    BreakerTripped,
    /// Every file reached a terminal state and the session drained.
    Drained,
}
