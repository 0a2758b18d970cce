pub mod engine;
pub mod progress;
pub mod tree;

pub use engine::{JobHandle, TransferEngine};
pub use progress::{Activity, ProgressSnapshot, ProgressStream, ProgressTracker, TaskEvent};

use crate::error::TransferTaskError;

pub type JobId = u64;

/// Index of a task within its job, in discovery order.
pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed(TransferTaskError),
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed(_) | TaskStatus::Cancelled)
    }
}

/// One file-level copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub id: TaskId,
    pub direction: Direction,
    pub source_path: String,
    pub dest_path: String,
    pub size_bytes: Option<u64>,
    pub status: TaskStatus,
    pub bytes_transferred: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Discovering,
    Running,
    PartiallyFailed,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Discovering | JobStatus::Running)
    }

    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Discovering => "discovering",
            JobStatus::Running => "running",
            JobStatus::PartiallyFailed => "partially failed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    User,
    SessionLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub max_workers: usize,
    pub max_retries: u32,
    /// Length of the recent-activity log kept per job
    pub recent_activity: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 2,
            recent_activity: 8,
        }
    }
}
