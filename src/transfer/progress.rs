use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::{CancelReason, Direction, JobId, JobStatus, TaskId, TaskStatus, TransferTask};
use crate::error::TransferTaskError;

/// State changes reported by discovery and the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Discovered {
        task: TaskId,
        source: String,
        dest: String,
        size: Option<u64>,
    },
    /// Also sent before each retry
    Started { task: TaskId },
    /// Cumulative bytes for the current attempt
    Progress { task: TaskId, bytes: u64 },
    Completed { task: TaskId, bytes: u64 },
    Failed { task: TaskId, error: TransferTaskError },
    Cancelled { task: TaskId },
    DiscoveryFinished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    Done(String),
    Failed { name: String, reason: String },
    Note(String),
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Done(name) => write!(f, "done   {}", name),
            Activity::Failed { name, reason } => write!(f, "failed {} ({})", name, reason),
            Activity::Note(text) => write!(f, "{}", text),
        }
    }
}

/// Point-in-time copy of a job's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub job: JobId,
    pub direction: Direction,
    pub source: String,
    pub dest: String,
    pub status: JobStatus,
    /// Totals still grow while this is set
    pub provisional: bool,
    pub files_total: usize,
    pub files_done: usize,
    pub files_failed: usize,
    pub files_cancelled: usize,
    pub bytes_total: u64,
    pub bytes_done: u64,
    pub cancel_reason: Option<CancelReason>,
    pub recent: Vec<Activity>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> u16 {
        if self.bytes_total > 0 {
            ((self.bytes_done.min(self.bytes_total) * 100) / self.bytes_total) as u16
        } else if self.files_total > 0 {
            let settled = self.files_done + self.files_failed + self.files_cancelled;
            ((settled.min(self.files_total) * 100) / self.files_total) as u16
        } else if self.status.is_terminal() {
            100
        } else {
            0
        }
    }

    pub fn files_settled(&self) -> usize {
        self.files_done + self.files_failed + self.files_cancelled
    }
}

struct TrackerState {
    status: JobStatus,
    discovery_finished: bool,
    tasks: BTreeMap<TaskId, TransferTask>,
    files_done: usize,
    files_failed: usize,
    files_cancelled: usize,
    bytes_total: u64,
    bytes_done: u64,
    cancel_reason: Option<CancelReason>,
    recent: VecDeque<Activity>,
    finished_after: Option<Duration>,
}

struct JobMeta {
    job: JobId,
    direction: Direction,
    source: String,
    dest: String,
    started: Instant,
}

impl JobMeta {
    fn snapshot(&self, state: &TrackerState) -> ProgressSnapshot {
        ProgressSnapshot {
            job: self.job,
            direction: self.direction,
            source: self.source.clone(),
            dest: self.dest.clone(),
            status: state.status,
            provisional: !state.discovery_finished,
            files_total: state.tasks.len(),
            files_done: state.files_done,
            files_failed: state.files_failed,
            files_cancelled: state.files_cancelled,
            bytes_total: state.bytes_total,
            bytes_done: state.bytes_done,
            cancel_reason: state.cancel_reason,
            recent: state.recent.iter().cloned().collect(),
            elapsed: state.finished_after.unwrap_or_else(|| self.started.elapsed()),
        }
    }
}

/// Folds task events into job counters and publishes a snapshot on every
/// change. Events for unknown or already terminal tasks are dropped, so the
/// settled counters only ever grow.
pub struct ProgressTracker {
    meta: JobMeta,
    recent_cap: usize,
    state: Mutex<TrackerState>,
    tx: watch::Sender<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(job: JobId, direction: Direction, source: &str, dest: &str, recent_cap: usize) -> Self {
        let meta = JobMeta {
            job,
            direction,
            source: source.to_string(),
            dest: dest.to_string(),
            started: Instant::now(),
        };
        let state = TrackerState {
            status: JobStatus::Discovering,
            discovery_finished: false,
            tasks: BTreeMap::new(),
            files_done: 0,
            files_failed: 0,
            files_cancelled: 0,
            bytes_total: 0,
            bytes_done: 0,
            cancel_reason: None,
            recent: VecDeque::new(),
            finished_after: None,
        };
        let (tx, _) = watch::channel(meta.snapshot(&state));
        Self {
            meta,
            recent_cap,
            state: Mutex::new(state),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn job(&self) -> JobId {
        self.meta.job
    }

    pub fn direction(&self) -> Direction {
        self.meta.direction
    }

    fn publish(&self, state: &TrackerState) {
        self.tx.send_replace(self.meta.snapshot(state));
    }

    fn push_activity(&self, state: &mut TrackerState, activity: Activity) {
        if self.recent_cap == 0 {
            return;
        }
        while state.recent.len() >= self.recent_cap {
            state.recent.pop_front();
        }
        state.recent.push_back(activity);
    }

    /// Apply one event. Returns whether anything changed.
    pub fn apply(&self, event: TaskEvent) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        let changed = self.fold(&mut state, event);
        if changed {
            self.publish(&state);
        }
        changed
    }

    fn fold(&self, state: &mut TrackerState, event: TaskEvent) -> bool {
        let task_id = match &event {
            TaskEvent::DiscoveryFinished => {
                if state.discovery_finished {
                    return false;
                }
                state.discovery_finished = true;
                state.status = JobStatus::Running;
                return true;
            }
            TaskEvent::Discovered {
                task,
                source,
                dest,
                size,
            } => {
                if state.discovery_finished || state.tasks.contains_key(task) {
                    return false;
                }
                state.bytes_total += size.unwrap_or(0);
                state.tasks.insert(
                    *task,
                    TransferTask {
                        id: *task,
                        direction: self.meta.direction,
                        source_path: source.clone(),
                        dest_path: dest.clone(),
                        size_bytes: *size,
                        status: TaskStatus::Queued,
                        bytes_transferred: 0,
                        attempts: 0,
                    },
                );
                return true;
            }
            TaskEvent::Started { task }
            | TaskEvent::Progress { task, .. }
            | TaskEvent::Completed { task, .. }
            | TaskEvent::Failed { task, .. }
            | TaskEvent::Cancelled { task } => *task,
        };

        let Some(task) = state.tasks.get_mut(&task_id) else {
            return false;
        };
        if task.status.is_terminal() {
            return false;
        }

        let mut bytes_delta = 0;
        let mut size_delta = 0;
        let mut activity = None;
        match event {
            TaskEvent::Started { .. } => {
                task.attempts += 1;
                task.status = TaskStatus::Running;
            }
            TaskEvent::Progress { bytes, .. } => {
                if bytes <= task.bytes_transferred {
                    return false;
                }
                bytes_delta = bytes - task.bytes_transferred;
                task.bytes_transferred = bytes;
            }
            TaskEvent::Completed { bytes, .. } => {
                if bytes > task.bytes_transferred {
                    bytes_delta = bytes - task.bytes_transferred;
                    task.bytes_transferred = bytes;
                }
                let known = task.size_bytes.unwrap_or(0);
                if task.bytes_transferred > known {
                    size_delta = task.bytes_transferred - known;
                    task.size_bytes = Some(task.bytes_transferred);
                }
                task.status = TaskStatus::Done;
                activity = Some(Activity::Done(task.source_path.clone()));
            }
            TaskEvent::Failed { error, .. } => {
                activity = Some(Activity::Failed {
                    name: task.source_path.clone(),
                    reason: error.to_string(),
                });
                task.status = TaskStatus::Failed(error);
            }
            TaskEvent::Cancelled { .. } => {
                task.status = TaskStatus::Cancelled;
            }
            TaskEvent::Discovered { .. } | TaskEvent::DiscoveryFinished => return false,
        }

        match task.status {
            TaskStatus::Done => state.files_done += 1,
            TaskStatus::Failed(_) => state.files_failed += 1,
            TaskStatus::Cancelled => state.files_cancelled += 1,
            _ => {}
        }
        state.bytes_done += bytes_delta;
        state.bytes_total += size_delta;
        if let Some(activity) = activity {
            self.push_activity(state, activity);
        }
        true
    }

    /// Record why the job is being cancelled. Only the first reason sticks.
    pub fn set_cancel_reason(&self, reason: CancelReason) -> bool {
        let mut state = self.lock();
        if state.cancel_reason.is_some() || state.status.is_terminal() {
            return false;
        }
        state.cancel_reason = Some(reason);
        self.publish(&state);
        true
    }

    pub fn note(&self, text: impl Into<String>) {
        let mut state = self.lock();
        self.push_activity(&mut state, Activity::Note(text.into()));
        self.publish(&state);
    }

    /// Settle the job. Tasks still queued or running become `Cancelled`.
    pub fn finish(&self, traversal_complete: bool, cancelled: bool) -> JobStatus {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return state.status;
        }

        let mut swept = 0;
        for task in state.tasks.values_mut() {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Cancelled;
                swept += 1;
            }
        }
        state.files_cancelled += swept;
        state.discovery_finished = true;

        let preempted = cancelled && (state.files_cancelled > 0 || !traversal_complete);
        state.status = if preempted {
            if state.files_done > 0 {
                JobStatus::PartiallyFailed
            } else {
                JobStatus::Cancelled
            }
        } else if state.files_failed == 0 && state.files_cancelled == 0 {
            JobStatus::Completed
        } else if state.files_done > 0 {
            JobStatus::PartiallyFailed
        } else {
            JobStatus::Failed
        };
        state.finished_after = Some(self.meta.started.elapsed());
        self.publish(&state);
        state.status
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.meta.snapshot(&self.lock())
    }

    pub fn subscribe(&self) -> ProgressStream {
        ProgressStream {
            rx: self.tx.subscribe(),
            primed: false,
            finished: false,
        }
    }

    /// Resolves with the terminal snapshot.
    pub async fn wait(&self) -> ProgressSnapshot {
        let mut rx = self.tx.subscribe();
        let terminal = match rx.wait_for(|s| s.status.is_terminal()).await {
            Ok(snapshot) => Some(snapshot.clone()),
            Err(_) => None,
        };
        terminal.unwrap_or_else(|| self.snapshot())
    }

    /// Tasks in discovery order.
    pub fn tasks(&self) -> Vec<TransferTask> {
        self.lock().tasks.values().cloned().collect()
    }
}

/// Push updates for one job. Dropping it has no effect on the job.
pub struct ProgressStream {
    rx: watch::Receiver<ProgressSnapshot>,
    primed: bool,
    finished: bool,
}

impl ProgressStream {
    /// The current snapshot first, then one per change. `None` once the
    /// terminal snapshot has been delivered.
    pub async fn next(&mut self) -> Option<ProgressSnapshot> {
        if self.finished {
            return None;
        }
        if self.primed && self.rx.changed().await.is_err() {
            self.finished = true;
            return None;
        }
        self.primed = true;
        let snapshot = self.rx.borrow_and_update().clone();
        if snapshot.status.is_terminal() {
            self.finished = true;
        }
        Some(snapshot)
    }
}
