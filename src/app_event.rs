use std::sync::Arc;

use crate::session::{DirEntry, Session};

/// Results delivered to the UI loop by background tasks.
#[derive(Debug)]
pub enum AppEvent {
    SessionReady {
        host: String,
        session: Arc<Session>,
    },
    SessionFailed {
        host: String,
        error: String,
    },
    RemoteListing {
        path: String,
        result: Result<Vec<DirEntry>, String>,
    },
    HealthChecked {
        evicted: usize,
    },
}
