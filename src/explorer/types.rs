use ratatui::widgets::ListState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::resolver::ConnectionSpec;
use crate::session::Session;

/// Represents a file or directory item in the file browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileItem {
    Directory { name: String },
    File { name: String, size: u64 },
}

/// Represents which panel (local or remote) is currently active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelSide {
    Local,
    Remote,
}

/// State of the explorer screen for one host
pub struct ExplorerState {
    pub host_name: String,
    pub spec: ConnectionSpec,
    /// `None` until the background connect finishes
    pub session: Option<Arc<Session>>,

    /// Currently active panel (local or remote)
    pub active_panel: PanelSide,

    // Local panel state
    pub local_current_path: PathBuf,
    pub local_files: Vec<FileItem>,
    pub local_selected: usize,
    pub local_list_state: ListState,

    // Remote panel state
    pub remote_current_path: String,
    pub remote_files: Vec<FileItem>,
    pub remote_selected: usize,
    pub remote_list_state: ListState,
    /// Path of the listing in flight
    pub remote_pending: Option<String>,

    // Name filters, one per pane. `..` always stays visible.
    pub local_filter: String,
    pub remote_filter: String,
    /// Typed characters go to the active pane's filter
    pub filter_editing: bool,

    // UI state
    pub status_message: Option<(String, Instant)>,
}

impl FileItem {
    pub fn name(&self) -> &str {
        match self {
            FileItem::Directory { name } => name,
            FileItem::File { name, .. } => name,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileItem::Directory { .. })
    }

    pub fn is_parent(&self) -> bool {
        matches!(self, FileItem::Directory { name } if name == "..")
    }
}

/// Sort: `..` first, then directories, then files, both alphabetically
pub fn sort_items(items: &mut [FileItem]) {
    items.sort_by(|a, b| {
        use std::cmp::Ordering;
        match (a.is_parent(), b.is_parent()) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        match (a.is_dir(), b.is_dir()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name().cmp(b.name()),
        }
    });
}

/// Items whose name contains `filter`, ignoring case.
pub fn filter_items<'a>(items: &'a [FileItem], filter: &str) -> Vec<&'a FileItem> {
    let needle = filter.to_lowercase();
    items
        .iter()
        .filter(|item| item.is_parent() || item.name().to_lowercase().contains(&needle))
        .collect()
}
