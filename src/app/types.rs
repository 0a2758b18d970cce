use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use ratatui::widgets::ListState;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::app_event::AppEvent;
use crate::config::{AppConfig, ConfigManager};
use crate::explorer::ExplorerState;
use crate::registry::HostRegistry;
use crate::session::SessionManager;
use crate::transfer::{JobId, TransferEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
    Explorer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivePanel {
    Folders,
    Hosts,
}

/// One row of the folders panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderView {
    All,
    Unfiled,
    Named(String),
}

impl FolderView {
    pub fn label(&self) -> &str {
        match self {
            FolderView::All => "All hosts",
            FolderView::Unfiled => "No folder",
            FolderView::Named(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredHost {
    pub name: String,
    pub score: i64,
    /// Char positions in `name` that matched the query
    pub matched_indices: Vec<usize>,
}

pub struct App {
    pub should_quit: bool,
    pub config_manager: ConfigManager,
    pub app_config: AppConfig,
    pub registry: HostRegistry,
    pub sessions: Arc<SessionManager>,
    pub engine: Arc<TransferEngine>,

    pub input_mode: InputMode,
    pub active_panel: ActivePanel,
    pub status_message: Option<(String, Instant)>,

    // Folder panel
    pub folders: Vec<FolderView>,
    pub selected_folder: usize,
    pub folder_list_state: ListState,

    // Host panel: names of the hosts in the selected folder
    pub hosts_in_current_folder: Vec<String>,
    pub selected_host: usize,
    pub host_list_state: ListState,

    // Search Mode
    pub search_query: String,
    pub filtered_hosts: Vec<FilteredHost>,
    pub search_selected: usize,

    // Explorer Mode
    pub explorer: Option<ExplorerState>,
    pub is_connecting: bool,
    /// Finished jobs already announced
    pub settled_jobs: HashSet<JobId>,

    // Help popup
    pub show_help: bool,
    pub help_scroll_position: u16,

    pub events_tx: UnboundedSender<AppEvent>,
    pub events_rx: UnboundedReceiver<AppEvent>,
    pub last_health_check: Instant,
}
