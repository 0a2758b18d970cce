use super::types::{filter_items, ExplorerState, FileItem, PanelSide};
use crate::resolver::ConnectionSpec;
use anyhow::{Context, Result};
use ratatui::widgets::ListState;
use std::path::PathBuf;
use std::time::Instant;

impl ExplorerState {
    /// Explorer for `host_name`, starting in `local_dir`. The remote pane
    /// stays empty until a session is attached.
    pub fn new(host_name: &str, spec: ConnectionSpec, local_dir: PathBuf) -> Result<Self> {
        let mut state = Self {
            host_name: host_name.to_string(),
            spec,
            session: None,
            active_panel: PanelSide::Local,
            // LOCAL
            local_current_path: local_dir,
            local_files: Vec::new(),
            local_selected: 0,
            local_list_state: ListState::default(),

            // REMOTE
            remote_current_path: "/".to_string(),
            remote_files: Vec::new(),
            remote_selected: 0,
            remote_list_state: ListState::default(),
            remote_pending: None,

            local_filter: String::new(),
            remote_filter: String::new(),
            filter_editing: false,

            status_message: None,
        };

        state
            .refresh_local()
            .context("Failed to read local directory")?;
        state.local_list_state.select(Some(0));
        Ok(state)
    }

    /// Set a status message to be displayed to the user
    pub fn set_status_message(&mut self, message: &str) {
        self.status_message = Some((message.to_string(), Instant::now()));
    }

    pub fn clear_status_message(&mut self) {
        self.status_message = None;
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.is_ready())
    }

    /// Switch the active panel between local and remote
    pub fn switch_panel(&mut self) {
        self.active_panel = match self.active_panel {
            PanelSide::Local => PanelSide::Remote,
            PanelSide::Remote => PanelSide::Local,
        };
    }

    pub fn navigate_up(&mut self) {
        let len = self.visible_items(self.active_panel).len();
        match self.active_panel {
            PanelSide::Local => {
                self.local_selected = step_back(self.local_selected, len);
                self.local_list_state.select(Some(self.local_selected));
            }
            PanelSide::Remote => {
                self.remote_selected = step_back(self.remote_selected, len);
                self.remote_list_state.select(Some(self.remote_selected));
            }
        }
    }

    pub fn navigate_down(&mut self) {
        let len = self.visible_items(self.active_panel).len();
        match self.active_panel {
            PanelSide::Local => {
                self.local_selected = step_forward(self.local_selected, len);
                self.local_list_state.select(Some(self.local_selected));
            }
            PanelSide::Remote => {
                self.remote_selected = step_forward(self.remote_selected, len);
                self.remote_list_state.select(Some(self.remote_selected));
            }
        }
    }

    /// Items of `side` that pass its filter, in display order.
    pub fn visible_items(&self, side: PanelSide) -> Vec<&FileItem> {
        match side {
            PanelSide::Local => filter_items(&self.local_files, &self.local_filter),
            PanelSide::Remote => filter_items(&self.remote_files, &self.remote_filter),
        }
    }

    /// Selection index into `visible_items(side)`.
    pub fn selected_item(&self, side: PanelSide) -> Option<&FileItem> {
        let selected = match side {
            PanelSide::Local => self.local_selected,
            PanelSide::Remote => self.remote_selected,
        };
        self.visible_items(side).get(selected).copied()
    }

    pub fn filter(&self, side: PanelSide) -> &str {
        match side {
            PanelSide::Local => &self.local_filter,
            PanelSide::Remote => &self.remote_filter,
        }
    }

    pub fn start_filter(&mut self) {
        self.filter_editing = true;
    }

    /// Stop editing and keep the filter applied.
    pub fn finish_filter(&mut self) {
        self.filter_editing = false;
    }

    pub fn push_filter_char(&mut self, c: char) {
        self.active_filter_mut().push(c);
        self.reset_selection(self.active_panel);
    }

    pub fn pop_filter_char(&mut self) {
        self.active_filter_mut().pop();
        self.reset_selection(self.active_panel);
    }

    /// Drop the active pane's filter and stop editing.
    pub fn clear_filter(&mut self) {
        self.filter_editing = false;
        self.active_filter_mut().clear();
        self.reset_selection(self.active_panel);
    }

    /// Forget the filter of `side`, used when the pane changes directory.
    pub(super) fn reset_filter(&mut self, side: PanelSide) {
        match side {
            PanelSide::Local => self.local_filter.clear(),
            PanelSide::Remote => self.remote_filter.clear(),
        }
        if side == self.active_panel {
            self.filter_editing = false;
        }
    }

    fn active_filter_mut(&mut self) -> &mut String {
        match self.active_panel {
            PanelSide::Local => &mut self.local_filter,
            PanelSide::Remote => &mut self.remote_filter,
        }
    }

    fn reset_selection(&mut self, side: PanelSide) {
        match side {
            PanelSide::Local => {
                self.local_selected = 0;
                self.local_list_state.select(Some(0));
            }
            PanelSide::Remote => {
                self.remote_selected = 0;
                self.remote_list_state.select(Some(0));
            }
        }
    }
}

fn step_back(selected: usize, len: usize) -> usize {
    if selected > 0 {
        selected - 1
    } else {
        len.saturating_sub(1)
    }
}

fn step_forward(selected: usize, len: usize) -> usize {
    if selected + 1 < len {
        selected + 1
    } else {
        0
    }
}
