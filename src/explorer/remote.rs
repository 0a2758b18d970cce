use tokio::sync::mpsc::UnboundedSender;

use super::types::{sort_items, ExplorerState, FileItem, PanelSide};
use crate::app_event::AppEvent;
use crate::session::DirEntry;
use crate::transfer::tree::{self, Side};

/// Parent of a remote POSIX path; `/` is its own parent.
pub fn remote_parent(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

impl ExplorerState {
    /// List `path` on the remote side in the background. The result arrives
    /// as `AppEvent::RemoteListing` and only replaces the pane on success.
    pub fn request_remote_listing(&mut self, path: String, tx: &UnboundedSender<AppEvent>) {
        let Some(session) = self.session.clone() else {
            self.set_status_message("Not connected yet");
            return;
        };
        self.remote_pending = Some(path.clone());
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = session.list_dir(&path).await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::RemoteListing { path, result });
        });
    }

    pub fn refresh_remote(&mut self, tx: &UnboundedSender<AppEvent>) {
        let path = self.remote_current_path.clone();
        self.request_remote_listing(path, tx);
    }

    /// Enter the selected remote directory, or its parent for `..`
    pub fn open_remote_selected(&mut self, tx: &UnboundedSender<AppEvent>) {
        let Some(FileItem::Directory { name }) = self.selected_item(PanelSide::Remote).cloned() else {
            return;
        };
        let target = if name == ".." {
            remote_parent(&self.remote_current_path)
        } else {
            tree::join(Side::Remote, &self.remote_current_path, &name)
        };
        self.request_remote_listing(target, tx);
    }

    pub fn go_remote_back(&mut self, tx: &UnboundedSender<AppEvent>) {
        if self.remote_current_path == "/" {
            return;
        }
        let parent = remote_parent(&self.remote_current_path);
        self.request_remote_listing(parent, tx);
    }

    pub fn is_remote_loading(&self) -> bool {
        self.remote_pending.is_some()
    }

    /// Apply a finished listing. Listings for anything but the latest
    /// request are dropped.
    pub fn apply_remote_listing(&mut self, path: String, result: Result<Vec<DirEntry>, String>) {
        if self.remote_pending.as_deref() != Some(path.as_str()) {
            tracing::debug!("Dropping stale listing for {}", path);
            return;
        }
        self.remote_pending = None;

        match result {
            Ok(entries) => {
                let changed_dir = path != self.remote_current_path;
                self.remote_files = remote_items(&path, entries);
                self.remote_current_path = path;
                if changed_dir {
                    self.reset_filter(PanelSide::Remote);
                }
                if changed_dir || self.remote_selected >= self.visible_items(PanelSide::Remote).len() {
                    self.remote_selected = 0;
                }
                self.remote_list_state.select(Some(self.remote_selected));
            }
            Err(e) => {
                tracing::warn!("Remote listing of {} failed: {}", path, e);
                self.set_status_message(&format!("Cannot open {}: {}", path, e));
            }
        }
    }
}

fn remote_items(path: &str, entries: Vec<DirEntry>) -> Vec<FileItem> {
    let mut items = Vec::with_capacity(entries.len() + 1);
    if path != "/" {
        items.push(FileItem::Directory {
            name: "..".to_string(),
        });
    }
    for entry in entries {
        if entry.is_dir() {
            items.push(FileItem::Directory { name: entry.name });
        } else {
            items.push(FileItem::File {
                name: entry.name,
                size: entry.size,
            });
        }
    }
    sort_items(&mut items);
    items
}
