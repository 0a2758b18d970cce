use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use super::types::{sort_items, ExplorerState, FileItem, PanelSide};

impl ExplorerState {
    /// Refresh the local file list
    pub fn refresh_local(&mut self) -> Result<()> {
        self.local_files = read_local_directory(&self.local_current_path)?;
        let visible = self.visible_items(PanelSide::Local).len();
        if self.local_selected >= visible {
            self.local_selected = visible.saturating_sub(1);
        }
        self.local_list_state.select(Some(self.local_selected));
        Ok(())
    }

    /// Enter the selected local directory, or its parent for `..`
    pub fn open_local_selected(&mut self) -> Result<()> {
        let Some(FileItem::Directory { name }) = self.selected_item(PanelSide::Local).cloned() else {
            return Ok(());
        };
        let target = if name == ".." {
            match self.local_current_path.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return Ok(()),
            }
        } else {
            self.local_current_path.join(&name)
        };
        self.change_local_dir(target)
    }

    /// Go up one directory in the local file system
    pub fn go_local_back(&mut self) -> Result<()> {
        match self.local_current_path.parent() {
            Some(parent) => {
                let parent = parent.to_path_buf();
                self.change_local_dir(parent)
            }
            None => Ok(()),
        }
    }

    fn change_local_dir(&mut self, target: std::path::PathBuf) -> Result<()> {
        // Read first so an unreadable directory leaves the pane unchanged
        let files = read_local_directory(&target)?;
        self.local_current_path = target;
        self.local_files = files;
        self.reset_filter(PanelSide::Local);
        self.local_selected = 0;
        self.local_list_state.select(Some(0));
        Ok(())
    }
}

/// Read the contents of a local directory
fn read_local_directory(path: &Path) -> Result<Vec<FileItem>> {
    let mut items = Vec::new();

    // Add parent directory entry if not at root
    if path.parent().is_some() {
        items.push(FileItem::Directory {
            name: "..".to_string(),
        });
    }

    let entries = fs::read_dir(path)
        .with_context(|| format!("Failed to read local directory {}", path.display()))?;

    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", file_name, e);
                continue;
            }
        };

        if metadata.is_dir() {
            items.push(FileItem::Directory { name: file_name });
        } else {
            items.push(FileItem::File {
                name: file_name,
                size: metadata.len(),
            });
        }
    }

    sort_items(&mut items);
    Ok(items)
}
