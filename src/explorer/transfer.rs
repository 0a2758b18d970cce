use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use super::types::{ExplorerState, FileItem, PanelSide};
use crate::transfer::tree::{self, Side};
use crate::transfer::{Direction, JobHandle, TransferEngine};

/// Source, destination and recursion flag for a transfer started from the explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: String,
    pub dest: String,
    pub recursive: bool,
}

impl ExplorerState {
    /// Build the request for the item selected in the pane `direction` reads from.
    /// The copy lands under the current directory of the other pane.
    pub fn transfer_request(&self, direction: Direction) -> Result<TransferRequest> {
        let side = match direction {
            Direction::Upload => PanelSide::Local,
            Direction::Download => PanelSide::Remote,
        };
        let item = match self.selected_item(side) {
            Some(item) if !item.is_parent() => item,
            _ => bail!("Select a file or directory to {}", direction.label()),
        };
        let name = item.name();
        let local_dir = self.local_current_path.to_string_lossy();

        let (source, dest) = match direction {
            Direction::Upload => (
                tree::join(Side::Local, &local_dir, name),
                tree::join(Side::Remote, &self.remote_current_path, name),
            ),
            Direction::Download if item.is_dir() => (
                tree::join(Side::Remote, &self.remote_current_path, name),
                tree::join(Side::Local, &local_dir, name),
            ),
            Direction::Download => (
                tree::join(Side::Remote, &self.remote_current_path, name),
                unique_local_path(&self.local_current_path, name)
                    .to_string_lossy()
                    .into_owned(),
            ),
        };

        Ok(TransferRequest {
            source,
            dest,
            recursive: matches!(item, FileItem::Directory { .. }),
        })
    }

    /// Start a job for the current selection.
    pub fn start_transfer(&mut self, engine: &TransferEngine, direction: Direction) -> Result<JobHandle> {
        let Some(session) = self.session.clone() else {
            bail!("Not connected to {}", self.host_name);
        };
        let request = self.transfer_request(direction)?;
        let handle = engine.start_job(
            session,
            request.source.clone(),
            request.dest,
            direction,
            request.recursive,
        );
        self.set_status_message(&format!(
            "Job {}: {} {}",
            handle.id(),
            direction.label(),
            tree::file_name(&request.source)
        ));
        Ok(handle)
    }
}

/// `dir/file_name`, or the first free `name (N).ext` when that exists.
/// Everything from the first dot after the start counts as the extension,
/// so `backup.tar.gz` becomes `backup (1).tar.gz`.
pub fn unique_local_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let split_at = file_name
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '.')
        .map_or(file_name.len(), |(i, _)| i);
    let (base, suffix) = file_name.split_at(split_at);
    (1..)
        .map(|n| dir.join(format!("{} ({}){}", base, n, suffix)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ConnectionSpec;
    use crate::session::memory::MemoryFs;
    use crate::session::Session;
    use crate::transfer::JobStatus;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn explorer(dir: &TempDir) -> ExplorerState {
        let spec = ConnectionSpec {
            host: "10.0.0.5".into(),
            port: 22,
            username: "ubuntu".into(),
            identity_file: None,
            proxy_jump: Vec::new(),
            forwards: Vec::new(),
        };
        ExplorerState::new("dev", spec, dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn upload_request_targets_remote_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("site")).unwrap();
        let mut state = explorer(&dir);
        state.remote_current_path = "/srv".into();
        state.local_selected = 1;

        let request = state.transfer_request(Direction::Upload).unwrap();
        assert_eq!(request.dest, "/srv/site");
        assert!(request.source.ends_with("site"));
        assert!(request.recursive);
    }

    #[test]
    fn parent_entry_cannot_be_transferred() {
        let dir = TempDir::new().unwrap();
        let state = explorer(&dir);
        assert!(state.transfer_request(Direction::Upload).is_err());
        assert!(state.transfer_request(Direction::Download).is_err());
    }

    #[tokio::test]
    async fn download_from_explorer_lands_in_local_pane() {
        let dir = TempDir::new().unwrap();
        let mut state = explorer(&dir);
        let fs = MemoryFs::new();
        fs.add_dir("/var");
        fs.add_file("/var/app.log", 42);
        state.session = Some(Arc::new(Session::new(state.spec.clone(), Arc::new(fs))));
        state.remote_current_path = "/var".into();
        state.remote_files = vec![
            FileItem::Directory { name: "..".into() },
            FileItem::File { name: "app.log".into(), size: 42 },
        ];
        state.remote_selected = 1;

        let engine = TransferEngine::default();
        let handle = state.start_transfer(&engine, Direction::Download).unwrap();
        let snap = handle.wait().await;
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(std::fs::metadata(dir.path().join("app.log")).unwrap().len(), 42);
    }

    #[test]
    fn downloads_never_overwrite_local_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("backup.tar.gz"), b"old").unwrap();
        std::fs::write(dir.path().join("backup (1).tar.gz"), b"old").unwrap();
        std::fs::write(dir.path().join(".bashrc"), b"old").unwrap();

        assert_eq!(unique_local_path(dir.path(), "backup.tar.gz"), dir.path().join("backup (2).tar.gz"));
        assert_eq!(unique_local_path(dir.path(), ".bashrc"), dir.path().join(".bashrc (1)"));
        assert_eq!(unique_local_path(dir.path(), "fresh"), dir.path().join("fresh"));

        let mut state = explorer(&dir);
        state.remote_current_path = "/home/ubuntu".into();
        state.remote_files = vec![
            FileItem::Directory { name: "..".into() },
            FileItem::File { name: "backup.tar.gz".into(), size: 3 },
        ];
        state.remote_selected = 1;
        let request = state.transfer_request(Direction::Download).unwrap();
        assert_eq!(request.source, "/home/ubuntu/backup.tar.gz");
        assert_eq!(PathBuf::from(request.dest), dir.path().join("backup (2).tar.gz"));
    }

    #[test]
    fn download_request_follows_the_filtered_selection() {
        let dir = TempDir::new().unwrap();
        let mut state = explorer(&dir);
        state.remote_current_path = "/srv".into();
        state.remote_files = vec![
            FileItem::Directory { name: "..".into() },
            FileItem::Directory { name: "assets".into() },
            FileItem::File { name: "app.log".into(), size: 1 },
            FileItem::File { name: "db.log".into(), size: 1 },
        ];
        state.active_panel = PanelSide::Remote;
        state.start_filter();
        for c in "db".chars() {
            state.push_filter_char(c);
        }
        state.navigate_down();

        let request = state.transfer_request(Direction::Download).unwrap();
        assert_eq!(request.source, "/srv/db.log");
        assert!(!request.recursive);
    }
}
