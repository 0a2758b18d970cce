use std::path::Path;

use super::Direction;
use crate::error::TransferTaskError;
use crate::session::{DirEntry, EntryKind, EntryMeta, Session};

/// Which end of a transfer a path lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn source_of(direction: Direction) -> Self {
        match direction {
            Direction::Upload => Side::Local,
            Direction::Download => Side::Remote,
        }
    }

    pub fn dest_of(direction: Direction) -> Self {
        match direction {
            Direction::Upload => Side::Remote,
            Direction::Download => Side::Local,
        }
    }
}

pub fn join(side: Side, base: &str, name: &str) -> String {
    match side {
        Side::Local => Path::new(base).join(name).to_string_lossy().into_owned(),
        Side::Remote if base.ends_with('/') => format!("{}{}", base, name),
        Side::Remote => format!("{}/{}", base, name),
    }
}

/// Last path component, for activity logs.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(path)
}

fn local_kind(file_type: std::fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

pub async fn stat(side: Side, session: &Session, path: &str) -> Result<EntryMeta, TransferTaskError> {
    match side {
        Side::Remote => session.stat(path).await,
        Side::Local => {
            let meta = tokio::fs::metadata(path)
                .await
                .map_err(|e| TransferTaskError::from_io(path, e))?;
            Ok(EntryMeta {
                kind: local_kind(meta.file_type()),
                size: meta.len(),
            })
        }
    }
}

/// Children sorted by name. Symlinks are reported as such, never followed.
pub async fn list(side: Side, session: &Session, path: &str) -> Result<Vec<DirEntry>, TransferTaskError> {
    let mut entries = match side {
        Side::Remote => session.list_dir(path).await?,
        Side::Local => {
            let mut dir = tokio::fs::read_dir(path)
                .await
                .map_err(|e| TransferTaskError::from_io(path, e))?;
            let mut entries = Vec::new();
            while let Some(entry) = dir
                .next_entry()
                .await
                .map_err(|e| TransferTaskError::from_io(path, e))?
            {
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| TransferTaskError::from_io(path, e))?;
                entries.push(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    kind: local_kind(meta.file_type()),
                    size: meta.len(),
                });
            }
            entries
        }
    };
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Idempotent directory creation on either side.
pub async fn make_dir(side: Side, session: &Session, path: &str) -> Result<(), TransferTaskError> {
    match side {
        Side::Remote => session.make_dir(path).await,
        Side::Local => tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| TransferTaskError::from_io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_per_side() {
        assert_eq!(join(Side::Remote, "/srv", "a.txt"), "/srv/a.txt");
        assert_eq!(join(Side::Remote, "/", "etc"), "/etc");
        assert_eq!(
            join(Side::Local, "/tmp/x", "y"),
            Path::new("/tmp/x").join("y").to_string_lossy()
        );
    }

    #[test]
    fn file_name_takes_last_component() {
        assert_eq!(file_name("/srv/app/log.txt"), "log.txt");
        assert_eq!(file_name("/srv/app/"), "app");
        assert_eq!(file_name("plain"), "plain");
    }
}
