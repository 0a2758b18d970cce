use std::collections::{BTreeMap, BTreeSet};

use crate::error::{RegistryError, ResolutionError};
use crate::filter::HostFilter;
use crate::models::{insert_tag, HostEntry, RegistryFile};
use crate::ssh_config::ImportedHost;

/// Outcome of merging SSH config stanzas into the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub replaced: usize,
    pub skipped: usize,
}

/// In-memory host registry. Single writer: the presentation layer mutates
/// it through these methods and persists it explicitly afterwards.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: BTreeMap<String, HostEntry>,
    folders: BTreeSet<String>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the persisted form, repairing what can be repaired:
    /// entries whose `name` disagrees with their key take the key, and
    /// dangling folder references create the folder.
    pub fn from_file(file: RegistryFile) -> Self {
        let mut registry = Self {
            hosts: BTreeMap::new(),
            folders: file
                .folders
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
        };

        for (key, mut entry) in file.hosts {
            if key.trim().is_empty() {
                tracing::warn!("Dropping host with empty name");
                continue;
            }
            if entry.name != key {
                tracing::warn!("Host '{}' stored under key '{}', using the key", entry.name, key);
                entry.name = key.clone();
            }
            if let Some(folder) = entry.folder.as_ref() {
                if !registry.folders.contains(folder) {
                    tracing::warn!("Host '{}' references missing folder '{}', creating it", key, folder);
                    registry.folders.insert(folder.clone());
                }
            }
            registry.hosts.insert(key, entry);
        }

        registry
    }

    pub fn to_file(&self) -> RegistryFile {
        RegistryFile {
            hosts: self.hosts.clone(),
            folders: self.folders.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&HostEntry> {
        self.hosts.get(name)
    }

    /// Hosts sorted by name.
    pub fn hosts(&self) -> impl Iterator<Item = &HostEntry> {
        self.hosts.values()
    }

    pub fn folders(&self) -> impl Iterator<Item = &str> {
        self.folders.iter().map(String::as_str)
    }

    pub fn hosts_in_folder(&self, folder: Option<&str>) -> Vec<&HostEntry> {
        self.hosts
            .values()
            .filter(|h| h.folder.as_deref() == folder)
            .collect()
    }

    pub fn filter(&self, expr: &str) -> Vec<&HostEntry> {
        let filter = HostFilter::parse(expr);
        self.hosts.values().filter(|h| filter.matches(h)).collect()
    }

    /// Exact name first, then a unique case-insensitive substring match.
    pub fn find(&self, query: &str) -> Result<&HostEntry, ResolutionError> {
        if let Some(entry) = self.hosts.get(query) {
            return Ok(entry);
        }
        let needle = query.to_lowercase();
        let candidates: Vec<&HostEntry> = self
            .hosts
            .values()
            .filter(|h| h.name.to_lowercase().contains(&needle))
            .collect();
        match candidates.as_slice() {
            [] => Err(ResolutionError::NoMatchingHost(query.to_string())),
            [only] => Ok(only),
            many => Err(ResolutionError::AmbiguousHost {
                query: query.to_string(),
                candidates: many.iter().map(|h| h.name.clone()).collect(),
            }),
        }
    }

    fn validate(&self, entry: &HostEntry) -> Result<(), RegistryError> {
        if entry.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if entry.port == 0 {
            return Err(RegistryError::InvalidPort);
        }
        if let Some(folder) = entry.folder.as_ref() {
            if !self.folders.contains(folder) {
                return Err(RegistryError::UnknownFolder(folder.clone()));
            }
        }
        Ok(())
    }

    pub fn add_host(&mut self, mut entry: HostEntry) -> Result<(), RegistryError> {
        entry.name = entry.name.trim().to_string();
        self.validate(&entry)?;
        if self.hosts.contains_key(&entry.name) {
            return Err(RegistryError::DuplicateHost(entry.name));
        }
        tracing::info!("Adding host '{}'", entry.name);
        self.hosts.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Apply `edit` to a copy of the entry and keep it only if it still
    /// validates. Renaming goes through [`HostRegistry::rename_host`].
    pub fn update_host<F>(&mut self, name: &str, edit: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut HostEntry),
    {
        let mut updated = self
            .hosts
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::HostNotFound(name.to_string()))?;
        edit(&mut updated);
        updated.name = name.to_string();
        self.validate(&updated)?;
        self.hosts.insert(name.to_string(), updated);
        Ok(())
    }

    pub fn remove_host(&mut self, name: &str) -> Result<HostEntry, RegistryError> {
        self.hosts
            .remove(name)
            .ok_or_else(|| RegistryError::HostNotFound(name.to_string()))
    }

    pub fn rename_host(&mut self, old: &str, new: &str) -> Result<(), RegistryError> {
        let new = new.trim();
        if new.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if old == new {
            return if self.hosts.contains_key(old) {
                Ok(())
            } else {
                Err(RegistryError::HostNotFound(old.to_string()))
            };
        }
        if self.hosts.contains_key(new) {
            return Err(RegistryError::DuplicateHost(new.to_string()));
        }
        let mut entry = self
            .hosts
            .remove(old)
            .ok_or_else(|| RegistryError::HostNotFound(old.to_string()))?;
        entry.name = new.to_string();
        self.hosts.insert(new.to_string(), entry);
        Ok(())
    }

    /// Returns how many tags were actually added.
    pub fn add_tags(&mut self, name: &str, tags: &[String]) -> Result<usize, RegistryError> {
        let entry = self
            .hosts
            .get_mut(name)
            .ok_or_else(|| RegistryError::HostNotFound(name.to_string()))?;
        Ok(tags.iter().filter(|tag| insert_tag(&mut entry.tags, tag)).count())
    }

    /// Returns how many tags were removed. Matching ignores case.
    pub fn remove_tags(&mut self, name: &str, tags: &[String]) -> Result<usize, RegistryError> {
        let entry = self
            .hosts
            .get_mut(name)
            .ok_or_else(|| RegistryError::HostNotFound(name.to_string()))?;
        let before = entry.tags.len();
        entry
            .tags
            .retain(|t| !tags.iter().any(|r| r.trim().eq_ignore_ascii_case(t)));
        Ok(before - entry.tags.len())
    }

    pub fn add_folder(&mut self, name: &str) -> Result<(), RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.folders.iter().any(|f| f.eq_ignore_ascii_case(name)) {
            return Err(RegistryError::DuplicateFolder(name.to_string()));
        }
        self.folders.insert(name.to_string());
        Ok(())
    }

    /// Delete a folder and move its hosts to the root. Returns the number
    /// of hosts moved.
    pub fn remove_folder(&mut self, name: &str) -> Result<usize, RegistryError> {
        if !self.folders.remove(name) {
            return Err(RegistryError::FolderNotFound(name.to_string()));
        }
        let mut moved = 0;
        for entry in self.hosts.values_mut() {
            if entry.folder.as_deref() == Some(name) {
                entry.folder = None;
                moved += 1;
            }
        }
        Ok(moved)
    }

    pub fn rename_folder(&mut self, old: &str, new: &str) -> Result<(), RegistryError> {
        let new = new.trim();
        if new.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if !self.folders.contains(old) {
            return Err(RegistryError::FolderNotFound(old.to_string()));
        }
        if old != new && self.folders.iter().any(|f| f != old && f.eq_ignore_ascii_case(new)) {
            return Err(RegistryError::DuplicateFolder(new.to_string()));
        }
        self.folders.remove(old);
        self.folders.insert(new.to_string());
        for entry in self.hosts.values_mut() {
            if entry.folder.as_deref() == Some(old) {
                entry.folder = Some(new.to_string());
            }
        }
        Ok(())
    }

    /// Merge imported stanzas. Existing entries are kept unless `force`,
    /// in which case their connection fields are replaced while tags and
    /// folder survive.
    pub fn merge_imported(&mut self, stanzas: Vec<ImportedHost>, force: bool) -> ImportReport {
        let mut report = ImportReport::default();
        for stanza in stanzas {
            if stanza.name.trim().is_empty() {
                report.skipped += 1;
                continue;
            }
            match self.hosts.get_mut(&stanza.name) {
                Some(existing) if force => {
                    let imported = stanza.into_entry();
                    existing.host = imported.host;
                    existing.port = imported.port;
                    existing.username = imported.username;
                    existing.identity_file = imported.identity_file;
                    existing.proxy_jump = imported.proxy_jump;
                    existing.tags.extend(imported.tags);
                    report.replaced += 1;
                }
                Some(_) => report.skipped += 1,
                None => {
                    let entry = stanza.into_entry();
                    self.hosts.insert(entry.name.clone(), entry);
                    report.added += 1;
                }
            }
        }
        tracing::info!(
            "SSH config import: {} added, {} replaced, {} skipped",
            report.added,
            report.replaced,
            report.skipped
        );
        report
    }
}
