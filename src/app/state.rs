use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use ratatui::widgets::ListState;
use tokio::sync::mpsc;

use crate::app::types::{ActivePanel, App, FolderView, InputMode};
use crate::app_event::AppEvent;
use crate::config::{AppConfig, ConfigManager};
use crate::models::HostEntry;
use crate::registry::HostRegistry;
use crate::session::openssh::OpenSshConnector;
use crate::session::SessionManager;
use crate::transfer::TransferEngine;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Finished jobs left in the jobs pane
const KEPT_FINISHED_JOBS: usize = 5;

impl App {
    pub fn new(
        config_manager: ConfigManager,
        app_config: AppConfig,
        registry: HostRegistry,
        sessions: Arc<SessionManager>,
        engine: Arc<TransferEngine>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut app = Self {
            should_quit: false,
            config_manager,
            app_config,
            registry,
            sessions,
            engine,
            input_mode: InputMode::Normal,
            active_panel: ActivePanel::Hosts,
            status_message: None,
            // Folders
            folders: Vec::new(),
            selected_folder: 0,
            folder_list_state: ListState::default(),
            // Hosts
            hosts_in_current_folder: Vec::new(),
            selected_host: 0,
            host_list_state: ListState::default(),
            // Search
            search_query: String::new(),
            filtered_hosts: Vec::new(),
            search_selected: 0,
            // Explorer
            explorer: None,
            is_connecting: false,
            settled_jobs: HashSet::new(),
            // Help
            show_help: false,
            help_scroll_position: 0,

            events_tx,
            events_rx,
            last_health_check: Instant::now(),
        };
        app.refresh_folders();
        app
    }

    /// Build the application from the files under `config_manager`, talking
    /// to hosts through the system `ssh`.
    pub fn load(config_manager: ConfigManager, app_config: AppConfig) -> Result<Self> {
        let registry = config_manager.open_registry(&app_config)?;
        let timeout = Duration::from_secs(app_config.connect_timeout_secs);
        let connector = OpenSshConnector::new(config_manager.control_dir(), timeout);
        let sessions = Arc::new(SessionManager::new(Arc::new(connector), timeout));
        let engine = Arc::new(TransferEngine::new(app_config.transfer_settings()));
        tracing::info!("Loaded {} hosts", registry.len());
        Ok(Self::new(config_manager, app_config, registry, sessions, engine))
    }

    pub fn set_status_message(&mut self, message: &str) {
        self.status_message = Some((message.to_string(), Instant::now()));
    }

    pub fn clear_status_message(&mut self) {
        self.status_message = None;
    }

    pub fn switch_panel(&mut self) {
        self.active_panel = match self.active_panel {
            ActivePanel::Folders => ActivePanel::Hosts,
            ActivePanel::Hosts => ActivePanel::Folders,
        };
        tracing::debug!("Switched to {:?} panel", self.active_panel);
    }

    /// Rebuild the folder rows from the registry, keeping the selection in range.
    pub fn refresh_folders(&mut self) {
        let mut folders = vec![FolderView::All, FolderView::Unfiled];
        folders.extend(
            self.registry
                .folders()
                .map(|name| FolderView::Named(name.to_string())),
        );
        self.folders = folders;

        if self.selected_folder >= self.folders.len() {
            self.selected_folder = 0;
        }
        self.folder_list_state.select(Some(self.selected_folder));
        self.update_hosts_for_selected_folder();
    }

    pub fn update_hosts_for_selected_folder(&mut self) {
        let hosts: Vec<&HostEntry> = match self.folders.get(self.selected_folder) {
            Some(FolderView::All) | None => self.registry.hosts().collect(),
            Some(FolderView::Unfiled) => self.registry.hosts_in_folder(None),
            Some(FolderView::Named(name)) => self.registry.hosts_in_folder(Some(name)),
        };
        self.hosts_in_current_folder = hosts.into_iter().map(|h| h.name.clone()).collect();

        if self.hosts_in_current_folder.is_empty() {
            self.selected_host = 0;
            self.host_list_state.select(None);
        } else {
            self.selected_host = self
                .selected_host
                .min(self.hosts_in_current_folder.len() - 1);
            self.host_list_state.select(Some(self.selected_host));
        }
    }

    pub fn select_next(&mut self) {
        match self.active_panel {
            ActivePanel::Folders => {
                if self.folders.is_empty() {
                    return;
                }
                self.selected_folder = (self.selected_folder + 1) % self.folders.len();
                self.folder_list_state.select(Some(self.selected_folder));
                self.selected_host = 0;
                self.update_hosts_for_selected_folder();
            }
            ActivePanel::Hosts => {
                if self.hosts_in_current_folder.is_empty() {
                    return;
                }
                self.selected_host = (self.selected_host + 1) % self.hosts_in_current_folder.len();
                self.host_list_state.select(Some(self.selected_host));
            }
        }
    }

    pub fn select_previous(&mut self) {
        match self.active_panel {
            ActivePanel::Folders => {
                if self.folders.is_empty() {
                    return;
                }
                let total = self.folders.len();
                self.selected_folder = (self.selected_folder + total - 1) % total;
                self.folder_list_state.select(Some(self.selected_folder));
                self.selected_host = 0;
                self.update_hosts_for_selected_folder();
            }
            ActivePanel::Hosts => {
                if self.hosts_in_current_folder.is_empty() {
                    return;
                }
                let total = self.hosts_in_current_folder.len();
                self.selected_host = (self.selected_host + total - 1) % total;
                self.host_list_state.select(Some(self.selected_host));
            }
        }
    }

    pub fn get_current_selected_host(&self) -> Option<&HostEntry> {
        let name = match self.input_mode {
            InputMode::Search => self
                .filtered_hosts
                .get(self.search_selected)
                .map(|f| f.name.as_str()),
            _ => self
                .hosts_in_current_folder
                .get(self.selected_host)
                .map(String::as_str),
        }?;
        self.registry.get(name)
    }

    /// Re-read the registry from disk.
    pub fn reload(&mut self) -> Result<()> {
        self.registry = self.config_manager.open_registry(&self.app_config)?;
        self.refresh_folders();
        if self.input_mode == InputMode::Search {
            self.filter_hosts();
        }
        let message = format!("Reloaded {} hosts", self.registry.len());
        self.set_status_message(&message);
        Ok(())
    }

    /// Drain results from background tasks without blocking.
    pub fn process_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::SessionReady { host, session } => {
                let Some(explorer) = self.explorer.as_mut().filter(|e| e.host_name == host) else {
                    tracing::debug!("Session for {} arrived after the explorer closed", host);
                    return;
                };
                self.is_connecting = false;
                explorer.session = Some(session);
                explorer.set_status_message(&format!("Connected to {}", host));
                explorer.refresh_remote(&self.events_tx);
            }
            AppEvent::SessionFailed { host, error } => {
                tracing::error!("Connection to {} failed: {}", host, error);
                self.is_connecting = false;
                if self.explorer.as_ref().map_or(false, |e| e.host_name == host) {
                    self.explorer = None;
                    self.input_mode = InputMode::Normal;
                }
                self.set_status_message(&format!("Connection to {} failed: {}", host, error));
            }
            AppEvent::RemoteListing { path, result } => {
                if let Some(explorer) = self.explorer.as_mut() {
                    explorer.apply_remote_listing(path, result);
                }
            }
            AppEvent::HealthChecked { evicted } => {
                if evicted == 0 {
                    return;
                }
                tracing::warn!("Health check evicted {} sessions", evicted);
                if let Some(explorer) = self.explorer.as_mut() {
                    if !explorer.is_connected() {
                        explorer.set_status_message("Session lost, press r to reconnect");
                    }
                }
            }
        }
    }

    /// Periodic work run once per loop iteration.
    pub fn tick(&mut self) {
        self.settle_finished_jobs();

        if self.last_health_check.elapsed() >= HEALTH_CHECK_INTERVAL {
            self.last_health_check = Instant::now();
            let sessions = Arc::clone(&self.sessions);
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let evicted = sessions.health_check().await;
                let _ = tx.send(AppEvent::HealthChecked { evicted });
            });
        }
    }

    /// Announce each finished job once and refresh the explorer panes.
    /// Old finished jobs are then dropped from the engine.
    fn settle_finished_jobs(&mut self) {
        let mut announced = Vec::new();
        for snap in self.engine.jobs() {
            if snap.status.is_terminal() && self.settled_jobs.insert(snap.job) {
                announced.push(format!(
                    "Job {} {}: {}/{} files",
                    snap.job,
                    snap.status.label(),
                    snap.files_done,
                    snap.files_total
                ));
            }
        }

        if let Some(message) = announced.last() {
            match self.explorer.as_mut() {
                Some(explorer) => {
                    explorer.set_status_message(message);
                    if let Err(e) = explorer.refresh_local() {
                        tracing::warn!("Local refresh failed: {:#}", e);
                    }
                    if explorer.is_connected() {
                        explorer.refresh_remote(&self.events_tx);
                    }
                }
                None => self.set_status_message(message),
            }
        }

        if self.engine.prune_finished(KEPT_FINISHED_JOBS) > 0 {
            let engine = Arc::clone(&self.engine);
            self.settled_jobs.retain(|id| engine.contains(*id));
        }
    }

    /// Cancel running jobs and close every session.
    pub async fn shutdown(&mut self) {
        self.engine.cancel_all();
        self.sessions.close_all().await;
        tracing::info!("Shut down");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session::memory::{MemoryConnector, MemoryFs};
    use tempfile::TempDir;

    pub(crate) fn test_app(dir: &TempDir, fs: MemoryFs) -> App {
        let config_manager = ConfigManager::with_dir(dir.path().join("sshm")).unwrap();
        let mut app_config = AppConfig::default();
        app_config.auto_import = false;

        let mut registry = HostRegistry::new();
        registry.add_folder("prod").unwrap();
        let mut web = HostEntry::new("web-prod", "10.0.0.7");
        web.folder = Some("prod".into());
        registry.add_host(web).unwrap();
        let mut dev = HostEntry::new("dev-server", "10.0.0.5");
        dev.username = "ubuntu".into();
        registry.add_host(dev).unwrap();
        registry.add_host(HostEntry::new("db-prod", "10.0.0.8")).unwrap();

        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemoryConnector::new(fs)),
            Duration::from_secs(5),
        ));
        App::new(
            config_manager,
            app_config,
            registry,
            sessions,
            Arc::new(TransferEngine::default()),
        )
    }

    #[test]
    fn folder_rows_filter_hosts() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        assert_eq!(
            app.folders,
            vec![FolderView::All, FolderView::Unfiled, FolderView::Named("prod".into())]
        );
        assert_eq!(app.hosts_in_current_folder, vec!["db-prod", "dev-server", "web-prod"]);

        app.switch_panel();
        app.select_next();
        assert_eq!(app.hosts_in_current_folder, vec!["db-prod", "dev-server"]);
        app.select_next();
        assert_eq!(app.hosts_in_current_folder, vec!["web-prod"]);
        app.select_next();
        assert_eq!(app.selected_folder, 0);
    }

    #[test]
    fn host_selection_wraps() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        app.select_previous();
        assert_eq!(app.get_current_selected_host().unwrap().name, "web-prod");
        app.select_next();
        assert_eq!(app.get_current_selected_host().unwrap().name, "db-prod");
    }

    #[test]
    fn reload_reads_saved_registry() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        let mut registry = HostRegistry::new();
        registry.add_host(HostEntry::new("only", "10.1.1.1")).unwrap();
        app.config_manager.save_registry(&registry).unwrap();

        app.selected_host = 2;
        app.reload().unwrap();
        assert_eq!(app.hosts_in_current_folder, vec!["only"]);
        assert_eq!(app.selected_host, 0);
        assert_eq!(app.folders.len(), 2);
    }

    #[tokio::test]
    async fn finished_jobs_are_announced_once_and_pruned() {
        let dir = TempDir::new().unwrap();
        let fs = MemoryFs::new();
        fs.add_file("/data/a", 8);
        let mut app = test_app(&dir, fs);
        let spec = crate::resolver::resolve_in(
            &app.registry,
            "dev-server",
            &crate::resolver::OverrideSet::default(),
        )
        .unwrap();
        let session = app.sessions.open(spec).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..KEPT_FINISHED_JOBS + 2 {
            handles.push(app.engine.start_job(
                Arc::clone(&session),
                "/data/a",
                dir.path().join(format!("a{}", i)).display().to_string(),
                crate::transfer::Direction::Download,
                false,
            ));
        }
        for handle in &handles {
            handle.wait().await;
        }

        app.tick();
        let (message, _) = app.status_message.clone().unwrap();
        assert!(message.starts_with(&format!("Job {} ", handles[handles.len() - 1].id())));
        assert_eq!(app.engine.jobs().len(), KEPT_FINISHED_JOBS);
        assert_eq!(app.settled_jobs.len(), KEPT_FINISHED_JOBS);
        assert!(!app.engine.contains(handles[0].id()));

        // Reopening the explorer does not announce the same jobs again
        app.open_explorer("dev-server", &crate::resolver::OverrideSet::default())
            .unwrap();
        app.tick();
        let (message, _) = app.explorer.as_ref().unwrap().status_message.clone().unwrap();
        assert!(message.starts_with("Connecting"));
        assert_eq!(app.engine.jobs().len(), KEPT_FINISHED_JOBS);
    }
}
