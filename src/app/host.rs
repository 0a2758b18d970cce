use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::Backend, Terminal};

use crate::app::types::{App, InputMode};
use crate::app_event::AppEvent;
use crate::explorer::ExplorerState;
use crate::resolver::{resolve_in, OverrideSet};
use crate::ssh_service;

impl App {
    /// Connect to the selected host in this terminal. The TUI is suspended
    /// until `ssh` exits.
    pub fn handle_key_enter<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let Some(name) = self.get_current_selected_host().map(|h| h.name.clone()) else {
            return Ok(());
        };
        tracing::info!("Enter pressed, selected host: {}", name);

        let spec = match resolve_in(&self.registry, &name, &OverrideSet::default()) {
            Ok(spec) => spec,
            Err(e) => {
                self.set_status_message(&format!("Error: {}", e));
                return Ok(());
            }
        };

        self.transition_to_ssh_mode(terminal)?;
        let result = tokio::task::block_in_place(|| ssh_service::connect_interactive(&spec));
        self.restore_tui_mode(terminal)?;

        match result {
            Ok(status) if ssh_service::is_connection_failure(&status) => {
                self.set_status_message(&format!("SSH Error: connection to {} failed", name));
            }
            Ok(_) => self.set_status_message(&format!("SSH session to {} ended", name)),
            Err(e) => self.set_status_message(&format!("SSH Error: {:#}", e)),
        }
        Ok(())
    }

    pub fn handle_key_q(&mut self) -> Result<()> {
        self.should_quit = true;
        Ok(())
    }

    /// Open the registry file in the system editor, then reload it.
    pub fn handle_key_e(&mut self) -> Result<()> {
        let hosts_path = self.config_manager.registry_path().to_path_buf();

        if !hosts_path.exists() {
            self.config_manager.save_registry(&self.registry)?;
        }

        if let Err(e) = open::that(&hosts_path) {
            tracing::error!("Failed to open editor: {}", e);
            return Err(anyhow::anyhow!("Failed to open editor: {}", e));
        }

        self.reload()
    }

    /// Open the explorer for the selected host.
    pub fn handle_key_f(&mut self) -> Result<()> {
        let Some(name) = self.get_current_selected_host().map(|h| h.name.clone()) else {
            return Ok(());
        };
        self.open_explorer(&name, &OverrideSet::default())
    }

    /// Switch to the explorer for `name` and start connecting in the background.
    pub fn open_explorer(&mut self, name: &str, overrides: &OverrideSet) -> Result<()> {
        let spec = resolve_in(&self.registry, name, overrides)?;
        let local_dir = std::env::current_dir().context("Failed to read current directory")?;
        let explorer = ExplorerState::new(name, spec, local_dir)?;

        tracing::info!("Opening explorer for {}", name);
        self.explorer = Some(explorer);
        self.input_mode = InputMode::Explorer;
        self.connect_explorer();
        Ok(())
    }

    /// Open (or reuse) the explorer's session. The result arrives as an
    /// `AppEvent`.
    pub fn connect_explorer(&mut self) {
        let Some(explorer) = self.explorer.as_mut() else {
            return;
        };
        self.is_connecting = true;
        explorer.set_status_message(&format!("Connecting to {}...", explorer.host_name));

        let sessions = Arc::clone(&self.sessions);
        let tx = self.events_tx.clone();
        let spec = explorer.spec.clone();
        let host = explorer.host_name.clone();
        tokio::spawn(async move {
            let event = match sessions.open(spec).await {
                Ok(session) => AppEvent::SessionReady { host, session },
                Err(e) => AppEvent::SessionFailed {
                    host,
                    error: e.to_string(),
                },
            };
            let _ = tx.send(event);
        });
    }

    /// Leave the explorer. Running jobs keep going in the background.
    pub fn close_explorer(&mut self) {
        tracing::info!("Exiting explorer");
        self.explorer = None;
        self.is_connecting = false;
        self.input_mode = InputMode::Normal;
        self.set_status_message("Exited explorer");
    }

    fn transition_to_ssh_mode<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        disable_raw_mode().context("Failed to disable raw mode for SSH")?;
        let mut stdout = std::io::stdout();
        execute!(&mut stdout, LeaveAlternateScreen, DisableMouseCapture)
            .context("Failed to leave alternate screen for SSH")?;
        terminal
            .show_cursor()
            .context("Failed to show cursor for SSH")?;

        tracing::info!("TUI disabled for SSH mode");
        Ok(())
    }

    fn restore_tui_mode<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        enable_raw_mode().context("Failed to re-enable raw mode post-SSH")?;
        let mut stdout = std::io::stdout();
        execute!(&mut stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("Failed to re-enter alternate screen post-SSH")?;

        terminal
            .clear()
            .context("Failed to clear terminal post-SSH")?;
        tracing::info!("TUI restored after SSH session");
        Ok(())
    }
}
