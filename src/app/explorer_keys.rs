use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent};

use crate::app::types::{App, InputMode};
use crate::explorer::PanelSide;
use crate::transfer::Direction;

impl App {
    pub fn handle_explorer_key(&mut self, key: KeyEvent) -> Result<()> {
        if self.handle_filter_key(key) {
            return Ok(());
        }
        if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
            self.close_explorer();
            return Ok(());
        }
        if key.code == KeyCode::Char('c') {
            self.cancel_latest_job();
            return Ok(());
        }

        let tx = self.events_tx.clone();
        let is_connecting = self.is_connecting;
        let Some(explorer) = self.explorer.as_mut() else {
            self.input_mode = InputMode::Normal;
            return Ok(());
        };

        let mut reconnect = false;
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => explorer.navigate_up(),
            KeyCode::Down | KeyCode::Char('j') => explorer.navigate_down(),
            KeyCode::Tab => {
                explorer.finish_filter();
                explorer.switch_panel();
            }
            KeyCode::Char('/') => explorer.start_filter(),
            KeyCode::Enter => match explorer.active_panel {
                PanelSide::Local => {
                    if let Err(e) = explorer.open_local_selected() {
                        explorer.set_status_message(&format!("Error: {:#}", e));
                    }
                }
                PanelSide::Remote => explorer.open_remote_selected(&tx),
            },
            KeyCode::Backspace => match explorer.active_panel {
                PanelSide::Local => {
                    if let Err(e) = explorer.go_local_back() {
                        explorer.set_status_message(&format!("Error: {:#}", e));
                    }
                }
                PanelSide::Remote => explorer.go_remote_back(&tx),
            },
            KeyCode::Char('u') | KeyCode::Char('d') => {
                let direction = if key.code == KeyCode::Char('u') {
                    Direction::Upload
                } else {
                    Direction::Download
                };
                if !explorer.is_connected() {
                    explorer.set_status_message("Not connected, press r to reconnect");
                } else if let Err(e) = explorer.start_transfer(&self.engine, direction) {
                    explorer.set_status_message(&format!("{} error: {:#}", direction.label(), e));
                }
            }
            KeyCode::Char('r') => {
                if let Err(e) = explorer.refresh_local() {
                    explorer.set_status_message(&format!("Local refresh error: {:#}", e));
                }
                if explorer.is_connected() {
                    explorer.refresh_remote(&tx);
                } else if !is_connecting {
                    reconnect = true;
                }
            }
            _ => {}
        }

        if reconnect {
            self.connect_explorer();
        }
        Ok(())
    }

    /// Editing keys while a filter is being typed. Navigation keys fall
    /// through to the normal explorer handling.
    fn handle_filter_key(&mut self, key: KeyEvent) -> bool {
        let Some(explorer) = self.explorer.as_mut().filter(|e| e.filter_editing) else {
            return false;
        };
        match key.code {
            KeyCode::Esc => explorer.clear_filter(),
            KeyCode::Enter => explorer.finish_filter(),
            KeyCode::Backspace => explorer.pop_filter_char(),
            KeyCode::Char(c) => explorer.push_filter_char(c),
            _ => return false,
        }
        true
    }

    /// Cancel the newest job that is still running.
    pub fn cancel_latest_job(&mut self) {
        let message = match self.engine.latest_active() {
            Some(handle) => {
                self.engine.cancel(&handle);
                format!("Cancelling job {}", handle.id())
            }
            None => "No running job".to_string(),
        };
        match self.explorer.as_mut() {
            Some(explorer) => explorer.set_status_message(&message),
            None => self.set_status_message(&message),
        }
    }
}
