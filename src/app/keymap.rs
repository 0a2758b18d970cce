use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{backend::Backend, Terminal};

use crate::app::types::{ActivePanel, App, InputMode};

impl App {
    /// Dispatch one key press according to the current mode.
    pub fn handle_key<B: Backend>(&mut self, key: KeyEvent, terminal: &mut Terminal<B>) -> Result<()> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return Ok(());
        }

        if self.show_help {
            self.handle_help_key(key);
            return Ok(());
        }

        match self.input_mode {
            InputMode::Explorer => self.handle_explorer_key(key),
            InputMode::Search => self.handle_search_key(key, terminal),
            InputMode::Normal => self.handle_normal_key(key, terminal),
        }
    }

    fn handle_normal_key<B: Backend>(&mut self, key: KeyEvent, terminal: &mut Terminal<B>) -> Result<()> {
        match key.code {
            KeyCode::Char('q') => self.handle_key_q()?,
            KeyCode::Char('?') => {
                self.show_help = true;
                self.help_scroll_position = 0;
            }
            KeyCode::Char('s') => self.enter_search_mode(),
            KeyCode::Tab | KeyCode::BackTab => self.switch_panel(),
            KeyCode::Down | KeyCode::Char('j') => self.select_next(),
            KeyCode::Up | KeyCode::Char('k') => self.select_previous(),
            KeyCode::Enter => match self.active_panel {
                ActivePanel::Folders => self.switch_panel(),
                ActivePanel::Hosts => self.handle_key_enter(terminal)?,
            },
            KeyCode::Char('f') => {
                if let Err(e) = self.handle_key_f() {
                    self.set_status_message(&format!("Error: {:#}", e));
                }
            }
            KeyCode::Char('e') => {
                if let Err(e) = self.handle_key_e() {
                    self.set_status_message(&format!("Error: {:#}", e));
                }
            }
            KeyCode::Char('r') => {
                if let Err(e) = self.reload() {
                    self.set_status_message(&format!("Reload failed: {:#}", e));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_search_key<B: Backend>(&mut self, key: KeyEvent, terminal: &mut Terminal<B>) -> Result<()> {
        match key.code {
            KeyCode::Esc => self.clear_search(),
            KeyCode::Enter => self.handle_key_enter(terminal)?,
            KeyCode::Down => self.search_select_next(),
            KeyCode::Up => self.search_select_previous(),
            KeyCode::Backspace => self.search_pop(),
            KeyCode::Char(c) => self.search_push(c),
            _ => {}
        }
        Ok(())
    }

    fn handle_help_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('?') | KeyCode::Esc | KeyCode::Char('q') => self.show_help = false,
            KeyCode::Down | KeyCode::Char('j') => {
                self.help_scroll_position = self.help_scroll_position.saturating_add(1);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.help_scroll_position = self.help_scroll_position.saturating_sub(1);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::tests::test_app;
    use crate::session::memory::MemoryFs;
    use ratatui::backend::TestBackend;
    use tempfile::TempDir;

    fn press(app: &mut App, terminal: &mut Terminal<TestBackend>, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE), terminal)
            .unwrap();
    }

    #[test]
    fn typing_in_search_does_not_trigger_shortcuts() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();

        press(&mut app, &mut terminal, KeyCode::Char('s'));
        for c in ['q', 'f', 'e'] {
            press(&mut app, &mut terminal, KeyCode::Char(c));
        }
        assert!(!app.should_quit);
        assert_eq!(app.search_query, "qfe");
        assert!(app.explorer.is_none());

        press(&mut app, &mut terminal, KeyCode::Backspace);
        assert_eq!(app.search_query, "qf");
        press(&mut app, &mut terminal, KeyCode::Esc);
        assert_eq!(app.input_mode, InputMode::Normal);

        press(&mut app, &mut terminal, KeyCode::Char('q'));
        assert!(app.should_quit);
    }

    #[test]
    fn help_popup_captures_keys() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();

        press(&mut app, &mut terminal, KeyCode::Char('?'));
        press(&mut app, &mut terminal, KeyCode::Char('j'));
        press(&mut app, &mut terminal, KeyCode::Char('j'));
        assert_eq!(app.help_scroll_position, 2);
        assert_eq!(app.selected_host, 0);

        press(&mut app, &mut terminal, KeyCode::Esc);
        assert!(!app.show_help);
    }

    #[test]
    fn enter_on_folders_panel_moves_to_hosts() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();

        press(&mut app, &mut terminal, KeyCode::Tab);
        assert_eq!(app.active_panel, ActivePanel::Folders);
        press(&mut app, &mut terminal, KeyCode::Char('k'));
        assert_eq!(app.hosts_in_current_folder, vec!["web-prod"]);
        press(&mut app, &mut terminal, KeyCode::Enter);
        assert_eq!(app.active_panel, ActivePanel::Hosts);
    }
}
