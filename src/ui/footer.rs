use crate::app::{App, InputMode};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::Paragraph,
    Frame,
};

pub fn draw_footer(f: &mut Frame, app: &App, area: Rect) {
    let footer = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let (nav_text, action_text) = match app.input_mode {
        InputMode::Normal => (
            "↑/k: Up  ↓/j: Down  [Tab] Panel  [Enter] Connect  [s] Search  [f] Files",
            "[e] Edit  [r] Reload  [?] Help  [q] Quit",
        ),
        InputMode::Search => (
            "↑: Up  ↓: Down  [Enter] Connect",
            "[Esc] Exit Search  Type to filter",
        ),
        InputMode::Explorer if app.is_connecting => ("Connecting to host...", "[q] Back"),
        InputMode::Explorer => (
            "↑/↓: Navigate  [Enter] Open  [Backspace] Back  [Tab] Switch Panel",
            "[/] Filter  [u] Upload  [d] Download  [c] Cancel  [r] Refresh  [q] Back",
        ),
    };

    let filter_text = app
        .explorer
        .as_ref()
        .filter(|e| e.filter_editing && app.input_mode == InputMode::Explorer)
        .map(|e| format!("Filter: {}", e.filter(e.active_panel)));
    let (nav_text, action_text) = match filter_text.as_deref() {
        Some(text) => (text, "[Enter] Keep  [Esc] Clear"),
        None => (nav_text, action_text),
    };

    let nav_help = Paragraph::new(nav_text).style(Style::default().fg(if app.is_connecting {
        Color::Yellow
    } else {
        Color::Gray
    }));

    let action_help = Paragraph::new(action_text)
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Right);

    f.render_widget(nav_help, footer[0]);
    f.render_widget(action_help, footer[1]);
}
