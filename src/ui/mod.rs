pub mod explorer;
pub mod footer;
pub mod help_popup;
pub mod hosts_list;
pub mod jobs;
pub mod status_bar;

use std::str::FromStr;

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
    Frame,
};

use crate::app::{App, InputMode};

/// Draw whichever screen is active, plus the help popup on top.
pub fn draw(f: &mut Frame, app: &mut App) {
    if app.input_mode == InputMode::Explorer && app.explorer.is_some() {
        explorer::draw(f, app);
    } else {
        hosts_list::draw(f, app);
    }

    if app.show_help {
        help_popup::render_help_popup(f, app);
    }
}

/// Parse a theme color, falling back when the config holds something ratatui
/// does not understand.
pub fn theme_color(value: &str, fallback: Color) -> Color {
    Color::from_str(value).unwrap_or(fallback)
}

/// Center a box of `percent_x` width and `height` rows inside `r`
pub fn centered_rect(percent_x: u16, height: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length((r.height.saturating_sub(height)) / 2),
            Constraint::Length(height),
            Constraint::Length((r.height.saturating_sub(height)) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

pub fn format_file_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    pub(crate) fn render(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| draw(f, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn file_sizes_use_binary_units() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn theme_colors_parse_hex_and_fall_back() {
        assert_eq!(theme_color("#ff005f", Color::Red), Color::Rgb(0xff, 0x00, 0x5f));
        assert_eq!(theme_color("not a color", Color::Red), Color::Red);
    }
}
