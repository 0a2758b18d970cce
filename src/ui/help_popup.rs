use ratatui::{
    layout::{Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Scrollbar, ScrollbarOrientation},
    Frame,
};

use crate::app::App;

pub fn render_help_popup(f: &mut Frame, app: &mut App) {
    let block = Block::default()
        .title("Keyboard Shortcuts")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::White));

    let area = centered_rect(80, 80, f.size());
    f.render_widget(Clear, area); // this clears the background
    f.render_widget(block, area);

    let text = get_help_text();
    let line_count = text.lines.len();

    let paragraph = Paragraph::new(text)
        .style(Style::default().fg(Color::White))
        .scroll((app.help_scroll_position, 0));

    let inner_area = area.inner(&Margin {
        vertical: 1,
        horizontal: 1,
    }); // Get area inside the block borders

    f.render_widget(paragraph, inner_area);

    // Make scrollbar only appear if there is overflow
    if line_count > inner_area.height as usize {
        let mut scrollbar_state =
            ratatui::widgets::ScrollbarState::new(line_count).position(app.help_scroll_position as usize);

        f.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight)
                .begin_symbol(Some("↑"))
                .end_symbol(Some("↓")),
            inner_area,
            &mut scrollbar_state,
        );
    }
}

fn key_line<'a>(key: &'a str, description: &'a str) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!("  {:<10}", key), Style::default().fg(Color::Green)),
        Span::raw(format!("- {}", description)),
    ])
}

fn section(title: &str) -> Line<'_> {
    Line::from(Span::styled(
        title,
        Style::default().add_modifier(Modifier::BOLD).fg(Color::Cyan),
    ))
}

fn get_help_text<'a>() -> Text<'a> {
    Text::from(vec![
        section("Hosts"),
        key_line("q", "Quit"),
        key_line("Enter", "Connect to selected host"),
        key_line("Tab", "Switch between folders and hosts"),
        key_line("s", "Switch to SEARCH mode"),
        key_line("f", "Browse files on the selected host"),
        key_line("e", "Edit the hosts file"),
        key_line("r", "Reload"),
        key_line("j, ↓", "Move down"),
        key_line("k, ↑", "Move up"),
        Line::from(""),
        section("Search Mode"),
        key_line("Esc", "Switch to Normal mode"),
        key_line("Enter", "Connect to selected host"),
        key_line("↓", "Move down"),
        key_line("↑", "Move up"),
        key_line("Backspace", "Delete last character"),
        Line::from(""),
        section("File Explorer"),
        key_line("q, Esc", "Back to hosts"),
        key_line("Enter", "Open directory"),
        key_line("Backspace", "Go back to parent directory"),
        key_line("Tab", "Switch between local and remote panes"),
        key_line("/", "Filter the active pane by name (Enter keeps, Esc clears)"),
        key_line("u", "Upload selection (directories recursively)"),
        key_line("d", "Download selection (directories recursively)"),
        key_line("c", "Cancel the newest running job"),
        key_line("r", "Refresh both panes, reconnect if the session was lost"),
        Line::from(""),
        section("Help Popup"),
        key_line("?, Esc", "Toggle/Close help"),
        key_line("↑, k", "Scroll up"),
        key_line("↓, j", "Scroll down"),
    ])
}

/// helper function to create a centered rect using up certain percentage of the available rect `r`
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(r);

    Layout::default()
        .direction(ratatui::layout::Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(popup_layout[1])[1]
}