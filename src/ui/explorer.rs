use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};

use super::footer::draw_footer;
use super::format_file_size;
use super::jobs::draw_jobs;
use super::status_bar::draw_status_line;
use crate::app::App;
use crate::explorer::types::filter_items;
use crate::explorer::{FileItem, PanelSide};

pub fn draw(f: &mut Frame, app: &mut App) {
    let jobs = app.engine.jobs();
    let theme = app.app_config.theme();
    let is_connecting = app.is_connecting;
    let Some(state) = app.explorer.as_mut() else {
        return;
    };

    let jobs_height = if jobs.is_empty() { 3 } else { (jobs.len() as u16 + 4).min(10) };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),           // Connection header
            Constraint::Min(5),              // File panes
            Constraint::Length(jobs_height), // Jobs
            Constraint::Length(1),           // Status
            Constraint::Length(1),           // Footer
        ])
        .split(f.size());

    let header = if is_connecting {
        Span::styled(
            format!("Connecting to {} ({})...", state.host_name, state.spec),
            Style::default().fg(Color::Yellow),
        )
    } else if state.is_connected() {
        Span::styled(
            format!("{} ({})", state.host_name, state.spec),
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(
            format!("{} ({}) disconnected", state.host_name, state.spec),
            Style::default().fg(Color::Red),
        )
    };
    f.render_widget(Paragraph::new(Line::from(header)), chunks[0]);

    let panels = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);

    let local_title = with_filter(
        format!("Local: {}", state.local_current_path.display()),
        &state.local_filter,
    );
    draw_file_panel(
        f,
        panels[0],
        &filter_items(&state.local_files, &state.local_filter),
        &mut state.local_list_state,
        &local_title,
        state.active_panel == PanelSide::Local,
    );

    let remote_title = if state.is_remote_loading() {
        format!("Remote: {} (loading)", state.remote_current_path)
    } else {
        format!("Remote: {}", state.remote_current_path)
    };
    let remote_title = with_filter(remote_title, &state.remote_filter);
    draw_file_panel(
        f,
        panels[1],
        &filter_items(&state.remote_files, &state.remote_filter),
        &mut state.remote_list_state,
        &remote_title,
        state.active_panel == PanelSide::Remote,
    );

    draw_jobs(f, &jobs, chunks[2]);

    if !draw_status_line(f, state.status_message.as_ref(), false, &theme, chunks[3]) {
        state.clear_status_message();
    }
    draw_footer(f, app, chunks[4]);
}

fn with_filter(title: String, filter: &str) -> String {
    if filter.is_empty() {
        title
    } else {
        format!("{} [/{}]", title, filter)
    }
}

fn draw_file_panel(
    f: &mut Frame,
    area: Rect,
    files: &[&FileItem],
    list_state: &mut ListState,
    title: &str,
    is_active: bool,
) {
    let border_style = if is_active {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::Gray)
    };

    let title_style = if is_active {
        Style::default()
            .fg(Color::Green)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
            .fg(Color::Gray)
            .add_modifier(Modifier::BOLD)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(title.to_string())
        .title_style(title_style);

    let selected = list_state.selected();
    let list_items: Vec<ListItem> = files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let is_selected = Some(i) == selected && is_active;
            let mut spans = vec![Span::styled(
                if is_selected { "> " } else { "  " },
                Style::default().fg(Color::Yellow),
            )];

            let (icon, name_color) = match *file {
                FileItem::Directory { name } if name == ".." => ("↰ ", Color::Cyan),
                FileItem::Directory { .. } => ("📁 ", Color::Blue),
                FileItem::File { .. } => ("📄 ", Color::White),
            };
            spans.push(Span::styled(icon, Style::default().fg(Color::Yellow)));
            spans.push(Span::styled(
                file.name().to_string(),
                Style::default().fg(if is_selected { Color::Black } else { name_color }),
            ));

            if let FileItem::File { size, .. } = *file {
                spans.push(Span::styled(
                    format!(" ({})", format_file_size(*size)),
                    Style::default().fg(if is_selected { Color::Black } else { Color::Gray }),
                ));
            }

            let style = if is_selected {
                Style::default()
                    .bg(Color::Green)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };

            ListItem::new(Line::from(spans)).style(style)
        })
        .collect();

    let list = if list_items.is_empty() {
        List::new(vec![ListItem::new(Span::styled(
            "(empty)",
            Style::default().fg(Color::DarkGray),
        ))])
    } else {
        List::new(list_items)
    };

    f.render_stateful_widget(list.block(block), area, list_state);
}

#[cfg(test)]
mod tests {
    use crate::app::state::tests::test_app;
    use crate::app::InputMode;
    use crate::explorer::{ExplorerState, FileItem};
    use crate::resolver::{resolve_in, OverrideSet};
    use crate::session::memory::MemoryFs;
    use crate::ui::tests::render;
    use tempfile::TempDir;

    #[test]
    fn renders_both_panes_and_empty_jobs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), vec![0u8; 2048]).unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        let spec = resolve_in(&app.registry, "dev-server", &OverrideSet::default()).unwrap();
        let mut explorer = ExplorerState::new("dev-server", spec, dir.path().to_path_buf()).unwrap();
        explorer.remote_files = vec![FileItem::Directory { name: "srv".into() }];
        app.explorer = Some(explorer);
        app.input_mode = InputMode::Explorer;

        let screen = render(&mut app);
        assert!(screen.contains("notes.txt (2.0 KB)"));
        assert!(screen.contains("srv"));
        assert!(screen.contains("Remote: /"));
        assert!(screen.contains("disconnected"));
        assert!(screen.contains("No transfers yet"));
    }

    #[test]
    fn filtered_pane_shows_query_in_title() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        std::fs::write(dir.path().join("todo.md"), b"t").unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        let spec = resolve_in(&app.registry, "dev-server", &OverrideSet::default()).unwrap();
        let mut explorer = ExplorerState::new("dev-server", spec, dir.path().to_path_buf()).unwrap();
        explorer.start_filter();
        explorer.push_filter_char('t');
        explorer.push_filter_char('o');
        app.explorer = Some(explorer);
        app.input_mode = InputMode::Explorer;

        let screen = render(&mut app);
        assert!(screen.contains("[/to]"));
        assert!(screen.contains("todo.md"));
        assert!(!screen.contains("notes.txt"));
        assert!(screen.contains("Filter: to"));
    }
}
