use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
    Frame,
};
use std::time::SystemTime;

use super::footer::draw_footer;
use super::status_bar::draw_status_line;
use super::{centered_rect, theme_color};
use crate::app::{ActivePanel, App, FilteredHost, InputMode};
use crate::models::HostEntry;

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Main content
            Constraint::Length(1), // Status bar
            Constraint::Length(1), // Footer
        ])
        .split(f.size());

    let panels = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(chunks[0]);

    draw_folders_panel(f, app, panels[0]);
    draw_hosts_panel(f, app, panels[1]);

    let theme = app.app_config.theme();
    if !draw_status_line(f, app.status_message.as_ref(), false, &theme, chunks[1]) {
        app.clear_status_message();
    }
    draw_footer(f, app, chunks[2]);

    if app.is_connecting {
        draw_loading_overlay(f, app);
    }
}

fn draw_folders_panel(f: &mut Frame, app: &mut App, area: Rect) {
    let is_active = app.active_panel == ActivePanel::Folders && app.input_mode == InputMode::Normal;
    let title = format!(" {} 📂 Folders ", if is_active { ">" } else { " " });

    let items: Vec<ListItem> = app
        .folders
        .iter()
        .enumerate()
        .map(|(i, folder)| {
            let is_selected = i == app.selected_folder;
            let prefix = if is_selected { "> " } else { "  " };

            let text_style = if is_selected && is_active {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Green)
                    .add_modifier(Modifier::BOLD)
            } else if is_selected {
                Style::default().fg(Color::LightYellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };

            ListItem::new(Line::from(vec![
                Span::styled(prefix, text_style),
                Span::styled(folder.label().to_string(), text_style),
            ]))
        })
        .collect();

    let border_style = if is_active {
        Style::default().fg(Color::Green)
    } else {
        Style::default()
    };

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title(title),
    );

    f.render_stateful_widget(list, area, &mut app.folder_list_state);
}

fn draw_hosts_panel(f: &mut Frame, app: &mut App, area: Rect) {
    let is_search_mode = app.input_mode == InputMode::Search;
    let is_active = app.active_panel == ActivePanel::Hosts || is_search_mode;
    let highlight = theme_color(&app.app_config.theme().colors.success, Color::Green);

    let (list_area, list_border_style, list_title) = if is_search_mode {
        let search_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Search input area
                Constraint::Min(0),    // Search results area
            ])
            .split(area);

        let search_block = Block::default()
            .borders(Borders::ALL)
            .title(" 🔍 Search (Press 'Esc' to exit) ")
            .border_style(Style::default().fg(Color::Yellow));

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let cursor = if now % 1000 < 500 { "█" } else { " " };

        let search_paragraph = Paragraph::new(format!("{} {}", app.search_query, cursor))
            .style(Style::default().fg(Color::White))
            .block(search_block);
        f.render_widget(search_paragraph, search_chunks[0]);

        (
            search_chunks[1],
            Style::default().fg(Color::Yellow),
            format!(" > Results ({} matches) ", app.filtered_hosts.len()),
        )
    } else {
        let folder = app
            .folders
            .get(app.selected_folder)
            .map(|f| f.label().to_string())
            .unwrap_or_default();
        (
            area,
            if is_active {
                Style::default().fg(Color::Green)
            } else {
                Style::default()
            },
            format!(" {} 👤 Hosts: {} ", if is_active { ">" } else { " " }, folder),
        )
    };

    let rows: Vec<(FilteredHost, &HostEntry)> = if is_search_mode {
        app.filtered_hosts
            .iter()
            .filter_map(|fh| app.registry.get(&fh.name).map(|h| (fh.clone(), h)))
            .collect()
    } else {
        app.hosts_in_current_folder
            .iter()
            .filter_map(|name| {
                app.registry.get(name).map(|h| {
                    (
                        FilteredHost {
                            name: name.clone(),
                            score: 0,
                            matched_indices: Vec::new(),
                        },
                        h,
                    )
                })
            })
            .collect()
    };

    let selected = if is_search_mode {
        app.search_selected
    } else {
        app.selected_host
    };

    let items: Vec<ListItem> = rows
        .iter()
        .enumerate()
        .map(|(i, (filtered_host, host))| {
            let is_selected = i == selected && is_active;
            let prefix = if is_selected { "> " } else { "  " };
            let row_bg = if is_search_mode { Color::Yellow } else { highlight };

            let text_style = if is_selected {
                Style::default()
                    .fg(Color::Black)
                    .bg(row_bg)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };

            let mut spans = vec![Span::styled(prefix, text_style)];
            spans.push(Span::styled(
                format!("[{}] ", i + 1),
                text_style.add_modifier(Modifier::BOLD).fg(if is_selected {
                    Color::Black
                } else {
                    Color::LightYellow
                }),
            ));
            spans.extend(highlighted_name(&host.name, &filtered_host.matched_indices, text_style));

            spans.push(Span::styled(
                format!(" ({}@{}:{})", host.username, host.host, host.port),
                text_style.fg(if is_selected { Color::Black } else { Color::Gray }),
            ));
            if !host.proxy_jump.is_empty() {
                spans.push(Span::styled(
                    format!(" via {}", host.proxy_jump.join(",")),
                    text_style.fg(if is_selected { Color::Black } else { Color::Cyan }),
                ));
            }
            if !host.tags.is_empty() {
                spans.push(Span::styled(
                    format!(" [{}]", host.tags_to_string()),
                    text_style
                        .fg(if is_selected { Color::Black } else { Color::Gray })
                        .add_modifier(Modifier::DIM),
                ));
            }

            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = if items.is_empty() {
        let message = if is_search_mode {
            format!("No results for '{}'", app.search_query)
        } else {
            "No hosts in this folder".to_string()
        };
        List::new(vec![ListItem::new(Span::styled(
            message,
            Style::default().fg(Color::Gray).not_italic(),
        ))])
    } else {
        List::new(items)
    };

    let list_widget = list.block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(list_border_style)
            .title(list_title),
    );

    f.render_stateful_widget(list_widget, list_area, &mut app.host_list_state);
}

/// Split `name` into spans, painting the matched characters red.
fn highlighted_name<'a>(name: &'a str, matched: &[usize], base: Style) -> Vec<Span<'a>> {
    if matched.is_empty() {
        return vec![Span::styled(name, base)];
    }
    let match_style = base.fg(Color::Red).add_modifier(Modifier::BOLD);
    name.chars()
        .enumerate()
        .map(|(idx, c)| {
            let style = if matched.contains(&idx) { match_style } else { base };
            Span::styled(c.to_string(), style)
        })
        .collect()
}

fn draw_loading_overlay(f: &mut Frame, app: &App) {
    let area = centered_rect(60, 7, f.size());

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let dots_count = ((now / 500) % 4) as usize;
    let dots = ".".repeat(dots_count);
    let padding = " ".repeat(3 - dots_count);

    let target = app
        .explorer
        .as_ref()
        .map(|e| e.spec.to_string())
        .unwrap_or_default();

    let content = vec![
        Line::from(vec![
            Span::styled("🔗 ", Style::default().fg(Color::Yellow)),
            Span::styled(
                "Opening session",
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::styled(format!("{}{}", target, dots), Style::default().fg(Color::Cyan)),
            Span::raw(padding),
        ]),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" SSH Manager ")
        .title_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        .border_style(Style::default().fg(Color::Yellow));

    let paragraph = Paragraph::new(content)
        .block(block)
        .alignment(Alignment::Center);

    f.render_widget(Clear, area);
    f.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::tests::test_app;
    use crate::session::memory::MemoryFs;
    use crate::ui::tests::render;
    use tempfile::TempDir;

    #[test]
    fn renders_folders_and_hosts() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        let screen = render(&mut app);
        assert!(screen.contains("All hosts"));
        assert!(screen.contains("No folder"));
        assert!(screen.contains("ubuntu@10.0.0.5:22"));
        assert!(screen.contains("web-prod"));
    }

    #[test]
    fn empty_search_shows_no_results_message() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir, MemoryFs::new());
        app.enter_search_mode();
        for c in "zzz".chars() {
            app.search_push(c);
        }
        let screen = render(&mut app);
        assert!(screen.contains("No results for 'zzz'"));
        assert!(screen.contains("0 matches"));
    }

    #[test]
    fn matched_characters_become_separate_spans() {
        let spans = highlighted_name("web", &[0, 2], Style::default());
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].style.fg, Some(Color::Red));
        assert_eq!(spans[1].style.fg, None);
    }
}
