use std::time::Instant;

use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Style},
    widgets::Paragraph,
    Frame,
};

use crate::config::Theme;
use super::theme_color;

/// Messages disappear after this many seconds
const STATUS_TTL_SECS: u64 = 5;

/// Render a status line. Returns `false` once the message has expired so the
/// caller can drop it.
pub fn draw_status_line(
    f: &mut Frame,
    status: Option<&(String, Instant)>,
    sticky: bool,
    theme: &Theme,
    area: Rect,
) -> bool {
    let Some((message, timestamp)) = status else {
        return true;
    };
    if !sticky && timestamp.elapsed().as_secs() >= STATUS_TTL_SECS {
        return false;
    }

    let lower = message.to_lowercase();
    let style = if lower.contains("error") || lower.contains("failed") || lower.contains("lost") {
        Style::default().fg(theme_color(&theme.colors.error, Color::Red))
    } else if lower.contains("completed") || lower.contains("ended") || lower.contains("connected to") {
        Style::default().fg(theme_color(&theme.colors.success, Color::Green))
    } else if lower.contains("connecting") || lower.contains("cancelling") {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(theme_color(&theme.colors.warning, Color::Yellow))
    };

    let paragraph = Paragraph::new(message.as_str())
        .style(style)
        .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
    true
}
