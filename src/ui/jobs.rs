use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem},
    Frame,
};

use super::format_file_size;
use crate::transfer::tree::file_name;
use crate::transfer::{JobStatus, ProgressSnapshot};

fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Discovering | JobStatus::Running => Color::Cyan,
        JobStatus::Completed => Color::Green,
        JobStatus::PartiallyFailed => Color::Yellow,
        JobStatus::Failed => Color::Red,
        JobStatus::Cancelled => Color::Gray,
    }
}

/// One summary line per job, e.g. `#3 upload site 12/40 files 1.2 MB/8.0 MB running`
pub fn job_line(snap: &ProgressSnapshot) -> Line<'static> {
    let total = if snap.provisional {
        format!("{}+", snap.files_total)
    } else {
        snap.files_total.to_string()
    };
    let mut spans = vec![
        Span::styled(format!("#{} ", snap.job), Style::default().fg(Color::LightYellow)),
        Span::styled(
            format!("{} {} ", snap.direction.label(), file_name(&snap.source)),
            Style::default().fg(Color::White),
        ),
        Span::styled(
            format!(
                "{}/{} files  {}/{} ",
                snap.files_done,
                total,
                format_file_size(snap.bytes_done),
                format_file_size(snap.bytes_total)
            ),
            Style::default().fg(Color::Gray),
        ),
        Span::styled(
            snap.status.label().to_string(),
            Style::default()
                .fg(status_color(snap.status))
                .add_modifier(Modifier::BOLD),
        ),
    ];
    if snap.files_failed > 0 {
        spans.push(Span::styled(
            format!(" ({} failed)", snap.files_failed),
            Style::default().fg(Color::Red),
        ));
    }
    Line::from(spans)
}

/// Jobs pane: a gauge for the newest job, its recent activity, then every
/// job newest first.
pub fn draw_jobs(f: &mut Frame, jobs: &[ProgressSnapshot], area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Transfers ")
        .title_style(Style::default().add_modifier(Modifier::BOLD));

    let Some(latest) = jobs.last() else {
        let empty = List::new(vec![ListItem::new(Span::styled(
            "No transfers yet. Select a file and press u or d.",
            Style::default().fg(Color::Gray),
        ))])
        .block(block);
        f.render_widget(empty, area);
        return;
    };

    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(inner);

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(status_color(latest.status)).bg(Color::Black))
        .percent(latest.percent().min(100))
        .label(format!(
            "#{} {}% ({}s)",
            latest.job,
            latest.percent(),
            latest.elapsed.as_secs()
        ));
    f.render_widget(gauge, chunks[0]);

    let mut items: Vec<ListItem> = latest
        .recent
        .iter()
        .rev()
        .map(|activity| {
            ListItem::new(Span::styled(
                format!("  {}", activity),
                Style::default().fg(Color::DarkGray),
            ))
        })
        .collect();
    items.extend(jobs.iter().rev().map(|snap| ListItem::new(job_line(snap))));

    f.render_widget(List::new(items), chunks[1]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{Direction as TransferDirection, ProgressTracker, TaskEvent};

    #[test]
    fn job_line_marks_provisional_totals_and_failures() {
        let tracker = ProgressTracker::new(7, TransferDirection::Upload, "/home/me/site", "/srv/site", 4);
        tracker.apply(TaskEvent::Discovered {
            task: 0,
            source: "/home/me/site/a".into(),
            dest: "/srv/site/a".into(),
            size: Some(10),
        });
        tracker.apply(TaskEvent::Started { task: 0 });
        tracker.apply(TaskEvent::Failed {
            task: 0,
            error: crate::error::TransferTaskError::PermissionDenied("/srv/site/a".into()),
        });

        let text: String = job_line(&tracker.snapshot())
            .spans
            .iter()
            .map(|s| s.content.as_ref())
            .collect();
        assert!(text.starts_with("#7 upload site "));
        assert!(text.contains("0/1+ files"));
        assert!(text.contains("(1 failed)"));
    }
}
