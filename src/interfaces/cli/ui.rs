use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use std::time::Instant;

use super::approval::{ApprovalInput, InputMode};
use super::progress::{Marker, ProgressAggregator};
use super::{MonitorApp, StatusMessage};
use crate::core::model::OutputStream;
use crate::core::params::UserRequest;

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const DEV_RUN_PANEL_LINES: u16 = 12;

impl MonitorApp {
    pub(super) fn draw(&self, f: &mut Frame, now: Instant, tick: usize) {
        if self.off_hours.blocked {
            f.render_widget(self.render_off_hours(), f.area());
            return;
        }

        let progress = &self.progress;
        let approval = progress.approval();
        let show_dev_run = progress.shows_dev_run();
        let inner_width = f.area().width.saturating_sub(2);
        let prompt = input_lines(approval, inner_width);

        let mut constraints = vec![Constraint::Min(3)];
        if show_dev_run {
            let height = if progress.dev_run().shows_output() {
                DEV_RUN_PANEL_LINES
            } else {
                4
            };
            constraints.push(Constraint::Length(height));
        }
        if !prompt.is_empty() {
            let height = u16::try_from(prompt.len()).unwrap_or(u16::MAX);
            constraints.push(Constraint::Length(height.saturating_add(2)));
        }
        constraints.push(Constraint::Length(1));

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(f.area());

        let mut idx = 0;
        f.render_widget(self.render_timeline(chunks[idx], tick), chunks[idx]);
        idx += 1;

        if show_dev_run {
            f.render_widget(render_dev_run(progress), chunks[idx]);
            idx += 1;
        }

        if !prompt.is_empty() {
            let area = chunks[idx];
            let focused = approval.is_focused() && !approval.is_submitting();
            let title = match approval.mode() {
                InputMode::RejectionFeedback => " Rejection feedback ",
                InputMode::FreeForm => " Reply ",
                _ => " Input required ",
            };
            let widget = Paragraph::new(prompt)
                .block(
                    Block::default()
                        .title(title)
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Yellow)),
                )
                .wrap(Wrap { trim: false });
            f.render_widget(widget, area);

            if focused {
                let (col, row) = cursor_cell(approval.buffer().cursor(), inner_width);
                // The prompt rows are always the last ones inside the box.
                let last_row = area.y + area.height.saturating_sub(2);
                let above = last_prompt_row(approval, inner_width).saturating_sub(row);
                f.set_cursor_position((area.x + 1 + col, last_row.saturating_sub(above)));
            }
            idx += 1;
        }

        f.render_widget(self.render_footer(now), chunks[idx]);
    }

    fn render_off_hours(&self) -> Paragraph<'_> {
        let mut lines = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("  {}", self.off_hours.message),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )),
        ];
        if let Some(at) = self.off_hours.unblock_at {
            lines.push(Line::from(Span::styled(
                format!("  Resumes at {}", at.format("%a %H:%M")),
                Style::default().fg(Color::DarkGray),
            )));
        }
        Paragraph::new(lines).block(
            Block::default()
                .title(" flowwatch (off hours) ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
    }

    fn render_timeline(&self, area: Rect, tick: usize) -> Paragraph<'_> {
        let (before, after) = self.message_groups();
        let mut lines: Vec<Line> = Vec::new();

        for message in before {
            lines.push(message_line(message, tick));
        }

        if self.progress_visible() {
            for entry in self.progress.timeline() {
                let style = match entry.marker {
                    Marker::Complete => Style::default().fg(Color::Green),
                    Marker::Failed => Style::default().fg(Color::Red),
                    Marker::Started => Style::default().fg(Color::Cyan),
                    Marker::Neutral => Style::default().fg(Color::DarkGray),
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("  {} ", entry.marker.glyph()), style),
                    Span::styled(entry.text, Style::default().fg(Color::White)),
                ]));
                if let Some(detail) = entry.detail {
                    lines.push(Line::from(Span::styled(
                        format!("      {}", detail),
                        Style::default().fg(Color::DarkGray),
                    )));
                }
            }
        }

        for message in after {
            lines.push(message_line(message, tick));
        }

        for error in self.errors() {
            lines.push(Line::from(Span::styled(
                format!("  ! {}", error),
                Style::default().fg(Color::Red),
            )));
        }

        // Keep the newest lines in view.
        let visible = area.height.saturating_sub(2);
        let scroll = u16::try_from(lines.len())
            .unwrap_or(u16::MAX)
            .saturating_sub(visible);

        let title = match &self.task {
            Some(task) if !task.title.is_empty() => {
                format!(" {} [{}] ", task.title, task.status.as_str())
            }
            Some(task) => format!(" {} [{}] ", task.id, task.status.as_str()),
            None => format!(" {} ", self.task_id),
        };

        Paragraph::new(lines)
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0))
    }

    fn render_footer(&self, now: Instant) -> Paragraph<'_> {
        if self.cancel_notice_visible(now) {
            return Paragraph::new(Span::styled(
                " Press Ctrl+C again to stop monitoring",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ));
        }
        let mut hint = String::from(" Ctrl+C quit");
        if self.progress.shows_dev_run() {
            hint.push_str("  Ctrl+O dev output");
        }
        Paragraph::new(Span::styled(hint, Style::default().fg(Color::DarkGray)))
    }
}

fn message_line(message: &StatusMessage, tick: usize) -> Line<'_> {
    let prefix = if message.spinner {
        SPINNER_FRAMES[tick % SPINNER_FRAMES.len()]
    } else {
        " "
    };
    Line::from(vec![
        Span::styled(format!("  {} ", prefix), Style::default().fg(Color::Yellow)),
        Span::styled(message.text.as_str(), Style::default().fg(Color::Gray)),
    ])
}

fn render_dev_run(progress: &ProgressAggregator) -> Paragraph<'_> {
    let session = progress.dev_run();
    let (state, state_style) = match (session.is_running(), session.last_error()) {
        (true, _) => ("running", Style::default().fg(Color::Green)),
        (false, Some(_)) => ("failed", Style::default().fg(Color::Red)),
        (false, None) => ("stopped", Style::default().fg(Color::DarkGray)),
    };

    let mut lines = vec![Line::from(vec![
        Span::styled("  Dev run: ", Style::default().fg(Color::White)),
        Span::styled(state, state_style),
        Span::styled(
            format!("  {}", session.command_summary().unwrap_or_default()),
            Style::default().fg(Color::DarkGray),
        ),
    ])];
    if let Some(dir) = session.working_dir() {
        lines.push(Line::from(Span::styled(
            format!("  in {}", dir),
            Style::default().fg(Color::DarkGray),
        )));
    }
    if let Some(error) = session.last_error() {
        lines.push(Line::from(Span::styled(
            format!("  {}", error),
            Style::default().fg(Color::Red),
        )));
    }

    if session.shows_output() {
        let capacity = DEV_RUN_PANEL_LINES.saturating_sub(3 + lines.len() as u16) as usize;
        let output: Vec<_> = session.output().collect();
        for line in output.iter().skip(output.len().saturating_sub(capacity)) {
            let style = match line.stream {
                OutputStream::Stdout => Style::default().fg(Color::Gray),
                OutputStream::Stderr => Style::default().fg(Color::LightRed),
            };
            lines.push(Line::from(Span::styled(format!("  {}", line.text), style)));
        }
    }

    let action = if session.shows_output() { "hide" } else { "show" };
    let title = match session.dev_run_id() {
        Some(id) => format!(" Dev run {} (Ctrl+O {} output) ", id, action),
        None => format!(" Dev run (Ctrl+O {} output) ", action),
    };
    Paragraph::new(lines).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    )
}

fn input_lines(approval: &ApprovalInput, inner_width: u16) -> Vec<Line<'static>> {
    let Some(pending) = approval.pending() else {
        return Vec::new();
    };
    let request = &pending.request;
    let dim = Style::default().fg(Color::DarkGray);
    let key_style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);

    let mut lines = Vec::new();
    if let Some(content) = request.content() {
        for text in content.lines() {
            lines.push(Line::from(format!(" {}", text)));
        }
    }
    if let UserRequest::Approval {
        command: Some(command),
        working_dir,
        ..
    } = request
    {
        lines.push(Line::from(Span::styled(
            format!(" $ {}", command),
            Style::default().fg(Color::White),
        )));
        if let Some(dir) = working_dir {
            lines.push(Line::from(Span::styled(format!("   in {}", dir), dim)));
        }
    }
    if let UserRequest::MergeApproval {
        target_branch: Some(branch),
        ..
    } = request
    {
        lines.push(Line::from(Span::styled(format!(" Target branch: {}", branch), dim)));
    }

    if approval.is_submitting() {
        lines.push(Line::from(Span::styled(" Submitting...", Style::default().fg(Color::Yellow))));
    } else {
        match approval.mode() {
            InputMode::Approval => {
                let mut spans = vec![
                    Span::styled(" [y]", key_style),
                    Span::raw(format!(" {}  ", request.approve_label())),
                    Span::styled("[n]", key_style),
                    Span::raw(format!(" {}", request.reject_label())),
                ];
                if request.is_merge_approval() {
                    spans.push(Span::styled("  [s]", key_style));
                    spans.push(Span::raw(format!(
                        " strategy: {}",
                        approval.merge_strategy().as_str()
                    )));
                }
                lines.push(Line::from(spans));
            }
            InputMode::Continue => {
                lines.push(Line::from(vec![
                    Span::styled(" [Enter]", key_style),
                    Span::raw(format!(" {}", request.continue_label())),
                ]));
            }
            InputMode::RejectionFeedback | InputMode::FreeForm => {
                let hint = if approval.mode() == InputMode::RejectionFeedback {
                    " Enter to reject, Esc to go back"
                } else {
                    " Enter to send, Esc to clear"
                };
                lines.push(Line::from(Span::styled(hint, dim)));
            }
            InputMode::None => {}
        }
    }

    if let Some(error) = approval.last_error() {
        lines.push(Line::from(Span::styled(
            format!(" {}", error),
            Style::default().fg(Color::Red),
        )));
    }

    if matches!(
        approval.mode(),
        InputMode::RejectionFeedback | InputMode::FreeForm
    ) {
        lines.extend(prompt_rows(approval.buffer().as_str(), inner_width, key_style));
    }
    lines
}

/// Prompt prefix width in cells: the leading space and `>`.
const PROMPT_PREFIX: usize = 2;

/// Column and row of the cursor inside the wrapped prompt line.
fn cursor_cell(cursor: usize, inner_width: u16) -> (u16, u16) {
    let width = usize::from(inner_width.max(1));
    let offset = PROMPT_PREFIX + cursor;
    let col = u16::try_from(offset % width).unwrap_or(0);
    let row = u16::try_from(offset / width).unwrap_or(u16::MAX);
    (col, row)
}

/// Index of the last row the prompt line occupies once wrapped.
fn last_prompt_row(approval: &ApprovalInput, inner_width: u16) -> u16 {
    let width = usize::from(inner_width.max(1));
    let len = PROMPT_PREFIX + approval.buffer().as_str().chars().count();
    u16::try_from(len / width).unwrap_or(u16::MAX)
}

/// Splits the prompt into rows of exactly the box width so the cursor cell
/// can be computed. There is always a row for the cell after the last char.
fn prompt_rows(text: &str, inner_width: u16, key_style: Style) -> Vec<Line<'static>> {
    let width = usize::from(inner_width.max(1));
    let cells: Vec<char> = " >".chars().chain(text.chars()).collect();
    (0..=cells.len() / width)
        .map(|row| {
            let start = row * width;
            let end = (start + width).min(cells.len());
            if row == 0 {
                let prefix_end = PROMPT_PREFIX.min(end);
                Line::from(vec![
                    Span::styled(cells[..prefix_end].iter().collect::<String>(), key_style),
                    Span::raw(cells[prefix_end..end].iter().collect::<String>()),
                ])
            } else {
                Line::from(cells[start..end].iter().collect::<String>())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_onto_following_rows() {
        assert_eq!(cursor_cell(0, 20), (2, 0));
        assert_eq!(cursor_cell(17, 20), (19, 0));
        assert_eq!(cursor_cell(18, 20), (0, 1));
        assert_eq!(cursor_cell(45, 20), (7, 2));
    }

    #[test]
    fn prompt_rows_match_cursor_rows() {
        let text = "x".repeat(38);
        let rows = prompt_rows(&text, 20, Style::default());
        // 40 cells on a 20-wide box: two full rows plus the cursor row.
        assert_eq!(rows.len(), 3);
        assert_eq!(cursor_cell(38, 20), (0, 2));
        assert_eq!(rows[1].width(), 20);
        assert_eq!(rows[2].width(), 0);

        let short = prompt_rows("hi", 20, Style::default());
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].width(), 4);
    }

    #[test]
    fn zero_width_box_does_not_divide_by_zero() {
        assert_eq!(cursor_cell(3, 0), (0, 5));
    }
}
