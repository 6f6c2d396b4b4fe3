use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

use super::{focus_border, highlight, HIGHLIGHT_SYMBOL};
use crate::app::{App, Input};

fn level_color(level: &str) -> Color {
    match level {
        "error" => Color::Red,
        "warning" | "warn" => Color::Yellow,
        "info" => Color::Green,
        _ => Color::Cyan,
    }
}

pub fn render(f: &mut Frame, app: &mut App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let editing = app.input == Some(Input::LogFilter);
    let view = &mut app.logs;
    let dim = Style::default().fg(Color::DarkGray);

    let (state, state_color) = if view.tail.is_paused() {
        ("PAUSED", Color::Yellow)
    } else {
        ("LIVE", Color::Green)
    };
    let filter = if editing {
        format!("{}▏", view.tail.filter)
    } else if view.tail.filter.is_empty() {
        "-".to_string()
    } else {
        view.tail.filter.clone()
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(format!(" {} ", state), Style::default().fg(state_color)),
        Span::styled("  Filter: ", dim),
        Span::styled(filter, Style::default().fg(Color::Yellow)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(focus_border(editing)),
    );
    f.render_widget(header, chunks[0]);

    let visible = view.tail.visible();
    let count = visible.len();
    let items: Vec<ListItem> = visible
        .into_iter()
        .map(|entry| {
            ListItem::new(Line::from(vec![
                Span::styled(format!(" {} ", entry.time), dim),
                Span::styled(
                    format!("{:<8}", entry.level.to_uppercase()),
                    Style::default().fg(level_color(&entry.level)),
                ),
                Span::raw(entry.payload.clone()),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Logs ({}/{}) ", count, view.tail.len())),
        )
        .highlight_style(highlight())
        .highlight_symbol(HIGHLIGHT_SYMBOL);
    f.render_stateful_widget(list, chunks[1], &mut view.state);
}
