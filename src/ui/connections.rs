use chrono::Utc;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

use super::{focus_border, highlight, HIGHLIGHT_SYMBOL};
use crate::{
    app::{App, Input},
    conns::{self, ConnFilter},
    format::{format_bytes, format_speed, truncate_str},
};

pub fn render(f: &mut Frame, app: &mut App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(area);

    let editing = app.input == Some(Input::ConnFilter);
    let view = &mut app.conns;
    let totals = view.rates.totals();
    let dim = Style::default().fg(Color::DarkGray);

    let (active_style, closed_style) = match view.view.filter {
        ConnFilter::Active => (Style::default().fg(Color::Cyan), dim),
        ConnFilter::Closed => (dim, Style::default().fg(Color::Cyan)),
    };
    let filter_text = if editing {
        format!("{}▏", view.view.text)
    } else if view.view.text.is_empty() {
        "-".to_string()
    } else {
        view.view.text.clone()
    };

    let header = Paragraph::new(vec![
        Line::from(vec![
            Span::styled(format!(" Active {} ", view.active.len()), active_style),
            Span::styled(format!(" Closed {} ", view.closed.label()), closed_style),
            Span::raw(" │ "),
            Span::styled(format!("↑ {} ", format_speed(totals.up)), Style::default().fg(Color::Magenta)),
            Span::styled(format!("({}) ", format_bytes(view.upload_total)), dim),
            Span::styled(format!("↓ {} ", format_speed(totals.down)), Style::default().fg(Color::Green)),
            Span::styled(format!("({})", format_bytes(view.download_total)), dim),
        ]),
        Line::from(vec![
            Span::styled(" Sort: ", dim),
            Span::raw(format!("{} {}", view.view.key.label(), view.view.dir.arrow())),
            Span::styled("   Filter: ", dim),
            Span::styled(filter_text, Style::default().fg(Color::Yellow)),
        ]),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(focus_border(editing)),
    );
    f.render_widget(header, chunks[0]);

    let now = Utc::now();
    let rates = &view.rates;
    let visible = view.view.apply(&view.active, view.closed.closed(), rates);
    let count = visible.len();
    let items: Vec<ListItem> = visible
        .into_iter()
        .map(|c| {
            let rate = rates.rate(&c.id);
            let first = Line::from(vec![
                Span::styled(
                    format!("{:<40} ", truncate_str(&conns::destination(c), 39)),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    format!("{:<32} ", truncate_str(&conns::proxy_chain(c), 31)),
                    Style::default().fg(Color::Cyan),
                ),
                Span::styled(
                    format!("↑{:<11} ↓{:<11}", format_speed(rate.up), format_speed(rate.down)),
                    Style::default().fg(Color::Yellow),
                ),
            ]);
            let second = Line::from(vec![
                Span::styled(
                    format!(
                        "   {:<22} {:<5} {:<8} ",
                        conns::source(c),
                        conns::network(c),
                        c.metadata.conn_type
                    ),
                    dim,
                ),
                Span::styled(
                    format!("{:<30} ", truncate_str(&conns::rule_set(c), 29)),
                    Style::default().fg(Color::Blue),
                ),
                Span::styled(
                    format!(
                        "↑{:<10} ↓{:<10} {} ({})",
                        format_bytes(c.upload),
                        format_bytes(c.download),
                        conns::age(c, now),
                        conns::start_clock(c)
                    ),
                    dim,
                ),
            ]);
            ListItem::new(vec![first, second])
        })
        .collect();

    let title = match view.view.filter {
        ConnFilter::Active => format!(" Connections ({}) ", count),
        ConnFilter::Closed => format!(" Closed connections ({}) ", count),
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(highlight())
        .highlight_symbol(HIGHLIGHT_SYMBOL);
    f.render_stateful_widget(list, chunks[1], &mut view.state);
}
