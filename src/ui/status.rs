use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Bar, BarChart, BarGroup, Block, Borders, Chart, Dataset, GraphType, List, ListItem,
        Paragraph,
    },
    Frame,
};

use crate::{
    app::App,
    format::{format_bytes, format_memory, format_speed, truncate_str},
    telemetry::History,
};

const TOP_N: usize = 10;

pub fn render(f: &mut Frame, app: &mut App, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Percentage(45),
            Constraint::Min(6),
        ])
        .split(area);

    render_cards(f, app, rows[0]);

    let charts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[1]);
    render_traffic_chart(f, app, charts[0]);
    render_memory_chart(f, app, charts[1]);

    let usage = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[2]);
    render_top_hosts(f, app, usage[0]);
    render_top_nodes(f, app, usage[1]);
}

fn render_cards(f: &mut Frame, app: &App, area: Rect) {
    let s = &app.overview.summary;
    let cards = [
        ("Connections", s.connections.to_string(), Color::Cyan),
        ("Upload", format_speed(s.speed.up as f64), Color::Magenta),
        ("Download", format_speed(s.speed.down as f64), Color::Green),
        ("Upload Total", format_bytes(s.upload_total), Color::Magenta),
        ("Download Total", format_bytes(s.download_total), Color::Green),
        ("Memory", format_memory(s.memory as f64), Color::Yellow),
    ];

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, cards.len() as u32); 6])
        .split(area);

    for ((label, value, color), col) in cards.into_iter().zip(cols.iter()) {
        let card = Paragraph::new(vec![
            Line::from(Span::styled(label, Style::default().fg(Color::DarkGray))),
            Line::from(Span::styled(
                value,
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )),
        ])
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
        f.render_widget(card, *col);
    }
}

fn x_bounds<T: Copy>(history: &History<T>) -> [f64; 2] {
    [0.0, history.capacity().saturating_sub(1).max(1) as f64]
}

fn y_labels(max: f64, fmt: fn(f64) -> String) -> Vec<Span<'static>> {
    vec![
        Span::raw(fmt(0.0)),
        Span::raw(fmt(max / 2.0)),
        Span::raw(fmt(max)),
    ]
}

fn render_traffic_chart(f: &mut Frame, app: &App, area: Rect) {
    let history = &app.traffic.history;
    let up = history.points(|t| t.up as f64);
    let down = history.points(|t| t.down as f64);
    let max = history.max_by(|t| t.up.max(t.down) as f64);

    let datasets = vec![
        Dataset::default()
            .name("↑ up")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Magenta))
            .data(&up),
        Dataset::default()
            .name("↓ down")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Green))
            .data(&down),
    ];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(" Traffic "))
        .x_axis(Axis::default().bounds(x_bounds(history)))
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([0.0, max])
                .labels(y_labels(max, format_speed)),
        );
    f.render_widget(chart, area);
}

fn render_memory_chart(f: &mut Frame, app: &App, area: Rect) {
    let history = &app.memory.history;
    let points = history.points(|m| m as f64);
    let max = history.max_by(|m| m as f64);

    let datasets = vec![Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Yellow))
        .data(&points)];

    let mut title = format!(" Memory {} ", format_memory(app.memory.current() as f64));
    if app.memory.limit > 0 {
        title.push_str(&format!("/ {} ", format_memory(app.memory.limit as f64)));
    }
    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title))
        .x_axis(Axis::default().bounds(x_bounds(history)))
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([0.0, max])
                .labels(y_labels(max, format_memory)),
        );
    f.render_widget(chart, area);
}

fn render_top_hosts(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Top 10 Hosts ");
    let top = app.usage.stats.top_hosts(TOP_N);
    if top.is_empty() {
        let empty = Paragraph::new("No data")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let label_width = (area.width / 3).max(8) as usize;
    let bars: Vec<Bar> = top
        .iter()
        .map(|(host, bytes)| {
            Bar::default()
                .value(*bytes)
                .label(Line::from(truncate_str(host, label_width)))
                .text_value(format_bytes(*bytes))
        })
        .collect();

    let chart = BarChart::default()
        .block(block)
        .direction(Direction::Horizontal)
        .bar_width(1)
        .bar_gap(0)
        .bar_style(Style::default().fg(Color::Cyan))
        .value_style(Style::default().fg(Color::Black).bg(Color::Cyan))
        .data(BarGroup::default().bars(&bars));
    f.render_widget(chart, area);
}

fn render_top_nodes(f: &mut Frame, app: &App, area: Rect) {
    let top = app.usage.stats.top_nodes(TOP_N);
    let items: Vec<ListItem> = if top.is_empty() {
        vec![ListItem::new(Span::styled(
            " No data",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        let name_width = (area.width as usize).saturating_sub(16).max(8);
        top.iter()
            .enumerate()
            .map(|(i, (node, bytes))| {
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:>3} ", i + 1), Style::default().fg(Color::DarkGray)),
                    Span::raw(format!(
                        "{:<width$}",
                        truncate_str(node, name_width),
                        width = name_width
                    )),
                    Span::styled(
                        format!("{:>10}", format_bytes(*bytes)),
                        Style::default().fg(Color::Yellow),
                    ),
                ]))
            })
            .collect()
    };

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Top 10 Nodes "),
    );
    f.render_widget(list, area);
}
