use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
    Frame,
};

use super::{focus_border, highlight, HIGHLIGHT_SYMBOL};
use crate::{
    app::{App, ProxyFocus},
    format::{format_speed, truncate_str},
    proxies::{delay_band, delay_label, DelayBand},
};

fn band_color(band: DelayBand) -> Color {
    match band {
        DelayBand::Fast => Color::Green,
        DelayBand::Medium => Color::Yellow,
        DelayBand::Slow => Color::Red,
        DelayBand::Unknown => Color::DarkGray,
    }
}

pub fn render(f: &mut Frame, app: &mut App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let view = &mut app.proxies;

    let group_items: Vec<ListItem> = view
        .board
        .groups
        .iter()
        .map(|g| {
            let now = g.now.as_deref().unwrap_or("-");
            ListItem::new(Line::from(vec![
                Span::raw(format!(" {} ", g.name)),
                Span::styled(
                    format!("({}) ", g.group_type),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(now.to_string(), Style::default().fg(Color::Green)),
            ]))
        })
        .collect();

    let groups = List::new(group_items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Groups ")
                .border_style(focus_border(view.focus == ProxyFocus::Groups)),
        )
        .highlight_style(highlight().fg(Color::Cyan))
        .highlight_symbol(HIGHLIGHT_SYMBOL);
    f.render_stateful_widget(groups, chunks[0], &mut view.group_state);

    let (title, node_items) = match view.current_group() {
        Some(group) => {
            let active = group.now.as_deref();
            let items: Vec<ListItem> = group
                .members
                .iter()
                .map(|node| {
                    let is_active = active == Some(node.name.as_str());
                    let delay = view.board.node_delay(node);
                    let marker = if is_active { "●" } else { " " };
                    let name_style = if is_active {
                        Style::default().fg(Color::Green)
                    } else {
                        Style::default()
                    };
                    ListItem::new(Line::from(vec![
                        Span::styled(format!(" {} ", marker), Style::default().fg(Color::Green)),
                        Span::styled(format!("{:<30} ", truncate_str(&node.name, 29)), name_style),
                        Span::styled(
                            format!("{:<14}", truncate_str(&node.node_type, 13)),
                            Style::default().fg(Color::DarkGray),
                        ),
                        Span::styled(
                            format!("{:>8} ", delay_label(delay)),
                            Style::default().fg(band_color(delay_band(delay))),
                        ),
                    ]))
                })
                .collect();

            let mut title = format!(" {} ({}) ", group.name, group.group_type);
            if let Some(node) = active {
                let rate = view.speed.rate();
                title.push_str(&format!(
                    "| {} ↑ {} ↓ {} ",
                    node,
                    format_speed(rate.up),
                    format_speed(rate.down)
                ));
            }
            if view.is_testing() {
                title.push_str("| testing… ");
            }
            (title, items)
        }
        None => (" Proxies ".to_string(), Vec::new()),
    };

    let nodes = List::new(node_items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(focus_border(view.focus == ProxyFocus::Nodes)),
        )
        .highlight_style(highlight())
        .highlight_symbol(HIGHLIGHT_SYMBOL);
    f.render_stateful_widget(nodes, chunks[1], &mut view.node_state);
}
