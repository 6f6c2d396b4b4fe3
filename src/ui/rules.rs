use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

use super::{highlight, HIGHLIGHT_SYMBOL};
use crate::{app::App, format::truncate_str};

pub fn render(f: &mut Frame, app: &mut App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" Rules ({}) ", app.rules.len()));

    if app.rules.is_empty() {
        let empty = Paragraph::new(" No rules")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let rule_items: Vec<ListItem> = app
        .rules
        .iter()
        .enumerate()
        .map(|(idx, rule)| {
            let content = Line::from(vec![
                Span::styled(
                    format!("{:>4} ", idx + 1),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(
                    format!("{:<15}", rule.rule_type),
                    Style::default().fg(Color::Cyan),
                ),
                Span::styled(
                    format!("{:<40}", truncate_str(&rule.payload, 38)),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    format!(" → {}", rule.proxy),
                    Style::default().fg(Color::Yellow),
                ),
            ]);
            ListItem::new(content)
        })
        .collect();

    let rules = List::new(rule_items)
        .block(block)
        .highlight_style(highlight())
        .highlight_symbol(HIGHLIGHT_SYMBOL);

    f.render_stateful_widget(rules, area, &mut app.rule_state);
}
