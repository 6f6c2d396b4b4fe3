use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use super::{centered_rect, focus_border};
use crate::app::{SetupField, SetupForm};

fn masked(secret: &str) -> String {
    "•".repeat(secret.chars().count())
}

pub fn render_setup(f: &mut Frame, form: &SetupForm) {
    let area = centered_rect(60, 50, f.size());
    f.render_widget(Clear, area);

    let outer = Block::default()
        .borders(Borders::ALL)
        .title(" Connect to controller ")
        .border_style(Style::default().fg(Color::Cyan));
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(2),
            Constraint::Length(1),
        ])
        .split(inner);

    let cursor = |field: SetupField| if form.field == field { "▏" } else { "" };

    let controller = Paragraph::new(format!("{}{}", form.controller, cursor(SetupField::Controller)))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Controller URL ")
                .border_style(focus_border(form.field == SetupField::Controller)),
        );
    f.render_widget(controller, rows[0]);

    let secret = Paragraph::new(format!("{}{}", masked(&form.secret), cursor(SetupField::Secret)))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Secret (optional) ")
                .border_style(focus_border(form.field == SetupField::Secret)),
        );
    f.render_widget(secret, rows[1]);

    if let Some(err) = &form.error {
        let error = Paragraph::new(Line::from(Span::styled(
            err.as_str(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )))
        .wrap(Wrap { trim: true });
        f.render_widget(error, rows[2]);
    }

    let hints = Line::from(vec![
        Span::styled(" Tab ", Style::default().fg(Color::Cyan)),
        Span::raw("Switch field "),
        Span::styled(" Enter ", Style::default().fg(Color::Cyan)),
        Span::raw("Connect "),
        Span::styled(" Esc ", Style::default().fg(Color::Cyan)),
        Span::raw("Quit"),
    ]);
    f.render_widget(Paragraph::new(hints), rows[3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_masked_per_char() {
        assert_eq!(masked("päss"), "••••");
        assert_eq!(masked(""), "");
    }
}
