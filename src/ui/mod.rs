// ============================================================================
// UI Rendering
// ============================================================================

mod connections;
mod logs;
mod proxies;
mod rules;
mod setup;
mod status;

pub use setup::render_setup;

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Tabs},
    Frame,
};

use crate::{
    app::{App, Tab},
    format::format_speed,
};

/// Row highlight shared by every list.
pub(crate) fn highlight() -> Style {
    Style::default()
        .bg(Color::Rgb(50, 50, 50))
        .add_modifier(Modifier::BOLD)
}

pub(crate) const HIGHLIGHT_SYMBOL: &str = "▎";

pub(crate) fn focus_border(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Tabs
            Constraint::Min(0),    // Main content
            Constraint::Length(4), // Status bar + Hints
        ])
        .split(f.size());

    let speed = app.traffic.current();
    let mut title = format!(
        " clashpanel - {} {} | Mode: {} | ↑ {} | ↓ {} ",
        app.backend,
        app.version,
        title_case(&app.mode),
        format_speed(speed.up as f64),
        format_speed(speed.down as f64),
    );
    if app.frozen {
        title.push_str("| paused ");
    }

    let titles: Vec<&str> = Tab::ALL.iter().map(Tab::title).collect();
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title(title))
        .select(app.tab.index())
        .style(Style::default().fg(Color::Gray))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        );
    f.render_widget(tabs, chunks[0]);

    match app.tab {
        Tab::Status => status::render(f, app, chunks[1]),
        Tab::Proxies => proxies::render(f, app, chunks[1]),
        Tab::Conns => connections::render(f, app, chunks[1]),
        Tab::Rules => rules::render(f, app, chunks[1]),
        Tab::Logs => logs::render(f, app, chunks[1]),
    }

    render_status_bar(f, app, chunks[2]);

    if app.show_help {
        render_help_popup(f);
    }
}

fn hints(tab: Tab) -> &'static [(&'static str, &'static str)] {
    match tab {
        Tab::Status => &[("c", "Clear usage"), ("m", "Mode"), ("r", "Refresh")],
        Tab::Proxies => &[
            ("Enter", "Select"),
            ("t", "Test"),
            ("g", "Test group"),
            ("T", "Test all"),
            ("Tab", "Switch focus"),
        ],
        Tab::Conns => &[
            ("a", "Active/Closed"),
            ("/", "Filter"),
            ("s/S", "Sort"),
            ("d", "Direction"),
            ("x", "Close"),
            ("X", "Close all"),
        ],
        Tab::Rules => &[("r", "Refresh")],
        Tab::Logs => &[("p", "Pause"), ("/", "Filter")],
    }
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let key_style = Style::default().fg(Color::Cyan);
    let mut keys = vec![
        Span::styled(" ? ", key_style),
        Span::raw("Help "),
        Span::styled(" q ", key_style),
        Span::raw("Quit "),
    ];
    for (key, label) in hints(app.tab) {
        keys.push(Span::styled(format!(" {} ", key), key_style));
        keys.push(Span::raw(format!("{} ", label)));
    }

    let status_text = vec![
        Line::from(vec![
            Span::raw(" "),
            Span::styled(app.status.as_str(), Style::default().fg(Color::Yellow)),
        ]),
        Line::from(keys),
    ];

    let status = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title(" Status "));
    f.render_widget(status, area);
}

fn render_help_popup(f: &mut Frame) {
    let area = centered_rect(60, 80, f.size());

    let help_text = [
        "",
        "  Navigation",
        "  ──────────────────────────────",
        "  ↑/k ↓/j   Move",
        "  ←/h →/l   Prev/next tab, or focus groups/nodes",
        "  1-5       Status/Proxies/Conns/Rules/Logs",
        "",
        "  Status",
        "  ──────────────────────────────",
        "  c         Clear usage statistics",
        "",
        "  Proxies",
        "  ──────────────────────────────",
        "  Enter     Select node",
        "  t/g/T     Test node / group / everything",
        "  Tab       Switch focus",
        "",
        "  Connections",
        "  ──────────────────────────────",
        "  a         Active / closed",
        "  /         Filter (Enter keeps, Esc clears)",
        "  s/S d     Sort key, direction",
        "  x/X       Close selected / all",
        "",
        "  Logs",
        "  ──────────────────────────────",
        "  p         Pause / resume",
        "  /         Filter",
        "",
        "  General",
        "  ──────────────────────────────",
        "  m         Switch mode (Rule/Global/Direct)",
        "  r         Refresh data",
        "  L         Log out (forget controller)",
        "  ?         Toggle this help",
        "  q/Esc     Quit",
    ];

    let help = Paragraph::new(help_text.join("\n"))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help ")
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .style(Style::default().fg(Color::White));

    f.render_widget(Clear, area);
    f.render_widget(help, area);
}

pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
