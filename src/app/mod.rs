// ============================================================================
// TUI Application
// ============================================================================

mod views;

pub use views::ProxyFocus;

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::widgets::ListState;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tracing::{error, info};

use crate::{
    api::{next_mode, Backend, ClashClient, Rule},
    config::{Session, Settings},
    conns::ConnFilter,
    delay::BatchOptions,
    proxies::groups_from,
    setup::{self, SetupError},
    stream::StreamHub,
};
use views::{
    step, ConnectionsView, LogView, MemoryView, ProxiesView, StatusView, TrafficView, UsageView,
};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Tab {
    Status,
    Proxies,
    Conns,
    Rules,
    Logs,
}

impl Tab {
    pub const ALL: [Tab; 5] = [Tab::Status, Tab::Proxies, Tab::Conns, Tab::Rules, Tab::Logs];

    pub fn title(&self) -> &'static str {
        match self {
            Tab::Status => "Status [1]",
            Tab::Proxies => "Proxies [2]",
            Tab::Conns => "Conns [3]",
            Tab::Rules => "Rules [4]",
            Tab::Logs => "Logs [5]",
        }
    }

    pub fn index(&self) -> usize {
        Tab::ALL.iter().position(|t| t == self).unwrap_or(0)
    }

    fn offset(&self, delta: isize) -> Tab {
        let len = Tab::ALL.len() as isize;
        let i = (self.index() as isize + delta).rem_euclid(len);
        Tab::ALL[i as usize]
    }
}

/// Which text field is receiving keystrokes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Input {
    ConnFilter,
    LogFilter,
}

/// Outcome of a key press.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
    /// Forget the saved controller and go back to setup.
    Logout,
}

pub struct App {
    client: Arc<ClashClient>,
    settings: Settings,
    hub: StreamHub,
    pub tab: Tab,
    pub backend: Backend,
    pub version: String,
    pub mode: String,
    pub status: String,
    pub show_help: bool,
    pub input: Option<Input>,
    pub frozen: bool,
    pub overview: StatusView,
    pub traffic: TrafficView,
    pub memory: MemoryView,
    pub usage: UsageView,
    pub conns: ConnectionsView,
    pub logs: LogView,
    pub proxies: ProxiesView,
    pub rules: Vec<Rule>,
    pub rule_state: ListState,
}

impl App {
    pub fn new(client: ClashClient, settings: Settings, usage_path: Option<PathBuf>) -> Self {
        let client = Arc::new(client);
        let hub = StreamHub::new(client.session(), &settings);
        let history = settings.history_len;

        let mut app = Self {
            overview: StatusView::new(&hub),
            traffic: TrafficView::new(&hub, history),
            memory: MemoryView::new(&hub, history),
            usage: UsageView::new(&hub, usage_path),
            conns: ConnectionsView::new(&hub),
            logs: LogView::new(&hub),
            proxies: ProxiesView::new(&hub, Arc::clone(&client)),
            client,
            settings,
            hub,
            tab: Tab::Status,
            backend: Backend::Clash,
            version: String::new(),
            mode: String::from("Unknown"),
            status: String::from("Press ? for help"),
            show_help: false,
            input: None,
            frozen: false,
            rules: Vec::new(),
            rule_state: ListState::default(),
        };
        app.refresh_version();
        app.refresh_data();
        app
    }

    /// Drains every view's subscriptions.
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.overview.tick();
        self.traffic.tick();
        self.memory.tick();
        self.usage.tick();
        self.conns.tick(now);
        self.logs.tick();
        if let Some(done) = self.proxies.tick(now) {
            self.status = done;
        }
    }

    pub fn freeze(&mut self) {
        if !self.frozen {
            self.frozen = true;
            self.hub.freeze();
        }
    }

    pub fn resume(&mut self) {
        if self.frozen {
            self.frozen = false;
            self.hub.resume();
        }
    }

    /// Flushes state that outlives the session.
    pub fn shutdown(&mut self) {
        self.usage.persist();
        info!("dashboard closed");
    }

    fn report(&mut self, what: &str, err: anyhow::Error) {
        error!(error = %format!("{:#}", err), "{}", what);
        self.status = format!("Error {}: {}", what, err);
    }

    // ------------------------------------------------------------------------
    // Data refresh
    // ------------------------------------------------------------------------

    fn refresh_version(&mut self) {
        match self.client.get_version() {
            Ok(v) => {
                self.backend = v.backend();
                self.version = v.version;
            }
            Err(e) => self.report("loading version", e),
        }
    }

    pub fn refresh_data(&mut self) {
        match self.client.get_config() {
            Ok(config) => self.mode = config.mode,
            Err(e) => self.report("loading config", e),
        }

        match self.tab {
            Tab::Proxies => self.refresh_proxies(),
            Tab::Rules => self.refresh_rules(),
            Tab::Status | Tab::Conns | Tab::Logs => {}
        }
    }

    fn refresh_proxies(&mut self) {
        match self.client.get_proxies() {
            Ok(resp) => {
                let groups = groups_from(&resp);
                self.status = format!("Loaded {} groups", groups.len());
                self.proxies.set_groups(groups);
            }
            Err(e) => self.report("loading proxies", e),
        }
    }

    fn refresh_rules(&mut self) {
        match self.client.get_rules() {
            Ok(resp) => {
                self.rules = resp.rules;
                views::clamp_selection(&mut self.rule_state, self.rules.len());
                self.status = format!("Loaded {} rules", self.rules.len());
            }
            Err(e) => self.report("loading rules", e),
        }
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    fn switch_tab(&mut self, tab: Tab) {
        if self.tab != tab {
            self.tab = tab;
            self.refresh_data();
        }
    }

    fn toggle_mode(&mut self) {
        let new_mode = next_mode(&self.mode);
        match self.client.update_mode(new_mode) {
            Ok(()) => {
                info!(mode = new_mode, "mode switched");
                self.mode = new_mode.to_string();
                self.status = format!("Switched to {} mode", new_mode);
            }
            Err(e) => self.report("switching mode", e),
        }
    }

    fn select_proxy(&mut self) {
        let (Some(group), Some(node)) = (
            self.proxies.current_group().map(|g| g.name.clone()),
            self.proxies.current_node().map(|n| n.name.clone()),
        ) else {
            return;
        };
        match self.client.switch_proxy(&group, &node) {
            Ok(()) => {
                info!(group = %group, node = %node, "proxy switched");
                self.proxies.mark_selected(&group, &node);
                self.status = format!("Selected: {} -> {}", group, node);
            }
            Err(e) => self.report("selecting proxy", e),
        }
    }

    fn test_node(&mut self) {
        let Some(node) = self.proxies.current_node().map(|n| n.name.clone()) else {
            return;
        };
        self.status = format!("Testing {}...", node);
        self.proxies
            .start_batch(vec![node], BatchOptions::group(&self.settings));
    }

    fn test_group(&mut self) {
        let Some(group) = self.proxies.current_group() else {
            return;
        };
        let name = group.name.clone();
        let names = group.members.iter().map(|n| n.name.clone()).collect();
        let total = self
            .proxies
            .start_batch(names, BatchOptions::group(&self.settings));
        self.status = format!("Testing {} node(s) in {}...", total, name);
    }

    fn test_all(&mut self) {
        let names = self.proxies.board.all_node_names();
        let total = self
            .proxies
            .start_batch(names, BatchOptions::test_all(&self.settings));
        self.status = format!("Testing {} node(s)...", total);
    }

    fn close_selected(&mut self) {
        if self.conns.view.filter != ConnFilter::Active {
            return;
        }
        let Some(id) = self.conns.selected().map(|c| c.id.clone()) else {
            return;
        };
        match self.client.close_connection(&id) {
            Ok(()) => self.status = format!("Closed connection {}", id),
            Err(e) => self.report("closing connection", e),
        }
    }

    fn close_all(&mut self) {
        match self.client.close_all_connections() {
            Ok(()) => self.status = "Closed all connections".to_string(),
            Err(e) => self.report("closing connections", e),
        }
    }

    fn clear_usage(&mut self) {
        self.usage.clear();
        self.status = "Usage statistics cleared".to_string();
    }

    fn move_selection(&mut self, delta: isize) {
        match self.tab {
            Tab::Status => {}
            Tab::Proxies => self.proxies.move_selection(delta),
            Tab::Conns => {
                let len = self.conns.visible().len();
                step(&mut self.conns.state, len, delta);
            }
            Tab::Rules => step(&mut self.rule_state, self.rules.len(), delta),
            Tab::Logs => {
                let len = self.logs.tail.visible().len();
                step(&mut self.logs.state, len, delta);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Flow::Quit;
        }
        if let Some(target) = self.input {
            self.handle_input(target, key.code);
            return Flow::Continue;
        }
        if self.show_help {
            if matches!(
                key.code,
                KeyCode::Char('q') | KeyCode::Char('?') | KeyCode::Esc | KeyCode::Enter
            ) {
                self.show_help = false;
            }
            return Flow::Continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
            KeyCode::Char('L') => return Flow::Logout,
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Char(c @ '1'..='5') => {
                let i = c as usize - '1' as usize;
                self.switch_tab(Tab::ALL[i]);
            }
            KeyCode::Char('r') => self.refresh_data(),
            KeyCode::Char('m') => self.toggle_mode(),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::PageUp => self.move_selection(-10),
            KeyCode::PageDown => self.move_selection(10),
            KeyCode::Left | KeyCode::Char('h') => {
                if self.tab == Tab::Proxies && self.proxies.focus == ProxyFocus::Nodes {
                    self.proxies.focus = ProxyFocus::Groups;
                } else {
                    self.switch_tab(self.tab.offset(-1));
                }
            }
            KeyCode::Right | KeyCode::Char('l') => {
                if self.tab == Tab::Proxies && self.proxies.focus == ProxyFocus::Groups {
                    self.proxies.focus = ProxyFocus::Nodes;
                } else {
                    self.switch_tab(self.tab.offset(1));
                }
            }
            code => self.handle_tab_key(code),
        }
        Flow::Continue
    }

    fn handle_tab_key(&mut self, code: KeyCode) {
        match (self.tab, code) {
            (Tab::Status, KeyCode::Char('c')) => self.clear_usage(),

            (Tab::Proxies, KeyCode::Tab) => self.proxies.toggle_focus(),
            (Tab::Proxies, KeyCode::Enter) => {
                if self.proxies.focus == ProxyFocus::Nodes {
                    self.select_proxy();
                } else {
                    self.proxies.focus = ProxyFocus::Nodes;
                }
            }
            (Tab::Proxies, KeyCode::Char('t')) => self.test_node(),
            (Tab::Proxies, KeyCode::Char('g')) => self.test_group(),
            (Tab::Proxies, KeyCode::Char('T')) => self.test_all(),

            (Tab::Conns, KeyCode::Char('a')) => {
                self.conns.view.toggle_filter();
                self.conns.state.select(Some(0));
            }
            (Tab::Conns, KeyCode::Char('/')) => self.input = Some(Input::ConnFilter),
            (Tab::Conns, KeyCode::Char('s')) => {
                let key = self.conns.view.key.next();
                self.conns.view.sort_by(key);
            }
            (Tab::Conns, KeyCode::Char('S')) => {
                let key = self.conns.view.key.prev();
                self.conns.view.sort_by(key);
            }
            (Tab::Conns, KeyCode::Char('d')) => {
                let key = self.conns.view.key;
                self.conns.view.sort_by(key);
            }
            (Tab::Conns, KeyCode::Char('x')) => self.close_selected(),
            (Tab::Conns, KeyCode::Char('X')) => self.close_all(),

            (Tab::Logs, KeyCode::Char('p')) => {
                let paused = self.logs.tail.toggle_pause();
                self.status = if paused { "Logs paused" } else { "Logs resumed" }.to_string();
            }
            (Tab::Logs, KeyCode::Char('/')) => self.input = Some(Input::LogFilter),

            _ => {}
        }
    }

    fn handle_input(&mut self, target: Input, code: KeyCode) {
        let field = match target {
            Input::ConnFilter => &mut self.conns.view.text,
            Input::LogFilter => &mut self.logs.tail.filter,
        };
        match code {
            KeyCode::Char(c) => field.push(c),
            KeyCode::Backspace => {
                field.pop();
            }
            KeyCode::Esc => {
                field.clear();
                self.input = None;
            }
            KeyCode::Enter => self.input = None,
            _ => {}
        }
        match target {
            Input::ConnFilter => self.conns.state.select(Some(0)),
            Input::LogFilter => self.logs.state.select(Some(0)),
        }
    }
}

// ============================================================================
// Setup screen
// ============================================================================

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SetupField {
    Controller,
    Secret,
}

/// What the setup screen wants the event loop to do next.
pub enum SetupFlow {
    Continue,
    Quit,
    Connected(Session),
}

#[derive(Debug)]
pub struct SetupForm {
    pub controller: String,
    pub secret: String,
    pub field: SetupField,
    pub error: Option<String>,
}

impl SetupForm {
    pub fn new(settings: &Settings) -> Self {
        Self {
            controller: settings
                .controller
                .clone()
                .unwrap_or_else(|| "127.0.0.1:9090".to_string()),
            secret: settings.secret.clone().unwrap_or_default(),
            field: SetupField::Controller,
            error: None,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, settings: &mut Settings, path: &Path) -> SetupFlow {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return SetupFlow::Quit;
        }
        let field = match self.field {
            SetupField::Controller => &mut self.controller,
            SetupField::Secret => &mut self.secret,
        };
        match key.code {
            KeyCode::Esc => return SetupFlow::Quit,
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.field = match self.field {
                    SetupField::Controller => SetupField::Secret,
                    SetupField::Secret => SetupField::Controller,
                };
            }
            KeyCode::Char(c) => field.push(c),
            KeyCode::Backspace => {
                field.pop();
            }
            KeyCode::Enter => return self.submit(settings, path),
            _ => {}
        }
        SetupFlow::Continue
    }

    fn submit(&mut self, settings: &mut Settings, path: &Path) -> SetupFlow {
        match setup::bootstrap(&self.controller, &self.secret, settings, path) {
            Ok((session, version)) => {
                info!(backend = %version.backend(), "controller ready");
                self.error = None;
                SetupFlow::Connected(session)
            }
            Err(e) => {
                error!(error = %e, "setup failed");
                self.error = Some(setup_message(&e));
                SetupFlow::Continue
            }
        }
    }
}

fn setup_message(err: &SetupError) -> String {
    match err {
        SetupError::Http { status, .. } if *status == 401 => {
            format!("Fail to connect: {} (check the secret)", err)
        }
        SetupError::Http { .. } | SetupError::Connect(_) => format!("Fail to connect: {}", err),
        SetupError::InvalidUrl | SetupError::Save(_) => err.to_string(),
    }
}

/// Loads settings and resolves the controller from CLI overrides.
pub fn resolve_session(
    settings: &Settings,
    controller: Option<&str>,
    secret: Option<&str>,
) -> Option<Session> {
    match controller {
        Some(c) => Some(Session::new(
            c,
            secret.map(str::to_string).or_else(|| settings.secret.clone()),
        )),
        None => settings.session().map(|mut s| {
            if let Some(secret) = secret {
                s.secret = Some(secret.to_string()).filter(|s| !s.is_empty());
            }
            s
        }),
    }
}

pub fn usage_path() -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join("usage.json"))
}
