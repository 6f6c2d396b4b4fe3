// ============================================================================
// Views: each one holds its own subscriptions and reducers
// ============================================================================

use chrono::Local;
use ratatui::widgets::ListState;
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{
    api::{ClashClient, Connection, ConnectionsSnapshot, LogEvent, Memory, Traffic},
    conns::ConnView,
    delay::{BatchOptions, DelayBatch},
    logs::LogTail,
    proxies::{GroupEntry, NodeEntry, ProxyBoard},
    stream::{StreamHub, Subscription},
    telemetry::{
        ClosedTracker, History, ProxyRateTracker, RateTracker, StatusSummary, UsageStats,
    },
};

const USAGE_SAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Moves a list selection by `delta`, clamped to `len`.
pub fn step(state: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let current = state.selected().unwrap_or(0) as isize;
    let next = (current + delta).clamp(0, len as isize - 1);
    state.select(Some(next as usize));
}

/// Keeps a selection inside a list that may have shrunk.
pub fn clamp_selection(state: &mut ListState, len: usize) {
    match (state.selected(), len) {
        (_, 0) => state.select(None),
        (None, _) => state.select(Some(0)),
        (Some(i), len) if i >= len => state.select(Some(len - 1)),
        _ => {}
    }
}

// ----------------------------------------------------------------------------
// Status cards and charts
// ----------------------------------------------------------------------------

pub struct StatusView {
    conns: Subscription<ConnectionsSnapshot>,
    traffic: Subscription<Traffic>,
    memory: Subscription<Memory>,
    pub summary: StatusSummary,
}

impl StatusView {
    pub fn new(hub: &StreamHub) -> Self {
        Self {
            conns: hub.connections.subscribe(),
            traffic: hub.traffic.subscribe(),
            memory: hub.memory.subscribe(),
            summary: StatusSummary::default(),
        }
    }

    pub fn tick(&mut self) {
        for snap in self.conns.drain() {
            self.summary.apply_connections(&snap);
        }
        for t in self.traffic.drain() {
            self.summary.apply_traffic(&t);
        }
        for m in self.memory.drain() {
            self.summary.apply_memory(&m);
        }
    }
}

pub struct TrafficView {
    sub: Subscription<Traffic>,
    pub history: History<Traffic>,
}

impl TrafficView {
    pub fn new(hub: &StreamHub, len: usize) -> Self {
        Self {
            sub: hub.traffic.subscribe(),
            history: History::new(len),
        }
    }

    pub fn tick(&mut self) {
        for t in self.sub.drain() {
            self.history.push(*t);
        }
    }

    pub fn current(&self) -> Traffic {
        self.history.last().unwrap_or_default()
    }
}

pub struct MemoryView {
    sub: Subscription<Memory>,
    pub history: History<u64>,
    /// Reported by the daemon; 0 when unknown.
    pub limit: u64,
}

impl MemoryView {
    pub fn new(hub: &StreamHub, len: usize) -> Self {
        Self {
            sub: hub.memory.subscribe(),
            history: History::new(len),
            limit: 0,
        }
    }

    pub fn tick(&mut self) {
        for m in self.sub.drain() {
            self.history.push(m.inuse);
            self.limit = m.oslimit;
        }
    }

    pub fn current(&self) -> u64 {
        self.history.last().unwrap_or(0)
    }
}

/// Top hosts / top nodes, persisted across runs.
pub struct UsageView {
    sub: Subscription<ConnectionsSnapshot>,
    pub stats: UsageStats,
    path: Option<PathBuf>,
    dirty: bool,
    last_save: Instant,
}

impl UsageView {
    pub fn new(hub: &StreamHub, path: Option<PathBuf>) -> Self {
        let stats = match &path {
            Some(p) => UsageStats::load(p).unwrap_or_else(|e| {
                warn!(error = %format!("{:#}", e), "ignoring unreadable usage stats");
                UsageStats::default()
            }),
            None => UsageStats::default(),
        };
        Self {
            sub: hub.connections.subscribe(),
            stats,
            path,
            dirty: false,
            last_save: Instant::now(),
        }
    }

    pub fn tick(&mut self) {
        for snap in self.sub.drain() {
            self.dirty |= self.stats.update(&snap.connections);
        }
        if self.dirty && self.last_save.elapsed() >= USAGE_SAVE_INTERVAL {
            self.persist();
        }
    }

    pub fn clear(&mut self) {
        self.stats.clear();
        self.dirty = true;
        self.persist();
    }

    pub fn persist(&mut self) {
        self.last_save = Instant::now();
        if !self.dirty {
            return;
        }
        if let Some(path) = &self.path {
            match self.stats.save(path) {
                Ok(()) => self.dirty = false,
                Err(e) => warn!(error = %format!("{:#}", e), "failed to save usage stats"),
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Connections
// ----------------------------------------------------------------------------

pub struct ConnectionsView {
    sub: Subscription<ConnectionsSnapshot>,
    pub active: Vec<Connection>,
    pub upload_total: u64,
    pub download_total: u64,
    pub rates: RateTracker,
    pub closed: ClosedTracker,
    pub view: ConnView,
    pub state: ListState,
}

impl ConnectionsView {
    pub fn new(hub: &StreamHub) -> Self {
        Self {
            sub: hub.connections.subscribe(),
            active: Vec::new(),
            upload_total: 0,
            download_total: 0,
            rates: RateTracker::default(),
            closed: ClosedTracker::default(),
            view: ConnView::default(),
            state: ListState::default(),
        }
    }

    /// Every frame feeds the closed-connection diff; rates only need the
    /// newest one.
    pub fn tick(&mut self, now: Instant) {
        let frames = self.sub.drain();
        let Some(latest) = frames.last() else {
            return;
        };
        for snap in &frames {
            self.closed.update(&snap.connections);
        }
        self.rates.update(&latest.connections, now);
        self.active = latest.connections.clone();
        self.upload_total = latest.upload_total;
        self.download_total = latest.download_total;

        let len = self.visible().len();
        clamp_selection(&mut self.state, len);
    }

    pub fn visible(&self) -> Vec<&Connection> {
        self.view.apply(&self.active, self.closed.closed(), &self.rates)
    }

    pub fn selected(&self) -> Option<&Connection> {
        self.state
            .selected()
            .and_then(|i| self.visible().get(i).copied())
    }
}

// ----------------------------------------------------------------------------
// Logs
// ----------------------------------------------------------------------------

pub struct LogView {
    sub: Subscription<LogEvent>,
    pub tail: LogTail,
    pub state: ListState,
}

impl LogView {
    pub fn new(hub: &StreamHub) -> Self {
        Self {
            sub: hub.logs.subscribe(),
            tail: LogTail::default(),
            state: ListState::default(),
        }
    }

    pub fn tick(&mut self) {
        for event in self.sub.drain() {
            self.tail.push(&event, Local::now());
        }
    }
}

// ----------------------------------------------------------------------------
// Proxies
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFocus {
    Groups,
    Nodes,
}

pub struct ProxiesView {
    sub: Subscription<ConnectionsSnapshot>,
    prober: Arc<ClashClient>,
    pub board: ProxyBoard,
    pub group_state: ListState,
    pub node_state: ListState,
    pub focus: ProxyFocus,
    /// Live rate of the selected group's active node.
    pub speed: ProxyRateTracker,
    batch: Option<DelayBatch>,
}

impl ProxiesView {
    pub fn new(hub: &StreamHub, prober: Arc<ClashClient>) -> Self {
        Self {
            sub: hub.connections.subscribe(),
            prober,
            board: ProxyBoard::default(),
            group_state: ListState::default(),
            node_state: ListState::default(),
            focus: ProxyFocus::Groups,
            speed: ProxyRateTracker::default(),
            batch: None,
        }
    }

    /// Returns a status line when a delay batch completes.
    pub fn tick(&mut self, now: Instant) -> Option<String> {
        if let Some(snap) = self.sub.drain().pop() {
            self.speed.update(&snap.connections, now);
        }

        let batch = self.batch.as_mut()?;
        let partial = batch.poll();
        let finished = batch.is_finished();
        let total = batch.total();
        self.board.merge_delays(partial);
        if finished {
            self.batch = None;
            info!(nodes = total, "delay test finished");
            return Some(format!("Tested {} node(s)", total));
        }
        None
    }

    pub fn set_groups(&mut self, groups: Vec<GroupEntry>) {
        self.board.replace_groups(groups);
        clamp_selection(&mut self.group_state, self.board.groups.len());
        let members = self.current_group().map(|g| g.members.len()).unwrap_or(0);
        clamp_selection(&mut self.node_state, members);
        self.track_active_node();
    }

    pub fn current_group(&self) -> Option<&GroupEntry> {
        self.group_state
            .selected()
            .and_then(|i| self.board.groups.get(i))
    }

    pub fn current_node(&self) -> Option<&NodeEntry> {
        let group = self.current_group()?;
        self.node_state.selected().and_then(|i| group.members.get(i))
    }

    pub fn move_selection(&mut self, delta: isize) {
        match self.focus {
            ProxyFocus::Groups => {
                step(&mut self.group_state, self.board.groups.len(), delta);
                self.node_state.select(Some(0));
                let members = self.current_group().map(|g| g.members.len()).unwrap_or(0);
                clamp_selection(&mut self.node_state, members);
                self.track_active_node();
            }
            ProxyFocus::Nodes => {
                let members = self.current_group().map(|g| g.members.len()).unwrap_or(0);
                step(&mut self.node_state, members, delta);
            }
        }
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            ProxyFocus::Groups => ProxyFocus::Nodes,
            ProxyFocus::Nodes => ProxyFocus::Groups,
        };
    }

    pub fn mark_selected(&mut self, group: &str, node: &str) {
        self.board.set_now(group, node);
        self.track_active_node();
    }

    fn track_active_node(&mut self) {
        let active = self.current_group().and_then(|g| g.now.clone());
        if let Some(node) = active {
            self.speed.set_proxy(&node);
        }
    }

    pub fn is_testing(&self) -> bool {
        self.batch.is_some()
    }

    /// Starts a delay batch, aborting any batch still running.
    pub fn start_batch(&mut self, names: Vec<String>, opts: BatchOptions) -> usize {
        if let Some(old) = self.batch.take() {
            old.abort();
        }
        let batch = DelayBatch::start(Arc::clone(&self.prober), names, opts);
        let total = batch.total();
        self.batch = Some(batch);
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_clamps_to_bounds() {
        let mut state = ListState::default();
        step(&mut state, 3, 1);
        assert_eq!(state.selected(), Some(1));
        step(&mut state, 3, 5);
        assert_eq!(state.selected(), Some(2));
        step(&mut state, 3, -10);
        assert_eq!(state.selected(), Some(0));
        step(&mut state, 0, 1);
        assert_eq!(state.selected(), None);
    }

    #[test]
    fn clamp_follows_a_shrinking_list() {
        let mut state = ListState::default();
        clamp_selection(&mut state, 4);
        assert_eq!(state.selected(), Some(0));
        state.select(Some(3));
        clamp_selection(&mut state, 2);
        assert_eq!(state.selected(), Some(1));
        clamp_selection(&mut state, 0);
        assert_eq!(state.selected(), None);
    }
}
