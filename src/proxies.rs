// ============================================================================
// Proxy groups
// ============================================================================

use std::collections::HashMap;

use crate::{
    api::{Proxy, ProxiesResponse},
    delay::Delays,
};

/// The pseudo-group the daemon uses for global mode; its `all` lists the
/// user's groups in config order.
const GLOBAL: &str = "GLOBAL";

#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub name: String,
    pub node_type: String,
    pub history_delay: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupEntry {
    pub name: String,
    pub group_type: String,
    pub now: Option<String>,
    pub members: Vec<NodeEntry>,
}

/// Selector/URLTest/Fallback groups, ordered like `GLOBAL.all`, with any
/// group it does not mention appended alphabetically.
pub fn groups_from(resp: &ProxiesResponse) -> Vec<GroupEntry> {
    let proxies = &resp.proxies;
    let order: HashMap<&str, usize> = proxies
        .get(GLOBAL)
        .map(|g| {
            g.all
                .iter()
                .enumerate()
                .map(|(i, name)| (name.as_str(), i))
                .collect()
        })
        .unwrap_or_default();

    let mut groups: Vec<&Proxy> = proxies
        .iter()
        .filter(|(name, p)| p.is_group() && name.as_str() != GLOBAL)
        .map(|(_, p)| p)
        .collect();
    groups.sort_by(|a, b| {
        let ra = order.get(a.name.as_str()).copied().unwrap_or(usize::MAX);
        let rb = order.get(b.name.as_str()).copied().unwrap_or(usize::MAX);
        ra.cmp(&rb).then_with(|| a.name.cmp(&b.name))
    });

    groups
        .into_iter()
        .map(|g| GroupEntry {
            name: g.name.clone(),
            group_type: g.proxy_type.clone(),
            now: g.now.clone(),
            members: g
                .all
                .iter()
                .map(|member| {
                    let node = proxies.get(member);
                    NodeEntry {
                        name: member.clone(),
                        node_type: node
                            .map(|p| p.proxy_type.clone())
                            .unwrap_or_else(|| "Unknown".to_string()),
                        history_delay: node.and_then(Proxy::last_delay),
                    }
                })
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayBand {
    Fast,
    Medium,
    Slow,
    Unknown,
}

pub fn delay_band(delay: Option<u32>) -> DelayBand {
    match delay {
        None => DelayBand::Unknown,
        Some(d) if d < 300 => DelayBand::Fast,
        Some(d) if d < 500 => DelayBand::Medium,
        Some(_) => DelayBand::Slow,
    }
}

pub fn delay_label(delay: Option<u32>) -> String {
    delay
        .map(|d| format!("{} ms", d))
        .unwrap_or_else(|| "N/A".to_string())
}

/// Groups plus the delay results gathered this session.
#[derive(Debug, Default)]
pub struct ProxyBoard {
    pub groups: Vec<GroupEntry>,
    delays: Delays,
}

impl ProxyBoard {
    pub fn replace_groups(&mut self, groups: Vec<GroupEntry>) {
        self.groups = groups;
    }

    pub fn merge_delays(&mut self, delays: Delays) {
        self.delays.extend(delays);
    }

    /// A tested result wins over the daemon's history, even when the test
    /// came back empty.
    pub fn node_delay(&self, node: &NodeEntry) -> Option<u32> {
        match self.delays.get(&node.name) {
            Some(tested) => *tested,
            None => node.history_delay,
        }
    }

    pub fn set_now(&mut self, group: &str, node: &str) {
        if let Some(g) = self.groups.iter_mut().find(|g| g.name == group) {
            g.now = Some(node.to_string());
        }
    }

    /// Every member of every group, first occurrence wins.
    pub fn all_node_names(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.groups
            .iter()
            .flat_map(|g| g.members.iter())
            .filter(|n| seen.insert(n.name.as_str()))
            .map(|n| n.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> ProxiesResponse {
        serde_json::from_str(
            r#"{"proxies": {
                "GLOBAL": {"name": "GLOBAL", "type": "Selector", "all": ["Streaming", "Proxy"], "now": "Proxy"},
                "Proxy": {"name": "Proxy", "type": "Selector", "all": ["Auto", "HK-01", "JP-01"], "now": "Auto"},
                "Auto": {"name": "Auto", "type": "URLTest", "all": ["HK-01", "JP-01"], "now": "HK-01"},
                "Streaming": {"name": "Streaming", "type": "Fallback", "all": ["JP-01"]},
                "HK-01": {"name": "HK-01", "type": "Shadowsocks", "history": [{"delay": 88}]},
                "JP-01": {"name": "JP-01", "type": "Vmess", "history": []},
                "DIRECT": {"name": "DIRECT", "type": "Direct"}
            }}"#,
        )
        .unwrap()
    }

    #[test]
    fn groups_follow_global_order_then_alphabetical() {
        let groups = groups_from(&response());
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["Streaming", "Proxy", "Auto"]);
    }

    #[test]
    fn members_carry_type_and_history_delay() {
        let groups = groups_from(&response());
        let auto = groups.iter().find(|g| g.name == "Auto").unwrap();
        assert_eq!(auto.now.as_deref(), Some("HK-01"));
        assert_eq!(auto.members[0].node_type, "Shadowsocks");
        assert_eq!(auto.members[0].history_delay, Some(88));
        assert_eq!(auto.members[1].history_delay, None);
    }

    #[test]
    fn tested_delay_overrides_history() {
        let mut board = ProxyBoard::default();
        board.replace_groups(groups_from(&response()));
        let hk = board.groups[1].members[1].clone();
        assert_eq!(hk.name, "HK-01");
        assert_eq!(board.node_delay(&hk), Some(88));

        board.merge_delays(Delays::from([("HK-01".to_string(), None)]));
        assert_eq!(board.node_delay(&hk), None);

        board.merge_delays(Delays::from([("HK-01".to_string(), Some(420))]));
        assert_eq!(board.node_delay(&hk), Some(420));
    }

    #[test]
    fn all_node_names_are_unique() {
        let mut board = ProxyBoard::default();
        board.replace_groups(groups_from(&response()));
        assert_eq!(board.all_node_names(), ["JP-01", "Auto", "HK-01"]);
    }

    #[test]
    fn set_now_updates_the_group() {
        let mut board = ProxyBoard::default();
        board.replace_groups(groups_from(&response()));
        board.set_now("Proxy", "JP-01");
        let proxy = board.groups.iter().find(|g| g.name == "Proxy").unwrap();
        assert_eq!(proxy.now.as_deref(), Some("JP-01"));
    }

    #[test]
    fn delay_bands() {
        assert_eq!(delay_band(Some(120)), DelayBand::Fast);
        assert_eq!(delay_band(Some(300)), DelayBand::Medium);
        assert_eq!(delay_band(Some(500)), DelayBand::Slow);
        assert_eq!(delay_band(None), DelayBand::Unknown);
        assert_eq!(delay_label(None), "N/A");
        assert_eq!(delay_label(Some(42)), "42 ms");
    }
}
