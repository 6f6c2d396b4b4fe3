use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};

use crate::api::Connection;

const UNKNOWN: &str = "UNKNOWN";

/// Cumulative traffic per destination host and per exit node.
///
/// Counters only grow from deltas observed between two snapshots, so a
/// connection contributes nothing on the snapshot where it first appears.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default)]
    host_traffic: HashMap<String, u64>,
    #[serde(default)]
    node_traffic: HashMap<String, u64>,
    #[serde(skip)]
    last_totals: HashMap<String, u64>,
}

impl UsageStats {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_vec(self).context("Failed to serialize usage stats")?;
        fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Returns true when any counter moved.
    pub fn update(&mut self, conns: &[Connection]) -> bool {
        let mut changed = false;
        let mut next = HashMap::with_capacity(conns.len());

        for c in conns {
            let total = c.upload.saturating_add(c.download);
            if let Some(&last) = self.last_totals.get(&c.id) {
                let delta = total.saturating_sub(last);
                if delta > 0 {
                    *self.host_traffic.entry(host_key(c)).or_default() += delta;
                    *self.node_traffic.entry(node_key(c)).or_default() += delta;
                    changed = true;
                }
            }
            next.insert(c.id.clone(), total);
        }

        self.last_totals = next;
        changed
    }

    pub fn top_hosts(&self, n: usize) -> Vec<(&str, u64)> {
        top(&self.host_traffic, n)
    }

    pub fn top_nodes(&self, n: usize) -> Vec<(&str, u64)> {
        top(&self.node_traffic, n)
    }

    pub fn clear(&mut self) {
        self.host_traffic.clear();
        self.node_traffic.clear();
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.host_traffic.is_empty() && self.node_traffic.is_empty()
    }
}

/// `"<rule target> | <host>"`, falling back to `ip:port` when there is no host.
fn host_key(c: &Connection) -> String {
    let target = c.chains.last().map(String::as_str).unwrap_or(UNKNOWN);
    let host = c.metadata.host.trim();
    if host.is_empty() {
        let ip = if c.metadata.destination_ip.is_empty() {
            "unknown"
        } else {
            &c.metadata.destination_ip
        };
        format!("{} | {}:{}", target, ip, c.metadata.destination_port)
    } else {
        format!("{} | {}", target, host)
    }
}

fn node_key(c: &Connection) -> String {
    c.chains.first().cloned().unwrap_or_else(|| UNKNOWN.to_string())
}

fn top(map: &HashMap<String, u64>, n: usize) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries.truncate(n);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::conn;

    fn with_host(mut c: Connection, host: &str, ip: &str, port: &str) -> Connection {
        c.metadata.host = host.to_string();
        c.metadata.destination_ip = ip.to_string();
        c.metadata.destination_port = port.to_string();
        c
    }

    #[test]
    fn first_sighting_only_records_a_baseline() {
        let mut stats = UsageStats::default();
        let changed = stats.update(&[with_host(conn("a", 500, 500, &["HK", "Proxy"]), "x.com", "", "443")]);
        assert!(!changed);
        assert!(stats.is_empty());
    }

    #[test]
    fn deltas_accumulate_per_host_and_node() {
        let mut stats = UsageStats::default();
        let a0 = with_host(conn("a", 100, 100, &["HK", "Proxy"]), "x.com", "1.1.1.1", "443");
        let b0 = with_host(conn("b", 0, 0, &[]), "  ", "8.8.8.8", "53");
        stats.update(&[a0, b0]);

        let a1 = with_host(conn("a", 150, 250, &["HK", "Proxy"]), "x.com", "1.1.1.1", "443");
        let b1 = with_host(conn("b", 10, 0, &[]), "  ", "8.8.8.8", "53");
        assert!(stats.update(&[a1, b1]));

        assert_eq!(stats.top_hosts(10), vec![("Proxy | x.com", 200), ("UNKNOWN | 8.8.8.8:53", 10)]);
        assert_eq!(stats.top_nodes(10), vec![("HK", 200), ("UNKNOWN", 10)]);
    }

    #[test]
    fn shrinking_counters_add_nothing() {
        let mut stats = UsageStats::default();
        stats.update(&[conn("a", 100, 100, &["HK"])]);
        assert!(!stats.update(&[conn("a", 10, 10, &["HK"])]));
        assert!(stats.is_empty());
    }

    #[test]
    fn missing_ip_is_reported_as_unknown() {
        let c = with_host(conn("a", 0, 0, &["DIRECT"]), "", "", "80");
        assert_eq!(host_key(&c), "DIRECT | unknown:80");
    }

    #[test]
    fn top_is_sorted_and_truncated() {
        let mut stats = UsageStats::default();
        for (i, name) in ["n1", "n2", "n3"].iter().enumerate() {
            stats.node_traffic.insert(name.to_string(), (i as u64 + 1) * 10);
        }
        assert_eq!(stats.top_nodes(2), vec![("n3", 30), ("n2", 20)]);
    }

    #[test]
    fn persisted_totals_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");

        let mut stats = UsageStats::default();
        stats.update(&[conn("a", 0, 0, &["HK"])]);
        stats.update(&[conn("a", 64, 0, &["HK"])]);
        stats.save(&path).unwrap();

        let mut loaded = UsageStats::load(&path).unwrap();
        assert_eq!(loaded.top_nodes(1), vec![("HK", 64)]);

        // Baselines are not persisted, so the reloaded stats start fresh.
        assert!(!loaded.update(&[conn("a", 128, 0, &["HK"])]));

        loaded.clear();
        assert!(loaded.is_empty());
    }
}
