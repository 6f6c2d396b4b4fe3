// ============================================================================
// Connection list: filtering, sorting and display helpers
// ============================================================================

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use std::{cmp::Ordering, sync::OnceLock};

use crate::{api::Connection, telemetry::RateTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnFilter {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Source,
    Destination,
    Host,
    Proxy,
    Upload,
    Download,
    UpSpeed,
    DownSpeed,
    Network,
    Duration,
    Type,
}

impl SortKey {
    pub const ALL: [SortKey; 11] = [
        SortKey::Source,
        SortKey::Destination,
        SortKey::Host,
        SortKey::Proxy,
        SortKey::Upload,
        SortKey::Download,
        SortKey::UpSpeed,
        SortKey::DownSpeed,
        SortKey::Network,
        SortKey::Duration,
        SortKey::Type,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SortKey::Source => "Source",
            SortKey::Destination => "Destination",
            SortKey::Host => "Host",
            SortKey::Proxy => "Proxy",
            SortKey::Upload => "Upload",
            SortKey::Download => "Download",
            SortKey::UpSpeed => "UpSpeed",
            SortKey::DownSpeed => "DownSpeed",
            SortKey::Network => "Network",
            SortKey::Duration => "Duration",
            SortKey::Type => "Type",
        }
    }

    fn position(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or(0)
    }

    pub fn next(&self) -> SortKey {
        Self::ALL[(self.position() + 1) % Self::ALL.len()]
    }

    pub fn prev(&self) -> SortKey {
        Self::ALL[(self.position() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn flip(self) -> SortDir {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            SortDir::Asc => "↑",
            SortDir::Desc => "↓",
        }
    }
}

enum SortValue {
    Text(String),
    Num(f64),
}

impl SortValue {
    fn compare(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Text(a), SortValue::Text(b)) => a
                .to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b)),
            (SortValue::Num(a), SortValue::Num(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        }
    }
}

/// What the connections tab shows and in which order.
#[derive(Debug, Clone)]
pub struct ConnView {
    pub filter: ConnFilter,
    pub text: String,
    pub key: SortKey,
    pub dir: SortDir,
}

impl Default for ConnView {
    fn default() -> Self {
        Self {
            filter: ConnFilter::Active,
            text: String::new(),
            key: SortKey::Duration,
            dir: SortDir::Desc,
        }
    }
}

impl ConnView {
    /// Re-selecting the current key flips direction; a new key starts descending.
    pub fn sort_by(&mut self, key: SortKey) {
        if self.key == key {
            self.dir = self.dir.flip();
        } else {
            self.key = key;
            self.dir = SortDir::Desc;
        }
    }

    pub fn toggle_filter(&mut self) {
        self.filter = match self.filter {
            ConnFilter::Active => ConnFilter::Closed,
            ConnFilter::Closed => ConnFilter::Active,
        };
    }

    pub fn apply<'a>(
        &self,
        active: &'a [Connection],
        closed: &'a [Connection],
        rates: &RateTracker,
    ) -> Vec<&'a Connection> {
        let source = match self.filter {
            ConnFilter::Active => active,
            ConnFilter::Closed => closed,
        };

        let needle = self.text.trim().to_lowercase();
        let mut list: Vec<&Connection> = source
            .iter()
            .filter(|c| needle.is_empty() || haystack(c).contains(&needle))
            .collect();

        list.sort_by(|a, b| {
            let ord = sort_value(a, self.key, rates).compare(&sort_value(b, self.key, rates));
            match self.dir {
                SortDir::Asc => ord,
                SortDir::Desc => ord.reverse(),
            }
        });
        list
    }
}

fn haystack(c: &Connection) -> String {
    let m = &c.metadata;
    format!(
        "{} {} {} {} {}:{} {}",
        m.host,
        m.conn_type,
        m.network,
        source(c),
        m.destination_ip,
        m.destination_port,
        c.chains.join(" ")
    )
    .to_lowercase()
}

fn sort_value(c: &Connection, key: SortKey, rates: &RateTracker) -> SortValue {
    let m = &c.metadata;
    match key {
        SortKey::Source => SortValue::Text(source(c)),
        SortKey::Destination => {
            SortValue::Text(format!("{}:{}", m.destination_ip, m.destination_port))
        }
        SortKey::Proxy => SortValue::Text(c.chains.join(",")),
        SortKey::Host => SortValue::Text(m.host.clone()),
        SortKey::Upload => SortValue::Num(c.upload as f64),
        SortKey::Download => SortValue::Num(c.download as f64),
        SortKey::UpSpeed => SortValue::Num(rates.rate(&c.id).up),
        SortKey::DownSpeed => SortValue::Num(rates.rate(&c.id).down),
        SortKey::Network => SortValue::Text(m.network.to_uppercase()),
        SortKey::Type => SortValue::Text(m.conn_type.clone()),
        SortKey::Duration => SortValue::Num(start_millis(c) as f64),
    }
}

fn parse_start(c: &Connection) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&c.start)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn start_millis(c: &Connection) -> i64 {
    parse_start(c).map(|t| t.timestamp_millis()).unwrap_or(0)
}

pub fn source(c: &Connection) -> String {
    format!("{}:{}", c.metadata.source_ip, c.metadata.source_port)
}

pub fn destination(c: &Connection) -> String {
    let m = &c.metadata;
    let addr = if m.host.is_empty() {
        &m.destination_ip
    } else {
        &m.host
    };
    if m.destination_port.is_empty() {
        addr.clone()
    } else {
        format!("{}:{}", addr, m.destination_port)
    }
}

/// Hops from entry to exit.
pub fn proxy_chain(c: &Connection) -> String {
    if c.chains.is_empty() {
        return "DIRECT".to_string();
    }
    c.chains.iter().rev().cloned().collect::<Vec<_>>().join(" → ")
}

fn rule_set_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"rule_set=(?:\[([^\]]+)\]|([^\s=>]+))").expect("valid regex"))
}

/// Rule-set names referenced by the matched rule, or the rule itself.
pub fn rule_set(c: &Connection) -> String {
    let names: Vec<&str> = rule_set_re()
        .captures_iter(&c.rule)
        .flat_map(|cap| match (cap.get(1), cap.get(2)) {
            (Some(list), _) => list.as_str().split_whitespace().collect::<Vec<_>>(),
            (None, Some(single)) => vec![single.as_str()],
            (None, None) => Vec::new(),
        })
        .collect();

    if names.is_empty() {
        c.rule.clone()
    } else {
        names.join(" ")
    }
}

pub fn network(c: &Connection) -> String {
    if c.metadata.network.is_empty() {
        "—".to_string()
    } else {
        c.metadata.network.to_uppercase()
    }
}

pub fn age(c: &Connection, now: DateTime<Utc>) -> String {
    let Some(start) = parse_start(c) else {
        return "—".to_string();
    };
    let seconds = (now - start).num_seconds().max(0);
    if seconds < 60 {
        return format!("{}s ago", seconds);
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}

pub fn start_clock(c: &Connection) -> String {
    parse_start(c)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "—".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::conn;
    use std::time::{Duration, Instant};

    fn full(id: &str, host: &str, network: &str, start: &str, chains: &[&str]) -> Connection {
        let mut c = conn(id, 0, 0, chains);
        c.metadata.host = host.to_string();
        c.metadata.network = network.to_string();
        c.metadata.source_ip = "192.168.1.2".to_string();
        c.metadata.source_port = "50000".to_string();
        c.metadata.destination_ip = "93.184.216.34".to_string();
        c.metadata.destination_port = "443".to_string();
        c.start = start.to_string();
        c
    }

    fn ids(list: &[&Connection]) -> Vec<String> {
        list.iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn default_sort_is_newest_first() {
        let conns = vec![
            full("old", "a.com", "tcp", "2024-01-01T00:00:00Z", &[]),
            full("new", "b.com", "tcp", "2024-01-01T00:05:00Z", &[]),
            full("bad", "c.com", "tcp", "garbage", &[]),
        ];
        let view = ConnView::default();
        let list = view.apply(&conns, &[], &RateTracker::default());
        assert_eq!(ids(&list), ["new", "old", "bad"]);
    }

    #[test]
    fn reselecting_a_key_flips_direction() {
        let mut view = ConnView::default();
        view.sort_by(SortKey::Host);
        assert_eq!((view.key, view.dir), (SortKey::Host, SortDir::Desc));
        view.sort_by(SortKey::Host);
        assert_eq!(view.dir, SortDir::Asc);
        view.sort_by(SortKey::Upload);
        assert_eq!((view.key, view.dir), (SortKey::Upload, SortDir::Desc));
    }

    #[test]
    fn text_sort_ignores_case() {
        let conns = vec![
            full("b", "B.com", "tcp", "", &[]),
            full("c", "c.com", "tcp", "", &[]),
            full("a", "a.com", "tcp", "", &[]),
        ];
        let mut view = ConnView::default();
        view.sort_by(SortKey::Host);
        view.sort_by(SortKey::Host);
        assert_eq!(view.dir, SortDir::Asc);
        let list = view.apply(&conns, &[], &RateTracker::default());
        assert_eq!(ids(&list), ["a", "b", "c"]);
    }

    #[test]
    fn text_filter_searches_hosts_addresses_and_chains() {
        let conns = vec![
            full("a", "Google.com", "tcp", "", &["HK-01", "Proxy"]),
            full("b", "example.org", "udp", "", &["DIRECT"]),
        ];
        let mut view = ConnView::default();

        view.text = "  GOOGLE ".to_string();
        assert_eq!(ids(&view.apply(&conns, &[], &RateTracker::default())), ["a"]);

        view.text = "hk-01".to_string();
        assert_eq!(ids(&view.apply(&conns, &[], &RateTracker::default())), ["a"]);

        view.text = "udp".to_string();
        assert_eq!(ids(&view.apply(&conns, &[], &RateTracker::default())), ["b"]);

        view.text = "192.168.1.2:50000".to_string();
        assert_eq!(view.apply(&conns, &[], &RateTracker::default()).len(), 2);
    }

    #[test]
    fn closed_filter_reads_the_closed_list() {
        let active = vec![full("a", "x", "tcp", "", &[])];
        let closed = vec![full("z", "y", "tcp", "", &[])];
        let mut view = ConnView::default();
        view.toggle_filter();
        assert_eq!(ids(&view.apply(&active, &closed, &RateTracker::default())), ["z"]);
    }

    #[test]
    fn speed_sort_uses_the_rate_tracker() {
        let t0 = Instant::now();
        let mut rates = RateTracker::default();
        rates.update(&[conn("slow", 0, 0, &[]), conn("fast", 0, 0, &[])], t0);
        let now = vec![conn("slow", 10, 0, &[]), conn("fast", 1000, 0, &[])];
        rates.update(&now, t0 + Duration::from_secs(1));

        let mut view = ConnView::default();
        view.sort_by(SortKey::UpSpeed);
        assert_eq!(ids(&view.apply(&now, &[], &rates)), ["fast", "slow"]);
        view.sort_by(SortKey::UpSpeed);
        assert_eq!(ids(&view.apply(&now, &[], &rates)), ["slow", "fast"]);
    }

    #[test]
    fn sort_keys_cycle_both_ways() {
        assert_eq!(SortKey::Type.next(), SortKey::Source);
        assert_eq!(SortKey::Source.prev(), SortKey::Type);
        assert_eq!(SortKey::Host.next(), SortKey::Proxy);
    }

    #[test]
    fn display_helpers() {
        let c = full("a", "", "tcp", "", &["HK-01", "Proxy"]);
        assert_eq!(destination(&c), "93.184.216.34:443");
        assert_eq!(proxy_chain(&c), "Proxy → HK-01");
        assert_eq!(network(&c), "TCP");

        let mut named = c.clone();
        named.metadata.host = "example.com".into();
        named.metadata.destination_port = String::new();
        assert_eq!(destination(&named), "example.com");
    }

    #[test]
    fn rule_set_extracts_names() {
        let mut c = conn("a", 0, 0, &[]);
        c.rule = "rule_set=[geosite-cn geoip-cn] => route(direct)".into();
        assert_eq!(rule_set(&c), "geosite-cn geoip-cn");

        c.rule = "rule_set=ads => reject".into();
        assert_eq!(rule_set(&c), "ads");

        c.rule = "DomainSuffix".into();
        assert_eq!(rule_set(&c), "DomainSuffix");
    }

    #[test]
    fn age_buckets() {
        let now: DateTime<Utc> = "2024-01-02T00:00:00Z".parse().unwrap();
        let mut c = conn("a", 0, 0, &[]);

        c.start = "2024-01-01T23:59:30Z".into();
        assert_eq!(age(&c, now), "30s ago");
        c.start = "2024-01-01T23:15:00Z".into();
        assert_eq!(age(&c, now), "45m ago");
        c.start = "2024-01-01T21:00:00Z".into();
        assert_eq!(age(&c, now), "3h ago");
        c.start = "2023-12-30T00:00:00Z".into();
        assert_eq!(age(&c, now), "3d ago");
        c.start = String::new();
        assert_eq!(age(&c, now), "—");
    }
}
