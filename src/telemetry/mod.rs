//! Reducers that turn raw stream frames into what the views draw.

mod closed;
mod history;
mod rates;
mod usage;

pub use closed::ClosedTracker;
pub use history::History;
pub use rates::{ProxyRateTracker, RateTracker};
pub use usage::UsageStats;

use crate::api::{ConnectionsSnapshot, Memory, Traffic};

/// Numbers shown on the status cards.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatusSummary {
    pub connections: usize,
    pub upload_total: u64,
    pub download_total: u64,
    pub speed: Traffic,
    pub memory: u64,
}

impl StatusSummary {
    pub fn apply_connections(&mut self, snap: &ConnectionsSnapshot) {
        self.connections = snap.connections.len();
        self.upload_total = snap.upload_total;
        self.download_total = snap.download_total;
    }

    pub fn apply_traffic(&mut self, traffic: &Traffic) {
        self.speed = *traffic;
    }

    pub fn apply_memory(&mut self, memory: &Memory) {
        self.memory = memory.inuse;
    }
}

#[cfg(test)]
pub(crate) fn conn(id: &str, upload: u64, download: u64, chains: &[&str]) -> crate::api::Connection {
    crate::api::Connection {
        id: id.to_string(),
        upload,
        download,
        chains: chains.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_tracks_latest_frames() {
        let mut summary = StatusSummary::default();
        summary.apply_connections(&ConnectionsSnapshot {
            upload_total: 100,
            download_total: 200,
            connections: vec![conn("a", 0, 0, &[]), conn("b", 0, 0, &[])],
        });
        summary.apply_traffic(&Traffic { up: 5, down: 6 });
        summary.apply_memory(&Memory {
            inuse: 1024,
            oslimit: 0,
        });

        assert_eq!(summary.connections, 2);
        assert_eq!(summary.download_total, 200);
        assert_eq!(summary.speed, Traffic { up: 5, down: 6 });
        assert_eq!(summary.memory, 1024);
    }
}
