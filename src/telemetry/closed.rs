use std::collections::HashSet;

use crate::api::Connection;

/// Closed connections kept for display.
pub const CLOSED_LIMIT: usize = 99;

/// Rebuilds closed-connection history by diffing successive snapshots.
#[derive(Debug, Default)]
pub struct ClosedTracker {
    previous: Vec<Connection>,
    closed: Vec<Connection>,
    /// Every close observed, including those that fell off the list.
    seen: usize,
}

impl ClosedTracker {
    /// Anything in the previous snapshot but not in `active` has closed;
    /// those go to the front, and the list is capped at `CLOSED_LIMIT`.
    pub fn update(&mut self, active: &[Connection]) {
        let ids: HashSet<&str> = active.iter().map(|c| c.id.as_str()).collect();
        let mut newly_closed: Vec<Connection> = self
            .previous
            .drain(..)
            .filter(|c| !ids.contains(c.id.as_str()))
            .collect();

        if !newly_closed.is_empty() {
            self.seen += newly_closed.len();
            newly_closed.append(&mut self.closed);
            newly_closed.truncate(CLOSED_LIMIT);
            self.closed = newly_closed;
        }
        self.previous = active.to_vec();
    }

    pub fn closed(&self) -> &[Connection] {
        &self.closed
    }

    pub fn label(&self) -> String {
        if self.seen > CLOSED_LIMIT {
            format!("{}+", CLOSED_LIMIT)
        } else {
            self.seen.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::conn;

    fn ids(conns: &[Connection]) -> Vec<&str> {
        conns.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn vanished_connections_become_closed() {
        let mut tracker = ClosedTracker::default();
        tracker.update(&[conn("a", 0, 0, &[]), conn("b", 0, 0, &[])]);
        assert!(tracker.closed().is_empty());

        tracker.update(&[conn("b", 0, 0, &[])]);
        assert_eq!(ids(tracker.closed()), ["a"]);

        tracker.update(&[]);
        assert_eq!(ids(tracker.closed()), ["b", "a"]);
        assert_eq!(tracker.label(), "2");
    }

    #[test]
    fn closed_entries_keep_their_last_counters() {
        let mut tracker = ClosedTracker::default();
        tracker.update(&[conn("a", 10, 20, &[])]);
        tracker.update(&[conn("a", 30, 40, &[])]);
        tracker.update(&[]);
        assert_eq!(tracker.closed()[0].upload, 30);
        assert_eq!(tracker.closed()[0].download, 40);
    }

    #[test]
    fn history_is_capped() {
        let mut tracker = ClosedTracker::default();
        for round in 0..3 {
            let batch: Vec<Connection> = (0..50)
                .map(|i| conn(&format!("{}-{}", round, i), 0, 0, &[]))
                .collect();
            tracker.update(&batch);
            tracker.update(&[]);
        }
        assert_eq!(tracker.closed().len(), CLOSED_LIMIT);
        assert_eq!(tracker.closed()[0].id, "2-0");
        assert_eq!(tracker.label(), "99+");
    }
}
