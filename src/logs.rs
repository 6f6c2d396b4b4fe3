// ============================================================================
// Log tail
// ============================================================================

use chrono::{DateTime, Local};
use regex::Regex;
use std::{collections::VecDeque, sync::OnceLock};

use crate::api::LogEvent;

pub const LOG_LIMIT: usize = 5000;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Receive time, `YY-MM-DD HH:MM:SS`.
    pub time: String,
    pub level: String,
    pub payload: String,
}

impl LogEntry {
    fn line(&self) -> String {
        format!("[{}] [{}] {}", self.time, self.level, self.payload)
    }
}

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([^\]]+)\]\s*\[([A-Z]+)\]\s*(.*)$").expect("valid regex"))
}

/// Splits `[time] [LEVEL] message` payloads; anything else keeps the frame's
/// own level.
pub fn parse_entry(event: &LogEvent, received: DateTime<Local>) -> LogEntry {
    let payload = event.payload_text();
    let time = received.format("%y-%m-%d %H:%M:%S").to_string();

    if let Some(caps) = line_re().captures(&payload) {
        return LogEntry {
            time,
            level: caps[2].to_lowercase(),
            payload: caps[3].to_string(),
        };
    }

    LogEntry {
        time,
        level: event.level.clone().unwrap_or_else(|| "info".to_string()),
        payload,
    }
}

/// Newest-first buffer of parsed log lines.
#[derive(Debug)]
pub struct LogTail {
    entries: VecDeque<LogEntry>,
    limit: usize,
    paused: bool,
    pub filter: String,
}

impl Default for LogTail {
    fn default() -> Self {
        Self::with_limit(LOG_LIMIT)
    }
}

impl LogTail {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
            paused: false,
            filter: String::new(),
        }
    }

    /// Frames arriving while paused are discarded, not queued.
    pub fn push(&mut self, event: &LogEvent, received: DateTime<Local>) {
        if self.paused {
            return;
        }
        self.entries.push_front(parse_entry(event, received));
        self.entries.truncate(self.limit);
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn visible(&self) -> Vec<&LogEntry> {
        let needle = self.filter.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|e| needle.is_empty() || e.line().to_lowercase().contains(&needle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(level: Option<&str>, payload: &str) -> LogEvent {
        LogEvent {
            level: level.map(str::to_string),
            payload: serde_json::Value::String(payload.to_string()),
        }
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
    }

    #[test]
    fn bracketed_payload_is_split() {
        let entry = parse_entry(&event(Some("info"), "[TCP] [WARN] dial failed"), at());
        assert_eq!(entry.level, "warn");
        assert_eq!(entry.payload, "dial failed");
        assert_eq!(entry.time, "24-03-09 07:05:01");
    }

    #[test]
    fn plain_payload_keeps_frame_level() {
        let entry = parse_entry(&event(Some("debug"), "[TCP] 10.0.0.1 --> x.com"), at());
        assert_eq!(entry.level, "debug");
        assert_eq!(entry.payload, "[TCP] 10.0.0.1 --> x.com");

        let untyped = parse_entry(&event(None, "hello"), at());
        assert_eq!(untyped.level, "info");
    }

    #[test]
    fn non_string_payload_is_stringified() {
        let ev = LogEvent {
            level: None,
            payload: serde_json::json!(42),
        };
        assert_eq!(parse_entry(&ev, at()).payload, "42");
    }

    #[test]
    fn newest_first_and_capped() {
        let mut tail = LogTail::with_limit(3);
        for i in 0..5 {
            tail.push(&event(None, &format!("line {}", i)), at());
        }
        let lines: Vec<_> = tail.visible().iter().map(|e| e.payload.clone()).collect();
        assert_eq!(lines, ["line 4", "line 3", "line 2"]);
    }

    #[test]
    fn paused_tail_drops_frames() {
        let mut tail = LogTail::default();
        assert!(tail.toggle_pause());
        tail.push(&event(None, "ignored"), at());
        assert_eq!(tail.len(), 0);
        assert!(!tail.toggle_pause());
        tail.push(&event(None, "kept"), at());
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn filter_matches_level_and_time_too() {
        let mut tail = LogTail::default();
        tail.push(&event(Some("error"), "boom"), at());
        tail.push(&event(Some("info"), "fine"), at());

        tail.filter = "[ERROR]".to_string();
        assert_eq!(tail.visible().len(), 1);
        tail.filter = "24-03-09".to_string();
        assert_eq!(tail.visible().len(), 2);
    }
}
