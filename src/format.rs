// ============================================================================
// Unit formatting
// ============================================================================

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * KB;
const GB: f64 = 1024.0 * MB;

pub fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if bytes == 0 {
        "0 B".to_string()
    } else if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.1} GB", b / GB)
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    // Rounded before picking the unit: 1023.6 is 1.0 KB/s.
    let n = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec.round()
    } else {
        0.0
    };

    if n < KB {
        format!("{} B/s", n as u64)
    } else if n < MB {
        format!("{:.1} KB/s", n / KB)
    } else if n < GB {
        format!("{:.1} MB/s", n / MB)
    } else {
        format!("{:.1} GB/s", n / GB)
    }
}

/// Memory readings are shown in whole units.
pub fn format_memory(bytes: f64) -> String {
    if bytes < KB {
        format!("{} B", bytes.max(0.0).round() as u64)
    } else if bytes < MB {
        format!("{} KB", (bytes / KB).round() as u64)
    } else if bytes < GB {
        format!("{} MB", (bytes / MB).round() as u64)
    } else {
        format!("{} GB", (bytes / GB).round() as u64)
    }
}

pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}…", kept)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pick_the_largest_unit() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn speed_rounds_below_one_kilobyte() {
        assert_eq!(format_speed(0.0), "0 B/s");
        assert_eq!(format_speed(-10.0), "0 B/s");
        assert_eq!(format_speed(99.6), "100 B/s");
        assert_eq!(format_speed(2048.0), "2.0 KB/s");
        assert_eq!(format_speed(f64::NAN), "0 B/s");
        assert_eq!(format_speed(1023.4), "1023 B/s");
        assert_eq!(format_speed(1023.6), "1.0 KB/s");
    }

    #[test]
    fn memory_uses_whole_units() {
        assert_eq!(format_memory(100.0), "100 B");
        assert_eq!(format_memory(40.0 * 1024.0 * 1024.0), "40 MB");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("abcdefghij", 5), "abcd…");
        assert_eq!(truncate_str("香港节点一号", 4), "香港节…");
    }
}
