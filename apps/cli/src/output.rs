//! Output formatting utilities

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format speed as human-readable
pub fn format_speed(kbps: u64) -> String {
    format!("{}/s", human_bytes::human_bytes((kbps * 1024) as f64))
}
