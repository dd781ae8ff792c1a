//! Human-readable byte counts

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format `bytes` with 1024-based units, one decimal above plain bytes.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
