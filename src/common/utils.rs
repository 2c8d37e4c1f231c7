//! Utility functions for blobsync

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Milliseconds since the epoch for a file modification time.
pub fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Two-level directory bucket for a blob key, so that no directory
/// grows unboundedly.
pub fn blob_bucket(key: &str) -> (String, String) {
    let hash = blake3::hash(key.as_bytes());
    let bytes = hash.as_bytes();
    (format!("{:02x}", bytes[0]), format!("{:02x}", bytes[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_blob_bucket_is_stable() {
        let (a1, b1) = blob_bucket("topo-1-stormjar.jar");
        let (a2, b2) = blob_bucket("topo-1-stormjar.jar");
        assert_eq!((a1.as_str(), b1.as_str()), (a2.as_str(), b2.as_str()));
        assert_eq!(a1.len(), 2);
        assert_eq!(b1.len(), 2);
    }

    #[test]
    fn test_system_time_millis() {
        let t = UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(system_time_millis(t), 1_500);
        assert!(timestamp_now_millis() > 0);
    }
}
