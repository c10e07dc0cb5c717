use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Tick interval for a tick rate in Hz, None when the rate is zero
pub fn tick_interval(tick_rate: u32) -> Option<Duration> {
    if tick_rate == 0 {
        None
    } else {
        Some(Duration::from_secs_f64(1.0 / tick_rate as f64))
    }
}
