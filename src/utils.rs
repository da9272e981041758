use chrono::{DateTime, FixedOffset, Local};

/// Returns the current local wall-clock time.
pub fn get_time() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}
