//! Canonical record identifiers shared across the workspace.
//!
//! Thread records carry the thread id as a little-endian `u32`. Alarm records
//! append the wake deadline as a little-endian `u64`.

/// Thread lifecycle record identifiers.
pub mod thread {
    /// Thread moved to the ready state.
    pub const READY: u8 = 1;
    /// Thread dispatched and running.
    pub const RUNNING: u8 = 2;
    /// Thread blocked in `sleep`.
    pub const BLOCKED: u8 = 3;
    /// Thread finishing; its context is reclaimed by the next thread.
    pub const FINISHING: u8 = 4;
    /// Ready queue empty, the idle thread was selected.
    pub const IDLE: u8 = 5;
}

/// Alarm record identifiers.
pub mod alarm {
    /// Thread registered a wake deadline and went to sleep.
    pub const SLEEP: u8 = 16;
    /// Deadline passed, thread woken by the timer interrupt.
    pub const WAKE: u8 = 17;
}

/// Human readable name of a record identifier.
pub fn name(record_type: u8) -> &'static str {
    match record_type {
        thread::READY => "READY",
        thread::RUNNING => "RUNNING",
        thread::BLOCKED => "BLOCKED",
        thread::FINISHING => "FINISHING",
        thread::IDLE => "IDLE",
        alarm::SLEEP => "ALARM_SLEEP",
        alarm::WAKE => "ALARM_WAKE",
        _ => "UNKNOWN",
    }
}
