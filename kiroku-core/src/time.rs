//! Event timestamps and wall-clock helpers.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Event time with nanosecond precision, as carried by the forward
/// protocol's ext-encoded timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTime {
    pub secs: u32,
    pub nanos: u32,
}

impl EventTime {
    pub fn new(secs: u32, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: since_epoch.as_secs() as u32,
            nanos: since_epoch.subsec_nanos(),
        }
    }
}

/// Timestamp attached to a buffered record: plain epoch seconds or an
/// [`EventTime`] when sub-second precision matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Unix(i64),
    EventTime(EventTime),
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Timestamp::Unix(secs)
    }
}

impl From<EventTime> for Timestamp {
    fn from(time: EventTime) -> Self {
        Timestamp::EventTime(time)
    }
}

/// Wall-clock milliseconds since the epoch
#[inline]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
