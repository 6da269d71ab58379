use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionStatus;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
    RoundClosed(RoundClosed),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub session_id: String,
    pub status: SessionStatus,
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

/// The time window ran out; the session is (or is about to be) paused.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeExpired {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// The session left the running state for a reason other than the clock.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoundClosed {
    pub session_id: String,
    pub status: SessionStatus,
    pub timestamp: DateTime<Utc>,
}

impl TimerEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimeExpired(_) => "time-expired",
            TimerEvent::RoundClosed(_) => "round-closed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, TimerEvent::TimerTick(_))
    }
}
