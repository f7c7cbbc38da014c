//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Sockets owned by this process.
    pub connections: usize,
    /// Events waiting in the bus queue; `None` if the queue could not be read.
    pub pending_events: Option<i64>,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, pending_events: Option<i64>) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        pending_events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_increases() {
        let start = Instant::now().checked_sub(std::time::Duration::from_secs(60)).unwrap();
        let resp = health_check(start, 0, Some(0));
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 2, None);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert!(parsed["pending_events"].is_null());
        assert!(parsed["uptime_secs"].is_number());
    }
}
