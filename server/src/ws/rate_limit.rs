//! Per-connection inbound rate limiting.
//!
//! Fixed-window counter keyed by connection id. Windows self-expire by
//! wall-clock comparison, so there are no timers to clean up; the state
//! itself is released in `remove` when the connection unregisters.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::ConnectionId;

/// Inbound event budget for a single connection.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Window length.
    pub window: Duration,
    /// Events allowed per window.
    pub max_events: u32,
    /// Close the connection after this many consecutive rejected events.
    /// None = drop events but keep the connection open.
    pub disconnect_after_violations: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1000),
            max_events: 10,
            disconnect_after_violations: None,
        }
    }
}

/// Counter state for one connection. Only the owning connection's reader
/// loop touches it, so entries never contend across connections.
#[derive(Debug)]
struct RateState {
    count: u32,
    window_reset_at: Instant,
    consecutive_violations: u32,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    states: DashMap<ConnectionId, RateState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Account one inbound event; returns true if it must be dropped.
    /// One call = at most one increment.
    pub fn should_reject(&self, connection_id: ConnectionId) -> bool {
        let now = Instant::now();
        let mut state = self.states.entry(connection_id).or_insert_with(|| RateState {
            count: 0,
            window_reset_at: now + self.config.window,
            consecutive_violations: 0,
        });

        if now >= state.window_reset_at {
            // First event of a new window
            state.count = 1;
            state.window_reset_at = now + self.config.window;
            state.consecutive_violations = 0;
            return false;
        }

        state.count += 1;
        if state.count > self.config.max_events {
            state.consecutive_violations += 1;
            true
        } else {
            state.consecutive_violations = 0;
            false
        }
    }

    /// Whether the configured violation policy says this connection should
    /// be closed. Only meaningful right after a rejected event.
    pub fn exceeded_violation_limit(&self, connection_id: ConnectionId) -> bool {
        let Some(limit) = self.config.disconnect_after_violations else {
            return false;
        };
        self.states
            .get(&connection_id)
            .map(|state| state.consecutive_violations >= limit)
            .unwrap_or(false)
    }

    /// Drop the state for a closed connection.
    pub fn remove(&self, connection_id: ConnectionId) {
        self.states.remove(&connection_id);
    }
}
