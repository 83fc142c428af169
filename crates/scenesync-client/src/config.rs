use std::time::Duration;

/// Shortest tick any client timer runs at. Tokio intervals reject zero.
pub(crate) const MIN_TICK: Duration = Duration::from_millis(1);

/// Client-side tuning
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a remote transform or color change takes to settle
    pub interpolation_duration: Duration,
    /// Tick rate of interpolation drivers
    pub frame_interval: Duration,
    /// Transform changes at or below this are applied without interpolation
    pub position_epsilon: f64,
    /// How often a held join request re-checks its preconditions
    pub join_poll_interval: Duration,
    /// Oldest history entries are dropped past this depth
    pub history_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interpolation_duration: Duration::from_millis(60),
            frame_interval: Duration::from_millis(16),
            position_epsilon: 0.001,
            join_poll_interval: Duration::from_millis(100),
            history_depth: 100,
        }
    }
}
