use std::path::PathBuf;
use std::time::Duration;

/// Get the default path for the server's JSON snapshot
pub fn default_data_path() -> PathBuf {
    // Use XDG data directory if available, otherwise fallback to ~/.local/share
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local/share")
        });
    data_dir.join("scenesync").join("store.json")
}

/// Configuration for the room server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Global ceiling on live connections. Extra connections are closed at once.
    pub max_connections: usize,
    /// Optional ceiling on connections per room, checked on join
    pub max_room_members: Option<usize>,
    /// Trailing-edge window for per-object update writes
    pub object_debounce: Duration,
    /// Trailing-edge window for per-session cursor writes
    pub cursor_debounce: Duration,
    /// Sessions not seen for this long are swept from the store
    pub stale_timeout: Duration,
    /// Chance that a cursor update triggers a stale-session sweep
    pub stale_sweep_probability: f64,
    /// Per-connection queue of outgoing messages
    pub outbox_capacity: usize,
    /// Where the store snapshot lives, if persisted
    pub data_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 256,
            max_room_members: None,
            object_debounce: Duration::from_millis(16),
            cursor_debounce: Duration::from_millis(100),
            stale_timeout: Duration::from_secs(5 * 60),
            stale_sweep_probability: 0.01,
            outbox_capacity: 256,
            data_path: None,
        }
    }
}
