use serde::{Deserialize, Serialize};

/// `[session]`: credentials replayed by the bundled static session layer.
///
/// A real chat client obtains these from its own gateway; the CLI driver
/// takes them from the config file instead.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
    /// Seconds to stay in the channel after the play queue drains.
    #[serde(default = "default_idle_leave_secs")]
    pub idle_leave_secs: u64,
}

fn default_idle_leave_secs() -> u64 {
    1
}
