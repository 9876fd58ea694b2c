use chrono::Duration;

use parley_shared::constants::{
    MAX_REACTIONS_PER_USER, ONLINE_THRESHOLD_MS, SEARCH_RESULT_LIMIT, TYPING_WINDOW_MS,
};

/// Tunables of the consistency model.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Lifetime of a typing indicator after its last refresh.
    pub typing_window: Duration,
    /// A heartbeat younger than this marks a user online.
    pub online_threshold: Duration,
    /// Oldest reaction is evicted past this many per user and message.
    pub max_reactions_per_user: usize,
    /// Cap on search hits.
    pub search_limit: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            typing_window: Duration::milliseconds(TYPING_WINDOW_MS),
            online_threshold: Duration::milliseconds(ONLINE_THRESHOLD_MS),
            max_reactions_per_user: MAX_REACTIONS_PER_USER,
            search_limit: SEARCH_RESULT_LIMIT,
        }
    }
}
