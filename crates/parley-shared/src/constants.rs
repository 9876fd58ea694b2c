/// How long a typing indicator stays active after the last keystroke (ms)
pub const TYPING_WINDOW_MS: i64 = 2_500;

/// Minimum spacing clients should keep between typing refreshes (ms)
pub const TYPING_REFRESH_MIN_MS: i64 = 1_000;

/// A user counts as online while their last heartbeat is younger than this (ms)
pub const ONLINE_THRESHOLD_MS: i64 = 60_000;

/// Interval at which clients are expected to send presence heartbeats (secs)
pub const PRESENCE_HEARTBEAT_SECS: u64 = 30;

/// Maximum simultaneous reactions a single user may hold on one message
pub const MAX_REACTIONS_PER_USER: usize = 2;

/// Maximum number of hits returned by a message search
pub const SEARCH_RESULT_LIMIT: usize = 20;

/// Upper bound on identity-provider subject length
pub const MAX_USER_ID_LEN: usize = 256;

/// Capacity of the change-event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
