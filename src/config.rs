use std::time::Duration;

use clap::Parser;

/// Default timeout for establishing the feed connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Fixed delay between automatic reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Maximum consecutive reconnect attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Tick interval of the synthetic feed generator.
pub const FEED_INTERVAL: Duration = Duration::from_secs(3);
/// How long `disconnect()` waits for the I/O loop before aborting it.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
/// Capacity of the tracker event channel.
pub const EVENT_CAPACITY: usize = 64;

/// Ride Tracker Configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Real-time feed endpoint to connect to.
    #[arg(long, value_name = "HOST:PORT")]
    pub endpoint: String,

    /// Ride to track.
    #[arg(long, value_name = "ID")]
    pub ride_id: i64,

    /// Principal on whose behalf tracking occurs.
    #[arg(long, value_name = "ID")]
    pub user_id: i64,

    /// Role tag sent with the join request.
    #[arg(long, default_value = "admin")]
    pub role: String,

    /// Generate a synthetic location feed instead of relying on live traffic.
    #[arg(long, default_value_t = false)]
    pub synthetic: bool,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

/// Timing and sizing knobs for the tracking client.
///
/// Defaults carry the protocol constants; tests shrink them to keep
/// reconnect/feed scenarios fast.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Timeout for the initial TCP connect.
    pub connect_timeout: Duration,
    /// Delay before each automatic reconnect attempt.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts tolerated before reconnection stops.
    pub max_reconnect_attempts: u32,
    /// Synthetic feed tick interval.
    pub feed_interval: Duration,
    /// Grace period for the I/O loop to exit on `disconnect()`.
    pub shutdown_timeout: Duration,
    /// Capacity of the event channel handed to the caller.
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            connect_timeout: CONNECT_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            feed_interval: FEED_INTERVAL,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            event_capacity: EVENT_CAPACITY,
        }
    }
}
