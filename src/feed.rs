// Synthetic feed generator
// Deterministic cyclic coordinate source for exercising the pipeline
// when no live feed is present

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::net::frames::RawLocationUpdate;

/// Fixed route the generator cycles through (a loop around central Karachi).
pub const ROUTE: [(f64, f64); 6] = [
    (24.8607, 67.0011),
    (24.8615, 67.0099),
    (24.8662, 67.0182),
    (24.8721, 67.0301),
    (24.8810, 67.0418),
    (24.8934, 67.0281),
];

/// Speed tagged onto every synthetic update, km/h.
const SYNTHETIC_SPEED: f64 = 32.0;

/// Route entry for a monotonically increasing tick index, wrapping modulo
/// the route length.
pub fn route_point(index: u64) -> (f64, f64) {
    ROUTE[(index % ROUTE.len() as u64) as usize]
}

/// Build the raw payload for one tick, tagged so it passes the relevance
/// check for the ride being tracked.
pub fn synthetic_update(index: u64, ride_id: i64, user_id: i64) -> RawLocationUpdate {
    let (lat, lon) = route_point(index);
    RawLocationUpdate {
        lat: Some(Value::from(lat)),
        long: Some(Value::from(lon)),
        lng: None,
        ride_id: Some(ride_id),
        user_id: Some(user_id),
        speed: Some(SYNTHETIC_SPEED),
    }
}

/// Timer-driven generator producing one update per tick into a channel.
///
/// Starting while already running restarts cleanly; `stop` cancels the
/// timer task so nothing is left scheduled.
pub struct SyntheticFeed {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl SyntheticFeed {
    pub fn new(interval: Duration) -> Self {
        SyntheticFeed {
            interval,
            task: None,
        }
    }

    /// Start ticking, replacing any previous run. Returns the receiving
    /// end of the update stream.
    pub fn start(&mut self, ride_id: i64, user_id: i64) -> mpsc::Receiver<RawLocationUpdate> {
        self.stop();

        let (tx, rx) = mpsc::channel(16);
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut index: u64 = 0;
            loop {
                ticker.tick().await;
                let update = synthetic_update(index, ride_id, user_id);
                index += 1;
                if tx.send(update).await.is_err() {
                    // Consumer is gone, nothing left to feed
                    break;
                }
            }
        }));
        debug!("synthetic feed started for ride {} (every {:?})", ride_id, self.interval);
        rx
    }

    /// Cancel the timer task. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("synthetic feed stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SyntheticFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
