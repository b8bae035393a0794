// Ride Tracker - Main Entry Point

use clap::Parser;
use ride_tracker::config::{Config, TrackerConfig};
use ride_tracker::tracker::{RideTracker, TrackerEvent};
use tokio::signal;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    info!("Starting ride tracker");
    info!("Endpoint: {}", config.endpoint);
    info!("Ride: {} (user {}, role {})", config.ride_id, config.user_id, config.role);

    let (mut tracker, mut events) = RideTracker::new(config.endpoint.clone(), TrackerConfig::default());
    tracker.connect().await?;
    tracker.join_room(config.ride_id, config.user_id, &config.role);

    if config.synthetic {
        info!("Synthetic feed enabled");
        tracker.start_synthetic_feed(config.ride_id, config.user_id);
    }

    // Consume tracker events until shutdown (Ctrl+C) or terminal failure
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
                    Err(err) => {
                        error!("Unable to listen for shutdown signal: {}", err);
                        tracker.disconnect().await;
                        return Err(err.into());
                    }
                }
                break;
            }
            event = events.recv() => {
                match event {
                    Some(TrackerEvent::Location(update)) => {
                        info!(
                            "position: {:.4}, {:.4} (speed {:?})",
                            update.latitude, update.longitude, update.speed
                        );
                    }
                    Some(TrackerEvent::Advisory { message }) => {
                        warn!("server advisory: {}", message);
                    }
                    Some(TrackerEvent::ReconnectExhausted) => {
                        error!("Reconnect attempts exhausted, giving up");
                        break;
                    }
                    Some(event) => debug!("tracker event: {:?}", event),
                    None => break,
                }
            }
        }
    }

    // Graceful shutdown
    info!("Shutting down...");
    if tracker.is_connected() {
        tracker.leave_room(config.ride_id, config.user_id);
    }
    tracker.disconnect().await;
    info!("Tracker stopped");

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_span_events(if verbose {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    if verbose {
        subscriber
            .with_max_level(tracing::Level::DEBUG)
            .init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber
            .with_max_level(tracing::Level::INFO)
            .init();
    }
}
