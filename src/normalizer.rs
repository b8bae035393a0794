// Location update normalizer
// Validates and canonicalizes raw feed payloads before they reach the map

use std::time::SystemTime;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::net::frames::RawLocationUpdate;
use crate::tracker::RoomMembership;

/// A validated location update, ready for the map view.
#[derive(Debug, Clone)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported speed, if present and non-negative.
    pub speed: Option<f64>,
    /// Local receipt time. The producer's clock is not trusted.
    pub received_at: SystemTime,
}

/// Why a raw payload was dropped. Diagnostics only, never an error the
/// caller has to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("no ride room is being tracked")]
    NoActiveRoom,
    #[error("update is for ride {got}, tracking ride {want}")]
    RideMismatch { got: i64, want: i64 },
    #[error("coordinate carries the placeholder sentinel")]
    Placeholder,
    #[error("coordinate does not parse to a finite number")]
    Unparsable,
    #[error("both coordinates are exactly zero (no real fix yet)")]
    ZeroFix,
    #[error("coordinate outside valid latitude/longitude range")]
    OutOfRange,
}

/// The upstream feed writes the field's own name into the field while it
/// has no data yet.
fn is_placeholder(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == "lat" || s == "long" || s == "lng")
}

/// Parse a coordinate that arrives as a JSON number or a numeric string.
fn parse_coord(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Validate a raw payload against the current room membership.
///
/// Checks run in a fixed order; the first failing check drops the update.
/// The ride relevance filter and the both-zero rule are the only defense
/// against cross-talk between rides sharing the channel, so they are
/// applied exactly as specified: an update with no ride tag is accepted
/// under any existing membership, and (0, 0) is "no fix", not a position
/// off the coast of West Africa.
pub fn normalize(
    raw: &RawLocationUpdate,
    membership: Option<&RoomMembership>,
) -> Result<LocationUpdate, DropReason> {
    // 1. Relevance
    let membership = membership.ok_or(DropReason::NoActiveRoom)?;
    if let Some(ride_id) = raw.ride_id {
        if ride_id != membership.ride_id {
            return Err(DropReason::RideMismatch {
                got: ride_id,
                want: membership.ride_id,
            });
        }
    }

    // 2. Placeholder sentinels
    if raw.lat.as_ref().is_some_and(is_placeholder) {
        return Err(DropReason::Placeholder);
    }
    let lon_raw = raw.long.as_ref().or(raw.lng.as_ref());
    if lon_raw.is_some_and(is_placeholder) {
        return Err(DropReason::Placeholder);
    }

    // 3. Extraction: lat from `lat`; lon from `long`, else `lng`, else 0
    let latitude = raw
        .lat
        .as_ref()
        .and_then(parse_coord)
        .ok_or(DropReason::Unparsable)?;
    let longitude = match lon_raw {
        Some(value) => parse_coord(value).ok_or(DropReason::Unparsable)?,
        None => 0.0,
    };

    // 4. Validity
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(DropReason::Unparsable);
    }
    if latitude == 0.0 && longitude == 0.0 {
        return Err(DropReason::ZeroFix);
    }
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(DropReason::OutOfRange);
    }

    // 5. Acceptance
    let speed = match raw.speed {
        Some(s) if s >= 0.0 => Some(s),
        Some(s) => {
            debug!("discarding negative speed {} from update", s);
            None
        }
        None => None,
    };

    Ok(LocationUpdate {
        latitude,
        longitude,
        speed,
        received_at: SystemTime::now(),
    })
}
