use crate::model::Datagram;

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Odometer deltas below this are treated as missing odometer data.
pub const MIN_ODOMETER_DELTA_KM: f64 = 0.01;

/// Observations at or above this speed are discarded as GPS/odometer noise.
pub const MAX_PLAUSIBLE_SPEED_KMH: f64 = 120.0;

/// Great-circle distance in km between two GPS fixes given in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Distance between two samples: odometer delta, falling back to the
/// GPS great-circle distance when the odometer barely moved.
pub fn segment_distance_km(prev: &Datagram, curr: &Datagram) -> f64 {
    let odometer_km = (curr.odometer_meters - prev.odometer_meters).abs() / 1000.0;
    if odometer_km < MIN_ODOMETER_DELTA_KM {
        haversine_km(prev.latitude, prev.longitude, curr.latitude, curr.longitude)
    } else {
        odometer_km
    }
}

/// Absolute time between samples in hours, `None` if either timestamp is missing.
pub fn elapsed_hours(prev: &Datagram, curr: &Datagram) -> Option<f64> {
    let (start, end) = (prev.sample_time?, curr.sample_time?);
    Some((end - start).num_seconds().abs() as f64 / 3600.0)
}

/// Speed in km/h between two samples. Defined only for positive time and distance.
pub fn instantaneous_speed(prev: &Datagram, curr: &Datagram) -> Option<f64> {
    let hours = elapsed_hours(prev, curr)?;
    let distance = segment_distance_km(prev, curr);
    if hours <= 0.0 || distance <= 0.0 || !distance.is_finite() {
        return None;
    }
    Some(distance / hours)
}

/// [`instantaneous_speed`] restricted to the plausible open range (0, 120) km/h.
pub fn plausible_speed(prev: &Datagram, curr: &Datagram) -> Option<f64> {
    instantaneous_speed(prev, curr).filter(|&s| s > 0.0 && s < MAX_PLAUSIBLE_SPEED_KMH)
}
