/// Mean Earth radius used for every distance in the crate.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub struct GeoHelper;

impl GeoHelper {
    /// Great-circle distance in kilometres between two lat/lng points (degrees).
    pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
        let d_lat = (lat2 - lat1).to_radians();
        let d_lng = (lng2 - lng1).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }

    pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
        Self::haversine_km(lat1, lng1, lat2, lng2) * 1000.0
    }

    /// Moves a point north/east by the given metres. Small-distance approximation.
    pub fn offset_m(lat: f64, lng: f64, north_m: f64, east_m: f64) -> (f64, f64) {
        let d_lat = north_m / (EARTH_RADIUS_KM * 1000.0);
        let d_lng = east_m / (EARTH_RADIUS_KM * 1000.0 * lat.to_radians().cos());
        (lat + d_lat.to_degrees(), lng + d_lng.to_degrees())
    }
}
