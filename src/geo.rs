//! Fixed-point coordinates and the spherical geometry used by the
//! intersection heuristics.
//!
//! Coordinates are stored as signed 32-bit integers in 1e-6 degree units,
//! the precision of the upstream extraction artifacts. Everything here uses
//! great-circle approximations; that is sufficient for angle and parallelism
//! judgments at intersection scale.

/// Node identifier in the node-based graph.
pub type NodeId = u32;
/// Edge identifier in the node-based graph.
pub type EdgeId = u32;

/// Sentinel node id ("no node"). Also marks dummy slots in the dynamic graph.
pub const SPECIAL_NODE_ID: NodeId = u32::MAX;
/// Sentinel edge id ("no edge").
pub const SPECIAL_EDGE_ID: EdgeId = u32::MAX;

/// Fixed-point coordinate units per degree.
pub const COORDINATE_PRECISION: f64 = 1e6;

const EARTH_RADIUS_M: f64 = 6_372_797.560856;

/// A longitude/latitude pair in 1e-6 degree fixed-point units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FixedCoordinate {
    pub lon: i32,
    pub lat: i32,
}

impl FixedCoordinate {
    pub fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    pub fn from_degrees(lon_deg: f64, lat_deg: f64) -> Self {
        Self {
            lon: (lon_deg * COORDINATE_PRECISION).round() as i32,
            lat: (lat_deg * COORDINATE_PRECISION).round() as i32,
        }
    }

    pub fn lon_deg(&self) -> f64 {
        f64::from(self.lon) / COORDINATE_PRECISION
    }

    pub fn lat_deg(&self) -> f64 {
        f64::from(self.lat) / COORDINATE_PRECISION
    }
}

/// Great-circle distance between two coordinates in meters (haversine).
pub fn great_circle_distance(a: FixedCoordinate, b: FixedCoordinate) -> f64 {
    let lat1 = a.lat_deg().to_radians();
    let lat2 = b.lat_deg().to_radians();
    let delta_lat = (b.lat_deg() - a.lat_deg()).to_radians();
    let delta_lon = (b.lon_deg() - a.lon_deg()).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Total great-circle length of a coordinate run in meters.
pub fn coordinate_length(coordinates: &[FixedCoordinate]) -> f64 {
    coordinates
        .windows(2)
        .map(|pair| great_circle_distance(pair[0], pair[1]))
        .sum()
}

/// Compass bearing from `a` to `b` in degrees, 0 = North, clockwise [0, 360).
pub fn bearing(a: FixedCoordinate, b: FixedCoordinate) -> f64 {
    let lat1 = a.lat_deg().to_radians();
    let lat2 = b.lat_deg().to_radians();
    let delta_lon = (b.lon_deg() - a.lon_deg()).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();
    let deg = y.atan2(x).to_degrees();
    (deg + 360.0) % 360.0
}

/// Bearing pointing the opposite way.
pub fn reverse_bearing(b: f64) -> f64 {
    debug_assert!((0.0..360.0).contains(&b));
    if b >= 180.0 {
        b - 180.0
    } else {
        b + 180.0
    }
}

/// Map an angle into [0, 360).
pub fn restrict_angle_to_valid_range(angle: f64) -> f64 {
    let mut angle = angle % 360.0;
    if angle < 0.0 {
        angle += 360.0;
    }
    angle
}

/// Absolute angular difference of two bearings/angles, in [0, 180].
pub fn angular_deviation(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

/// Turn angle between an arrival bearing and a departure bearing, mapped so
/// that continuing straight is 180, a right turn is 90, a left turn is 270
/// and a u-turn is 0.
pub fn turn_angle(in_bearing: f64, out_bearing: f64) -> f64 {
    restrict_angle_to_valid_range(in_bearing - out_bearing + 180.0)
}

/// Cut a coordinate run down to at most `max_length` meters, interpolating
/// the final point onto the cut segment so the result has exactly the
/// requested length (when the input was longer).
pub fn trim_coordinates_to_length(
    mut coordinates: Vec<FixedCoordinate>,
    max_length: f64,
) -> Vec<FixedCoordinate> {
    let mut accumulated = 0.0;
    for i in 1..coordinates.len() {
        let segment = great_circle_distance(coordinates[i - 1], coordinates[i]);
        if accumulated + segment > max_length {
            let remaining = max_length - accumulated;
            let fraction = if segment > 0.0 { remaining / segment } else { 0.0 };
            let cut = interpolate(coordinates[i - 1], coordinates[i], fraction);
            coordinates.truncate(i);
            coordinates.push(cut);
            return coordinates;
        }
        accumulated += segment;
    }
    coordinates
}

/// Linear interpolation between two coordinates; `fraction` in [0, 1].
pub fn interpolate(a: FixedCoordinate, b: FixedCoordinate, fraction: f64) -> FixedCoordinate {
    let fraction = fraction.clamp(0.0, 1.0);
    FixedCoordinate {
        lon: a.lon + ((f64::from(b.lon - a.lon)) * fraction).round() as i32,
        lat: a.lat + ((f64::from(b.lat - a.lat)) * fraction).round() as i32,
    }
}

/// Resample a coordinate run at (roughly) fixed intervals so longer segments
/// are weighted correctly in regression computations. The first and last
/// points are always kept.
pub fn sample_coordinates(
    coordinates: &[FixedCoordinate],
    max_length: f64,
    interval: f64,
) -> Vec<FixedCoordinate> {
    if coordinates.len() < 2 || interval <= 0.0 {
        return coordinates.to_vec();
    }

    let mut result = vec![coordinates[0]];
    let mut carry = 0.0;
    let mut total = 0.0;

    for pair in coordinates.windows(2) {
        let segment = great_circle_distance(pair[0], pair[1]);
        if total >= max_length {
            break;
        }
        let mut offset = interval - carry;
        while offset < segment {
            result.push(interpolate(pair[0], pair[1], offset / segment));
            offset += interval;
        }
        carry = (carry + segment) % interval;
        total += segment;
    }

    if result.last() != coordinates.last() {
        result.push(*coordinates.last().unwrap());
    }
    result
}

/// Least-squares slope of a coordinate run in a local equirectangular frame.
/// Returns the regression angle in degrees [0, 180).
fn regression_angle(coordinates: &[FixedCoordinate]) -> f64 {
    let n = coordinates.len() as f64;
    let lat_scale = (coordinates[0].lat_deg().to_radians()).cos();

    let xs: Vec<f64> = coordinates.iter().map(|c| c.lon_deg() * lat_scale).collect();
    let ys: Vec<f64> = coordinates.iter().map(|c| c.lat_deg()).collect();

    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
    }

    // near-vertical runs have no usable slope
    if sxx < 1e-12 {
        return 90.0;
    }
    let slope = sxy / sxx;
    restrict_angle_to_valid_range(slope.atan().to_degrees()) % 180.0
}

const PARALLEL_SLOPE_TOLERANCE_DEG: f64 = 5.0;

/// Whether two coordinate runs follow the same general direction, judged by
/// comparing least-squares regression lines.
pub fn are_parallel(left: &[FixedCoordinate], right: &[FixedCoordinate]) -> bool {
    if left.len() < 2 || right.len() < 2 {
        return false;
    }
    let left_angle = regression_angle(left);
    let right_angle = regression_angle(right);
    let deviation = (left_angle - right_angle).abs();
    deviation.min(180.0 - deviation) < PARALLEL_SLOPE_TOLERANCE_DEG
}

/// Smallest great-circle distance from `point` to any vertex of `run`.
pub fn find_closest_distance(point: FixedCoordinate, run: &[FixedCoordinate]) -> f64 {
    run.iter()
        .map(|&c| great_circle_distance(point, c))
        .fold(f64::INFINITY, f64::min)
}

/// Approximate enclosed area of a closed coordinate ring in square meters
/// (shoelace formula in a local equirectangular frame). Sign follows the
/// winding order; callers usually take the absolute value.
pub fn polygon_area(ring: &[FixedCoordinate]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let lat_scale = (ring[0].lat_deg().to_radians()).cos();
    let meters_per_degree = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

    let to_local = |c: &FixedCoordinate| {
        (
            c.lon_deg() * lat_scale * meters_per_degree,
            c.lat_deg() * meters_per_degree,
        )
    };

    let mut doubled = 0.0;
    for i in 0..ring.len() {
        let (x1, y1) = to_local(&ring[i]);
        let (x2, y2) = to_local(&ring[(i + 1) % ring.len()]);
        doubled += x1 * y2 - x2 * y1;
    }
    doubled / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = FixedCoordinate::from_degrees(0.0, 0.0);
        let north = FixedCoordinate::from_degrees(0.0, 0.001);
        let east = FixedCoordinate::from_degrees(0.001, 0.0);
        let south = FixedCoordinate::from_degrees(0.0, -0.001);
        let west = FixedCoordinate::from_degrees(-0.001, 0.0);

        assert!(bearing(origin, north).abs() < 0.5);
        assert!((bearing(origin, east) - 90.0).abs() < 0.5);
        assert!((bearing(origin, south) - 180.0).abs() < 0.5);
        assert!((bearing(origin, west) - 270.0).abs() < 0.5);
    }

    #[test]
    fn test_turn_angle_convention() {
        // traveling east, continuing east is straight
        assert!((turn_angle(90.0, 90.0) - 180.0).abs() < 1e-9);
        // traveling east, departing south is a right turn
        assert!((turn_angle(90.0, 180.0) - 90.0).abs() < 1e-9);
        // traveling east, departing north is a left turn
        assert!((turn_angle(90.0, 0.0) - 270.0).abs() < 1e-9);
        // turning around maps to the u-turn slot
        assert!(turn_angle(90.0, 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_angular_deviation_wraps() {
        assert_eq!(angular_deviation(350.0, 10.0), 20.0);
        assert_eq!(angular_deviation(10.0, 350.0), 20.0);
        assert_eq!(angular_deviation(180.0, 180.0), 0.0);
    }

    #[test]
    fn test_haversine_equator_degree() {
        let a = FixedCoordinate::from_degrees(0.0, 0.0);
        let b = FixedCoordinate::from_degrees(1.0, 0.0);
        let d = great_circle_distance(a, b);
        // one degree of longitude at the equator is ~111.2 km
        assert!((d - 111_200.0).abs() < 1_000.0, "got {}", d);
    }

    #[test]
    fn test_trim_to_length() {
        let run = vec![
            FixedCoordinate::from_degrees(0.0, 0.0),
            FixedCoordinate::from_degrees(0.001, 0.0),
            FixedCoordinate::from_degrees(0.002, 0.0),
        ];
        let full = coordinate_length(&run);
        let trimmed = trim_coordinates_to_length(run, full / 2.0);
        let trimmed_len = coordinate_length(&trimmed);
        assert!((trimmed_len - full / 2.0).abs() < 1.0);
    }

    #[test]
    fn test_parallel_runs() {
        let left: Vec<_> = (0..10)
            .map(|i| FixedCoordinate::from_degrees(0.0001 * f64::from(i), 0.0))
            .collect();
        let right: Vec<_> = (0..10)
            .map(|i| FixedCoordinate::from_degrees(0.0001 * f64::from(i), 0.0002))
            .collect();
        assert!(are_parallel(&left, &right));

        let crossing: Vec<_> = (0..10)
            .map(|i| {
                FixedCoordinate::from_degrees(0.0001 * f64::from(i), 0.0001 * f64::from(i))
            })
            .collect();
        assert!(!are_parallel(&left, &crossing));
    }

    #[test]
    fn test_polygon_area_square() {
        // ~111m x ~111m square at the equator
        let ring = vec![
            FixedCoordinate::from_degrees(0.0, 0.0),
            FixedCoordinate::from_degrees(0.001, 0.0),
            FixedCoordinate::from_degrees(0.001, 0.001),
            FixedCoordinate::from_degrees(0.0, 0.001),
        ];
        let area = polygon_area(&ring).abs();
        assert!((area - 111_200.0 * 111_200.0).abs() / area < 0.05);
    }
}
