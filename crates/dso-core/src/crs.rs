//! Coordinate reference systems.
//!
//! Geometries are stored in RD New (EPSG:28992). Responses may be rendered in
//! any supported system; RD New and WGS84 are converted with the standard
//! polynomial approximation, ETRS89 is treated as WGS84, and Web Mercator is
//! the spherical projection of WGS84.

use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// Amersfoort / RD New (EPSG:28992), the storage system.
    RdNew,
    /// WGS84 (EPSG:4326).
    Wgs84,
    /// ETRS89 (EPSG:4258).
    Etrs89,
    /// WGS84 / Pseudo-Mercator (EPSG:3857).
    WebMercator,
}

const EPSG_PREFIXES: [&str; 4] = [
    "EPSG:",
    "urn:ogc:def:crs:EPSG::",
    "http://www.opengis.net/def/crs/EPSG/0/",
    "https://www.opengis.net/def/crs/EPSG/0/",
];

const CRS84_NAMES: [&str; 3] = [
    "OGC:CRS84",
    "urn:ogc:def:crs:OGC:1.3:CRS84",
    "http://www.opengis.net/def/crs/OGC/1.3/CRS84",
];

impl Crs {
    /// The system geometries are stored in.
    pub const STORAGE: Self = Self::RdNew;

    /// Returns the EPSG code.
    #[must_use]
    pub const fn srid(self) -> u32 {
        match self {
            Self::RdNew => 28992,
            Self::Wgs84 => 4326,
            Self::Etrs89 => 4258,
            Self::WebMercator => 3857,
        }
    }

    /// Looks up a supported system by EPSG code.
    #[must_use]
    pub const fn from_srid(srid: u32) -> Option<Self> {
        match srid {
            28992 => Some(Self::RdNew),
            4326 => Some(Self::Wgs84),
            4258 => Some(Self::Etrs89),
            3857 => Some(Self::WebMercator),
            _ => None,
        }
    }

    /// Parses an `Accept-Crs` style value.
    ///
    /// Accepts `EPSG:n`, `urn:ogc:def:crs:EPSG::n`, the opengis.net URI form
    /// and `OGC:CRS84`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCrs`] when the value cannot be parsed or
    /// names an unsupported system.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if CRS84_NAMES.iter().any(|n| n.eq_ignore_ascii_case(trimmed)) {
            return Ok(Self::Wgs84);
        }

        EPSG_PREFIXES
            .iter()
            .find_map(|prefix| strip_prefix_ignore_case(trimmed, prefix))
            .and_then(|code| code.parse::<u32>().ok())
            .and_then(Self::from_srid)
            .ok_or_else(|| Error::unsupported_crs(trimmed))
    }

    /// Returns true for latitude/longitude systems.
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        matches!(self, Self::Wgs84 | Self::Etrs89)
    }

    /// Transforms one position from `self` into `target`.
    #[must_use]
    pub fn transform_point(self, target: Self, x: f64, y: f64) -> (f64, f64) {
        if self == target {
            return (x, y);
        }
        let (lon, lat) = match self {
            Self::RdNew => rd_to_wgs84(x, y),
            Self::Wgs84 | Self::Etrs89 => (x, y),
            Self::WebMercator => web_mercator_to_wgs84(x, y),
        };
        match target {
            Self::RdNew => wgs84_to_rd(lon, lat),
            Self::Wgs84 | Self::Etrs89 => (lon, lat),
            Self::WebMercator => wgs84_to_web_mercator(lon, lat),
        }
    }

    /// Transforms every position of a GeoJSON geometry in place.
    pub fn transform_geojson(self, target: Self, geometry: &mut Value) {
        if self == target {
            return;
        }
        if let Some(Value::Array(geometries)) = geometry.get_mut("geometries") {
            for child in geometries {
                self.transform_geojson(target, child);
            }
        }
        if let Some(coordinates) = geometry.get_mut("coordinates") {
            self.transform_positions(target, coordinates);
        }
    }

    fn transform_positions(self, target: Self, value: &mut Value) {
        let Value::Array(items) = value else {
            return;
        };
        if let [Value::Number(x), Value::Number(y), ..] = items.as_slice() {
            if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
                let (tx, ty) = self.transform_point(target, x, y);
                items[0] = Value::from(tx);
                items[1] = Value::from(ty);
            }
            return;
        }
        for item in items {
            self.transform_positions(target, item);
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.srid())
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

// ============================================================================
// RD New <-> WGS84 polynomial approximation
// ============================================================================

const X0: f64 = 155_000.0;
const Y0: f64 = 463_000.0;
const PHI0: f64 = 52.155_174_40;
const LAM0: f64 = 5.387_206_21;

const K: [(i32, i32, f64); 11] = [
    (0, 1, 3235.653_89),
    (2, 0, -32.582_97),
    (0, 2, -0.247_50),
    (2, 1, -0.849_78),
    (0, 3, -0.065_50),
    (2, 2, -0.017_09),
    (1, 0, -0.007_38),
    (4, 0, 0.005_30),
    (2, 3, -0.000_39),
    (4, 1, 0.000_33),
    (1, 1, -0.000_12),
];

const L: [(i32, i32, f64); 12] = [
    (1, 0, 5260.529_16),
    (1, 1, 105.946_84),
    (1, 2, 2.456_56),
    (3, 0, -0.818_85),
    (1, 3, 0.055_94),
    (3, 1, -0.056_07),
    (0, 1, 0.011_99),
    (3, 2, -0.002_56),
    (1, 4, 0.001_28),
    (0, 2, 0.000_22),
    (2, 0, -0.000_22),
    (5, 0, 0.000_26),
];

const R: [(i32, i32, f64); 9] = [
    (0, 1, 190_094.945),
    (1, 1, -11_832.228),
    (2, 1, -114.221),
    (0, 3, -32.391),
    (1, 0, -0.705),
    (3, 1, -2.340),
    (1, 3, -0.608),
    (0, 2, -0.008),
    (2, 3, 0.148),
];

const S: [(i32, i32, f64); 10] = [
    (1, 0, 309_056.544),
    (0, 2, 3638.893),
    (2, 0, 73.077),
    (1, 2, -157.984),
    (3, 0, 59.788),
    (0, 1, 0.433),
    (2, 2, -6.439),
    (1, 1, -0.032),
    (0, 4, 0.092),
    (1, 4, -0.054),
];

fn series(terms: &[(i32, i32, f64)], a: f64, b: f64) -> f64 {
    terms
        .iter()
        .map(|&(p, q, c)| c * a.powi(p) * b.powi(q))
        .sum()
}

/// Converts RD New `(x, y)` to WGS84 `(lon, lat)`.
#[must_use]
pub fn rd_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let dx = (x - X0) * 1e-5;
    let dy = (y - Y0) * 1e-5;
    let lat = PHI0 + series(&K, dx, dy) / 3600.0;
    let lon = LAM0 + series(&L, dx, dy) / 3600.0;
    (lon, lat)
}

/// Converts WGS84 `(lon, lat)` to RD New `(x, y)`.
#[must_use]
pub fn wgs84_to_rd(lon: f64, lat: f64) -> (f64, f64) {
    let d_phi = 0.36 * (lat - PHI0);
    let d_lam = 0.36 * (lon - LAM0);
    let x = X0 + series(&R, d_phi, d_lam);
    let y = Y0 + series(&S, d_phi, d_lam);
    (x, y)
}

const EARTH_RADIUS: f64 = 6_378_137.0;

/// Converts WGS84 `(lon, lat)` to Web Mercator `(x, y)`.
#[must_use]
pub fn wgs84_to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Converts Web Mercator `(x, y)` to WGS84 `(lon, lat)`.
#[must_use]
pub fn web_mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

// ============================================================================
// Point containment
// ============================================================================

/// Returns true when a GeoJSON geometry contains the position `(x, y)`.
///
/// Supports `Point` (exact match), `Polygon`, `MultiPolygon` and
/// `GeometryCollection`. Positions must be in the same system as `(x, y)`.
#[must_use]
pub fn geometry_contains(geometry: &Value, x: f64, y: f64) -> bool {
    let coordinates = geometry.get("coordinates");
    match geometry.get("type").and_then(Value::as_str) {
        Some("Point") => coordinates
            .and_then(position)
            .is_some_and(|(px, py)| (px - x).abs() < f64::EPSILON && (py - y).abs() < f64::EPSILON),
        Some("Polygon") => coordinates.is_some_and(|rings| polygon_contains(rings, x, y)),
        Some("MultiPolygon") => coordinates
            .and_then(Value::as_array)
            .is_some_and(|polygons| polygons.iter().any(|p| polygon_contains(p, x, y))),
        Some("GeometryCollection") => geometry
            .get("geometries")
            .and_then(Value::as_array)
            .is_some_and(|children| children.iter().any(|g| geometry_contains(g, x, y))),
        _ => false,
    }
}

fn position(value: &Value) -> Option<(f64, f64)> {
    let items = value.as_array()?;
    Some((items.first()?.as_f64()?, items.get(1)?.as_f64()?))
}

fn polygon_contains(rings: &Value, x: f64, y: f64) -> bool {
    let Some(rings) = rings.as_array() else {
        return false;
    };
    let mut rings = rings.iter();
    let Some(outer) = rings.next() else {
        return false;
    };
    ring_contains(outer, x, y) && !rings.any(|hole| ring_contains(hole, x, y))
}

fn ring_contains(ring: &Value, x: f64, y: f64) -> bool {
    let points: Vec<(f64, f64)> = ring
        .as_array()
        .map(|items| items.iter().filter_map(position).collect())
        .unwrap_or_default();
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    #[test]
    fn parses_supported_notations() {
        assert_eq!(Crs::parse("EPSG:28992").expect("rd"), Crs::RdNew);
        assert_eq!(Crs::parse("epsg:4258").expect("etrs"), Crs::Etrs89);
        assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::4326").expect("urn"), Crs::Wgs84);
        assert_eq!(
            Crs::parse("http://www.opengis.net/def/crs/EPSG/0/3857").expect("uri"),
            Crs::WebMercator
        );
        assert_eq!(Crs::parse("OGC:CRS84").expect("crs84"), Crs::Wgs84);
    }

    #[test]
    fn rejects_unsupported_and_bogus_values() {
        assert!(matches!(
            Crs::parse("EPSG:2000"),
            Err(Error::UnsupportedCrs { value }) if value == "EPSG:2000"
        ));
        assert!(Crs::parse("nonsense").is_err());
        assert!(Crs::parse("EPSG:").is_err());
    }

    #[test]
    fn displays_as_epsg_code() {
        assert_eq!(Crs::Etrs89.to_string(), "EPSG:4258");
        assert_eq!(Crs::STORAGE.to_string(), "EPSG:28992");
    }

    #[test]
    fn reference_point_maps_exactly() {
        let (lon, lat) = rd_to_wgs84(X0, Y0);
        assert!(close(lon, LAM0, 1e-12));
        assert!(close(lat, PHI0, 1e-12));
    }

    #[test]
    fn amsterdam_converts_between_rd_and_wgs84() {
        let (lon, lat) = rd_to_wgs84(121_000.0, 487_000.0);
        assert!(close(lat, 52.370, 0.002), "lat {lat}");
        assert!(close(lon, 4.888, 0.002), "lon {lon}");

        let (x, y) = wgs84_to_rd(lon, lat);
        assert!(close(x, 121_000.0, 1.0), "x {x}");
        assert!(close(y, 487_000.0, 1.0), "y {y}");
    }

    #[test]
    fn web_mercator_round_trips() {
        let (x, y) = wgs84_to_web_mercator(4.895, 52.370);
        let (lon, lat) = web_mercator_to_wgs84(x, y);
        assert!(close(lon, 4.895, 1e-9));
        assert!(close(lat, 52.370, 1e-9));
    }

    #[test]
    fn transforms_nested_geojson_positions() {
        let mut geometry = json!({
            "type": "Polygon",
            "coordinates": [[[121000.0, 487000.0], [122000.0, 487000.0], [122000.0, 488000.0], [121000.0, 487000.0]]]
        });
        Crs::RdNew.transform_geojson(Crs::Wgs84, &mut geometry);
        let first = &geometry["coordinates"][0][0];
        assert!(close(first[0].as_f64().expect("lon"), 4.888, 0.002));
        assert!(close(first[1].as_f64().expect("lat"), 52.370, 0.002));
    }

    #[test]
    fn polygon_contains_interior_points_only() {
        let square = json!({
            "type": "Polygon",
            "coordinates": [
                [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
                [[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]]
            ]
        });
        assert!(geometry_contains(&square, 1.0, 1.0));
        assert!(!geometry_contains(&square, 5.0, 5.0));
        assert!(!geometry_contains(&square, 11.0, 1.0));
    }
}
