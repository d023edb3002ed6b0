//! Point parsing for geometry `contains` filters.
//!
//! Coordinates arrive as `x,y` or `POINT(x y)` without an explicit CRS, so
//! the spatial reference is inferred from Dutch bounding boxes:
//!
//! 1. With no CRS or WGS84 requested, a pair inside the Dutch lat/lon box is
//!    read as WGS84, trying `lat,lon` before `lon,lat`.
//! 2. Otherwise, with no CRS or RD New requested, a pair inside the RD box is
//!    read as RD New.
//! 3. Any other explicitly requested CRS takes the pair as-is.

use std::sync::LazyLock;

use dso_core::crs::Crs;
use dso_core::query::GeoPoint;
use regex::Regex;

const NUMBER: &str = r"[-+]?\d*(?:\.\d+)?";

static XY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(&format!(r"^\s*({NUMBER})\s*,\s*({NUMBER})\s*$")).ok());

static WKT_POINT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\s*POINT\s*\(\s*({NUMBER})\s+({NUMBER})\s*\)\s*$")).ok()
});

const LAT_RANGE: (f64, f64) = (50.803_721_015, 53.510_403_347_4);
const LON_RANGE: (f64, f64) = (3.314_971_144_23, 7.092_053_256_87);
const RD_X_RANGE: (f64, f64) = (0.0, 280_000.0);
const RD_Y_RANGE: (f64, f64) = (300_000.0, 625_000.0);

fn within(value: f64, (low, high): (f64, f64)) -> bool {
    (low..=high).contains(&value)
}

fn valid_lat_lon(lat: f64, lon: f64) -> bool {
    within(lat, LAT_RANGE) && within(lon, LON_RANGE)
}

fn valid_rd(x: f64, y: f64) -> bool {
    within(x, RD_X_RANGE) && within(y, RD_Y_RANGE)
}

fn capture_pair<'a>(pattern: &LazyLock<Option<Regex>>, value: &'a str) -> Option<(&'a str, &'a str)> {
    let captures = pattern.as_ref()?.captures(value)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

/// Parses a point filter value, resolving its spatial reference.
///
/// `crs` is the CRS the client negotiated, if any. The returned point has
/// `x` as easting or longitude.
///
/// # Errors
///
/// Returns the client-facing message when the value is not a point or its
/// coordinates fit no supported reference system.
pub fn parse_point(value: &str, crs: Option<Crs>) -> Result<GeoPoint, String> {
    let (x, y) = capture_pair(&XY, value)
        .or_else(|| capture_pair(&WKT_POINT, value))
        .ok_or_else(|| format!("Invalid point format: {value}; use 'x,y' or 'POINT(x y)'"))?;
    let invalid = || format!("Invalid x,y values : {x},{y}");
    let fx: f64 = x.parse().map_err(|_| invalid())?;
    let fy: f64 = y.parse().map_err(|_| invalid())?;

    let srid = crs.map(Crs::srid);
    let wgs84 = Crs::Wgs84.srid();
    let rd = Crs::RdNew.srid();

    if srid.is_none_or(|s| s == wgs84) {
        if valid_lat_lon(fx, fy) {
            return Ok(GeoPoint { srid: wgs84, x: fy, y: fx });
        }
        if valid_lat_lon(fy, fx) {
            return Ok(GeoPoint { srid: wgs84, x: fx, y: fy });
        }
    }

    match srid {
        None if valid_rd(fx, fy) => Ok(GeoPoint { srid: rd, x: fx, y: fy }),
        Some(s) if s == rd && valid_rd(fx, fy) => Ok(GeoPoint { srid: rd, x: fx, y: fy }),
        Some(s) if s != rd && s != wgs84 => Ok(GeoPoint { srid: s, x: fx, y: fy }),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lon_lat_pair_resolves_to_wgs84() {
        let point = parse_point("4.895,52.370", None).unwrap();
        assert_eq!(point, GeoPoint { srid: 4326, x: 4.895, y: 52.370 });
    }

    #[test]
    fn lat_lon_pair_is_swapped() {
        let point = parse_point("52.370,4.895", None).unwrap();
        assert_eq!(point, GeoPoint { srid: 4326, x: 4.895, y: 52.370 });
    }

    #[test]
    fn rd_pair_resolves_to_rd_new() {
        let point = parse_point("121000,487000", None).unwrap();
        assert_eq!(point, GeoPoint { srid: 28992, x: 121_000.0, y: 487_000.0 });
    }

    #[test]
    fn wkt_point_is_accepted() {
        let point = parse_point("POINT(121000 487000)", None).unwrap();
        assert_eq!(point.srid, 28992);
    }

    #[test]
    fn out_of_bounds_pair_is_rejected() {
        let err = parse_point("1000,1000", None).unwrap_err();
        assert_eq!(err, "Invalid x,y values : 1000,1000");
    }

    #[test]
    fn requested_rd_skips_lat_lon_detection() {
        let err = parse_point("4.895,52.370", Some(Crs::RdNew)).unwrap_err();
        assert!(err.starts_with("Invalid x,y values"));
    }

    #[test]
    fn other_crs_passes_through() {
        let point = parse_point("5.1,52.1", Some(Crs::Etrs89)).unwrap();
        assert_eq!(point, GeoPoint { srid: 4258, x: 5.1, y: 52.1 });
    }

    #[test]
    fn garbage_is_a_format_error() {
        assert!(parse_point("here", None).unwrap_err().starts_with("Invalid point format"));
        assert!(parse_point(",", None).is_err());
    }
}
