#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocell quantization and region classification.
//!
//! A geocell is a fixed-size grid cell identified by a string key. Cells are
//! produced by floor-quantizing a coordinate to a decimal precision, so any
//! two points inside the same quantization step share a cell. Used to tag
//! incidents at ingest time and to pre-filter spatial queries before exact
//! bounding-box comparison.

pub mod regions;

use serde::{Deserialize, Serialize};

pub use regions::{Region, RegionClassifier};

/// Default quantization precision (decimal places). At precision 3 a cell
/// spans 0.001 degrees, roughly 110m of latitude.
pub const DEFAULT_PRECISION: u8 = 3;

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Returns `true` if the south-west corner is actually south-west of the
    /// north-east corner and all coordinates are in valid WGS84 ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.south <= self.north
            && self.west <= self.east
            && (-90.0..=90.0).contains(&self.south)
            && (-90.0..=90.0).contains(&self.north)
            && (-180.0..=180.0).contains(&self.west)
            && (-180.0..=180.0).contains(&self.east)
    }

    /// Returns `true` if the point falls within this box (inclusive).
    #[must_use]
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.south && lat <= self.north && lng >= self.west && lng <= self.east
    }
}

/// Computes the geocell key containing a coordinate at the given precision.
///
/// Both coordinates are floor-quantized to a step of `10^-precision`. The
/// key encodes the precision and both quantized values, so keys from
/// different precisions never collide. Deterministic and side-effect-free.
#[must_use]
pub fn compute_cell(lat: f64, lng: f64, precision: u8) -> String {
    let step = step_size(precision);
    let (lat_idx, lng_idx) = cell_indices(lat, lng, precision);
    #[allow(clippy::cast_precision_loss)]
    let (lat_q, lng_q) = (lat_idx as f64 * step, lng_idx as f64 * step);
    cell_key(lat_q, lng_q, precision)
}

/// The integer quantization indices of the cell containing a coordinate.
///
/// Two points share a geocell exactly when they share an index pair, so
/// grid maps can key on the pair instead of the string form.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn cell_indices(lat: f64, lng: f64, precision: u8) -> (i64, i64) {
    let step = step_size(precision);
    ((lat / step).floor() as i64, (lng / step).floor() as i64)
}

/// Enumerates every geocell key whose quantized coordinates fall within the
/// bounding box, iterating latitude then longitude in step increments.
///
/// Cost is O(cells-in-box); callers cap the box size before calling.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn cells_in_bounding_box(bbox: &BoundingBox, precision: u8) -> Vec<String> {
    let step = step_size(precision);

    let lat_start = (bbox.south / step).floor() as i64;
    let lat_end = (bbox.north / step).floor() as i64;
    let lng_start = (bbox.west / step).floor() as i64;
    let lng_end = (bbox.east / step).floor() as i64;

    let mut cells = Vec::new();
    for lat_idx in lat_start..=lat_end {
        #[allow(clippy::cast_precision_loss)]
        let lat_q = lat_idx as f64 * step;
        for lng_idx in lng_start..=lng_end {
            #[allow(clippy::cast_precision_loss)]
            let lng_q = lng_idx as f64 * step;
            cells.push(cell_key(lat_q, lng_q, precision));
        }
    }
    cells
}

/// Number of cells [`cells_in_bounding_box`] would enumerate for this box,
/// computed without materializing them. Lets callers skip cell enumeration
/// for boxes where it would cost more than it saves.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn covering_cell_count(bbox: &BoundingBox, precision: u8) -> u64 {
    let step = step_size(precision);
    let lat_cells = (bbox.north / step).floor() as i64 - (bbox.south / step).floor() as i64 + 1;
    let lng_cells = (bbox.east / step).floor() as i64 - (bbox.west / step).floor() as i64 + 1;
    u64::try_from(lat_cells.max(0)).unwrap_or(0) * u64::try_from(lng_cells.max(0)).unwrap_or(0)
}

/// Quantization step size for a precision (e.g. precision 3 -> 0.001).
#[must_use]
fn step_size(precision: u8) -> f64 {
    10f64.powi(-i32::from(precision))
}

/// Formats a cell key from already-quantized coordinates.
///
/// Fixed-decimal printing keeps keys byte-identical regardless of the float
/// noise left over from the quantization arithmetic.
fn cell_key(lat_q: f64, lng_q: f64, precision: u8) -> String {
    let p = usize::from(precision);
    format!("c{precision}:{lat_q:.p$}:{lng_q:.p$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_cell_is_deterministic() {
        let a = compute_cell(-27.4689, 153.0235, 3);
        let b = compute_cell(-27.4689, 153.0235, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn points_in_same_step_share_a_cell() {
        let a = compute_cell(-27.4689, 153.0235, 3);
        let b = compute_cell(-27.468_15, 153.023_9, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn points_in_different_steps_differ() {
        let a = compute_cell(-27.468, 153.023, 3);
        let b = compute_cell(-27.470, 153.023, 3);
        assert_ne!(a, b);
    }

    #[test]
    fn key_encodes_precision() {
        let p2 = compute_cell(-27.4689, 153.0235, 2);
        let p3 = compute_cell(-27.4689, 153.0235, 3);
        assert!(p2.starts_with("c2:"));
        assert!(p3.starts_with("c3:"));
        assert_ne!(p2, p3);
    }

    #[test]
    fn bbox_cells_cover_contained_points() {
        let bbox = BoundingBox::new(153.0, -27.51, 153.01, -27.5);
        let cells = cells_in_bounding_box(&bbox, 3);

        // 0.01 degrees of latitude and longitude at step 0.001 is an
        // 11x11 grid (inclusive of both quantized edges).
        assert_eq!(cells.len(), 121);

        let inner = compute_cell(-27.505, 153.005, 3);
        assert!(cells.contains(&inner));

        let outside = compute_cell(-27.52, 153.005, 3);
        assert!(!cells.contains(&outside));
    }

    #[test]
    fn cell_indices_agree_with_string_cells() {
        let a = cell_indices(-27.4689, 153.0235, 3);
        let b = cell_indices(-27.468_15, 153.023_9, 3);
        assert_eq!(a, b);
        assert_eq!(
            compute_cell(-27.4689, 153.0235, 3),
            compute_cell(-27.468_15, 153.023_9, 3)
        );

        let c = cell_indices(-27.470, 153.0235, 3);
        assert_ne!(a, c);
    }

    #[test]
    fn covering_count_matches_enumeration() {
        let bbox = BoundingBox::new(153.0, -27.51, 153.01, -27.5);
        let cells = cells_in_bounding_box(&bbox, 3);
        assert_eq!(covering_cell_count(&bbox, 3), cells.len() as u64);
    }

    #[test]
    fn bbox_validity() {
        assert!(BoundingBox::new(153.0, -28.0, 153.5, -27.0).is_valid());
        // Inverted latitudes
        assert!(!BoundingBox::new(153.0, -27.0, 153.5, -28.0).is_valid());
        // Out-of-range longitude
        assert!(!BoundingBox::new(190.0, -28.0, 195.0, -27.0).is_valid());
    }

    #[test]
    fn bbox_contains_is_inclusive() {
        let bbox = BoundingBox::new(153.0, -28.0, 153.5, -27.0);
        assert!(bbox.contains(-27.5, 153.2));
        assert!(bbox.contains(-28.0, 153.0));
        assert!(!bbox.contains(-10.0, 140.0));
    }
}
