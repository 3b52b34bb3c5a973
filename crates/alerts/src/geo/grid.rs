//! Fixed-size latitude/longitude grid used to bucket subscribers.

use super::distance::EARTH_RADIUS_M;
use crate::entities::GeoPoint;

/// Row/column of a grid cell. Columns wrap at the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub row: i64,
    pub col: i64,
}

/// Cells a radius query has to visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    /// The cap is too large for bucketing to help.
    Everything,
    /// Inclusive row range; each row visits `cols` (already wrapped).
    Cells { rows: (i64, i64), cols: Vec<i64> },
}

impl Coverage {
    /// Number of cells a query would touch, saturating for `Everything`.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        match self {
            Self::Everything => usize::MAX,
            Self::Cells { rows, cols } => {
                let row_count = usize::try_from(rows.1 - rows.0 + 1).unwrap_or(0);
                row_count.saturating_mul(cols.len())
            }
        }
    }

    /// Whether a query with this coverage has to look at `key`.
    #[must_use]
    pub fn contains(&self, key: CellKey) -> bool {
        match self {
            Self::Everything => true,
            Self::Cells { rows, cols } => {
                (rows.0..=rows.1).contains(&key.row) && cols.contains(&key.col)
            }
        }
    }

    /// Iterate covered cell keys.
    pub fn keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        let (rows, cols): ((i64, i64), &[i64]) = match self {
            Self::Everything => ((0, -1), &[]),
            Self::Cells { rows, cols } => (*rows, cols.as_slice()),
        };
        (rows.0..=rows.1).flat_map(move |row| cols.iter().map(move |&col| CellKey { row, col }))
    }
}

/// Grid geometry for a given cell size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    cell_degrees: f64,
    rows: i64,
    cols: i64,
}

impl Grid {
    /// Build a grid; `cell_degrees` must be in `(0, 90]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(cell_degrees: f64) -> Self {
        Self {
            cell_degrees,
            rows: (180.0 / cell_degrees).ceil() as i64,
            cols: (360.0 / cell_degrees).ceil() as i64,
        }
    }

    #[must_use]
    pub const fn cell_degrees(&self) -> f64 {
        self.cell_degrees
    }

    /// Cell holding `point`.
    #[must_use]
    pub fn cell_of(&self, point: GeoPoint) -> CellKey {
        CellKey {
            row: self.row_of(point.latitude),
            col: self.col_of(point.longitude).rem_euclid(self.cols),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn row_of(&self, latitude: f64) -> i64 {
        (((latitude + 90.0) / self.cell_degrees).floor() as i64).clamp(0, self.rows - 1)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn col_of(&self, longitude: f64) -> i64 {
        ((longitude + 180.0) / self.cell_degrees).floor() as i64
    }

    /// Cells intersecting the spherical cap of `radius_m` around `center`.
    ///
    /// The latitude band is `φ ± δ` with `δ = r / R`. The longitude half-width
    /// is `asin(sin δ / cos φ)`, the widest extent of the cap. If the cap
    /// reaches a pole every longitude is covered. One extra cell of padding
    /// on each side absorbs rounding at cell edges.
    #[must_use]
    pub fn coverage(&self, center: GeoPoint, radius_m: f64) -> Coverage {
        let delta = radius_m / EARTH_RADIUS_M;
        if !delta.is_finite() || delta >= std::f64::consts::FRAC_PI_2 {
            return Coverage::Everything;
        }

        let delta_deg = delta.to_degrees();
        let lat_min = center.latitude - delta_deg;
        let lat_max = center.latitude + delta_deg;
        let rows = (
            (self.row_of(lat_min) - 1).max(0),
            (self.row_of(lat_max) + 1).min(self.rows - 1),
        );

        let phi = center.latitude.to_radians();
        let full_band = lat_min <= -90.0 || lat_max >= 90.0 || delta.sin() >= phi.cos();
        if full_band {
            return Coverage::Cells {
                rows,
                cols: (0..self.cols).collect(),
            };
        }

        let half_width_deg = (delta.sin() / phi.cos()).asin().to_degrees();
        let first = self.col_of(center.longitude - half_width_deg) - 1;
        let last = self.col_of(center.longitude + half_width_deg) + 1;

        let cols = if last - first + 1 >= self.cols {
            (0..self.cols).collect()
        } else {
            (first..=last).map(|c| c.rem_euclid(self.cols)).collect()
        };

        Coverage::Cells { rows, cols }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_of_wraps_longitude() {
        let grid = Grid::new(1.0);
        assert_eq!(grid.cell_of(GeoPoint::new(0.5, -179.5)).col, 0);
        assert_eq!(grid.cell_of(GeoPoint::new(0.5, 179.5)).col, 359);
        // +180 and -180 are the same meridian
        assert_eq!(
            grid.cell_of(GeoPoint::new(0.0, 180.0)),
            grid.cell_of(GeoPoint::new(0.0, -180.0))
        );
        assert_eq!(grid.cell_of(GeoPoint::new(90.0, 0.0)).row, 179);
    }

    #[test]
    fn test_small_cap_touches_few_cells() {
        let grid = Grid::new(0.01);
        let coverage = grid.coverage(GeoPoint::new(40.7128, -74.006), 500.0);
        // ~0.0045° latitude either side plus padding
        assert!(coverage.cell_count() <= 25, "{}", coverage.cell_count());
    }

    #[test]
    fn test_cap_over_pole_covers_all_longitudes() {
        let grid = Grid::new(1.0);
        match grid.coverage(GeoPoint::new(89.9, 10.0), 50_000.0) {
            Coverage::Cells { cols, rows } => {
                assert_eq!(cols.len(), 360);
                assert_eq!(rows.1, 179);
            }
            Coverage::Everything => panic!("expected banded coverage"),
        }
    }

    #[test]
    fn test_cap_across_antimeridian_wraps() {
        let grid = Grid::new(1.0);
        match grid.coverage(GeoPoint::new(0.0, 179.9), 50_000.0) {
            Coverage::Cells { cols, .. } => {
                assert!(cols.contains(&359));
                assert!(cols.contains(&0));
                assert!(cols.len() < 10);
            }
            Coverage::Everything => panic!("expected banded coverage"),
        }
    }

    #[test]
    fn test_huge_radius_is_everything() {
        let grid = Grid::new(0.01);
        assert_eq!(
            grid.coverage(GeoPoint::new(0.0, 0.0), 20_000_000.0),
            Coverage::Everything
        );
        assert_eq!(
            grid.coverage(GeoPoint::new(0.0, 0.0), f64::INFINITY),
            Coverage::Everything
        );
    }
}
