//! Post-fit residual windows.
//!
//! A track passes when, on every non-excluded plane with a residual, the x
//! and y residuals lie inside that plane's closed window. Excluded planes and
//! planes beyond the end of the arrays are unconstrained.

use crate::fit::FittedTrack;
use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualCuts {
    pub x_min: Vec<f64>,
    pub x_max: Vec<f64>,
    pub y_min: Vec<f64>,
    pub y_max: Vec<f64>,
}

impl ResidualCuts {
    /// Same window on every plane.
    pub fn uniform(planes: usize, x: (f64, f64), y: (f64, f64)) -> Self {
        Self {
            x_min: vec![x.0; planes],
            x_max: vec![x.1; planes],
            y_min: vec![y.0; planes],
            y_max: vec![y.1; planes],
        }
    }

    pub fn len(&self) -> usize {
        self.x_min
            .len()
            .min(self.x_max.len())
            .min(self.y_min.len())
            .min(self.y_max.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All four arrays have `planes` entries.
    pub fn matches(&self, planes: usize) -> bool {
        [&self.x_min, &self.x_max, &self.y_min, &self.y_max]
            .iter()
            .all(|v| v.len() == planes)
    }

    pub fn accepts(&self, geometry: &Geometry, track: &FittedTrack) -> bool {
        track
            .residuals
            .iter()
            .zip(geometry.planes())
            .take(self.len())
            .enumerate()
            .all(|(i, (r, plane))| match r {
                Some(r) if !plane.is_excluded() => {
                    (self.x_min[i]..=self.x_max[i]).contains(&r.x)
                        && (self.y_min[i]..=self.y_max[i]).contains(&r.y)
                }
                _ => true,
            })
    }
}
