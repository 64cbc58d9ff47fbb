//! Straight-line track fitters.
//!
//! Two engines share the [`FitWorkspace`] hit buffer and produce the same
//! [`FittedTrack`]:
//!
//! - [`linear::fit_linear`]: independent x-z and y-z inverse-variance weighted
//!   regressions. Closed form, used by the shift and shift+rotation modes.
//! - [`line3d::Line3dFitter`]: a 3D line parameterised by two intercepts and
//!   two angles, minimised numerically through the [`minimize::Minimizer`]
//!   interface. Used by the full 3D mode, supports surveyed reference planes.
//!
//! Residuals are always `track - measured` and reported for every plane that
//! carries a hit, excluded planes included.

pub mod line3d;
pub mod linear;
pub mod minimize;
pub mod workspace;

use crate::types::Residual;
use nalgebra::Vector3;

pub use line3d::{Line3dFitter, LineParams};
pub use linear::fit_linear;
pub use minimize::{DampedNewton, DampedNewtonParams, Minimizer, Minimum};
pub use workspace::{FitPoint, FitWorkspace};

const EPS: f64 = 1e-12;

#[derive(Clone, Debug)]
pub struct FittedTrack {
    /// Track point at z = 0.
    pub point: Vector3<f64>,
    /// Unit direction, pointing downstream.
    pub direction: Vector3<f64>,
    /// dx/dz and dy/dz.
    pub slope: [f64; 2],
    /// `atan` of the slopes.
    pub angle: [f64; 2],
    /// Chi-square per axis over the contributing planes.
    pub chi2: [f64; 3],
    /// One entry per plane, `None` where the candidate has no hit.
    pub residuals: Vec<Option<Residual>>,
    pub converged: bool,
    pub iterations: usize,
}

impl FittedTrack {
    pub fn chi2_total(&self) -> f64 {
        self.chi2.iter().sum()
    }

    /// Position of the track at `z`.
    pub fn at_z(&self, z: f64) -> Vector3<f64> {
        Vector3::new(
            self.point.x + self.slope[0] * z,
            self.point.y + self.slope[1] * z,
            z,
        )
    }

    pub fn residual(&self, plane: usize) -> Option<&Residual> {
        self.residuals.get(plane).and_then(Option::as_ref)
    }
}
