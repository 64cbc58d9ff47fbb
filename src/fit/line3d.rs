//! 3D straight-line fit for the full alignment mode.
//!
//! The line passes through `(b0, b1, 0)` with unit direction
//!
//! ```text
//! c = (sin psi, -cos psi * sin delta, cos delta * cos psi)
//! ```
//!
//! so that `delta` is the tilt in the y-z projection and `psi` the angle out
//! of it. For each point `p` the closest point on the line is `b + lambda c`
//! with `lambda = c . (p - b)`; the objective is the sum over all planes of
//! the per-axis squared residuals divided by the squared resolutions. Missing
//! and excluded planes are in the sum with inflated resolutions, which keeps
//! the buffer layout fixed without letting them pull the line.

use super::linear::fit_axis;
use super::minimize::{DampedNewton, Minimizer};
use super::{FitPoint, FitWorkspace, FittedTrack};
use crate::geometry::Geometry;
use crate::types::{Axis, Residual};
use log::debug;
use nalgebra::Vector3;
use std::f64::consts::PI;

/// Free parameters of the 3D line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineParams {
    pub b0: f64,
    pub b1: f64,
    pub delta: f64,
    pub psi: f64,
}

impl LineParams {
    const BOUNDS: [(f64, f64); 4] = [
        (f64::NEG_INFINITY, f64::INFINITY),
        (f64::NEG_INFINITY, f64::INFINITY),
        (-PI, PI),
        (-PI, PI),
    ];

    pub fn from_slice(p: &[f64]) -> Self {
        Self {
            b0: p[0],
            b1: p[1],
            delta: p[2],
            psi: p[3],
        }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.b0, self.b1, self.delta, self.psi]
    }

    /// Parameters of the line `x = ax * z + b0`, `y = ay * z + b1`.
    pub fn from_slopes(ax: f64, ay: f64, b0: f64, b1: f64) -> Self {
        Self {
            b0,
            b1,
            delta: -ay.atan(),
            psi: (ax / (1.0 + ay * ay).sqrt()).atan(),
        }
    }

    pub fn point(&self) -> Vector3<f64> {
        Vector3::new(self.b0, self.b1, 0.0)
    }

    pub fn direction(&self) -> Vector3<f64> {
        let (sd, cd) = self.delta.sin_cos();
        let (sp, cp) = self.psi.sin_cos();
        Vector3::new(sp, -cp * sd, cd * cp)
    }

    /// Closest point on the line minus `p`.
    pub fn residual_to(&self, p: &Vector3<f64>) -> Vector3<f64> {
        let b = self.point();
        let c = self.direction();
        let lambda = c.dot(&(p - b));
        b + c * lambda - p
    }
}

fn chi2_terms(r: &Vector3<f64>, point: &FitPoint) -> [f64; 3] {
    [
        (r.x / point.sigma.x).powi(2),
        (r.y / point.sigma.y).powi(2),
        (r.z / point.sigma.z).powi(2),
    ]
}

fn objective(points: &[FitPoint], params: &[f64]) -> f64 {
    let line = LineParams::from_slice(params);
    points
        .iter()
        .map(|p| chi2_terms(&line.residual_to(&p.position), p).iter().sum::<f64>())
        .sum()
}

/// Numerical 3D line fitter, generic over the minimisation engine.
#[derive(Clone, Debug, Default)]
pub struct Line3dFitter<M: Minimizer = DampedNewton> {
    minimizer: M,
}

impl<M: Minimizer> Line3dFitter<M> {
    pub fn new(minimizer: M) -> Self {
        Self { minimizer }
    }

    /// Starting values from an unweighted regression of the contributing
    /// points.
    pub fn seed(&self, ws: &FitWorkspace) -> Option<LineParams> {
        let fx = fit_axis(ws.points(), Axis::X, false)?;
        let fy = fit_axis(ws.points(), Axis::Y, false)?;
        Some(LineParams::from_slopes(
            fx.slope,
            fy.slope,
            fx.intercept,
            fy.intercept,
        ))
    }

    /// Fits the loaded candidate. `None` when the candidate cannot be seeded
    /// (fewer than two contributing planes); a fit that ran but did not
    /// converge is returned with `converged == false`.
    pub fn fit(&self, geometry: &Geometry, ws: &mut FitWorkspace) -> Option<FittedTrack> {
        let Some(seed) = self.seed(ws) else {
            debug!(
                "3D fit skipped: {} contributing planes, cannot seed",
                ws.contributing()
            );
            return None;
        };
        let mut residuals = ws.take_residuals();
        let points = ws.points();
        let f = |p: &[f64]| objective(points, p);
        let minimum = self
            .minimizer
            .minimize(&f, &seed.to_array(), &LineParams::BOUNDS);
        let line = LineParams::from_slice(&minimum.params);
        if !minimum.converged {
            debug!(
                "3D fit did not converge: chi2 {:.4e} after {} iterations",
                minimum.value, minimum.iterations
            );
        }

        let point = line.point();
        let direction = line.direction();
        let mut chi2 = [0.0; 3];
        for (plane, fp) in geometry.planes().iter().zip(points) {
            if !fp.measured {
                residuals.push(None);
                continue;
            }
            let closest = line.residual_to(&fp.position);
            if fp.contributes {
                for (acc, term) in chi2.iter_mut().zip(chi2_terms(&closest, fp)) {
                    *acc += term;
                }
            }
            let r = match plane.reference.and_then(|s| s.intersect(&point, &direction)) {
                Some(crossing) => crossing - fp.position,
                None => closest,
            };
            residuals.push(Some(Residual::new(r.x, r.y, r.z)));
        }

        let slope = if direction.z.abs() > f64::EPSILON {
            [direction.x / direction.z, direction.y / direction.z]
        } else {
            [f64::INFINITY, f64::INFINITY]
        };
        Some(FittedTrack {
            point,
            direction,
            slope,
            angle: [slope[0].atan(), slope[1].atan()],
            chi2,
            residuals,
            converged: minimum.converged,
            iterations: minimum.iterations,
        })
    }
}
