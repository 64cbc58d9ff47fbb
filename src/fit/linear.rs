//! Weighted straight-line regression, one projection at a time.

use super::{FitPoint, FitWorkspace, FittedTrack, EPS};
use crate::types::{Axis, Residual};
use log::debug;
use nalgebra::Vector3;

/// Slope/intercept/chi-square of one projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct AxisFit {
    pub slope: f64,
    /// Value at z = 0.
    pub intercept: f64,
    pub chi2: f64,
}

impl AxisFit {
    pub fn at(&self, z: f64) -> f64 {
        self.intercept + self.slope * z
    }
}

fn coordinate(p: &FitPoint, axis: Axis) -> f64 {
    match axis {
        Axis::X => p.position.x,
        Axis::Y => p.position.y,
        Axis::Z => p.position.z,
    }
}

fn sigma(p: &FitPoint, axis: Axis) -> f64 {
    match axis {
        Axis::X => p.sigma.x,
        Axis::Y => p.sigma.y,
        Axis::Z => p.sigma.z,
    }
}

/// Regression of `axis` against z over the contributing points, with z
/// centred on its weighted mean. `weighted = false` gives every point unit
/// weight (used to seed the 3D fit).
pub(crate) fn fit_axis(points: &[FitPoint], axis: Axis, weighted: bool) -> Option<AxisFit> {
    let weight = |p: &FitPoint| {
        if weighted {
            let s = sigma(p, axis);
            1.0 / (s * s)
        } else {
            1.0
        }
    };

    let mut n = 0usize;
    let mut sum_w = 0.0;
    let mut sum_z = 0.0;
    let mut sum_u = 0.0;
    for p in points.iter().filter(|p| p.contributes) {
        let w = weight(p);
        n += 1;
        sum_w += w;
        sum_z += w * p.position.z;
        sum_u += w * coordinate(p, axis);
    }
    if n < 2 || sum_w <= EPS {
        return None;
    }
    let z_mean = sum_z / sum_w;
    let u_mean = sum_u / sum_w;

    let mut var_z = 0.0;
    let mut cov_zu = 0.0;
    for p in points.iter().filter(|p| p.contributes) {
        let w = weight(p);
        let dz = p.position.z - z_mean;
        var_z += w * dz * dz;
        cov_zu += w * dz * (coordinate(p, axis) - u_mean);
    }
    if var_z <= EPS * sum_w {
        return None;
    }
    let slope = cov_zu / var_z;
    let intercept = u_mean - slope * z_mean;

    let mut chi2 = 0.0;
    for p in points.iter().filter(|p| p.contributes) {
        let r = intercept + slope * p.position.z - coordinate(p, axis);
        chi2 += weight(p) * r * r;
    }
    Some(AxisFit {
        slope,
        intercept,
        chi2,
    })
}

/// Fits x(z) and y(z) to the loaded candidate.
///
/// Returns `None` when fewer than two planes contribute or their z positions
/// coincide.
pub fn fit_linear(ws: &mut FitWorkspace) -> Option<FittedTrack> {
    let mut residuals = ws.take_residuals();
    let points = ws.points();
    let Some((fx, fy)) = fit_axis(points, Axis::X, true).zip(fit_axis(points, Axis::Y, true))
    else {
        debug!(
            "linear fit skipped: {} contributing planes, degenerate z spread or too few hits",
            ws.contributing()
        );
        ws.restore_residuals(residuals);
        return None;
    };

    residuals.extend(points.iter().map(|p| {
        p.measured.then(|| {
            let z = p.position.z;
            Residual::new(fx.at(z) - p.position.x, fy.at(z) - p.position.y, 0.0)
        })
    }));

    Some(FittedTrack {
        point: Vector3::new(fx.intercept, fy.intercept, 0.0),
        direction: Vector3::new(fx.slope, fy.slope, 1.0).normalize(),
        slope: [fx.slope, fy.slope],
        angle: [fx.slope.atan(), fy.slope.atan()],
        chi2: [fx.chi2, fy.chi2, 0.0],
        residuals,
        converged: true,
        iterations: 0,
    })
}
