//! Per-run fitter workspace.
//!
//! The workspace holds one [`FitPoint`] per geometry plane and is refilled for
//! every candidate. It also keeps the residual buffer of the last fitted track
//! once the caller hands it back through [`FitWorkspace::recycle`], so the
//! hot loop over candidates never allocates. Missing
//! slots keep their place at the plane's nominal position with inflated
//! resolutions; the 3D fitter relies on the buffer always having the full
//! plane count.

use crate::event::EventHits;
use crate::fit::FittedTrack;
use crate::geometry::{Geometry, Resolution};
use crate::types::Residual;
use nalgebra::Vector3;

/// Hit position and weight of one plane as seen by the fitters.
#[derive(Clone, Copy, Debug)]
pub struct FitPoint {
    pub position: Vector3<f64>,
    pub sigma: Resolution,
    /// The candidate has a hit on this plane.
    pub measured: bool,
    /// The point enters track parameter estimation (measured and not excluded).
    pub contributes: bool,
}

impl FitPoint {
    fn nominal(z: f64, sigma: Resolution) -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, z),
            sigma,
            measured: false,
            contributes: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FitWorkspace {
    points: Vec<FitPoint>,
    residuals: Vec<Option<Residual>>,
    missing_sigma_scale: f64,
}

impl FitWorkspace {
    /// Sizes the buffer for `geometry`. `missing_sigma_scale` multiplies the
    /// resolution of missing and excluded planes.
    pub fn new(geometry: &Geometry, missing_sigma_scale: f64) -> Self {
        let points = geometry
            .planes()
            .iter()
            .map(|p| FitPoint::nominal(p.z, p.resolution.scaled(missing_sigma_scale)))
            .collect();
        Self {
            residuals: Vec::with_capacity(geometry.len()),
            points,
            missing_sigma_scale,
        }
    }

    /// Loads the hits selected by `candidate` into the buffer.
    pub fn load(&mut self, geometry: &Geometry, event: &EventHits, candidate: &[Option<usize>]) {
        debug_assert_eq!(candidate.len(), self.points.len());
        for ((point, plane), (ordinal, slot)) in self
            .points
            .iter_mut()
            .zip(geometry.planes())
            .zip(candidate.iter().enumerate())
        {
            *point = match slot {
                Some(idx) => {
                    let hit = event.hit(ordinal, *idx);
                    let excluded = plane.is_excluded();
                    FitPoint {
                        position: hit.position(),
                        sigma: if excluded {
                            plane.resolution.scaled(self.missing_sigma_scale)
                        } else {
                            plane.resolution
                        },
                        measured: true,
                        contributes: !excluded,
                    }
                }
                None => FitPoint::nominal(
                    plane.z,
                    plane.resolution.scaled(self.missing_sigma_scale),
                ),
            };
        }
    }

    pub fn points(&self) -> &[FitPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn contributing(&self) -> usize {
        self.points.iter().filter(|p| p.contributes).count()
    }

    /// Empty residual buffer for the next fit.
    pub(crate) fn take_residuals(&mut self) -> Vec<Option<Residual>> {
        let mut buf = std::mem::take(&mut self.residuals);
        buf.clear();
        buf
    }

    pub(crate) fn restore_residuals(&mut self, buf: Vec<Option<Residual>>) {
        self.residuals = buf;
    }

    /// Returns a finished track's residual buffer for reuse.
    pub fn recycle(&mut self, track: FittedTrack) {
        self.restore_residuals(track.residuals);
    }
}
