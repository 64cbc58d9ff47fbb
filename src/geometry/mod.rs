//! Detector plane description consumed by the search, the fitters and the
//! record builder.
//!
//! Planes are kept in z order; the position of a plane in [`Geometry`] is its
//! ordinal and every per-plane array in the crate is indexed by it. Planes
//! flagged [`PlaneRole::Excluded`] stay in the geometry (they still take part
//! in the candidate search and get residuals) but do not contribute to track
//! parameters and own no alignment labels.

pub mod labels;

use crate::error::{AlignError, Result};
use log::{debug, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use labels::{AlignMode, GlobalParam, LabelMap};

/// Intrinsic single-hit resolution of a plane, per axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Resolution {
    pub const fn uniform(sigma: f64) -> Self {
        Self {
            x: sigma,
            y: sigma,
            z: sigma,
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            z: self.z * factor,
        }
    }

    fn is_valid(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|s| s.is_finite() && *s > 0.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaneRole {
    /// Aligned and used in the track fit.
    #[default]
    Free,
    /// Used in the track fit; its alignment parameters are pinned in the solver.
    Fixed,
    /// Ignored by the track fit and by the alignment.
    Excluded,
}

/// Surveyed sensor plane for non-ideal geometries: a point on the sensor and
/// its normal. Residuals are then taken at the intersection of the track with
/// this plane, and the rotation lever arms are measured from `offset`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferencePlane {
    pub offset: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl ReferencePlane {
    /// Intersection of the line `point + t * dir` with this plane, or `None`
    /// when the line runs parallel to it.
    pub fn intersect(&self, point: &Vector3<f64>, dir: &Vector3<f64>) -> Option<Vector3<f64>> {
        let denom = self.normal.dot(dir);
        if denom.abs() <= f64::EPSILON {
            return None;
        }
        let t = self.normal.dot(&(self.offset - point)) / denom;
        Some(point + dir * t)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub sensor_id: i32,
    /// Nominal position along the beam axis.
    pub z: f64,
    pub resolution: Resolution,
    #[serde(default)]
    pub role: PlaneRole,
    #[serde(default)]
    pub reference: Option<ReferencePlane>,
    /// Bit mask of [`GlobalParam`]s to keep fixed in the solver.
    #[serde(default)]
    pub fix_mask: u8,
}

impl Plane {
    pub fn new(sensor_id: i32, z: f64, resolution: Resolution) -> Self {
        Self {
            sensor_id,
            z,
            resolution,
            role: PlaneRole::Free,
            reference: None,
            fix_mask: 0,
        }
    }

    pub fn with_role(mut self, role: PlaneRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_reference(mut self, reference: ReferencePlane) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn is_excluded(&self) -> bool {
        self.role == PlaneRole::Excluded
    }

    /// Offset used as the rotation pivot; the origin when no survey exists.
    pub fn pivot(&self) -> Vector3<f64> {
        self.reference
            .map(|r| r.offset)
            .unwrap_or_else(Vector3::zeros)
    }
}

/// Ordered plane set of one run.
#[derive(Clone, Debug)]
pub struct Geometry {
    planes: Vec<Plane>,
    id: Option<i32>,
}

impl Geometry {
    /// Builds the geometry, sorting planes by nominal z.
    pub fn new(mut planes: Vec<Plane>) -> Result<Self> {
        if planes.is_empty() {
            return Err(AlignError::Config("geometry has no planes".into()));
        }
        for plane in &planes {
            if !plane.resolution.is_valid() {
                return Err(AlignError::Config(format!(
                    "plane {} has a non-positive resolution {:?}",
                    plane.sensor_id, plane.resolution
                )));
            }
            if !plane.z.is_finite() {
                return Err(AlignError::Config(format!(
                    "plane {} has a non-finite z position",
                    plane.sensor_id
                )));
            }
        }
        planes.sort_by(|a, b| a.z.total_cmp(&b.z));
        let mut ids: Vec<i32> = planes.iter().map(|p| p.sensor_id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != planes.len() {
            return Err(AlignError::Config("duplicate sensor ids in geometry".into()));
        }
        for (ordinal, plane) in planes.iter().enumerate() {
            debug!(
                "plane ordinal={} sensor={} z={:.3} role={:?}",
                ordinal, plane.sensor_id, plane.z, plane.role
            );
        }
        Ok(Self { planes, id: None })
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn id(&self) -> Option<i32> {
        self.id
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, ordinal: usize) -> &Plane {
        &self.planes[ordinal]
    }

    pub fn ordinal_of(&self, sensor_id: i32) -> Option<usize> {
        self.planes.iter().position(|p| p.sensor_id == sensor_id)
    }

    /// Number of planes that take part in the alignment.
    pub fn active_count(&self) -> usize {
        self.planes.iter().filter(|p| !p.is_excluded()).count()
    }

    /// Applies excluded/fixed sensor id lists. Unknown ids are reported and
    /// ignored; a sensor listed in both ends up excluded.
    pub fn apply_roles(&mut self, excluded: &[i32], fixed: &[i32]) {
        for (ids, role) in [(fixed, PlaneRole::Fixed), (excluded, PlaneRole::Excluded)] {
            for &id in ids {
                match self.ordinal_of(id) {
                    Some(idx) => self.planes[idx].role = role,
                    None => warn!("sensor id {} listed as {:?} is not in the geometry", id, role),
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn planes_mut(&mut self) -> &mut [Plane] {
        &mut self.planes
    }
}
