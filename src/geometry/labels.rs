//! Global-parameter numbering shared with the external solver.
//!
//! The solver associates derivatives with parameters purely through the
//! integer labels, so the numbering must be identical for every record of a
//! run. Active (non-excluded) planes are numbered in z order; active ordinal
//! `a` owns labels `a*k + 1 ..= a*k + k`, `k` being the number of parameters
//! per plane of the alignment mode.

use super::{Geometry, PlaneRole};
use serde::{Deserialize, Serialize};

/// Alignment parameter of a single plane. The discriminant is the bit used in
/// [`Plane::fix_mask`](super::Plane::fix_mask).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalParam {
    ShiftX = 0,
    ShiftY = 1,
    ShiftZ = 2,
    /// Rotation about x (y -> z).
    Alpha = 3,
    /// Rotation about y (z -> x).
    Beta = 4,
    /// Rotation about z (x -> y).
    Gamma = 5,
}

impl GlobalParam {
    pub fn mask_bit(self) -> u8 {
        1 << (self as u8)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignMode {
    /// x/y shifts only.
    ShiftOnly,
    /// x/y shifts plus rotation about the beam axis.
    #[default]
    ShiftRotation,
    /// Shifts along all axes and three rotations; uses the 3D line fit.
    #[serde(rename = "full_3d")]
    Full3D,
}

impl AlignMode {
    pub fn parameters(self) -> &'static [GlobalParam] {
        use GlobalParam::*;
        match self {
            AlignMode::ShiftOnly => &[ShiftX, ShiftY],
            AlignMode::ShiftRotation => &[ShiftX, ShiftY, Gamma],
            AlignMode::Full3D => &[ShiftX, ShiftY, ShiftZ, Alpha, Beta, Gamma],
        }
    }

    pub fn params_per_plane(self) -> usize {
        self.parameters().len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMap {
    params: &'static [GlobalParam],
    active: Vec<Option<usize>>,
    n_active: usize,
}

impl LabelMap {
    pub fn new(geometry: &Geometry, mode: AlignMode) -> Self {
        let mut n_active = 0usize;
        let active = geometry
            .planes()
            .iter()
            .map(|p| {
                if p.is_excluded() {
                    None
                } else {
                    n_active += 1;
                    Some(n_active - 1)
                }
            })
            .collect();
        Self {
            params: mode.parameters(),
            active,
            n_active,
        }
    }

    pub fn params_per_plane(&self) -> usize {
        self.params.len()
    }

    pub fn parameters(&self) -> &'static [GlobalParam] {
        self.params
    }

    /// Length of the global derivative / label vectors.
    pub fn global_len(&self) -> usize {
        self.n_active * self.params.len()
    }

    pub fn active_ordinal(&self, plane: usize) -> Option<usize> {
        self.active.get(plane).copied().flatten()
    }

    /// Position of `param` of `plane` inside the global derivative vector.
    pub fn slot(&self, plane: usize, param: GlobalParam) -> Option<usize> {
        let a = self.active_ordinal(plane)?;
        let k = self.params.iter().position(|p| *p == param)?;
        Some(a * self.params.len() + k)
    }

    pub fn label(&self, plane: usize, param: GlobalParam) -> Option<i32> {
        self.slot(plane, param).map(|s| s as i32 + 1)
    }

    /// Dense 1-based label vector matching the global derivative positions.
    pub fn labels(&self) -> Vec<i32> {
        (1..=self.global_len() as i32).collect()
    }

    /// Labels the solver has to keep fixed: every parameter of a
    /// [`PlaneRole::Fixed`] plane plus the bits set in each plane's fix mask.
    pub fn fixed_labels(&self, geometry: &Geometry) -> Vec<i32> {
        let mut fixed = Vec::new();
        for (ordinal, plane) in geometry.planes().iter().enumerate() {
            for &param in self.params {
                let pinned =
                    plane.role == PlaneRole::Fixed || plane.fix_mask & param.mask_bit() != 0;
                if pinned {
                    if let Some(label) = self.label(ordinal, param) {
                        fixed.push(label);
                    }
                }
            }
        }
        fixed
    }
}
