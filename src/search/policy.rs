//! Extension rules deciding whether a hit may continue a candidate prefix.
//!
//! Two rules exist and they select different candidate sets on the same
//! event, so the choice is explicit in [`SearchPolicy`]:
//!
//! - [`ResidualWindowGate`] (default): tolerates missing hits and compares the
//!   new hit with the most recent non-missing hit of the prefix, requiring the
//!   absolute x/y differences to fall into a per-plane-pair window.
//! - [`ScaledDistanceGate`]: no missing hits; the transverse distance to the
//!   previous plane's hit must stay below a limit proportional to the plane
//!   separation.

use crate::types::Hit;
use serde::{Deserialize, Serialize};

/// Context of one extension attempt.
#[derive(Clone, Copy, Debug)]
pub struct Extension<'a> {
    /// Plane ordinal of the hit under test.
    pub plane: usize,
    pub hit: &'a Hit,
    /// Most recent non-missing slot of the prefix, with its plane ordinal.
    pub reference: Option<(usize, &'a Hit)>,
    pub hits_on_plane: usize,
    pub hits_on_reference: usize,
}

impl Extension<'_> {
    /// Index of the plane pair `(plane - 1, plane)`, used to look up
    /// per-pair limits.
    pub fn pair_index(&self) -> usize {
        self.plane.saturating_sub(1)
    }
}

pub trait ExtensionGate: Send + Sync {
    /// Whether planes without hits may be bridged with a missing slot.
    fn allows_missing(&self) -> bool;

    fn accept(&self, ext: &Extension<'_>) -> bool;
}

/// Closed acceptance window on the absolute coordinate differences between
/// consecutive hits of a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairWindow {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl PairWindow {
    pub const OPEN: PairWindow = PairWindow {
        x_min: 0.0,
        x_max: f64::MAX,
        y_min: 0.0,
        y_max: f64::MAX,
    };

    pub fn symmetric(max: f64) -> Self {
        Self {
            x_min: 0.0,
            x_max: max,
            y_min: 0.0,
            y_max: max,
        }
    }

    pub fn contains(&self, dx: f64, dy: f64) -> bool {
        dx >= self.x_min && dx <= self.x_max && dy >= self.y_min && dy <= self.y_max
    }
}

impl Default for PairWindow {
    fn default() -> Self {
        Self::OPEN
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResidualWindowGate {
    /// One window per plane pair; pairs without an entry are unconstrained.
    pub windows: Vec<PairWindow>,
}

impl ExtensionGate for ResidualWindowGate {
    fn allows_missing(&self) -> bool {
        true
    }

    fn accept(&self, ext: &Extension<'_>) -> bool {
        let Some((_, reference)) = ext.reference else {
            return true;
        };
        let dx = (reference.x - ext.hit.x).abs();
        let dy = (reference.y - ext.hit.y).abs();
        self.windows
            .get(ext.pair_index())
            .unwrap_or(&PairWindow::OPEN)
            .contains(dx, dy)
    }
}

#[derive(Clone, Debug)]
pub struct ScaledDistanceGate {
    /// Maximal transverse distance per `per_z` of plane separation, one value
    /// per plane pair. Pairs without an entry use the last value.
    pub distance_max: Vec<f64>,
    pub per_z: f64,
    /// Only accept pairs where both planes carry exactly one hit.
    pub single_hit_only: bool,
}

impl ExtensionGate for ScaledDistanceGate {
    fn allows_missing(&self) -> bool {
        false
    }

    fn accept(&self, ext: &Extension<'_>) -> bool {
        let Some((_, reference)) = ext.reference else {
            return !self.single_hit_only || ext.hits_on_plane == 1;
        };
        if self.single_hit_only && (ext.hits_on_plane != 1 || ext.hits_on_reference != 1) {
            return false;
        }
        let Some(&d_max) = self
            .distance_max
            .get(ext.pair_index())
            .or(self.distance_max.last())
        else {
            return true;
        };
        let dz = ext.hit.z - reference.z;
        let limit = d_max * dz / self.per_z;
        if limit <= 0.0 {
            return false;
        }
        let dx = ext.hit.x - reference.x;
        let dy = ext.hit.y - reference.y;
        dx * dx + dy * dy < limit * limit
    }
}

/// Serializable selection of the extension rule and its limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchPolicy {
    ResidualWindow {
        #[serde(default)]
        windows: Vec<PairWindow>,
    },
    ScaledDistance {
        distance_max: Vec<f64>,
        #[serde(default = "default_per_z")]
        per_z: f64,
        #[serde(default)]
        single_hit_only: bool,
    },
}

fn default_per_z() -> f64 {
    100.0
}

impl Default for SearchPolicy {
    fn default() -> Self {
        SearchPolicy::ResidualWindow {
            windows: Vec::new(),
        }
    }
}

impl SearchPolicy {
    pub fn gate(&self) -> Box<dyn ExtensionGate> {
        match self {
            SearchPolicy::ResidualWindow { windows } => Box::new(ResidualWindowGate {
                windows: windows.clone(),
            }),
            SearchPolicy::ScaledDistance {
                distance_max,
                per_z,
                single_hit_only,
            } => Box::new(ScaledDistanceGate {
                distance_max: distance_max.clone(),
                per_z: *per_z,
                single_hit_only: *single_hit_only,
            }),
        }
    }
}
