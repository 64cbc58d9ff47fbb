//! Tunables of the per-event alignment driver.

use super::cuts::ResidualCuts;
use crate::fit::DampedNewtonParams;
use crate::search::SearchPolicy;
use serde::{Deserialize, Serialize};

pub use crate::geometry::AlignMode;

/// What to do when the run header announces a different geometry id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryMismatchPolicy {
    /// Log the mismatch and keep going with the configured geometry.
    #[default]
    Continue,
    /// Refuse to process the run.
    Abort,
}

/// Parameters of [`Aligner`](super::Aligner).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignParams {
    /// Alignment parameters per plane and the fitter used to get residuals.
    pub mode: AlignMode,
    /// Planes per candidate that may lack a hit.
    pub allowed_missing_hits: usize,
    /// Candidate limit per event.
    pub max_candidates: usize,
    /// Track limit per run; reaching it stops the run.
    pub max_total_tracks: u64,
    pub search: SearchPolicy,
    /// Only fit events with exactly one candidate.
    pub only_single_track_events: bool,
    /// Post-fit per-plane residual windows.
    pub residual_cuts: Option<ResidualCuts>,
    /// Resolution multiplier of missing and excluded planes in the 3D fit.
    pub missing_sigma_scale: f64,
    pub minimizer: DampedNewtonParams,
    /// Expected geometry id of the run header, if checked.
    pub geometry_id: Option<i32>,
    pub on_geometry_mismatch: GeometryMismatchPolicy,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            mode: AlignMode::ShiftRotation,
            allowed_missing_hits: 0,
            max_candidates: 2000,
            max_total_tracks: 10_000_000,
            search: SearchPolicy::default(),
            only_single_track_events: false,
            residual_cuts: None,
            missing_sigma_scale: 1e6,
            minimizer: DampedNewtonParams::default(),
            geometry_id: None,
            on_geometry_mismatch: GeometryMismatchPolicy::Continue,
        }
    }
}
