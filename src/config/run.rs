use crate::aligner::{AlignMode, AlignParams, GeometryMismatchPolicy, ResidualCuts};
use crate::error::{AlignError, Result};
use crate::fit::DampedNewtonParams;
use crate::geometry::{Geometry, Plane, ReferencePlane, Resolution};
use crate::search::{PairWindow, SearchPolicy};
use crate::sim::TestBeamParams;
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolution used for planes without one in the config.
pub const DEFAULT_RESOLUTION: f64 = 0.01;
/// Scaled-distance limit used when the configured array is unusable.
pub const DEFAULT_DISTANCE_MAX: f64 = 2.0;

#[derive(Clone, Debug, Deserialize)]
pub struct RunConfig {
    pub planes: Vec<PlaneConfig>,
    #[serde(default)]
    pub geometry_id: Option<i32>,
    /// Sensor ids ignored by fit and alignment.
    #[serde(default)]
    pub excluded_planes: Vec<i32>,
    /// Sensor ids whose alignment parameters stay fixed.
    #[serde(default)]
    pub fixed_planes: Vec<i32>,
    /// Per-plane resolutions in z order; override the plane entries.
    #[serde(default)]
    pub resolution_x: Vec<f64>,
    #[serde(default)]
    pub resolution_y: Vec<f64>,
    #[serde(default)]
    pub resolution_z: Vec<f64>,
    /// Per-plane fixed-parameter bit masks in z order (bit 0 = x shift ..
    /// bit 5 = gamma).
    #[serde(default)]
    pub fix_parameter: Vec<u8>,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub align: AlignConfig,
    /// Simulated input; ignored when `input` is set.
    #[serde(default)]
    pub simulation: Option<TestBeamParams>,
    /// JSON file holding a list of events.
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlaneConfig {
    pub sensor_id: i32,
    pub z: f64,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub reference: Option<ReferencePlane>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    #[default]
    ResidualWindow,
    ScaledDistance,
}

/// Candidate search settings. Window arrays have one entry per plane pair
/// (`planes - 1`).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub kind: SearchKind,
    pub window_x_min: Vec<f64>,
    pub window_x_max: Vec<f64>,
    pub window_y_min: Vec<f64>,
    pub window_y_max: Vec<f64>,
    pub distance_max: Vec<f64>,
    pub per_z: f64,
    pub single_hit_only: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            kind: SearchKind::ResidualWindow,
            window_x_min: Vec::new(),
            window_x_max: Vec::new(),
            window_y_min: Vec::new(),
            window_y_max: Vec::new(),
            distance_max: Vec::new(),
            per_z: 100.0,
            single_hit_only: false,
        }
    }
}

impl SearchConfig {
    fn resolve(&self, planes: usize) -> SearchPolicy {
        let pairs = planes.saturating_sub(1);
        match self.kind {
            SearchKind::ResidualWindow => {
                let arrays = [
                    &self.window_x_min,
                    &self.window_x_max,
                    &self.window_y_min,
                    &self.window_y_max,
                ];
                if arrays.iter().all(|a| a.is_empty()) {
                    return SearchPolicy::default();
                }
                if arrays.iter().any(|a| a.len() != pairs) {
                    warn!(
                        "search windows need {} entries per array, got {:?}; using open windows",
                        pairs,
                        arrays.iter().map(|a| a.len()).collect::<Vec<_>>()
                    );
                    return SearchPolicy::default();
                }
                let windows = (0..pairs)
                    .map(|i| PairWindow {
                        x_min: self.window_x_min[i],
                        x_max: self.window_x_max[i],
                        y_min: self.window_y_min[i],
                        y_max: self.window_y_max[i],
                    })
                    .collect();
                SearchPolicy::ResidualWindow { windows }
            }
            SearchKind::ScaledDistance => {
                let usable = !self.distance_max.is_empty()
                    && (self.distance_max.len() == 1 || self.distance_max.len() == pairs);
                let distance_max = if usable {
                    self.distance_max.clone()
                } else {
                    warn!(
                        "distance_max has {} entries, expected 1 or {}; using {}",
                        self.distance_max.len(),
                        pairs,
                        DEFAULT_DISTANCE_MAX
                    );
                    vec![DEFAULT_DISTANCE_MAX]
                };
                let per_z = if self.per_z > 0.0 {
                    self.per_z
                } else {
                    warn!("per_z must be positive, got {}; using 100", self.per_z);
                    100.0
                };
                SearchPolicy::ScaledDistance {
                    distance_max,
                    per_z,
                    single_hit_only: self.single_hit_only,
                }
            }
        }
    }
}

/// Overrides of [`AlignParams`]; unset fields keep their defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    pub mode: Option<AlignMode>,
    pub allowed_missing_hits: Option<usize>,
    pub max_candidates: Option<usize>,
    pub max_total_tracks: Option<u64>,
    pub only_single_track_events: Option<bool>,
    /// Per-plane post-fit residual windows in z order.
    pub residual_cuts: Option<ResidualCuts>,
    pub missing_sigma_scale: Option<f64>,
    pub minimizer: Option<DampedNewtonParams>,
    pub on_geometry_mismatch: Option<GeometryMismatchPolicy>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OutputConfig {
    /// Millepede binary written by the demo.
    #[serde(default)]
    pub mille_binary: Option<PathBuf>,
    #[serde(default)]
    pub report_json: Option<PathBuf>,
}

fn per_plane<'a, T>(name: &str, values: &'a [T], planes: usize) -> Option<&'a [T]> {
    if values.is_empty() {
        return None;
    }
    if values.len() != planes {
        warn!(
            "{} has {} entries but the geometry has {} planes; ignoring it",
            name,
            values.len(),
            planes
        );
        return None;
    }
    Some(values)
}

impl RunConfig {
    /// Builds the geometry and aligner parameters, repairing inconsistent
    /// arrays with defaults.
    pub fn resolve(&self) -> Result<(Geometry, AlignParams)> {
        if self.planes.is_empty() {
            return Err(AlignError::Config("no planes configured".into()));
        }
        let n = self.planes.len();
        let mut sorted: Vec<&PlaneConfig> = self.planes.iter().collect();
        sorted.sort_by(|a, b| a.z.total_cmp(&b.z));

        let res_x = per_plane("resolution_x", &self.resolution_x, n);
        let res_y = per_plane("resolution_y", &self.resolution_y, n);
        let res_z = per_plane("resolution_z", &self.resolution_z, n);
        let masks = per_plane("fix_parameter", &self.fix_parameter, n);

        let planes = sorted
            .iter()
            .enumerate()
            .map(|(i, pc)| {
                let mut resolution = pc
                    .resolution
                    .unwrap_or(Resolution::uniform(DEFAULT_RESOLUTION));
                if let Some(v) = res_x {
                    resolution.x = v[i];
                }
                if let Some(v) = res_y {
                    resolution.y = v[i];
                }
                if let Some(v) = res_z {
                    resolution.z = v[i];
                }
                let mut plane = Plane::new(pc.sensor_id, pc.z, resolution);
                plane.reference = pc.reference;
                plane.fix_mask = masks.map_or(0, |m| m[i]);
                plane
            })
            .collect();

        let mut geometry = Geometry::new(planes)?;
        if let Some(id) = self.geometry_id {
            geometry = geometry.with_id(id);
        }
        geometry.apply_roles(&self.excluded_planes, &self.fixed_planes);

        let defaults = AlignParams::default();
        let a = &self.align;
        let residual_cuts = match &a.residual_cuts {
            Some(cuts) if !cuts.matches(n) => {
                warn!(
                    "residual cuts need {} entries per array; residual cuts disabled",
                    n
                );
                None
            }
            other => other.clone(),
        };
        let params = AlignParams {
            mode: a.mode.unwrap_or(defaults.mode),
            allowed_missing_hits: a
                .allowed_missing_hits
                .unwrap_or(defaults.allowed_missing_hits),
            max_candidates: a.max_candidates.unwrap_or(defaults.max_candidates),
            max_total_tracks: a.max_total_tracks.unwrap_or(defaults.max_total_tracks),
            search: self.search.resolve(n),
            only_single_track_events: a
                .only_single_track_events
                .unwrap_or(defaults.only_single_track_events),
            residual_cuts,
            missing_sigma_scale: a
                .missing_sigma_scale
                .unwrap_or(defaults.missing_sigma_scale),
            minimizer: a.minimizer.clone().unwrap_or(defaults.minimizer),
            geometry_id: self.geometry_id,
            on_geometry_mismatch: a
                .on_geometry_mismatch
                .unwrap_or(defaults.on_geometry_mismatch),
        };
        Ok((geometry, params))
    }
}

pub fn load_config(path: &Path) -> std::result::Result<RunConfig, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlaneRole;

    fn parse(json: &str) -> RunConfig {
        serde_json::from_str(json).unwrap()
    }

    const PLANES: &str = r#""planes": [
        {"sensor_id": 3, "z": 300.0},
        {"sensor_id": 0, "z": 0.0},
        {"sensor_id": 1, "z": 100.0},
        {"sensor_id": 2, "z": 200.0}
    ]"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse(&format!("{{{PLANES}}}"));
        let (geo, params) = cfg.resolve().unwrap();
        assert_eq!(geo.len(), 4);
        assert_eq!(geo.plane(0).sensor_id, 0);
        assert_eq!(geo.plane(3).resolution, Resolution::uniform(DEFAULT_RESOLUTION));
        assert_eq!(params, AlignParams::default());
    }

    #[test]
    fn arrays_apply_in_z_order() {
        let cfg = parse(&format!(
            r#"{{{PLANES},
            "resolution_x": [0.1, 0.2, 0.3, 0.4],
            "fix_parameter": [3, 0, 0, 32],
            "excluded_planes": [2],
            "fixed_planes": [0],
            "align": {{"mode": "full_3d", "allowed_missing_hits": 1}}}}"#
        ));
        let (geo, params) = cfg.resolve().unwrap();
        assert_eq!(geo.plane(1).resolution.x, 0.2);
        assert_eq!(geo.plane(3).fix_mask, 32);
        assert_eq!(geo.plane(2).role, PlaneRole::Excluded);
        assert_eq!(geo.plane(0).role, PlaneRole::Fixed);
        assert_eq!(params.mode, AlignMode::Full3D);
        assert_eq!(params.allowed_missing_hits, 1);
    }

    #[test]
    fn mismatched_arrays_fall_back_to_defaults() {
        let cfg = parse(&format!(
            r#"{{{PLANES},
            "resolution_y": [0.5, 0.5],
            "search": {{"window_x_min": [0.0], "window_x_max": [1.0],
                        "window_y_min": [0.0], "window_y_max": [1.0]}},
            "align": {{"residual_cuts": {{"x_min": [-1.0], "x_max": [1.0],
                                         "y_min": [-1.0], "y_max": [1.0]}}}}}}"#
        ));
        let (geo, params) = cfg.resolve().unwrap();
        assert_eq!(geo.plane(0).resolution.y, DEFAULT_RESOLUTION);
        assert_eq!(params.search, SearchPolicy::default());
        assert!(params.residual_cuts.is_none());
    }

    #[test]
    fn window_arrays_build_pair_windows() {
        let cfg = parse(&format!(
            r#"{{{PLANES},
            "search": {{"window_x_min": [0.0, 0.0, 0.0], "window_x_max": [1.0, 2.0, 3.0],
                        "window_y_min": [0.0, 0.0, 0.0], "window_y_max": [1.0, 1.0, 1.0]}}}}"#
        ));
        let (_, params) = cfg.resolve().unwrap();
        match params.search {
            SearchPolicy::ResidualWindow { windows } => {
                assert_eq!(windows.len(), 3);
                assert_eq!(windows[1].x_max, 2.0);
            }
            other => panic!("unexpected policy {:?}", other),
        }
    }

    #[test]
    fn zero_resolution_is_fatal() {
        let cfg = parse(&format!(
            r#"{{{PLANES}, "resolution_z": [0.01, 0.0, 0.01, 0.01]}}"#
        ));
        assert!(matches!(cfg.resolve(), Err(AlignError::Config(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/run.json")).unwrap_err();
        assert!(err.contains("/nonexistent/run.json"), "{}", err);
    }
}
