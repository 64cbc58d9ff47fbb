//! Serialisable run and event reports.
//!
//! [`RunReport`] is what the aligner accumulates over a run: event and track
//! counters, per-plane residual statistics, chi-square summary and stage
//! timings. [`EventSummary`] is returned for every processed event and folded
//! into the run report. Both serialise with camelCase keys for the JSON
//! written by the demo binary.

pub mod timing;

use crate::geometry::{AlignMode, Geometry};
use crate::types::Residual;
use serde::Serialize;

pub use timing::{StageTiming, TimingBreakdown};

/// Why an event produced no tracks without being an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    EndOfRun,
    /// More (or fewer) than one candidate with single-track events requested.
    NotSingleTrack,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub event_number: u64,
    pub candidates: usize,
    /// The candidate limit cut the search short.
    pub truncated: bool,
    pub tracks_fitted: usize,
    pub tracks_accepted: usize,
    pub rejected_by_cuts: usize,
    pub non_converged: usize,
    /// Candidates the fitter could not handle (too few contributing planes).
    pub fit_failures: usize,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl EventSummary {
    pub fn skipped(event_number: u64, reason: SkipReason) -> Self {
        Self {
            event_number,
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Online mean and RMS (Welford).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    pub rms: f64,
    #[serde(skip)]
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.rms = (self.m2 / self.count as f64).sqrt();
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneResiduals {
    pub sensor_id: i32,
    pub x: RunningStats,
    pub y: RunningStats,
    pub z: RunningStats,
}

impl PlaneResiduals {
    pub fn push(&mut self, r: &Residual) {
        self.x.push(r.x);
        self.y.push(r.y);
        self.z.push(r.z);
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_number: Option<u32>,
    pub mode: AlignMode,
    pub events_processed: u64,
    pub events_skipped: u64,
    pub candidates: u64,
    pub truncated_events: u64,
    pub tracks_fitted: u64,
    pub tracks_accepted: u64,
    pub rejected_by_cuts: u64,
    pub non_converged: u64,
    pub fit_failures: u64,
    /// Plane measurements handed to the solver.
    pub data_points: u64,
    pub records: u64,
    pub ceiling_reached: bool,
    pub chi2: RunningStats,
    pub planes: Vec<PlaneResiduals>,
    pub timings: TimingBreakdown,
}

impl RunReport {
    pub fn new(geometry: &Geometry, mode: AlignMode) -> Self {
        Self {
            run_number: None,
            mode,
            events_processed: 0,
            events_skipped: 0,
            candidates: 0,
            truncated_events: 0,
            tracks_fitted: 0,
            tracks_accepted: 0,
            rejected_by_cuts: 0,
            non_converged: 0,
            fit_failures: 0,
            data_points: 0,
            records: 0,
            ceiling_reached: false,
            chi2: RunningStats::default(),
            planes: geometry
                .planes()
                .iter()
                .map(|p| PlaneResiduals {
                    sensor_id: p.sensor_id,
                    ..PlaneResiduals::default()
                })
                .collect(),
            timings: TimingBreakdown::default(),
        }
    }

    pub fn absorb(&mut self, event: &EventSummary) {
        if event.skipped.is_some() {
            self.events_skipped += 1;
            return;
        }
        self.events_processed += 1;
        self.candidates += event.candidates as u64;
        self.truncated_events += u64::from(event.truncated);
        self.tracks_fitted += event.tracks_fitted as u64;
        self.tracks_accepted += event.tracks_accepted as u64;
        self.rejected_by_cuts += event.rejected_by_cuts as u64;
        self.non_converged += event.non_converged as u64;
        self.fit_failures += event.fit_failures as u64;
        self.records += event.records as u64;
    }

    /// Accumulates the residuals of an accepted track.
    pub fn push_track(&mut self, residuals: &[Option<Residual>], chi2: f64) {
        self.chi2.push(chi2);
        for (plane, r) in self.planes.iter_mut().zip(residuals) {
            if let Some(r) = r {
                plane.push(r);
            }
        }
    }
}
