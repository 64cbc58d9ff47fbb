//! Per-event alignment driver.
//!
//! [`Aligner`] owns everything that lives for a run: the geometry, the
//! candidate search, the reusable candidate arena and fit workspace, the
//! record builder with its label numbering, and the run report. For every
//! event it
//!
//! 1. checks the event against the geometry and the run's track ceiling,
//! 2. enumerates track candidates,
//! 3. fits each candidate with the fitter of the alignment mode,
//! 4. drops non-converged fits and tracks failing the residual cuts,
//! 5. emits the alignment records of the surviving tracks to the sink.
//!
//! Processing is single-threaded and deterministic: records come out in
//! candidate order and, within a track, in the z order of the active planes.

pub mod cuts;
pub mod params;

use crate::diagnostics::{EventSummary, RunReport, SkipReason};
use crate::error::{AlignError, Result};
use crate::event::{EventHits, EventKind, RunHeader};
use crate::fit::{fit_linear, DampedNewton, FitWorkspace, FittedTrack, Line3dFitter};
use crate::geometry::{Geometry, LabelMap};
use crate::mille::{AlignmentSink, ObservableBuilder};
use crate::search::{CandidateSet, TrackSearch};
use log::{debug, info, warn};
use std::borrow::Borrow;
use std::time::Instant;

pub use cuts::ResidualCuts;
pub use params::{AlignMode, AlignParams, GeometryMismatchPolicy};

pub struct Aligner {
    geometry: Geometry,
    params: AlignParams,
    search: TrackSearch,
    candidates: CandidateSet,
    workspace: FitWorkspace,
    line3d: Line3dFitter<DampedNewton>,
    builder: ObservableBuilder,
    report: RunReport,
    total_tracks: u64,
}

impl Aligner {
    pub fn new(geometry: Geometry, params: AlignParams) -> Result<Self> {
        if geometry.active_count() < 2 {
            return Err(AlignError::Config(format!(
                "at least two non-excluded planes are needed, geometry has {}",
                geometry.active_count()
            )));
        }
        if !(params.missing_sigma_scale.is_finite() && params.missing_sigma_scale > 0.0) {
            return Err(AlignError::Config(format!(
                "missing_sigma_scale must be positive, got {}",
                params.missing_sigma_scale
            )));
        }
        if let Some(cuts) = &params.residual_cuts {
            if !cuts.matches(geometry.len()) {
                warn!(
                    "residual cuts cover {} planes, geometry has {}; extra planes are unconstrained",
                    cuts.len(),
                    geometry.len()
                );
            }
        }

        let search = TrackSearch::from_policy(
            &params.search,
            params.allowed_missing_hits,
            params.max_candidates,
        );
        if params.allowed_missing_hits > 0 && search.allowed_missing() == 0 {
            warn!("search policy does not bridge missing hits, allowed_missing_hits ignored");
        }
        let builder = ObservableBuilder::new(&geometry, params.mode);
        info!(
            "aligner: {} planes ({} active), mode {:?}, {} global parameters",
            geometry.len(),
            geometry.active_count(),
            params.mode,
            builder.label_map().global_len()
        );
        Ok(Self {
            candidates: CandidateSet::new(geometry.len()),
            workspace: FitWorkspace::new(&geometry, params.missing_sigma_scale),
            line3d: Line3dFitter::new(DampedNewton::new(params.minimizer.clone())),
            report: RunReport::new(&geometry, params.mode),
            builder,
            search,
            geometry,
            params,
            total_tracks: 0,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn params(&self) -> &AlignParams {
        &self.params
    }

    pub fn label_map(&self) -> &LabelMap {
        self.builder.label_map()
    }

    /// Labels to pin in the solver steering.
    pub fn fixed_labels(&self) -> Vec<i32> {
        self.builder.label_map().fixed_labels(&self.geometry)
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn into_report(self) -> RunReport {
        self.report
    }

    pub fn total_tracks(&self) -> u64 {
        self.total_tracks
    }

    /// Candidates of the last processed event.
    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    /// Checks the run header against the configured geometry id.
    pub fn begin_run(&mut self, header: &RunHeader) -> Result<()> {
        self.report.run_number = Some(header.run_number);
        if let Some(expected) = self.params.geometry_id.or(self.geometry.id()) {
            if expected != header.geometry_id {
                let err = AlignError::GeometryMismatch {
                    expected,
                    found: header.geometry_id,
                };
                match self.params.on_geometry_mismatch {
                    GeometryMismatchPolicy::Continue => {
                        warn!("run {}: {err}; continuing", header.run_number)
                    }
                    GeometryMismatchPolicy::Abort => return Err(err),
                }
            }
        }
        info!("run {} started", header.run_number);
        Ok(())
    }

    fn check_ceiling(&self) -> Result<()> {
        if self.total_tracks >= self.params.max_total_tracks {
            return Err(AlignError::TrackCeilingReached {
                limit: self.params.max_total_tracks,
            });
        }
        Ok(())
    }

    fn fit(&mut self) -> Option<FittedTrack> {
        match self.params.mode {
            AlignMode::Full3D => self.line3d.fit(&self.geometry, &mut self.workspace),
            AlignMode::ShiftOnly | AlignMode::ShiftRotation => fit_linear(&mut self.workspace),
        }
    }

    /// Searches, fits and emits the tracks of one event.
    pub fn process_event(
        &mut self,
        event: &EventHits,
        sink: &mut dyn AlignmentSink,
    ) -> Result<EventSummary> {
        if event.kind == EventKind::EndOfRun {
            let summary = EventSummary::skipped(event.event_number, SkipReason::EndOfRun);
            self.report.absorb(&summary);
            return Ok(summary);
        }
        if event.planes.len() != self.geometry.len() {
            return Err(AlignError::MissingInput {
                event: event.event_number,
                expected: self.geometry.len(),
                found: event.planes.len(),
            });
        }
        if let Err(err) = self.check_ceiling() {
            self.report.ceiling_reached = true;
            return Err(err);
        }

        let start = Instant::now();
        self.search.find(event, &mut self.candidates);
        self.report
            .timings
            .accumulate("search", start.elapsed().as_secs_f64() * 1000.0);

        let mut summary = EventSummary {
            event_number: event.event_number,
            candidates: self.candidates.len(),
            truncated: self.candidates.truncated(),
            ..EventSummary::default()
        };
        if self.params.only_single_track_events && self.candidates.len() != 1 {
            summary.skipped = Some(SkipReason::NotSingleTrack);
            self.report.absorb(&summary);
            return Ok(summary);
        }

        for index in 0..self.candidates.len() {
            if let Err(err) = self.check_ceiling() {
                self.report.ceiling_reached = true;
                self.report.absorb(&summary);
                return Err(err);
            }
            self.workspace
                .load(&self.geometry, event, self.candidates.get(index));

            let start = Instant::now();
            let fitted = self.fit();
            let fit_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.report.timings.accumulate("fit", fit_ms);
            #[cfg(feature = "profile_fit")]
            debug!(
                "event {} candidate {}: fit took {:.3} ms",
                event.event_number, index, fit_ms
            );

            let Some(track) = fitted else {
                summary.fit_failures += 1;
                continue;
            };
            summary.tracks_fitted += 1;
            let passes_cuts = self
                .params
                .residual_cuts
                .as_ref()
                .map_or(true, |cuts| cuts.accepts(&self.geometry, &track));
            if !track.converged {
                summary.non_converged += 1;
            } else if !passes_cuts {
                summary.rejected_by_cuts += 1;
            } else {
                let start = Instant::now();
                let emitted =
                    self.builder
                        .emit(&self.geometry, self.workspace.points(), &track, sink);
                self.report
                    .timings
                    .accumulate("emit", start.elapsed().as_secs_f64() * 1000.0);
                summary.records += emitted?;
                summary.tracks_accepted += 1;
                self.total_tracks += 1;
                self.report.push_track(&track.residuals, track.chi2_total());
            }
            self.workspace.recycle(track);
        }

        self.report.data_points = self.builder.data_points();
        self.report.absorb(&summary);
        debug!(
            "event {}: {} candidates, {} fitted, {} accepted, {} records",
            summary.event_number,
            summary.candidates,
            summary.tracks_fitted,
            summary.tracks_accepted,
            summary.records
        );
        Ok(summary)
    }

    /// Processes `events` in order. Events without the expected plane lists
    /// are skipped with a warning; reaching the track ceiling ends the run
    /// early and is reported through [`RunReport::ceiling_reached`].
    pub fn run<I>(&mut self, events: I, sink: &mut dyn AlignmentSink) -> Result<&RunReport>
    where
        I: IntoIterator,
        I::Item: Borrow<EventHits>,
    {
        let start = Instant::now();
        for event in events {
            let event = event.borrow();
            match self.process_event(event, sink) {
                Ok(_) => {}
                Err(err) if err.is_event_local() => {
                    warn!("skipping event {}: {err}", event.event_number);
                    self.report.events_skipped += 1;
                }
                Err(err @ AlignError::TrackCeilingReached { .. }) => {
                    info!("{err}");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        self.report.timings.total_ms += start.elapsed().as_secs_f64() * 1000.0;
        self.report.data_points = self.builder.data_points();
        info!(
            "run finished: {} events, {} candidates, {} tracks accepted, {} data points",
            self.report.events_processed,
            self.report.candidates,
            self.report.tracks_accepted,
            self.report.data_points
        );
        Ok(&self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::DampedNewtonParams;
    use crate::geometry::{Plane, PlaneRole, Resolution};
    use crate::mille::RecordCollector;
    use crate::types::Hit;

    fn geometry() -> Geometry {
        let planes = (0..4)
            .map(|i| Plane::new(i, i as f64 * 100.0, Resolution::uniform(0.01)))
            .collect();
        Geometry::new(planes).unwrap()
    }

    fn event(number: u64) -> EventHits {
        let planes = (0..4)
            .map(|i| {
                let z = i as f64 * 100.0;
                vec![Hit::new(0.5 * z, 0.2 * z, z)]
            })
            .collect();
        EventHits::new(1, number, planes)
    }

    #[test]
    fn end_of_run_is_skipped() {
        let mut aligner = Aligner::new(geometry(), AlignParams::default()).unwrap();
        let mut sink = RecordCollector::new();
        let s = aligner
            .process_event(&EventHits::end_of_run(1, 9), &mut sink)
            .unwrap();
        assert_eq!(s.skipped, Some(SkipReason::EndOfRun));
        assert_eq!(sink.record_count(), 0);
    }

    #[test]
    fn wrong_plane_count_is_missing_input() {
        let mut aligner = Aligner::new(geometry(), AlignParams::default()).unwrap();
        let mut sink = RecordCollector::new();
        let mut ev = event(0);
        ev.planes.pop();
        let err = aligner.process_event(&ev, &mut sink).unwrap_err();
        assert!(matches!(err, AlignError::MissingInput { expected: 4, found: 3, .. }));
        assert!(err.is_event_local());
    }

    #[test]
    fn ceiling_stops_the_run() {
        let params = AlignParams {
            max_total_tracks: 3,
            ..AlignParams::default()
        };
        let mut aligner = Aligner::new(geometry(), params).unwrap();
        let mut sink = RecordCollector::new();
        let events: Vec<EventHits> = (0..10).map(event).collect();
        let report = aligner.run(&events, &mut sink).unwrap();
        assert!(report.ceiling_reached);
        assert_eq!(report.tracks_accepted, 3);
        assert_eq!(sink.tracks().len(), 3);
        assert!(matches!(
            aligner.process_event(&event(11), &mut sink),
            Err(AlignError::TrackCeilingReached { limit: 3 })
        ));
    }

    #[test]
    fn geometry_mismatch_follows_policy() {
        let header = RunHeader {
            run_number: 7,
            geometry_id: 2,
        };
        let params = AlignParams {
            geometry_id: Some(1),
            ..AlignParams::default()
        };
        let mut lenient = Aligner::new(geometry(), params.clone()).unwrap();
        assert!(lenient.begin_run(&header).is_ok());

        let strict_params = AlignParams {
            on_geometry_mismatch: GeometryMismatchPolicy::Abort,
            ..params
        };
        let mut strict = Aligner::new(geometry(), strict_params).unwrap();
        assert!(matches!(
            strict.begin_run(&header),
            Err(AlignError::GeometryMismatch {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn non_converged_fits_emit_nothing() {
        let params = AlignParams {
            mode: AlignMode::Full3D,
            minimizer: DampedNewtonParams {
                max_iterations: 0,
                restarts: 0,
                ..DampedNewtonParams::default()
            },
            ..AlignParams::default()
        };
        let mut aligner = Aligner::new(geometry(), params).unwrap();
        let mut sink = RecordCollector::new();
        let s = aligner.process_event(&event(0), &mut sink).unwrap();
        assert_eq!(s.tracks_fitted, 1);
        assert_eq!(s.non_converged, 1);
        assert_eq!(s.records, 0);
        assert_eq!(sink.record_count(), 0);
    }

    #[test]
    fn single_track_filter_skips_ambiguous_events() {
        let params = AlignParams {
            only_single_track_events: true,
            ..AlignParams::default()
        };
        let mut aligner = Aligner::new(geometry(), params).unwrap();
        let mut sink = RecordCollector::new();
        let mut ev = event(0);
        ev.planes[1].push(Hit::new(80.0, 20.0, 100.0));
        let s = aligner.process_event(&ev, &mut sink).unwrap();
        assert_eq!(s.candidates, 2);
        assert_eq!(s.skipped, Some(SkipReason::NotSingleTrack));
        assert_eq!(sink.record_count(), 0);

        let s = aligner.process_event(&event(1), &mut sink).unwrap();
        assert_eq!(s.tracks_accepted, 1);
        assert_eq!(s.records, 8);
    }

    #[test]
    fn residual_cuts_reject_outliers() {
        let params = AlignParams {
            residual_cuts: Some(ResidualCuts::uniform(4, (-0.1, 0.1), (-0.1, 0.1))),
            ..AlignParams::default()
        };
        let mut aligner = Aligner::new(geometry(), params).unwrap();
        let mut sink = RecordCollector::new();
        let mut ev = event(0);
        ev.planes[2][0].x += 5.0;
        let s = aligner.process_event(&ev, &mut sink).unwrap();
        assert_eq!(s.rejected_by_cuts, 1);
        assert_eq!(s.tracks_accepted, 0);
    }

    #[test]
    fn residual_cuts_ignore_excluded_planes() {
        let planes = (0..4)
            .map(|i| {
                let plane = Plane::new(i, i as f64 * 100.0, Resolution::uniform(0.01));
                if i == 2 {
                    plane.with_role(PlaneRole::Excluded)
                } else {
                    plane
                }
            })
            .collect();
        let geo = Geometry::new(planes).unwrap();
        let params = AlignParams {
            residual_cuts: Some(ResidualCuts::uniform(4, (-0.1, 0.1), (-0.1, 0.1))),
            ..AlignParams::default()
        };
        let mut aligner = Aligner::new(geo, params).unwrap();
        let mut sink = RecordCollector::new();
        let events: Vec<EventHits> = (0..20)
            .map(|n| {
                let mut ev = event(n);
                ev.planes[2][0].x += 1.0;
                ev
            })
            .collect();
        let report = aligner.run(&events, &mut sink).unwrap();
        assert_eq!(report.rejected_by_cuts, 0);
        assert_eq!(report.tracks_accepted, 20);
        assert_eq!(sink.tracks().len(), 20);
        assert_eq!(sink.tracks()[0].len(), 6);
    }

    #[test]
    fn needs_two_active_planes() {
        let geo = Geometry::new(vec![Plane::new(0, 0.0, Resolution::uniform(0.01))]).unwrap();
        assert!(matches!(
            Aligner::new(geo, AlignParams::default()),
            Err(AlignError::Config(_))
        ));
    }
}
