//! Turns a fitted track into alignment records.
//!
//! Every measured, non-excluded plane contributes one record per measured
//! axis (x and y, plus z in the full 3D mode). Global derivative positions
//! and labels come from the run's [`LabelMap`]; the derivative and label
//! buffers are owned here and reused for every record.

use super::{AlignmentRecord, AlignmentSink};
use crate::error::Result;
use crate::fit::{FitPoint, FittedTrack};
use crate::geometry::{AlignMode, Geometry, GlobalParam, LabelMap};
use crate::types::Residual;
use log::debug;
use nalgebra::Vector3;

pub struct ObservableBuilder {
    mode: AlignMode,
    labels: LabelMap,
    local: [f64; 4],
    global: Vec<f64>,
    label_buf: Vec<i32>,
    data_points: u64,
    tracks: u64,
}

impl ObservableBuilder {
    pub fn new(geometry: &Geometry, mode: AlignMode) -> Self {
        let labels = LabelMap::new(geometry, mode);
        let global = vec![0.0; labels.global_len()];
        let label_buf = labels.labels();
        Self {
            mode,
            labels,
            local: [0.0; 4],
            global,
            label_buf,
            data_points: 0,
            tracks: 0,
        }
    }

    pub fn mode(&self) -> AlignMode {
        self.mode
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.labels
    }

    /// Plane measurements emitted so far (one per plane, not per axis).
    pub fn data_points(&self) -> u64 {
        self.data_points
    }

    pub fn tracks(&self) -> u64 {
        self.tracks
    }

    /// Emits the records of one track and closes it on the sink. Returns the
    /// number of records emitted.
    pub fn emit(
        &mut self,
        geometry: &Geometry,
        points: &[FitPoint],
        track: &FittedTrack,
        sink: &mut dyn AlignmentSink,
    ) -> Result<usize> {
        let mut records = 0usize;
        for (ordinal, (plane, point)) in geometry.planes().iter().zip(points).enumerate() {
            if !point.measured || plane.is_excluded() {
                continue;
            }
            let Some(residual) = track.residual(ordinal).copied() else {
                continue;
            };
            let hit = point.position;
            match self.mode {
                AlignMode::ShiftOnly | AlignMode::ShiftRotation => {
                    let rotation = self.mode == AlignMode::ShiftRotation;

                    self.reset([1.0, 0.0, hit.z, 0.0]);
                    self.set(ordinal, GlobalParam::ShiftX, -1.0);
                    if rotation {
                        self.set(ordinal, GlobalParam::Gamma, hit.y);
                    }
                    self.send(sink, residual.x, point.sigma.x)?;

                    self.reset([0.0, 1.0, 0.0, hit.z]);
                    self.set(ordinal, GlobalParam::ShiftY, -1.0);
                    if rotation {
                        self.set(ordinal, GlobalParam::Gamma, -hit.x);
                    }
                    self.send(sink, residual.y, point.sigma.y)?;
                    records += 2;
                }
                AlignMode::Full3D => {
                    records += self.emit_full(ordinal, plane.pivot(), point, &residual, sink)?;
                }
            }
            self.data_points += 1;
        }
        sink.end_track()?;
        self.tracks += 1;
        debug!("track {}: {} records", self.tracks, records);
        Ok(records)
    }

    fn emit_full(
        &mut self,
        ordinal: usize,
        pivot: Vector3<f64>,
        point: &FitPoint,
        r: &Residual,
        sink: &mut dyn AlignmentSink,
    ) -> Result<usize> {
        use GlobalParam::*;
        let hit = point.position;
        let (dx, dy, dz) = (hit.x - pivot.x, hit.y - pivot.y, hit.z - pivot.z);

        self.reset([1.0, 0.0, hit.z + r.z, 0.0]);
        self.set(ordinal, ShiftX, -1.0);
        self.set(ordinal, Beta, -dz);
        self.set(ordinal, Gamma, dy);
        self.send(sink, r.x, point.sigma.x)?;

        self.reset([0.0, 1.0, 0.0, hit.z + r.z]);
        self.set(ordinal, ShiftY, -1.0);
        self.set(ordinal, Alpha, dz);
        self.set(ordinal, Gamma, -dx);
        self.send(sink, r.y, point.sigma.y)?;

        self.reset([0.0, 0.0, hit.x + r.x, hit.y + r.y]);
        self.set(ordinal, ShiftZ, -1.0);
        self.set(ordinal, Alpha, -dy);
        self.set(ordinal, Beta, dx);
        self.send(sink, r.z, point.sigma.z)?;
        Ok(3)
    }

    fn reset(&mut self, local: [f64; 4]) {
        self.local = local;
        self.global.fill(0.0);
    }

    fn set(&mut self, ordinal: usize, param: GlobalParam, value: f64) {
        if let Some(slot) = self.labels.slot(ordinal, param) {
            self.global[slot] = value;
        }
    }

    fn send(&self, sink: &mut dyn AlignmentSink, residual: f64, sigma: f64) -> Result<()> {
        sink.record(&AlignmentRecord {
            local: &self.local,
            global: &self.global,
            labels: &self.label_buf,
            residual,
            sigma,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventHits;
    use crate::fit::{fit_linear, FitWorkspace};
    use crate::geometry::{Plane, PlaneRole, ReferencePlane, Resolution};
    use crate::mille::RecordCollector;
    use crate::types::Hit;

    fn setup(roles: &[PlaneRole]) -> (Geometry, FitWorkspace, FittedTrack) {
        let planes = roles
            .iter()
            .enumerate()
            .map(|(i, r)| {
                Plane::new(i as i32, i as f64 * 100.0, Resolution::uniform(0.01)).with_role(*r)
            })
            .collect();
        let geo = Geometry::new(planes).unwrap();
        let hits = geo
            .planes()
            .iter()
            .map(|p| vec![Hit::new(0.5 * p.z, 0.2 * p.z, p.z)])
            .collect();
        let ev = EventHits::new(1, 0, hits);
        let mut ws = FitWorkspace::new(&geo, 1e6);
        ws.load(&geo, &ev, &vec![Some(0); geo.len()]);
        let track = fit_linear(&mut ws).unwrap();
        (geo, ws, track)
    }

    #[test]
    fn shift_only_records_have_unit_shift_derivatives() {
        let (geo, ws, track) = setup(&[PlaneRole::Free; 4]);
        let mut builder = ObservableBuilder::new(&geo, AlignMode::ShiftOnly);
        let mut sink = RecordCollector::new();
        let n = builder
            .emit(&geo, ws.points(), &track, &mut sink)
            .unwrap();

        assert_eq!(n, 8);
        assert_eq!(sink.tracks().len(), 1);
        let records = &sink.tracks()[0];
        for (i, rec) in records.iter().enumerate() {
            let plane = i / 2;
            let slot = 2 * plane + i % 2;
            assert_eq!(rec.global.len(), 8);
            for (j, d) in rec.global.iter().enumerate() {
                let expected = if j == slot { -1.0 } else { 0.0 };
                assert_eq!(*d, expected, "record {} slot {}", i, j);
            }
            assert!(rec.residual.abs() < 1e-9);
            assert_eq!(rec.sigma, 0.01);
        }
        assert_eq!(records[2].local, vec![1.0, 0.0, 100.0, 0.0]);
        assert_eq!(records[3].local, vec![0.0, 1.0, 0.0, 100.0]);
        assert_eq!(builder.data_points(), 4);
        assert_eq!(builder.tracks(), 1);
    }

    #[test]
    fn rotation_derivatives_use_hit_position() {
        let (geo, ws, track) = setup(&[PlaneRole::Free; 3]);
        let mut builder = ObservableBuilder::new(&geo, AlignMode::ShiftRotation);
        let mut sink = RecordCollector::new();
        builder.emit(&geo, ws.points(), &track, &mut sink).unwrap();

        let records = &sink.tracks()[0];
        // plane 2 at z = 200: x = 100, y = 40
        assert_eq!(records[4].nonzero_globals(), vec![(7, -1.0), (9, 40.0)]);
        assert_eq!(records[5].nonzero_globals(), vec![(8, -1.0), (9, -100.0)]);
    }

    #[test]
    fn excluded_plane_emits_nothing_and_shifts_labels() {
        let (geo, ws, track) = setup(&[
            PlaneRole::Free,
            PlaneRole::Excluded,
            PlaneRole::Free,
            PlaneRole::Free,
        ]);
        let mut builder = ObservableBuilder::new(&geo, AlignMode::ShiftOnly);
        let mut sink = RecordCollector::new();
        let n = builder.emit(&geo, ws.points(), &track, &mut sink).unwrap();

        assert_eq!(n, 6);
        assert_eq!(builder.data_points(), 3);
        let records = &sink.tracks()[0];
        assert_eq!(records[0].labels, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(records[2].nonzero_globals(), vec![(3, -1.0)]);
    }

    #[test]
    fn full_mode_emits_three_records_per_plane() {
        let (geo, ws, track) = setup(&[PlaneRole::Free; 2]);
        let mut builder = ObservableBuilder::new(&geo, AlignMode::Full3D);
        let mut sink = RecordCollector::new();
        let n = builder.emit(&geo, ws.points(), &track, &mut sink).unwrap();
        assert_eq!(n, 6);

        let records = &sink.tracks()[0];
        // plane 1 at z = 100: x = 50, y = 20, no survey offset
        let z_rec = &records[5];
        assert_eq!(z_rec.local[..2], [0.0, 0.0]);
        assert!((z_rec.local[2] - 50.0).abs() < 1e-9);
        assert!((z_rec.local[3] - 20.0).abs() < 1e-9);
        assert_eq!(
            z_rec.nonzero_globals(),
            vec![(9, -1.0), (10, -20.0), (11, 50.0)]
        );
        let x_rec = &records[3];
        assert_eq!(x_rec.nonzero_globals(), vec![(7, -1.0), (11, -100.0), (12, 20.0)]);
    }

    #[test]
    fn full_mode_uses_shifted_lever_arm_and_survey_pivot() {
        let planes = vec![
            Plane::new(0, 0.0, Resolution::uniform(0.01)),
            Plane::new(1, 100.0, Resolution::uniform(0.01)).with_reference(ReferencePlane {
                offset: Vector3::new(1.0, -2.0, 100.5),
                normal: Vector3::new(0.0, 0.0, 1.0),
            }),
        ];
        let geo = Geometry::new(planes).unwrap();
        let point = |x: f64, y: f64, z: f64| FitPoint {
            position: Vector3::new(x, y, z),
            sigma: Resolution::uniform(0.01),
            measured: true,
            contributes: true,
        };
        let points = [point(0.0, 0.0, 0.0), point(50.0, 20.0, 100.0)];
        let track = FittedTrack {
            point: Vector3::zeros(),
            direction: Vector3::new(0.0, 0.0, 1.0),
            slope: [0.0; 2],
            angle: [0.0; 2],
            chi2: [0.0; 3],
            residuals: vec![
                Some(Residual::new(0.0, 0.0, 0.0)),
                Some(Residual::new(0.25, -0.5, 0.125)),
            ],
            converged: true,
            iterations: 0,
        };
        let mut builder = ObservableBuilder::new(&geo, AlignMode::Full3D);
        let mut sink = RecordCollector::new();
        builder.emit(&geo, &points, &track, &mut sink).unwrap();

        // hit (50, 20, 100) against pivot (1, -2, 100.5): lever arm (49, 22, -0.5)
        let records = &sink.tracks()[0];
        let (x_rec, y_rec, z_rec) = (&records[3], &records[4], &records[5]);
        assert_eq!(x_rec.local, vec![1.0, 0.0, 100.125, 0.0]);
        assert_eq!(x_rec.nonzero_globals(), vec![(7, -1.0), (11, 0.5), (12, 22.0)]);
        assert_eq!(x_rec.residual, 0.25);

        assert_eq!(y_rec.local, vec![0.0, 1.0, 0.0, 100.125]);
        assert_eq!(y_rec.nonzero_globals(), vec![(8, -1.0), (10, -0.5), (12, -49.0)]);
        assert_eq!(y_rec.residual, -0.5);

        assert_eq!(z_rec.local, vec![0.0, 0.0, 50.25, 19.5]);
        assert_eq!(z_rec.nonzero_globals(), vec![(9, -1.0), (10, -22.0), (11, 49.0)]);
        assert_eq!(z_rec.residual, 0.125);
    }

    #[test]
    fn labels_are_stable_across_tracks() {
        let geo = Geometry::new(
            (0..4)
                .map(|i| Plane::new(i, i as f64 * 100.0, Resolution::uniform(0.01)))
                .collect(),
        )
        .unwrap();
        let event = |number: u64, slope: f64| {
            let hits = geo
                .planes()
                .iter()
                .map(|p| vec![Hit::new(slope * p.z + 1.0, -slope * p.z, p.z)])
                .collect();
            EventHits::new(1, number, hits)
        };
        let mut builder = ObservableBuilder::new(&geo, AlignMode::ShiftRotation);
        let mut sink = RecordCollector::new();
        let mut ws = FitWorkspace::new(&geo, 1e6);

        ws.load(&geo, &event(0, 0.5), &[Some(0); 4]);
        let first = fit_linear(&mut ws).unwrap();
        builder.emit(&geo, ws.points(), &first, &mut sink).unwrap();

        ws.load(&geo, &event(1, -0.3), &[Some(0), None, Some(0), Some(0)]);
        let second = fit_linear(&mut ws).unwrap();
        builder.emit(&geo, ws.points(), &second, &mut sink).unwrap();

        let (a, b) = (&sink.tracks()[0], &sink.tracks()[1]);
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 6);
        for rec in a.iter().chain(b.iter()) {
            assert_eq!(rec.labels, (1..=12).collect::<Vec<i32>>());
        }
        // plane 2 keeps labels 7..=9 although plane 1 is missing in the second event
        assert_eq!(a[4].nonzero_globals()[0], (7, -1.0));
        assert_eq!(b[2].nonzero_globals()[0], (7, -1.0));
        assert_eq!(a[5].nonzero_globals()[0], (8, -1.0));
        assert_eq!(b[3].nonzero_globals()[0], (8, -1.0));
        assert_ne!(a[4].nonzero_globals(), b[2].nonzero_globals());
        assert_eq!(builder.tracks(), 2);
    }
}
