//! Alignment observables and the sinks that consume them.
//!
//! A record ties one measured coordinate to the track (local) parameters and
//! to the alignment (global) parameters of its plane. Records are handed to
//! an [`AlignmentSink`] as borrowed views into the builder's buffers; sinks
//! that need to keep them copy what they need.

pub mod builder;
pub mod writer;

use crate::error::Result;

pub use builder::ObservableBuilder;
pub use writer::MilleWriter;

/// Local and global derivatives of one measurement.
#[derive(Clone, Copy, Debug)]
pub struct AlignmentRecord<'a> {
    /// Derivatives w.r.t. the track parameters `(x0, y0, dx/dz, dy/dz)`.
    pub local: &'a [f64],
    /// Derivatives w.r.t. the global parameters, aligned with `labels`.
    pub global: &'a [f64],
    pub labels: &'a [i32],
    pub residual: f64,
    pub sigma: f64,
}

impl AlignmentRecord<'_> {
    pub fn to_owned_record(&self) -> OwnedRecord {
        OwnedRecord {
            local: self.local.to_vec(),
            global: self.global.to_vec(),
            labels: self.labels.to_vec(),
            residual: self.residual,
            sigma: self.sigma,
        }
    }
}

/// Consumer of alignment records, typically the solver's binary input.
pub trait AlignmentSink {
    fn record(&mut self, record: &AlignmentRecord<'_>) -> Result<()>;

    /// Closes the current track; records after this belong to the next one.
    fn end_track(&mut self) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct OwnedRecord {
    pub local: Vec<f64>,
    pub global: Vec<f64>,
    pub labels: Vec<i32>,
    pub residual: f64,
    pub sigma: f64,
}

impl OwnedRecord {
    /// Non-zero global derivatives as `(label, derivative)` pairs.
    pub fn nonzero_globals(&self) -> Vec<(i32, f64)> {
        self.labels
            .iter()
            .zip(&self.global)
            .filter(|(_, d)| **d != 0.0)
            .map(|(l, d)| (*l, *d))
            .collect()
    }
}

/// In-memory sink keeping every record, grouped by track.
#[derive(Clone, Debug, Default)]
pub struct RecordCollector {
    tracks: Vec<Vec<OwnedRecord>>,
    current: Vec<OwnedRecord>,
}

impl RecordCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[Vec<OwnedRecord>] {
        &self.tracks
    }

    /// Records of the track still open (not yet ended).
    pub fn pending(&self) -> &[OwnedRecord] {
        &self.current
    }

    pub fn record_count(&self) -> usize {
        self.tracks.iter().map(Vec::len).sum::<usize>() + self.current.len()
    }
}

impl AlignmentSink for RecordCollector {
    fn record(&mut self, record: &AlignmentRecord<'_>) -> Result<()> {
        self.current.push(record.to_owned_record());
        Ok(())
    }

    fn end_track(&mut self) -> Result<()> {
        if !self.current.is_empty() {
            self.tracks.push(std::mem::take(&mut self.current));
        }
        Ok(())
    }
}
