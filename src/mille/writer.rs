//! Millepede-II binary record writer.
//!
//! One block per track:
//!
//! ```text
//! i32      2 * n
//! f32 x n  values
//! i32 x n  indices
//! ```
//!
//! Entry 0 is `(0.0, 0)`. Each measurement appends `(residual, 0)`, the
//! non-zero local derivatives as `(d, i + 1)`, `(sigma, 0)` and the non-zero
//! global derivatives as `(d, label)`. Values are single precision and all
//! words are little-endian.

use super::{AlignmentRecord, AlignmentSink};
use crate::error::Result;
use log::{debug, warn};
use std::io::Write;

pub struct MilleWriter<W: Write> {
    out: W,
    values: Vec<f32>,
    indices: Vec<i32>,
    tracks_written: u64,
    records_dropped: u64,
}

impl<W: Write> MilleWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            values: Vec::new(),
            indices: Vec::new(),
            tracks_written: 0,
            records_dropped: 0,
        }
    }

    pub fn tracks_written(&self) -> u64 {
        self.tracks_written
    }

    /// Records discarded because of a non-positive sigma.
    pub fn records_dropped(&self) -> u64 {
        self.records_dropped
    }

    /// Discards the records of the current track.
    pub fn kill(&mut self) {
        self.values.clear();
        self.indices.clear();
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }

    fn push(&mut self, value: f64, index: i32) {
        self.values.push(value as f32);
        self.indices.push(index);
    }
}

impl<W: Write> AlignmentSink for MilleWriter<W> {
    fn record(&mut self, record: &AlignmentRecord<'_>) -> Result<()> {
        if record.sigma <= 0.0 {
            if self.records_dropped == 0 {
                warn!("dropping record with non-positive sigma {}", record.sigma);
            }
            self.records_dropped += 1;
            return Ok(());
        }
        if self.values.is_empty() {
            self.push(0.0, 0);
        }
        self.push(record.residual, 0);
        for (i, &d) in record.local.iter().enumerate() {
            if d != 0.0 {
                self.push(d, i as i32 + 1);
            }
        }
        self.push(record.sigma, 0);
        for (&d, &label) in record.global.iter().zip(record.labels) {
            if d != 0.0 {
                self.push(d, label);
            }
        }
        Ok(())
    }

    fn end_track(&mut self) -> Result<()> {
        if self.values.is_empty() {
            return Ok(());
        }
        let words = 2 * self.values.len() as i32;
        self.out.write_all(&words.to_le_bytes())?;
        for v in &self.values {
            self.out.write_all(&v.to_le_bytes())?;
        }
        for i in &self.indices {
            self.out.write_all(&i.to_le_bytes())?;
        }
        self.tracks_written += 1;
        debug!("wrote track block with {} words", words);
        self.kill();
        Ok(())
    }
}
