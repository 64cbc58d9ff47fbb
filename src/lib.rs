#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod aligner;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod geometry;
pub mod io;
pub mod mille;
pub mod sim;
pub mod types;

// Building blocks the aligner drives; usable on their own.
pub mod fit;
pub mod search;

// --- High-level re-exports -------------------------------------------------

// Main entry point and its parameters.
pub use crate::aligner::{AlignMode, AlignParams, Aligner, GeometryMismatchPolicy, ResidualCuts};
pub use crate::error::{AlignError, Result};

// Detector description and per-event input.
pub use crate::event::{EventHits, EventKind, RunHeader};
pub use crate::geometry::{Geometry, Plane, PlaneRole, ReferencePlane, Resolution};
pub use crate::types::{Axis, Hit, Residual};

// Record sinks and run diagnostics.
pub use crate::diagnostics::{EventSummary, RunReport};
pub use crate::mille::{AlignmentRecord, AlignmentSink, MilleWriter, RecordCollector};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use telescope_align::prelude::*;
///
/// # fn main() -> Result<()> {
/// let planes = (0..6)
///     .map(|i| Plane::new(i, i as f64 * 150.0, Resolution::uniform(0.004)))
///     .collect();
/// let geometry = Geometry::new(planes)?;
///
/// let events = TestBeam::new(&geometry, TestBeamParams::default());
/// let mut aligner = Aligner::new(geometry, AlignParams::default())?;
/// let mut sink = RecordCollector::new();
///
/// let report = aligner.run(events, &mut sink)?;
/// println!("tracks={} records={}", report.tracks_accepted, report.records);
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::sim::{TestBeam, TestBeamParams};
    pub use crate::{
        AlignParams, Aligner, EventHits, Geometry, Hit, Plane, RecordCollector, Resolution,
        Result,
    };
}
