//! Per-event hit container handed to the aligner by the hit supply.

use crate::geometry::Geometry;
use crate::types::Hit;
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[default]
    Data,
    /// End-of-run marker; carries no hits and is skipped.
    EndOfRun,
}

/// Hits of one event grouped by plane ordinal (z order).
///
/// `planes[i]` holds the hits of geometry plane `i`, in the order the hit
/// supply produced them. That order is significant: candidate tuples refer to
/// hits by their index inside the plane list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventHits {
    pub run_number: u32,
    pub event_number: u64,
    #[serde(default)]
    pub kind: EventKind,
    pub planes: Vec<Vec<Hit>>,
}

impl EventHits {
    pub fn new(run_number: u32, event_number: u64, planes: Vec<Vec<Hit>>) -> Self {
        Self {
            run_number,
            event_number,
            kind: EventKind::Data,
            planes,
        }
    }

    pub fn end_of_run(run_number: u32, event_number: u64) -> Self {
        Self {
            run_number,
            event_number,
            kind: EventKind::EndOfRun,
            planes: Vec::new(),
        }
    }

    /// Groups `(sensor_id, hit)` pairs by plane. Hits from sensors the
    /// geometry does not know are dropped with a warning.
    pub fn from_sensor_hits<I>(
        geometry: &Geometry,
        run_number: u32,
        event_number: u64,
        hits: I,
    ) -> Self
    where
        I: IntoIterator<Item = (i32, Hit)>,
    {
        let mut planes = vec![Vec::new(); geometry.len()];
        for (sensor_id, hit) in hits {
            match geometry.ordinal_of(sensor_id) {
                Some(idx) => planes[idx].push(hit),
                None => warn!(
                    "event {}: dropping hit from unknown sensor {}",
                    event_number, sensor_id
                ),
            }
        }
        Self::new(run_number, event_number, planes)
    }

    pub fn hit(&self, plane: usize, index: usize) -> &Hit {
        &self.planes[plane][index]
    }

    pub fn hit_counts(&self) -> Vec<usize> {
        self.planes.iter().map(Vec::len).collect()
    }

    pub fn total_hits(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }
}

/// Run-level metadata checked against the configured geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_number: u32,
    pub geometry_id: i32,
}
