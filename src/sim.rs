//! Synthetic test-beam events with known misalignments.
//!
//! Straight tracks are generated with a uniform entry point and Gaussian
//! slopes, intersected with every plane, displaced by that plane's injected
//! misalignment and smeared with the plane resolution. Optional inefficiency
//! drops hits and optional noise adds uncorrelated hits. The generator is
//! seeded, so the same parameters always give the same events.
//!
//! Misalignments follow the small-angle model the record builder
//! differentiates: a hit at true position `p` on a plane with pivot `c` is
//! reported at `p + shift + omega x (p - c)` with `omega = (alpha, beta, gamma)`.

use crate::event::EventHits;
use crate::geometry::Geometry;
use crate::types::Hit;
use log::{debug, warn};
use nalgebra::Vector3;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson, StandardNormal};
use serde::{Deserialize, Serialize};

/// Injected displacement of one plane.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneMisalignment {
    pub sensor_id: i32,
    /// x, y, z shift.
    pub shift: [f64; 3],
    /// alpha, beta, gamma rotation angles (radians).
    pub rotation: [f64; 3],
}

impl PlaneMisalignment {
    fn displace(&self, p: &Vector3<f64>, pivot: &Vector3<f64>) -> Vector3<f64> {
        let omega = Vector3::from(self.rotation);
        p + Vector3::from(self.shift) + omega.cross(&(p - pivot))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestBeamParams {
    pub seed: u64,
    /// Number of events produced by the iterator.
    pub events: usize,
    pub tracks_per_event: usize,
    /// Half-width of the uniform entry-point distribution at z = 0 (x, y).
    pub beam_half_width: [f64; 2],
    /// Gaussian spread of dx/dz and dy/dz.
    pub slope_sigma: [f64; 2],
    /// Smear hits with the plane resolution.
    pub smear: bool,
    /// Probability that a plane records a track's hit.
    pub efficiency: f64,
    /// Mean number of noise hits per plane and event.
    pub noise_hits: f64,
    pub misalignments: Vec<PlaneMisalignment>,
}

impl Default for TestBeamParams {
    fn default() -> Self {
        Self {
            seed: 42,
            events: 1000,
            tracks_per_event: 1,
            beam_half_width: [5.0, 5.0],
            slope_sigma: [1e-3, 1e-3],
            smear: true,
            efficiency: 1.0,
            noise_hits: 0.0,
            misalignments: Vec::new(),
        }
    }
}

/// Seeded event generator; also an iterator over `params.events` events.
pub struct TestBeam {
    geometry: Geometry,
    params: TestBeamParams,
    /// Misalignment per plane ordinal.
    displacements: Vec<Option<PlaneMisalignment>>,
    rng: StdRng,
    run_number: u32,
    produced: usize,
}

impl TestBeam {
    pub fn new(geometry: &Geometry, params: TestBeamParams) -> Self {
        let mut displacements = vec![None; geometry.len()];
        for m in &params.misalignments {
            match geometry.ordinal_of(m.sensor_id) {
                Some(idx) => displacements[idx] = Some(m.clone()),
                None => warn!("misalignment for unknown sensor {} ignored", m.sensor_id),
            }
        }
        Self {
            geometry: geometry.clone(),
            rng: StdRng::seed_from_u64(params.seed),
            params,
            displacements,
            run_number: 1,
            produced: 0,
        }
    }

    pub fn with_run_number(mut self, run_number: u32) -> Self {
        self.run_number = run_number;
        self
    }

    pub fn params(&self) -> &TestBeamParams {
        &self.params
    }

    fn gaussian(&mut self, sigma: f64) -> f64 {
        if sigma <= 0.0 {
            return 0.0;
        }
        let n: f64 = self.rng.sample(StandardNormal);
        n * sigma
    }

    fn uniform(&mut self, half_width: f64) -> f64 {
        if half_width <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-half_width..half_width)
    }

    /// Generates the next event, regardless of the configured event count.
    pub fn generate(&mut self) -> EventHits {
        let event_number = self.produced as u64;
        self.produced += 1;
        let mut planes: Vec<Vec<Hit>> = vec![Vec::new(); self.geometry.len()];

        for _ in 0..self.params.tracks_per_event {
            let x0 = self.uniform(self.params.beam_half_width[0]);
            let y0 = self.uniform(self.params.beam_half_width[1]);
            let ax = self.gaussian(self.params.slope_sigma[0]);
            let ay = self.gaussian(self.params.slope_sigma[1]);
            for ordinal in 0..self.geometry.len() {
                if self.params.efficiency < 1.0 && self.rng.gen::<f64>() >= self.params.efficiency {
                    continue;
                }
                let plane = self.geometry.plane(ordinal);
                let z = plane.z;
                let (sx, sy) = (plane.resolution.x, plane.resolution.y);
                let pivot = plane.pivot();
                let truth = Vector3::new(x0 + ax * z, y0 + ay * z, z);
                let mut p = match &self.displacements[ordinal] {
                    Some(m) => m.displace(&truth, &pivot),
                    None => truth,
                };
                if self.params.smear {
                    p.x += self.gaussian(sx);
                    p.y += self.gaussian(sy);
                }
                planes[ordinal].push(Hit::from(p));
            }
        }

        if self.params.noise_hits > 0.0 {
            if let Ok(poisson) = Poisson::new(self.params.noise_hits) {
                for (ordinal, hits) in planes.iter_mut().enumerate() {
                    let count = poisson.sample(&mut self.rng) as usize;
                    let z = self.geometry.plane(ordinal).z;
                    for _ in 0..count {
                        let x = self.uniform(self.params.beam_half_width[0]);
                        let y = self.uniform(self.params.beam_half_width[1]);
                        hits.push(Hit::new(x, y, z));
                    }
                    hits.shuffle(&mut self.rng);
                }
            }
        }

        debug!(
            "generated event {} with hits per plane {:?}",
            event_number,
            planes.iter().map(Vec::len).collect::<Vec<_>>()
        );
        EventHits::new(self.run_number, event_number, planes)
    }
}

impl Iterator for TestBeam {
    type Item = EventHits;

    fn next(&mut self) -> Option<EventHits> {
        if self.produced >= self.params.events {
            return None;
        }
        Some(self.generate())
    }
}
